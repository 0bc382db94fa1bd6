//! Nudge CLI - Command-line interface for Synheart Nudge
//!
//! Commands:
//! - evaluate: Print ranked insight candidates for a health history
//! - dispatch: Run one evaluate-and-dispatch cycle against a state directory
//! - state: Inspect or reset the last-sent map
//! - alerts: List, dismiss or purge stored alerts
//! - doctor: Diagnose configuration and stored state

use clap::{Parser, Subcommand, ValueEnum};
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing_subscriber::EnvFilter;

use synheart_nudge::clock::{Clock, FixedClock, SystemClock};
use synheart_nudge::dedupe::{LastSentMap, LAST_SENT_STORAGE_KEY};
use synheart_nudge::dispatch::{LogNotificationScheduler, ALERTS_STORAGE_KEY};
use synheart_nudge::providers::{FileHistoryProvider, HistoryProvider, StaticHistoryProvider};
use synheart_nudge::types::{AlertItem, InsightCandidate};
use synheart_nudge::{
    AlertStore, DispatchContext, EnvironmentalReading, EvaluateOptions, FileKeyValueStore,
    HealthHistory, InsightConfig, InsightEngine, InsightError, InsightEvaluator, KeyValueStore,
    KvAlertStore, KvLastSentStore, LastSentStore, NUDGE_VERSION, PRODUCER_NAME,
};

/// Nudge - On-device insight evaluation and notification dispatch
#[derive(Parser)]
#[command(name = "nudge")]
#[command(author = "Synheart AI Inc")]
#[command(version = NUDGE_VERSION)]
#[command(about = "Evaluate health insights and dispatch at most one alert", long_about = None)]
struct Cli {
    /// Directory holding last-sent and alert state
    #[arg(long, global = true, default_value = ".nudge")]
    state_dir: PathBuf,

    /// Engine configuration file (JSON); defaults apply when omitted
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Instant treated as now (RFC 3339); defaults to the system clock
    #[arg(long, global = true)]
    now: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print ranked insight candidates for a health history
    Evaluate {
        /// History file: JSON array of daily snapshots (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Output format
        #[arg(long, default_value = "json-pretty")]
        output_format: OutputFormat,
    },

    /// Run one evaluate-and-dispatch cycle
    Dispatch {
        /// History file: JSON array of daily snapshots (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Environmental readings file (JSON array)
        #[arg(long)]
        readings: Option<PathBuf>,

        #[arg(long, allow_hyphen_values = true)]
        latitude: Option<f64>,

        #[arg(long, allow_hyphen_values = true)]
        longitude: Option<f64>,

        /// Log accepted alerts as notifications
        #[arg(long)]
        notify: bool,
    },

    /// Inspect or reset the last-sent map
    State {
        #[command(subcommand)]
        action: StateAction,
    },

    /// Manage stored alerts
    Alerts {
        #[command(subcommand)]
        action: AlertsAction,
    },

    /// Diagnose configuration and stored state
    Doctor {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum StateAction {
    /// Print the last-sent map
    Show,
    /// Clear the last-sent map
    Reset,
}

#[derive(Subcommand)]
enum AlertsAction {
    /// Print stored alerts
    List {
        /// Include dismissed alerts
        #[arg(long)]
        all: bool,
    },
    /// Mark an alert dismissed
    Dismiss { id: String },
    /// Delete alerts older than the retention window
    Purge {
        #[arg(long, default_value = "30")]
        older_than_days: i64,
    },
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    /// Newline-delimited JSON (one candidate per line)
    Ndjson,
    /// JSON array of candidates
    Json,
    /// Pretty-printed JSON
    JsonPretty,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!(
                "{}",
                serde_json::to_string(&CliError::from(e)).unwrap_or_else(|_| "Unknown error".to_string())
            );
            ExitCode::FAILURE
        }
    }
}

/// Logs go to stderr so stdout stays machine-readable
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

async fn run(cli: Cli) -> Result<(), NudgeCliError> {
    let clock: Arc<dyn Clock> = match cli.now.as_deref() {
        Some(now) => Arc::new(FixedClock(parse_now(now)?)),
        None => Arc::new(SystemClock),
    };
    let kv: Arc<dyn KeyValueStore> = Arc::new(FileKeyValueStore::new(&cli.state_dir));

    match cli.command {
        Commands::Evaluate {
            input,
            output_format,
        } => {
            let config = load_config(cli.config.as_deref())?;
            cmd_evaluate(&input, config, clock.now(), &output_format)
        }
        Commands::Dispatch {
            input,
            readings,
            latitude,
            longitude,
            notify,
        } => {
            let config = load_config(cli.config.as_deref())?;
            let ctx = DispatchContext {
                latitude,
                longitude,
                readings: match readings {
                    Some(path) => serde_json::from_str::<Vec<EnvironmentalReading>>(&fs::read_to_string(path)?)?,
                    None => Vec::new(),
                },
            };
            cmd_dispatch(&input, config, kv, clock, ctx, notify).await
        }
        Commands::State { action } => cmd_state(kv, action).await,
        Commands::Alerts { action } => cmd_alerts(kv, action, clock.now()).await,
        Commands::Doctor { json } => cmd_doctor(&cli.state_dir, cli.config.as_deref(), kv, json).await,
    }
}

fn cmd_evaluate(
    input: &Path,
    config: InsightConfig,
    now: DateTime<Utc>,
    format: &OutputFormat,
) -> Result<(), NudgeCliError> {
    let history = HealthHistory::from_json(&read_input(input)?)?;
    let evaluator = InsightEvaluator::new(config)?;
    let candidates = evaluator.evaluate(&history, EvaluateOptions::at(now));
    print!("{}", format_output(&candidates, format)?);
    Ok(())
}

async fn cmd_dispatch(
    input: &Path,
    config: InsightConfig,
    kv: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    ctx: DispatchContext,
    notify: bool,
) -> Result<(), NudgeCliError> {
    let history: Arc<dyn HistoryProvider> = if input.as_os_str() == "-" {
        Arc::new(StaticHistoryProvider::new(HealthHistory::from_json(&read_input(input)?)?))
    } else {
        Arc::new(FileHistoryProvider::new(input))
    };

    let mut engine = InsightEngine::new(
        config,
        history,
        Arc::new(KvLastSentStore::new(kv.clone())),
        Arc::new(KvAlertStore::new(kv)),
    )?
    .with_clock(clock);
    if notify {
        engine = engine.with_scheduler(Arc::new(LogNotificationScheduler));
    }

    let report = engine.run_cycle(&ctx).await;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn cmd_state(kv: Arc<dyn KeyValueStore>, action: StateAction) -> Result<(), NudgeCliError> {
    let store = KvLastSentStore::new(kv);
    match action {
        StateAction::Show => {
            let map = store.load().await?;
            println!("{}", serde_json::to_string_pretty(&map)?);
        }
        StateAction::Reset => {
            store.reset().await?;
            println!("{}", serde_json::json!({ "reset": LAST_SENT_STORAGE_KEY }));
        }
    }
    Ok(())
}

async fn cmd_alerts(
    kv: Arc<dyn KeyValueStore>,
    action: AlertsAction,
    now: DateTime<Utc>,
) -> Result<(), NudgeCliError> {
    let store = KvAlertStore::new(kv);
    match action {
        AlertsAction::List { all } => {
            let alerts: Vec<AlertItem> = store
                .list()
                .await?
                .into_iter()
                .filter(|a| all || !a.dismissed)
                .collect();
            println!("{}", serde_json::to_string_pretty(&alerts)?);
        }
        AlertsAction::Dismiss { id } => {
            if !store.dismiss(&id).await? {
                return Err(NudgeCliError::AlertNotFound(id));
            }
            println!("{}", serde_json::json!({ "dismissed": id }));
        }
        AlertsAction::Purge { older_than_days } => {
            let cutoff = purge_cutoff(now, older_than_days)?;
            let removed = store.purge_before(cutoff).await?;
            println!("{}", serde_json::json!({ "purged": removed }));
        }
    }
    Ok(())
}

async fn cmd_doctor(
    state_dir: &Path,
    config: Option<&Path>,
    kv: Arc<dyn KeyValueStore>,
    json: bool,
) -> Result<(), NudgeCliError> {
    let mut checks: Vec<DoctorCheck> = Vec::new();

    checks.push(DoctorCheck::new(
        "nudge_version",
        CheckStatus::Ok,
        format!("Nudge version {}", NUDGE_VERSION),
    ));

    checks.push(match (config, load_config(config)) {
        (None, _) => DoctorCheck::new("config", CheckStatus::Ok, "Using default configuration".to_string()),
        (Some(path), Ok(cfg)) => DoctorCheck::new(
            "config",
            CheckStatus::Ok,
            format!(
                "{} valid (utc offset {} min)",
                path.display(),
                cfg.utc_offset_minutes
            ),
        ),
        (Some(_), Err(e)) => DoctorCheck::new("config", CheckStatus::Error, CliError::from(e).message),
    });

    if state_dir.is_dir() {
        checks.push(DoctorCheck::new(
            "state_dir",
            CheckStatus::Ok,
            format!("{} exists", state_dir.display()),
        ));
    } else {
        checks.push(DoctorCheck::new(
            "state_dir",
            CheckStatus::Warning,
            format!("{} does not exist yet; it is created on first dispatch", state_dir.display()),
        ));
    }

    checks.push(match kv.get(LAST_SENT_STORAGE_KEY).await {
        Ok(None) => DoctorCheck::new("last_sent", CheckStatus::Ok, "No deliveries recorded".to_string()),
        Ok(Some(raw)) => match LastSentMap::from_json(&raw) {
            Ok(map) => DoctorCheck::new(
                "last_sent",
                CheckStatus::Ok,
                format!("{} insight keys recorded", map.len()),
            ),
            Err(e) => DoctorCheck::new(
                "last_sent",
                CheckStatus::Error,
                format!("Corrupt last-sent state, dispatch will send nothing: {}", e),
            ),
        },
        Err(e) => DoctorCheck::new("last_sent", CheckStatus::Error, e.to_string()),
    });

    checks.push(match kv.get(ALERTS_STORAGE_KEY).await {
        Ok(None) => DoctorCheck::new("alerts", CheckStatus::Ok, "No alerts stored".to_string()),
        Ok(Some(raw)) => match serde_json::from_str::<Vec<AlertItem>>(&raw) {
            Ok(alerts) => DoctorCheck::new(
                "alerts",
                CheckStatus::Ok,
                format!(
                    "{} alerts stored ({} active)",
                    alerts.len(),
                    alerts.iter().filter(|a| !a.dismissed).count()
                ),
            ),
            Err(e) => DoctorCheck::new("alerts", CheckStatus::Error, format!("Invalid alerts JSON: {}", e)),
        },
        Err(e) => DoctorCheck::new("alerts", CheckStatus::Error, e.to_string()),
    });

    let stdin_check = if atty::is(atty::Stream::Stdin) {
        DoctorCheck::new("stdin", CheckStatus::Ok, "stdin is a TTY (interactive mode)".to_string())
    } else {
        DoctorCheck::new("stdin", CheckStatus::Ok, "stdin is a pipe (--input - ready)".to_string())
    };
    checks.push(stdin_check);

    let report = DoctorReport {
        producer: PRODUCER_NAME.to_string(),
        version: NUDGE_VERSION.to_string(),
        checks,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Nudge Doctor Report");
        println!("===================");
        println!("Producer: {}", report.producer);
        println!("Version:  {}", report.version);
        println!("\nChecks:");

        for check in &report.checks {
            let status_icon = match check.status {
                CheckStatus::Ok => "[OK]",
                CheckStatus::Warning => "[WARN]",
                CheckStatus::Error => "[ERR]",
            };
            println!("  {} {}: {}", status_icon, check.name, check.message);
        }
    }

    let has_errors = report.checks.iter().any(|c| matches!(c.status, CheckStatus::Error));
    if has_errors {
        Err(NudgeCliError::DoctorFailed)
    } else {
        Ok(())
    }
}

// Helper functions

fn read_input(path: &Path) -> Result<String, NudgeCliError> {
    if path.as_os_str() == "-" {
        let mut buf = String::new();
        io::stdin().read_to_string(&mut buf)?;
        Ok(buf)
    } else {
        Ok(fs::read_to_string(path)?)
    }
}

fn load_config(path: Option<&Path>) -> Result<InsightConfig, NudgeCliError> {
    match path {
        Some(path) => Ok(InsightConfig::from_json(&fs::read_to_string(path)?)?),
        None => Ok(InsightConfig::default()),
    }
}

fn parse_now(now: &str) -> Result<DateTime<Utc>, NudgeCliError> {
    DateTime::parse_from_rfc3339(now)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| NudgeCliError::InvalidArgument(format!("--now '{}': {}", now, e)))
}

/// Instant `older_than_days` before `now`
fn purge_cutoff(now: DateTime<Utc>, older_than_days: i64) -> Result<DateTime<Utc>, NudgeCliError> {
    if older_than_days < 0 {
        return Err(NudgeCliError::InvalidArgument(
            "--older-than-days must not be negative".to_string(),
        ));
    }
    Duration::try_days(older_than_days)
        .and_then(|age| now.checked_sub_signed(age))
        .ok_or_else(|| {
            NudgeCliError::InvalidArgument(format!(
                "--older-than-days {} is out of range",
                older_than_days
            ))
        })
}

fn format_output(candidates: &[InsightCandidate], format: &OutputFormat) -> Result<String, NudgeCliError> {
    match format {
        OutputFormat::Ndjson => {
            let mut out = String::new();
            for candidate in candidates {
                out.push_str(&serde_json::to_string(candidate)?);
                out.push('\n');
            }
            Ok(out)
        }
        OutputFormat::Json => Ok(serde_json::to_string(candidates)? + "\n"),
        OutputFormat::JsonPretty => Ok(serde_json::to_string_pretty(candidates)? + "\n"),
    }
}

// Error types

#[derive(Debug)]
enum NudgeCliError {
    Io(io::Error),
    Insight(InsightError),
    Json(serde_json::Error),
    InvalidArgument(String),
    AlertNotFound(String),
    DoctorFailed,
}

impl From<io::Error> for NudgeCliError {
    fn from(e: io::Error) -> Self {
        NudgeCliError::Io(e)
    }
}

impl From<InsightError> for NudgeCliError {
    fn from(e: InsightError) -> Self {
        NudgeCliError::Insight(e)
    }
}

impl From<serde_json::Error> for NudgeCliError {
    fn from(e: serde_json::Error) -> Self {
        NudgeCliError::Json(e)
    }
}

#[derive(serde::Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<NudgeCliError> for CliError {
    fn from(e: NudgeCliError) -> Self {
        match e {
            NudgeCliError::Io(e) => CliError {
                code: "IO_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check file paths and permissions".to_string()),
            },
            NudgeCliError::Insight(InsightError::InvalidConfig(msg)) => CliError {
                code: "CONFIG_ERROR".to_string(),
                message: msg,
                hint: Some("Tier boundaries must increase and windows must be at least 1".to_string()),
            },
            NudgeCliError::Insight(e @ InsightError::StorageError(_)) => CliError {
                code: "STORAGE_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check --state-dir, or run 'nudge doctor'".to_string()),
            },
            NudgeCliError::Insight(e) => CliError {
                code: "ENGINE_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Run 'nudge doctor' for details".to_string()),
            },
            NudgeCliError::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check JSON syntax".to_string()),
            },
            NudgeCliError::InvalidArgument(msg) => CliError {
                code: "INVALID_ARGUMENT".to_string(),
                message: msg,
                hint: Some("Run with --help for usage".to_string()),
            },
            NudgeCliError::AlertNotFound(id) => CliError {
                code: "ALERT_NOT_FOUND".to_string(),
                message: format!("No alert with id {}", id),
                hint: Some("Run 'nudge alerts list --all' to see stored ids".to_string()),
            },
            NudgeCliError::DoctorFailed => CliError {
                code: "DOCTOR_FAILED".to_string(),
                message: "One or more health checks failed".to_string(),
                hint: Some("Review the doctor report for details".to_string()),
            },
        }
    }
}

// Report types

#[derive(serde::Serialize)]
struct DoctorReport {
    producer: String,
    version: String,
    checks: Vec<DoctorCheck>,
}

#[derive(serde::Serialize)]
struct DoctorCheck {
    name: String,
    status: CheckStatus,
    message: String,
}

impl DoctorCheck {
    fn new(name: &str, status: CheckStatus, message: String) -> Self {
        Self {
            name: name.to_string(),
            status,
            message,
        }
    }
}

#[derive(serde::Serialize)]
#[serde(rename_all = "lowercase")]
enum CheckStatus {
    Ok,
    Warning,
    Error,
}
