//! Evaluate-and-dispatch cycle
//!
//! One cycle loads the history, checks it is fresh, evaluates the tier rules
//! and environmental readings, ranks the combined candidates, admits at most
//! one through the dedupe gate and dispatches it.
//!
//! `today` is computed once per cycle from the injected clock and the
//! configured day reference, and that single value drives the stale guard,
//! the evaluation window, gap arithmetic and the recorded last-sent date.

use std::sync::Arc;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::InsightConfig;
use crate::dedupe::{DedupeGate, LastSentStore};
use crate::dispatch::{AlertStore, Dispatcher, NotificationScheduler, NotificationStatus};
use crate::environment::{
    Coordinates, EnvironmentalInsightSource, EnvironmentalReading, EnvironmentalSource,
};
use crate::error::InsightError;
use crate::evaluator::InsightEvaluator;
use crate::providers::HistoryProvider;
use crate::ranker::rank_candidates;
use crate::types::AlertItem;

/// Caller-supplied context for one cycle
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DispatchContext {
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
    /// Readings the host already has; evaluated without a fetch
    #[serde(default)]
    pub readings: Vec<EnvironmentalReading>,
}

impl DispatchContext {
    pub fn at(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude: Some(latitude),
            longitude: Some(longitude),
            readings: Vec::new(),
        }
    }

    pub fn with_reading(mut self, reading: EnvironmentalReading) -> Self {
        self.readings.push(reading);
        self
    }

    /// Coordinates, when both are present and finite
    pub fn location(&self) -> Option<Coordinates> {
        match (self.latitude, self.longitude) {
            (Some(latitude), Some(longitude)) if latitude.is_finite() && longitude.is_finite() => {
                Some(Coordinates {
                    latitude,
                    longitude,
                })
            }
            _ => None,
        }
    }
}

/// Cycle stage a failure happened in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleStep {
    LoadHistory,
    Environment,
    Gate,
    Dispatch,
    Notification,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepFailure {
    pub step: CycleStep,
    pub message: String,
}

/// How a cycle ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleOutcome {
    /// The history provider failed
    HistoryUnavailable,
    /// No snapshot is dated today
    StaleHistory,
    NoCandidates,
    /// Every candidate was inside its gap
    AllSuppressed,
    /// Last-sent state could not be read or written
    GateFailed,
    /// A candidate was accepted but the alert could not be persisted
    DispatchFailed,
    Dispatched,
}

/// Everything observable about one cycle
#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub today: NaiveDate,
    pub outcome: CycleOutcome,
    pub candidates_considered: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alert: Option<AlertItem>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notification: Option<NotificationStatus>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub step_failures: Vec<StepFailure>,
}

impl CycleReport {
    fn new(today: NaiveDate) -> Self {
        Self {
            today,
            outcome: CycleOutcome::NoCandidates,
            candidates_considered: 0,
            alert: None,
            notification: None,
            step_failures: Vec::new(),
        }
    }

    fn fail(mut self, step: CycleStep, outcome: CycleOutcome, error: &InsightError) -> Self {
        self.step_failures.push(StepFailure {
            step,
            message: error.to_string(),
        });
        self.outcome = outcome;
        self
    }
}

/// Wires the evaluator, environmental source, gate and dispatcher together
pub struct InsightEngine {
    evaluator: InsightEvaluator,
    history: Arc<dyn HistoryProvider>,
    environment: EnvironmentalInsightSource,
    gate: DedupeGate,
    dispatcher: Dispatcher,
    clock: Arc<dyn Clock>,
}

impl InsightEngine {
    pub fn new(
        config: InsightConfig,
        history: Arc<dyn HistoryProvider>,
        last_sent: Arc<dyn LastSentStore>,
        alerts: Arc<dyn AlertStore>,
    ) -> Result<Self, InsightError> {
        let environment = EnvironmentalInsightSource::new(config.environment.clone());
        let gate = DedupeGate::new(last_sent, config.gap_policy.clone());
        let dispatcher =
            Dispatcher::new(alerts).with_short_body_max_chars(config.short_body_max_chars);
        let evaluator = InsightEvaluator::new(config)?;

        Ok(Self {
            evaluator,
            history,
            environment,
            gate,
            dispatcher,
            clock: Arc::new(SystemClock),
        })
    }

    pub fn with_environment_source(mut self, source: Arc<dyn EnvironmentalSource>) -> Self {
        self.environment.add_source(source);
        self
    }

    pub fn with_scheduler(mut self, scheduler: Arc<dyn NotificationScheduler>) -> Self {
        self.dispatcher = self.dispatcher.with_scheduler(scheduler);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &InsightConfig {
        self.evaluator.config()
    }

    /// Calendar day the next cycle will treat as today
    pub fn today(&self) -> NaiveDate {
        self.evaluator.day_reference().day_of(self.clock.now())
    }

    /// Run one cycle and return the resulting alert, if any.
    ///
    /// Never fails: every failure ends the cycle with `None`. Use
    /// [`run_cycle`](Self::run_cycle) to see why.
    pub async fn evaluate_and_dispatch_one(&self, ctx: &DispatchContext) -> Option<AlertItem> {
        self.run_cycle(ctx).await.alert
    }

    /// Run one cycle, reporting the outcome and every step failure
    pub async fn run_cycle(&self, ctx: &DispatchContext) -> CycleReport {
        let now = self.clock.now();
        let today = self.evaluator.day_reference().day_of(now);
        let mut report = CycleReport::new(today);

        let history = match self.history.load_history().await {
            Ok(history) => history.up_to(today),
            Err(e) => {
                warn!(error = %e, "history provider failed");
                return report.fail(CycleStep::LoadHistory, CycleOutcome::HistoryUnavailable, &e);
            }
        };

        let latest = history.latest().map(|s| s.date);
        if latest != Some(today) {
            info!(%today, latest = ?latest, "no snapshot for today, skipping cycle");
            report.outcome = CycleOutcome::StaleHistory;
            return report;
        }

        let health = self.evaluator.evaluate_for_day(&history, today);
        let env = self.environment.collect(ctx.location(), &ctx.readings).await;
        report
            .step_failures
            .extend(env.failures.into_iter().map(|f| StepFailure {
                step: CycleStep::Environment,
                message: format!("{}: {}", f.source_name, f.message),
            }));

        let ranked = rank_candidates([health, env.candidates]);
        report.candidates_considered = ranked.len();
        debug!(count = ranked.len(), "ranked candidates");
        if ranked.is_empty() {
            report.outcome = CycleOutcome::NoCandidates;
            return report;
        }

        let accepted = match self.gate.admit(&ranked, today).await {
            Ok(Some(candidate)) => candidate,
            Ok(None) => {
                debug!("all candidates suppressed");
                report.outcome = CycleOutcome::AllSuppressed;
                return report;
            }
            Err(e) => {
                warn!(error = %e, "dedupe gate failed, nothing sent");
                return report.fail(CycleStep::Gate, CycleOutcome::GateFailed, &e);
            }
        };

        match self.dispatcher.dispatch(&accepted, now).await {
            Ok(receipt) => {
                if let NotificationStatus::Failed(reason) = &receipt.notification {
                    report.step_failures.push(StepFailure {
                        step: CycleStep::Notification,
                        message: reason.clone(),
                    });
                }
                info!(alert_id = %receipt.alert.id, dedupe_key = %receipt.alert.dedupe_key, "alert dispatched");
                report.outcome = CycleOutcome::Dispatched;
                report.notification = Some(receipt.notification);
                report.alert = Some(receipt.alert);
                report
            }
            Err(e) => {
                warn!(dedupe_key = %accepted.id, error = %e, "alert could not be persisted");
                report.fail(CycleStep::Dispatch, CycleOutcome::DispatchFailed, &e)
            }
        }
    }
}
