//! Synheart Nudge - On-device insight evaluation and notification dispatch
//!
//! Nudge turns a window of daily health snapshots plus environmental readings
//! into at most one user-facing alert per cycle: tier classification → tier
//! rule set → environmental rules → ranking → dedupe gate → dispatch.
//!
//! ## Modules
//!
//! - **Evaluation**: `tier`, `rules`, `evaluator` and `environment` produce ranked candidates
//! - **Delivery**: `dedupe`, `dispatch` and `engine` decide what is sent and persist it

pub mod clock;
pub mod config;
pub mod dedupe;
pub mod dispatch;
pub mod engine;
pub mod environment;
pub mod error;
pub mod evaluator;
pub mod providers;
pub mod ranker;
pub mod rules;
pub mod stats;
pub mod storage;
pub mod tier;
pub mod types;

// FFI bindings for C interop (always available for cdylib/staticlib builds)
pub mod ffi;

pub use clock::{Clock, DayReference, FixedClock, SystemClock};
pub use config::InsightConfig;
pub use dedupe::{DedupeGate, GapPolicy, KvLastSentStore, LastSentMap, LastSentStore};
pub use dispatch::{AlertStore, Dispatcher, KvAlertStore, NotificationScheduler};
pub use engine::{CycleOutcome, CycleReport, DispatchContext, InsightEngine};
pub use environment::{EnvironmentalInsightSource, EnvironmentalReading, EnvironmentalSource};
pub use error::InsightError;
pub use evaluator::{evaluate_insights, EvaluateOptions, InsightEvaluator};
pub use providers::HistoryProvider;
pub use ranker::rank_candidates;
pub use storage::{FileKeyValueStore, KeyValueStore, MemoryKeyValueStore};
pub use types::{AlertItem, AlertType, HealthHistory, HealthSnapshot, InsightCandidate, Severity, Tier};

/// Nudge library version
pub const NUDGE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Producer name reported by the CLI and host bindings
pub const PRODUCER_NAME: &str = "synheart-nudge";
