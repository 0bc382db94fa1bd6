//! Tiered health rules
//!
//! Each tier owns an independent rule set. A rule inspects a suffix window of
//! the history and emits at most one candidate with a fixed id; no rule reads
//! or suppresses another rule's output.

mod tier1;
mod tier2;
mod tier3;

pub use tier1::{BEDTIME_VARIABILITY, ELEVATED_RHR, LOW_ACTIVITY};
pub use tier2::{LOW_HRV, SLEEP_LATENCY};
pub use tier3::{FREQUENT_AWAKENINGS, LOW_DEEP, LOW_REM};

use crate::config::RuleThresholds;
use crate::stats;
use crate::types::{
    AlertType, HealthSnapshot, InsightCandidate, SourceAttribution, Tier,
};

/// Inputs shared by every rule in one evaluation
pub struct RuleContext<'a> {
    /// History up to and including the evaluated day, oldest first
    history: &'a [HealthSnapshot],
    thresholds: &'a RuleThresholds,
}

impl<'a> RuleContext<'a> {
    /// Returns `None` for an empty history
    pub fn new(history: &'a [HealthSnapshot], thresholds: &'a RuleThresholds) -> Option<Self> {
        if history.is_empty() {
            return None;
        }
        Some(Self {
            history,
            thresholds,
        })
    }

    /// The most recent snapshot
    pub fn today(&self) -> &'a HealthSnapshot {
        // Non-empty by construction
        &self.history[self.history.len() - 1]
    }

    /// The last `n` snapshots (fewer if the history is shorter)
    pub fn last(&self, n: usize) -> &'a [HealthSnapshot] {
        let start = self.history.len().saturating_sub(n);
        &self.history[start..]
    }

    /// Rolling average of a metric over the baseline window, known values only
    pub fn baseline(&self, metric: impl Fn(&HealthSnapshot) -> Option<f64>) -> Option<f64> {
        let values: Vec<f64> = self
            .last(self.thresholds.baseline_window)
            .iter()
            .filter_map(metric)
            .filter(|v| v.is_finite())
            .collect();
        stats::average(&values)
    }

    pub fn thresholds(&self) -> &'a RuleThresholds {
        self.thresholds
    }
}

/// Run the rule set for the active tier only
pub fn evaluate_tier(tier: Tier, ctx: &RuleContext<'_>) -> Vec<InsightCandidate> {
    match tier {
        Tier::Critical => tier1::evaluate(ctx),
        Tier::Moderate => tier2::evaluate(ctx),
        Tier::Mild => tier3::evaluate(ctx),
    }
}

/// Fields of a candidate a rule fills in
pub(crate) struct Draft {
    pub id: &'static str,
    pub tier: Tier,
    pub category: AlertType,
    pub title: String,
    pub body: String,
    pub source: (&'static str, &'static str),
    pub data_note: String,
}

impl Draft {
    pub fn build(self) -> InsightCandidate {
        InsightCandidate {
            id: self.id.to_string(),
            tier: self.tier,
            category: self.category,
            title: self.title,
            body: self.body,
            source: SourceAttribution::new(self.source.0, self.source.1),
            data_note: Some(self.data_note),
        }
    }
}

/// Format minutes as `Hh MMm`
pub(crate) fn format_minutes(minutes: f64) -> String {
    let total = minutes.round().max(0.0) as i64;
    format!("{}h {:02}m", total / 60, total % 60)
}
