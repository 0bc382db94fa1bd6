//! Insight evaluation
//!
//! Turns a health history into the ranked, unfiltered candidate list:
//! day selection → tier classification → tier rule set → ranking.

use chrono::{DateTime, NaiveDate, Utc};
use tracing::debug;

use crate::clock::DayReference;
use crate::config::InsightConfig;
use crate::error::InsightError;
use crate::ranker::rank_candidates;
use crate::rules::{evaluate_tier, RuleContext};
use crate::tier::TierClassifier;
use crate::types::{HealthHistory, InsightCandidate};

/// Per-call evaluation options
#[derive(Debug, Clone, Copy, Default)]
pub struct EvaluateOptions {
    /// Instant treated as "now"; defaults to the system clock
    pub now: Option<DateTime<Utc>>,
}

impl EvaluateOptions {
    pub fn at(now: DateTime<Utc>) -> Self {
        Self { now: Some(now) }
    }
}

/// Evaluate with the default configuration.
///
/// Returns an empty list when the latest night's sleep is adequate or unknown.
pub fn evaluate_insights(history: &HealthHistory, options: EvaluateOptions) -> Vec<InsightCandidate> {
    InsightEvaluator::default().evaluate(history, options)
}

/// Configurable tiered rule evaluator
#[derive(Debug, Clone)]
pub struct InsightEvaluator {
    config: InsightConfig,
    days: DayReference,
}

impl Default for InsightEvaluator {
    fn default() -> Self {
        Self {
            config: InsightConfig::default(),
            days: DayReference::utc(),
        }
    }
}

impl InsightEvaluator {
    pub fn new(config: InsightConfig) -> Result<Self, InsightError> {
        config.validate()?;
        let days = DayReference::from_offset_minutes(config.utc_offset_minutes)?;
        Ok(Self { config, days })
    }

    pub fn config(&self) -> &InsightConfig {
        &self.config
    }

    pub fn day_reference(&self) -> DayReference {
        self.days
    }

    /// Evaluate the history as of `options.now`
    pub fn evaluate(&self, history: &HealthHistory, options: EvaluateOptions) -> Vec<InsightCandidate> {
        let now = options.now.unwrap_or_else(Utc::now);
        self.evaluate_for_day(history, self.days.day_of(now))
    }

    /// Evaluate the history as of a calendar day. Snapshots after `today` are ignored.
    pub fn evaluate_for_day(&self, history: &HealthHistory, today: NaiveDate) -> Vec<InsightCandidate> {
        let window = history.up_to(today);
        let Some(ctx) = RuleContext::new(window.snapshots(), &self.config.rules) else {
            return Vec::new();
        };

        let latest = ctx.today();
        let Some(tier) = TierClassifier::classify_with(latest.sleep_minutes, &self.config.tiers)
        else {
            debug!(date = %latest.date, "sleep adequate or unknown, no insights");
            return Vec::new();
        };

        let candidates = evaluate_tier(tier, &ctx);
        debug!(
            date = %latest.date,
            tier = tier.level(),
            count = candidates.len(),
            "evaluated tier rules"
        );
        rank_candidates([candidates])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::{
        fixtures::{nights, start_day},
        BEDTIME_VARIABILITY, LOW_ACTIVITY, LOW_DEEP, LOW_REM,
    };
    use crate::types::{HealthSnapshot, Tier};
    use chrono::{Duration, NaiveTime, TimeZone};
    use pretty_assertions::assert_eq;

    fn noon(day: NaiveDate) -> DateTime<Utc> {
        Utc.from_utc_datetime(&day.and_hms_opt(12, 0, 0).unwrap())
    }

    fn last_day(history: &[HealthSnapshot]) -> NaiveDate {
        history[history.len() - 1].date
    }

    fn ids(candidates: &[InsightCandidate]) -> Vec<&str> {
        candidates.iter().map(|c| c.id.as_str()).collect()
    }

    #[test]
    fn test_adequate_sleep_yields_nothing() {
        let mut snapshots = nights(7, 480.0);
        for s in &mut snapshots {
            s.steps = Some(100);
            s.awakenings_count = Some(9);
        }
        let now = noon(last_day(&snapshots));
        let history = HealthHistory::new(snapshots);

        assert!(evaluate_insights(&history, EvaluateOptions::at(now)).is_empty());
    }

    #[test]
    fn test_unknown_sleep_yields_nothing() {
        let mut snapshots = nights(3, 200.0);
        snapshots[2].sleep_minutes = None;
        let now = noon(last_day(&snapshots));
        let history = HealthHistory::new(snapshots);

        assert!(evaluate_insights(&history, EvaluateOptions::at(now)).is_empty());
    }

    #[test]
    fn test_empty_history_yields_nothing() {
        let now = noon(start_day());
        assert!(evaluate_insights(&HealthHistory::default(), EvaluateOptions::at(now)).is_empty());
    }

    #[test]
    fn test_critical_week_with_irregular_bedtimes() {
        let bedtimes = [(22, 0), (23, 40), (21, 10), (23, 55), (22, 5), (0, 30), (23, 10)];
        let mut snapshots = nights(7, 200.0);
        for (s, (h, m)) in snapshots.iter_mut().zip(bedtimes) {
            s.sleep_start = NaiveTime::from_hms_opt(h, m, 0);
        }
        let now = noon(last_day(&snapshots));
        let history = HealthHistory::new(snapshots);

        let candidates = evaluate_insights(&history, EvaluateOptions::at(now));
        // No step data at all counts as zero steps, so low activity fires too
        assert_eq!(ids(&candidates), vec![BEDTIME_VARIABILITY, LOW_ACTIVITY]);
        assert!(candidates.iter().all(|c| c.tier == Tier::Critical));
    }

    #[test]
    fn test_low_activity_in_critical_tier() {
        let mut snapshots = nights(3, 250.0);
        for s in &mut snapshots {
            s.steps = Some(2000);
        }
        let now = noon(last_day(&snapshots));
        let history = HealthHistory::new(snapshots);

        let candidates = evaluate_insights(&history, EvaluateOptions::at(now));
        assert!(ids(&candidates).contains(&LOW_ACTIVITY));
    }

    #[test]
    fn test_mild_tier_low_deep_but_healthy_rem() {
        let mut snapshots = nights(3, 420.0);
        for s in &mut snapshots {
            s.sleep_deep_minutes = Some(50.0);
            s.sleep_rem_minutes = Some(90.0);
        }
        let now = noon(last_day(&snapshots));
        let history = HealthHistory::new(snapshots);

        let candidates = evaluate_insights(&history, EvaluateOptions::at(now));
        assert_eq!(ids(&candidates), vec![LOW_DEEP]);
        assert!(!ids(&candidates).contains(&LOW_REM));
    }

    #[test]
    fn test_only_active_tier_rules_run() {
        // Tier 2 night with data that would trip tier 1 and tier 3 rules
        let mut snapshots = nights(3, 360.0);
        for s in &mut snapshots {
            s.steps = Some(100);
            s.awakenings_count = Some(8);
            s.sleep_deep_minutes = Some(10.0);
        }
        let now = noon(last_day(&snapshots));
        let history = HealthHistory::new(snapshots);

        assert!(evaluate_insights(&history, EvaluateOptions::at(now)).is_empty());
    }

    #[test]
    fn test_future_snapshots_are_ignored() {
        let mut snapshots = nights(4, 480.0);
        snapshots[2].sleep_minutes = Some(420.0);
        snapshots[2].awakenings_count = Some(5);
        // Evaluate as of day 3: the adequate day-4 night is not visible yet
        let now = noon(start_day() + Duration::days(2));
        let history = HealthHistory::new(snapshots);

        let candidates = evaluate_insights(&history, EvaluateOptions::at(now));
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].tier, Tier::Mild);
    }

    #[test]
    fn test_evaluation_is_deterministic() {
        let mut snapshots = nights(30, 280.0);
        for (i, s) in snapshots.iter_mut().enumerate() {
            s.resting_heart_rate_bpm = Some(58.0 + (i % 3) as f64);
            s.steps = Some(1500 + (i as u32) * 10);
            s.sleep_start = NaiveTime::from_hms_opt(((20 + i * 2) % 24) as u32, 15, 0);
        }
        snapshots[29].resting_heart_rate_bpm = Some(80.0);
        let now = noon(last_day(&snapshots));
        let history = HealthHistory::new(snapshots);

        let first = evaluate_insights(&history, EvaluateOptions::at(now));
        let second = evaluate_insights(&history, EvaluateOptions::at(now));
        assert_eq!(first.len(), 3);
        assert_eq!(
            serde_json::to_string(&first).unwrap(),
            serde_json::to_string(&second).unwrap()
        );
    }

    #[test]
    fn test_custom_boundaries() {
        let mut config = InsightConfig::default();
        config.tiers.mild_below_minutes = 500.0;
        let evaluator = InsightEvaluator::new(config).unwrap();

        let mut snapshots = nights(1, 470.0);
        snapshots[0].awakenings_count = Some(4);
        let today = last_day(&snapshots);
        let history = HealthHistory::new(snapshots);

        assert_eq!(evaluator.evaluate_for_day(&history, today).len(), 1);
    }
}
