//! Tier 2 rules (moderately short sleep)

use super::{Draft, RuleContext};
use crate::types::{AlertType, InsightCandidate, Tier};

pub const SLEEP_LATENCY: &str = "tier2_sleep_latency";
pub const LOW_HRV: &str = "tier2_low_hrv";

pub(super) fn evaluate(ctx: &RuleContext<'_>) -> Vec<InsightCandidate> {
    [sleep_latency(ctx), low_hrv(ctx)]
        .into_iter()
        .flatten()
        .collect()
}

/// Repeated long gaps between getting into bed and falling asleep
fn sleep_latency(ctx: &RuleContext<'_>) -> Option<InsightCandidate> {
    let t = ctx.thresholds();
    let gaps: Vec<f64> = ctx
        .last(t.latency_window)
        .iter()
        .filter_map(|s| match (s.time_in_bed_minutes, s.sleep_minutes) {
            (Some(bed), Some(sleep)) => Some(bed - sleep),
            _ => None,
        })
        .collect();

    if gaps.len() < t.latency_min_nights {
        return None;
    }
    let long_nights = gaps.iter().filter(|g| **g >= t.latency_gap_minutes).count();
    if long_nights < t.latency_min_nights {
        return None;
    }

    Some(
        Draft {
            id: SLEEP_LATENCY,
            tier: Tier::Moderate,
            category: AlertType::SleepHealth,
            title: "You're spending a while awake in bed".to_string(),
            body: format!(
                "On {} of your last {} nights you spent {}+ minutes in bed without sleeping. \
                 If you can't fall asleep, get up and do something calm in dim light until \
                 you feel sleepy.",
                long_nights,
                gaps.len(),
                t.latency_gap_minutes.round()
            ),
            source: ("American Academy of Sleep Medicine", "https://sleepeducation.org/"),
            data_note: "Time in bed minus time asleep for recent nights.".to_string(),
        }
        .build(),
    )
}

/// Heart rate variability well under the rolling baseline
fn low_hrv(ctx: &RuleContext<'_>) -> Option<InsightCandidate> {
    let t = ctx.thresholds();
    let today = ctx.today().hrv_ms.filter(|v| v.is_finite())?;
    let baseline = ctx.baseline(|s| s.hrv_ms)?;
    if baseline <= 0.0 || today >= baseline * t.hrv_drop_ratio {
        return None;
    }

    let drop_pct = (baseline - today) / baseline * 100.0;
    Some(
        Draft {
            id: LOW_HRV,
            tier: Tier::Moderate,
            category: AlertType::Stress,
            title: "Your recovery signal is low today".to_string(),
            body: format!(
                "Your HRV is {:.0} ms today, {:.0}% below your usual {:.0} ms. \
                 Short sleep and stress both pull HRV down; keep today's training light.",
                today, drop_pct, baseline
            ),
            source: (
                "Cleveland Clinic",
                "https://my.clevelandclinic.org/health/symptoms/21773-heart-rate-variability-hrv",
            ),
            data_note: format!("Today's HRV vs. your {}-day average.", t.baseline_window),
        }
        .build(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuleThresholds;
    use crate::rules::fixtures::nights;

    #[test]
    fn test_latency_fires_on_two_long_nights() {
        let mut history = nights(3, 360.0);
        history[0].time_in_bed_minutes = Some(400.0);
        history[1].time_in_bed_minutes = Some(365.0);
        history[2].time_in_bed_minutes = Some(390.0);
        let thresholds = RuleThresholds::default();
        let ctx = RuleContext::new(&history, &thresholds).unwrap();

        let candidate = sleep_latency(&ctx).unwrap();
        assert_eq!(candidate.id, SLEEP_LATENCY);
        assert_eq!(candidate.tier, Tier::Moderate);
        assert!(candidate.body.starts_with("On 2 of your last 3 nights"));
    }

    #[test]
    fn test_latency_needs_two_usable_nights() {
        let mut history = nights(3, 360.0);
        history[2].time_in_bed_minutes = Some(480.0);
        let thresholds = RuleThresholds::default();
        let ctx = RuleContext::new(&history, &thresholds).unwrap();

        assert!(sleep_latency(&ctx).is_none());
    }

    #[test]
    fn test_latency_only_one_long_night() {
        let mut history = nights(3, 360.0);
        history[0].time_in_bed_minutes = Some(370.0);
        history[1].time_in_bed_minutes = Some(370.0);
        history[2].time_in_bed_minutes = Some(420.0);
        let thresholds = RuleThresholds::default();
        let ctx = RuleContext::new(&history, &thresholds).unwrap();

        assert!(sleep_latency(&ctx).is_none());
    }

    #[test]
    fn test_latency_ignores_nights_outside_window() {
        let mut history = nights(5, 360.0);
        history[0].time_in_bed_minutes = Some(420.0);
        history[1].time_in_bed_minutes = Some(420.0);
        history[4].time_in_bed_minutes = Some(420.0);
        let thresholds = RuleThresholds::default();
        let ctx = RuleContext::new(&history, &thresholds).unwrap();

        assert!(sleep_latency(&ctx).is_none());
    }

    #[test]
    fn test_low_hrv() {
        let mut history = nights(30, 360.0);
        for s in &mut history {
            s.hrv_ms = Some(60.0);
        }
        history[29].hrv_ms = Some(40.0);
        let thresholds = RuleThresholds::default();
        let ctx = RuleContext::new(&history, &thresholds).unwrap();

        let candidate = low_hrv(&ctx).unwrap();
        assert_eq!(candidate.id, LOW_HRV);
        assert_eq!(candidate.category, AlertType::Stress);
    }

    #[test]
    fn test_hrv_near_baseline_does_not_fire() {
        let mut history = nights(30, 360.0);
        for s in &mut history {
            s.hrv_ms = Some(60.0);
        }
        history[29].hrv_ms = Some(50.0);
        let thresholds = RuleThresholds::default();
        let ctx = RuleContext::new(&history, &thresholds).unwrap();

        assert!(low_hrv(&ctx).is_none());
    }

    #[test]
    fn test_hrv_at_drop_ratio_does_not_fire() {
        let mut history = nights(2, 360.0);
        history[0].hrv_ms = Some(60.0);
        history[1].hrv_ms = Some(40.0);
        let thresholds = RuleThresholds::default();
        let ctx = RuleContext::new(&history, &thresholds).unwrap();

        // baseline 50 ms, today exactly 80% of it
        assert_eq!(ctx.baseline(|s| s.hrv_ms), Some(50.0));
        assert!(low_hrv(&ctx).is_none());

        history[1].hrv_ms = Some(39.0);
        let ctx = RuleContext::new(&history, &thresholds).unwrap();
        assert!(low_hrv(&ctx).is_some());
    }
}
