//! Tier 1 rules (critically short sleep)

use super::{format_minutes, Draft, RuleContext};
use crate::stats;
use crate::types::{AlertType, InsightCandidate, Tier};

pub const BEDTIME_VARIABILITY: &str = "tier1_bedtime_variability";
pub const ELEVATED_RHR: &str = "tier1_elevated_rhr";
pub const LOW_ACTIVITY: &str = "tier1_low_activity";

pub(super) fn evaluate(ctx: &RuleContext<'_>) -> Vec<InsightCandidate> {
    [
        bedtime_variability(ctx),
        elevated_resting_hr(ctx),
        low_activity(ctx),
    ]
    .into_iter()
    .flatten()
    .collect()
}

/// Irregular bedtimes across the recent week
fn bedtime_variability(ctx: &RuleContext<'_>) -> Option<InsightCandidate> {
    let t = ctx.thresholds();
    let bedtimes: Vec<f64> = ctx
        .last(t.bedtime_window)
        .iter()
        .filter_map(|s| s.sleep_start_minutes())
        .collect();

    if bedtimes.len() < t.bedtime_min_samples {
        return None;
    }
    let spread = stats::std_dev(&bedtimes)?;
    if spread <= t.bedtime_std_dev_minutes {
        return None;
    }

    let today_sleep = ctx.today().sleep_minutes.unwrap_or(0.0);
    Some(
        Draft {
            id: BEDTIME_VARIABILITY,
            tier: Tier::Critical,
            category: AlertType::SleepHealth,
            title: "Your bedtime has been all over the place".to_string(),
            body: format!(
                "You slept {} last night and your bedtime has shifted by about {} minutes \
                 night to night this week. Going to bed at a steady time is one of the \
                 fastest ways to recover from short sleep.",
                format_minutes(today_sleep),
                spread.round()
            ),
            source: ("National Sleep Foundation", "https://www.thensf.org/"),
            data_note: format!(
                "Bedtimes from {} of your last {} nights (std dev {:.0} min).",
                bedtimes.len(),
                t.bedtime_window,
                spread
            ),
        }
        .build(),
    )
}

/// Resting heart rate well above the rolling baseline
fn elevated_resting_hr(ctx: &RuleContext<'_>) -> Option<InsightCandidate> {
    let t = ctx.thresholds();
    let today = ctx.today().resting_heart_rate_bpm.filter(|v| v.is_finite())?;
    let baseline = ctx.baseline(|s| s.resting_heart_rate_bpm)?;
    if baseline <= 0.0 || today <= baseline * (1.0 + t.rhr_elevation_ratio) {
        return None;
    }

    let rise_pct = (today - baseline) / baseline * 100.0;
    Some(
        Draft {
            id: ELEVATED_RHR,
            tier: Tier::Critical,
            category: AlertType::Stress,
            title: "Your resting heart rate is running high".to_string(),
            body: format!(
                "Your resting heart rate today is {:.0} bpm, {:.0}% above your usual {:.0} bpm. \
                 Together with very little sleep this suggests your body is under strain. \
                 Consider an easier day and an early night.",
                today, rise_pct, baseline
            ),
            source: ("American Heart Association", "https://www.heart.org/"),
            data_note: format!(
                "Today's resting heart rate vs. your {}-day average.",
                t.baseline_window
            ),
        }
        .build(),
    )
}

/// Very low step count across the last few days (missing days count as zero)
fn low_activity(ctx: &RuleContext<'_>) -> Option<InsightCandidate> {
    let t = ctx.thresholds();
    let steps: Vec<f64> = ctx
        .last(t.activity_window)
        .iter()
        .map(|s| f64::from(s.steps.unwrap_or(0)))
        .collect();
    let avg_steps = stats::average(&steps)?;
    if avg_steps >= t.low_steps {
        return None;
    }

    Some(
        Draft {
            id: LOW_ACTIVITY,
            tier: Tier::Critical,
            category: AlertType::Steps,
            title: "A short walk could help you sleep".to_string(),
            body: format!(
                "You've averaged about {:.0} steps a day recently. Light daytime movement, \
                 especially outdoors in the morning, helps reset your sleep drive.",
                avg_steps
            ),
            source: (
                "World Health Organization",
                "https://www.who.int/news-room/fact-sheets/detail/physical-activity",
            ),
            data_note: format!(
                "Average daily steps over your last {} days.",
                steps.len()
            ),
        }
        .build(),
    )
}
