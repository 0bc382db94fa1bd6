//! Tier 3 rules (slightly short sleep)

use super::{Draft, RuleContext};
use crate::types::{AlertType, HealthSnapshot, InsightCandidate, Tier};

pub const LOW_DEEP: &str = "tier3_low_deep";
pub const LOW_REM: &str = "tier3_low_rem";
pub const FREQUENT_AWAKENINGS: &str = "tier3_frequent_awakenings";

pub(super) fn evaluate(ctx: &RuleContext<'_>) -> Vec<InsightCandidate> {
    [low_deep(ctx), low_rem(ctx), frequent_awakenings(ctx)]
        .into_iter()
        .flatten()
        .collect()
}

/// Count nights whose stage share of total sleep is under `min_share`.
/// Nights with unknown or zero sleep, or an unknown stage, are not counted.
fn low_share_nights(
    window: &[HealthSnapshot],
    stage: impl Fn(&HealthSnapshot) -> Option<f64>,
    min_share: f64,
) -> usize {
    window
        .iter()
        .filter(|s| match (s.sleep_minutes, stage(s)) {
            (Some(total), Some(stage_min)) if total > 0.0 => stage_min / total < min_share,
            _ => false,
        })
        .count()
}

fn low_deep(ctx: &RuleContext<'_>) -> Option<InsightCandidate> {
    let t = ctx.thresholds();
    let window = ctx.last(t.stage_window);
    let flagged = low_share_nights(window, |s| s.sleep_deep_minutes, t.deep_share_min);
    if flagged < t.stage_min_nights {
        return None;
    }

    Some(
        Draft {
            id: LOW_DEEP,
            tier: Tier::Mild,
            category: AlertType::SleepHealth,
            title: "Light on deep sleep lately".to_string(),
            body: format!(
                "Deep sleep made up less than {:.0}% of your night on {} of the last {} nights. \
                 A cool, dark room and skipping late alcohol tend to help.",
                t.deep_share_min * 100.0,
                flagged,
                window.len()
            ),
            source: ("Sleep Foundation", "https://www.sleepfoundation.org/stages-of-sleep"),
            data_note: "Deep sleep minutes as a share of total sleep.".to_string(),
        }
        .build(),
    )
}

fn low_rem(ctx: &RuleContext<'_>) -> Option<InsightCandidate> {
    let t = ctx.thresholds();
    let window = ctx.last(t.stage_window);
    let flagged = low_share_nights(window, |s| s.sleep_rem_minutes, t.rem_share_min);
    if flagged < t.stage_min_nights {
        return None;
    }

    Some(
        Draft {
            id: LOW_REM,
            tier: Tier::Mild,
            category: AlertType::SleepHealth,
            title: "Your REM sleep has been short".to_string(),
            body: format!(
                "REM sleep made up less than {:.0}% of your night on {} of the last {} nights. \
                 Most REM comes late in the night, so an extra 30 minutes in bed helps most.",
                t.rem_share_min * 100.0,
                flagged,
                window.len()
            ),
            source: ("Sleep Foundation", "https://www.sleepfoundation.org/stages-of-sleep"),
            data_note: "REM sleep minutes as a share of total sleep.".to_string(),
        }
        .build(),
    )
}

fn frequent_awakenings(ctx: &RuleContext<'_>) -> Option<InsightCandidate> {
    let t = ctx.thresholds();
    let count = ctx.today().awakenings_count?;
    if count <= t.awakenings_threshold {
        return None;
    }

    let (title, body) = if count >= t.awakenings_severe {
        (
            "Your sleep was heavily broken up".to_string(),
            format!(
                "You woke up {count} times last night. Frequent waking can come from noise, \
                 light, caffeine or breathing issues; if this keeps happening, consider \
                 talking to a doctor."
            ),
        )
    } else {
        (
            "You woke up a few times last night".to_string(),
            format!(
                "You woke up {count} times last night. Keeping the room quiet and dark and \
                 limiting fluids before bed can help you stay asleep."
            ),
        )
    };

    Some(
        Draft {
            id: FREQUENT_AWAKENINGS,
            tier: Tier::Mild,
            category: AlertType::SleepHealth,
            title,
            body,
            source: ("American Academy of Sleep Medicine", "https://sleepeducation.org/"),
            data_note: "Awakenings recorded for last night's sleep.".to_string(),
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
    fn test_low_deep_two_of_three() {
        let mut history = nights(3, 420.0);
        history[0].sleep_deep_minutes = Some(50.0); // 11.9%
        history[1].sleep_deep_minutes = Some(90.0); // 21.4%
        history[2].sleep_deep_minutes = Some(42.0); // 10%
        let thresholds = RuleThresholds::default();
        let ctx = RuleContext::new(&history, &thresholds).unwrap();

        let candidates = evaluate(&ctx);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].id, LOW_DEEP);
        assert_eq!(candidates[0].tier, Tier::Mild);
    }

    #[test]
    fn test_low_deep_ignores_unknown_stages() {
        let mut history = nights(3, 420.0);
        history[2].sleep_deep_minutes = Some(20.0);
        let thresholds = RuleThresholds::default();
        let ctx = RuleContext::new(&history, &thresholds).unwrap();

        assert!(low_deep(&ctx).is_none());
    }

    #[test]
    fn test_zero_sleep_night_is_not_flagged() {
        let mut history = nights(3, 420.0);
        history[0].sleep_minutes = Some(0.0);
        history[0].sleep_rem_minutes = Some(0.0);
        history[1].sleep_rem_minutes = Some(30.0);
        history[2].sleep_rem_minutes = Some(100.0);
        let thresholds = RuleThresholds::default();
        let ctx = RuleContext::new(&history, &thresholds).unwrap();

        assert!(low_rem(&ctx).is_none());
    }

    #[test]
    fn test_low_rem() {
        let mut history = nights(3, 400.0);
        for s in &mut history {
            s.sleep_rem_minutes = Some(60.0); // 15%
        }
        let thresholds = RuleThresholds::default();
        let ctx = RuleContext::new(&history, &thresholds).unwrap();

        assert_eq!(low_rem(&ctx).unwrap().id, LOW_REM);
    }

    #[test]
    fn test_stage_shares_at_threshold_are_not_flagged() {
        let mut history = nights(3, 400.0);
        for s in &mut history {
            s.sleep_deep_minutes = Some(60.0); // 15%
            s.sleep_rem_minutes = Some(72.0); // 18%
        }
        let thresholds = RuleThresholds::default();
        let ctx = RuleContext::new(&history, &thresholds).unwrap();

        assert!(low_deep(&ctx).is_none());
        assert!(low_rem(&ctx).is_none());
    }

    #[test]
    fn test_awakenings_threshold_and_escalation() {
        let thresholds = RuleThresholds::default();

        let mut history = nights(1, 420.0);
        history[0].awakenings_count = Some(3);
        let ctx = RuleContext::new(&history, &thresholds).unwrap();
        assert!(frequent_awakenings(&ctx).is_none());

        history[0].awakenings_count = Some(4);
        let ctx = RuleContext::new(&history, &thresholds).unwrap();
        let mild = frequent_awakenings(&ctx).unwrap();
        assert_eq!(mild.title, "You woke up a few times last night");
        assert_eq!(mild.tier, Tier::Mild);

        history[0].awakenings_count = Some(6);
        let ctx = RuleContext::new(&history, &thresholds).unwrap();
        let severe = frequent_awakenings(&ctx).unwrap();
        assert_eq!(severe.title, "Your sleep was heavily broken up");
        assert_eq!(severe.tier, Tier::Mild);
        assert_eq!(severe.id, FREQUENT_AWAKENINGS);
    }
}
