//! Tier classification
//!
//! The latest night's sleep duration selects exactly one rule tier. Adequate
//! or unmeasured sleep selects none, which short-circuits evaluation.

use crate::config::TierBoundaries;
use crate::types::Tier;

/// Maps the primary metric (sleep minutes) to the active tier
pub struct TierClassifier;

impl TierClassifier {
    /// Classify with the default boundaries
    pub fn classify(sleep_minutes: Option<f64>) -> Option<Tier> {
        Self::classify_with(sleep_minutes, &TierBoundaries::default())
    }

    pub fn classify_with(sleep_minutes: Option<f64>, bounds: &TierBoundaries) -> Option<Tier> {
        let minutes = sleep_minutes.filter(|m| m.is_finite())?;

        if minutes < bounds.critical_below_minutes {
            Some(Tier::Critical)
        } else if minutes < bounds.moderate_below_minutes {
            Some(Tier::Moderate)
        } else if minutes < bounds.mild_below_minutes {
            Some(Tier::Mild)
        } else {
            None
        }
    }
}
