//! Engine configuration
//!
//! Every threshold the engine applies lives here so hosts can tune the rule
//! set without rebuilding. Each section defaults independently, which lets a
//! JSON override name only the values it changes.

use serde::{Deserialize, Serialize};

use crate::dedupe::GapPolicy;
use crate::error::InsightError;

/// Default maximum length of an alert's short body (characters)
pub const DEFAULT_SHORT_BODY_MAX_CHARS: usize = 120;

/// Sleep-duration boundaries (minutes) selecting the active tier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TierBoundaries {
    /// Below this: tier 1
    pub critical_below_minutes: f64,
    /// Below this: tier 2
    pub moderate_below_minutes: f64,
    /// Below this: tier 3; at or above: no insight
    pub mild_below_minutes: f64,
}

impl Default for TierBoundaries {
    fn default() -> Self {
        Self {
            critical_below_minutes: 300.0,
            moderate_below_minutes: 390.0,
            mild_below_minutes: 450.0,
        }
    }
}

/// Thresholds and windows for the tiered health rules
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleThresholds {
    pub bedtime_window: usize,
    pub bedtime_min_samples: usize,
    pub bedtime_std_dev_minutes: f64,

    /// Days averaged for RHR and HRV baselines
    pub baseline_window: usize,
    /// Fractional rise over the RHR baseline that counts as elevated
    pub rhr_elevation_ratio: f64,

    pub activity_window: usize,
    pub low_steps: f64,

    pub latency_window: usize,
    pub latency_gap_minutes: f64,
    pub latency_min_nights: usize,

    /// Today's HRV below this fraction of baseline counts as low
    pub hrv_drop_ratio: f64,

    pub stage_window: usize,
    pub deep_share_min: f64,
    pub rem_share_min: f64,
    pub stage_min_nights: usize,

    /// Awakenings above this fire the rule
    pub awakenings_threshold: u32,
    /// Awakenings at or above this escalate the wording
    pub awakenings_severe: u32,
}

impl Default for RuleThresholds {
    fn default() -> Self {
        Self {
            bedtime_window: 7,
            bedtime_min_samples: 4,
            bedtime_std_dev_minutes: 90.0,
            baseline_window: 30,
            rhr_elevation_ratio: 0.10,
            activity_window: 3,
            low_steps: 4000.0,
            latency_window: 3,
            latency_gap_minutes: 30.0,
            latency_min_nights: 2,
            hrv_drop_ratio: 0.80,
            stage_window: 3,
            deep_share_min: 0.15,
            rem_share_min: 0.18,
            stage_min_nights: 2,
            awakenings_threshold: 3,
            awakenings_severe: 6,
        }
    }
}

/// Thresholds for environmental readings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvironmentThresholds {
    pub aqi_unhealthy: f64,
    pub aqi_sensitive: f64,
    pub uv_high: f64,
    pub heat_celsius: f64,
    pub congestion_factor: f64,
}

impl Default for EnvironmentThresholds {
    fn default() -> Self {
        Self {
            aqi_unhealthy: 151.0,
            aqi_sensitive: 101.0,
            uv_high: 6.0,
            heat_celsius: 30.0,
            congestion_factor: 0.6,
        }
    }
}

/// Full engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InsightConfig {
    pub tiers: TierBoundaries,
    pub rules: RuleThresholds,
    pub environment: EnvironmentThresholds,
    pub gap_policy: GapPolicy,
    /// Offset from UTC used for every calendar-day computation
    pub utc_offset_minutes: i32,
    pub short_body_max_chars: usize,
}

impl Default for InsightConfig {
    fn default() -> Self {
        Self {
            tiers: TierBoundaries::default(),
            rules: RuleThresholds::default(),
            environment: EnvironmentThresholds::default(),
            gap_policy: GapPolicy::default(),
            utc_offset_minutes: 0,
            short_body_max_chars: DEFAULT_SHORT_BODY_MAX_CHARS,
        }
    }
}

impl InsightConfig {
    /// Load and validate configuration from JSON
    pub fn from_json(json: &str) -> Result<Self, InsightError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize configuration to pretty JSON
    pub fn to_json(&self) -> Result<String, InsightError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Reject configurations the engine cannot apply consistently
    pub fn validate(&self) -> Result<(), InsightError> {
        let t = &self.tiers;
        if !(t.critical_below_minutes < t.moderate_below_minutes
            && t.moderate_below_minutes < t.mild_below_minutes)
        {
            return Err(InsightError::InvalidConfig(
                "tier boundaries must be strictly increasing".to_string(),
            ));
        }

        let r = &self.rules;
        let windows = [
            ("bedtime_window", r.bedtime_window),
            ("baseline_window", r.baseline_window),
            ("activity_window", r.activity_window),
            ("latency_window", r.latency_window),
            ("stage_window", r.stage_window),
        ];
        if let Some((name, _)) = windows.iter().find(|(_, size)| *size == 0) {
            return Err(InsightError::InvalidConfig(format!("{name} must be at least 1")));
        }
        if r.bedtime_min_samples < 2 {
            return Err(InsightError::InvalidConfig(
                "bedtime_min_samples must be at least 2".to_string(),
            ));
        }

        // chrono::FixedOffset accepts strictly less than one day
        if self.utc_offset_minutes.abs() >= 24 * 60 {
            return Err(InsightError::InvalidConfig(format!(
                "utc_offset_minutes out of range: {}",
                self.utc_offset_minutes
            )));
        }
        if self.short_body_max_chars == 0 {
            return Err(InsightError::InvalidConfig(
                "short_body_max_chars must be positive".to_string(),
            ));
        }

        let e = &self.environment;
        let thresholds = [
            ("aqi_unhealthy", e.aqi_unhealthy),
            ("aqi_sensitive", e.aqi_sensitive),
            ("uv_high", e.uv_high),
            ("heat_celsius", e.heat_celsius),
            ("congestion_factor", e.congestion_factor),
        ];
        if let Some((name, value)) = thresholds
            .iter()
            .find(|(_, value)| !value.is_finite() || *value < 0.0)
        {
            return Err(InsightError::InvalidConfig(format!(
                "{name} must be a non-negative number, got {value}"
            )));
        }
        if e.aqi_sensitive >= e.aqi_unhealthy {
            return Err(InsightError::InvalidConfig(
                "aqi_sensitive must be below aqi_unhealthy".to_string(),
            ));
        }

        Ok(())
    }
}
