//! Core types for the Synheart Nudge engine
//!
//! This module defines the data structures that flow through each stage of the
//! engine: daily health snapshots, the history window, insight candidates and
//! the durable alert records produced on dispatch.

use chrono::{DateTime, NaiveDate, NaiveTime, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::error::InsightError;

/// Severity tier assigned to a candidate (1 = most urgent)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum Tier {
    Critical,
    Moderate,
    Mild,
}

impl Tier {
    /// Numeric level (1, 2 or 3)
    pub fn level(self) -> u8 {
        match self {
            Tier::Critical => 1,
            Tier::Moderate => 2,
            Tier::Mild => 3,
        }
    }

    /// Severity carried by alerts created from a candidate of this tier
    pub fn severity(self) -> Severity {
        match self {
            Tier::Critical => Severity::High,
            Tier::Moderate => Severity::Medium,
            Tier::Mild => Severity::Low,
        }
    }
}

impl From<Tier> for u8 {
    fn from(tier: Tier) -> Self {
        tier.level()
    }
}

impl TryFrom<u8> for Tier {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Tier::Critical),
            2 => Ok(Tier::Moderate),
            3 => Ok(Tier::Mild),
            other => Err(format!("tier must be 1, 2 or 3, got {other}")),
        }
    }
}

/// Coarse alert category, used by the gap policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    Steps,
    AirQuality,
    Weather,
    Traffic,
    Dengue,
    Hydration,
    Stress,
    System,
    SleepHealth,
}

impl AlertType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertType::Steps => "steps",
            AlertType::AirQuality => "air_quality",
            AlertType::Weather => "weather",
            AlertType::Traffic => "traffic",
            AlertType::Dengue => "dengue",
            AlertType::Hydration => "hydration",
            AlertType::Stress => "stress",
            AlertType::System => "system",
            AlertType::SleepHealth => "sleep_health",
        }
    }
}

/// Alert severity shown to the user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

/// Attribution for the guidance behind an insight
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceAttribution {
    pub name: String,
    pub url: String,
}

impl SourceAttribution {
    pub fn new(name: &str, url: &str) -> Self {
        Self {
            name: name.to_string(),
            url: url.to_string(),
        }
    }
}

/// One calendar day of health measurements.
///
/// Every metric is optional: an absent value means unknown and is never
/// treated as zero unless a rule says so explicitly.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HealthSnapshot {
    /// Calendar day this record describes
    pub date: NaiveDate,
    /// Total sleep (minutes)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sleep_minutes: Option<f64>,
    /// Local time the main sleep started
    #[serde(
        default,
        with = "time_of_day",
        skip_serializing_if = "Option::is_none"
    )]
    pub sleep_start: Option<NaiveTime>,
    /// Resting heart rate (bpm)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resting_heart_rate_bpm: Option<f64>,
    /// Heart rate variability (ms)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hrv_ms: Option<f64>,
    /// Step count
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub steps: Option<u32>,
    /// Time in bed (minutes)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_in_bed_minutes: Option<f64>,
    /// Deep sleep (minutes)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sleep_deep_minutes: Option<f64>,
    /// REM sleep (minutes)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sleep_rem_minutes: Option<f64>,
    /// Number of awakenings during the main sleep
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub awakenings_count: Option<u32>,
}

impl HealthSnapshot {
    /// Create an empty snapshot for a day
    pub fn new(date: NaiveDate) -> Self {
        Self {
            date,
            ..Default::default()
        }
    }

    /// Bedtime as minutes since local midnight
    pub fn sleep_start_minutes(&self) -> Option<f64> {
        self.sleep_start
            .map(|t| f64::from(t.hour() * 60 + t.minute()) + f64::from(t.second()) / 60.0)
    }
}

/// Ordered-by-date sequence of snapshots, oldest first, one per date.
///
/// Days may be missing; nothing is synthesized for gaps.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "Vec<HealthSnapshot>", into = "Vec<HealthSnapshot>")]
pub struct HealthHistory {
    snapshots: Vec<HealthSnapshot>,
}

impl HealthHistory {
    /// Build a history, sorting by date. When a date repeats the later entry wins.
    pub fn new(mut snapshots: Vec<HealthSnapshot>) -> Self {
        snapshots.sort_by_key(|s| s.date);

        let mut deduped: Vec<HealthSnapshot> = Vec::with_capacity(snapshots.len());
        for snapshot in snapshots {
            match deduped.last_mut() {
                Some(last) if last.date == snapshot.date => *last = snapshot,
                _ => deduped.push(snapshot),
            }
        }

        Self { snapshots: deduped }
    }

    pub fn snapshots(&self) -> &[HealthSnapshot] {
        &self.snapshots
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    /// Most recent snapshot
    pub fn latest(&self) -> Option<&HealthSnapshot> {
        self.snapshots.last()
    }

    /// History restricted to snapshots dated on or before `day`
    pub fn up_to(&self, day: NaiveDate) -> HealthHistory {
        Self {
            snapshots: self
                .snapshots
                .iter()
                .filter(|s| s.date <= day)
                .cloned()
                .collect(),
        }
    }

    /// Parse a JSON array of snapshots
    pub fn from_json(json: &str) -> Result<Self, InsightError> {
        let snapshots: Vec<HealthSnapshot> = serde_json::from_str(json)?;
        Ok(Self::new(snapshots))
    }

    pub fn to_json(&self) -> Result<String, InsightError> {
        Ok(serde_json::to_string(&self.snapshots)?)
    }
}

impl From<Vec<HealthSnapshot>> for HealthHistory {
    fn from(snapshots: Vec<HealthSnapshot>) -> Self {
        Self::new(snapshots)
    }
}

impl From<HealthHistory> for Vec<HealthSnapshot> {
    fn from(history: HealthHistory) -> Self {
        history.snapshots
    }
}

/// An insight proposed by a rule during one evaluation.
///
/// `id` identifies the rule, not the instance: it is the dedupe key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsightCandidate {
    pub id: String,
    pub tier: Tier,
    pub category: AlertType,
    pub title: String,
    pub body: String,
    pub source: SourceAttribution,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_note: Option<String>,
}

/// Durable alert record created when a candidate is accepted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertItem {
    /// Globally unique instance id
    pub id: String,
    #[serde(rename = "type")]
    pub alert_type: AlertType,
    pub created_at: DateTime<Utc>,
    pub title: String,
    pub short_body: String,
    pub long_body: String,
    pub source_name: String,
    pub source_url: String,
    pub tier: Tier,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_note: Option<String>,
    pub severity: Severity,
    #[serde(default)]
    pub dismissed: bool,
    /// Id of the originating candidate
    pub dedupe_key: String,
}

/// Serde helpers for `Option<NaiveTime>` accepting `HH:MM` or `HH:MM:SS`
mod time_of_day {
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &Option<NaiveTime>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(time) => serializer.serialize_str(&time.format("%H:%M:%S").to_string()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<NaiveTime>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw: Option<String> = Option::deserialize(deserializer)?;
        match raw {
            None => Ok(None),
            Some(s) => NaiveTime::parse_from_str(&s, "%H:%M:%S")
                .or_else(|_| NaiveTime::parse_from_str(&s, "%H:%M"))
                .map(Some)
                .map_err(|e| serde::de::Error::custom(format!("invalid time '{s}': {e}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, d).unwrap()
    }

    #[test]
    fn test_history_sorts_and_dedupes() {
        let mut late = HealthSnapshot::new(day(2));
        late.steps = Some(9000);
        let history = HealthHistory::new(vec![
            HealthSnapshot::new(day(3)),
            HealthSnapshot::new(day(2)),
            late,
            HealthSnapshot::new(day(1)),
        ]);

        let dates: Vec<NaiveDate> = history.snapshots().iter().map(|s| s.date).collect();
        assert_eq!(dates, vec![day(1), day(2), day(3)]);
        assert_eq!(history.snapshots()[1].steps, Some(9000));
    }

    #[test]
    fn test_snapshot_json_accepts_short_times() {
        let json = r#"[
            {"date": "2024-03-01", "sleep_minutes": 410, "sleep_start": "23:40"},
            {"date": "2024-03-02", "sleep_start": "00:30:00", "steps": 3200}
        ]"#;
        let history = HealthHistory::from_json(json).unwrap();

        assert_eq!(history.len(), 2);
        assert_eq!(history.snapshots()[0].sleep_start_minutes(), Some(1420.0));
        assert_eq!(history.snapshots()[1].sleep_start_minutes(), Some(30.0));
        assert_eq!(history.snapshots()[1].sleep_minutes, None);
    }

    #[test]
    fn test_up_to_excludes_future_days() {
        let history = HealthHistory::new(vec![
            HealthSnapshot::new(day(1)),
            HealthSnapshot::new(day(2)),
            HealthSnapshot::new(day(3)),
        ]);
        let trimmed = history.up_to(day(2));
        assert_eq!(trimmed.latest().map(|s| s.date), Some(day(2)));
    }

    #[test]
    fn test_tier_serializes_as_number() {
        let json = serde_json::to_string(&Tier::Moderate).unwrap();
        assert_eq!(json, "2");
        let parsed: Tier = serde_json::from_str("1").unwrap();
        assert_eq!(parsed, Tier::Critical);
        assert!(serde_json::from_str::<Tier>("4").is_err());
    }

    #[test]
    fn test_alert_type_names() {
        let json = serde_json::to_string(&AlertType::SleepHealth).unwrap();
        assert_eq!(json, "\"sleep_health\"");
        assert_eq!(AlertType::AirQuality.as_str(), "air_quality");
    }
}
