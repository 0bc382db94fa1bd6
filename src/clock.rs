//! Time reference
//!
//! All calendar-day keys (freshness guard, rule windows, last-sent dates) are
//! derived from one `DayReference` so they agree around midnight.

use chrono::{DateTime, FixedOffset, NaiveDate, Offset, Utc};

use crate::error::InsightError;

/// Source of the current instant
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock pinned to one instant
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

/// Maps instants to calendar days in a fixed UTC offset
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DayReference {
    offset: FixedOffset,
}

impl Default for DayReference {
    fn default() -> Self {
        Self::utc()
    }
}

impl DayReference {
    pub fn utc() -> Self {
        Self {
            offset: Utc.fix(),
        }
    }

    /// Build from an offset in minutes east of UTC
    pub fn from_offset_minutes(minutes: i32) -> Result<Self, InsightError> {
        FixedOffset::east_opt(minutes * 60)
            .map(|offset| Self { offset })
            .ok_or_else(|| {
                InsightError::InvalidConfig(format!("utc offset out of range: {minutes} minutes"))
            })
    }

    /// Calendar day containing `instant`
    pub fn day_of(&self, instant: DateTime<Utc>) -> NaiveDate {
        instant.with_timezone(&self.offset).date_naive()
    }

    /// Parse a `YYYY-MM-DD` day key
    pub fn parse_day_key(key: &str) -> Result<NaiveDate, InsightError> {
        NaiveDate::parse_from_str(key, "%Y-%m-%d")
            .map_err(|e| InsightError::DateParseError(format!("'{key}': {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_day_of_respects_offset() {
        let instant = Utc.with_ymd_and_hms(2024, 3, 10, 22, 30, 0).unwrap();

        assert_eq!(
            DayReference::utc().day_of(instant),
            NaiveDate::from_ymd_opt(2024, 3, 10).unwrap()
        );
        // UTC+8 is already past midnight
        let singapore = DayReference::from_offset_minutes(480).unwrap();
        assert_eq!(
            singapore.day_of(instant),
            NaiveDate::from_ymd_opt(2024, 3, 11).unwrap()
        );
    }

    #[test]
    fn test_rejects_out_of_range_offset() {
        assert!(DayReference::from_offset_minutes(24 * 60).is_err());
    }

    #[test]
    fn test_parse_day_key() {
        let day = NaiveDate::from_ymd_opt(2024, 1, 5).unwrap();
        assert_eq!(DayReference::parse_day_key("2024-01-05").unwrap(), day);
        assert!(DayReference::parse_day_key("05/01/2024").is_err());
    }

    #[test]
    fn test_fixed_clock() {
        let instant = Utc.with_ymd_and_hms(2024, 3, 10, 8, 0, 0).unwrap();
        assert_eq!(FixedClock(instant).now(), instant);
    }
}
