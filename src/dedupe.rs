//! Dedup and rate-limit gate
//!
//! At most one candidate passes per evaluation. A dedupe key that fired on
//! day D stays blocked until its category's minimum gap (whole calendar
//! days) has elapsed. The last-sent map is persisted as a single JSON object
//! `{ "<dedupe key>": "YYYY-MM-DD" }`.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::InsightError;
use crate::storage::{update_value, KeyValueStore};
use crate::types::{AlertType, InsightCandidate};

/// Storage key holding the last-sent map
pub const LAST_SENT_STORAGE_KEY: &str = "insight_last_sent";

/// Gap applied to categories missing from the policy table
pub const DEFAULT_GAP_DAYS: u32 = 1;

/// Minimum days between deliveries, per alert category
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GapPolicy {
    pub min_gap_days: BTreeMap<AlertType, u32>,
    pub default_gap_days: u32,
}

impl Default for GapPolicy {
    fn default() -> Self {
        let min_gap_days = BTreeMap::from([
            (AlertType::Steps, 1),
            (AlertType::AirQuality, 2),
            (AlertType::Weather, 1),
            (AlertType::Traffic, 2),
            (AlertType::Dengue, 3),
            (AlertType::Hydration, 1),
            (AlertType::Stress, 1),
            (AlertType::System, 1),
            (AlertType::SleepHealth, 1),
        ]);
        Self {
            min_gap_days,
            default_gap_days: DEFAULT_GAP_DAYS,
        }
    }
}

impl GapPolicy {
    pub fn gap_for(&self, category: AlertType) -> u32 {
        self.min_gap_days
            .get(&category)
            .copied()
            .unwrap_or(self.default_gap_days)
    }
}

/// Last delivery day per dedupe key
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LastSentMap(BTreeMap<String, NaiveDate>);

impl LastSentMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<NaiveDate> {
        self.0.get(key).copied()
    }

    pub fn record(&mut self, key: &str, day: NaiveDate) {
        self.0.insert(key.to_string(), day);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, NaiveDate)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// Whether `key` may fire on `today` given a minimum gap
    pub fn is_eligible(&self, key: &str, gap_days: u32, today: NaiveDate) -> bool {
        match self.get(key) {
            None => true,
            Some(last) => (today - last).num_days() >= i64::from(gap_days),
        }
    }

    pub fn from_json(json: &str) -> Result<Self, InsightError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> Result<String, InsightError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Whether `candidate` is outside its category's gap on `today`
fn gap_elapsed(
    candidate: &InsightCandidate,
    last_sent: &LastSentMap,
    policy: &GapPolicy,
    today: NaiveDate,
) -> bool {
    let gap = policy.gap_for(candidate.category);
    let eligible = last_sent.is_eligible(&candidate.id, gap, today);
    if !eligible {
        debug!(
            dedupe_key = %candidate.id,
            last_sent = ?last_sent.get(&candidate.id),
            gap_days = gap,
            "candidate within gap, suppressed"
        );
    }
    eligible
}

/// First candidate in rank order whose key is outside its gap
pub fn select_candidate<'a>(
    ranked: &'a [InsightCandidate],
    last_sent: &LastSentMap,
    policy: &GapPolicy,
    today: NaiveDate,
) -> Option<&'a InsightCandidate> {
    ranked
        .iter()
        .find(|c| gap_elapsed(c, last_sent, policy, today))
}

/// Persistent last-sent state with per-key compare-and-set
#[async_trait]
pub trait LastSentStore: Send + Sync {
    async fn load(&self) -> Result<LastSentMap, InsightError>;

    /// Record `sent_on` for `key` only if its current value equals `expected`.
    /// Returns false when another writer got there first.
    async fn compare_and_set(
        &self,
        key: &str,
        expected: Option<NaiveDate>,
        sent_on: NaiveDate,
    ) -> Result<bool, InsightError>;

    /// Clear all entries
    async fn reset(&self) -> Result<(), InsightError>;
}

/// Last-sent map stored as one JSON value in a key-value store.
///
/// Updates go through the store's compare-and-swap, so handles in other
/// tasks or processes sharing the same backing store never both win.
pub struct KvLastSentStore {
    kv: Arc<dyn KeyValueStore>,
    key: String,
}

impl KvLastSentStore {
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self::with_key(kv, LAST_SENT_STORAGE_KEY)
    }

    pub fn with_key(kv: Arc<dyn KeyValueStore>, key: &str) -> Self {
        Self {
            kv,
            key: key.to_string(),
        }
    }
}

fn parse_last_sent(raw: Option<&str>) -> Result<LastSentMap, InsightError> {
    match raw {
        Some(json) if !json.trim().is_empty() => LastSentMap::from_json(json),
        _ => Ok(LastSentMap::new()),
    }
}

#[async_trait]
impl LastSentStore for KvLastSentStore {
    async fn load(&self) -> Result<LastSentMap, InsightError> {
        parse_last_sent(self.kv.get(&self.key).await?.as_deref())
    }

    async fn compare_and_set(
        &self,
        key: &str,
        expected: Option<NaiveDate>,
        sent_on: NaiveDate,
    ) -> Result<bool, InsightError> {
        let updated = update_value(self.kv.as_ref(), &self.key, |raw| {
            let mut map = parse_last_sent(raw)?;
            if map.get(key) != expected {
                return Ok(None);
            }
            map.record(key, sent_on);
            Ok(Some((map.to_json()?, ())))
        })
        .await?;
        Ok(updated.is_some())
    }

    async fn reset(&self) -> Result<(), InsightError> {
        self.kv.remove(&self.key).await
    }
}

/// Admits at most one ranked candidate per call and records its send day
pub struct DedupeGate {
    store: Arc<dyn LastSentStore>,
    policy: GapPolicy,
}

impl DedupeGate {
    pub fn new(store: Arc<dyn LastSentStore>, policy: GapPolicy) -> Self {
        Self { store, policy }
    }

    pub fn policy(&self) -> &GapPolicy {
        &self.policy
    }

    /// Walk `ranked` in order and accept the first eligible candidate.
    ///
    /// A candidate whose compare-and-set loses to a concurrent writer is
    /// skipped, since that writer has just delivered the same key.
    pub async fn admit(
        &self,
        ranked: &[InsightCandidate],
        today: NaiveDate,
    ) -> Result<Option<InsightCandidate>, InsightError> {
        let last_sent = self.store.load().await?;

        for candidate in ranked
            .iter()
            .filter(|c| gap_elapsed(c, &last_sent, &self.policy, today))
        {
            let expected = last_sent.get(&candidate.id);
            if self
                .store
                .compare_and_set(&candidate.id, expected, today)
                .await?
            {
                info!(dedupe_key = %candidate.id, tier = candidate.tier.level(), "candidate accepted");
                return Ok(Some(candidate.clone()));
            }
            debug!(dedupe_key = %candidate.id, "lost last-sent race, skipping");
        }

        Ok(None)
    }
}
