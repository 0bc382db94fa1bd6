//! Alert dispatch
//!
//! An accepted candidate becomes an `AlertItem`, is persisted through the
//! alert store and, best effort, handed to the notification scheduler. A
//! scheduling failure never undoes or fails a persisted alert.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::DEFAULT_SHORT_BODY_MAX_CHARS;
use crate::error::InsightError;
use crate::storage::{update_value, KeyValueStore};
use crate::types::{AlertItem, InsightCandidate};

/// Storage key holding the alert list
pub const ALERTS_STORAGE_KEY: &str = "insight_alerts";

/// Durable alert storage
#[async_trait]
pub trait AlertStore: Send + Sync {
    async fn save(&self, alert: &AlertItem) -> Result<(), InsightError>;

    /// All stored alerts, oldest first
    async fn list(&self) -> Result<Vec<AlertItem>, InsightError>;

    /// Mark an alert dismissed; false when the id is unknown
    async fn dismiss(&self, id: &str) -> Result<bool, InsightError>;

    /// Drop alerts created before `cutoff`, returning how many were removed
    async fn purge_before(&self, cutoff: DateTime<Utc>) -> Result<usize, InsightError>;
}

/// Local notification delivery
#[async_trait]
pub trait NotificationScheduler: Send + Sync {
    async fn schedule(&self, alert: &AlertItem) -> Result<(), InsightError>;
}

/// Scheduler that only logs, for hosts without a notification transport
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotificationScheduler;

#[async_trait]
impl NotificationScheduler for LogNotificationScheduler {
    async fn schedule(&self, alert: &AlertItem) -> Result<(), InsightError> {
        info!(
            alert_id = %alert.id,
            alert_type = alert.alert_type.as_str(),
            title = %alert.title,
            "notification scheduled"
        );
        Ok(())
    }
}

/// Alert list stored as one JSON array in a key-value store.
///
/// Every mutation is a compare-and-swap of the whole list, so concurrent
/// writers on a shared store never drop each other's alerts.
pub struct KvAlertStore {
    kv: Arc<dyn KeyValueStore>,
    key: String,
}

impl KvAlertStore {
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self {
            kv,
            key: ALERTS_STORAGE_KEY.to_string(),
        }
    }

    /// Apply `edit` to the stored list; it returns `None` to skip the write
    async fn modify<T, F>(&self, mut edit: F) -> Result<Option<T>, InsightError>
    where
        T: Send,
        F: FnMut(&mut Vec<AlertItem>) -> Option<T> + Send,
    {
        update_value(self.kv.as_ref(), &self.key, |raw| {
            let mut alerts = parse_alerts(raw)?;
            match edit(&mut alerts) {
                Some(result) => Ok(Some((serde_json::to_string(&alerts)?, result))),
                None => Ok(None),
            }
        })
        .await
    }
}

fn parse_alerts(raw: Option<&str>) -> Result<Vec<AlertItem>, InsightError> {
    match raw {
        Some(json) if !json.trim().is_empty() => Ok(serde_json::from_str(json)?),
        _ => Ok(Vec::new()),
    }
}

#[async_trait]
impl AlertStore for KvAlertStore {
    async fn save(&self, alert: &AlertItem) -> Result<(), InsightError> {
        self.modify(|alerts| {
            alerts.push(alert.clone());
            Some(())
        })
        .await?;
        Ok(())
    }

    async fn list(&self) -> Result<Vec<AlertItem>, InsightError> {
        parse_alerts(self.kv.get(&self.key).await?.as_deref())
    }

    async fn dismiss(&self, id: &str) -> Result<bool, InsightError> {
        let dismissed = self
            .modify(|alerts| {
                let alert = alerts.iter_mut().find(|a| a.id == id)?;
                alert.dismissed = true;
                Some(())
            })
            .await?;
        Ok(dismissed.is_some())
    }

    async fn purge_before(&self, cutoff: DateTime<Utc>) -> Result<usize, InsightError> {
        let removed = self
            .modify(|alerts| {
                let before = alerts.len();
                alerts.retain(|a| a.created_at >= cutoff);
                let removed = before - alerts.len();
                (removed > 0).then_some(removed)
            })
            .await?;
        Ok(removed.unwrap_or(0))
    }
}

/// What happened to the local notification
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum NotificationStatus {
    Scheduled,
    /// No scheduler configured
    Skipped,
    Failed(String),
}

/// Outcome of a successful dispatch
#[derive(Debug, Clone)]
pub struct DispatchReceipt {
    pub alert: AlertItem,
    pub notification: NotificationStatus,
}

/// Persists accepted candidates and schedules their notifications
pub struct Dispatcher {
    alerts: Arc<dyn AlertStore>,
    scheduler: Option<Arc<dyn NotificationScheduler>>,
    short_body_max_chars: usize,
}

impl Dispatcher {
    pub fn new(alerts: Arc<dyn AlertStore>) -> Self {
        Self {
            alerts,
            scheduler: None,
            short_body_max_chars: DEFAULT_SHORT_BODY_MAX_CHARS,
        }
    }

    pub fn with_scheduler(mut self, scheduler: Arc<dyn NotificationScheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    pub fn with_short_body_max_chars(mut self, max_chars: usize) -> Self {
        self.short_body_max_chars = max_chars;
        self
    }

    /// Build the alert record for an accepted candidate
    pub fn build_alert(&self, candidate: &InsightCandidate, created_at: DateTime<Utc>) -> AlertItem {
        AlertItem {
            id: Uuid::new_v4().to_string(),
            alert_type: candidate.category,
            created_at,
            title: candidate.title.clone(),
            short_body: truncate_chars(&candidate.body, self.short_body_max_chars),
            long_body: candidate.body.clone(),
            source_name: candidate.source.name.clone(),
            source_url: candidate.source.url.clone(),
            tier: candidate.tier,
            data_note: candidate.data_note.clone(),
            severity: candidate.tier.severity(),
            dismissed: false,
            dedupe_key: candidate.id.clone(),
        }
    }

    /// Persist the alert, then try to schedule its notification.
    ///
    /// Fails only if the alert could not be persisted.
    pub async fn dispatch(
        &self,
        candidate: &InsightCandidate,
        now: DateTime<Utc>,
    ) -> Result<DispatchReceipt, InsightError> {
        let alert = self.build_alert(candidate, now);
        self.alerts.save(&alert).await?;
        info!(alert_id = %alert.id, dedupe_key = %alert.dedupe_key, "alert persisted");

        let notification = match &self.scheduler {
            None => NotificationStatus::Skipped,
            Some(scheduler) => match scheduler.schedule(&alert).await {
                Ok(()) => NotificationStatus::Scheduled,
                Err(e) => {
                    warn!(alert_id = %alert.id, error = %e, "notification scheduling failed");
                    NotificationStatus::Failed(e.to_string())
                }
            },
        };

        Ok(DispatchReceipt {
            alert,
            notification,
        })
    }
}

/// First `max_chars` characters of `text`
fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => text[..byte_idx].to_string(),
        None => text.to_string(),
    }
}
