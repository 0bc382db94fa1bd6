//! History providers
//!
//! The engine pulls the health history through `HistoryProvider` at the start
//! of every cycle. Hosts back it with their health store; `StaticHistoryProvider`
//! and `FileHistoryProvider` cover tests and the CLI.

use std::path::PathBuf;

use async_trait::async_trait;

use crate::error::InsightError;
use crate::types::HealthHistory;

/// Source of daily health snapshots
#[async_trait]
pub trait HistoryProvider: Send + Sync {
    async fn load_history(&self) -> Result<HealthHistory, InsightError>;
}

/// Provider returning a fixed, in-memory history
#[derive(Debug, Clone, Default)]
pub struct StaticHistoryProvider {
    history: HealthHistory,
}

impl StaticHistoryProvider {
    pub fn new(history: HealthHistory) -> Self {
        Self { history }
    }
}

#[async_trait]
impl HistoryProvider for StaticHistoryProvider {
    async fn load_history(&self) -> Result<HealthHistory, InsightError> {
        Ok(self.history.clone())
    }
}

/// Provider reading a JSON array of snapshots from disk on every load
#[derive(Debug, Clone)]
pub struct FileHistoryProvider {
    path: PathBuf,
}

impl FileHistoryProvider {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl HistoryProvider for FileHistoryProvider {
    async fn load_history(&self) -> Result<HealthHistory, InsightError> {
        let json = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            InsightError::HistoryUnavailable(format!("{}: {e}", self.path.display()))
        })?;
        HealthHistory::from_json(&json)
    }
}
