use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{ConnectionId, Currency};
use crate::config::{MAX_FREQUENCY_SECS, MIN_FREQUENCY_SECS};
use crate::error::RasidError;

/// Progress of the current (or last) sync pass. Pushed to listeners, never persisted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub is_running: bool,
    pub synced_count: usize,
    pub total_connections: usize,
    pub current_connection: Option<String>,
    pub last_sync_time: Option<DateTime<Utc>>,
}

/// Global switch and polling frequency, shared by every observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConfig {
    pub enabled: bool,
    /// Seconds between timer-driven passes.
    pub frequency: u64,
}

impl SyncConfig {
    pub fn validate(&self) -> Result<(), RasidError> {
        if !(MIN_FREQUENCY_SECS..=MAX_FREQUENCY_SECS).contains(&self.frequency) {
            return Err(RasidError::Configuration(format!(
                "sync frequency must be between {MIN_FREQUENCY_SECS} and {MAX_FREQUENCY_SECS} seconds, got {}",
                self.frequency
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PassTrigger {
    Timer,
    Manual,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ConnectionOutcome {
    Synced {
        amount: f64,
        currency: Currency,
        #[serde(rename = "balancesUpdated")]
        balances_updated: usize,
    },
    Skipped {
        reason: String,
    },
    Failed {
        error: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionResult {
    pub connection_id: ConnectionId,
    pub name: String,
    #[serde(flatten)]
    pub outcome: ConnectionOutcome,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PassReport {
    pub trigger: PassTrigger,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub ownership_changes: usize,
    pub results: Vec<ConnectionResult>,
}

impl PassReport {
    pub fn synced(&self) -> usize {
        self.results
            .iter()
            .filter(|r| matches!(r.outcome, ConnectionOutcome::Synced { .. }))
            .count()
    }

    pub fn failed(&self) -> usize {
        self.results
            .iter()
            .filter(|r| matches!(r.outcome, ConnectionOutcome::Failed { .. }))
            .count()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "camelCase")]
pub enum SyncNowOutcome {
    Completed(PassReport),
    AlreadyRunning,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frequency_bounds() {
        assert!(SyncConfig { enabled: true, frequency: 10 }.validate().is_ok());
        assert!(SyncConfig { enabled: true, frequency: 300 }.validate().is_ok());
        assert!(SyncConfig { enabled: true, frequency: 9 }.validate().is_err());
        assert!(SyncConfig { enabled: false, frequency: 301 }.validate().is_err());
    }
}
