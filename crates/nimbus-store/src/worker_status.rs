//! Worker heartbeat registry.
//!
//! Every supervised worker reports `running` once a second and
//! `stopped` on exit; a slow tick purges entries that have not been
//! touched for a day (dead processes that never said goodbye).

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Reported state of a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WorkerState {
    /// Heartbeating normally.
    Running,
    /// Exited cleanly.
    Stopped,
}

/// A worker's last reported status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerStatus {
    /// Reported state.
    pub state: WorkerState,
    /// When the report arrived.
    pub updated_at: DateTime<Utc>,
}

/// Registry of worker statuses keyed by worker name.
#[derive(Clone, Default)]
pub struct WorkerStatusRepo {
    statuses: Arc<RwLock<HashMap<String, WorkerStatus>>>,
}

const STALE_AFTER_HOURS: i64 = 24;

impl WorkerStatusRepo {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a `running` heartbeat for the named worker.
    pub fn report_running(&self, name: &str) {
        self.report(name, WorkerState::Running);
    }

    /// Records that the named worker stopped.
    pub fn report_stopped(&self, name: &str) {
        self.report(name, WorkerState::Stopped);
    }

    fn report(&self, name: &str, state: WorkerState) {
        self.statuses.write().insert(
            name.to_string(),
            WorkerStatus {
                state,
                updated_at: Utc::now(),
            },
        );
    }

    /// Returns the status of the named worker.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<WorkerStatus> {
        self.statuses.read().get(name).cloned()
    }

    /// Lists all known workers and their statuses.
    #[must_use]
    pub fn list(&self) -> Vec<(String, WorkerStatus)> {
        self.statuses
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Removes entries not updated within the last 24 hours. Returns the
    /// number purged.
    pub fn purge_stale(&self) -> usize {
        let cutoff = Utc::now() - Duration::hours(STALE_AFTER_HOURS);
        let mut statuses = self.statuses.write();
        let before = statuses.len();
        statuses.retain(|_, s| s.updated_at >= cutoff);
        before - statuses.len()
    }
}
