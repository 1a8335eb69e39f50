//! The cluster seam for the log-stream supervisor.
//!
//! [`ClusterAdapter`] is everything the supervisor needs from a
//! container cluster: pod existence, a pod-change watch and a log
//! stream with a resume point. [`StaticCluster`] is the in-process
//! implementation used by tests and single-node installations; a real
//! cluster driver implements the same trait.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};

const EVENT_CAPACITY: usize = 256;
const STREAM_CAPACITY: usize = 64;

/// What happened to a pod.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PodEventKind {
    /// The pod appeared.
    Added,
    /// The pod changed.
    Updated,
    /// The pod went away.
    Deleted,
}

/// A pod lifecycle event from the cluster watch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodEvent {
    /// Pod name.
    pub name: String,
    /// What happened.
    pub kind: PodEventKind,
}

/// One log line from a pod.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogLine {
    /// Originating container or source tag.
    pub source: String,
    /// The line itself.
    pub line: String,
    /// Cluster-side timestamp; drives the resume point.
    pub created_at: DateTime<Utc>,
}

/// Cluster operations the supervisor depends on.
pub trait ClusterAdapter: Send + Sync {
    /// Whether the pod currently exists.
    fn pod_exists(&self, pod: &str) -> bool;

    /// Names of all pods currently running.
    fn list_pods(&self) -> Vec<String>;

    /// Subscribes to pod lifecycle events.
    fn watch_pods(&self) -> broadcast::Receiver<PodEvent>;

    /// Opens a log stream for a pod, delivering lines with
    /// `created_at > since`. The stream ends when the receiver sees
    /// `None`.
    fn open_log_stream(&self, pod: &str, since: DateTime<Utc>) -> mpsc::Receiver<LogLine>;
}

#[derive(Default)]
struct PodState {
    lines: Vec<LogLine>,
    streams: Vec<mpsc::Sender<LogLine>>,
}

/// In-process cluster: pods are registered by hand and log lines are
/// pushed in. Buffered lines are replayed on stream open, which is how
/// the resume-point contract is honored.
#[derive(Clone, Default)]
pub struct StaticCluster {
    pods: Arc<RwLock<HashMap<String, PodState>>>,
    events: Arc<RwLock<Option<broadcast::Sender<PodEvent>>>>,
}

impl StaticCluster {
    /// Creates an empty cluster.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn event_sender(&self) -> broadcast::Sender<PodEvent> {
        if let Some(tx) = self.events.read().as_ref() {
            return tx.clone();
        }
        let mut slot = self.events.write();
        slot.get_or_insert_with(|| broadcast::channel(EVENT_CAPACITY).0)
            .clone()
    }

    fn emit(&self, name: &str, kind: PodEventKind) {
        // No watchers is fine.
        let _ = self.event_sender().send(PodEvent {
            name: name.to_string(),
            kind,
        });
    }

    /// Registers a pod and emits `added`.
    pub fn add_pod(&self, name: &str) {
        self.pods.write().entry(name.to_string()).or_default();
        self.emit(name, PodEventKind::Added);
    }

    /// Emits `updated` for an existing pod.
    pub fn touch_pod(&self, name: &str) {
        if self.pods.read().contains_key(name) {
            self.emit(name, PodEventKind::Updated);
        }
    }

    /// Removes a pod and emits `deleted`.
    pub fn remove_pod(&self, name: &str) {
        self.pods.write().remove(name);
        self.emit(name, PodEventKind::Deleted);
    }

    /// Appends a log line and forwards it to every open stream.
    pub fn push_log(&self, pod: &str, source: &str, line: &str) {
        let entry = LogLine {
            source: source.to_string(),
            line: line.to_string(),
            created_at: Utc::now(),
        };
        let mut pods = self.pods.write();
        let Some(state) = pods.get_mut(pod) else {
            return;
        };
        state.lines.push(entry.clone());
        state.streams.retain(|tx| tx.try_send(entry.clone()).is_ok());
    }
}

impl ClusterAdapter for StaticCluster {
    fn pod_exists(&self, pod: &str) -> bool {
        self.pods.read().contains_key(pod)
    }

    fn list_pods(&self) -> Vec<String> {
        self.pods.read().keys().cloned().collect()
    }

    fn watch_pods(&self) -> broadcast::Receiver<PodEvent> {
        self.event_sender().subscribe()
    }

    fn open_log_stream(&self, pod: &str, since: DateTime<Utc>) -> mpsc::Receiver<LogLine> {
        let (tx, rx) = mpsc::channel(STREAM_CAPACITY);
        let mut pods = self.pods.write();
        if let Some(state) = pods.get_mut(pod) {
            for line in state.lines.iter().filter(|l| l.created_at > since) {
                // A full buffer just drops history; live lines follow.
                let _ = tx.try_send(line.clone());
            }
            state.streams.push(tx);
        }
        // For an unknown pod the sender is dropped and the stream ends
        // immediately.
        rx
    }
}
