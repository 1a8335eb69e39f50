//! The control role of the log-stream supervisor.
//!
//! One control instance runs per zone. It keeps a short-TTL liveness
//! key per pod and reacts to that key's expiry:
//!
//! - pod gone: purge its keys and announce `deleted`
//! - pod alive: re-arm the key for a full lifetime, then announce
//!   `added` unless a worker already owns the stream or no worker is
//!   listening at all
//!
//! The pod watcher and the periodic synchronizer only ever arm keys
//! with a one-second TTL; everything else flows through the expiry
//! handler, so there is exactly one place that decides whether work
//! gets announced.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use nimbus_kv::{KvError, KvStore, MessageQueue};
use nimbus_model::TimerConfig;
use nimbus_store::WorkerStatusRepo;
use nimbus_worker::{spawn_periodic, spawn_streaming};

use crate::adapter::{ClusterAdapter, PodEvent, PodEventKind};
use crate::error::{LogStreamError, LogStreamResult};
use crate::keys;

/// Work announcement on a zone's log queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEvent {
    /// Pod the announcement is about.
    #[serde(rename = "PodName")]
    pub pod_name: String,
    /// What workers should do with it.
    #[serde(rename = "PodEvent")]
    pub event: PodEventKind,
}

// Watch-driven liveness keys are armed short so the expiry handler
// takes over quickly.
const WATCH_TTL: Duration = Duration::from_secs(1);

/// Per-zone control state.
pub struct LogControl {
    kv: KvStore,
    queue: MessageQueue,
    cluster: Arc<dyn ClusterAdapter>,
    zone: String,
    lifetime: Duration,
}

impl LogControl {
    /// Creates the control state for one zone.
    #[must_use]
    pub fn new(
        kv: KvStore,
        queue: MessageQueue,
        cluster: Arc<dyn ClusterAdapter>,
        zone: impl Into<String>,
        lifetime: Duration,
    ) -> Self {
        Self {
            kv,
            queue,
            cluster,
            zone: zone.into(),
            lifetime,
        }
    }

    fn purge(&self, pod: &str) {
        self.kv.del(&keys::pod_key(&self.zone, pod));
        self.kv.del(&keys::owner_key(&self.zone, pod));
        self.kv.del(&keys::last_logged_key(&self.zone, pod));
    }

    fn announce(&self, pod: &str, event: PodEventKind) -> LogStreamResult<()> {
        self.queue.publish(
            &keys::queue_channel(&self.zone),
            &LogEvent {
                pod_name: pod.to_string(),
                event,
            },
        )?;
        Ok(())
    }

    /// Reacts to the expiry of a liveness key.
    pub fn handle_expired_key(&self, key: &str) -> LogStreamResult<()> {
        let Some(pod) = keys::pod_from_key(&self.zone, key) else {
            return Ok(());
        };

        if !self.cluster.pod_exists(pod) {
            self.purge(pod);
            info!(zone = %self.zone, pod, "pod gone, log keys purged");
            return self.announce(pod, PodEventKind::Deleted);
        }

        self.kv
            .set_nx(&keys::pod_key(&self.zone, pod), 1, self.lifetime);

        if self.queue.get_listeners(&keys::queue_channel(&self.zone)) == 0 {
            warn!(zone = %self.zone, pod, "no log workers listening, retrying on next expiry");
            return Ok(());
        }
        if self.kv.is_set(&keys::owner_key(&self.zone, pod)) {
            debug!(zone = %self.zone, pod, "stream already owned");
            return Ok(());
        }
        self.announce(pod, PodEventKind::Added)
    }

    /// Reacts to a pod lifecycle event from the cluster watch.
    pub fn handle_pod_event(&self, event: &PodEvent) -> LogStreamResult<()> {
        match event.kind {
            PodEventKind::Added | PodEventKind::Updated => {
                self.kv
                    .set_nx(&keys::pod_key(&self.zone, &event.name), 1, WATCH_TTL);
                Ok(())
            }
            PodEventKind::Deleted => {
                self.purge(&event.name);
                self.announce(&event.name, PodEventKind::Deleted)
            }
        }
    }

    /// Arms a liveness key for every pod the cluster reports. Catches
    /// pods whose watch events were missed.
    pub fn synchronize(&self) -> LogStreamResult<()> {
        for pod in self.cluster.list_pods() {
            self.kv
                .set_nx(&keys::pod_key(&self.zone, &pod), 1, WATCH_TTL);
        }
        Ok(())
    }
}

/// Spawns the control role for one zone: the expiry subscription, the
/// pod watcher and the synchronizer.
pub fn setup_log_control(
    kv: &KvStore,
    queue: &MessageQueue,
    cluster: Arc<dyn ClusterAdapter>,
    zone: &str,
    timers: &TimerConfig,
    statuses: WorkerStatusRepo,
    token: &CancellationToken,
) -> Result<Vec<JoinHandle<()>>, KvError> {
    let control = Arc::new(LogControl::new(
        kv.clone(),
        queue.clone(),
        Arc::clone(&cluster),
        zone,
        timers.logger_lifetime(),
    ));

    let expiry = {
        let control = Arc::clone(&control);
        kv.subscribe_expired(token.clone(), &keys::pod_key_pattern(zone), move |key| {
            control.handle_expired_key(&key)
        })?
    };

    let watcher = {
        let control = Arc::clone(&control);
        let mut rx = cluster.watch_pods();
        spawn_streaming(
            &format!("podWatcher:{zone}"),
            statuses.clone(),
            token.clone(),
            async move {
                loop {
                    match rx.recv().await {
                        Ok(event) => {
                            if let Err(e) = control.handle_pod_event(&event) {
                                warn!(error = %e, "pod event handling failed");
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            warn!(skipped = n, "pod watch lagged");
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            return Ok::<(), LogStreamError>(());
                        }
                    }
                }
            },
        )
    };

    let synchronizer = {
        let control = Arc::clone(&control);
        spawn_periodic(
            &format!("podSynchronizer:{zone}"),
            timers.logger_synchronize_interval(),
            statuses,
            token.clone(),
            move || control.synchronize(),
        )
    };

    Ok(vec![expiry, watcher, synchronizer])
}
