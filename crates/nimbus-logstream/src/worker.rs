//! The worker role of the log-stream supervisor.
//!
//! Workers consume the zone's log queue. On `added` they race for the
//! ownership key with a conditional set; the winner streams the pod's
//! logs from the stored resume point and refreshes ownership on a
//! cadence. A failed refresh means ownership lapsed (or was purged)
//! and the stream shuts down so another worker can take over.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use nimbus_kv::{KvStore, MessageQueue};
use nimbus_model::TimerConfig;
use nimbus_worker::delayed_interval;

use crate::adapter::{ClusterAdapter, LogLine, PodEventKind};
use crate::control::LogEvent;
use crate::error::LogStreamResult;
use crate::keys;

// Resume points carry a week TTL so entries for pods that vanish
// without a deletion event still clean themselves up.
const LAST_LOGGED_TTL: Duration = Duration::from_secs(7 * 24 * 3600);

/// Receives streamed log lines. The production sink forwards them to
/// storage or live subscribers.
pub trait LogSink: Send + Sync {
    /// Called once per delivered line, in stream order.
    fn on_log(&self, pod: &str, line: &LogLine);
}

struct ActiveStream {
    id: u64,
    token: CancellationToken,
}

struct WorkerInner {
    kv: KvStore,
    cluster: Arc<dyn ClusterAdapter>,
    sink: Arc<dyn LogSink>,
    zone: String,
    hostname: String,
    lifetime: Duration,
    refresh: Duration,
    active: Mutex<HashMap<String, ActiveStream>>,
    next_stream_id: AtomicU64,
    root: CancellationToken,
}

/// One log-stream worker instance. Cloning shares the active-stream
/// table.
#[derive(Clone)]
pub struct LogWorker {
    inner: Arc<WorkerInner>,
}

impl LogWorker {
    /// Creates a worker for one zone.
    #[must_use]
    pub fn new(
        kv: KvStore,
        cluster: Arc<dyn ClusterAdapter>,
        sink: Arc<dyn LogSink>,
        zone: impl Into<String>,
        hostname: impl Into<String>,
        timers: &TimerConfig,
        token: &CancellationToken,
    ) -> Self {
        Self {
            inner: Arc::new(WorkerInner {
                kv,
                cluster,
                sink,
                zone: zone.into(),
                hostname: hostname.into(),
                lifetime: timers.logger_lifetime(),
                refresh: timers.logger_update_interval(),
                active: Mutex::new(HashMap::new()),
                next_stream_id: AtomicU64::new(0),
                root: token.clone(),
            }),
        }
    }

    /// Handles one queue announcement.
    pub fn handle(&self, event: &LogEvent) -> LogStreamResult<()> {
        match event.event {
            PodEventKind::Added | PodEventKind::Updated => self.try_claim(&event.pod_name),
            PodEventKind::Deleted => {
                if let Some(stream) = self.inner.active.lock().remove(&event.pod_name) {
                    stream.token.cancel();
                    debug!(pod = %event.pod_name, "stream cancelled on pod deletion");
                }
                Ok(())
            }
        }
    }

    /// Number of streams this worker currently runs.
    #[must_use]
    pub fn active_streams(&self) -> usize {
        self.inner.active.lock().len()
    }

    fn try_claim(&self, pod: &str) -> LogStreamResult<()> {
        let inner = &self.inner;
        // A stream this host already runs must not be claimed again;
        // re-announcements happen when the owner key lapses early.
        if inner.active.lock().contains_key(pod) {
            debug!(zone = %inner.zone, pod, "stream already running on this host");
            return Ok(());
        }
        let owner = keys::owner_key(&inner.zone, pod);
        // The initial claim covers two lifetimes to survive the gap
        // before the first refresh; each refresh extends by one.
        if !inner
            .kv
            .set_nx(&owner, &inner.hostname, inner.lifetime * 2)
        {
            debug!(zone = %inner.zone, pod, "stream owned elsewhere");
            return Ok(());
        }
        info!(zone = %inner.zone, pod, host = %inner.hostname, "claimed log stream");

        let since = inner
            .kv
            .get(&keys::last_logged_key(&inner.zone, pod))
            .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
            .map_or_else(
                || {
                    Utc::now()
                        - chrono::Duration::from_std(inner.lifetime)
                            .unwrap_or_else(|_| chrono::Duration::seconds(10))
                },
                |t| t.with_timezone(&Utc),
            );

        let stream_token = inner.root.child_token();
        let stream_id = inner.next_stream_id.fetch_add(1, Ordering::Relaxed);
        inner.active.lock().insert(
            pod.to_string(),
            ActiveStream {
                id: stream_id,
                token: stream_token.clone(),
            },
        );
        tokio::spawn(stream_logs(
            Arc::clone(inner),
            pod.to_string(),
            since,
            stream_id,
            stream_token,
        ));
        Ok(())
    }
}

async fn stream_logs(
    inner: Arc<WorkerInner>,
    pod: String,
    since: DateTime<Utc>,
    stream_id: u64,
    token: CancellationToken,
) {
    let owner = keys::owner_key(&inner.zone, &pod);
    let last = keys::last_logged_key(&inner.zone, &pod);
    let mut rx = inner.cluster.open_log_stream(&pod, since);
    let mut refresh = delayed_interval(inner.refresh);

    loop {
        tokio::select! {
            () = token.cancelled() => break,
            _ = refresh.tick() => {
                if !inner.kv.set_xx(&owner, &inner.hostname, inner.lifetime) {
                    warn!(zone = %inner.zone, pod, "log-stream ownership lost");
                    break;
                }
            }
            line = rx.recv() => match line {
                Some(line) => {
                    inner.sink.on_log(&pod, &line);
                    inner.kv.set(&last, line.created_at.to_rfc3339(), LAST_LOGGED_TTL);
                }
                None => break,
            }
        }
    }

    // A newer stream may have replaced this entry; only remove our own.
    {
        let mut active = inner.active.lock();
        if active.get(&pod).is_some_and(|s| s.id == stream_id) {
            active.remove(&pod);
        }
    }
    debug!(zone = %inner.zone, pod, "log stream closed");
}

/// Spawns the worker role for one zone: a queue subscription feeding
/// [`LogWorker::handle`].
pub fn setup_log_worker(
    queue: &MessageQueue,
    worker: LogWorker,
    token: &CancellationToken,
) -> JoinHandle<()> {
    let channel = keys::queue_channel(&worker.inner.zone);
    queue.consume::<LogEvent, _, _>(token.clone(), &channel, move |event| worker.handle(&event))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::StaticCluster;

    #[derive(Default)]
    struct CollectingSink {
        lines: Mutex<Vec<(String, String)>>,
    }

    impl LogSink for CollectingSink {
        fn on_log(&self, pod: &str, line: &LogLine) {
            self.lines.lock().push((pod.to_string(), line.line.clone()));
        }
    }

    fn worker(
        kv: &KvStore,
        cluster: &StaticCluster,
        hostname: &str,
        token: &CancellationToken,
    ) -> (LogWorker, Arc<CollectingSink>) {
        worker_with_timers(kv, cluster, hostname, &TimerConfig::default(), token)
    }

    fn worker_with_timers(
        kv: &KvStore,
        cluster: &StaticCluster,
        hostname: &str,
        timers: &TimerConfig,
        token: &CancellationToken,
    ) -> (LogWorker, Arc<CollectingSink>) {
        let sink = Arc::new(CollectingSink::default());
        let w = LogWorker::new(
            kv.clone(),
            Arc::new(cluster.clone()),
            Arc::clone(&sink) as Arc<dyn LogSink>,
            "se-flem",
            hostname,
            timers,
            token,
        );
        (w, sink)
    }

    fn added(pod: &str) -> LogEvent {
        LogEvent {
            pod_name: pod.to_string(),
            event: PodEventKind::Added,
        }
    }

    #[tokio::test]
    async fn exactly_one_worker_wins_the_stream() {
        let kv = KvStore::new();
        let cluster = StaticCluster::new();
        cluster.add_pod("web-0");
        let token = CancellationToken::new();
        let (worker_a, sink_a) = worker(&kv, &cluster, "host-a", &token);
        let (worker_b, sink_b) = worker(&kv, &cluster, "host-b", &token);

        worker_a.handle(&added("web-0")).unwrap();
        worker_b.handle(&added("web-0")).unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert_eq!(worker_a.active_streams() + worker_b.active_streams(), 1);
        let owner = kv.get("logs:se-flem:web-0:owner").unwrap();
        assert_eq!(owner, "host-a");

        cluster.push_log("web-0", "app", "hello");
        tokio::time::sleep(Duration::from_millis(50)).await;
        let delivered = sink_a.lines.lock().len() + sink_b.lines.lock().len();
        assert_eq!(delivered, 1);
        token.cancel();
    }

    #[tokio::test]
    async fn stream_resumes_from_stored_checkpoint() {
        let kv = KvStore::new();
        let cluster = StaticCluster::new();
        cluster.add_pod("web-0");
        cluster.push_log("web-0", "app", "before checkpoint");
        tokio::time::sleep(Duration::from_millis(5)).await;
        kv.set(
            "logs:se-flem:web-0:last",
            Utc::now().to_rfc3339(),
            Duration::ZERO,
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
        cluster.push_log("web-0", "app", "after checkpoint");

        let token = CancellationToken::new();
        let (w, sink) = worker(&kv, &cluster, "host-a", &token);
        w.handle(&added("web-0")).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let lines = sink.lines.lock();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].1, "after checkpoint");
        token.cancel();
    }

    #[tokio::test]
    async fn checkpoint_advances_with_delivered_lines() {
        let kv = KvStore::new();
        let cluster = StaticCluster::new();
        cluster.add_pod("web-0");

        let token = CancellationToken::new();
        let (w, _sink) = worker(&kv, &cluster, "host-a", &token);
        w.handle(&added("web-0")).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        cluster.push_log("web-0", "app", "one");
        tokio::time::sleep(Duration::from_millis(30)).await;
        let first = kv.get("logs:se-flem:web-0:last").unwrap();

        tokio::time::sleep(Duration::from_millis(5)).await;
        cluster.push_log("web-0", "app", "two");
        tokio::time::sleep(Duration::from_millis(30)).await;
        let second = kv.get("logs:se-flem:web-0:last").unwrap();

        assert!(second >= first, "checkpoint went backwards");
        token.cancel();
    }

    #[tokio::test]
    async fn deletion_event_cancels_the_stream() {
        let kv = KvStore::new();
        let cluster = StaticCluster::new();
        cluster.add_pod("web-0");

        let token = CancellationToken::new();
        let (w, sink) = worker(&kv, &cluster, "host-a", &token);
        w.handle(&added("web-0")).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(w.active_streams(), 1);

        w.handle(&LogEvent {
            pod_name: "web-0".into(),
            event: PodEventKind::Deleted,
        })
        .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(w.active_streams(), 0);

        cluster.push_log("web-0", "app", "late line");
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(sink.lines.lock().is_empty());
        token.cancel();
    }

    #[tokio::test]
    async fn lapsed_ownership_frees_the_pod_for_other_workers() {
        let kv = KvStore::new();
        let cluster = StaticCluster::new();
        cluster.add_pod("web-0");
        let token = CancellationToken::new();
        let (worker_a, _) = worker(&kv, &cluster, "host-a", &token);
        let (worker_b, _) = worker(&kv, &cluster, "host-b", &token);

        worker_a.handle(&added("web-0")).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        // Simulate the owner key lapsing (worker crash).
        kv.del("logs:se-flem:web-0:owner");
        worker_b.handle(&added("web-0")).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(kv.get("logs:se-flem:web-0:owner").unwrap(), "host-b");
        token.cancel();
    }

    #[tokio::test]
    async fn re_announce_does_not_stack_a_second_stream() {
        let kv = KvStore::new();
        let cluster = StaticCluster::new();
        cluster.add_pod("web-0");
        let token = CancellationToken::new();
        let (w, sink) = worker(&kv, &cluster, "host-a", &token);

        w.handle(&added("web-0")).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(w.active_streams(), 1);

        // The owner key lapses while the local stream is still alive;
        // the re-announcement must not claim on top of it.
        kv.del("logs:se-flem:web-0:owner");
        w.handle(&added("web-0")).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(w.active_streams(), 1);
        assert_eq!(kv.get("logs:se-flem:web-0:owner"), None);

        cluster.push_log("web-0", "app", "once");
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(sink.lines.lock().len(), 1);
        token.cancel();
    }

    #[tokio::test]
    async fn missing_checkpoint_resumes_one_lifetime_back() {
        let kv = KvStore::new();
        let cluster = StaticCluster::new();
        cluster.add_pod("web-0");
        cluster.push_log("web-0", "app", "ancient line");
        tokio::time::sleep(Duration::from_millis(1200)).await;
        cluster.push_log("web-0", "app", "recent line");

        let token = CancellationToken::new();
        let timers = TimerConfig {
            logger_lifetime: 1,
            ..TimerConfig::default()
        };
        let (w, sink) = worker_with_timers(&kv, &cluster, "host-a", &timers, &token);
        w.handle(&added("web-0")).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let lines = sink.lines.lock();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].1, "recent line");
        token.cancel();
    }

    #[tokio::test]
    async fn refresh_extends_ownership_by_one_lifetime() {
        let kv = KvStore::new();
        let cluster = StaticCluster::new();
        cluster.add_pod("web-0");
        let token = CancellationToken::new();
        let timers = TimerConfig {
            logger_lifetime: 1,
            logger_update: 1,
            ..TimerConfig::default()
        };
        let (w, _sink) = worker_with_timers(&kv, &cluster, "host-a", &timers, &token);

        // Claim at t=0 (TTL two lifetimes), first refresh at t=1s.
        w.handle(&added("web-0")).unwrap();
        tokio::time::sleep(Duration::from_millis(1300)).await;
        token.cancel();

        // The refreshed key lives one lifetime past the refresh, so it
        // is still set at t=1.6s and gone by t=2.5s.
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(kv.is_set("logs:se-flem:web-0:owner"));
        tokio::time::sleep(Duration::from_millis(900)).await;
        assert!(!kv.is_set("logs:se-flem:web-0:owner"));
    }
}
