//! In-process key-value store with TTL keys and expiry notifications.
//!
//! Missing keys are never errors; `get` on an absent or lapsed key
//! returns `None`. Expiry is enforced lazily on every read and swept by
//! a background task that also feeds the expired-key subscription.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use regex::Regex;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::KvError;

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|t| t > now)
    }
}

/// Thread-safe key-value store with TTL keys, conditional sets and an
/// expired-key broadcast.
///
/// Cloning is cheap; all clones share the same underlying map.
#[derive(Clone)]
pub struct KvStore {
    entries: Arc<RwLock<HashMap<String, Entry>>>,
    expired: broadcast::Sender<String>,
}

impl Default for KvStore {
    fn default() -> Self {
        Self::new()
    }
}

impl KvStore {
    /// Creates an empty store.
    ///
    /// Call [`KvStore::spawn_sweeper`] once a runtime is available so
    /// that TTL lapses are noticed and broadcast; reads enforce expiry
    /// lazily either way.
    #[must_use]
    pub fn new() -> Self {
        let (expired, _) = broadcast::channel(1024);
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            expired,
        }
    }

    /// Returns the value of `key`, or `None` if absent or expired.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<String> {
        let now = Instant::now();
        let entries = self.entries.read();
        entries
            .get(key)
            .filter(|e| e.live(now))
            .map(|e| e.value.clone())
    }

    /// Returns all live keys matching the given regular expression.
    pub fn list(&self, pattern: &str) -> Result<Vec<String>, KvError> {
        let re = Regex::new(pattern)?;
        let now = Instant::now();
        let entries = self.entries.read();
        Ok(entries
            .iter()
            .filter(|(k, e)| e.live(now) && re.is_match(k))
            .map(|(k, _)| k.clone())
            .collect())
    }

    /// Sets `key` unconditionally. A zero `ttl` makes the key persistent.
    pub fn set(&self, key: &str, value: impl ToString, ttl: Duration) {
        let entry = Entry {
            value: value.to_string(),
            expires_at: expiry(ttl),
        };
        self.entries.write().insert(key.to_string(), entry);
    }

    /// Sets `key` only if it does not exist (or has expired). Returns
    /// true if the key was newly set.
    pub fn set_nx(&self, key: &str, value: impl ToString, ttl: Duration) -> bool {
        let now = Instant::now();
        let mut entries = self.entries.write();
        if entries.get(key).is_some_and(|e| e.live(now)) {
            return false;
        }
        entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: expiry(ttl),
            },
        );
        true
    }

    /// Sets `key` only if it already exists and has not expired. Returns
    /// true if an existing key was refreshed. The log-stream worker uses
    /// a false return to detect lost ownership.
    pub fn set_xx(&self, key: &str, value: impl ToString, ttl: Duration) -> bool {
        let now = Instant::now();
        let mut entries = self.entries.write();
        match entries.get(key) {
            Some(e) if e.live(now) => {
                entries.insert(
                    key.to_string(),
                    Entry {
                        value: value.to_string(),
                        expires_at: expiry(ttl),
                    },
                );
                true
            }
            _ => false,
        }
    }

    /// Deletes `key`. Deleting an absent key is not an error.
    pub fn del(&self, key: &str) {
        self.entries.write().remove(key);
    }

    /// Returns true if `key` exists and has not expired.
    #[must_use]
    pub fn is_set(&self, key: &str) -> bool {
        let now = Instant::now();
        self.entries.read().get(key).is_some_and(|e| e.live(now))
    }

    /// Increments the integer value of `key` by one, creating it at 1 if
    /// absent. Returns the new value.
    pub fn incr(&self, key: &str) -> Result<i64, KvError> {
        self.add(key, 1)
    }

    /// Decrements the integer value of `key` by one, creating it at -1
    /// if absent. Returns the new value.
    pub fn decr(&self, key: &str) -> Result<i64, KvError> {
        self.add(key, -1)
    }

    fn add(&self, key: &str, delta: i64) -> Result<i64, KvError> {
        let now = Instant::now();
        let mut entries = self.entries.write();
        let current = match entries.get(key) {
            Some(e) if e.live(now) => {
                e.value
                    .parse::<i64>()
                    .map_err(|_| KvError::NotAnInteger {
                        key: key.to_string(),
                        value: e.value.clone(),
                    })?
            }
            _ => 0,
        };
        let next = current + delta;
        let expires_at = entries.get(key).filter(|e| e.live(now)).and_then(|e| e.expires_at);
        entries.insert(
            key.to_string(),
            Entry {
                value: next.to_string(),
                expires_at,
            },
        );
        Ok(next)
    }

    /// Spawns the background sweeper that removes lapsed keys and feeds
    /// the expired-key broadcast. Runs until `token` is cancelled.
    pub fn spawn_sweeper(&self, interval: Duration, token: CancellationToken) -> JoinHandle<()> {
        let entries = Arc::clone(&self.entries);
        let expired_tx = self.expired.clone();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(interval);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    () = token.cancelled() => return,
                    _ = tick.tick() => {
                        let now = Instant::now();
                        let lapsed: Vec<String> = {
                            let mut map = entries.write();
                            let keys: Vec<String> = map
                                .iter()
                                .filter(|(_, e)| !e.live(now))
                                .map(|(k, _)| k.clone())
                                .collect();
                            for key in &keys {
                                map.remove(key);
                            }
                            keys
                        };
                        for key in lapsed {
                            // No receivers is fine; the next expiry retries.
                            let _ = expired_tx.send(key);
                        }
                    }
                }
            }
        })
    }

    /// Subscribes to expired-key events whose names match `pattern`.
    ///
    /// The handler runs in a background task; handler errors are logged
    /// and the subscription continues. The task exits when `token` is
    /// cancelled.
    pub fn subscribe_expired<F, E>(
        &self,
        token: CancellationToken,
        pattern: &str,
        handler: F,
    ) -> Result<JoinHandle<()>, KvError>
    where
        F: Fn(String) -> Result<(), E> + Send + 'static,
        E: std::fmt::Display,
    {
        let re = Regex::new(pattern)?;
        let mut rx = self.expired.subscribe();
        Ok(tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = token.cancelled() => return,
                    msg = rx.recv() => match msg {
                        Ok(key) => {
                            if !re.is_match(&key) {
                                continue;
                            }
                            if let Err(e) = handler(key.clone()) {
                                warn!(key, error = %e, "expired-key handler failed");
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            debug!(skipped = n, "expired-key subscriber lagged");
                        }
                        Err(broadcast::error::RecvError::Closed) => return,
                    },
                }
            }
        }))
    }
}

fn expiry(ttl: Duration) -> Option<Instant> {
    if ttl.is_zero() {
        None
    } else {
        Some(Instant::now() + ttl)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const SHORT: Duration = Duration::from_millis(30);

    #[test]
    fn missing_key_is_none_not_error() {
        let kv = KvStore::new();
        assert_eq!(kv.get("nope"), None);
        assert!(!kv.is_set("nope"));
    }

    #[test]
    fn set_nx_first_writer_wins() {
        let kv = KvStore::new();
        assert!(kv.set_nx("k", "a", Duration::ZERO));
        assert!(!kv.set_nx("k", "b", Duration::ZERO));
        assert_eq!(kv.get("k").as_deref(), Some("a"));
    }

    #[test]
    fn set_xx_requires_live_key() {
        let kv = KvStore::new();
        assert!(!kv.set_xx("k", "a", Duration::ZERO));
        kv.set("k", "a", Duration::ZERO);
        assert!(kv.set_xx("k", "b", Duration::ZERO));
        assert_eq!(kv.get("k").as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn expired_key_reads_as_missing() {
        let kv = KvStore::new();
        kv.set("k", "v", SHORT);
        assert!(kv.is_set("k"));
        tokio::time::sleep(SHORT * 2).await;
        assert_eq!(kv.get("k"), None);
        // A lapsed key is re-creatable with set_nx.
        assert!(kv.set_nx("k", "v2", Duration::ZERO));
    }

    #[tokio::test]
    async fn sweeper_broadcasts_matching_expiries() {
        let kv = KvStore::new();
        let token = CancellationToken::new();
        kv.spawn_sweeper(Duration::from_millis(5), token.clone());

        static HITS: AtomicUsize = AtomicUsize::new(0);
        let _sub = kv
            .subscribe_expired(token.clone(), r"^logs:zone-a:[A-Za-z0-9-]+$", |key| {
                assert!(key.starts_with("logs:zone-a:"));
                HITS.fetch_add(1, Ordering::SeqCst);
                Ok::<(), std::convert::Infallible>(())
            })
            .unwrap();

        kv.set("logs:zone-a:pod-1", "false", SHORT);
        kv.set("other:zone-a:pod-2", "false", SHORT);

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(HITS.load(Ordering::SeqCst), 1);
        token.cancel();
    }

    #[test]
    fn incr_and_decr() {
        let kv = KvStore::new();
        assert_eq!(kv.incr("n").unwrap(), 1);
        assert_eq!(kv.incr("n").unwrap(), 2);
        assert_eq!(kv.decr("n").unwrap(), 1);

        kv.set("s", "not-a-number", Duration::ZERO);
        assert!(kv.incr("s").is_err());
    }

    #[test]
    fn list_filters_by_pattern() {
        let kv = KvStore::new();
        kv.set("logs:z:a", "1", Duration::ZERO);
        kv.set("logs:z:b", "1", Duration::ZERO);
        kv.set("queue:z", "1", Duration::ZERO);
        let mut keys = kv.list(r"^logs:z:").unwrap();
        keys.sort();
        assert_eq!(keys, vec!["logs:z:a".to_string(), "logs:z:b".to_string()]);
    }
}
