//! At-most-once fan-out message queue.
//!
//! Delivery goes to every live subscriber and nothing is persisted: if
//! no one is listening the message is dropped. Publishers can check
//! [`MessageQueue::get_listeners`] first and defer work instead, which
//! is exactly what the log-stream control role does.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::QueueError;

const CHANNEL_CAPACITY: usize = 256;

/// Fan-out pub/sub over named channels with listener-count
/// introspection. Cloning is cheap; clones share the channel table.
#[derive(Clone, Default)]
pub struct MessageQueue {
    channels: Arc<RwLock<HashMap<String, broadcast::Sender<Vec<u8>>>>>,
}

impl MessageQueue {
    /// Creates an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn sender(&self, channel: &str) -> broadcast::Sender<Vec<u8>> {
        if let Some(tx) = self.channels.read().get(channel) {
            return tx.clone();
        }
        let mut channels = self.channels.write();
        channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .clone()
    }

    /// Publishes `payload` to every live subscriber of `channel`.
    ///
    /// Publishing to a channel with no subscribers drops the message;
    /// that is the at-most-once contract, not an error.
    pub fn publish<T: Serialize>(&self, channel: &str, payload: &T) -> Result<(), QueueError> {
        let bytes = serde_json::to_vec(payload)?;
        let tx = self.sender(channel);
        if tx.send(bytes).is_err() {
            debug!(channel, "published to channel with no listeners");
        }
        Ok(())
    }

    /// Returns the number of live subscribers on `channel`.
    #[must_use]
    pub fn get_listeners(&self, channel: &str) -> usize {
        self.channels
            .read()
            .get(channel)
            .map_or(0, broadcast::Sender::receiver_count)
    }

    /// Subscribes to `channel` until `token` is cancelled.
    ///
    /// Payloads are decoded as JSON into `T` and handed to `handler` one
    /// at a time; decode and handler errors are logged and the
    /// subscription continues.
    pub fn consume<T, F, E>(
        &self,
        token: CancellationToken,
        channel: &str,
        handler: F,
    ) -> JoinHandle<()>
    where
        T: DeserializeOwned,
        F: FnMut(T) -> Result<(), E> + Send + 'static,
        E: std::fmt::Display,
    {
        let mut rx = self.sender(channel).subscribe();
        let channel = channel.to_string();
        let mut handler = handler;
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = token.cancelled() => return,
                    msg = rx.recv() => match msg {
                        Ok(bytes) => {
                            let payload: T = match serde_json::from_slice(&bytes) {
                                Ok(p) => p,
                                Err(e) => {
                                    warn!(channel, error = %e, "dropping undecodable message");
                                    continue;
                                }
                            };
                            if let Err(e) = handler(payload) {
                                warn!(channel, error = %e, "message handler failed");
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            warn!(channel, skipped = n, "subscriber lagged; messages dropped");
                        }
                        Err(broadcast::error::RecvError::Closed) => return,
                    },
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Ping {
        n: u32,
    }

    #[tokio::test]
    async fn fan_out_reaches_all_subscribers() {
        let mq = MessageQueue::new();
        let token = CancellationToken::new();
        let hits = Arc::new(AtomicUsize::new(0));

        for _ in 0..2 {
            let hits = Arc::clone(&hits);
            mq.consume::<Ping, _, _>(token.clone(), "queue:logs:z", move |p| {
                assert_eq!(p.n, 7);
                hits.fetch_add(1, Ordering::SeqCst);
                Ok::<(), std::convert::Infallible>(())
            });
        }

        // Let subscriber tasks attach before publishing.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(mq.get_listeners("queue:logs:z"), 2);

        mq.publish("queue:logs:z", &Ping { n: 7 }).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 2);
        token.cancel();
    }

    #[tokio::test]
    async fn listener_count_drops_after_cancel() {
        let mq = MessageQueue::new();
        let token = CancellationToken::new();
        let handle = mq.consume::<Ping, _, _>(token.clone(), "c", |_| {
            Ok::<(), std::convert::Infallible>(())
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(mq.get_listeners("c"), 1);

        token.cancel();
        let _ = handle.await;
        assert_eq!(mq.get_listeners("c"), 0);
    }

    #[test]
    fn publish_without_listeners_is_ok() {
        let mq = MessageQueue::new();
        assert_eq!(mq.get_listeners("empty"), 0);
        mq.publish("empty", &Ping { n: 1 }).unwrap();
    }
}
