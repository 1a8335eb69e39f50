//! Error types for the log-stream supervisor.

use thiserror::Error;

use nimbus_kv::{KvError, QueueError};

/// Failure inside a control or worker handler. Handlers are invoked
/// from queue and expiry subscriptions, which log the error and keep
/// going.
#[derive(Debug, Error)]
pub enum LogStreamError {
    /// Key-value store failure.
    #[error(transparent)]
    Kv(#[from] KvError),

    /// Queue publish failure.
    #[error(transparent)]
    Queue(#[from] QueueError),
}

/// Convenience alias used throughout this crate.
pub type LogStreamResult<T> = Result<T, LogStreamError>;
