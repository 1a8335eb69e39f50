//! Error types for the key-value store and message queue.

use thiserror::Error;

/// Errors raised by [`crate::KvStore`].
#[derive(Debug, Error)]
pub enum KvError {
    /// The subscription pattern is not a valid regular expression.
    #[error("invalid key pattern: {0}")]
    InvalidPattern(#[from] regex::Error),

    /// `incr`/`decr` was applied to a key that does not hold an integer.
    #[error("key '{key}' does not hold an integer: '{value}'")]
    NotAnInteger {
        /// The offending key.
        key: String,
        /// The value found.
        value: String,
    },
}

/// Errors raised by [`crate::MessageQueue`].
#[derive(Debug, Error)]
pub enum QueueError {
    /// The payload could not be serialized or deserialized.
    #[error("queue payload codec error: {0}")]
    Codec(#[from] serde_json::Error),
}
