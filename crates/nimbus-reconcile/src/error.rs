//! Error types for the reconciliation workers.

use thiserror::Error;

use nimbus_kv::KvError;
use nimbus_store::StoreError;

/// Failure of one reconciliation pass. The periodic worker logs it and
/// backs off; the next pass starts from scratch.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// Repository failure.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Key-value store failure.
    #[error(transparent)]
    Kv(#[from] KvError),

    /// DNS lookup failed for a reason other than "no such record".
    #[error("dns lookup failed: {0}")]
    Dns(String),
}

/// Convenience alias used throughout this crate.
pub type ReconcileResult<T> = Result<T, ReconcileError>;
