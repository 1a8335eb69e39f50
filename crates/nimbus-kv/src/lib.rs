//! # nimbus-kv
//!
//! Lease registry and fan-out message queue for the Nimbus worker fabric.
//!
//! This crate provides:
//!
//! - [`KvStore`]: TTL keys with `SETNX`/`SETXX` semantics and an
//!   expired-key subscription, used as the lease registry for pod
//!   log-stream ownership
//! - [`MessageQueue`]: at-most-once fan-out pub/sub with listener-count
//!   introspection
//!
//! TTLs are the recovery mechanism, not the happy path: a crashed owner
//! simply stops refreshing its key and the expiry pathway republishes
//! the work.

#![forbid(unsafe_code)]

pub mod error;
pub mod kv;
pub mod queue;

pub use error::{KvError, QueueError};
pub use kv::KvStore;
pub use queue::MessageQueue;
