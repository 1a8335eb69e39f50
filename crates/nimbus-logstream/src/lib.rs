//! # nimbus-logstream
//!
//! The pod log-stream supervisor: per zone, a control role tracks pod
//! liveness with short-TTL keys and announces work on a queue; worker
//! roles race for per-pod ownership keys and stream logs from the
//! stored resume point.
//!
//! Ownership is time-bounded, not permanent: a worker that stops
//! refreshing its ownership key loses the stream to the next expiry
//! cycle, so a crashed worker costs at most one liveness lifetime of
//! log latency.

#![forbid(unsafe_code)]

pub mod adapter;
pub mod control;
pub mod error;
pub mod keys;
pub mod worker;

pub use adapter::{ClusterAdapter, LogLine, PodEvent, PodEventKind, StaticCluster};
pub use control::{LogControl, LogEvent, setup_log_control};
pub use error::{LogStreamError, LogStreamResult};
pub use worker::{LogSink, LogWorker, setup_log_worker};
