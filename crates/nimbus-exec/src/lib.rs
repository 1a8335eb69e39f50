//! # nimbus-exec
//!
//! The job executor: turns claimed job records into handler runs.
//!
//! This crate provides:
//!
//! - [`Registry`]: the static mapping from [`nimbus_model::JobKind`]
//!   to handlers with entry/exit/terminate hooks
//! - [`Runner`]: wraps one claimed job (hooks, dispatch, outcome
//!   recording) with retry backoff and a five-attempt ceiling
//! - [`setup_executors`]: the two periodic claim workers
//!   (`jobFetcher` for pending, `failedJobFetcher` for failed)
//! - [`retry_delay`]: linear-plus-jitter retry scheduling
//!
//! Call [`nimbus_store::JobRepo::reset_running`] exactly once before
//! starting the executors; that is the crash-recovery step.

#![forbid(unsafe_code)]

pub mod args;
pub mod backoff;
pub mod fetcher;
pub mod handlers;
pub mod registry;
pub mod runner;

pub use args::parse_args;
pub use backoff::retry_delay;
pub use fetcher::setup_executors;
pub use registry::{HookError, JobOutcome, Registry};
pub use runner::Runner;
