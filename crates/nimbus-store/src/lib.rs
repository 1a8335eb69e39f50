//! # nimbus-store
//!
//! Repositories for the durable records of the Nimbus control plane.
//!
//! This crate provides:
//!
//! - [`JobRepo`]: job records with an atomic claim (`claim_next`)
//! - [`ResourceRepo`]: generic CRUD plus activity gating for the four
//!   resource kinds, with a fluent [`ResourceFilter`]
//! - [`GpuLeaseRepo`]: leases granted against GPU claims
//! - [`WorkerStatusRepo`]: heartbeat registry with stale-entry purge
//! - [`Database`]: the process-wide handle bundling all of the above
//!
//! The resource database is the single source of truth; every mutation
//! compiles into one atomic operation under the repository's lock.

#![forbid(unsafe_code)]

pub mod database;
pub mod error;
pub mod gpu_lease_repo;
pub mod job_repo;
pub mod resource_repo;
pub mod worker_status;

pub use database::Database;
pub use error::{StoreError, StoreResult};
pub use gpu_lease_repo::GpuLeaseRepo;
pub use job_repo::{JobFilter, JobRepo};
pub use resource_repo::{ResourceFilter, ResourceRepo};
pub use worker_status::{WorkerState, WorkerStatus, WorkerStatusRepo};
