//! # nimbus-reconcile
//!
//! The background reconciliation workers of the Nimbus control plane:
//!
//! - [`repair`]: schedulers that keep every idle resource on a
//!   jittered repair cadence
//! - [`confirm`]: deletion confirmers that collapse `being-deleted`
//!   records once subsystems and related jobs are quiescent
//! - [`domain`]: custom-domain verification through DNS TXT records
//! - [`cleanup`]: stale-resource power-down
//! - [`metrics`]: periodic counter snapshots into the key-value store
//! - [`leases`]: GPU-lease expiry
//!
//! Every worker is a [`nimbus_worker::spawn_periodic`] loop; a failing
//! pass is logged and retried with exponential backoff, and no pass
//! carries state over from the previous one.

#![forbid(unsafe_code)]

pub mod cleanup;
pub mod confirm;
pub mod domain;
pub mod error;
pub mod leases;
pub mod metrics;
pub mod repair;

pub use cleanup::{clean_stale_resources, setup_stale_resource_cleaner};
pub use confirm::{confirm_deletions, setup_deletion_confirmers};
pub use domain::{
    DnsLookupError, TxtResolver, confirm_custom_domains, setup_custom_domain_confirmer,
};
pub use error::{ReconcileError, ReconcileResult};
pub use leases::{setup_gpu_lease_synchronizer, synchronize_gpu_leases};
pub use metrics::{setup_metrics_updater, update_metrics};
pub use repair::{schedule_repairs, setup_repair_schedulers};
