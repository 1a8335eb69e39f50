//! The process-wide database handle.
//!
//! Initialized once at startup and passed by explicit construction to
//! every worker task; there are no module-level singletons.

use nimbus_model::{Deployment, GpuClaim, StorageManager, Vm};

use crate::gpu_lease_repo::GpuLeaseRepo;
use crate::job_repo::JobRepo;
use crate::resource_repo::ResourceRepo;
use crate::worker_status::WorkerStatusRepo;

/// Bundle of every repository. Cloning is cheap and shares all records.
#[derive(Clone, Default)]
pub struct Database {
    /// Job records.
    pub jobs: JobRepo,
    /// Deployment resources.
    pub deployments: ResourceRepo<Deployment>,
    /// VM resources.
    pub vms: ResourceRepo<Vm>,
    /// Storage-manager resources.
    pub sms: ResourceRepo<StorageManager>,
    /// GPU-claim resources.
    pub gpu_claims: ResourceRepo<GpuClaim>,
    /// GPU leases.
    pub gpu_leases: GpuLeaseRepo,
    /// Worker heartbeat registry.
    pub worker_status: WorkerStatusRepo,
}

impl Database {
    /// Creates an empty database.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}
