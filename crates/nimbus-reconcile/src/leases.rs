//! GPU-lease synchronizer.
//!
//! A lease is dropped when its backing claim no longer exists or its
//! expiry has passed. Unbounded leases survive until their claim goes.

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use chrono::Utc;

use nimbus_model::TimerConfig;
use nimbus_store::Database;
use nimbus_worker::spawn_periodic;

use crate::error::ReconcileResult;

/// One synchronizer pass.
pub fn synchronize_gpu_leases(db: &Database) -> ReconcileResult<()> {
    let now = Utc::now();
    for lease in db.gpu_leases.list() {
        let claim_gone = db.gpu_claims.get(&lease.claim_id).is_none();
        let expired = lease.expires_at.is_some_and(|t| t <= now);
        if !claim_gone && !expired {
            continue;
        }
        if db.gpu_leases.delete(&lease.id) {
            info!(lease_id = %lease.id, claim_id = %lease.claim_id,
                claim_gone, expired, "dropped gpu lease");
        }
    }
    Ok(())
}

/// Spawns the GPU-lease synchronizer.
pub fn setup_gpu_lease_synchronizer(
    db: &Database,
    timers: &TimerConfig,
    token: &CancellationToken,
) -> JoinHandle<()> {
    let db = db.clone();
    spawn_periodic(
        "gpuLeaseSynchronizer",
        timers.gpu_lease_synchronize_interval(),
        db.worker_status.clone(),
        token.clone(),
        move || synchronize_gpu_leases(&db),
    )
}
