//! Periodic metrics snapshot.
//!
//! Counts are written as persistent keys in the shared key-value store
//! under the `metrics:` prefix, where the HTTP layer serves them from.
//! Every pass overwrites the previous snapshot.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use nimbus_model::{JobStatus, TimerConfig};
use nimbus_store::{Database, JobFilter, ResourceFilter, WorkerState};
use nimbus_kv::KvStore;
use nimbus_worker::spawn_periodic;

use crate::error::ReconcileResult;

const PERSISTENT: Duration = Duration::ZERO;

/// One snapshot pass.
pub fn update_metrics(db: &Database, kv: &KvStore) -> ReconcileResult<()> {
    for (status, key) in [
        (JobStatus::Pending, "metrics:jobs:pending"),
        (JobStatus::Running, "metrics:jobs:running"),
        (JobStatus::Completed, "metrics:jobs:completed"),
        (JobStatus::Failed, "metrics:jobs:failed"),
        (JobStatus::Terminated, "metrics:jobs:terminated"),
    ] {
        let count = db.jobs.count(&JobFilter::new().with_status(&[status]));
        kv.set(key, count, PERSISTENT);
    }
    kv.set("metrics:jobs:total", db.jobs.count(&JobFilter::new()), PERSISTENT);

    let all = ResourceFilter::new();
    kv.set(
        "metrics:resources:deployments",
        db.deployments.list(&all)?.len(),
        PERSISTENT,
    );
    kv.set("metrics:resources:vms", db.vms.list(&all)?.len(), PERSISTENT);
    kv.set("metrics:resources:sms", db.sms.list(&all)?.len(), PERSISTENT);
    kv.set(
        "metrics:resources:gpu-claims",
        db.gpu_claims.list(&all)?.len(),
        PERSISTENT,
    );
    kv.set(
        "metrics:leases:total",
        db.gpu_leases.list().len(),
        PERSISTENT,
    );

    let running_workers = db
        .worker_status
        .list()
        .iter()
        .filter(|(_, s)| s.state == WorkerState::Running)
        .count();
    kv.set("metrics:workers:running", running_workers, PERSISTENT);

    Ok(())
}

/// Spawns the metrics updater.
pub fn setup_metrics_updater(
    db: &Database,
    kv: &KvStore,
    timers: &TimerConfig,
    token: &CancellationToken,
) -> JoinHandle<()> {
    let db = db.clone();
    let kv = kv.clone();
    spawn_periodic(
        "metricsUpdater",
        timers.metrics_update_interval(),
        db.worker_status.clone(),
        token.clone(),
        move || update_metrics(&db, &kv),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use nimbus_model::{Job, JobKind};
    use std::collections::HashMap;

    #[test]
    fn snapshot_counts_jobs_by_status() {
        let db = Database::default();
        let kv = KvStore::new();
        db.jobs
            .create(Job::new("j1", "u1", JobKind::CreateDeployment, HashMap::new()))
            .unwrap();
        db.jobs
            .create(Job::new("j2", "u1", JobKind::DeleteVm, HashMap::new()))
            .unwrap();
        db.jobs.mark_terminated("j2", "test").unwrap();

        update_metrics(&db, &kv).unwrap();

        assert_eq!(kv.get("metrics:jobs:pending").as_deref(), Some("1"));
        assert_eq!(kv.get("metrics:jobs:terminated").as_deref(), Some("1"));
        assert_eq!(kv.get("metrics:jobs:total").as_deref(), Some("2"));
        assert_eq!(kv.get("metrics:resources:deployments").as_deref(), Some("0"));
    }

    #[test]
    fn snapshot_overwrites_previous_values() {
        let db = Database::default();
        let kv = KvStore::new();

        update_metrics(&db, &kv).unwrap();
        assert_eq!(kv.get("metrics:jobs:total").as_deref(), Some("0"));

        db.jobs
            .create(Job::new("j1", "u1", JobKind::CreateVm, HashMap::new()))
            .unwrap();
        update_metrics(&db, &kv).unwrap();
        assert_eq!(kv.get("metrics:jobs:total").as_deref(), Some("1"));
    }
}
