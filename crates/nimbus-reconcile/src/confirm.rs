//! Deletion confirmers.
//!
//! A resource marked `being-deleted` only has its record collapsed once
//! two conditions hold: every subsystem entry reports deleted, and no
//! related job is still live (scheduled jobs in the future do not
//! count, since the collapse also removes their target). Until then the
//! record stays as the ledger of what remains to tear down.

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use nimbus_model::{Activity, JobStatus, Resource, TimerConfig};
use nimbus_store::{Database, JobFilter, JobRepo, ResourceFilter, ResourceRepo};
use nimbus_worker::spawn_periodic;

use crate::error::ReconcileResult;

/// One confirmer pass: collapses every quiescent `being-deleted`
/// resource for which `ready` reports subsystem quiescence.
pub fn confirm_deletions<R: Resource>(
    repo: &ResourceRepo<R>,
    jobs: &JobRepo,
    ready: impl Fn(&R) -> bool,
) -> ReconcileResult<()> {
    let deleting = repo.list(&ResourceFilter::new().with_activities(&[Activity::BeingDeleted]))?;
    for resource in deleting {
        let meta = resource.meta();
        if !ready(&resource) {
            continue;
        }

        let related = JobFilter::new()
            .with_arg("id", meta.id.as_str())
            .exclude_scheduled()
            .without_status(&[JobStatus::Completed, JobStatus::Terminated]);
        if jobs.exists(&related) {
            continue;
        }

        if repo.delete(&meta.id) {
            info!(kind = %R::kind(), resource_id = %meta.id, "deletion confirmed");
        }
    }
    Ok(())
}

fn deployment_ready(d: &nimbus_model::Deployment) -> bool {
    d.k8s.all_deleted() && d.harbor.all_deleted()
}

fn vm_ready(vm: &nimbus_model::Vm) -> bool {
    vm.k8s.all_deleted() && vm.port_registrations.is_empty()
}

/// Spawns the four deletion confirmers.
pub fn setup_deletion_confirmers(
    db: &Database,
    timers: &TimerConfig,
    token: &CancellationToken,
) -> Vec<JoinHandle<()>> {
    let deployments = {
        let db = db.clone();
        spawn_periodic(
            "deploymentDeletionConfirmer",
            timers.deployment_deletion_confirm_interval(),
            db.worker_status.clone(),
            token.clone(),
            move || confirm_deletions(&db.deployments, &db.jobs, deployment_ready),
        )
    };

    let sms = {
        let db = db.clone();
        spawn_periodic(
            "smDeletionConfirmer",
            timers.sm_deletion_confirm_interval(),
            db.worker_status.clone(),
            token.clone(),
            move || confirm_deletions(&db.sms, &db.jobs, |sm| sm.k8s.all_deleted()),
        )
    };

    let vms = {
        let db = db.clone();
        spawn_periodic(
            "vmDeletionConfirmer",
            timers.vm_deletion_confirm_interval(),
            db.worker_status.clone(),
            token.clone(),
            move || confirm_deletions(&db.vms, &db.jobs, vm_ready),
        )
    };

    let gpu_claims = {
        let db = db.clone();
        spawn_periodic(
            "gpuClaimDeletionConfirmer",
            timers.gpu_claim_deletion_confirm_interval(),
            db.worker_status.clone(),
            token.clone(),
            move || confirm_deletions(&db.gpu_claims, &db.jobs, |c| c.k8s.all_deleted()),
        )
    };

    vec![deployments, sms, vms, gpu_claims]
}
