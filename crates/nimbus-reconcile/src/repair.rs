//! Repair schedulers.
//!
//! Each pass lists idle resources of one kind and enqueues a repair job
//! per resource, scheduled `interval + rand(0..interval)` into the
//! future so a fleet of resources never repairs in lockstep. A resource
//! that already has a live repair job is skipped.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use rand::Rng;
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

use nimbus_model::{JobKind, JobStatus, Resource, TimerConfig};
use nimbus_store::{Database, JobFilter, JobRepo, ResourceFilter, ResourceRepo};
use nimbus_worker::spawn_periodic;

use crate::error::ReconcileResult;

/// One scheduler pass for one resource kind.
pub fn schedule_repairs<R: Resource>(
    repo: &ResourceRepo<R>,
    jobs: &JobRepo,
    kind: JobKind,
    interval: Duration,
) -> ReconcileResult<()> {
    let idle = repo.list(&ResourceFilter::new().with_no_activities())?;
    for resource in idle {
        let meta = resource.meta();
        let dup = JobFilter::new()
            .with_kinds(&[kind])
            .without_status(&[JobStatus::Completed, JobStatus::Terminated])
            .with_arg("id", meta.id.as_str());
        if jobs.exists(&dup) {
            continue;
        }

        let base = interval.as_secs().max(1);
        let spread = rand::thread_rng().gen_range(0..base);
        let offset = i64::try_from(base + spread).unwrap_or(i64::MAX);
        let run_after = Utc::now() + ChronoDuration::seconds(offset);

        let args = HashMap::from([("id".to_string(), Value::from(meta.id.clone()))]);
        jobs.create_scheduled(
            Uuid::new_v4().to_string(),
            meta.owner_id.clone(),
            kind,
            run_after,
            args,
        )?;
        debug!(kind = %kind, resource_id = %meta.id, %run_after, "scheduled repair");
    }
    Ok(())
}

/// Spawns the three repair schedulers.
pub fn setup_repair_schedulers(
    db: &Database,
    timers: &TimerConfig,
    token: &CancellationToken,
) -> Vec<JoinHandle<()>> {
    let deployments = {
        let db = db.clone();
        let interval = timers.deployment_repair_interval();
        spawn_periodic(
            "deploymentRepairer",
            interval,
            db.worker_status.clone(),
            token.clone(),
            move || {
                schedule_repairs(
                    &db.deployments,
                    &db.jobs,
                    JobKind::RepairDeployment,
                    interval,
                )
            },
        )
    };

    let sms = {
        let db = db.clone();
        let interval = timers.sm_repair_interval();
        spawn_periodic(
            "smRepairer",
            interval,
            db.worker_status.clone(),
            token.clone(),
            move || schedule_repairs(&db.sms, &db.jobs, JobKind::RepairSm, interval),
        )
    };

    let vms = {
        let db = db.clone();
        let interval = timers.vm_repair_interval();
        spawn_periodic(
            "vmRepairer",
            interval,
            db.worker_status.clone(),
            token.clone(),
            move || schedule_repairs(&db.vms, &db.jobs, JobKind::RepairVm, interval),
        )
    };

    vec![deployments, sms, vms]
}
