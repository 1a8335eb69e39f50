//! Stale-resource cleanup.
//!
//! Resources untouched for longer than their lifetime are powered
//! down, not deleted: deployments get an `update-deployment` job with
//! `disabled: true`, VMs a `do-vm-action` stop. Resources in disabled
//! zones are left alone, and a resource that already has a live
//! power-down job is skipped.

use std::collections::HashMap;

use chrono::{Duration as ChronoDuration, Utc};
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;
use uuid::Uuid;

use nimbus_model::{JobKind, JobStatus, Lifetimes, TimerConfig, Zone};
use nimbus_store::{Database, JobFilter, ResourceFilter};
use nimbus_worker::spawn_periodic;

use crate::error::ReconcileResult;

fn zone_enabled(zones: &[Zone], name: &str) -> bool {
    zones.iter().any(|z| z.name == name && z.enabled)
}

fn has_live_job(db: &Database, kind: JobKind, resource_id: &str) -> bool {
    let dup = JobFilter::new()
        .with_kinds(&[kind])
        .without_status(&[JobStatus::Completed, JobStatus::Terminated])
        .with_arg("id", resource_id);
    db.jobs.exists(&dup)
}

/// One cleaner pass over deployments and VMs.
pub fn clean_stale_resources(
    db: &Database,
    zones: &[Zone],
    lifetimes: &Lifetimes,
) -> ReconcileResult<()> {
    let now = Utc::now();

    let deployment_cutoff = now
        - ChronoDuration::from_std(lifetimes.deployment_lifetime())
            .unwrap_or_else(|_| ChronoDuration::days(90));
    let stale = db.deployments.list(
        &ResourceFilter::new()
            .with_no_activities()
            .last_accessed_before(deployment_cutoff),
    )?;
    for deployment in stale {
        if deployment.disabled || !zone_enabled(zones, &deployment.meta.zone) {
            continue;
        }
        if has_live_job(db, JobKind::UpdateDeployment, &deployment.meta.id) {
            continue;
        }
        let args = HashMap::from([
            ("id".to_string(), Value::from(deployment.meta.id.clone())),
            ("disabled".to_string(), Value::from(true)),
        ]);
        db.jobs.create_scheduled(
            Uuid::new_v4().to_string(),
            deployment.meta.owner_id.clone(),
            JobKind::UpdateDeployment,
            now,
            args,
        )?;
        info!(resource_id = %deployment.meta.id,
            last_accessed = %deployment.meta.accessed_at, "disabling stale deployment");
    }

    let vm_cutoff = now
        - ChronoDuration::from_std(lifetimes.vm_lifetime())
            .unwrap_or_else(|_| ChronoDuration::days(90));
    let stale = db.vms.list(
        &ResourceFilter::new()
            .with_no_activities()
            .last_accessed_before(vm_cutoff),
    )?;
    for vm in stale {
        if !vm.running || !zone_enabled(zones, &vm.meta.zone) {
            continue;
        }
        if has_live_job(db, JobKind::DoVmAction, &vm.meta.id) {
            continue;
        }
        let args = HashMap::from([
            ("id".to_string(), Value::from(vm.meta.id.clone())),
            ("action".to_string(), Value::from("stop")),
        ]);
        db.jobs.create_scheduled(
            Uuid::new_v4().to_string(),
            vm.meta.owner_id.clone(),
            JobKind::DoVmAction,
            now,
            args,
        )?;
        info!(resource_id = %vm.meta.id,
            last_accessed = %vm.meta.accessed_at, "stopping stale vm");
    }

    Ok(())
}

/// Spawns the stale-resource cleaner.
pub fn setup_stale_resource_cleaner(
    db: &Database,
    zones: Vec<Zone>,
    lifetimes: Lifetimes,
    timers: &TimerConfig,
    token: &CancellationToken,
) -> JoinHandle<()> {
    let db = db.clone();
    spawn_periodic(
        "staleResourceCleaner",
        timers.stale_resource_cleanup_interval(),
        db.worker_status.clone(),
        token.clone(),
        move || clean_stale_resources(&db, &zones, &lifetimes),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use nimbus_model::{Activity, Deployment, ResourceMeta, Vm};

    fn zones() -> Vec<Zone> {
        vec![
            Zone {
                name: "se-flem".into(),
                enabled: true,
                capabilities: Vec::new(),
                deployment_domain: None,
                vm_domain: None,
            },
            Zone {
                name: "se-kista".into(),
                enabled: false,
                capabilities: Vec::new(),
                deployment_domain: None,
                vm_domain: None,
            },
        ]
    }

    fn stale_deployment(id: &str, name: &str, zone: &str) -> Deployment {
        let mut d = Deployment {
            meta: ResourceMeta::new(id, name, "u1", zone),
            image: "nginx:latest".into(),
            k8s: Default::default(),
            harbor: Default::default(),
            custom_domain: None,
            disabled: false,
        };
        d.meta.activities.remove(Activity::BeingCreated);
        d.meta.accessed_at = Utc::now() - ChronoDuration::days(120);
        d
    }

    fn stale_vm(id: &str, zone: &str) -> Vm {
        let mut vm = Vm {
            meta: ResourceMeta::new(id, "box", "u1", zone),
            port_map: Default::default(),
            k8s: Default::default(),
            port_registrations: Vec::new(),
            running: true,
        };
        vm.meta.activities.remove(Activity::BeingCreated);
        vm.meta.accessed_at = Utc::now() - ChronoDuration::days(120);
        vm
    }

    #[test]
    fn stale_deployment_gets_disable_job() {
        let db = Database::default();
        db.deployments
            .create(stale_deployment("d1", "web", "se-flem"))
            .unwrap();

        clean_stale_resources(&db, &zones(), &Lifetimes::default()).unwrap();

        let jobs = db
            .jobs
            .list(&JobFilter::new().with_kinds(&[JobKind::UpdateDeployment]));
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].resource_id().unwrap(), "d1");
        assert_eq!(jobs[0].args["disabled"], Value::from(true));
    }

    #[test]
    fn recently_accessed_resources_are_left_alone() {
        let db = Database::default();
        let mut fresh = stale_deployment("d1", "web", "se-flem");
        fresh.meta.accessed_at = Utc::now();
        db.deployments.create(fresh).unwrap();

        clean_stale_resources(&db, &zones(), &Lifetimes::default()).unwrap();
        assert_eq!(db.jobs.count(&JobFilter::new()), 0);
    }

    #[test]
    fn disabled_zone_is_skipped() {
        let db = Database::default();
        db.deployments
            .create(stale_deployment("d1", "web", "se-kista"))
            .unwrap();
        db.vms.create(stale_vm("v1", "se-kista")).unwrap();

        clean_stale_resources(&db, &zones(), &Lifetimes::default()).unwrap();
        assert_eq!(db.jobs.count(&JobFilter::new()), 0);
    }

    #[test]
    fn stale_vm_gets_stop_action() {
        let db = Database::default();
        db.vms.create(stale_vm("v1", "se-flem")).unwrap();

        clean_stale_resources(&db, &zones(), &Lifetimes::default()).unwrap();

        let jobs = db
            .jobs
            .list(&JobFilter::new().with_kinds(&[JobKind::DoVmAction]));
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].args["action"], Value::from("stop"));
    }

    #[test]
    fn already_stopped_vm_is_skipped() {
        let db = Database::default();
        let mut vm = stale_vm("v1", "se-flem");
        vm.running = false;
        db.vms.create(vm).unwrap();

        clean_stale_resources(&db, &zones(), &Lifetimes::default()).unwrap();
        assert_eq!(db.jobs.count(&JobFilter::new()), 0);
    }

    #[test]
    fn repeated_passes_do_not_stack_jobs() {
        let db = Database::default();
        db.deployments
            .create(stale_deployment("d1", "web", "se-flem"))
            .unwrap();

        clean_stale_resources(&db, &zones(), &Lifetimes::default()).unwrap();
        clean_stale_resources(&db, &zones(), &Lifetimes::default()).unwrap();
        assert_eq!(db.jobs.count(&JobFilter::new()), 1);
    }
}
