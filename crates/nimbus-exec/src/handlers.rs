//! Per-kind job handlers.
//!
//! Handlers mutate the stored resource records to reflect the desired
//! lifecycle transition. Create handlers register subsystem residue,
//! delete handlers clear it (the deletion confirmer only collapses a
//! record once every map is empty), and repair handlers stamp
//! `repaired_at`.
//!
//! Convention on missing targets: create/update/repair of a missing
//! resource terminates the job, while delete of a missing resource is
//! treated as already done.

use chrono::{Duration as ChronoDuration, Utc};
use tracing::info;
use uuid::Uuid;

use nimbus_model::{GpuLease, Job, K8sObject};
use nimbus_store::Database;

use crate::args::{
    self, GpuLeaseArgs, ResourceArgs, UpdateDeploymentArgs, VmAction, VmActionArgs,
    VmSnapshotArgs,
};
use crate::registry::JobOutcome;

fn parse<T: serde::de::DeserializeOwned>(job: &Job) -> Result<T, JobOutcome> {
    args::parse_args(job).map_err(|e| JobOutcome::Terminate(format!("bad job args: {e}")))
}

fn k8s_object(name: &str) -> K8sObject {
    K8sObject {
        id: Uuid::new_v4().to_string(),
        name: name.to_string(),
    }
}

pub fn create_deployment(db: &Database, job: &Job) -> JobOutcome {
    let args: ResourceArgs = match parse(job) {
        Ok(a) => a,
        Err(outcome) => return outcome,
    };
    let updated = db.deployments.update(&args.id, |d| {
        d.k8s.namespace = k8s_object(&format!("deploy-{}", d.meta.owner_id));
        d.k8s
            .deployment_map
            .insert(d.meta.name.clone(), k8s_object(&d.meta.name));
        d.k8s
            .service_map
            .insert(d.meta.name.clone(), k8s_object(&d.meta.name));
        d.k8s
            .ingress_map
            .insert(d.meta.name.clone(), k8s_object(&d.meta.name));
        d.harbor.project_id = 1;
        d.harbor.robot_id = 1;
        d.harbor.repository_id = 1;
        d.harbor.webhook_id = 1;
    });
    match updated {
        Ok(()) => {
            info!(id = %args.id, "deployment provisioned");
            JobOutcome::Ok
        }
        Err(_) => JobOutcome::Terminate(format!("deployment {} not found", args.id)),
    }
}

pub fn update_deployment(db: &Database, job: &Job) -> JobOutcome {
    let args: UpdateDeploymentArgs = match parse(job) {
        Ok(a) => a,
        Err(outcome) => return outcome,
    };
    let updated = db.deployments.update(&args.id, |d| {
        if let Some(image) = &args.image {
            d.image = image.clone();
        }
        if let Some(disabled) = args.disabled {
            d.disabled = disabled;
        }
    });
    match updated {
        Ok(()) => JobOutcome::Ok,
        Err(_) => JobOutcome::Terminate(format!("deployment {} not found", args.id)),
    }
}

pub fn delete_deployment(db: &Database, job: &Job) -> JobOutcome {
    let args: ResourceArgs = match parse(job) {
        Ok(a) => a,
        Err(outcome) => return outcome,
    };
    let updated = db.deployments.update(&args.id, |d| {
        d.k8s.namespace = K8sObject::default();
        d.k8s.deployment_map.clear();
        d.k8s.service_map.clear();
        d.k8s.ingress_map.clear();
        d.k8s.hpa_map.clear();
        d.k8s.secret_map.clear();
        d.harbor.project_id = 0;
        d.harbor.robot_id = 0;
        d.harbor.repository_id = 0;
        d.harbor.webhook_id = 0;
        d.meta.deleted_at = Some(Utc::now());
    });
    match updated {
        Ok(()) => {
            info!(id = %args.id, "deployment subsystems torn down");
            JobOutcome::Ok
        }
        // Already collapsed; nothing left to tear down.
        Err(_) => JobOutcome::Ok,
    }
}

pub fn repair_deployment(db: &Database, job: &Job) -> JobOutcome {
    repair_in(job, |id| {
        db.deployments.mark_repaired(id).is_ok()
    })
}

pub fn create_sm(db: &Database, job: &Job) -> JobOutcome {
    let args: ResourceArgs = match parse(job) {
        Ok(a) => a,
        Err(outcome) => return outcome,
    };
    let updated = db.sms.update(&args.id, |sm| {
        sm.k8s.namespace = k8s_object(&format!("system-{}", sm.meta.owner_id));
        sm.k8s
            .deployment_map
            .insert(sm.meta.name.clone(), k8s_object(&sm.meta.name));
        sm.k8s
            .service_map
            .insert(sm.meta.name.clone(), k8s_object(&sm.meta.name));
        sm.k8s
            .pvc_map
            .insert(sm.meta.name.clone(), k8s_object(&sm.meta.name));
    });
    match updated {
        Ok(()) => JobOutcome::Ok,
        Err(_) => JobOutcome::Terminate(format!("storage manager {} not found", args.id)),
    }
}

pub fn delete_sm(db: &Database, job: &Job) -> JobOutcome {
    let args: ResourceArgs = match parse(job) {
        Ok(a) => a,
        Err(outcome) => return outcome,
    };
    let updated = db.sms.update(&args.id, |sm| {
        sm.k8s.namespace = K8sObject::default();
        sm.k8s.deployment_map.clear();
        sm.k8s.service_map.clear();
        sm.k8s.pv_map.clear();
        sm.k8s.pvc_map.clear();
        sm.meta.deleted_at = Some(Utc::now());
    });
    match updated {
        Ok(()) => JobOutcome::Ok,
        Err(_) => JobOutcome::Ok,
    }
}

pub fn repair_sm(db: &Database, job: &Job) -> JobOutcome {
    repair_in(job, |id| db.sms.mark_repaired(id).is_ok())
}

pub fn create_vm(db: &Database, job: &Job) -> JobOutcome {
    let args: ResourceArgs = match parse(job) {
        Ok(a) => a,
        Err(outcome) => return outcome,
    };
    let updated = db.vms.update(&args.id, |vm| {
        vm.k8s.namespace = k8s_object(&format!("vm-{}", vm.meta.owner_id));
        vm.k8s
            .vm_map
            .insert(vm.meta.name.clone(), k8s_object(&vm.meta.name));
        vm.k8s
            .pvc_map
            .insert(vm.meta.name.clone(), k8s_object(&vm.meta.name));
        vm.running = true;
    });
    match updated {
        Ok(()) => {
            info!(id = %args.id, "vm provisioned");
            JobOutcome::Ok
        }
        Err(_) => JobOutcome::Terminate(format!("vm {} not found", args.id)),
    }
}

pub fn update_vm(db: &Database, job: &Job) -> JobOutcome {
    let args: ResourceArgs = match parse(job) {
        Ok(a) => a,
        Err(outcome) => return outcome,
    };
    // Port-map and spec changes land on the record before the job is
    // queued; the handler reconciles subsystem objects to match.
    let updated = db.vms.update(&args.id, |vm| {
        for (name, port) in vm.port_map.clone() {
            if port.http_proxy.is_some() && !vm.k8s.ingress_map.contains_key(&name) {
                vm.k8s.ingress_map.insert(name.clone(), k8s_object(&name));
            }
        }
    });
    match updated {
        Ok(()) => JobOutcome::Ok,
        Err(_) => JobOutcome::Terminate(format!("vm {} not found", args.id)),
    }
}

pub fn delete_vm(db: &Database, job: &Job) -> JobOutcome {
    let args: ResourceArgs = match parse(job) {
        Ok(a) => a,
        Err(outcome) => return outcome,
    };
    let updated = db.vms.update(&args.id, |vm| {
        vm.k8s.namespace = K8sObject::default();
        vm.k8s.vm_map.clear();
        vm.k8s.vm_snapshot_map.clear();
        vm.k8s.pvc_map.clear();
        vm.k8s.ingress_map.clear();
        vm.k8s.service_map.clear();
        vm.port_registrations.clear();
        vm.running = false;
        vm.meta.deleted_at = Some(Utc::now());
    });
    match updated {
        Ok(()) => JobOutcome::Ok,
        Err(_) => JobOutcome::Ok,
    }
}

pub fn repair_vm(db: &Database, job: &Job) -> JobOutcome {
    repair_in(job, |id| db.vms.mark_repaired(id).is_ok())
}

pub fn do_vm_action(db: &Database, job: &Job) -> JobOutcome {
    let args: VmActionArgs = match parse(job) {
        Ok(a) => a,
        Err(outcome) => return outcome,
    };
    let updated = db.vms.update(&args.id, |vm| {
        vm.running = match args.action {
            VmAction::Start | VmAction::Restart => true,
            VmAction::Stop => false,
        };
    });
    match updated {
        Ok(()) => {
            info!(id = %args.id, action = ?args.action, "vm action applied");
            JobOutcome::Ok
        }
        Err(_) => JobOutcome::Terminate(format!("vm {} not found", args.id)),
    }
}

pub fn create_vm_user_snapshot(db: &Database, job: &Job) -> JobOutcome {
    let args: VmSnapshotArgs = match parse(job) {
        Ok(a) => a,
        Err(outcome) => return outcome,
    };
    let updated = db.vms.update(&args.id, |vm| {
        vm.k8s
            .vm_snapshot_map
            .insert(args.name.clone(), k8s_object(&args.name));
    });
    match updated {
        Ok(()) => JobOutcome::Ok,
        Err(_) => JobOutcome::Terminate(format!("vm {} not found", args.id)),
    }
}

pub fn create_gpu_claim(db: &Database, job: &Job) -> JobOutcome {
    let args: ResourceArgs = match parse(job) {
        Ok(a) => a,
        Err(outcome) => return outcome,
    };
    let updated = db.gpu_claims.update(&args.id, |claim| {
        claim.k8s.namespace = k8s_object(&format!("gpu-{}", claim.meta.owner_id));
        claim
            .k8s
            .deployment_map
            .insert(claim.meta.name.clone(), k8s_object(&claim.meta.name));
    });
    match updated {
        Ok(()) => JobOutcome::Ok,
        Err(_) => JobOutcome::Terminate(format!("gpu claim {} not found", args.id)),
    }
}

pub fn delete_gpu_claim(db: &Database, job: &Job) -> JobOutcome {
    let args: ResourceArgs = match parse(job) {
        Ok(a) => a,
        Err(outcome) => return outcome,
    };
    let updated = db.gpu_claims.update(&args.id, |claim| {
        claim.k8s.namespace = K8sObject::default();
        claim.k8s.deployment_map.clear();
        claim.meta.deleted_at = Some(Utc::now());
    });
    match updated {
        Ok(()) => JobOutcome::Ok,
        Err(_) => JobOutcome::Ok,
    }
}

pub fn create_gpu_lease(db: &Database, job: &Job) -> JobOutcome {
    let args: GpuLeaseArgs = match parse(job) {
        Ok(a) => a,
        Err(outcome) => return outcome,
    };
    if db.gpu_claims.get(&args.id).is_none() {
        return JobOutcome::Terminate(format!("gpu claim {} not found", args.id));
    }
    let lease = GpuLease {
        id: args.lease_id.clone(),
        claim_id: args.id.clone(),
        user_id: job.user_id.clone(),
        created_at: Utc::now(),
        expires_at: args
            .duration_hours
            .map(|hours| Utc::now() + ChronoDuration::hours(hours)),
    };
    match db.gpu_leases.create(lease) {
        Ok(()) => JobOutcome::Ok,
        // Lease ids are caller-chosen; a duplicate will never succeed.
        Err(e) => JobOutcome::Terminate(e.to_string()),
    }
}

fn repair_in(job: &Job, mark: impl FnOnce(&str) -> bool) -> JobOutcome {
    let args: ResourceArgs = match parse(job) {
        Ok(a) => a,
        Err(outcome) => return outcome,
    };
    if mark(&args.id) {
        JobOutcome::Ok
    } else {
        JobOutcome::Terminate(format!("resource {} not found", args.id))
    }
}
