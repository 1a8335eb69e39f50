//! The static job-dispatch registry.
//!
//! Every [`JobKind`] maps to a definition holding the handler plus
//! optional entry/exit hooks and a terminate predicate. Hooks manage
//! activity flags; the terminate predicate lets the system gracefully
//! drop work whose target has already gone away (e.g. a repair job for
//! a deployment that is now being deleted).

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;

use nimbus_model::{Activity, Job, JobKind};
use nimbus_store::{Database, StoreError};

use crate::handlers;

/// Outcome classification a handler reports for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    /// The job finished; mark it completed.
    Ok,
    /// Transient failure; retry after backoff.
    Fail(String),
    /// Unrecoverable; terminate, never retry.
    Terminate(String),
}

/// Error from an entry/exit hook or terminate predicate. Hook failure
/// terminates the job.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct HookError(pub String);

/// A job handler: runs against the database handle and the claimed job.
pub type Handler = Arc<dyn Fn(&Database, &Job) -> JobOutcome + Send + Sync>;
/// An entry or exit hook.
pub type Hook = Arc<dyn Fn(&Database, &Job) -> Result<(), HookError> + Send + Sync>;
/// Decides whether the job should be gracefully terminated before running.
pub type TerminatePredicate =
    Arc<dyn Fn(&Database, &Job) -> Result<bool, HookError> + Send + Sync>;

/// Everything the runner needs to execute one job kind.
#[derive(Clone)]
pub struct JobDefinition {
    /// The handler itself.
    pub run: Handler,
    /// Runs before the handler; typically starts an activity.
    pub entry: Option<Hook>,
    /// Runs after the handler regardless of outcome; typically clears
    /// an activity.
    pub exit: Option<Hook>,
    /// Checked before anything else; true means terminate gracefully.
    pub should_terminate: Option<TerminatePredicate>,
}

impl JobDefinition {
    fn new(run: Handler) -> Self {
        Self {
            run,
            entry: None,
            exit: None,
            should_terminate: None,
        }
    }

    fn with_entry(mut self, hook: Hook) -> Self {
        self.entry = Some(hook);
        self
    }

    fn with_exit(mut self, hook: Hook) -> Self {
        self.exit = Some(hook);
        self
    }

    fn with_terminate(mut self, predicate: TerminatePredicate) -> Self {
        self.should_terminate = Some(predicate);
        self
    }
}

/// The kind → definition table. Built once at startup and shared.
#[derive(Clone)]
pub struct Registry {
    defs: HashMap<JobKind, JobDefinition>,
}

macro_rules! handler {
    ($f:path) => {
        Arc::new(|db: &Database, job: &Job| $f(db, job)) as Handler
    };
}

impl Registry {
    /// Builds the standard production registry covering every kind.
    #[must_use]
    pub fn standard() -> Self {
        let mut defs = HashMap::new();

        // Deployments
        defs.insert(
            JobKind::CreateDeployment,
            JobDefinition::new(handler!(handlers::create_deployment))
                .with_entry(ensure_deployment_activity(Activity::BeingCreated))
                .with_exit(clear_deployment_activity(Activity::BeingCreated))
                .with_terminate(deployment_gone()),
        );
        defs.insert(
            JobKind::UpdateDeployment,
            JobDefinition::new(handler!(handlers::update_deployment))
                .with_entry(ensure_deployment_activity(Activity::Updating))
                .with_exit(clear_deployment_activity(Activity::Updating))
                .with_terminate(deployment_gone()),
        );
        defs.insert(
            JobKind::DeleteDeployment,
            JobDefinition::new(handler!(handlers::delete_deployment))
                .with_entry(ensure_deployment_activity(Activity::BeingDeleted)),
        );
        defs.insert(
            JobKind::RepairDeployment,
            JobDefinition::new(handler!(handlers::repair_deployment))
                .with_entry(ensure_deployment_activity(Activity::Repairing))
                .with_exit(clear_deployment_activity(Activity::Repairing))
                .with_terminate(deployment_gone()),
        );

        // Storage managers
        defs.insert(
            JobKind::CreateSm,
            JobDefinition::new(handler!(handlers::create_sm)),
        );
        defs.insert(
            JobKind::DeleteSm,
            JobDefinition::new(handler!(handlers::delete_sm)),
        );
        defs.insert(
            JobKind::RepairSm,
            JobDefinition::new(handler!(handlers::repair_sm)),
        );

        // VMs
        defs.insert(
            JobKind::CreateVm,
            JobDefinition::new(handler!(handlers::create_vm))
                .with_entry(ensure_vm_activity(Activity::BeingCreated))
                .with_exit(clear_vm_activity(Activity::BeingCreated))
                .with_terminate(vm_gone()),
        );
        defs.insert(
            JobKind::UpdateVm,
            JobDefinition::new(handler!(handlers::update_vm))
                .with_entry(ensure_vm_activity(Activity::Updating))
                .with_exit(clear_vm_activity(Activity::Updating))
                .with_terminate(vm_gone()),
        );
        defs.insert(
            JobKind::DeleteVm,
            JobDefinition::new(handler!(handlers::delete_vm))
                .with_entry(ensure_vm_activity(Activity::BeingDeleted)),
        );
        defs.insert(
            JobKind::RepairVm,
            JobDefinition::new(handler!(handlers::repair_vm))
                .with_entry(ensure_vm_activity(Activity::Repairing))
                .with_exit(clear_vm_activity(Activity::Repairing))
                .with_terminate(vm_gone()),
        );
        defs.insert(
            JobKind::DoVmAction,
            JobDefinition::new(handler!(handlers::do_vm_action)).with_terminate(vm_gone()),
        );
        defs.insert(
            JobKind::CreateVmUserSnapshot,
            JobDefinition::new(handler!(handlers::create_vm_user_snapshot))
                .with_terminate(vm_gone()),
        );

        // GPU claims and leases
        defs.insert(
            JobKind::CreateGpuClaim,
            JobDefinition::new(handler!(handlers::create_gpu_claim)),
        );
        defs.insert(
            JobKind::DeleteGpuClaim,
            JobDefinition::new(handler!(handlers::delete_gpu_claim)),
        );
        defs.insert(
            JobKind::CreateGpuLease,
            JobDefinition::new(handler!(handlers::create_gpu_lease)),
        );

        Self { defs }
    }

    /// Looks up the definition for a kind.
    #[must_use]
    pub fn get(&self, kind: JobKind) -> Option<&JobDefinition> {
        self.defs.get(&kind)
    }

    /// Replaces or adds a definition. Tests use this to observe runs.
    pub fn register(&mut self, kind: JobKind, def: JobDefinition) {
        self.defs.insert(kind, def);
    }

    /// Builds a definition from a bare handler, for tests and tools.
    #[must_use]
    pub fn definition(run: Handler) -> JobDefinition {
        JobDefinition::new(run)
    }
}

// A missing record is not a hook failure: delete jobs on an absent
// resource must still reach their handler, which treats them as done.
fn ensure_deployment_activity(activity: Activity) -> Hook {
    Arc::new(move |db: &Database, job: &Job| {
        let id = job.resource_id().map_err(|e| HookError(e.to_string()))?;
        match db.deployments.ensure_activity(id, activity) {
            Ok(()) | Err(StoreError::NotFound(_)) => Ok(()),
            Err(e) => Err(HookError(e.to_string())),
        }
    })
}

fn clear_deployment_activity(activity: Activity) -> Hook {
    Arc::new(move |db: &Database, job: &Job| {
        let id = job.resource_id().map_err(|e| HookError(e.to_string()))?;
        db.deployments.remove_activity(id, activity);
        Ok(())
    })
}

fn ensure_vm_activity(activity: Activity) -> Hook {
    Arc::new(move |db: &Database, job: &Job| {
        let id = job.resource_id().map_err(|e| HookError(e.to_string()))?;
        match db.vms.ensure_activity(id, activity) {
            Ok(()) | Err(StoreError::NotFound(_)) => Ok(()),
            Err(e) => Err(HookError(e.to_string())),
        }
    })
}

fn clear_vm_activity(activity: Activity) -> Hook {
    Arc::new(move |db: &Database, job: &Job| {
        let id = job.resource_id().map_err(|e| HookError(e.to_string()))?;
        db.vms.remove_activity(id, activity);
        Ok(())
    })
}

/// Graceful-terminate predicate: the deployment is gone or on its way
/// out, so non-deletion work is pointless.
fn deployment_gone() -> TerminatePredicate {
    Arc::new(|db: &Database, job: &Job| {
        let id = job.resource_id().map_err(|e| HookError(e.to_string()))?;
        Ok(match db.deployments.get(id) {
            None => true,
            Some(d) => d.meta.activities.contains(Activity::BeingDeleted),
        })
    })
}

fn vm_gone() -> TerminatePredicate {
    Arc::new(|db: &Database, job: &Job| {
        let id = job.resource_id().map_err(|e| HookError(e.to_string()))?;
        Ok(match db.vms.get(id) {
            None => true,
            Some(vm) => vm.meta.activities.contains(Activity::BeingDeleted),
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_registry_covers_every_kind() {
        let registry = Registry::standard();
        for kind in [
            JobKind::CreateDeployment,
            JobKind::UpdateDeployment,
            JobKind::DeleteDeployment,
            JobKind::RepairDeployment,
            JobKind::CreateSm,
            JobKind::DeleteSm,
            JobKind::RepairSm,
            JobKind::CreateVm,
            JobKind::UpdateVm,
            JobKind::DeleteVm,
            JobKind::RepairVm,
            JobKind::DoVmAction,
            JobKind::CreateVmUserSnapshot,
            JobKind::CreateGpuClaim,
            JobKind::DeleteGpuClaim,
            JobKind::CreateGpuLease,
        ] {
            assert!(registry.get(kind).is_some(), "missing handler for {kind}");
        }
    }

    #[test]
    fn delete_entry_hook_tolerates_missing_resource() {
        let registry = Registry::standard();
        let db = Database::default();
        let args = std::collections::HashMap::from([(
            "id".to_string(),
            serde_json::Value::from("ghost"),
        )]);
        let job = Job::new("j1", "u1", JobKind::DeleteVm, args);

        let entry = registry.get(JobKind::DeleteVm).unwrap().entry.clone().unwrap();
        assert!(entry(&db, &job).is_ok());
    }

    #[test]
    fn delete_jobs_have_no_exit_hook() {
        let registry = Registry::standard();
        // being-deleted stays registered until the confirmer collapses
        // the record.
        assert!(registry.get(JobKind::DeleteDeployment).unwrap().exit.is_none());
        assert!(registry.get(JobKind::DeleteVm).unwrap().exit.is_none());
    }
}
