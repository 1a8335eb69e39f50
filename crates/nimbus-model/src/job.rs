//! Durable job records.
//!
//! A job is the unit of asynchronous work: HTTP handlers create one,
//! an executor claims it, and the record keeps the full retry history
//! so operators can audit what happened to a resource.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::ModelError;

/// Tagged job kinds dispatched by the executor's static registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobKind {
    /// Provision a deployment and its subsystems.
    CreateDeployment,
    /// Apply a user update to a deployment.
    UpdateDeployment,
    /// Tear down a deployment's subsystems.
    DeleteDeployment,
    /// Reconcile a deployment against its desired state.
    RepairDeployment,
    /// Provision a storage manager.
    CreateSm,
    /// Tear down a storage manager.
    DeleteSm,
    /// Reconcile a storage manager.
    RepairSm,
    /// Provision a virtual machine.
    CreateVm,
    /// Apply a user update to a VM.
    UpdateVm,
    /// Tear down a VM.
    DeleteVm,
    /// Reconcile a VM.
    RepairVm,
    /// Run a lifecycle action (start/stop/restart) on a VM.
    DoVmAction,
    /// Snapshot a VM on user request.
    CreateVmUserSnapshot,
    /// Provision a GPU claim.
    CreateGpuClaim,
    /// Tear down a GPU claim.
    DeleteGpuClaim,
    /// Grant a lease against a GPU claim.
    CreateGpuLease,
}

impl JobKind {
    /// Wire name of the kind.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::CreateDeployment => "create-deployment",
            Self::UpdateDeployment => "update-deployment",
            Self::DeleteDeployment => "delete-deployment",
            Self::RepairDeployment => "repair-deployment",
            Self::CreateSm => "create-sm",
            Self::DeleteSm => "delete-sm",
            Self::RepairSm => "repair-sm",
            Self::CreateVm => "create-vm",
            Self::UpdateVm => "update-vm",
            Self::DeleteVm => "delete-vm",
            Self::RepairVm => "repair-vm",
            Self::DoVmAction => "do-vm-action",
            Self::CreateVmUserSnapshot => "create-vm-user-snapshot",
            Self::CreateGpuClaim => "create-gpu-claim",
            Self::DeleteGpuClaim => "delete-gpu-claim",
            Self::CreateGpuLease => "create-gpu-lease",
        }
    }
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of a job.
///
/// Transitions: `Pending → Running → {Completed, Failed, Terminated}`,
/// `Failed → Running` on retry. `Terminated` is absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobStatus {
    /// Waiting for an executor.
    Pending,
    /// Claimed by exactly one executor.
    Running,
    /// Finished successfully.
    Completed,
    /// Failed; eligible for retry once `run_after` passes.
    Failed,
    /// Permanently stopped; never retried.
    Terminated,
}

impl JobStatus {
    /// True for states that will never run again.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Terminated)
    }
}

/// A durable unit of asynchronous work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Unique job id (UUID).
    pub id: String,
    /// User on whose behalf the job runs.
    pub user_id: String,
    /// Dispatch tag.
    pub kind: JobKind,
    /// API version the job was created under.
    pub version: String,
    /// Handler arguments; `args["id"]` conventionally names the target
    /// resource.
    #[serde(default)]
    pub args: HashMap<String, serde_json::Value>,
    /// Lifecycle state.
    pub status: JobStatus,
    /// Number of failed attempts so far.
    pub attempts: u32,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last time an executor picked the job up.
    pub last_run_at: Option<DateTime<Utc>>,
    /// When the job reached a terminal state.
    pub finished_at: Option<DateTime<Utc>>,
    /// Earliest time the job may run.
    pub run_after: DateTime<Utc>,
    /// Append-only failure reasons.
    #[serde(default)]
    pub error_logs: Vec<String>,
}

impl Job {
    /// Creates a pending job runnable immediately.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        user_id: impl Into<String>,
        kind: JobKind,
        args: HashMap<String, serde_json::Value>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            user_id: user_id.into(),
            kind,
            version: "v2".to_string(),
            args,
            status: JobStatus::Pending,
            attempts: 0,
            created_at: now,
            last_run_at: None,
            finished_at: None,
            run_after: now,
            error_logs: Vec::new(),
        }
    }

    /// Returns the string value of `args[key]`.
    pub fn arg_str(&self, key: &str) -> Result<&str, ModelError> {
        self.args
            .get(key)
            .and_then(serde_json::Value::as_str)
            .ok_or_else(|| ModelError::InvalidArgs(format!("missing string arg '{key}'")))
    }

    /// Target resource id, i.e. `args["id"]`.
    pub fn resource_id(&self) -> Result<&str, ModelError> {
        self.arg_str("id")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(id: &str) -> HashMap<String, serde_json::Value> {
        HashMap::from([("id".to_string(), serde_json::json!(id))])
    }

    #[test]
    fn new_job_is_pending_and_runnable() {
        let job = Job::new("j1", "u1", JobKind::CreateDeployment, args("d1"));
        assert_eq!(job.status, JobStatus::Pending);
        assert!(job.run_after <= Utc::now());
        assert_eq!(job.resource_id().unwrap(), "d1");
    }

    #[test]
    fn missing_arg_is_an_error() {
        let job = Job::new("j1", "u1", JobKind::DeleteVm, HashMap::new());
        assert!(job.resource_id().is_err());
    }

    #[test]
    fn kind_round_trips_through_serde() {
        let json = serde_json::to_string(&JobKind::CreateVmUserSnapshot).unwrap();
        assert_eq!(json, "\"create-vm-user-snapshot\"");
        let back: JobKind = serde_json::from_str(&json).unwrap();
        assert_eq!(back, JobKind::CreateVmUserSnapshot);
    }

    #[test]
    fn terminal_states() {
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Terminated.is_terminal());
        assert!(!JobStatus::Failed.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
    }
}
