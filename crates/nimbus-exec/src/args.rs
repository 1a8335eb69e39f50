//! Typed argument structs parsed from the generic job-arg mapping.
//!
//! Parse failure is a fatal-handler condition: the job is terminated,
//! never retried, because the args will not get better on a retry.

use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use nimbus_model::Job;

/// Parses the job's arg mapping into a typed struct.
pub fn parse_args<T: DeserializeOwned>(job: &Job) -> Result<T, serde_json::Error> {
    let map: Map<String, Value> = job
        .args
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    serde_json::from_value(Value::Object(map))
}

/// Args shared by every resource-targeting job.
#[derive(Debug, Deserialize)]
pub struct ResourceArgs {
    /// Target resource id.
    pub id: String,
}

/// Args for `update-deployment`.
#[derive(Debug, Deserialize)]
pub struct UpdateDeploymentArgs {
    /// Target deployment id.
    pub id: String,
    /// New image, if changing.
    #[serde(default)]
    pub image: Option<String>,
    /// Disable flag (set by the stale-resource cleaner).
    #[serde(default)]
    pub disabled: Option<bool>,
}

/// Args for `do-vm-action`.
#[derive(Debug, Deserialize)]
pub struct VmActionArgs {
    /// Target VM id.
    pub id: String,
    /// One of `start`, `stop`, `restart`.
    pub action: VmAction,
}

/// Lifecycle actions on a VM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VmAction {
    /// Power the VM on.
    Start,
    /// Power the VM off.
    Stop,
    /// Power-cycle the VM.
    Restart,
}

/// Args for `create-vm-user-snapshot`.
#[derive(Debug, Deserialize)]
pub struct VmSnapshotArgs {
    /// Target VM id.
    pub id: String,
    /// Snapshot name chosen by the user.
    pub name: String,
}

/// Args for `create-gpu-lease`.
#[derive(Debug, Deserialize)]
pub struct GpuLeaseArgs {
    /// Backing GPU-claim id.
    pub id: String,
    /// Lease id to create.
    pub lease_id: String,
    /// Lease duration in hours; unbounded when absent.
    #[serde(default)]
    pub duration_hours: Option<i64>,
}
