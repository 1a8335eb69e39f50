//! Managed resources: deployments, VMs, storage managers, GPU claims.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::activity::ActivitySet;
use crate::domain::CustomDomain;
use crate::subsystems::{HarborSubsystem, K8sSubsystem, PortRegistration};

/// The kinds of user-owned resources the control plane manages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResourceKind {
    /// Container deployment.
    Deployment,
    /// Virtual machine.
    Vm,
    /// Per-tenant storage manager.
    Sm,
    /// GPU claim.
    GpuClaim,
}

impl ResourceKind {
    /// Wire name of the kind.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Deployment => "deployment",
            Self::Vm => "vm",
            Self::Sm => "sm",
            Self::GpuClaim => "gpu-claim",
        }
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity and lifecycle metadata common to every resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceMeta {
    /// Opaque resource id.
    pub id: String,
    /// Human name, unique per kind within a tenant.
    pub name: String,
    /// Owning user id.
    pub owner_id: String,
    /// Zone the resource lives in.
    pub zone: String,
    /// API version the resource was created under.
    pub version: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last mutation time.
    pub updated_at: DateTime<Utc>,
    /// Last successful repair, if any.
    pub repaired_at: Option<DateTime<Utc>>,
    /// Set when deletion has been confirmed (soft-delete marker).
    pub deleted_at: Option<DateTime<Utc>>,
    /// Last time a user touched the resource.
    pub accessed_at: DateTime<Utc>,
    /// In-flight operations gating further work.
    #[serde(default)]
    pub activities: ActivitySet,
}

impl ResourceMeta {
    /// Creates metadata for a brand-new resource. The activity set starts
    /// with exactly `being-created`.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        owner_id: impl Into<String>,
        zone: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            name: name.into(),
            owner_id: owner_id.into(),
            zone: zone.into(),
            version: "v2".to_string(),
            created_at: now,
            updated_at: now,
            repaired_at: None,
            deleted_at: None,
            accessed_at: now,
            activities: ActivitySet::newly_created(),
        }
    }
}

/// Accessor trait tying each concrete resource to its shared metadata,
/// so repositories can be written once.
pub trait Resource: Clone + Send + Sync + 'static {
    /// The kind tag for this resource type.
    fn kind() -> ResourceKind;

    /// Shared metadata.
    fn meta(&self) -> &ResourceMeta;

    /// Mutable shared metadata.
    fn meta_mut(&mut self) -> &mut ResourceMeta;
}

/// A container deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deployment {
    /// Shared metadata.
    #[serde(flatten)]
    pub meta: ResourceMeta,
    /// Container image reference.
    pub image: String,
    /// Kubernetes residue.
    #[serde(default)]
    pub k8s: K8sSubsystem,
    /// Image-registry residue.
    #[serde(default)]
    pub harbor: HarborSubsystem,
    /// Optional custom-domain binding for the main app.
    #[serde(default)]
    pub custom_domain: Option<CustomDomain>,
    /// Disabled by the stale-resource cleaner; scaled to zero.
    #[serde(default)]
    pub disabled: bool,
}

impl Resource for Deployment {
    fn kind() -> ResourceKind {
        ResourceKind::Deployment
    }
    fn meta(&self) -> &ResourceMeta {
        &self.meta
    }
    fn meta_mut(&mut self) -> &mut ResourceMeta {
        &mut self.meta
    }
}

/// An HTTP proxy attached to a VM port, optionally carrying a
/// custom-domain binding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpProxy {
    /// Proxy name, unique per zone.
    pub name: String,
    /// Optional custom-domain binding.
    #[serde(default)]
    pub custom_domain: Option<CustomDomain>,
}

/// A single exposed VM port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VmPort {
    /// Port number inside the VM.
    pub port: u16,
    /// Transport protocol, `tcp` or `udp`.
    pub protocol: String,
    /// Optional HTTP proxy in front of this port.
    #[serde(default)]
    pub http_proxy: Option<HttpProxy>,
}

/// A virtual machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vm {
    /// Shared metadata.
    #[serde(flatten)]
    pub meta: ResourceMeta,
    /// Exposed ports keyed by port name.
    #[serde(default)]
    pub port_map: BTreeMap<String, VmPort>,
    /// Kubernetes residue (KubeVirt objects included).
    #[serde(default)]
    pub k8s: K8sSubsystem,
    /// External port registrations still held.
    #[serde(default)]
    pub port_registrations: Vec<PortRegistration>,
    /// Whether the VM should be running.
    #[serde(default)]
    pub running: bool,
}

impl Resource for Vm {
    fn kind() -> ResourceKind {
        ResourceKind::Vm
    }
    fn meta(&self) -> &ResourceMeta {
        &self.meta
    }
    fn meta_mut(&mut self) -> &mut ResourceMeta {
        &mut self.meta
    }
}

/// A per-tenant storage manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageManager {
    /// Shared metadata.
    #[serde(flatten)]
    pub meta: ResourceMeta,
    /// Kubernetes residue.
    #[serde(default)]
    pub k8s: K8sSubsystem,
}

impl Resource for StorageManager {
    fn kind() -> ResourceKind {
        ResourceKind::Sm
    }
    fn meta(&self) -> &ResourceMeta {
        &self.meta
    }
    fn meta_mut(&mut self) -> &mut ResourceMeta {
        &mut self.meta
    }
}

/// A claim on GPU capacity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GpuClaim {
    /// Shared metadata.
    #[serde(flatten)]
    pub meta: ResourceMeta,
    /// GPU group the claim draws from.
    pub gpu_group: String,
    /// Number of devices claimed.
    pub count: u32,
    /// Kubernetes residue (resource claims, templates).
    #[serde(default)]
    pub k8s: K8sSubsystem,
}

impl Resource for GpuClaim {
    fn kind() -> ResourceKind {
        ResourceKind::GpuClaim
    }
    fn meta(&self) -> &ResourceMeta {
        &self.meta
    }
    fn meta_mut(&mut self) -> &mut ResourceMeta {
        &mut self.meta
    }
}

/// A time-bounded lease granted against a GPU claim. The lease
/// synchronizer expires leases whose claim is gone or whose `expires_at`
/// has passed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GpuLease {
    /// Lease id.
    pub id: String,
    /// Backing GPU claim id.
    pub claim_id: String,
    /// Owning user id.
    pub user_id: String,
    /// When the lease was granted.
    pub created_at: DateTime<Utc>,
    /// When the lease lapses, if bounded.
    pub expires_at: Option<DateTime<Utc>>,
}
