//! Subsystem residue mirrored onto resource documents.
//!
//! Each external system (Kubernetes cluster, image registry, port
//! registrations) leaves per-object entries on the owning resource.
//! The deletion confirmers walk these entries through their `created()`
//! predicates; a resource may only collapse once every entry is gone.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A single Kubernetes object mirrored onto a resource.
///
/// An empty `id` means the object was never created or has been
/// confirmed deleted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct K8sObject {
    /// Object UID as reported by the cluster; empty when absent.
    #[serde(default)]
    pub id: String,
    /// Object name inside its namespace.
    #[serde(default)]
    pub name: String,
}

impl K8sObject {
    /// Whether the object currently exists in the cluster's view.
    #[must_use]
    pub fn created(&self) -> bool {
        !self.id.is_empty()
    }
}

/// Kubernetes residue for a resource: one map per object kind, keyed by
/// the in-namespace object name, plus the namespace itself.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct K8sSubsystem {
    /// The namespace holding every other object.
    #[serde(default)]
    pub namespace: K8sObject,
    /// Per-app Deployments.
    #[serde(default)]
    pub deployment_map: BTreeMap<String, K8sObject>,
    /// Per-app Services.
    #[serde(default)]
    pub service_map: BTreeMap<String, K8sObject>,
    /// Per-app Ingresses.
    #[serde(default)]
    pub ingress_map: BTreeMap<String, K8sObject>,
    /// Horizontal pod autoscalers.
    #[serde(default)]
    pub hpa_map: BTreeMap<String, K8sObject>,
    /// Persistent volumes.
    #[serde(default)]
    pub pv_map: BTreeMap<String, K8sObject>,
    /// Persistent volume claims.
    #[serde(default)]
    pub pvc_map: BTreeMap<String, K8sObject>,
    /// Secrets (image-pull secrets, wildcard certs).
    #[serde(default)]
    pub secret_map: BTreeMap<String, K8sObject>,
    /// VM snapshots (VM resources only).
    #[serde(default)]
    pub vm_snapshot_map: BTreeMap<String, K8sObject>,
    /// Virtual machine objects (VM resources only).
    #[serde(default)]
    pub vm_map: BTreeMap<String, K8sObject>,
}

impl K8sSubsystem {
    /// True when no object in any map still reports `created()` and the
    /// namespace is gone.
    #[must_use]
    pub fn all_deleted(&self) -> bool {
        let maps = [
            &self.deployment_map,
            &self.service_map,
            &self.ingress_map,
            &self.hpa_map,
            &self.pv_map,
            &self.pvc_map,
            &self.secret_map,
            &self.vm_snapshot_map,
            &self.vm_map,
        ];
        maps.iter().all(|m| m.values().all(|o| !o.created())) && !self.namespace.created()
    }
}

/// Image-registry residue: Harbor project/robot/repository/webhook ids.
/// Zero means the object is gone.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HarborSubsystem {
    /// Registry project id.
    #[serde(default)]
    pub project_id: i64,
    /// Robot account id.
    #[serde(default)]
    pub robot_id: i64,
    /// Repository id.
    #[serde(default)]
    pub repository_id: i64,
    /// Webhook policy id.
    #[serde(default)]
    pub webhook_id: i64,
}

impl HarborSubsystem {
    /// True when every registry object id has been zeroed.
    #[must_use]
    pub const fn all_deleted(&self) -> bool {
        self.project_id == 0
            && self.robot_id == 0
            && self.repository_id == 0
            && self.webhook_id == 0
    }
}

/// An external port registration held by a VM.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortRegistration {
    /// Registered public port.
    pub public_port: u16,
    /// Target port inside the VM.
    pub target_port: u16,
    /// Transport protocol, `tcp` or `udp`.
    pub protocol: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_subsystem_counts_as_deleted() {
        assert!(K8sSubsystem::default().all_deleted());
        assert!(HarborSubsystem::default().all_deleted());
    }

    #[test]
    fn lingering_namespace_blocks_deletion() {
        let k8s = K8sSubsystem {
            namespace: K8sObject {
                id: "ns-uid".into(),
                name: "tenant-a".into(),
            },
            ..Default::default()
        };
        assert!(!k8s.all_deleted());
    }

    #[test]
    fn lingering_object_blocks_deletion() {
        let mut k8s = K8sSubsystem::default();
        k8s.pvc_map.insert(
            "data".into(),
            K8sObject {
                id: "pvc-uid".into(),
                name: "data".into(),
            },
        );
        assert!(!k8s.all_deleted());
    }

    #[test]
    fn nonzero_registry_id_blocks_deletion() {
        let harbor = HarborSubsystem {
            robot_id: 42,
            ..Default::default()
        };
        assert!(!harbor.all_deleted());
    }
}
