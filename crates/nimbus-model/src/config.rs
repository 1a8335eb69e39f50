//! Zone and cadence configuration shared by the worker fabric.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// What a zone is able to host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ZoneCapability {
    /// Container deployments (and therefore pod log streaming).
    Deployment,
    /// Virtual machines.
    Vm,
    /// Dynamic resource allocation (GPUs).
    Dra,
}

/// A geographic deployment zone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Zone {
    /// Zone name, e.g. `se-flem`.
    pub name: String,
    /// Disabled zones are skipped by every worker.
    pub enabled: bool,
    /// Capability set.
    #[serde(default)]
    pub capabilities: Vec<ZoneCapability>,
    /// Parent domain for deployments in this zone.
    #[serde(default)]
    pub deployment_domain: Option<String>,
    /// Parent domain for VM proxies in this zone.
    #[serde(default)]
    pub vm_domain: Option<String>,
}

impl Zone {
    /// Whether the zone advertises the given capability.
    #[must_use]
    pub fn has_capability(&self, capability: ZoneCapability) -> bool {
        self.capabilities.contains(&capability)
    }
}

/// Intervals for every periodic worker, in seconds.
///
/// Defaults mirror a small installation; production deployments override
/// them from the config file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimerConfig {
    /// Pending-job claim cadence.
    pub job_fetch: u64,
    /// Failed-job claim cadence.
    pub failed_job_fetch: u64,
    /// Deployment repair-scheduler cadence.
    pub deployment_repair: u64,
    /// Storage-manager repair-scheduler cadence.
    pub sm_repair: u64,
    /// VM repair-scheduler cadence.
    pub vm_repair: u64,
    /// Deployment deletion-confirmer cadence.
    pub deployment_deletion_confirm: u64,
    /// Storage-manager deletion-confirmer cadence.
    pub sm_deletion_confirm: u64,
    /// VM deletion-confirmer cadence.
    pub vm_deletion_confirm: u64,
    /// GPU-claim deletion-confirmer cadence.
    pub gpu_claim_deletion_confirm: u64,
    /// Custom-domain confirmer cadence.
    pub custom_domain_confirm: u64,
    /// Metrics snapshot cadence.
    pub metrics_update: u64,
    /// Stale-resource cleaner cadence.
    pub stale_resource_cleanup: u64,
    /// GPU-lease synchronizer cadence.
    pub gpu_lease_synchronize: u64,
    /// Pod liveness-key TTL for the log supervisor.
    pub logger_lifetime: u64,
    /// Ownership-refresh cadence for log streams.
    pub logger_update: u64,
    /// Pod synchronizer cadence for the log supervisor control role.
    pub logger_synchronize: u64,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            job_fetch: 1,
            failed_job_fetch: 5,
            deployment_repair: 3600,
            sm_repair: 3600,
            vm_repair: 3600,
            deployment_deletion_confirm: 5,
            sm_deletion_confirm: 5,
            vm_deletion_confirm: 5,
            gpu_claim_deletion_confirm: 5,
            custom_domain_confirm: 30,
            metrics_update: 60,
            stale_resource_cleanup: 3600,
            gpu_lease_synchronize: 60,
            logger_lifetime: 10,
            logger_update: 5,
            logger_synchronize: 30,
        }
    }
}

macro_rules! timer_accessors {
    ($($(#[$doc:meta])* $fn_name:ident => $field:ident),* $(,)?) => {
        impl TimerConfig {
            $(
                $(#[$doc])*
                #[must_use]
                pub const fn $fn_name(&self) -> Duration {
                    Duration::from_secs(self.$field)
                }
            )*
        }
    };
}

timer_accessors! {
    /// Pending-job claim cadence.
    job_fetch_interval => job_fetch,
    /// Failed-job claim cadence.
    failed_job_fetch_interval => failed_job_fetch,
    /// Deployment repair-scheduler cadence.
    deployment_repair_interval => deployment_repair,
    /// Storage-manager repair-scheduler cadence.
    sm_repair_interval => sm_repair,
    /// VM repair-scheduler cadence.
    vm_repair_interval => vm_repair,
    /// Deployment deletion-confirmer cadence.
    deployment_deletion_confirm_interval => deployment_deletion_confirm,
    /// Storage-manager deletion-confirmer cadence.
    sm_deletion_confirm_interval => sm_deletion_confirm,
    /// VM deletion-confirmer cadence.
    vm_deletion_confirm_interval => vm_deletion_confirm,
    /// GPU-claim deletion-confirmer cadence.
    gpu_claim_deletion_confirm_interval => gpu_claim_deletion_confirm,
    /// Custom-domain confirmer cadence.
    custom_domain_confirm_interval => custom_domain_confirm,
    /// Metrics snapshot cadence.
    metrics_update_interval => metrics_update,
    /// Stale-resource cleaner cadence.
    stale_resource_cleanup_interval => stale_resource_cleanup,
    /// GPU-lease synchronizer cadence.
    gpu_lease_synchronize_interval => gpu_lease_synchronize,
    /// Pod liveness-key TTL for the log supervisor.
    logger_lifetime => logger_lifetime,
    /// Ownership-refresh cadence for log streams.
    logger_update_interval => logger_update,
    /// Pod synchronizer cadence for the log supervisor control role.
    logger_synchronize_interval => logger_synchronize,
}

/// Inactivity thresholds after which the cleaner disables resources.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Lifetimes {
    /// Seconds of inactivity before a deployment is disabled.
    pub deployment: u64,
    /// Seconds of inactivity before a VM is stopped.
    pub vm: u64,
}

impl Default for Lifetimes {
    fn default() -> Self {
        // 90 days
        Self {
            deployment: 90 * 24 * 3600,
            vm: 90 * 24 * 3600,
        }
    }
}

impl Lifetimes {
    /// Deployment inactivity threshold.
    #[must_use]
    pub const fn deployment_lifetime(&self) -> Duration {
        Duration::from_secs(self.deployment)
    }

    /// VM inactivity threshold.
    #[must_use]
    pub const fn vm_lifetime(&self) -> Duration {
        Duration::from_secs(self.vm)
    }
}
