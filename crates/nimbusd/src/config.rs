//! Daemon configuration, loaded from a JSON file.

use std::fs;
use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use nimbus_model::{Lifetimes, TimerConfig, Zone, ZoneCapability};

/// Everything the daemon needs to run. Every field has a default, so
/// an empty JSON object is a valid config.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FabricConfig {
    /// Zones this installation serves.
    pub zones: Vec<Zone>,
    /// Worker cadences.
    pub timers: TimerConfig,
    /// Inactivity thresholds for the stale-resource cleaner.
    pub lifetimes: Lifetimes,
    /// Subdomain queried for custom-domain TXT verification.
    pub custom_domain_txt_subdomain: String,
    /// Identity used for log-stream ownership keys. Defaults to the
    /// system hostname.
    pub hostname: Option<String>,
}

impl Default for FabricConfig {
    fn default() -> Self {
        Self {
            zones: vec![Zone {
                name: "local".to_string(),
                enabled: true,
                capabilities: vec![
                    ZoneCapability::Deployment,
                    ZoneCapability::Vm,
                    ZoneCapability::Dra,
                ],
                deployment_domain: Some("apps.localhost".to_string()),
                vm_domain: Some("vm.localhost".to_string()),
            }],
            timers: TimerConfig::default(),
            lifetimes: Lifetimes::default(),
            custom_domain_txt_subdomain: "_nimbus".to_string(),
            hostname: None,
        }
    }
}

impl FabricConfig {
    /// Loads config from a JSON file.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("parsing config from {}", path.display()))
    }

    /// Writes config to a JSON file.
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let raw = serde_json::to_string_pretty(self)?;
        fs::write(path, raw).with_context(|| format!("writing config to {}", path.display()))?;
        Ok(())
    }

    /// Resolved worker identity.
    #[must_use]
    pub fn resolved_hostname(&self) -> String {
        self.hostname.clone().unwrap_or_else(|| {
            hostname::get()
                .map(|h| h.to_string_lossy().to_string())
                .unwrap_or_else(|_| "unknown".to_string())
        })
    }
}
