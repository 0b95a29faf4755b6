use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::types::IfaceFlags;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IfaceConfig {
    #[serde(default = "default_discovery_delay")]
    pub discovery_delay_ms: u64,
    #[serde(default = "default_prefix_store_path")]
    pub prefix_store_path: String,
    #[serde(default = "default_state_dir")]
    pub state_dir: String,
    #[serde(default = "default_carrier_poll")]
    pub carrier_poll_secs: u64,
    #[serde(default)]
    pub interfaces: Vec<InterfaceEntry>,
}

/// An interface created at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterfaceEntry {
    pub name: String,
    /// OS device to manage. Empty means observe only.
    #[serde(default)]
    pub handle: String,
    #[serde(default)]
    pub flags: IfaceFlags,
}

fn default_discovery_delay() -> u64 {
    2000
}
fn default_prefix_store_path() -> String {
    "/var/lib/server-dashboard/iface-prefixes.json".to_string()
}
fn default_state_dir() -> String {
    "/run/hr-iface".to_string()
}
fn default_carrier_poll() -> u64 {
    5
}

impl Default for IfaceConfig {
    fn default() -> Self {
        serde_json::from_str("{}").unwrap()
    }
}

impl IfaceConfig {
    pub fn discovery_delay(&self) -> Duration {
        Duration::from_millis(self.discovery_delay_ms)
    }

    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;
        let config: IfaceConfig = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config from {}", path.display()))?;
        Ok(config)
    }

    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        let tmp_path = path.with_extension("json.tmp");
        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("Failed to write config to {}", tmp_path.display()))?;
        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("Failed to rename config to {}", path.display()))?;
        Ok(())
    }
}
