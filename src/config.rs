use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Bar configuration stored in `<config dir>/barcore/config.json`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct BarConfig {
    #[serde(default)]
    pub modules_left: Vec<String>,
    #[serde(default)]
    pub modules_center: Vec<String>,
    #[serde(default)]
    pub modules_right: Vec<String>,
    /// Placed between adjacent module outputs in one block
    #[serde(default)]
    pub separator: String,
    /// Change notifications tolerated before an update is forced
    #[serde(default = "default_swallow_limit")]
    pub swallow_limit: usize,
    #[serde(default = "default_swallow_update_ms")]
    pub swallow_update_ms: u64,
    #[serde(default = "default_enable_ipc")]
    pub enable_ipc: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ipc_socket: Option<PathBuf>,
    /// Module sections by name. Each section carries a `type` key.
    #[serde(default)]
    pub modules: HashMap<String, serde_json::Value>,
}

fn default_swallow_limit() -> usize {
    5
}

fn default_swallow_update_ms() -> u64 {
    10
}

fn default_enable_ipc() -> bool {
    true
}

impl Default for BarConfig {
    fn default() -> Self {
        Self {
            modules_left: Vec::new(),
            modules_center: Vec::new(),
            modules_right: Vec::new(),
            separator: String::new(),
            swallow_limit: default_swallow_limit(),
            swallow_update_ms: default_swallow_update_ms(),
            enable_ipc: default_enable_ipc(),
            ipc_socket: None,
            modules: HashMap::new(),
        }
    }
}

/// Block a module is placed in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Alignment {
    Left,
    Center,
    Right,
}

impl Alignment {
    pub const ALL: [Alignment; 3] = [Alignment::Left, Alignment::Center, Alignment::Right];

    /// Write-back tag opening this block
    pub fn tag(&self) -> &'static str {
        match self {
            Alignment::Left => "%{l}",
            Alignment::Center => "%{c}",
            Alignment::Right => "%{r}",
        }
    }
}

impl BarConfig {
    /// Load and parse the configuration at `path`
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }
        let content = fs::read_to_string(path)?;
        let config = serde_json::from_str(&content)?;
        Ok(config)
    }

    pub fn swallow_update(&self) -> Duration {
        Duration::from_millis(self.swallow_update_ms)
    }

    /// Module names in bar order, each tagged with its block
    pub fn placements(&self) -> Vec<(Alignment, &str)> {
        Alignment::ALL
            .iter()
            .flat_map(|align| {
                self.modules_in(*align)
                    .iter()
                    .map(move |name| (*align, name.as_str()))
            })
            .collect()
    }

    pub fn modules_in(&self, align: Alignment) -> &[String] {
        match align {
            Alignment::Left => &self.modules_left,
            Alignment::Center => &self.modules_center,
            Alignment::Right => &self.modules_right,
        }
    }
}

/// Default configuration location
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("barcore")
        .join("config.json")
}
