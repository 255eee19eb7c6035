use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::supervisor::bridge::origin_of;

pub fn config_file() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_default()
        .join(".config")
        .join("popwatch")
        .join("config.toml")
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
#[serde(deny_unknown_fields)]
pub struct SupervisorSettings {
    /// Watchdog period in milliseconds.
    #[serde(default = "default_poll_ms")]
    pub poll_ms: u64,
    /// How long the popup may stay inaccessible before it is recreated.
    /// Zero recreates it on the first inaccessible tick.
    #[serde(default)]
    pub lost_after_ms: u64,
    /// Only accept popup messages from this origin. Unset (or `*`) accepts
    /// every origin; filtering is then up to the host.
    #[serde(default)]
    pub target_origin: Option<String>,
    /// Further origins accepted in addition to `target_origin`.
    #[serde(default)]
    pub allowed_origins: Vec<String>,
    /// Log per-tick and per-message diagnostics.
    #[serde(default = "no")]
    pub debug: bool,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            poll_ms: default_poll_ms(),
            lost_after_ms: 0,
            target_origin: None,
            allowed_origins: Vec::new(),
            debug: false,
        }
    }
}

impl SupervisorSettings {
    pub fn poll_interval(&self) -> Duration { Duration::from_millis(self.poll_ms.max(1)) }

    pub fn validate(&self) -> Vec<String> {
        let mut issues = Vec::new();

        if self.poll_ms == 0 {
            issues.push("supervisor.poll_ms must be positive, got 0".to_string());
        }

        if self.lost_after_ms > 0 && self.lost_after_ms < self.poll_ms {
            issues.push(format!(
                "supervisor.lost_after_ms ({}) is shorter than poll_ms ({}); use 0 to recover on the first inaccessible tick",
                self.lost_after_ms, self.poll_ms
            ));
        }

        if let Some(target) = &self.target_origin
            && target != "*"
            && origin_of(target) != Some(target.as_str())
        {
            issues.push(format!(
                "supervisor.target_origin must look like scheme://host[:port] or be \"*\", got {target:?}"
            ));
        }

        for (i, origin) in self.allowed_origins.iter().enumerate() {
            if origin_of(origin) != Some(origin.as_str()) {
                issues.push(format!(
                    "supervisor.allowed_origins[{i}] must look like scheme://host[:port], got {origin:?}"
                ));
            }
        }

        issues
    }
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
#[serde(deny_unknown_fields)]
pub struct CompanionSettings {
    /// Whether the companion posts its geometry periodically.
    #[serde(default = "yes")]
    pub report_ui_state: bool,
    #[serde(default = "default_sync_interval_ms")]
    pub sync_interval_ms: u64,
}

impl Default for CompanionSettings {
    fn default() -> Self {
        Self {
            report_ui_state: true,
            sync_interval_ms: default_sync_interval_ms(),
        }
    }
}

impl CompanionSettings {
    pub fn sync_interval(&self) -> Duration { Duration::from_millis(self.sync_interval_ms.max(1)) }

    pub fn validate(&self) -> Vec<String> {
        let mut issues = Vec::new();
        if self.report_ui_state && self.sync_interval_ms == 0 {
            issues.push("companion.sync_interval_ms must be positive, got 0".to_string());
        }
        issues
    }
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Clone, Default)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub supervisor: SupervisorSettings,
    #[serde(default)]
    pub companion: CompanionSettings,
}

fn yes() -> bool { true }

fn no() -> bool { false }

fn default_poll_ms() -> u64 { 250 }

fn default_sync_interval_ms() -> u64 { 1000 }

impl Config {
    pub fn read(path: &Path) -> anyhow::Result<Config> {
        let buf = std::fs::read_to_string(path)?;
        Self::parse(&buf)
    }

    pub fn parse(buf: &str) -> anyhow::Result<Config> { Ok(toml::from_str(buf)?) }

    /// Reads `path` if it exists, the defaults otherwise.
    pub fn read_or_default(path: &Path) -> anyhow::Result<Config> {
        if path.exists() { Self::read(path) } else { Ok(Config::default()) }
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let toml_string = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, toml_string.as_bytes())?;
        Ok(())
    }

    /// Validates the entire configuration and returns a list of issues found.
    pub fn validate(&self) -> Vec<String> {
        let mut issues = Vec::new();
        issues.extend(self.supervisor.validate());
        issues.extend(self.companion.validate());
        issues
    }
}
