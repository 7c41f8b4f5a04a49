//! Flat runtime configuration.
//!
//! Loaded once at startup from an optional `config.json` in the app data
//! directory. Every field is `serde(default)` and the loaded value is
//! clamped to sane ranges, the same tolerant-merge approach the settings
//! layer this was grounded on uses: a missing or malformed file never fails
//! startup.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::core::crypto::KdfParams;

/// Top-level runtime configuration, threaded through the application
/// context rather than read from hidden globals.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeConfig {
    #[serde(default)]
    pub vault_kdf: VaultKdfConfig,
    #[serde(default)]
    pub probe: ProbeConfig,
    #[serde(default)]
    pub switch: SwitchConfig,
    #[serde(default)]
    pub paths: PathsConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            vault_kdf: VaultKdfConfig::default(),
            probe: ProbeConfig::default(),
            switch: SwitchConfig::default(),
            paths: PathsConfig::default(),
        }
    }
}

impl RuntimeConfig {
    /// Loads configuration from `<app_data_dir>/config.json`, falling back
    /// to defaults when the file is absent or malformed.
    pub fn load(app_data_dir: &Path) -> Self {
        let path = app_data_dir.join("config.json");
        if !path.exists() {
            info!("no config.json found, using defaults");
            let mut config = Self::default();
            config.paths.app_data_dir = app_data_dir.to_path_buf();
            config.normalize();
            return config;
        }

        let loaded = std::fs::read_to_string(&path)
            .ok()
            .and_then(|content| serde_json::from_str::<RuntimeConfig>(&content).ok());

        let mut config = match loaded {
            Some(config) => config,
            None => {
                warn!(path = %path.display(), "failed to parse config.json, using defaults");
                Self::default()
            }
        };

        if config.paths.app_data_dir.as_os_str().is_empty() {
            config.paths.app_data_dir = app_data_dir.to_path_buf();
        }
        config.normalize();
        config
    }

    /// Clamps every field to a sane range. Corrects rather than rejects, so
    /// a corrupted or old config file never bricks startup.
    pub fn normalize(&mut self) {
        self.vault_kdf.mem_kib = self.vault_kdf.mem_kib.clamp(64 * 1024, 1024 * 1024);
        self.vault_kdf.iters = self.vault_kdf.iters.clamp(3, 20);
        self.vault_kdf.parallel = self.vault_kdf.parallel.clamp(1, 8);

        self.probe.timeout_ms = self.probe.timeout_ms.clamp(500, 60_000);
        self.probe.cache_ttl_s = self.probe.cache_ttl_s.clamp(0, 3600);
        self.probe.max_concurrency = self.probe.max_concurrency.clamp(1, 64);
        self.probe.request_timeout_ms = self.probe.request_timeout_ms.clamp(500, 60_000);

        self.switch.kill_grace_ms = self.switch.kill_grace_ms.clamp(0, 30_000);
    }

    pub fn kdf_params(&self) -> KdfParams {
        KdfParams {
            mem_kib: self.vault_kdf.mem_kib,
            iters: self.vault_kdf.iters,
            parallel: self.vault_kdf.parallel,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VaultKdfConfig {
    #[serde(default = "default_mem_kib")]
    pub mem_kib: u32,
    #[serde(default = "default_iters")]
    pub iters: u32,
    #[serde(default = "default_parallel")]
    pub parallel: u32,
}

impl Default for VaultKdfConfig {
    fn default() -> Self {
        Self {
            mem_kib: default_mem_kib(),
            iters: default_iters(),
            parallel: default_parallel(),
        }
    }
}

fn default_mem_kib() -> u32 {
    64 * 1024
}
fn default_iters() -> u32 {
    3
}
fn default_parallel() -> u32 {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProbeConfig {
    #[serde(default = "default_probe_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_cache_ttl_s")]
    pub cache_ttl_s: u64,
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_probe_timeout_ms(),
            cache_ttl_s: default_cache_ttl_s(),
            max_concurrency: default_max_concurrency(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

fn default_probe_timeout_ms() -> u64 {
    8_000
}
fn default_cache_ttl_s() -> u64 {
    60
}
fn default_max_concurrency() -> usize {
    4
}
fn default_request_timeout_ms() -> u64 {
    8_000
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SwitchConfig {
    #[serde(default)]
    pub force_restart_default: bool,
    #[serde(default = "default_kill_grace_ms")]
    pub kill_grace_ms: u64,
}

impl Default for SwitchConfig {
    fn default() -> Self {
        Self {
            force_restart_default: false,
            kill_grace_ms: default_kill_grace_ms(),
        }
    }
}

fn default_kill_grace_ms() -> u64 {
    2_000
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct PathsConfig {
    #[serde(default)]
    pub app_data_dir: PathBuf,
    #[serde(default)]
    pub live_auth_path: Option<PathBuf>,
}

/// Returns the platform app data directory (`<root>/codex-switch`).
pub fn default_app_data_dir() -> Option<PathBuf> {
    dirs::data_local_dir().map(|d| d.join("codex-switch"))
}

/// Returns the live auth file path the CLI reads, honoring any override in
/// `paths.live_auth_path`.
pub fn live_auth_path(config: &RuntimeConfig) -> Option<PathBuf> {
    if let Some(path) = &config.paths.live_auth_path {
        return Some(path.clone());
    }
    dirs::home_dir().map(|home| home.join(".codex").join("auth.json"))
}
