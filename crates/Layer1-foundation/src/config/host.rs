//! Host Config - 플러그인 호스트 설정
//!
//! Where plugins live, how strictly signatures are enforced and how often
//! supervised processes are polled.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// 설정 파일명
pub const HOST_CONFIG_FILE: &str = "plinth.json";

const DEFAULT_APP_URL: &str = "http://localhost:3000/";

// ============================================================================
// HostEnv / Enforcement
// ============================================================================

/// Deployment environment; production enforces signatures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum HostEnv {
    #[default]
    Production,
    Development,
}

/// How unsigned plugins are treated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Enforcement {
    /// Unsigned plugins are rejected unless allow-listed
    Enforcing,
    /// Unsigned plugins load with an `Unsigned` trust outcome
    Permissive,
}

impl From<HostEnv> for Enforcement {
    fn from(env: HostEnv) -> Self {
        match env {
            HostEnv::Production => Enforcement::Enforcing,
            HostEnv::Development => Enforcement::Permissive,
        }
    }
}

// ============================================================================
// SignaturePolicy
// ============================================================================

/// Policy handed to the signature verifier
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignaturePolicy {
    pub enforcement: Enforcement,

    /// Plugin IDs exempt from the unsigned check
    pub allow_unsigned: Vec<String>,

    /// Configured platform root URL (base + sub-path)
    pub root_url: String,

    /// Trusted manifest signing keys (key id -> base64 ed25519 public key).
    /// Empty means manifests are checked for file integrity only.
    pub trusted_keys: BTreeMap<String, String>,
}

impl SignaturePolicy {
    pub fn enforcing() -> Self {
        Self {
            enforcement: Enforcement::Enforcing,
            allow_unsigned: Vec::new(),
            root_url: DEFAULT_APP_URL.to_string(),
            trusted_keys: BTreeMap::new(),
        }
    }

    pub fn permissive() -> Self {
        Self {
            enforcement: Enforcement::Permissive,
            ..Self::enforcing()
        }
    }

    pub fn with_allow_unsigned(mut self, plugin_id: impl Into<String>) -> Self {
        self.allow_unsigned.push(plugin_id.into());
        self
    }

    pub fn with_root_url(mut self, root_url: impl Into<String>) -> Self {
        self.root_url = root_url.into();
        self
    }

    pub fn with_trusted_key(mut self, key_id: impl Into<String>, public_key: impl Into<String>) -> Self {
        self.trusted_keys.insert(key_id.into(), public_key.into());
        self
    }

    /// Unsigned plugins with this ID may load
    pub fn allows_unsigned(&self, plugin_id: &str) -> bool {
        self.enforcement == Enforcement::Permissive
            || self.allow_unsigned.iter().any(|id| id == plugin_id)
    }
}

impl Default for SignaturePolicy {
    fn default() -> Self {
        Self::enforcing()
    }
}

// ============================================================================
// PluginSettings
// ============================================================================

/// Per-plugin settings section
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginSettings {
    /// Extra directory scanned for this plugin
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,

    /// Remaining keys, passed through to the plugin
    #[serde(flatten)]
    pub extra: BTreeMap<String, String>,
}

// ============================================================================
// HostConfig
// ============================================================================

/// Plinth 호스트 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostConfig {
    #[serde(default)]
    pub env: HostEnv,

    /// External plugins directory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugins_path: Option<PathBuf>,

    /// Plugins shipped with the platform
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bundled_plugins_path: Option<PathBuf>,

    /// Static asset root; core plugins live under `app/plugins`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub static_root_path: Option<PathBuf>,

    #[serde(default)]
    pub plugin_settings: BTreeMap<String, PluginSettings>,

    #[serde(default)]
    pub allow_unsigned: Vec<String>,

    #[serde(default = "default_app_url")]
    pub app_url: String,

    #[serde(default)]
    pub app_sub_url: String,

    /// Liveness poll interval for supervised plugin processes
    #[serde(default = "default_monitor_interval_ms")]
    pub monitor_interval_ms: u64,

    /// Plugin repository used for updates and archive lookups
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository_url: Option<String>,

    #[serde(default)]
    pub trusted_keys: BTreeMap<String, String>,

    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            env: HostEnv::default(),
            plugins_path: None,
            bundled_plugins_path: None,
            static_root_path: None,
            plugin_settings: BTreeMap::new(),
            allow_unsigned: Vec::new(),
            app_url: default_app_url(),
            app_sub_url: String::new(),
            monitor_interval_ms: default_monitor_interval_ms(),
            repository_url: None,
            trusted_keys: BTreeMap::new(),
            log_level: default_log_level(),
        }
    }
}

impl HostConfig {
    pub fn new() -> Self {
        Self::default()
    }

    // ========================================================================
    // Load
    // ========================================================================

    /// Read a JSON config file
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read {}: {}", path.display(), e)))?;
        serde_json::from_str(&content)
            .map_err(|e| Error::Config(format!("Failed to parse {}: {}", path.display(), e)))
    }

    /// Read a JSON config file, falling back to defaults when it does not exist
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        Self::load_from(path)
    }

    /// Default config location (`<config dir>/plinth/plinth.json`)
    pub fn default_path() -> Result<PathBuf> {
        let dir = dirs::config_dir()
            .ok_or_else(|| Error::Config("Cannot find config directory".to_string()))?;
        Ok(dir.join("plinth").join(HOST_CONFIG_FILE))
    }

    /// Apply `PLINTH_*` environment overrides
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(env) = lookup("PLINTH_ENV") {
            self.env = match env.to_ascii_lowercase().as_str() {
                "production" | "prod" => HostEnv::Production,
                "development" | "dev" => HostEnv::Development,
                other => {
                    return Err(Error::Config(format!("Unknown PLINTH_ENV value: {}", other)));
                }
            };
        }
        if let Some(path) = lookup("PLINTH_PLUGINS_PATH") {
            self.plugins_path = Some(PathBuf::from(path));
        }
        if let Some(url) = lookup("PLINTH_APP_URL") {
            self.app_url = url;
        }
        Ok(())
    }

    // ========================================================================
    // Derived values
    // ========================================================================

    pub fn is_dev(&self) -> bool {
        self.env == HostEnv::Development
    }

    /// Platform root URL: app URL joined with the sub-path
    pub fn root_url(&self) -> String {
        let base = self.app_url.trim_end_matches('/');
        let sub = self.app_sub_url.trim_matches('/');

        if sub.is_empty() || base.ends_with(&format!("/{}", sub)) {
            format!("{}/", base)
        } else {
            format!("{}/{}/", base, sub)
        }
    }

    pub fn monitor_interval(&self) -> Duration {
        Duration::from_millis(self.monitor_interval_ms.max(1))
    }

    pub fn signature_policy(&self) -> SignaturePolicy {
        SignaturePolicy {
            enforcement: self.env.into(),
            allow_unsigned: self.allow_unsigned.clone(),
            root_url: self.root_url(),
            trusted_keys: self.trusted_keys.clone(),
        }
    }

    /// Extra per-plugin directories from `pluginSettings.<id>.path`
    pub fn plugin_setting_paths(&self) -> Vec<PathBuf> {
        self.plugin_settings
            .values()
            .filter_map(|settings| settings.path.clone())
            .collect()
    }

    /// Directory holding compiled-in core plugins
    pub fn core_plugins_path(&self) -> Option<PathBuf> {
        self.static_root_path
            .as_ref()
            .map(|root| root.join("app").join("plugins"))
    }

    // ========================================================================
    // Builder
    // ========================================================================

    pub fn with_env(mut self, env: HostEnv) -> Self {
        self.env = env;
        self
    }

    pub fn with_plugins_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.plugins_path = Some(path.into());
        self
    }

    pub fn with_bundled_plugins_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.bundled_plugins_path = Some(path.into());
        self
    }

    pub fn with_static_root_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.static_root_path = Some(path.into());
        self
    }

    pub fn with_repository_url(mut self, url: impl Into<String>) -> Self {
        self.repository_url = Some(url.into());
        self
    }

    pub fn with_trusted_key(mut self, key_id: impl Into<String>, public_key: impl Into<String>) -> Self {
        self.trusted_keys.insert(key_id.into(), public_key.into());
        self
    }

    pub fn with_app_url(mut self, url: impl Into<String>) -> Self {
        self.app_url = url.into();
        self
    }

    pub fn with_app_sub_url(mut self, sub_url: impl Into<String>) -> Self {
        self.app_sub_url = sub_url.into();
        self
    }

    pub fn with_allow_unsigned(mut self, plugin_id: impl Into<String>) -> Self {
        self.allow_unsigned.push(plugin_id.into());
        self
    }

    pub fn with_monitor_interval(mut self, interval: Duration) -> Self {
        self.monitor_interval_ms = interval.as_millis() as u64;
        self
    }
}

fn default_app_url() -> String {
    DEFAULT_APP_URL.to_string()
}

fn default_monitor_interval_ms() -> u64 {
    1000
}

fn default_log_level() -> String {
    "info".to_string()
}
