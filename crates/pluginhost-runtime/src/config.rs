//! Runtime configuration for a plugin system: recognised fields, defaults,
//! and an optional YAML loader.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Errors that can occur while locating or parsing a config file. Distinct
/// from [`PluginError`](pluginhost_core::error::PluginError) — this is a
/// bootstrap-time concern, not a plugin lifecycle one.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("configuration file not found: {0}")]
    FileNotFound(PathBuf),
    #[error("failed to read configuration file: {0}")]
    ReadError(#[from] std::io::Error),
    #[error("failed to parse configuration: {0}")]
    ParseError(#[from] serde_yaml::Error),
    #[error("invalid configuration: {message}")]
    ValidationError { message: String },
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Nested `debugOptions` settings: diagnostics a host opts into without
/// touching the main settings it'd otherwise tune for production.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DebugOptions {
    /// Trace every lifecycle hook's entry/exit and elapsed time.
    pub log_lifecycle_hooks: bool,
    /// Trace every registry state transition.
    pub log_state_transitions: bool,
    /// Warn when a loaded manifest's `name` doesn't match the registered
    /// name, instead of silently accepting the mismatch.
    pub validate_manifests: bool,
    /// Upgrade `validate_manifests` warnings (and other non-fatal manifest
    /// issues) into a hard `PluginLoadError`.
    pub throw_on_warnings: bool,
}

/// Recognised top-level settings for the plugin system, with the defaults
/// applied when a field is absent from a loaded file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PluginSystemConfig {
    /// Wall-clock budget for a single lifecycle hook
    /// (`on_load`/`on_activate`/`on_deactivate`/`on_destroy`) before the
    /// manager gives up and records a `PluginLifecycleTimeoutError`. `0`
    /// disables the timeout and the hook runs to completion unobserved.
    pub lifecycle_hook_timeout_ms: u64,
    /// Ms ceiling racing a descriptor's `load()` call itself, distinct from
    /// `lifecycle_hook_timeout_ms`. Overridden per plugin by
    /// `PluginDescriptor::timeout_ms` when set.
    pub global_timeout_ms: u64,
    /// How many plugins `load_many` may load concurrently.
    pub max_concurrent_loads: usize,
    /// Dev-mode diagnostics: global hook panics are logged and then
    /// re-raised instead of being swallowed.
    pub enable_dev_mode: bool,
    /// Baseline service whitelist merged into every plugin's own
    /// `service_whitelist` before its context is built.
    pub default_allowed_services: Vec<String>,
    pub debug_options: DebugOptions,
    /// Timeout for a single remote bundle download.
    pub remote_fetch_timeout_ms: u64,
    /// Whether the remote loader keeps a successfully loaded bundle cached
    /// by URL so a repeat `load` doesn't re-download it.
    pub remote_cache_enabled: bool,
    /// Accepted for forward compatibility; the manager does not currently
    /// retry a failed remote load automatically. See `PluginDescriptor`'s
    /// own `retry_on_error`/`max_retries` fields for the per-plugin form of
    /// the same reserved setting.
    pub remote_retry_on_error: bool,
    pub remote_max_retries: u32,
}

impl Default for PluginSystemConfig {
    fn default() -> Self {
        Self {
            lifecycle_hook_timeout_ms: 5_000,
            global_timeout_ms: 30_000,
            max_concurrent_loads: 3,
            enable_dev_mode: false,
            default_allowed_services: Vec::new(),
            debug_options: DebugOptions::default(),
            remote_fetch_timeout_ms: 10_000,
            remote_cache_enabled: true,
            remote_retry_on_error: false,
            remote_max_retries: 0,
        }
    }
}

/// Loads a [`PluginSystemConfig`] from a YAML file, with `${VAR}` /
/// `${VAR:-default}` environment variable expansion, falling back to
/// [`PluginSystemConfig::default`] when no file is found.
pub struct ConfigLoader {
    search_paths: Vec<PathBuf>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self { search_paths: Vec::new() }
    }

    pub fn add_search_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.search_paths.push(path.as_ref().to_path_buf());
        self
    }

    pub fn with_current_dir(self) -> Self {
        match std::env::current_dir() {
            Ok(cwd) => self.add_search_path(cwd),
            Err(_) => self,
        }
    }

    pub fn with_user_config_dir(self) -> Self {
        match dirs::config_dir() {
            Some(dir) => self.add_search_path(dir.join("pluginhost")),
            None => self,
        }
    }

    pub fn load(&self) -> ConfigResult<PluginSystemConfig> {
        if let Some(path) = self.find_config_file() {
            return self.load_from_file(&path);
        }
        info!("no plugin system configuration file found, using defaults");
        Ok(PluginSystemConfig::default())
    }

    pub fn load_from_file<P: AsRef<Path>>(&self, path: P) -> ConfigResult<PluginSystemConfig> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.to_path_buf()));
        }
        info!(path = %path.display(), "loading plugin system configuration");
        let content = std::fs::read_to_string(path)?;
        self.load_from_str(&content)
    }

    pub fn load_from_str(&self, yaml: &str) -> ConfigResult<PluginSystemConfig> {
        let expanded = expand_env_vars(yaml);
        let config: PluginSystemConfig = serde_yaml::from_str(&expanded)?;
        debug!(?config, "plugin system configuration parsed");
        Ok(config)
    }

    fn find_config_file(&self) -> Option<PathBuf> {
        const NAMES: &[&str] = &["pluginhost.yaml", "pluginhost.yml", ".pluginhost.yaml"];
        for search_path in &self.search_paths {
            for name in NAMES {
                let candidate = search_path.join(name);
                if candidate.exists() {
                    return Some(candidate);
                }
            }
        }
        None
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new().with_current_dir().with_user_config_dir()
    }
}

fn expand_env_vars(content: &str) -> String {
    let mut result = content.to_string();
    let re = regex_lite::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)(:-([^}]*))?\}").unwrap();
    for cap in re.captures_iter(content) {
        let full_match = cap.get(0).unwrap().as_str();
        let var_name = cap.get(1).unwrap().as_str();
        let default_value = cap.get(3).map(|m| m.as_str());
        let value = std::env::var(var_name).ok().or_else(|| default_value.map(String::from)).unwrap_or_default();
        result = result.replace(full_match, &value);
    }
    result
}

pub fn load_config() -> ConfigResult<PluginSystemConfig> {
    ConfigLoader::default().load()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_when_no_yaml_given() {
        let loader = ConfigLoader::new();
        let config = loader.load_from_str("").unwrap();
        assert_eq!(config.max_concurrent_loads, 3);
    }

    #[test]
    fn overrides_apply() {
        let loader = ConfigLoader::new();
        let config = loader.load_from_str("max_concurrent_loads: 8\n").unwrap();
        assert_eq!(config.max_concurrent_loads, 8);
    }

    #[test]
    fn env_var_expansion_with_default() {
        let loader = ConfigLoader::new();
        let yaml = "lifecycle_hook_timeout_ms: ${HOOK_TIMEOUT:-3000}\n";
        let expanded = expand_env_vars(yaml);
        assert!(expanded.contains("3000"));
        let config = loader.load_from_str(yaml).unwrap();
        assert_eq!(config.lifecycle_hook_timeout_ms, 3000);
    }

    #[test]
    fn missing_file_is_reported() {
        let loader = ConfigLoader::new();
        let err = loader.load_from_file("/nonexistent/pluginhost.yaml").unwrap_err();
        assert!(matches!(err, ConfigError::FileNotFound(_)));
    }
}
