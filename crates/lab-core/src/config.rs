//! Host configuration
//!
//! Environment variables are loaded from the canonical location
//! `/etc/lab-host/environment` (or `.env` during development), then read into
//! a [`HostConfig`] that decides which plugins are disabled or deferred.
//!
//! ## Usage
//!
//! ```rust
//! use lab_core::config::{load_environment, HostConfig};
//!
//! load_environment();
//! let config = HostConfig::from_env();
//! if config.is_disabled("@lab/terminal-extension:plugin") {
//!     // the terminal plugin will not be registered
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::signal::DEFAULT_SIGNAL_CAPACITY;

/// Alternative paths to check (in order of priority)
pub const ENV_FILE_PATHS: &[&str] = &["/etc/lab-host/environment", ".env"];

/// Comma separated plugin patterns that must never be registered
pub const ENV_DISABLED: &str = "LAB_DISABLED_PLUGINS";

/// Comma separated plugin patterns whose auto-start is forced to `defer`
pub const ENV_DEFERRED: &str = "LAB_DEFERRED_PLUGINS";

/// Buffer size for async signal subscribers
pub const ENV_SIGNAL_CAPACITY: &str = "LAB_SIGNAL_CAPACITY";

/// Load environment variables from the canonical configuration file.
///
/// Checks `LAB_ENV_FILE` first, then [`ENV_FILE_PATHS`] in order. Existing
/// variables are never overridden. Returns the path that was loaded.
pub fn load_environment() -> Option<String> {
    if let Ok(custom_path) = std::env::var("LAB_ENV_FILE") {
        if let Some(path) = try_load_env_file(&custom_path) {
            return Some(path);
        }
    }

    for path in ENV_FILE_PATHS {
        if let Some(loaded_path) = try_load_env_file(path) {
            return Some(loaded_path);
        }
    }

    debug!("No environment file found, using existing environment");
    None
}

fn try_load_env_file(path: &str) -> Option<String> {
    let path_obj = Path::new(path);

    if !path_obj.exists() {
        return None;
    }

    match fs::read_to_string(path_obj) {
        Ok(content) => {
            let mut loaded_count = 0;
            let mut skipped_count = 0;

            for line in content.lines() {
                let line = line.trim();

                if line.is_empty() || line.starts_with('#') {
                    continue;
                }

                if let Some((key, value)) = parse_env_line(line) {
                    if std::env::var(&key).is_err() {
                        std::env::set_var(&key, &value);
                        loaded_count += 1;
                        debug!("Loaded: {}={}", key, value);
                    } else {
                        skipped_count += 1;
                        debug!("Skipped (already set): {}", key);
                    }
                }
            }

            info!(
                "Loaded {} environment variables from {} ({} skipped - already set)",
                loaded_count, path, skipped_count
            );

            Some(path.to_string())
        }
        Err(e) => {
            warn!("Failed to read environment file {}: {}", path, e);
            None
        }
    }
}

/// Parse a single environment line into key-value pair.
fn parse_env_line(line: &str) -> Option<(String, String)> {
    let mut parts = line.splitn(2, '=');
    let key = parts.next()?.trim();
    let value = parts.next()?.trim();

    if key.is_empty() {
        return None;
    }

    let value = value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .or_else(|| value.strip_prefix('\'').and_then(|v| v.strip_suffix('\'')))
        .unwrap_or(value);

    Some((key.to_string(), value.to_string()))
}

/// Get an optional configuration value.
pub fn get_config_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

/// Get an integer configuration value.
pub fn get_config_int(key: &str, default: i64) -> i64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Plugin host configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HostConfig {
    /// Patterns of plugins that are skipped at registration
    pub disabled: Vec<String>,

    /// Patterns of plugins whose auto-start policy becomes `defer`
    pub deferred: Vec<String>,

    /// Buffer for async signal subscribers
    pub signal_capacity: usize,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            disabled: Vec::new(),
            deferred: Vec::new(),
            signal_capacity: DEFAULT_SIGNAL_CAPACITY,
        }
    }
}

impl HostConfig {
    /// Build from `LAB_DISABLED_PLUGINS`, `LAB_DEFERRED_PLUGINS` and `LAB_SIGNAL_CAPACITY`
    pub fn from_env() -> Self {
        let capacity = get_config_int(ENV_SIGNAL_CAPACITY, DEFAULT_SIGNAL_CAPACITY as i64);
        Self {
            disabled: split_patterns(get_config_opt(ENV_DISABLED)),
            deferred: split_patterns(get_config_opt(ENV_DEFERRED)),
            signal_capacity: usize::try_from(capacity)
                .ok()
                .filter(|c| *c > 0)
                .unwrap_or(DEFAULT_SIGNAL_CAPACITY),
        }
    }

    pub fn from_toml_str(input: &str) -> Result<Self> {
        Ok(toml::from_str(input)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&content)
    }

    pub fn is_disabled(&self, id: &str) -> bool {
        matches_any(&self.disabled, id)
    }

    pub fn is_deferred(&self, id: &str) -> bool {
        matches_any(&self.deferred, id)
    }
}

fn split_patterns(raw: Option<String>) -> Vec<String> {
    raw.map(|value| {
        value
            .split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(str::to_string)
            .collect()
    })
    .unwrap_or_default()
}

/// A pattern matches the full id or the package part before the first `:`.
fn matches_any(patterns: &[String], id: &str) -> bool {
    let package = id.split_once(':').map(|(pkg, _)| pkg);
    patterns
        .iter()
        .any(|p| p == id || package.is_some_and(|pkg| pkg == p))
}
