//! Upkeep Configuration
//!
//! Configuration lives in /etc/upkeep/config.toml unless overridden with
//! `--config` or `UPKEEP_CONFIG`. Every field has a serde default so a
//! partial (or absent) file is valid.
//!
//! Sections:
//! - [paths]  live tree and updater state directory
//! - [remote] manifest location, timeouts, manifest cache TTL
//! - [apply]  preserved paths, backup retention, cache reset hook
//! - [log]    default log filter

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// System configuration directory
pub const SYSTEM_CONFIG_DIR: &str = "/etc/upkeep";
const CONFIG_FILE: &str = "config.toml";

/// Environment overrides
pub const ENV_CONFIG: &str = "UPKEEP_CONFIG";
pub const ENV_LIVE_ROOT: &str = "UPKEEP_LIVE_ROOT";
pub const ENV_MANIFEST_URL: &str = "UPKEEP_MANIFEST_URL";

/// Network timeouts are clamped to this range (seconds)
const MIN_TIMEOUT_SECS: u64 = 1;
const MAX_TIMEOUT_SECS: u64 = 60;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Root of the live application tree
    #[serde(default = "default_live_root")]
    pub live_root: PathBuf,

    /// Updater state (markers, staging, backups). Defaults to
    /// `<live_root>/data/upkeep` when unset.
    #[serde(default)]
    pub state_dir: Option<PathBuf>,
}

fn default_live_root() -> PathBuf {
    PathBuf::from("/srv/app")
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            live_root: default_live_root(),
            state_dir: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// Manifest URL (JSON). Empty means "not configured".
    #[serde(default)]
    pub manifest_url: String,

    #[serde(default = "default_manifest_timeout")]
    pub manifest_timeout_secs: u64,

    #[serde(default = "default_package_timeout")]
    pub package_timeout_secs: u64,

    /// How long `status` trusts the cached manifest
    #[serde(default = "default_manifest_cache_ttl")]
    pub manifest_cache_ttl_secs: u64,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn default_manifest_timeout() -> u64 {
    8
}

fn default_package_timeout() -> u64 {
    10
}

fn default_manifest_cache_ttl() -> u64 {
    3600 // 1 hour
}

fn default_user_agent() -> String {
    format!("upkeep/{}", env!("CARGO_PKG_VERSION"))
}

impl RemoteConfig {
    pub fn manifest_timeout(&self) -> Duration {
        Duration::from_secs(
            self.manifest_timeout_secs
                .clamp(MIN_TIMEOUT_SECS, MAX_TIMEOUT_SECS),
        )
    }

    pub fn package_timeout(&self) -> Duration {
        Duration::from_secs(
            self.package_timeout_secs
                .clamp(MIN_TIMEOUT_SECS, MAX_TIMEOUT_SECS),
        )
    }

    pub fn manifest_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.manifest_cache_ttl_secs)
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            manifest_url: String::new(),
            manifest_timeout_secs: default_manifest_timeout(),
            package_timeout_secs: default_package_timeout(),
            manifest_cache_ttl_secs: default_manifest_cache_ttl(),
            user_agent: default_user_agent(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplyConfig {
    /// Top-level directory names never overwritten or backed up
    #[serde(default = "default_preserved_paths")]
    pub preserved_paths: Vec<String>,

    /// Backup snapshots kept after a successful apply (0 = keep all)
    #[serde(default = "default_backup_retention")]
    pub backup_retention: usize,

    /// Shell command run best effort after a successful apply
    #[serde(default)]
    pub cache_reset_command: Option<String>,
}

fn default_preserved_paths() -> Vec<String> {
    vec!["data".to_string(), "update".to_string()]
}

fn default_backup_retention() -> usize {
    5
}

impl Default for ApplyConfig {
    fn default() -> Self {
        Self {
            preserved_paths: default_preserved_paths(),
            backup_retention: default_backup_retention(),
            cache_reset_command: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Default filter when UPKEEP_LOG is unset (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpkeepConfig {
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub remote: RemoteConfig,
    #[serde(default)]
    pub apply: ApplyConfig,
    #[serde(default)]
    pub log: LogConfig,
}

impl UpkeepConfig {
    /// Load from an explicit path. A missing file yields defaults; a file
    /// that exists but does not parse is an error.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("parsing config {}", path.display()))?;
        Ok(config)
    }

    /// Resolve the config path (`explicit` > `UPKEEP_CONFIG` > system path),
    /// load it, then apply environment overrides.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let path = match explicit {
            Some(p) => p.to_path_buf(),
            None => std::env::var(ENV_CONFIG)
                .map(PathBuf::from)
                .unwrap_or_else(|_| config_path()),
        };
        let config = Self::load_from(&path)?;
        Ok(config.with_overrides(
            std::env::var(ENV_LIVE_ROOT).ok(),
            std::env::var(ENV_MANIFEST_URL).ok(),
        ))
    }

    pub fn with_overrides(
        mut self,
        live_root: Option<String>,
        manifest_url: Option<String>,
    ) -> Self {
        if let Some(root) = live_root.filter(|s| !s.is_empty()) {
            self.paths.live_root = PathBuf::from(root);
        }
        if let Some(url) = manifest_url.filter(|s| !s.is_empty()) {
            self.remote.manifest_url = url;
        }
        self
    }

    pub fn state_dir(&self) -> PathBuf {
        self.paths
            .state_dir
            .clone()
            .unwrap_or_else(|| self.paths.live_root.join("data").join("upkeep"))
    }
}

/// Get the system config file path
pub fn config_path() -> PathBuf {
    PathBuf::from(SYSTEM_CONFIG_DIR).join(CONFIG_FILE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = UpkeepConfig::default();
        assert_eq!(config.paths.live_root, PathBuf::from("/srv/app"));
        assert_eq!(
            config.state_dir(),
            PathBuf::from("/srv/app/data/upkeep")
        );
        assert_eq!(config.apply.preserved_paths, vec!["data", "update"]);
        assert_eq!(config.remote.manifest_cache_ttl(), Duration::from_secs(3600));
        assert!(config.remote.user_agent.starts_with("upkeep/"));
    }

    #[test]
    fn test_missing_file_is_default() {
        let temp = TempDir::new().unwrap();
        let config = UpkeepConfig::load_from(&temp.path().join("nope.toml")).unwrap();
        assert_eq!(config.apply.backup_retention, 5);
    }

    #[test]
    fn test_partial_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        fs::write(
            &path,
            r#"
[paths]
live_root = "/var/www/site"

[remote]
manifest_url = "https://updates.example.com/latest.json"
package_timeout_secs = 600
"#,
        )
        .unwrap();

        let config = UpkeepConfig::load_from(&path).unwrap();
        assert_eq!(config.paths.live_root, PathBuf::from("/var/www/site"));
        assert_eq!(config.state_dir(), PathBuf::from("/var/www/site/data/upkeep"));
        assert_eq!(config.remote.manifest_url, "https://updates.example.com/latest.json");
        // Clamped to the hard ceiling
        assert_eq!(config.remote.package_timeout(), Duration::from_secs(60));
        assert_eq!(config.remote.manifest_timeout(), Duration::from_secs(8));
    }

    #[test]
    fn test_malformed_file_is_error() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        fs::write(&path, "[paths\nlive_root = ").unwrap();
        assert!(UpkeepConfig::load_from(&path).is_err());
    }

    #[test]
    fn test_overrides() {
        let config = UpkeepConfig::default().with_overrides(
            Some("/opt/site".to_string()),
            Some(String::new()),
        );
        assert_eq!(config.paths.live_root, PathBuf::from("/opt/site"));
        assert!(config.remote.manifest_url.is_empty());
    }

    #[test]
    fn test_explicit_state_dir() {
        let mut config = UpkeepConfig::default();
        config.paths.state_dir = Some(PathBuf::from("/var/lib/upkeep"));
        assert_eq!(config.state_dir(), PathBuf::from("/var/lib/upkeep"));
    }
}
