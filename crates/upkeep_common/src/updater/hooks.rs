//! Collaborators the orchestrator talks to through traits: the remote
//! (manifest + package), the post-apply cache reset, and the authorization
//! gate. Production implementations live here; tests swap in spies.

use std::process::Command;
use std::time::Duration;
use tracing::{info, warn};

use super::fetch::{HttpFetcher, PackageFetcher};
use super::manifest::{ManifestClient, RemoteManifest};
use super::steps::Command as UpdateCommand;
use crate::config::RemoteConfig;

/// Source of manifests and packages
pub trait Remote {
    fn fetch_manifest(&self, url: &str) -> Option<RemoteManifest>;
    fn fetch_package(&self, url: &str) -> Option<Vec<u8>>;
}

/// HTTP remote with the configured timeouts
#[derive(Debug, Clone)]
pub struct HttpRemote {
    manifests: ManifestClient,
    packages: PackageFetcher,
    manifest_timeout: Duration,
    package_timeout: Duration,
}

impl HttpRemote {
    pub fn from_config(config: &RemoteConfig) -> Self {
        let http = HttpFetcher::new(config.user_agent.clone());
        Self {
            manifests: ManifestClient::new(http.clone()),
            packages: PackageFetcher::new(http),
            manifest_timeout: config.manifest_timeout(),
            package_timeout: config.package_timeout(),
        }
    }
}

impl Remote for HttpRemote {
    fn fetch_manifest(&self, url: &str) -> Option<RemoteManifest> {
        self.manifests.fetch(url, self.manifest_timeout)
    }

    fn fetch_package(&self, url: &str) -> Option<Vec<u8>> {
        self.packages.fetch(url, self.package_timeout)
    }
}

/// Best-effort hook run after a successful apply (opcode/bytecode caches,
/// template caches, whatever the deployment needs flushed)
pub trait CacheReset {
    /// Returns whether the reset succeeded; failure is never fatal
    fn reset(&self) -> bool;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoCacheReset;

impl CacheReset for NoCacheReset {
    fn reset(&self) -> bool {
        true
    }
}

/// Runs a configured shell command via `sh -c`
#[derive(Debug, Clone)]
pub struct ShellCacheReset {
    command: String,
}

impl ShellCacheReset {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }
}

impl CacheReset for ShellCacheReset {
    fn reset(&self) -> bool {
        match Command::new("sh").arg("-c").arg(&self.command).output() {
            Ok(output) if output.status.success() => {
                info!("cache reset command succeeded");
                true
            }
            Ok(output) => {
                warn!(
                    "cache reset command exited with {}: {}",
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                );
                false
            }
            Err(e) => {
                warn!("cache reset command could not run: {}", e);
                false
            }
        }
    }
}

/// Authorization gate consulted before any mutating command
pub trait Authorizer {
    fn approve(&self, command: &UpdateCommand) -> bool;
}

/// A local operator at the CLI is trusted by definition
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalOperator;

impl Authorizer for LocalOperator {
    fn approve(&self, _command: &UpdateCommand) -> bool {
        true
    }
}
