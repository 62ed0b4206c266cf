//! Remote version manifest.
//!
//! Wire format:
//! `{"version": "...", "package_url": "...", "sha256": "...", "released"?: "...", "notes"?: "..."}`
//!
//! Fetch failures of any kind (network, timeout, HTTP status, bad JSON)
//! surface as `None`, never as an error.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, warn};

use super::fetch::HttpFetcher;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteManifest {
    #[serde(default, deserialize_with = "string_or_empty")]
    pub version: String,
    #[serde(default, deserialize_with = "string_or_empty")]
    pub package_url: String,
    #[serde(default, deserialize_with = "string_or_empty")]
    pub sha256: String,
    #[serde(default, deserialize_with = "string_or_empty")]
    pub released: String,
    #[serde(default, deserialize_with = "string_or_empty")]
    pub notes: String,
}

/// Missing, null, or non-string fields all read as ""
fn string_or_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(match value {
        serde_json::Value::String(s) => s,
        serde_json::Value::Number(n) => n.to_string(),
        _ => String::new(),
    })
}

impl RemoteManifest {
    /// Parse a manifest body; only a JSON object counts
    pub fn parse(body: &[u8]) -> Option<Self> {
        let value: serde_json::Value = match serde_json::from_slice(body) {
            Ok(v) => v,
            Err(e) => {
                warn!("manifest is not valid JSON: {}", e);
                return None;
            }
        };
        if !value.is_object() {
            warn!("manifest is not a JSON object");
            return None;
        }
        serde_json::from_value(value).ok()
    }

    /// The orchestrator treats a manifest without a version as absent
    pub fn has_version(&self) -> bool {
        !self.version.trim().is_empty()
    }
}

#[derive(Debug, Clone, Default)]
pub struct ManifestClient {
    http: HttpFetcher,
}

impl ManifestClient {
    pub fn new(http: HttpFetcher) -> Self {
        Self { http }
    }

    pub fn fetch(&self, url: &str, timeout: Duration) -> Option<RemoteManifest> {
        if url.trim().is_empty() {
            warn!("no manifest URL configured");
            return None;
        }
        match self.http.get(url, timeout) {
            Ok(body) => RemoteManifest::parse(&body),
            Err(e) => {
                warn!("manifest fetch failed: {}", e);
                None
            }
        }
    }
}

/// Cached manifest as stored on disk
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedManifest {
    pub fetched_at: DateTime<Utc>,
    pub manifest: RemoteManifest,
}

/// Short-lived manifest cache for status display.
///
/// Never consulted by the upgrade path, which always fetches live.
#[derive(Debug, Clone)]
pub struct ManifestCache {
    path: PathBuf,
}

impl ManifestCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn store(&self, manifest: &RemoteManifest) {
        let cached = CachedManifest {
            fetched_at: Utc::now(),
            manifest: manifest.clone(),
        };
        let result = serde_json::to_string_pretty(&cached)
            .map_err(|e| e.to_string())
            .and_then(|content| {
                if let Some(parent) = self.path.parent() {
                    fs::create_dir_all(parent).map_err(|e| e.to_string())?;
                }
                fs::write(&self.path, content).map_err(|e| e.to_string())
            });
        if let Err(e) = result {
            debug!("manifest cache write failed: {}", e);
        }
    }

    pub fn load(&self) -> Option<CachedManifest> {
        let content = fs::read_to_string(&self.path).ok()?;
        serde_json::from_str(&content).ok()
    }

    /// Cached manifest if it is younger than `ttl`
    pub fn load_fresh(&self, ttl: Duration) -> Option<CachedManifest> {
        let cached = self.load()?;
        let age = Utc::now().signed_duration_since(cached.fetched_at);
        let ttl = chrono::Duration::from_std(ttl).ok()?;
        if age >= chrono::Duration::zero() && age < ttl {
            Some(cached)
        } else {
            None
        }
    }
}
