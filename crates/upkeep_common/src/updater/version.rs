//! Installed-version marker and version comparison.
//!
//! The marker is a single JSON file `{"version": "...", "updated_at": "..."}`.
//! A missing or unreadable marker reads as "unknown", never as an error.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Sentinel for "no usable version"
pub const UNKNOWN_VERSION: &str = "unknown";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionMarker {
    pub version: String,
    pub updated_at: DateTime<Utc>,
}

/// Outcome of comparing the local version against the remote one
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparison {
    Unknown,
    UpToDate,
    UpdateAvailable,
    Ahead,
}

impl Comparison {
    pub fn as_str(&self) -> &'static str {
        match self {
            Comparison::Unknown => "unknown",
            Comparison::UpToDate => "up_to_date",
            Comparison::UpdateAvailable => "update_available",
            Comparison::Ahead => "ahead",
        }
    }
}

impl std::fmt::Display for Comparison {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct VersionStore {
    path: PathBuf,
}

impl VersionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Full marker, if present and parseable
    pub fn marker(&self) -> Option<VersionMarker> {
        let content = fs::read_to_string(&self.path).ok()?;
        match serde_json::from_str::<VersionMarker>(&content) {
            Ok(marker) => Some(marker),
            Err(e) => {
                debug!("version marker {} unreadable: {}", self.path.display(), e);
                None
            }
        }
    }

    /// Installed version, or "unknown".
    ///
    /// Only the `version` field matters here; a marker with a missing or
    /// oddly formatted `updated_at` still reports its version.
    pub fn current(&self) -> String {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(_) => return UNKNOWN_VERSION.to_string(),
        };
        let value = match serde_json::from_str::<serde_json::Value>(&content) {
            Ok(value) => value,
            Err(e) => {
                debug!("version marker {} unreadable: {}", self.path.display(), e);
                return UNKNOWN_VERSION.to_string();
            }
        };
        value
            .get("version")
            .and_then(|v| v.as_str())
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| UNKNOWN_VERSION.to_string())
    }

    /// Overwrite the marker with `{version, updated_at: now}`.
    ///
    /// Written to a sibling temp file and renamed so a crash never leaves a
    /// half-written marker behind.
    pub fn write(&self, version: &str) -> bool {
        let marker = VersionMarker {
            version: version.to_string(),
            updated_at: Utc::now(),
        };
        match self.write_marker(&marker) {
            Ok(()) => true,
            Err(e) => {
                warn!("failed to write version marker {}: {}", self.path.display(), e);
                false
            }
        }
    }

    fn write_marker(&self, marker: &VersionMarker) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(marker)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, content)?;
        fs::rename(&tmp, &self.path)
    }
}

/// Parsed dotted version: numeric release components plus optional pre-release
#[derive(Debug, Clone, PartialEq, Eq)]
struct ParsedVersion {
    release: Vec<u64>,
    pre: Option<Vec<String>>,
}

fn parse_version(raw: &str) -> Option<ParsedVersion> {
    let v = raw.trim();
    let v = v.strip_prefix('v').or_else(|| v.strip_prefix('V')).unwrap_or(v);
    if v.is_empty() || v.eq_ignore_ascii_case(UNKNOWN_VERSION) {
        return None;
    }

    // Build metadata never affects ordering
    let v = v.split('+').next().unwrap_or(v);
    let (core, pre) = match v.split_once('-') {
        Some((core, pre)) => (core, Some(pre)),
        None => (v, None),
    };

    let release = core
        .split('.')
        .map(|part| part.parse::<u64>().ok())
        .collect::<Option<Vec<u64>>>()?;

    let pre = match pre {
        Some(p) if !p.is_empty() => Some(p.split('.').map(|s| s.to_string()).collect()),
        Some(_) => return None,
        None => None,
    };

    Some(ParsedVersion { release, pre })
}

fn cmp_release(a: &[u64], b: &[u64]) -> Ordering {
    let len = a.len().max(b.len());
    for i in 0..len {
        let x = a.get(i).copied().unwrap_or(0);
        let y = b.get(i).copied().unwrap_or(0);
        match x.cmp(&y) {
            Ordering::Equal => continue,
            other => return other,
        }
    }
    Ordering::Equal
}

fn cmp_pre(a: &Option<Vec<String>>, b: &Option<Vec<String>>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        // A release outranks any of its pre-releases
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(a), Some(b)) => {
            for (x, y) in a.iter().zip(b.iter()) {
                let ord = match (x.parse::<u64>(), y.parse::<u64>()) {
                    (Ok(x), Ok(y)) => x.cmp(&y),
                    (Ok(_), Err(_)) => Ordering::Less,
                    (Err(_), Ok(_)) => Ordering::Greater,
                    (Err(_), Err(_)) => x.cmp(y),
                };
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            a.len().cmp(&b.len())
        }
    }
}

/// Semantic ordering of two version strings; `None` if either is unusable
pub fn version_ordering(a: &str, b: &str) -> Option<Ordering> {
    let a = parse_version(a)?;
    let b = parse_version(b)?;
    Some(cmp_release(&a.release, &b.release).then_with(|| cmp_pre(&a.pre, &b.pre)))
}

/// Compare the installed version against the remote one
pub fn compare(local: &str, remote: &str) -> Comparison {
    match version_ordering(local, remote) {
        None => Comparison::Unknown,
        Some(Ordering::Less) => Comparison::UpdateAvailable,
        Some(Ordering::Equal) => Comparison::UpToDate,
        Some(Ordering::Greater) => Comparison::Ahead,
    }
}

/// True when `version` parses as a usable version string
pub fn is_valid_version(version: &str) -> bool {
    parse_version(version).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_compare_scenarios() {
        assert_eq!(compare("2.0.5", "2.1.0"), Comparison::UpdateAvailable);
        assert_eq!(compare("2.1.0", "2.1.0"), Comparison::UpToDate);
        assert_eq!(compare("2.2.0", "2.1.0"), Comparison::Ahead);
    }

    #[test]
    fn test_compare_unknown_wins() {
        for other in ["1.0.0", "0.0.1", "unknown", "", "garbage"] {
            assert_eq!(compare("unknown", other), Comparison::Unknown);
            assert_eq!(compare(other, "unknown"), Comparison::Unknown);
        }
    }

    #[test]
    fn test_semver_not_string() {
        // "0.0.9" < "0.0.10" semantically, but "0.0.9" > "0.0.10" lexically
        assert_eq!(compare("0.0.9", "0.0.10"), Comparison::UpdateAvailable);
        assert_eq!(compare("0.10.0", "0.9.0"), Comparison::Ahead);
        assert_eq!(compare("9.0.0", "10.0.0"), Comparison::UpdateAvailable);
    }

    #[test]
    fn test_padding_and_prefix() {
        assert_eq!(compare("1.2", "1.2.0"), Comparison::UpToDate);
        assert_eq!(compare("v1.2.0", "1.2.0"), Comparison::UpToDate);
        assert_eq!(compare("1.2.0+build.7", "1.2.0"), Comparison::UpToDate);
    }

    #[test]
    fn test_prerelease_ordering() {
        assert_eq!(compare("1.0.0-rc.1", "1.0.0"), Comparison::UpdateAvailable);
        assert_eq!(compare("1.0.0-alpha", "1.0.0-beta"), Comparison::UpdateAvailable);
        assert_eq!(compare("1.0.0-rc.2", "1.0.0-rc.10"), Comparison::UpdateAvailable);
        assert_eq!(compare("1.0.0-alpha.1", "1.0.0-alpha"), Comparison::Ahead);
        assert_eq!(compare("1.0.0-1", "1.0.0-alpha"), Comparison::UpdateAvailable);
    }

    #[test]
    fn test_ordering_is_antisymmetric() {
        let versions = ["0.9", "1.0.0-rc.1", "1.0.0", "1.0.1", "1.10.0", "2"];
        for (i, a) in versions.iter().enumerate() {
            for (j, b) in versions.iter().enumerate() {
                let expected = i.cmp(&j);
                assert_eq!(version_ordering(a, b), Some(expected), "{} vs {}", a, b);
            }
        }
    }

    #[test]
    fn test_invalid_versions() {
        assert!(!is_valid_version(""));
        assert!(!is_valid_version("1..2"));
        assert!(!is_valid_version("1.x"));
        assert!(!is_valid_version("1.0.0-"));
        assert!(is_valid_version("v3.2.1"));
    }

    #[test]
    fn test_missing_marker_is_unknown() {
        let temp = TempDir::new().unwrap();
        let store = VersionStore::new(temp.path().join("version.json"));
        assert_eq!(store.current(), UNKNOWN_VERSION);
        assert!(store.marker().is_none());
    }

    #[test]
    fn test_corrupt_marker_is_unknown() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("version.json");
        fs::write(&path, "{not json").unwrap();
        assert_eq!(VersionStore::new(&path).current(), UNKNOWN_VERSION);

        fs::write(&path, r#"{"version": "", "updated_at": "2026-01-01T00:00:00Z"}"#).unwrap();
        assert_eq!(VersionStore::new(&path).current(), UNKNOWN_VERSION);
    }

    #[test]
    fn test_current_ignores_updated_at() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("version.json");
        let store = VersionStore::new(&path);

        fs::write(&path, r#"{"version": "3.0.0"}"#).unwrap();
        assert_eq!(store.current(), "3.0.0");
        assert!(store.marker().is_none());

        fs::write(&path, r#"{"version": " 3.0.1 ", "updated_at": 1767225600}"#).unwrap();
        assert_eq!(store.current(), "3.0.1");

        fs::write(&path, r#"{"version": "3.0.2", "updated_at": "2026-01-01 00:00"}"#).unwrap();
        assert_eq!(store.current(), "3.0.2");

        fs::write(&path, r#"{"version": 3}"#).unwrap();
        assert_eq!(store.current(), UNKNOWN_VERSION);
    }

    #[test]
    fn test_write_then_current() {
        let temp = TempDir::new().unwrap();
        let store = VersionStore::new(temp.path().join("state/version.json"));
        assert!(store.write("3.2.1"));
        assert_eq!(store.current(), "3.2.1");

        // updated_at must be a real RFC 3339 timestamp on disk
        let raw: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(store.path()).unwrap()).unwrap();
        let stamp = raw["updated_at"].as_str().unwrap();
        assert!(DateTime::parse_from_rfc3339(stamp).is_ok());
    }

    #[test]
    fn test_write_failure_returns_false() {
        let temp = TempDir::new().unwrap();
        // Parent "directory" is a file
        let blocker = temp.path().join("blocker");
        fs::write(&blocker, "x").unwrap();
        let store = VersionStore::new(blocker.join("version.json"));
        assert!(!store.write("1.0.0"));
    }
}
