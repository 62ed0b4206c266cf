//! Path layout for the updater
//!
//! Everything the updater persists lives under the state directory, which by
//! default sits inside the preserved `data/` tree so mirroring never touches it.

use chrono::Utc;
use std::io;
use std::path::{Path, PathBuf};

use crate::config::UpkeepConfig;

pub const VERSION_FILE: &str = "version.json";
pub const LOCK_FILE: &str = "update.lock";
pub const MAINTENANCE_FILE: &str = "maintenance.flag";
pub const MANIFEST_CACHE_FILE: &str = "manifest_cache.json";
pub const OPS_LOG_FILE: &str = "ops.log";
pub const STAGING_DIR: &str = "staging";
pub const BACKUP_DIR: &str = "backups";

/// Sidecar extension next to each backup snapshot
pub const BACKUP_VERSION_EXT: &str = "version";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    pub live_root: PathBuf,
    pub state_dir: PathBuf,
}

impl Layout {
    pub fn new(live_root: impl Into<PathBuf>, state_dir: impl Into<PathBuf>) -> Self {
        Self {
            live_root: live_root.into(),
            state_dir: state_dir.into(),
        }
    }

    pub fn from_config(config: &UpkeepConfig) -> Self {
        Self::new(config.paths.live_root.clone(), config.state_dir())
    }

    pub fn version_file(&self) -> PathBuf {
        self.state_dir.join(VERSION_FILE)
    }

    pub fn lock_file(&self) -> PathBuf {
        self.state_dir.join(LOCK_FILE)
    }

    pub fn maintenance_file(&self) -> PathBuf {
        self.state_dir.join(MAINTENANCE_FILE)
    }

    pub fn manifest_cache_file(&self) -> PathBuf {
        self.state_dir.join(MANIFEST_CACHE_FILE)
    }

    pub fn ops_log_file(&self) -> PathBuf {
        self.state_dir.join(OPS_LOG_FILE)
    }

    pub fn staging_root(&self) -> PathBuf {
        self.state_dir.join(STAGING_DIR)
    }

    pub fn backup_root(&self) -> PathBuf {
        self.state_dir.join(BACKUP_DIR)
    }

    /// Version sidecar for a backup snapshot: `backups/<ts>.version`
    pub fn backup_version_file(backup_dir: &Path) -> PathBuf {
        backup_dir.with_extension(BACKUP_VERSION_EXT)
    }

    /// Backup snapshot directories, newest first
    pub fn list_backups(&self) -> Vec<PathBuf> {
        let mut backups: Vec<PathBuf> = match std::fs::read_dir(self.backup_root()) {
            Ok(entries) => entries
                .filter_map(|e| e.ok())
                .map(|e| e.path())
                .filter(|p| p.is_dir())
                .collect(),
            Err(_) => Vec::new(),
        };
        // Names are timestamps, lexical order is chronological
        backups.sort();
        backups.reverse();
        backups
    }
}

/// Create a fresh timestamp-named directory under `parent`.
///
/// Two sessions in the same second get a numeric suffix.
pub fn create_timestamped_dir(parent: &Path) -> io::Result<PathBuf> {
    std::fs::create_dir_all(parent)?;
    let stamp = Utc::now().format("%Y%m%d-%H%M%S").to_string();

    let mut candidate = parent.join(&stamp);
    let mut n = 1;
    while candidate.exists() {
        candidate = parent.join(format!("{}-{}", stamp, n));
        n += 1;
    }
    std::fs::create_dir(&candidate)?;
    Ok(candidate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_layout_paths() {
        let layout = Layout::new("/srv/app", "/srv/app/data/upkeep");
        assert_eq!(layout.lock_file(), PathBuf::from("/srv/app/data/upkeep/update.lock"));
        assert_eq!(
            layout.maintenance_file(),
            PathBuf::from("/srv/app/data/upkeep/maintenance.flag")
        );
        assert_eq!(
            Layout::backup_version_file(Path::new("/x/backups/20260101-120000")),
            PathBuf::from("/x/backups/20260101-120000.version")
        );
    }

    #[test]
    fn test_timestamped_dirs_are_unique() {
        let temp = TempDir::new().unwrap();
        let a = create_timestamped_dir(temp.path()).unwrap();
        let b = create_timestamped_dir(temp.path()).unwrap();
        assert_ne!(a, b);
        assert!(a.is_dir());
        assert!(b.is_dir());
    }

    #[test]
    fn test_list_backups_newest_first() {
        let temp = TempDir::new().unwrap();
        let layout = Layout::new(temp.path().join("live"), temp.path().join("state"));
        let root = layout.backup_root();
        std::fs::create_dir_all(root.join("20260101-000000")).unwrap();
        std::fs::create_dir_all(root.join("20260301-000000")).unwrap();
        std::fs::write(root.join("20260301-000000.version"), "1.0.0").unwrap();

        let backups = layout.list_backups();
        assert_eq!(backups.len(), 2);
        assert!(backups[0].ends_with("20260301-000000"));
    }
}
