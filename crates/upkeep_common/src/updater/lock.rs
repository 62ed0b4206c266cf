//! Update lock and maintenance flag.
//!
//! Two independent marker files; presence is the only signal other code
//! consumes:
//! - `update.lock`: an update is in progress. Content is a `LockInfo` JSON
//!   blob (PID, timestamp, host, step) for debugging and recovery.
//! - `maintenance.flag`: request handlers serve the maintenance page.
//!   Content is the RFC 3339 time it was raised.
//!
//! Two surfaces:
//! - Advisory (`lock`, `unlock`, `maintenance`) for the operator commands.
//!   Idempotent. A second `lock()` logs a notice and succeeds.
//! - Guarded (`acquire`, `enter_maintenance`) for the orchestrator. Returns
//!   `LockHandle` / `MaintenanceGuard`, which clear their marker on drop.
//!   `acquire` refuses a marker held by another live process; dead, stale
//!   or corrupt markers are reclaimed.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{info, warn};

use crate::error::LockError;
use crate::ops_log::OpsLog;

/// Maximum age of a lock before it's considered stale (30 minutes)
const MAX_LOCK_AGE_SECS: u64 = 1800;

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Lock file contents
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockInfo {
    pub pid: u32,
    /// Unix epoch seconds
    pub acquired_at: u64,
    pub hostname: String,
    pub step: String,
}

impl LockInfo {
    pub fn new(step: &str) -> Self {
        let hostname = fs::read_to_string("/etc/hostname")
            .map(|s| s.trim().to_string())
            .unwrap_or_else(|_| "unknown".to_string());

        Self {
            pid: process::id(),
            acquired_at: now_secs(),
            hostname,
            step: step.to_string(),
        }
    }

    pub fn age_secs(&self) -> u64 {
        now_secs().saturating_sub(self.acquired_at)
    }

    pub fn is_stale(&self) -> bool {
        self.age_secs() > MAX_LOCK_AGE_SECS
    }

    pub fn is_own(&self) -> bool {
        self.pid == process::id()
    }

    /// Without /proc there is no cheap liveness check; assume alive and let
    /// staleness decide.
    pub fn process_exists(&self) -> bool {
        let proc_root = Path::new("/proc");
        if !proc_root.is_dir() {
            return true;
        }
        proc_root.join(self.pid.to_string()).exists()
    }
}

#[derive(Debug, Clone)]
pub struct LockCoordinator {
    lock_path: PathBuf,
    maintenance_path: PathBuf,
    ops_log: OpsLog,
}

impl LockCoordinator {
    pub fn new(
        lock_path: impl Into<PathBuf>,
        maintenance_path: impl Into<PathBuf>,
        ops_log: OpsLog,
    ) -> Self {
        Self {
            lock_path: lock_path.into(),
            maintenance_path: maintenance_path.into(),
            ops_log,
        }
    }

    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }

    pub fn maintenance_path(&self) -> &Path {
        &self.maintenance_path
    }

    pub fn is_locked(&self) -> bool {
        self.lock_path.exists()
    }

    pub fn maintenance_enabled(&self) -> bool {
        self.maintenance_path.exists()
    }

    /// Current holder, if the marker parses
    pub fn holder(&self) -> Option<LockInfo> {
        let content = fs::read_to_string(&self.lock_path).ok()?;
        serde_json::from_str(&content).ok()
    }

    /// Advisory lock. Not exclusive: an existing marker is left as is.
    pub fn lock(&self) -> Result<(), LockError> {
        if self.is_locked() {
            info!("update lock already present at {}, continuing", self.lock_path.display());
            self.ops_log.log("lock", "lock_already_held", None);
            return Ok(());
        }
        let info = LockInfo::new("manual");
        write_marker(&self.lock_path, &serde_json::to_string_pretty(&info)?)?;
        info!("update lock created");
        self.ops_log
            .log("lock", "locked", Some(&format!("pid={}", info.pid)));
        Ok(())
    }

    /// Remove the lock marker if present
    pub fn unlock(&self) -> Result<(), LockError> {
        if remove_marker(&self.lock_path)? {
            info!("update lock removed");
            self.ops_log.log("lock", "unlocked", None);
        }
        Ok(())
    }

    /// Raise or clear the maintenance flag
    pub fn maintenance(&self, on: bool) -> Result<(), LockError> {
        if on {
            if self.maintenance_enabled() {
                return Ok(());
            }
            write_marker(&self.maintenance_path, &Utc::now().to_rfc3339())?;
            info!("maintenance mode on");
            self.ops_log.log("maintenance", "on", None);
        } else if remove_marker(&self.maintenance_path)? {
            info!("maintenance mode off");
            self.ops_log.log("maintenance", "off", None);
        }
        Ok(())
    }

    /// Take the lock for an orchestrated run
    pub fn acquire(&self, step: &str) -> Result<LockHandle, LockError> {
        if let Ok(content) = fs::read_to_string(&self.lock_path) {
            match serde_json::from_str::<LockInfo>(&content) {
                Ok(holder) if holder.is_own() => {
                    // Re-entrant within one process
                    fs::remove_file(&self.lock_path)?;
                }
                Ok(holder) if holder.is_stale() => {
                    warn!("recovering stale update lock from PID {}", holder.pid);
                    self.ops_log.log(
                        "updater",
                        "stale_lock_recovered",
                        Some(&format!("pid={} age={}s", holder.pid, holder.age_secs())),
                    );
                    fs::remove_file(&self.lock_path)?;
                }
                Ok(holder) if !holder.process_exists() => {
                    info!("recovering update lock left by exited PID {}", holder.pid);
                    self.ops_log.log(
                        "updater",
                        "dead_process_lock_recovered",
                        Some(&format!("pid={}", holder.pid)),
                    );
                    fs::remove_file(&self.lock_path)?;
                }
                Ok(holder) => {
                    return Err(LockError::AlreadyLocked {
                        pid: holder.pid,
                        age_secs: holder.age_secs(),
                        step: holder.step,
                    });
                }
                Err(e) => {
                    warn!("update lock unreadable ({}), recovering", e);
                    self.ops_log
                        .log("updater", "corrupted_lock_recovered", Some(&e.to_string()));
                    fs::remove_file(&self.lock_path)?;
                }
            }
        }

        if let Some(parent) = self.lock_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let info = LockInfo::new(step);
        let content = serde_json::to_string_pretty(&info)?;
        let mut file = match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.lock_path)
        {
            Ok(f) => f,
            // Another process won the race between the check and the create
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                let holder = self.holder();
                return Err(LockError::AlreadyLocked {
                    pid: holder.as_ref().map(|h| h.pid).unwrap_or(0),
                    age_secs: holder.as_ref().map(|h| h.age_secs()).unwrap_or(0),
                    step: holder.map(|h| h.step).unwrap_or_default(),
                });
            }
            Err(e) => return Err(e.into()),
        };
        file.write_all(content.as_bytes())?;
        file.sync_all()?;

        info!("update lock acquired (step: {})", step);
        self.ops_log.log(
            "updater",
            "lock_acquired",
            Some(&format!("pid={} step={}", info.pid, step)),
        );

        Ok(LockHandle {
            path: self.lock_path.clone(),
            ops_log: self.ops_log.clone(),
            released: false,
        })
    }

    /// Raise the maintenance flag for the lifetime of the returned guard
    pub fn enter_maintenance(&self) -> Result<MaintenanceGuard, LockError> {
        write_marker(&self.maintenance_path, &Utc::now().to_rfc3339())?;
        info!("maintenance mode on");
        self.ops_log.log("maintenance", "on", None);
        Ok(MaintenanceGuard {
            path: self.maintenance_path.clone(),
            ops_log: self.ops_log.clone(),
            released: false,
        })
    }
}

fn write_marker(path: &Path, content: &str) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, content)
}

/// Ok(true) if a marker was removed, Ok(false) if there was none
fn remove_marker(path: &Path) -> io::Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

/// Held update lock - released on drop
#[derive(Debug)]
pub struct LockHandle {
    path: PathBuf,
    ops_log: OpsLog,
    released: bool,
}

impl LockHandle {
    /// Do we still own the marker on disk?
    pub fn is_valid(&self) -> bool {
        fs::read_to_string(&self.path)
            .ok()
            .and_then(|c| serde_json::from_str::<LockInfo>(&c).ok())
            .map(|info| info.is_own())
            .unwrap_or(false)
    }

    /// Record the current step in the marker (debugging aid)
    pub fn update_step(&self, step: &str) -> io::Result<()> {
        if let Ok(content) = fs::read_to_string(&self.path) {
            if let Ok(mut info) = serde_json::from_str::<LockInfo>(&content) {
                info.step = step.to_string();
                let new_content = serde_json::to_string_pretty(&info)
                    .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
                fs::write(&self.path, new_content)?;
            }
        }
        Ok(())
    }

    pub fn release(mut self) {
        self.release_inner();
    }

    fn release_inner(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        if !self.is_valid() {
            return;
        }
        match fs::remove_file(&self.path) {
            Ok(()) => {
                info!("update lock released");
                self.ops_log.log("updater", "lock_released", None);
            }
            Err(e) => {
                warn!("failed to release update lock: {}", e);
                self.ops_log
                    .log("updater", "lock_release_error", Some(&e.to_string()));
            }
        }
    }
}

impl Drop for LockHandle {
    fn drop(&mut self) {
        self.release_inner();
    }
}

/// Raised maintenance flag - cleared on drop
#[derive(Debug)]
pub struct MaintenanceGuard {
    path: PathBuf,
    ops_log: OpsLog,
    released: bool,
}

impl MaintenanceGuard {
    pub fn release(mut self) {
        self.release_inner();
    }

    fn release_inner(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        match remove_marker(&self.path) {
            Ok(_) => {
                info!("maintenance mode off");
                self.ops_log.log("maintenance", "off", None);
            }
            Err(e) => {
                warn!("failed to clear maintenance flag: {}", e);
                self.ops_log
                    .log("maintenance", "off_error", Some(&e.to_string()));
            }
        }
    }
}

impl Drop for MaintenanceGuard {
    fn drop(&mut self) {
        self.release_inner();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn coordinator(temp: &TempDir) -> LockCoordinator {
        LockCoordinator::new(
            temp.path().join("state/update.lock"),
            temp.path().join("state/maintenance.flag"),
            OpsLog::open(temp.path().join("state/ops.log")),
        )
    }

    fn plant_lock(coord: &LockCoordinator, info: &LockInfo) {
        fs::create_dir_all(coord.lock_path().parent().unwrap()).unwrap();
        fs::write(coord.lock_path(), serde_json::to_string(info).unwrap()).unwrap();
    }

    #[test]
    fn test_lock_info_creation() {
        let info = LockInfo::new("upgrade");
        assert_eq!(info.pid, process::id());
        assert_eq!(info.step, "upgrade");
        assert!(!info.is_stale());
        assert!(info.process_exists());
    }

    #[test]
    fn test_lock_info_stale_detection() {
        let mut info = LockInfo::new("test");
        info.acquired_at = now_secs() - (MAX_LOCK_AGE_SECS + 100);
        assert!(info.is_stale());
    }

    #[test]
    fn test_double_lock_is_not_exclusive() {
        let temp = TempDir::new().unwrap();
        let coord = coordinator(&temp);
        coord.lock().unwrap();
        coord.lock().unwrap();
        assert!(coord.is_locked());
    }

    #[test]
    fn test_unlock_idempotent() {
        let temp = TempDir::new().unwrap();
        let coord = coordinator(&temp);
        coord.unlock().unwrap();
        coord.lock().unwrap();
        coord.unlock().unwrap();
        coord.unlock().unwrap();
        assert!(!coord.is_locked());
    }

    #[test]
    fn test_maintenance_toggle_idempotent() {
        let temp = TempDir::new().unwrap();
        let coord = coordinator(&temp);
        coord.maintenance(true).unwrap();
        coord.maintenance(true).unwrap();
        assert!(coord.maintenance_enabled());
        coord.maintenance(false).unwrap();
        coord.maintenance(false).unwrap();
        assert!(!coord.maintenance_enabled());
    }

    #[test]
    fn test_acquire_and_drop_releases() {
        let temp = TempDir::new().unwrap();
        let coord = coordinator(&temp);
        {
            let handle = coord.acquire("upgrade").unwrap();
            assert!(handle.is_valid());
            assert_eq!(coord.holder().unwrap().step, "upgrade");
            handle.update_step("applying").unwrap();
            assert_eq!(coord.holder().unwrap().step, "applying");
        }
        assert!(!coord.is_locked());
    }

    #[test]
    fn test_acquire_rejects_live_foreign_holder() {
        let temp = TempDir::new().unwrap();
        let coord = coordinator(&temp);
        // PID 1 is always alive on Linux
        let mut foreign = LockInfo::new("upgrade");
        foreign.pid = 1;
        plant_lock(&coord, &foreign);

        match coord.acquire("apply") {
            Err(LockError::AlreadyLocked { pid, .. }) => assert_eq!(pid, 1),
            other => panic!("expected AlreadyLocked, got {:?}", other.map(|_| ())),
        }
        // The foreign marker is untouched
        assert_eq!(coord.holder().unwrap().pid, 1);
    }

    #[test]
    fn test_acquire_recovers_dead_stale_and_corrupt() {
        let temp = TempDir::new().unwrap();
        let coord = coordinator(&temp);

        let mut dead = LockInfo::new("upgrade");
        dead.pid = 999_999;
        plant_lock(&coord, &dead);
        coord.acquire("a").unwrap().release();

        let mut stale = LockInfo::new("upgrade");
        stale.pid = 1;
        stale.acquired_at = now_secs() - (MAX_LOCK_AGE_SECS + 10);
        plant_lock(&coord, &stale);
        coord.acquire("b").unwrap().release();

        fs::write(coord.lock_path(), "").unwrap();
        coord.acquire("c").unwrap().release();
        assert!(!coord.is_locked());
    }

    #[test]
    fn test_acquire_after_advisory_lock_in_same_process() {
        let temp = TempDir::new().unwrap();
        let coord = coordinator(&temp);
        coord.lock().unwrap();
        let handle = coord.acquire("upgrade").unwrap();
        assert!(handle.is_valid());
    }

    #[test]
    fn test_release_leaves_foreign_marker() {
        let temp = TempDir::new().unwrap();
        let coord = coordinator(&temp);
        let handle = coord.acquire("upgrade").unwrap();

        // Someone replaced the marker behind our back
        let mut foreign = LockInfo::new("other");
        foreign.pid = 1;
        plant_lock(&coord, &foreign);

        handle.release();
        assert!(coord.is_locked());
    }

    #[test]
    fn test_maintenance_guard_clears_on_drop() {
        let temp = TempDir::new().unwrap();
        let coord = coordinator(&temp);
        {
            let _guard = coord.enter_maintenance().unwrap();
            assert!(coord.maintenance_enabled());
            let stamp = fs::read_to_string(coord.maintenance_path()).unwrap();
            assert!(chrono::DateTime::parse_from_rfc3339(&stamp).is_ok());
        }
        assert!(!coord.maintenance_enabled());
    }

    #[test]
    fn test_ops_log_records_lock_events() {
        let temp = TempDir::new().unwrap();
        let coord = coordinator(&temp);
        coord.lock().unwrap();
        coord.unlock().unwrap();
        let events: Vec<String> = OpsLog::open(temp.path().join("state/ops.log"))
            .read_all()
            .into_iter()
            .map(|e| e.event)
            .collect();
        assert_eq!(events, vec!["locked", "unlocked"]);
    }
}
