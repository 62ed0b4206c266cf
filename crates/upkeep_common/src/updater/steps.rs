//! Update orchestration.
//!
//! `upgrade` state machine:
//!
//! ```text
//! IDLE -> CHECKING -> DOWNLOADING -> VERIFYING -> EXTRACTING -> LOCATING
//!      -> BACKING_UP -> APPLYING -> { SUCCESS | ROLLING_BACK -> { SUCCESS | FAILED } }
//!      -> CLEANUP (maintenance off, unlock) -> TERMINAL
//! ```
//!
//! - Nothing is locked until the package is downloaded, verified, extracted
//!   and its payload located. Failures before that point leave no trace
//!   beyond the discarded staging session.
//! - `apply` (local file) takes the lock and maintenance flag first, so its
//!   early failures still go through cleanup.
//! - A failed backup is logged and the apply goes ahead.
//! - A failed apply restores from the backup when one exists.
//! - Only a clean apply resets caches and writes the version marker.

use chrono::{DateTime, Utc};
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

use super::extract::extract;
use super::fetch::package_file_name;
use super::hooks::{
    Authorizer, CacheReset, HttpRemote, LocalOperator, NoCacheReset, Remote, ShellCacheReset,
};
use super::integrity::verify_or_discard;
use super::interrupt::InterruptFlag;
use super::lock::{LockCoordinator, LockHandle, LockInfo, MaintenanceGuard};
use super::manifest::{CachedManifest, ManifestCache, RemoteManifest};
use super::mirror::{exclude_set, ExcludeSet, TreeMirror, TreeOps};
use super::payload::locate;
use super::version::{compare, is_valid_version, Comparison, VersionStore, UNKNOWN_VERSION};
use crate::config::UpkeepConfig;
use crate::error::UpdateError;
use crate::ops_log::OpsLog;
use crate::paths::{create_timestamped_dir, Layout};

/// Every operation the engine exposes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Status,
    Check,
    Upgrade,
    Lock,
    Unlock,
    MaintenanceOn,
    MaintenanceOff,
    Apply {
        file: PathBuf,
        sha256: Option<String>,
        /// Version recorded in the marker after a clean apply
        version: Option<String>,
    },
    Rollback {
        from: PathBuf,
    },
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::Status => "status",
            Command::Check => "check",
            Command::Upgrade => "upgrade",
            Command::Lock => "lock",
            Command::Unlock => "unlock",
            Command::MaintenanceOn => "maintenance:on",
            Command::MaintenanceOff => "maintenance:off",
            Command::Apply { .. } => "apply",
            Command::Rollback { .. } => "rollback",
        }
    }

    /// Commands that mutate the live tree and need authorization
    pub fn mutates_live_tree(&self) -> bool {
        matches!(
            self,
            Command::Upgrade | Command::Apply { .. } | Command::Rollback { .. }
        )
    }
}

/// Orchestrator states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateStep {
    Idle,
    Checking,
    /// Obtaining the artifact: download, or copy of a local file
    Downloading,
    Verifying,
    Extracting,
    Locating,
    BackingUp,
    Applying,
    RollingBack,
    Cleanup,
}

impl UpdateStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            UpdateStep::Idle => "idle",
            UpdateStep::Checking => "checking",
            UpdateStep::Downloading => "downloading",
            UpdateStep::Verifying => "verifying",
            UpdateStep::Extracting => "extracting",
            UpdateStep::Locating => "locating",
            UpdateStep::BackingUp => "backing_up",
            UpdateStep::Applying => "applying",
            UpdateStep::RollingBack => "rolling_back",
            UpdateStep::Cleanup => "cleanup",
        }
    }
}

impl fmt::Display for UpdateStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal outcome of a mutating command
#[derive(Debug)]
pub enum UpdateResult {
    /// Local version equals the remote one
    UpToDate { version: String },
    /// Local version is newer than the remote one
    Ahead { local: String, remote: String },
    /// Payload applied and marker written
    Updated {
        from: String,
        to: String,
        backup: Option<PathBuf>,
    },
    /// Payload applied, marker untouched
    Applied { backup: Option<PathBuf> },
    /// Apply failed and the backup was restored cleanly
    RolledBack { reason: String, backup: PathBuf },
    /// Manual rollback restored a snapshot
    Restored {
        from: PathBuf,
        version: Option<String>,
    },
    Failed { step: UpdateStep, error: UpdateError },
}

impl UpdateResult {
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            UpdateResult::UpToDate { .. }
                | UpdateResult::Ahead { .. }
                | UpdateResult::Updated { .. }
                | UpdateResult::Applied { .. }
                | UpdateResult::Restored { .. }
        )
    }
}

impl fmt::Display for UpdateResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpdateResult::UpToDate { version } => write!(f, "already up to date ({})", version),
            UpdateResult::Ahead { local, remote } => {
                write!(f, "installed {} is ahead of remote {}, nothing to do", local, remote)
            }
            UpdateResult::Updated { from, to, .. } => write!(f, "updated {} -> {}", from, to),
            UpdateResult::Applied { .. } => write!(f, "package applied"),
            UpdateResult::RolledBack { reason, backup } => write!(
                f,
                "apply failed ({}), restored from {}",
                reason,
                backup.display()
            ),
            UpdateResult::Restored { from, .. } => write!(f, "restored from {}", from.display()),
            UpdateResult::Failed { step, error } => {
                write!(f, "failed at {}: {}: {}", step, error.kind(), error)
            }
        }
    }
}

/// Result of `check`
#[derive(Debug, Clone)]
pub struct CheckReport {
    pub local: String,
    pub remote: String,
    pub comparison: Comparison,
    pub manifest: RemoteManifest,
}

/// Result of `status`
#[derive(Debug, Clone)]
pub struct StatusReport {
    pub version: String,
    pub updated_at: Option<DateTime<Utc>>,
    pub locked: bool,
    pub lock_holder: Option<LockInfo>,
    pub maintenance: bool,
    pub remote: Option<CachedManifest>,
    pub comparison: Option<Comparison>,
    pub latest_backup: Option<PathBuf>,
    pub backup_count: usize,
}

/// Coarse outcome for exit codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportStatus {
    Ok,
    Failed,
    RolledBack,
}

impl ReportStatus {
    pub fn exit_code(&self) -> i32 {
        match self {
            ReportStatus::Ok => 0,
            ReportStatus::Failed => 1,
            ReportStatus::RolledBack => 2,
        }
    }
}

/// Human-readable outcome of one command
#[derive(Debug)]
pub struct CommandReport {
    pub lines: Vec<String>,
    pub status: ReportStatus,
    pub result: Option<UpdateResult>,
}

impl CommandReport {
    fn info(lines: Vec<String>) -> Self {
        Self {
            lines,
            status: ReportStatus::Ok,
            result: None,
        }
    }

    fn failure(line: String) -> Self {
        Self {
            lines: vec![line],
            status: ReportStatus::Failed,
            result: None,
        }
    }

    fn from_result(result: UpdateResult) -> Self {
        let status = match &result {
            UpdateResult::RolledBack { .. } => ReportStatus::RolledBack,
            UpdateResult::Failed { .. } => ReportStatus::Failed,
            _ => ReportStatus::Ok,
        };
        let mut lines = vec![result.to_string()];
        match &result {
            UpdateResult::Updated {
                backup: Some(b), ..
            }
            | UpdateResult::Applied { backup: Some(b) } => {
                lines.push(format!("backup kept at {}", b.display()));
            }
            UpdateResult::Restored { version: Some(v), .. } => {
                lines.push(format!("version marker reset to {}", v));
            }
            _ => {}
        }
        Self {
            lines,
            status,
            result: Some(result),
        }
    }
}

/// Lock + maintenance flag for one mutating run
struct Guards {
    lock: LockHandle,
    maintenance: MaintenanceGuard,
}

impl Guards {
    fn step(&self, step: UpdateStep) {
        if let Err(e) = self.lock.update_step(step.as_str()) {
            debug!("could not record step in lock file: {}", e);
        }
    }

    /// CLEANUP: maintenance off, then unlock
    fn release(self) {
        info!("step: {}", UpdateStep::Cleanup);
        let Guards { lock, maintenance } = self;
        maintenance.release();
        lock.release();
    }
}

/// Scratch directory for one extraction, removed on drop
struct StagingSession {
    dir: PathBuf,
}

impl StagingSession {
    fn create(root: &Path) -> Result<Self, UpdateError> {
        let dir = create_timestamped_dir(root).map_err(|e| UpdateError::filesystem(root, e))?;
        debug!("staging session {}", dir.display());
        Ok(Self { dir })
    }

    fn artifact_path(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    fn extract_dir(&self) -> PathBuf {
        self.dir.join("extract")
    }
}

impl Drop for StagingSession {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_dir_all(&self.dir) {
            debug!("staging cleanup of {} failed: {}", self.dir.display(), e);
        }
    }
}

/// Configured preserved names plus the top-level entry holding the state
/// directory, when that directory lives inside the live tree.
fn preserved_set(configured: &[String], layout: &Layout) -> ExcludeSet {
    let mut set = exclude_set(configured);
    let nested = layout
        .state_dir
        .strip_prefix(&layout.live_root)
        .ok()
        .and_then(|rel| rel.components().next())
        .map(|first| first.as_os_str().to_string_lossy().to_string());
    if let Some(name) = nested {
        if set.insert(name.clone()) {
            debug!("preserving {} (holds the state directory)", name);
        }
    }
    set
}

/// Update executor - sequences the components into commands
pub struct UpdateExecutor {
    config: UpkeepConfig,
    layout: Layout,
    preserved: ExcludeSet,
    versions: VersionStore,
    locks: LockCoordinator,
    manifest_cache: ManifestCache,
    ops_log: OpsLog,
    remote: Box<dyn Remote>,
    tree: Box<dyn TreeOps>,
    cache_reset: Box<dyn CacheReset>,
    authorizer: Box<dyn Authorizer>,
    interrupt: InterruptFlag,
}

impl UpdateExecutor {
    /// Production wiring from configuration
    pub fn new(config: UpkeepConfig) -> Self {
        let layout = Layout::from_config(&config);
        let ops_log = OpsLog::open(layout.ops_log_file());
        let cache_reset: Box<dyn CacheReset> = match &config.apply.cache_reset_command {
            Some(cmd) if !cmd.trim().is_empty() => Box::new(ShellCacheReset::new(cmd.clone())),
            _ => Box::new(NoCacheReset),
        };

        Self {
            preserved: preserved_set(&config.apply.preserved_paths, &layout),
            versions: VersionStore::new(layout.version_file()),
            locks: LockCoordinator::new(
                layout.lock_file(),
                layout.maintenance_file(),
                ops_log.clone(),
            ),
            manifest_cache: ManifestCache::new(layout.manifest_cache_file()),
            remote: Box::new(HttpRemote::from_config(&config.remote)),
            tree: Box::new(TreeMirror),
            cache_reset,
            authorizer: Box::new(LocalOperator),
            interrupt: InterruptFlag::global(),
            ops_log,
            layout,
            config,
        }
    }

    pub fn with_remote(mut self, remote: impl Remote + 'static) -> Self {
        self.remote = Box::new(remote);
        self
    }

    pub fn with_tree_ops(mut self, tree: impl TreeOps + 'static) -> Self {
        self.tree = Box::new(tree);
        self
    }

    pub fn with_cache_reset(mut self, hook: impl CacheReset + 'static) -> Self {
        self.cache_reset = Box::new(hook);
        self
    }

    pub fn with_authorizer(mut self, authorizer: impl Authorizer + 'static) -> Self {
        self.authorizer = Box::new(authorizer);
        self
    }

    pub fn with_interrupt(mut self, flag: InterruptFlag) -> Self {
        self.interrupt = flag;
        self
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn versions(&self) -> &VersionStore {
        &self.versions
    }

    pub fn locks(&self) -> &LockCoordinator {
        &self.locks
    }

    /// Dispatch table
    pub fn run(&self, command: &Command) -> CommandReport {
        info!("command: {}", command.name());

        if command.mutates_live_tree() && !self.authorizer.approve(command) {
            warn!("{} denied by authorizer", command.name());
            self.ops_log.log("updater", "denied", Some(command.name()));
            return CommandReport::from_result(UpdateResult::Failed {
                step: UpdateStep::Idle,
                error: UpdateError::Denied(command.name().to_string()),
            });
        }

        match command {
            Command::Status => CommandReport::info(format_status(&self.status())),
            Command::Check => match self.check() {
                Ok(report) => CommandReport::info(vec![
                    format!("installed: {}", report.local),
                    format!("remote: {}", report.remote),
                    format!("status: {}", report.comparison),
                ]),
                Err(e) => CommandReport::failure(format!("check failed: {}: {}", e.kind(), e)),
            },
            Command::Upgrade => CommandReport::from_result(self.upgrade()),
            Command::Lock => self.advisory(self.locks.lock(), "update lock set"),
            Command::Unlock => self.advisory(self.locks.unlock(), "update lock cleared"),
            Command::MaintenanceOn => {
                self.advisory(self.locks.maintenance(true), "maintenance mode on")
            }
            Command::MaintenanceOff => {
                self.advisory(self.locks.maintenance(false), "maintenance mode off")
            }
            Command::Apply {
                file,
                sha256,
                version,
            } => CommandReport::from_result(self.apply_file(
                file,
                sha256.as_deref(),
                version.as_deref(),
            )),
            Command::Rollback { from } => CommandReport::from_result(self.rollback_from(from)),
        }
    }

    fn advisory(
        &self,
        result: Result<(), crate::error::LockError>,
        ok_line: &str,
    ) -> CommandReport {
        match result {
            Ok(()) => CommandReport::info(vec![ok_line.to_string()]),
            Err(e) => CommandReport::failure(format!("LockError: {}", e)),
        }
    }

    pub fn status(&self) -> StatusReport {
        let marker = self.versions.marker();
        let version = self.versions.current();

        let remote = self
            .manifest_cache
            .load_fresh(self.config.remote.manifest_cache_ttl())
            .filter(|c| c.manifest.has_version());
        let comparison = remote
            .as_ref()
            .map(|c| compare(&version, &c.manifest.version));

        let backups = self.layout.list_backups();

        StatusReport {
            version,
            updated_at: marker.map(|m| m.updated_at),
            locked: self.locks.is_locked(),
            lock_holder: self.locks.holder(),
            maintenance: self.locks.maintenance_enabled(),
            remote,
            comparison,
            latest_backup: backups.first().cloned(),
            backup_count: backups.len(),
        }
    }

    /// Live manifest fetch + comparison; refreshes the status cache
    pub fn check(&self) -> Result<CheckReport, UpdateError> {
        let manifest = self.fetch_manifest_live()?;
        let local = self.versions.current();
        let comparison = compare(&local, &manifest.version);
        info!("check: local {} remote {} -> {}", local, manifest.version, comparison);
        Ok(CheckReport {
            local,
            remote: manifest.version.clone(),
            comparison,
            manifest,
        })
    }

    fn fetch_manifest_live(&self) -> Result<RemoteManifest, UpdateError> {
        let url = self.config.remote.manifest_url.trim();
        if url.is_empty() {
            return Err(UpdateError::Network("manifest_url is not configured".to_string()));
        }
        let manifest = self
            .remote
            .fetch_manifest(url)
            .filter(|m| m.has_version())
            .ok_or_else(|| UpdateError::Network(format!("no usable manifest at {}", url)))?;
        self.manifest_cache.store(&manifest);
        Ok(manifest)
    }

    fn interrupted(&self, before: UpdateStep) -> Result<(), UpdateError> {
        if self.interrupt.requested() {
            warn!("interrupt requested, stopping before {}", before);
            self.ops_log.log("updater", "interrupted", Some(before.as_str()));
            return Err(UpdateError::Interrupted(before.to_string()));
        }
        Ok(())
    }

    fn fail(&self, step: UpdateStep, error: UpdateError) -> UpdateResult {
        error!("{} failed: {}", step, error);
        self.ops_log.log(
            "updater",
            "failed",
            Some(&format!("step={} {}: {}", step, error.kind(), error)),
        );
        UpdateResult::Failed { step, error }
    }

    fn acquire_guards(&self, step: &str) -> Result<Guards, UpdateError> {
        let lock = self.locks.acquire(step)?;
        // If this fails the lock handle drops and unlocks
        let maintenance = self.locks.enter_maintenance()?;
        Ok(Guards { lock, maintenance })
    }

    /// Full remote upgrade
    pub fn upgrade(&self) -> UpdateResult {
        self.ops_log.log("updater", "run_started", Some("upgrade"));

        info!("step: {}", UpdateStep::Checking);
        let manifest = match self.fetch_manifest_live() {
            Ok(m) => m,
            Err(e) => return self.fail(UpdateStep::Checking, e),
        };
        let local = self.versions.current();
        let remote = manifest.version.trim().to_string();

        match compare(&local, &remote) {
            Comparison::UpToDate => {
                info!("already up to date at {}", local);
                self.ops_log.log("updater", "already_current", Some(&local));
                return UpdateResult::UpToDate { version: local };
            }
            Comparison::Ahead => {
                info!("installed {} is ahead of remote {}", local, remote);
                self.ops_log
                    .log("updater", "local_ahead", Some(&format!("{} > {}", local, remote)));
                return UpdateResult::Ahead { local, remote };
            }
            Comparison::Unknown if !is_valid_version(&remote) => {
                return self.fail(
                    UpdateStep::Checking,
                    UpdateError::PackageFormat(format!(
                        "remote version {:?} is not a version",
                        remote
                    )),
                );
            }
            Comparison::Unknown => {
                warn!("installed version is unknown, upgrading to {}", remote);
            }
            Comparison::UpdateAvailable => {}
        }
        self.ops_log
            .log("updater", "update_available", Some(&format!("{} -> {}", local, remote)));

        if let Err(e) = self.interrupted(UpdateStep::Downloading) {
            return self.fail(UpdateStep::Downloading, e);
        }

        let session = match StagingSession::create(&self.layout.staging_root()) {
            Ok(s) => s,
            Err(e) => return self.fail(UpdateStep::Downloading, e),
        };

        // DOWNLOADING .. LOCATING, nothing locked yet
        let payload = match self.stage_remote_package(&session, &manifest) {
            Ok(p) => p,
            Err((step, e)) => return self.fail(step, e),
        };

        if let Err(e) = self.interrupted(UpdateStep::BackingUp) {
            return self.fail(UpdateStep::BackingUp, e);
        }

        let guards = match self.acquire_guards("upgrade") {
            Ok(g) => g,
            Err(e) => return self.fail(UpdateStep::BackingUp, e),
        };

        let result = match self.mutate(&payload, &guards, &local) {
            Ok(backup) => self.succeed(guards, Some(&remote), backup, &local),
            Err(result) => {
                guards.release();
                result
            }
        };
        drop(session);
        result
    }

    fn stage_remote_package(
        &self,
        session: &StagingSession,
        manifest: &RemoteManifest,
    ) -> Result<PathBuf, (UpdateStep, UpdateError)> {
        info!("step: {}", UpdateStep::Downloading);
        let url = manifest.package_url.trim();
        if url.is_empty() {
            return Err((
                UpdateStep::Downloading,
                UpdateError::Network("manifest has no package_url".to_string()),
            ));
        }
        let name = package_file_name(url).ok_or_else(|| {
            (
                UpdateStep::Downloading,
                UpdateError::PackageFormat(format!("cannot derive a file name from {}", url)),
            )
        })?;
        let bytes = self.remote.fetch_package(url).ok_or_else(|| {
            (
                UpdateStep::Downloading,
                UpdateError::Network(format!("download of {} failed", url)),
            )
        })?;
        let artifact = session.artifact_path(&name);
        fs::write(&artifact, &bytes)
            .map_err(|e| (UpdateStep::Downloading, UpdateError::filesystem(&artifact, e)))?;
        self.ops_log
            .log("updater", "downloaded", Some(&format!("{} bytes={}", name, bytes.len())));

        info!("step: {}", UpdateStep::Verifying);
        if !verify_or_discard(&artifact, &manifest.sha256) {
            return Err((
                UpdateStep::Verifying,
                UpdateError::Integrity(format!("{} does not match the published SHA-256", name)),
            ));
        }

        self.unpack(session, &artifact)
    }

    /// EXTRACTING + LOCATING
    fn unpack(
        &self,
        session: &StagingSession,
        artifact: &Path,
    ) -> Result<PathBuf, (UpdateStep, UpdateError)> {
        info!("step: {}", UpdateStep::Extracting);
        let extract_dir = session.extract_dir();
        extract(artifact, &extract_dir).map_err(|e| (UpdateStep::Extracting, e))?;

        info!("step: {}", UpdateStep::Locating);
        locate(&extract_dir).ok_or_else(|| {
            (
                UpdateStep::Locating,
                UpdateError::PackageFormat("package has no app/ payload root".to_string()),
            )
        })
    }

    /// BACKING_UP + APPLYING (+ ROLLING_BACK). Ok carries the backup dir.
    fn mutate(
        &self,
        payload: &Path,
        guards: &Guards,
        live_version: &str,
    ) -> Result<Option<PathBuf>, UpdateResult> {
        let live = &self.layout.live_root;

        info!("step: {}", UpdateStep::BackingUp);
        guards.step(UpdateStep::BackingUp);
        let backup = self.take_backup(live, live_version);

        // Last safe point to stop
        if let Err(e) = self.interrupted(UpdateStep::Applying) {
            return Err(self.fail(UpdateStep::Applying, e));
        }

        info!("step: {}", UpdateStep::Applying);
        guards.step(UpdateStep::Applying);
        let report = self.tree.apply(payload, live, &self.preserved);
        if report.is_clean() {
            info!("apply complete: {}", report);
            self.ops_log.log("updater", "applied", Some(&report.to_string()));
            return Ok(backup);
        }

        let apply_error = report
            .to_error()
            .unwrap_or_else(|| UpdateError::filesystem(live, "apply failed"));
        error!("apply failed: {} ({})", apply_error, report);
        self.ops_log.log("updater", "apply_failed", Some(&apply_error.to_string()));

        let backup = match backup {
            Some(b) => b,
            None => return Err(self.fail(UpdateStep::Applying, apply_error)),
        };

        info!("step: {}", UpdateStep::RollingBack);
        guards.step(UpdateStep::RollingBack);
        let restore = self.tree.restore(&backup, live);
        if restore.is_clean() {
            warn!("live tree restored from {}", backup.display());
            self.ops_log
                .log("updater", "rolled_back", Some(&backup.display().to_string()));
            Err(UpdateResult::RolledBack {
                reason: apply_error.to_string(),
                backup,
            })
        } else {
            let restore_error = restore
                .to_error()
                .unwrap_or_else(|| UpdateError::filesystem(&backup, "restore failed"));
            Err(self.fail(
                UpdateStep::RollingBack,
                UpdateError::filesystem(
                    live,
                    format!("{} and restore also failed: {}", apply_error, restore_error),
                ),
            ))
        }
    }

    /// Best effort: a missing or partial backup never blocks the apply
    fn take_backup(&self, live: &Path, live_version: &str) -> Option<PathBuf> {
        let dir = match create_timestamped_dir(&self.layout.backup_root()) {
            Ok(d) => d,
            Err(e) => {
                warn!("cannot create backup directory: {}, applying without a backup", e);
                self.ops_log.log("updater", "backup_failed", Some(&e.to_string()));
                return None;
            }
        };

        if live_version != UNKNOWN_VERSION {
            let sidecar = Layout::backup_version_file(&dir);
            if let Err(e) = fs::write(&sidecar, live_version) {
                debug!("backup version sidecar not written: {}", e);
            }
        }

        let report = self.tree.backup(live, &dir, &self.preserved);
        if report.is_clean() {
            info!("backup at {}: {}", dir.display(), report);
            self.ops_log
                .log("updater", "backup_created", Some(&dir.display().to_string()));
        } else {
            warn!("backup at {} is incomplete ({}), continuing", dir.display(), report);
            self.ops_log.log(
                "updater",
                "backup_incomplete",
                Some(&format!("{} {}", dir.display(), report)),
            );
        }

        if dir.is_dir() {
            Some(dir)
        } else {
            None
        }
    }

    /// SUCCESS: cache reset, cleanup, marker, retention
    fn succeed(
        &self,
        guards: Guards,
        version: Option<&str>,
        backup: Option<PathBuf>,
        from: &str,
    ) -> UpdateResult {
        if !self.cache_reset.reset() {
            warn!("cache reset failed, continuing");
        }
        guards.release();

        if let Some(v) = version {
            if !self.versions.write(v) {
                error!("update applied but the version marker could not be written");
            }
            self.ops_log.log("updater", "update_complete", Some(v));
        } else {
            self.ops_log.log("updater", "apply_complete", None);
        }
        self.prune_backups();

        match version {
            Some(v) => UpdateResult::Updated {
                from: from.to_string(),
                to: v.to_string(),
                backup,
            },
            None => UpdateResult::Applied { backup },
        }
    }

    fn prune_backups(&self) {
        let keep = self.config.apply.backup_retention;
        if keep == 0 {
            return;
        }
        for old in self.layout.list_backups().into_iter().skip(keep) {
            match fs::remove_dir_all(&old) {
                Ok(()) => {
                    let sidecar = Layout::backup_version_file(&old);
                    if let Err(e) = fs::remove_file(&sidecar) {
                        if e.kind() != io::ErrorKind::NotFound {
                            debug!("failed to remove {}: {}", sidecar.display(), e);
                        }
                    }
                    debug!("pruned backup {}", old.display());
                    self.ops_log
                        .log("updater", "backup_pruned", Some(&old.display().to_string()));
                }
                Err(e) => warn!("failed to prune backup {}: {}", old.display(), e),
            }
        }
    }

    /// Apply a local package file. Lock and maintenance come first.
    pub fn apply_file(
        &self,
        file: &Path,
        sha256: Option<&str>,
        version: Option<&str>,
    ) -> UpdateResult {
        self.ops_log
            .log("updater", "run_started", Some(&format!("apply {}", file.display())));

        if let Some(v) = version {
            if !is_valid_version(v) {
                return self.fail(
                    UpdateStep::Idle,
                    UpdateError::Config(format!("{:?} is not a version", v)),
                );
            }
        }

        let guards = match self.acquire_guards("apply") {
            Ok(g) => g,
            Err(e) => return self.fail(UpdateStep::Idle, e),
        };
        let from = self.versions.current();

        match self.stage_local_package(file, sha256) {
            Ok((session, payload)) => {
                let result = match self.mutate(&payload, &guards, &from) {
                    Ok(backup) => self.succeed(guards, version, backup, &from),
                    Err(result) => {
                        guards.release();
                        result
                    }
                };
                drop(session);
                result
            }
            Err((step, e)) => {
                let result = self.fail(step, e);
                guards.release();
                result
            }
        }
    }

    fn stage_local_package(
        &self,
        file: &Path,
        sha256: Option<&str>,
    ) -> Result<(StagingSession, PathBuf), (UpdateStep, UpdateError)> {
        info!("step: {}", UpdateStep::Downloading);
        if !file.is_file() {
            return Err((
                UpdateStep::Downloading,
                UpdateError::filesystem(file, "package file not found"),
            ));
        }
        let name = file
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .ok_or_else(|| {
                (
                    UpdateStep::Downloading,
                    UpdateError::filesystem(file, "no file name"),
                )
            })?;

        let session = StagingSession::create(&self.layout.staging_root())
            .map_err(|e| (UpdateStep::Downloading, e))?;
        // Verify and extract a private copy; the operator's file is never deleted
        let artifact = session.artifact_path(&name);
        fs::copy(file, &artifact)
            .map_err(|e| (UpdateStep::Downloading, UpdateError::filesystem(&artifact, e)))?;

        info!("step: {}", UpdateStep::Verifying);
        match sha256 {
            Some(expected) => {
                if !verify_or_discard(&artifact, expected) {
                    return Err((
                        UpdateStep::Verifying,
                        UpdateError::Integrity(format!(
                            "{} does not match the given SHA-256",
                            name
                        )),
                    ));
                }
            }
            None => warn!("no checksum given for {}, skipping verification", name),
        }

        if let Err(e) = self.interrupted(UpdateStep::Extracting) {
            return Err((UpdateStep::Extracting, e));
        }

        let payload = self.unpack(&session, &artifact)?;
        Ok((session, payload))
    }

    /// Manual restore from a backup snapshot
    pub fn rollback_from(&self, from: &Path) -> UpdateResult {
        // Bare snapshot names resolve against the backup root
        let backup = if from.is_dir() {
            from.to_path_buf()
        } else {
            self.layout.backup_root().join(from)
        };
        if !backup.is_dir() {
            return self.fail(
                UpdateStep::RollingBack,
                UpdateError::filesystem(from, "backup directory not found"),
            );
        }

        self.ops_log
            .log("updater", "run_started", Some(&format!("rollback {}", backup.display())));
        let guards = match self.acquire_guards("rollback") {
            Ok(g) => g,
            Err(e) => return self.fail(UpdateStep::Idle, e),
        };

        info!("step: {}", UpdateStep::RollingBack);
        guards.step(UpdateStep::RollingBack);
        let report = self.tree.restore(&backup, &self.layout.live_root);
        guards.release();

        if !report.is_clean() {
            let e = report
                .to_error()
                .unwrap_or_else(|| UpdateError::filesystem(&backup, "restore failed"));
            return self.fail(UpdateStep::RollingBack, e);
        }

        self.ops_log
            .log("updater", "restored", Some(&backup.display().to_string()));
        let version = fs::read_to_string(Layout::backup_version_file(&backup))
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| is_valid_version(v));
        if let Some(v) = &version {
            if !self.versions.write(v) {
                warn!("restored tree but could not reset the version marker");
            }
        }

        UpdateResult::Restored {
            from: backup,
            version,
        }
    }
}

fn format_status(status: &StatusReport) -> Vec<String> {
    let mut lines = Vec::new();
    match status.updated_at {
        Some(at) => lines.push(format!(
            "installed: {} (updated {})",
            status.version,
            at.format("%Y-%m-%d %H:%M:%S UTC")
        )),
        None => lines.push(format!("installed: {}", status.version)),
    }

    match (&status.remote, status.comparison) {
        (Some(remote), Some(cmp)) => lines.push(format!(
            "remote: {} ({}, checked {})",
            remote.manifest.version,
            cmp,
            remote.fetched_at.format("%Y-%m-%d %H:%M:%S UTC")
        )),
        _ => lines.push("remote: not available".to_string()),
    }

    match (&status.lock_holder, status.locked) {
        (Some(holder), true) => lines.push(format!(
            "lock: held by PID {} for {}s (step: {})",
            holder.pid,
            holder.age_secs(),
            holder.step
        )),
        (None, true) => lines.push("lock: present".to_string()),
        _ => lines.push("lock: free".to_string()),
    }
    lines.push(format!(
        "maintenance: {}",
        if status.maintenance { "on" } else { "off" }
    ));

    match &status.latest_backup {
        Some(latest) => lines.push(format!(
            "backups: {} (latest {})",
            status.backup_count,
            latest.display()
        )),
        None => lines.push("backups: none".to_string()),
    }
    lines
}
