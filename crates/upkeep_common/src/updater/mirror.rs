//! TreeMirror - the one recursive-copy primitive behind backup, apply and
//! restore.
//!
//! `mirror(src, dst, exclude)` walks every top-level entry of `src` whose
//! name is not in `exclude` and recreates it under `dst`: directories are
//! created, files are copied over whatever is there, symlinks are recreated.
//! Nothing is ever deleted from `dst`. An entry that contains `dst` itself is
//! skipped as if it were excluded.
//!
//! Individual failures do not stop the walk. Each one is recorded in the
//! returned `MirrorReport`; `is_clean()` is the overall verdict.

use std::collections::BTreeSet;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::error::UpdateError;

/// Top-level names skipped by a mirror pass
pub type ExcludeSet = BTreeSet<String>;

pub fn exclude_set<S: AsRef<str>>(names: &[S]) -> ExcludeSet {
    names.iter().map(|n| n.as_ref().to_string()).collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MirrorFailure {
    pub path: PathBuf,
    pub message: String,
}

#[derive(Debug, Clone, Default)]
pub struct MirrorReport {
    pub files_copied: usize,
    pub dirs_created: usize,
    pub links_created: usize,
    /// Top-level entries skipped because they were excluded
    pub skipped: Vec<String>,
    pub failures: Vec<MirrorFailure>,
}

impl MirrorReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    fn fail(&mut self, path: &Path, err: impl fmt::Display) {
        warn!("mirror: {}: {}", path.display(), err);
        self.failures.push(MirrorFailure {
            path: path.to_path_buf(),
            message: err.to_string(),
        });
    }

    /// First failure as an `UpdateError`, annotated with the total count
    pub fn to_error(&self) -> Option<UpdateError> {
        let first = self.failures.first()?;
        let message = if self.failures.len() > 1 {
            format!("{} (and {} more failures)", first.message, self.failures.len() - 1)
        } else {
            first.message.clone()
        };
        Some(UpdateError::Filesystem {
            path: first.path.clone(),
            message,
        })
    }
}

impl fmt::Display for MirrorReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} files, {} dirs, {} links, {} failures",
            self.files_copied,
            self.dirs_created,
            self.links_created,
            self.failures.len()
        )
    }
}

pub fn mirror(src: &Path, dst: &Path, exclude: &ExcludeSet) -> MirrorReport {
    let mut report = MirrorReport::default();

    if !src.is_dir() {
        report.fail(src, "source is not a directory");
        return report;
    }
    if let Err(e) = fs::create_dir_all(dst) {
        report.fail(dst, e);
        return report;
    }

    let mut top_level: Vec<PathBuf> = match fs::read_dir(src) {
        Ok(entries) => entries.filter_map(|e| e.ok()).map(|e| e.path()).collect(),
        Err(e) => {
            report.fail(src, e);
            return report;
        }
    };
    top_level.sort();

    for entry in top_level {
        let name = entry
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        if exclude.contains(&name) {
            debug!("mirror: skipping preserved {}", name);
            report.skipped.push(name);
            continue;
        }
        if dst.starts_with(&entry) {
            // Copying this entry would copy the destination into itself
            debug!("mirror: skipping {} (contains destination)", name);
            report.skipped.push(name);
            continue;
        }
        mirror_entry(src, &entry, dst, &mut report);
    }

    debug!("mirror {} -> {}: {}", src.display(), dst.display(), report);
    report
}

fn mirror_entry(src_root: &Path, entry: &Path, dst_root: &Path, report: &mut MirrorReport) {
    // WalkDir follows a symlinked root, so top-level links are handled here
    let is_link = fs::symlink_metadata(entry)
        .map(|m| m.file_type().is_symlink())
        .unwrap_or(false);
    if is_link {
        let target = match entry.file_name() {
            Some(name) => dst_root.join(name),
            None => return,
        };
        match copy_symlink(entry, &target) {
            Ok(()) => report.links_created += 1,
            Err(e) => report.fail(&target, e),
        }
        return;
    }

    let mut walker = WalkDir::new(entry).follow_links(false).into_iter();

    while let Some(item) = walker.next() {
        let item = match item {
            Ok(item) => item,
            Err(e) => {
                let path = e.path().unwrap_or(entry).to_path_buf();
                report.fail(&path, e);
                continue;
            }
        };

        let relative = match item.path().strip_prefix(src_root) {
            Ok(r) => r,
            Err(e) => {
                report.fail(item.path(), e);
                continue;
            }
        };
        let target = dst_root.join(relative);
        let file_type = item.file_type();

        if file_type.is_dir() {
            let existed = target.is_dir();
            match fs::create_dir_all(&target) {
                Ok(()) => {
                    if !existed {
                        report.dirs_created += 1;
                    }
                }
                Err(e) => {
                    report.fail(&target, e);
                    // Children cannot land anywhere
                    walker.skip_current_dir();
                }
            }
        } else if file_type.is_symlink() {
            match copy_symlink(item.path(), &target) {
                Ok(()) => report.links_created += 1,
                Err(e) => report.fail(&target, e),
            }
        } else {
            match copy_file(item.path(), &target) {
                Ok(()) => report.files_copied += 1,
                Err(e) => report.fail(&target, e),
            }
        }
    }
}

fn copy_file(from: &Path, to: &Path) -> io::Result<()> {
    // Never write through an existing symlink at the destination
    if let Ok(meta) = fs::symlink_metadata(to) {
        if meta.file_type().is_symlink() {
            fs::remove_file(to)?;
        }
    }
    fs::copy(from, to).map(|_| ())
}

#[cfg(unix)]
fn copy_symlink(from: &Path, to: &Path) -> io::Result<()> {
    let link_target = fs::read_link(from)?;
    if let Ok(meta) = fs::symlink_metadata(to) {
        if meta.is_dir() {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                "a directory is in the way of a symlink",
            ));
        }
        fs::remove_file(to)?;
    }
    std::os::unix::fs::symlink(link_target, to)
}

#[cfg(not(unix))]
fn copy_symlink(from: &Path, to: &Path) -> io::Result<()> {
    // No portable symlink creation; copy what it points at
    copy_file(from, to)
}

/// The three ways the live tree is mirrored. Spy implementations of this
/// trait are how tests observe which mutations the orchestrator attempted.
pub trait TreeOps {
    /// Snapshot the live tree, skipping preserved paths
    fn backup(&self, live_root: &Path, backup_dir: &Path, preserved: &ExcludeSet) -> MirrorReport;

    /// Copy the staged payload over the live tree, skipping preserved paths
    fn apply(&self, payload_root: &Path, live_root: &Path, preserved: &ExcludeSet) -> MirrorReport;

    /// Copy a backup snapshot back over the live tree, no exclusions
    fn restore(&self, backup_dir: &Path, live_root: &Path) -> MirrorReport;
}

/// Production `TreeOps`: every operation is a plain `mirror`
#[derive(Debug, Clone, Copy, Default)]
pub struct TreeMirror;

impl TreeOps for TreeMirror {
    fn backup(&self, live_root: &Path, backup_dir: &Path, preserved: &ExcludeSet) -> MirrorReport {
        mirror(live_root, backup_dir, preserved)
    }

    fn apply(&self, payload_root: &Path, live_root: &Path, preserved: &ExcludeSet) -> MirrorReport {
        mirror(payload_root, live_root, preserved)
    }

    fn restore(&self, backup_dir: &Path, live_root: &Path) -> MirrorReport {
        mirror(backup_dir, live_root, &ExcludeSet::new())
    }
}
