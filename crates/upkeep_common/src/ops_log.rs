//! Operations Log - updater audit trail
//!
//! Append-only, one event per line, lives at `<state_dir>/ops.log`.
//!
//! Format: ISO8601 timestamp + component + event + [detail]
//! Example: 2026-10-19T09:12:44Z updater lock_acquired pid=4121 step=upgrade
//!
//! Appends are best effort. A full disk or read-only state directory must
//! never abort an update, so write failures only reach `tracing`.

use chrono::{DateTime, Utc};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

/// A single ops log entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpsEntry {
    pub timestamp: DateTime<Utc>,
    pub component: String,
    pub event: String,
    pub detail: Option<String>,
}

impl OpsEntry {
    pub fn new(component: &str, event: &str, detail: Option<&str>) -> Self {
        Self {
            timestamp: Utc::now(),
            component: component.to_string(),
            event: event.to_string(),
            detail: detail.map(|d| d.to_string()),
        }
    }

    /// Format as log line
    pub fn to_log_line(&self) -> String {
        let ts = self.timestamp.format("%Y-%m-%dT%H:%M:%SZ");
        match &self.detail {
            Some(detail) => format!("{} {} {} {}", ts, self.component, self.event, detail),
            None => format!("{} {} {}", ts, self.component, self.event),
        }
    }

    /// Parse from log line
    pub fn from_log_line(line: &str) -> Option<Self> {
        let parts: Vec<&str> = line.splitn(4, ' ').collect();
        if parts.len() < 3 {
            return None;
        }

        let timestamp = DateTime::parse_from_rfc3339(parts[0])
            .ok()?
            .with_timezone(&Utc);

        Some(Self {
            timestamp,
            component: parts[1].to_string(),
            event: parts[2].to_string(),
            detail: parts.get(3).map(|s| s.to_string()),
        })
    }
}

/// Ops log handle
#[derive(Debug, Clone)]
pub struct OpsLog {
    log_path: PathBuf,
}

impl OpsLog {
    pub fn open(log_path: impl Into<PathBuf>) -> Self {
        Self {
            log_path: log_path.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.log_path
    }

    /// Record an event; failures are swallowed after a debug trace
    pub fn log(&self, component: &str, event: &str, detail: Option<&str>) {
        let entry = OpsEntry::new(component, event, detail);
        if let Err(e) = self.append(&entry) {
            debug!("ops log append to {} failed: {}", self.log_path.display(), e);
        }
    }

    fn append(&self, entry: &OpsEntry) -> std::io::Result<()> {
        if let Some(parent) = self.log_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)?;

        writeln!(file, "{}", entry.to_log_line())
    }

    /// Read all parseable entries
    pub fn read_all(&self) -> Vec<OpsEntry> {
        let file = match File::open(&self.log_path) {
            Ok(f) => f,
            Err(_) => return Vec::new(),
        };

        BufReader::new(file)
            .lines()
            .map_while(|line| line.ok())
            .filter_map(|line| OpsEntry::from_log_line(&line))
            .collect()
    }

    /// Read recent entries (last N)
    pub fn read_recent(&self, count: usize) -> Vec<OpsEntry> {
        let all = self.read_all();
        let skip = all.len().saturating_sub(count);
        all.into_iter().skip(skip).collect()
    }
}
