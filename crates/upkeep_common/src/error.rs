//! Error types for the update engine.
//!
//! Components keep their "never raises" contracts (string sentinels, Option,
//! bool, MirrorReport). The orchestrator folds those into `UpdateError`.

use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, UpdateError>;

#[derive(Error, Debug)]
pub enum UpdateError {
    #[error("network error: {0}")]
    Network(String),

    #[error("integrity error: {0}")]
    Integrity(String),

    #[error("package format error: {0}")]
    PackageFormat(String),

    #[error("filesystem error at {path}: {message}")]
    Filesystem { path: PathBuf, message: String },

    #[error("lock error: {0}")]
    Lock(#[from] LockError),

    #[error("interrupted before {0}")]
    Interrupted(String),

    #[error("not authorized: {0}")]
    Denied(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl UpdateError {
    /// Short taxonomy tag used in CLI output and the ops log
    pub fn kind(&self) -> &'static str {
        match self {
            UpdateError::Network(_) => "NetworkError",
            UpdateError::Integrity(_) => "IntegrityError",
            UpdateError::PackageFormat(_) => "PackageFormatError",
            UpdateError::Filesystem { .. } => "FilesystemError",
            UpdateError::Lock(_) => "LockError",
            UpdateError::Interrupted(_) => "Interrupted",
            UpdateError::Denied(_) => "Denied",
            UpdateError::Config(_) => "ConfigError",
        }
    }

    pub fn filesystem(path: impl Into<PathBuf>, err: impl std::fmt::Display) -> Self {
        UpdateError::Filesystem {
            path: path.into(),
            message: err.to_string(),
        }
    }
}

/// Errors from the guarded lock surface
#[derive(Error, Debug)]
pub enum LockError {
    #[error("update lock held by PID {pid} for {age_secs}s (step: {step})")]
    AlreadyLocked {
        pid: u32,
        age_secs: u64,
        step: String,
    },

    #[error("lock IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("lock serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}
