//! Upkeep Common - self-update engine shared by the CLI and tests.
//!
//! The engine checks a remote manifest, downloads and verifies a package,
//! and mirrors its payload over the live tree under a lock and maintenance
//! flag, with a backup to roll back to.

pub mod config;
pub mod error;
pub mod ops_log;
pub mod paths;
pub mod updater;

pub use config::UpkeepConfig;
pub use error::{LockError, UpdateError};
pub use ops_log::OpsLog;
pub use paths::Layout;
pub use updater::*;
