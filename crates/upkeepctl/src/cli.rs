//! CLI - Command-line argument parsing
//!
//! Keeps argument parsing separate from execution logic.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Upkeep control CLI
#[derive(Parser, Debug)]
#[command(name = "upkeepctl")]
#[command(about = "Upkeep - self-update engine for the live application tree", long_about = None)]
#[command(version)]
#[command(disable_help_subcommand = true)]
pub struct Cli {
    /// Config file (overrides $UPKEEP_CONFIG and /etc/upkeep/config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Debug logging on stderr ($UPKEEP_LOG still wins when set)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    /// Show installed version, lock and maintenance state, cached remote version
    Status,

    /// Fetch the remote manifest and compare versions
    Check,

    /// Download, verify and apply the latest remote package
    Upgrade,

    /// Set the advisory update lock
    Lock,

    /// Clear the update lock
    Unlock,

    /// Turn maintenance mode on
    #[command(name = "maintenance:on")]
    MaintenanceOn,

    /// Turn maintenance mode off
    #[command(name = "maintenance:off")]
    MaintenanceOff,

    /// Apply a local package file
    Apply {
        /// Package archive (.zip, .tar, .tar.gz, .tgz)
        #[arg(long)]
        file: PathBuf,

        /// Expected SHA-256 of the package (hex)
        #[arg(long)]
        sha256: Option<String>,

        /// Version to record after a successful apply
        #[arg(long)]
        version: Option<String>,
    },

    /// Restore the live tree from a backup snapshot
    Rollback {
        /// Backup directory, or a snapshot name under the backup root
        #[arg(long)]
        from: PathBuf,
    },
}
