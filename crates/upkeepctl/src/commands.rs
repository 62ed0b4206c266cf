//! Command execution: clap commands onto the engine's closed command set,
//! report lines onto stdout.

use std::io::{self, Write};
use tracing::debug;

use upkeep_common::{Command, UpdateExecutor};

use crate::cli::Commands;

impl From<Commands> for Command {
    fn from(cmd: Commands) -> Self {
        match cmd {
            Commands::Status => Command::Status,
            Commands::Check => Command::Check,
            Commands::Upgrade => Command::Upgrade,
            Commands::Lock => Command::Lock,
            Commands::Unlock => Command::Unlock,
            Commands::MaintenanceOn => Command::MaintenanceOn,
            Commands::MaintenanceOff => Command::MaintenanceOff,
            Commands::Apply {
                file,
                sha256,
                version,
            } => Command::Apply {
                file,
                sha256: sha256.filter(|s| !s.trim().is_empty()),
                version: version.filter(|v| !v.trim().is_empty()),
            },
            Commands::Rollback { from } => Command::Rollback { from },
        }
    }
}

/// Run one command, write its report lines to `out`, return the exit code
pub fn execute(
    executor: &UpdateExecutor,
    command: Commands,
    out: &mut impl Write,
) -> io::Result<i32> {
    let command = Command::from(command);
    let report = executor.run(&command);
    for line in &report.lines {
        writeln!(out, "{}", line)?;
    }
    let code = report.status.exit_code();
    debug!("{} finished with exit code {}", command.name(), code);
    Ok(code)
}
