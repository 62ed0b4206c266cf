//! Upkeep Control - CLI for the self-update engine
//!
//! One invocation runs one command as a single synchronous pipeline.

use anyhow::{Context, Result};
use clap::Parser;
use std::process::ExitCode;
use tracing::{info, warn};

use upkeep_common::{InterruptFlag, UpdateExecutor, UpkeepConfig};
use upkeepctl::cli::Cli;
use upkeepctl::{commands, logging};

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let config = UpkeepConfig::load(cli.config.as_deref()).context("loading configuration")?;
    logging::init(cli.verbose, &config.log.level);
    info!(
        "upkeepctl v{} (live root {})",
        env!("CARGO_PKG_VERSION"),
        config.paths.live_root.display()
    );

    // SIGINT/SIGTERM become an orderly abort at the next safe stage boundary
    let interrupt = InterruptFlag::global();
    let handler_flag = interrupt.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        warn!("interrupt received, stopping before the next stage");
        handler_flag.request();
    }) {
        warn!("could not install interrupt handler: {}", e);
    }

    let executor = UpdateExecutor::new(config).with_interrupt(interrupt);
    let mut stdout = std::io::stdout().lock();
    let code = commands::execute(&executor, cli.command, &mut stdout)?;

    Ok(ExitCode::from(u8::try_from(code).unwrap_or(1)))
}
