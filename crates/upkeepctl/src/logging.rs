//! Logging setup for upkeepctl.
//!
//! Diagnostics go to stderr through `tracing`; stdout carries only report
//! lines.

use tracing_subscriber::EnvFilter;

/// Filter override, same syntax as `RUST_LOG`
pub const ENV_LOG: &str = "UPKEEP_LOG";

/// Default filter when `UPKEEP_LOG` is unset
pub fn default_directive(verbose: bool, config_level: &str) -> String {
    if verbose {
        return "debug".to_string();
    }
    match config_level.trim() {
        "" => "info".to_string(),
        level => level.to_string(),
    }
}

pub fn init(verbose: bool, config_level: &str) {
    let filter = EnvFilter::try_from_env(ENV_LOG)
        .unwrap_or_else(|_| EnvFilter::new(default_directive(verbose, config_level)));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}
