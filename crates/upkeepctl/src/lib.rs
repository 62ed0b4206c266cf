//! Upkeepctl library - exposes the CLI layer for integration tests

pub mod cli;
pub mod commands;
pub mod logging;
