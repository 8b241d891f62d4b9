//! Command-line interface for token-forge.
//!
//! Provides `run` for executing a task through the pipeline and `check`
//! for agent health.

mod commands;

pub use commands::{parse_cli, run, run_with_cli, CheckArgs, Cli, Commands, FixtureFile, RunArgs};
