//! Command-line interface for queueforge.
//!
//! Provides the `run`, `flush`, and `health` commands.

mod commands;

pub use commands::{build_run_config, init_logging, run_with_cli, Cli, Commands, RunArgs};
