//! Binary entry point for queueforge.

use clap::Parser;

use queueforge::cli::{self, Cli};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    cli::init_logging(&cli.log_level);
    cli::run_with_cli(cli).await
}
