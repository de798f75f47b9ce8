mod bootstrap_helpers;
mod cli_types;
mod commands;
mod config;

use anyhow::Result;
use clap::Parser;

use crate::bootstrap_helpers::init_tracing;
use crate::cli_types::Cli;
use crate::commands::run_cli;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_level);
    run_cli(cli).await
}
