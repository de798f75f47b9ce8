use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use tracing::level_filters::LevelFilter;

fn parse_log_level(value: &str) -> Result<LevelFilter, String> {
    value
        .trim()
        .parse::<LevelFilter>()
        .map_err(|_| format!("unknown log level '{value}' (use off, error, warn, info, debug or trace)"))
}

#[derive(Debug, Parser)]
#[command(
    name = "nudgebot",
    about = "Rule-driven nudges over code review and chat activity",
    version
)]
pub(crate) struct Cli {
    #[arg(
        long = "log-level",
        env = "NUDGEBOT_LOG_LEVEL",
        default_value = "info",
        global = true,
        value_parser = parse_log_level,
        help = "Default log level; RUST_LOG directives take precedence"
    )]
    pub(crate) log_level: LevelFilter,

    #[command(subcommand)]
    pub(crate) command: Command,
}

#[derive(Debug, Subcommand)]
pub(crate) enum Command {
    /// Run the bot until interrupted.
    Run(ConfigArgs),
    /// Write a commented configuration template.
    Init(InitArgs),
    /// Print persisted statistics documents as JSON.
    Stats(StatsArgs),
    /// Print the delivered-events ledger as JSON.
    Ledger(ConfigArgs),
}

#[derive(Debug, Args)]
pub(crate) struct ConfigArgs {
    #[arg(
        long,
        short = 'c',
        env = "NUDGEBOT_CONFIG",
        default_value = "nudgebot.toml",
        help = "Path of the TOML configuration file"
    )]
    pub(crate) config: PathBuf,
}

#[derive(Debug, Args)]
pub(crate) struct InitArgs {
    #[arg(help = "Directory receiving nudgebot.toml")]
    pub(crate) dir: PathBuf,

    #[arg(long, help = "Overwrite an existing nudgebot.toml")]
    pub(crate) force: bool,
}

#[derive(Debug, Args)]
pub(crate) struct StatsArgs {
    #[command(flatten)]
    pub(crate) config: ConfigArgs,

    #[arg(long, help = "Only print this statistics collection")]
    pub(crate) collection: Option<String>,
}
