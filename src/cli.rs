use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "stakerd",
    about = "Supervised Ethereum staking node runner",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Path to the configuration file (defaults to ./stakerd.toml)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the node pipeline under supervision
    Run,

    /// Show the resolved configuration
    Config {
        /// Emit machine-readable JSON instead of the human layout
        #[arg(long)]
        json: bool,
    },
}
