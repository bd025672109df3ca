//! Clap derive structures for the `ncontrol` agent.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// ncontrol -- DevCtrl endpoint agent
#[derive(Debug, Parser)]
#[command(
    name = "ncontrol",
    version,
    about = "Connect one DevCtrl endpoint to its coordination server",
    long_about = "Loads an endpoint's records from the DevCtrl server, registers the \n\
        controls its device communicator declares, and relays control updates \n\
        between the server and the device.",
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

// ── Global Options ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Also read `<NAME>.json` from the config directories
    #[arg(long, short = 'n', env = "NCONTROL_CONFIG_NAME", global = true)]
    pub config_name: Option<String>,

    /// Search only this directory for config files
    #[arg(long, global = true, value_name = "DIR")]
    pub config_dir: Option<PathBuf>,

    /// Server URL (overrides wsUrl)
    #[arg(long, global = true)]
    pub ws_url: Option<String>,

    /// Websocket path (overrides ioPath)
    #[arg(long, global = true)]
    pub io_path: Option<String>,

    /// Endpoint to serve (overrides endpointId)
    #[arg(long, short = 'e', global = true)]
    pub endpoint_id: Option<String>,

    /// Auth identity (overrides authId)
    #[arg(long, global = true)]
    pub auth_id: Option<String>,

    /// Use the stub communicator instead of the endpoint's own type
    #[arg(long, global = true)]
    pub stub: bool,

    /// Increase verbosity (-v, -vv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Log line format
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum LogFormat {
    /// Human-readable lines
    Text,
    /// One JSON object per line
    Json,
}

// ── Commands ─────────────────────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the agent until interrupted
    Run,

    /// Print the resolved configuration (secrets redacted)
    Config,

    /// List the communicator types compiled into this build
    Communicators,
}
