//! Clap derive structures for the `tether` CLI.

use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};

use tether_core::EntityKind;

// ── Top-Level CLI ────────────────────────────────────────────────────

/// tether -- keep a local store in sync with a realtime data service
#[derive(Debug, Parser)]
#[command(
    name = "tether",
    version,
    about = "Run and inspect realtime sync sessions",
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
    /// Service profile to use
    #[arg(long, short = 'p', env = "TETHER_PROFILE", global = true)]
    pub profile: Option<String>,

    /// Project URL (overrides profile)
    #[arg(long, short = 'u', env = "TETHER_URL", global = true)]
    pub url: Option<String>,

    /// Accept self-signed TLS certificates
    #[arg(long, short = 'k', global = true)]
    pub insecure: bool,

    /// Request timeout in seconds (overrides profile)
    #[arg(long, global = true)]
    pub timeout: Option<u64>,

    /// Log line format
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

// ── Commands ─────────────────────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run a live session and log every change until interrupted
    Watch(WatchArgs),

    /// Run one bootstrap refresh and print the result
    Bootstrap(BootstrapArgs),

    /// Inspect configuration
    Config(ConfigArgs),
}

#[derive(Debug, Args)]
pub struct WatchArgs {
    /// Stop after this long (e.g. "30s", "5m"); runs until Ctrl-C otherwise
    #[arg(long, value_parser = humantime::parse_duration)]
    pub duration: Option<Duration>,

    /// Only subscribe to these kinds (repeatable)
    #[arg(long = "kind", value_parser = parse_kind)]
    pub kinds: Vec<EntityKind>,
}

#[derive(Debug, Args)]
pub struct BootstrapArgs {
    /// Print every committed record, not just counts
    #[arg(long)]
    pub records: bool,
}

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Print the config file location
    Path,

    /// Print the resolved configuration with secrets masked
    Show,

    /// Make a profile the default
    Use {
        /// Profile name
        name: String,
    },
}

fn parse_kind(s: &str) -> Result<EntityKind, String> {
    s.parse::<EntityKind>()
        .map_err(|_| format!("unknown kind '{s}' (device, tag, plan, session, connectivity)"))
}
