//! Clap derive structures for casad.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// casad -- the casa aggregation + invalidation server
#[derive(Debug, Parser)]
#[command(
    name = "casad",
    version,
    about = "Serve aggregated smart-home view entities and realtime invalidation",
    propagate_version = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Path to the config file (defaults to the platform config dir)
    #[arg(long, env = "CASA_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Verbosity (-v info, -vv debug, -vvv trace)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the server (the default when no subcommand is given)
    Serve(ServeArgs),

    /// Mint a signed viewer token against the configured auth secret
    MintToken(MintTokenArgs),
}

#[derive(Debug, Default, Args)]
pub struct ServeArgs {
    /// Override the bind address from config
    #[arg(long, env = "CASA_BIND")]
    pub bind: Option<std::net::SocketAddr>,
}

#[derive(Debug, Args)]
pub struct MintTokenArgs {
    /// Subject the token identifies (an opaque viewer/user id)
    #[arg(long, default_value = "viewer")]
    pub subject: String,

    /// Lifetime in minutes (defaults to server.token_ttl_minutes)
    #[arg(long)]
    pub ttl_minutes: Option<i64>,
}
