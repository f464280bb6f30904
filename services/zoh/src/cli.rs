//! Command-line interface definition

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use zoh_auth::Region;

#[derive(Debug, Parser)]
#[command(name = "zoh", version, about = "Zoho Mail and organization admin from the terminal")]
pub struct Cli {
    /// Config file (default: <config dir>/zoh/config.toml)
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Data center region: us, eu, in, au, jp, ca, sa, uk
    #[arg(long, global = true, value_name = "REGION")]
    pub region: Option<Region>,

    /// Suppress one-time credential store notices
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Manage OAuth credentials
    #[command(subcommand)]
    Auth(AuthCommand),
}

#[derive(Debug, Subcommand)]
pub enum AuthCommand {
    /// Authorize zoh and store the resulting tokens
    Login {
        /// Authorization code (or the full redirect URL); prompted for if omitted
        #[arg(long)]
        code: Option<String>,
    },
    /// Print a valid access token, refreshing it if needed
    Token,
    /// Show login state without contacting the server
    Status,
    /// Revoke and forget stored tokens
    Logout {
        /// Log out of every region
        #[arg(long)]
        all: bool,
    },
}
