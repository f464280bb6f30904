//! zoh: Zoho Mail and organization admin CLI
//!
//! This binary wires configuration, logging and the credential subsystem
//! from `zoh-auth` into the `auth` command group. Every API command obtains
//! its bearer token through the same per-region token cache, so concurrent
//! invocations share one refresh.

mod auth;
mod cli;
mod config;
mod exit;

use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::debug;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::cli::{Cli, Command};
use crate::config::Config;

#[tokio::main]
async fn main() -> ExitCode {
    // clap exits with status 2 on usage errors
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::from(exit::code_for(&e))
        }
    }
}

/// Logs go to stderr so stdout stays clean for command output (tokens).
/// Filter comes from ZOH_LOG, then RUST_LOG, defaulting to warnings.
fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_env("ZOH_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("warn"));
    let registry = tracing_subscriber::registry().with(filter);

    if json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(false)
                    .without_time(),
            )
            .init();
    }
}

async fn run(cli: Cli) -> Result<()> {
    let source = Config::resolve_path(cli.config.as_deref());
    let mut config = Config::load(source.as_ref()).with_context(|| match &source {
        Some(source) => format!("failed to load config from {}", source.path.display()),
        None => "failed to load config".to_string(),
    })?;

    if let Some(region) = cli.region {
        config.region = region;
    }
    config.quiet |= cli.quiet;
    debug!(
        region = %config.region,
        backend = ?config.credential_backend,
        data_dir = %config.data_dir.display(),
        "configuration loaded"
    );

    match cli.command {
        Command::Auth(command) => auth::run(command, config).await,
    }
}
