//! Quarry CLI - command-line interface for named-query projections.
//!
//! The main entry point for the `quarry` CLI binary.

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use quarry_cli::{Cli, Commands, commands};

fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    // Parse CLI arguments
    let cli = Cli::parse();
    let config = cli.config()?;

    // Create runtime and execute
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        let cancel = commands::cancel_on_ctrl_c();
        match cli.command {
            Commands::Resolve(args) => commands::resolve::execute(&args, &config, &cancel).await,
            Commands::Build(args) => commands::build::execute(&args, &config, &cancel).await,
            Commands::Control(args) => commands::control::show(&args, &config).await,
            Commands::Invalidate(args) => commands::control::invalidate(&args, &config).await,
        }
    })
}
