//! kmem - personal knowledge memory CLI
//!
//! Captures memory records and compacts aging clusters of them into
//! decision records, surfacing contradictions for review.

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod cli;
mod commands;
mod config;
mod database;

use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_tracing(cli.json_logs)?;

    // Load configuration
    let mut config = config::Config::load()?;
    if let Some(workspace) = cli.workspace {
        config.workspace = workspace;
    }

    // Execute command
    match cli.command {
        Commands::Compact(args) => commands::compact::execute(args, &config).await,
        Commands::Daemon => commands::daemon::execute(&config).await,
        Commands::Conflicts(cmd) => commands::conflicts::execute(cmd, &config).await,
        Commands::Record(cmd) => commands::record::execute(cmd, &config).await,
        Commands::Status { json } => commands::status::execute(json, &config).await,
        Commands::Version => {
            println!("kmem {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

/// Logs go to stderr so `--json` output on stdout stays parseable.
fn init_tracing(json: bool) -> Result<()> {
    let filter = EnvFilter::from_default_env()
        .add_directive("kmem=info".parse()?)
        .add_directive("kmem_core=info".parse()?);

    if json {
        tracing_subscriber::registry()
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer().with_writer(std::io::stderr))
            .with(filter)
            .init();
    }
    Ok(())
}
