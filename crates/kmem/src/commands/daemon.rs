//! Automatic compaction loop.

use anyhow::{bail, Context, Result};
use colored::Colorize;
use kmem_core::compaction::CompactionScheduler;
use tracing::info;

use crate::config::Config;
use crate::database::Stores;

/// Execute daemon command. Runs until Ctrl-C.
pub async fn execute(config: &Config) -> Result<()> {
    if config.compaction.auto_interval_days == 0 {
        bail!(
            "Automatic compaction is disabled. \
             Set compaction.auto_interval_days in config.toml to enable it"
        );
    }

    let stores = Stores::open(config)?;
    let scheduler =
        CompactionScheduler::new(stores.compactor(), config.compaction.clone(), &config.workspace)
            .context("Failed to set up compaction")?;

    scheduler.start_automatic();
    println!(
        "{} Compacting workspace {} every {} day(s), checking every {}s. Press Ctrl-C to stop.",
        "●".green(),
        config.workspace.cyan(),
        config.compaction.auto_interval_days,
        config.compaction.poll_interval_secs
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;

    info!("Shutting down automatic compaction");
    scheduler.stop_automatic().await;

    match scheduler.last_run_at() {
        Some(at) => println!(
            "{} Stopped. Last run: {}",
            "✓".green(),
            at.format("%Y-%m-%d %H:%M:%S UTC")
        ),
        None => println!("{} Stopped. No run completed.", "✓".green()),
    }
    Ok(())
}
