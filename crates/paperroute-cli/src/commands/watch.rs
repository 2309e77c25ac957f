//! Watch command implementation.

use super::{collaborators, load_config, runtime};
use anyhow::{Context, Result};
use colored::Colorize;
use paperroute_ingest::run_daemon;
use std::path::Path;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Run the daemon in the foreground until Ctrl+C.
pub fn run(override_path: Option<&Path>) -> Result<()> {
    let config = load_config(override_path)?;
    let (client, collaborators) = collaborators(&config)?;
    let rt = runtime()?;

    if !rt.block_on(client.is_available()) {
        println!(
            "{} DeepFellow is not reachable at {}. Calls will be retried.",
            "Warning:".yellow().bold(),
            config.deepfellow.base_url
        );
    }

    println!("{}", "Starting PaperRoute...".cyan());
    println!("  Watching: {}", config.directories.watch.display());
    println!("  Filing to: {}", config.directories.output.display());
    println!("\nPress Ctrl+C to stop.\n");

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();

    let summary = rt
        .block_on(async {
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("Shutdown requested");
                    trigger.cancel();
                }
            });
            run_daemon(&config, collaborators, cancel).await
        })
        .context("Watcher stopped with an error")?;

    println!();
    println!("{}", "Stopped".cyan().bold());
    println!("  {} Completed: {}", "●".green(), summary.completed);
    if summary.failed > 0 {
        println!("  {} Failed: {}", "✗".red(), summary.failed);
    }
    if summary.interrupted > 0 {
        println!("  {} Interrupted: {}", "◐".yellow(), summary.interrupted);
    }
    if summary.flushed > 0 {
        println!("  {} Index tasks saved for later: {}", "○".yellow(), summary.flushed);
    }

    Ok(())
}
