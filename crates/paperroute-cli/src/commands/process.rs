//! One-shot processing of a single file.

use super::{collaborators, load_config, runtime};
use anyhow::{Context, Result};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use paperroute_core::JobState;
use paperroute_ingest::{build_supervisor, open_store};
use std::path::Path;
use std::time::Duration;

pub fn run(override_path: Option<&Path>, file: &Path) -> Result<()> {
    if !file.is_file() {
        anyhow::bail!("File not found: {}", file.display());
    }

    let config = load_config(override_path)?;
    let (_, collaborators) = collaborators(&config)?;
    let store = open_store(&config).context("Failed to open the queue database")?;
    let supervisor = build_supervisor(&config, &collaborators, store)?;
    let rt = runtime()?;

    let pb = ProgressBar::new_spinner();
    pb.set_style(ProgressStyle::default_spinner().template("{spinner:.green} {msg}")?);
    pb.set_message(format!("Processing {}", file.display()));
    pb.enable_steady_tick(Duration::from_millis(100));

    let job = rt.block_on(async {
        let job = supervisor.process_file(file, config.watch.fingerprint).await;
        if let Some(queue) = supervisor.pipeline().index_queue() {
            queue.flush().await;
        }
        job
    })?;

    match job.state {
        JobState::Done => {
            let output = job
                .output_path
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_default();
            pb.finish_with_message(format!("{} {}", "Filed:".green().bold(), output));
            if !job.indexed && config.indexing.enabled {
                println!(
                    "  {} Indexing queued for retry ({})",
                    "Note:".yellow(),
                    "paperroute queue status".cyan()
                );
            }
            Ok(())
        }
        _ => {
            pb.finish_and_clear();
            anyhow::bail!(
                "{} failed during {}: {}",
                job.file_name(),
                job.failed_stage.map(|s| s.to_string()).unwrap_or_default(),
                job.error.unwrap_or_default()
            )
        }
    }
}
