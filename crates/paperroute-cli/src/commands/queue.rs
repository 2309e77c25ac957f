//! Index retry queue commands.

use super::{collaborators, get_database, load_config, runtime};
use anyhow::{Context, Result};
use colored::Colorize;
use paperroute_core::IndexStatus;
use paperroute_ingest::build_index_queue;
use std::path::Path;

pub fn status(override_path: Option<&Path>) -> Result<()> {
    let config = load_config(override_path)?;
    let db = get_database(&config)?;
    let counts = db.index_task_counts()?;

    println!("{}", "Index Queue".cyan().bold());
    println!("{}", "─".repeat(50));
    println!("  {} Pending: {}", "○".yellow(), counts.pending);
    println!("  {} Failed (will retry): {}", "◐".yellow(), counts.failed_transient);
    println!("  {} Awaiting reindex: {}", "◐".blue(), counts.awaiting_reindex);
    println!("  {} Indexed: {}", "●".green(), counts.indexed);
    if counts.abandoned > 0 {
        println!("  {} Abandoned: {}", "✗".red(), counts.abandoned);
    }

    Ok(())
}

pub fn list(override_path: Option<&Path>, status: Option<String>) -> Result<()> {
    let config = load_config(override_path)?;
    let db = get_database(&config)?;

    let filter = match status {
        Some(s) => Some(IndexStatus::from_str(&s).with_context(|| format!("Unknown status: {}", s))?),
        None => None,
    };
    let tasks = db.list_index_tasks(filter)?;

    if tasks.is_empty() {
        println!("{}", "No index tasks.".dimmed());
        return Ok(());
    }

    for task in &tasks {
        let marker = match task.status {
            IndexStatus::Indexed => "●".green(),
            IndexStatus::Abandoned => "✗".red(),
            _ => "○".yellow(),
        };
        println!(
            "{} {} [{} {}, {} attempts]",
            marker,
            task.artifact_id,
            task.operation.as_str(),
            task.status,
            task.attempts
        );
        if task.status.is_retryable() {
            println!(
                "    next attempt {}",
                task.next_attempt_at.format("%Y-%m-%d %H:%M:%S").to_string().dimmed()
            );
        }
        if let Some(ref err) = task.last_error {
            println!("    {}", err.dimmed());
        }
    }

    Ok(())
}

pub fn retry(override_path: Option<&Path>) -> Result<()> {
    let config = load_config(override_path)?;
    let db = get_database(&config)?;
    let (_, collaborators) = collaborators(&config)?;
    let queue = build_index_queue(&config, &collaborators, Some(db))?
        .context("Indexing is disabled in the configuration")?;

    let summary = runtime()?.block_on(async {
        let summary = queue.retry_due().await;
        queue.flush().await;
        summary
    });

    if summary.attempted == 0 {
        println!("{}", "No tasks are due.".dimmed());
        return Ok(());
    }

    println!("{} Retried {} tasks", "✓".green(), summary.attempted);
    println!("  Indexed: {}", summary.indexed.to_string().green());
    if summary.failed > 0 {
        println!("  Failed again: {}", summary.failed.to_string().yellow());
    }
    if summary.abandoned > 0 {
        println!("  Abandoned: {}", summary.abandoned.to_string().red());
    }

    Ok(())
}

pub fn forget(override_path: Option<&Path>, id: &str) -> Result<()> {
    let config = load_config(override_path)?;
    let db = get_database(&config)?;
    let (_, collaborators) = collaborators(&config)?;
    let queue = build_index_queue(&config, &collaborators, Some(db))?
        .context("Indexing is disabled in the configuration")?;

    runtime()?
        .block_on(queue.delete(id))
        .with_context(|| format!("Failed to remove {}", id))?;

    println!("{} Removed {}", "✓".green(), id);
    Ok(())
}
