//! Job history.

use super::{get_database, load_config};
use anyhow::Result;
use colored::Colorize;
use paperroute_core::JobState;
use std::path::Path;

pub fn run(override_path: Option<&Path>, failed: bool, limit: i64) -> Result<()> {
    let config = load_config(override_path)?;
    let db = get_database(&config)?;
    let jobs = db.list_jobs(failed.then_some(JobState::Failed), limit)?;

    if jobs.is_empty() {
        println!("{}", "No jobs recorded.".dimmed());
        return Ok(());
    }

    println!("{}", if failed { "Failed Jobs" } else { "Recent Jobs" }.cyan().bold());
    println!("{}", "─".repeat(50));

    for job in &jobs {
        let finished = job
            .finished_at
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_default();

        match job.state {
            JobState::Done => {
                println!("{} {} {}", "●".green(), job.file_name(), finished.dimmed());
                if let Some(ref output) = job.output_path {
                    let suffix = if job.indexed { "" } else { " (not indexed)" };
                    println!("    → {}{}", output.display(), suffix.yellow());
                }
            }
            _ => {
                println!("{} {} {}", "✗".red(), job.file_name(), finished.dimmed());
                println!(
                    "    {} at {}: {}",
                    job.error_kind.as_deref().unwrap_or("error"),
                    job.failed_stage.map(|s| s.to_string()).unwrap_or_default(),
                    job.error.as_deref().unwrap_or("").dimmed()
                );
                println!("    {}", job.path.display().to_string().dimmed());
            }
        }
    }

    Ok(())
}
