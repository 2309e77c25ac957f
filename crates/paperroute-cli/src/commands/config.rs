//! Configuration commands.

use super::{config_path, load_config};
use anyhow::{Context, Result};
use colored::Colorize;
use std::path::Path;

pub fn show(override_path: Option<&Path>) -> Result<()> {
    let path = config_path(override_path)?;

    if !path.exists() {
        anyhow::bail!("Config file not found. Run 'paperroute init' first.");
    }

    let contents = std::fs::read_to_string(&path).context("Failed to read config file")?;

    println!("{}", "Current Configuration".cyan().bold());
    println!("{}", "─".repeat(50));
    println!("{}", contents);

    Ok(())
}

pub fn validate(override_path: Option<&Path>) -> Result<()> {
    let config = load_config(override_path)?;

    println!("{} Configuration is valid.", "✓".green());
    println!("  Watch:  {}", config.directories.watch.display());
    println!("  Output: {}", config.directories.output.display());
    println!("  Service: {}", config.deepfellow.base_url);
    println!("  Recipients:");
    for recipient in &config.recipients {
        println!("    {} {} [{}]", "•".dimmed(), recipient.name, recipient.tags.join(", "));
    }
    println!(
        "  Up to {} concurrent jobs, indexing {}",
        config.pipeline.max_concurrent_jobs,
        if config.indexing.enabled { "enabled" } else { "disabled" }
    );

    Ok(())
}

pub fn path(override_path: Option<&Path>) -> Result<()> {
    println!("{}", config_path(override_path)?.display());
    Ok(())
}
