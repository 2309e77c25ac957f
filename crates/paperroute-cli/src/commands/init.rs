//! Initialize PaperRoute.

use super::config_path;
use anyhow::{Context, Result};
use colored::Colorize;
use paperroute_config::Config;
use paperroute_db::Database;
use std::path::Path;

pub fn run(override_path: Option<&Path>) -> Result<()> {
    let path = config_path(override_path)?;

    if path.exists() {
        println!("{} PaperRoute is already initialized.", "Note:".yellow().bold());
        println!("  Config: {}", path.display());
        return Ok(());
    }

    println!("{}", "Initializing PaperRoute...".cyan().bold());

    Config::create_default_file(&path).context("Failed to create config file")?;
    println!("  {} Created config: {}", "✓".green(), path.display());

    let config = Config::load_from(&path).context("Failed to read the new config file")?;
    for dir in [&config.directories.watch, &config.directories.output] {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;
        println!("  {} Created directory: {}", "✓".green(), dir.display());
    }

    let db_path = config.database_file()?;
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent).context("Failed to create data directory")?;
    }
    Database::open(&db_path).context("Failed to initialize database")?;
    println!("  {} Created database: {}", "✓".green(), db_path.display());

    println!();
    println!("{}", "PaperRoute initialized successfully!".green().bold());
    println!();
    println!("Next steps:");
    println!("  1. Set the API key and add [[recipients]] in {}", path.display());
    println!("  2. Check the result: {}", "paperroute config validate".cyan());
    println!("  3. Start watching: {}", "paperroute watch".cyan());

    Ok(())
}
