//! CLI command implementations.

pub mod config;
pub mod init;
pub mod jobs;
pub mod process;
pub mod queue;
pub mod watch;

use anyhow::{Context, Result};
use paperroute_config::{AppPaths, Config};
use paperroute_db::Database;
use paperroute_deepfellow::DeepfellowClient;
use paperroute_ingest::{Collaborators, DeepfellowCollaborator};
use std::path::{Path, PathBuf};
use tokio::runtime::Runtime;

/// Resolve the config file location, honouring `--config`.
pub fn config_path(override_path: Option<&Path>) -> Result<PathBuf> {
    match override_path {
        Some(path) => Ok(path.to_path_buf()),
        None => AppPaths::new()
            .map(|p| p.config_file)
            .context("Failed to determine application directories"),
    }
}

/// Load and validate the configuration.
pub fn load_config(override_path: Option<&Path>) -> Result<Config> {
    let path = config_path(override_path)?;

    if !path.exists() {
        anyhow::bail!(
            "Config file not found at {}. Run 'paperroute init' first.",
            path.display()
        );
    }

    Config::load_validated(&path)
        .with_context(|| format!("Invalid configuration in {}", path.display()))
}

/// Open the persisted queue, failing when persistence is switched off.
pub fn get_database(config: &Config) -> Result<Database> {
    if !config.indexing.persist {
        anyhow::bail!("indexing.persist is disabled, so there is no queue on disk");
    }
    let path = config.database_file()?;
    Database::open(&path).with_context(|| format!("Failed to open database {}", path.display()))
}

/// Collaborators backed by the configured DeepFellow instance.
pub fn collaborators(config: &Config) -> Result<(DeepfellowClient, Collaborators)> {
    let client = DeepfellowClient::from_config(&config.deepfellow)
        .context("Failed to create DeepFellow client")?;
    let collaborators = DeepfellowCollaborator::collaborators(client.clone());
    Ok((client, collaborators))
}

pub fn runtime() -> Result<Runtime> {
    Runtime::new().context("Failed to create async runtime")
}
