//! Configuration structures and loading.

use crate::env::substitute_env_vars;
use crate::error::{ConfigError, ConfigResult};
use crate::paths::AppPaths;
use paperroute_core::{is_fallback_label, FALLBACK_RECIPIENT};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,

    #[serde(default)]
    pub directories: DirectoriesConfig,

    #[serde(default)]
    pub deepfellow: DeepfellowConfig,

    #[serde(default)]
    pub watch: WatchConfig,

    #[serde(default)]
    pub pipeline: PipelineConfig,

    #[serde(default)]
    pub placement: PlacementConfig,

    #[serde(default)]
    pub indexing: IndexingConfig,

    #[serde(default)]
    pub routing: RoutingConfig,

    #[serde(default)]
    pub recipients: Vec<Recipient>,
}

impl Config {
    /// Load configuration from the default location.
    pub fn load() -> ConfigResult<Self> {
        let paths = AppPaths::new().ok_or(ConfigError::NoConfigDir)?;
        Self::load_from(&paths.config_file)
    }

    /// Load configuration from a specific path.
    ///
    /// A `.env` file in the working directory is loaded first so `${VAR}`
    /// references can be satisfied from it. Relative directories are resolved
    /// against the directory containing the config file.
    pub fn load_from(path: &Path) -> ConfigResult<Self> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }

        if let Ok(env_file) = dotenvy::dotenv() {
            debug!("Loaded environment from {}", env_file.display());
        }

        let contents = std::fs::read_to_string(path)?;
        let base_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        Self::from_toml_str(&contents, &base_dir)
    }

    /// Load and validate in one step.
    pub fn load_validated(path: &Path) -> ConfigResult<Self> {
        let config = Self::load_from(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration text, substitute environment variables and
    /// resolve relative directories against `base_dir`.
    pub fn from_toml_str(contents: &str, base_dir: &Path) -> ConfigResult<Self> {
        let mut value: toml::Value = toml::from_str(contents)?;
        substitute_env_vars(&mut value)?;
        let mut config = Config::deserialize(value)?;
        config.directories.watch = resolve_dir(&config.directories.watch, base_dir);
        config.directories.output = resolve_dir(&config.directories.output, base_dir);
        Ok(config)
    }

    /// Check every constraint that must hold before the pipeline starts.
    pub fn validate(&self) -> ConfigResult<()> {
        if !self.directories.watch.is_dir() {
            return invalid(format!(
                "Watch directory does not exist: {}",
                self.directories.watch.display()
            ));
        }

        if self.recipients.is_empty() {
            return invalid("Recipients list must not be empty");
        }

        if self.deepfellow.api_key.trim().is_empty() {
            return invalid("API key must not be blank");
        }

        validate_recipients(&self.recipients)?;

        if self.watch.extensions.is_empty() {
            return invalid("watch.extensions must not be empty");
        }
        if self.watch.stability_rounds == 0 {
            return invalid("watch.stability_rounds must be at least 1");
        }
        if self.pipeline.max_concurrent_jobs == 0 {
            return invalid("pipeline.max_concurrent_jobs must be at least 1");
        }
        if self.pipeline.call_attempts == 0 {
            return invalid("pipeline.call_attempts must be at least 1");
        }
        if self.placement.collision_ceiling < 2 {
            return invalid("placement.collision_ceiling must be at least 2");
        }
        if self.indexing.max_attempts == 0 {
            return invalid("indexing.max_attempts must be at least 1");
        }

        Ok(())
    }

    /// Directory holding the retry-queue database.
    pub fn data_dir(&self) -> ConfigResult<PathBuf> {
        match &self.general.data_dir {
            Some(dir) => Ok(PathBuf::from(shellexpand::tilde(dir).as_ref())),
            None => AppPaths::new()
                .map(|p| p.data_dir)
                .ok_or(ConfigError::NoConfigDir),
        }
    }

    /// Path of the retry-queue database.
    pub fn database_file(&self) -> ConfigResult<PathBuf> {
        Ok(self.data_dir()?.join("paperroute.db"))
    }

    /// Create a default config file with comments.
    pub fn create_default_file(path: &Path) -> ConfigResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, Self::default_config_string())?;
        Ok(())
    }

    /// Generate a default config file with helpful comments.
    pub fn default_config_string() -> String {
        r#"# PaperRoute Configuration
# Scanned paperwork in, filed and indexed documents out.

[general]
# Data directory for the retry-queue database
# data_dir = "~/.local/share/paperroute"

[directories]
# Relative paths resolve against this file's directory
watch = "./inbox"
output = "./archive"

[deepfellow]
base_url = "http://localhost:8000"
# ${VAR} references are read from the environment (or a .env file)
api_key = "${DEEPFELLOW_API_KEY}"
ocr_endpoint = "/v1/ocr"
vision_endpoint = "/v1/vision"
responses_endpoint = "/v1/responses"
rag_endpoint = "/v1/rag"
vision_model = "qwen2.5-vl"
llm_model = "deepseek-r1"
rag_collection = "documents"
timeout_seconds = 120

[watch]
extensions = ["pdf", "png", "jpg", "jpeg", "tiff", "tif"]
ignore_patterns = ["*.tmp", "*.part", "*.crdownload", "*.download", "~$*", ".~lock*"]
debounce_ms = 500
# A file is stable once two size samples this far apart agree
stability_interval_ms = 1000
stability_rounds = 10
dedup_retention_seconds = 3600
dedup_capacity = 10000
# "metadata" (path + size + mtime) or "content" (SHA-256)
fingerprint = "metadata"
scan_existing = true

[pipeline]
max_concurrent_jobs = 2
call_attempts = 3
initial_backoff_ms = 1000
max_backoff_ms = 30000
call_timeout_seconds = 120
extraction_deadline_seconds = 300
shutdown_deadline_seconds = 30
job_retention_seconds = 3600

[placement]
collision_ceiling = 1000
copy_original = true

[indexing]
enabled = true
max_attempts = 5
initial_backoff_seconds = 30
max_backoff_seconds = 3600
retry_interval_seconds = 60
persist = true

[routing]
# Route to the fallback recipient when no configured tag appears in the text
require_tag_overlap = true

# Documents matching none of these go to "unassigned" (a reserved name)
[[recipients]]
name = "household"
tags = ["rent", "electricity", "insurance"]
"#
        .to_string()
    }
}

fn invalid<T>(message: impl Into<String>) -> ConfigResult<T> {
    Err(ConfigError::Invalid(message.into()))
}

/// Expand `~` and anchor relative directories at `base_dir`, then at the
/// working directory if `base_dir` is itself relative.
fn resolve_dir(dir: &Path, base_dir: &Path) -> PathBuf {
    let expanded = PathBuf::from(shellexpand::tilde(&dir.to_string_lossy()).as_ref());
    let resolved = if expanded.is_absolute() {
        expanded
    } else {
        base_dir.join(expanded)
    };
    if resolved.is_absolute() {
        return resolved;
    }
    match std::env::current_dir() {
        Ok(cwd) => cwd.join(resolved),
        Err(e) => {
            debug!("No working directory to resolve {}: {}", resolved.display(), e);
            resolved
        }
    }
}

/// Validate the recipient table.
///
/// Names become directory names, so each must be a safe single path segment.
/// The fallback label is reserved and may not be configured.
pub fn validate_recipients(recipients: &[Recipient]) -> ConfigResult<()> {
    let mut seen = HashSet::new();

    for recipient in recipients {
        let name = recipient.name.trim();
        if name.is_empty() {
            return invalid("Recipient name must not be blank");
        }
        if is_fallback_label(name) {
            return invalid(format!(
                "Recipient name '{}' is reserved for unmatched documents",
                FALLBACK_RECIPIENT
            ));
        }
        if name.starts_with('.')
            || name.contains(['/', '\\'])
            || name.chars().any(char::is_control)
        {
            return invalid(format!(
                "Recipient name '{}' is not a valid directory name",
                name
            ));
        }
        if !seen.insert(name.to_lowercase()) {
            return invalid(format!("Duplicate recipient name '{}'", name));
        }
    }

    Ok(())
}

/// General application settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GeneralConfig {
    pub data_dir: Option<String>,
}

/// Input and output locations.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectoriesConfig {
    pub watch: PathBuf,
    pub output: PathBuf,
}

impl Default for DirectoriesConfig {
    fn default() -> Self {
        Self {
            watch: PathBuf::from("./inbox"),
            output: PathBuf::from("./archive"),
        }
    }
}

/// DeepFellow inference service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeepfellowConfig {
    pub base_url: String,
    pub api_key: String,
    pub ocr_endpoint: String,
    pub vision_endpoint: String,
    pub responses_endpoint: String,
    pub rag_endpoint: String,
    pub vision_model: String,
    pub llm_model: String,
    pub rag_collection: String,
    pub timeout_seconds: u64,
}

impl Default for DeepfellowConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".to_string(),
            api_key: String::new(),
            ocr_endpoint: "/v1/ocr".to_string(),
            vision_endpoint: "/v1/vision".to_string(),
            responses_endpoint: "/v1/responses".to_string(),
            rag_endpoint: "/v1/rag".to_string(),
            vision_model: "qwen2.5-vl".to_string(),
            llm_model: "deepseek-r1".to_string(),
            rag_collection: "documents".to_string(),
            timeout_seconds: 120,
        }
    }
}

/// How admitted files are fingerprinted for dedup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FingerprintMode {
    #[default]
    Metadata,
    Content,
}

/// File watching and admission settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    pub extensions: Vec<String>,
    pub ignore_patterns: Vec<String>,
    pub debounce_ms: u64,
    pub stability_interval_ms: u64,
    pub stability_rounds: u32,
    pub dedup_retention_seconds: u64,
    pub dedup_capacity: u64,
    pub fingerprint: FingerprintMode,
    pub scan_existing: bool,
}

impl WatchConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms.max(1))
    }

    pub fn stability_interval(&self) -> Duration {
        Duration::from_millis(self.stability_interval_ms)
    }

    pub fn dedup_retention(&self) -> Duration {
        Duration::from_secs(self.dedup_retention_seconds)
    }
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            extensions: ["pdf", "png", "jpg", "jpeg", "tiff", "tif"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            ignore_patterns: ["*.tmp", "*.part", "*.crdownload", "*.download", "~$*", ".~lock*"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            debounce_ms: 500,
            stability_interval_ms: 1000,
            stability_rounds: 10,
            dedup_retention_seconds: 3600,
            dedup_capacity: 10_000,
            fingerprint: FingerprintMode::Metadata,
            scan_existing: true,
        }
    }
}

/// Job execution settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub max_concurrent_jobs: usize,
    pub call_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub call_timeout_seconds: u64,
    pub extraction_deadline_seconds: u64,
    pub shutdown_deadline_seconds: u64,
    pub job_retention_seconds: u64,
}

impl PipelineConfig {
    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_seconds)
    }

    pub fn extraction_deadline(&self) -> Duration {
        Duration::from_secs(self.extraction_deadline_seconds)
    }

    pub fn shutdown_deadline(&self) -> Duration {
        Duration::from_secs(self.shutdown_deadline_seconds)
    }

    pub fn job_retention(&self) -> Duration {
        Duration::from_secs(self.job_retention_seconds)
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 2,
            call_attempts: 3,
            initial_backoff_ms: 1000,
            max_backoff_ms: 30_000,
            call_timeout_seconds: 120,
            extraction_deadline_seconds: 300,
            shutdown_deadline_seconds: 30,
            job_retention_seconds: 3600,
        }
    }
}

/// Output placement settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlacementConfig {
    pub collision_ceiling: u32,
    pub copy_original: bool,
}

impl Default for PlacementConfig {
    fn default() -> Self {
        Self {
            collision_ceiling: 1000,
            copy_original: true,
        }
    }
}

/// Semantic index submission settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexingConfig {
    pub enabled: bool,
    pub max_attempts: u32,
    pub initial_backoff_seconds: u64,
    pub max_backoff_seconds: u64,
    pub retry_interval_seconds: u64,
    pub persist: bool,
}

impl IndexingConfig {
    pub fn initial_backoff(&self) -> Duration {
        Duration::from_secs(self.initial_backoff_seconds)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_secs(self.max_backoff_seconds)
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_secs(self.retry_interval_seconds.max(1))
    }
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: 5,
            initial_backoff_seconds: 30,
            max_backoff_seconds: 3600,
            retry_interval_seconds: 60,
            persist: true,
        }
    }
}

/// Classification routing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    pub require_tag_overlap: bool,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            require_tag_overlap: true,
        }
    }
}

/// A configured recipient and the tags that route documents to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recipient {
    pub name: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl Recipient {
    pub fn new(name: impl Into<String>, tags: &[&str]) -> Self {
        Self {
            name: name.into(),
            tags: tags.iter().map(|t| t.to_string()).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::{tempdir, NamedTempFile};

    const MINIMAL: &str = r#"
        [directories]
        watch = "./inbox"
        output = "./archive"

        [deepfellow]
        api_key = "test-key"

        [[recipients]]
        name = "Test User"
        tags = ["tag1", "tag2"]
    "#;

    fn write_config(dir: &Path, contents: &str) -> PathBuf {
        std::fs::create_dir_all(dir.join("inbox")).unwrap();
        let path = dir.join("config.toml");
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.deepfellow.base_url, "http://localhost:8000");
        assert_eq!(config.pipeline.call_attempts, 3);
        assert!(config.routing.require_tag_overlap);
        assert_eq!(config.watch.fingerprint, FingerprintMode::Metadata);
    }

    #[test]
    fn test_default_config_string_parses() {
        std::env::set_var("DEEPFELLOW_API_KEY", "from-env");
        let dir = tempdir().unwrap();
        let config =
            Config::from_toml_str(&Config::default_config_string(), dir.path()).unwrap();

        assert_eq!(config.deepfellow.api_key, "from-env");
        assert_eq!(config.recipients.len(), 1);
        assert_eq!(config.placement.collision_ceiling, 1000);
    }

    #[test]
    fn test_load_resolves_relative_paths() {
        let dir = tempdir().unwrap();
        let path = write_config(dir.path(), MINIMAL);

        let config = Config::load_validated(&path).unwrap();

        assert!(config.directories.watch.is_absolute());
        assert_eq!(config.directories.watch, dir.path().join("./inbox"));
        assert_eq!(config.directories.output, dir.path().join("./archive"));
        assert_eq!(config.recipients[0].name, "Test User");
    }

    #[test]
    fn test_bare_config_file_name_gives_absolute_dirs() {
        let config = Config::from_toml_str(MINIMAL, Path::new("")).unwrap();
        let cwd = std::env::current_dir().unwrap();

        assert!(config.directories.watch.is_absolute());
        assert!(config.directories.output.is_absolute());
        assert_eq!(config.directories.watch, cwd.join("inbox"));
        assert_eq!(config.directories.output, cwd.join("archive"));
    }

    #[test]
    fn test_load_from_file_keeps_defaults() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(
            temp_file,
            r#"
            [pipeline]
            max_concurrent_jobs = 8
            "#
        )
        .unwrap();

        let config = Config::load_from(temp_file.path()).unwrap();

        assert_eq!(config.pipeline.max_concurrent_jobs, 8);
        assert_eq!(config.pipeline.call_attempts, 3);
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let dir = tempdir().unwrap();
        let result = Config::load_from(&dir.path().join("nope.toml"));
        assert!(matches!(result, Err(ConfigError::NotFound(_))));
    }

    #[test]
    fn test_substitutes_env_vars() {
        std::env::set_var("PAPERROUTE_TEST_KEY", "secret");
        let dir = tempdir().unwrap();
        let config = Config::from_toml_str(
            r#"
            [deepfellow]
            api_key = "${PAPERROUTE_TEST_KEY}"
            "#,
            dir.path(),
        )
        .unwrap();
        assert_eq!(config.deepfellow.api_key, "secret");
    }

    #[test]
    fn test_missing_env_var_fails_load() {
        let dir = tempdir().unwrap();
        let result = Config::from_toml_str(
            r#"
            [deepfellow]
            api_key = "${PAPERROUTE_TEST_UNSET_VARIABLE}"
            "#,
            dir.path(),
        );
        assert!(matches!(result, Err(ConfigError::MissingEnvVar(_))));
    }

    #[test]
    fn test_validate_rejects_missing_watch_dir() {
        let dir = tempdir().unwrap();
        let config = Config::from_toml_str(MINIMAL, dir.path()).unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("Watch directory does not exist"));
    }

    #[test]
    fn test_validate_rejects_empty_recipients_and_blank_key() {
        let dir = tempdir().unwrap();
        let path = write_config(dir.path(), MINIMAL);
        let mut config = Config::load_from(&path).unwrap();

        config.deepfellow.api_key = "   ".to_string();
        assert!(config.validate().is_err());

        config.deepfellow.api_key = "key".to_string();
        config.recipients.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_fallback_label_in_table_is_rejected() {
        let dir = tempdir().unwrap();
        let path = write_config(
            dir.path(),
            r#"
            [directories]
            watch = "./inbox"

            [deepfellow]
            api_key = "k"

            [[recipients]]
            name = "Anna"
            tags = ["anna"]

            [[recipients]]
            name = "Unassigned"
            tags = ["misc"]
            "#,
        );

        let err = Config::load_validated(&path).unwrap_err();
        assert!(err.to_string().contains("reserved"));
    }

    #[test]
    fn test_validate_recipient_names() {
        assert!(validate_recipients(&[Recipient::new("Anna", &["a"])]).is_ok());
        assert!(validate_recipients(&[Recipient::new("../etc", &[])]).is_err());
        assert!(validate_recipients(&[Recipient::new("a/b", &[])]).is_err());
        assert!(validate_recipients(&[Recipient::new(".hidden", &[])]).is_err());
        assert!(validate_recipients(&[Recipient::new(" ", &[])]).is_err());
        assert!(validate_recipients(&[
            Recipient::new("Anna", &[]),
            Recipient::new("anna", &[]),
        ])
        .is_err());
    }
}
