//! File system watcher feeding candidate paths to admission.

use crate::error::{IngestError, IngestResult};
use glob::Pattern;
use notify::{RecommendedWatcher, RecursiveMode};
use notify_debouncer_mini::{new_debouncer, DebounceEventResult, Debouncer};
use paperroute_config::Config;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, error, info, warn};

/// Decides which paths are worth gating at all.
#[derive(Debug, Clone)]
pub struct CandidateFilter {
    extensions: HashSet<String>,
    ignore_patterns: Vec<Pattern>,
    excluded_dirs: Vec<PathBuf>,
}

impl CandidateFilter {
    pub fn new(extensions: &[String], ignore_patterns: &[String]) -> Self {
        let ignore_patterns = ignore_patterns
            .iter()
            .filter_map(|p| match Pattern::new(p) {
                Ok(pattern) => Some(pattern),
                Err(e) => {
                    warn!("Skipping invalid ignore pattern '{}': {}", p, e);
                    None
                }
            })
            .collect();

        Self {
            extensions: extensions
                .iter()
                .map(|e| e.trim_start_matches('.').to_lowercase())
                .collect(),
            ignore_patterns,
            excluded_dirs: Vec::new(),
        }
    }

    /// Filter for the configured watch settings. The output directory is
    /// excluded so placed artifacts are never re-ingested.
    pub fn from_config(config: &Config) -> Self {
        Self::new(&config.watch.extensions, &config.watch.ignore_patterns)
            .exclude(&config.directories.output)
    }

    /// Ignore everything under `dir`.
    pub fn exclude(mut self, dir: &Path) -> Self {
        self.excluded_dirs.push(resolve(dir));
        self
    }

    /// Whether a path should enter the stability gate.
    pub fn is_candidate(&self, path: &Path) -> bool {
        // Skip directories
        if path.is_dir() {
            return false;
        }

        let Some(filename) = path.file_name().and_then(|n| n.to_str()) else {
            return false;
        };

        // Hidden and temporary names
        if filename.starts_with('.') || filename.ends_with('~') {
            return false;
        }

        for pattern in &self.ignore_patterns {
            if pattern.matches(filename) {
                return false;
            }
        }

        let allowed = match path.extension().and_then(|e| e.to_str()) {
            Some(ext) => self.extensions.contains(&ext.to_lowercase()),
            None => false,
        };
        allowed && !self.is_excluded(path)
    }

    fn is_excluded(&self, path: &Path) -> bool {
        if self.excluded_dirs.is_empty() {
            return false;
        }
        let resolved = resolve(path);
        self.excluded_dirs.iter().any(|dir| resolved.starts_with(dir))
    }
}

/// Canonical form of `path` for prefix comparisons. A path that no longer
/// exists resolves through its parent directory.
fn resolve(path: &Path) -> PathBuf {
    if let Ok(resolved) = path.canonicalize() {
        return resolved;
    }
    match (path.parent(), path.file_name()) {
        (Some(parent), Some(name)) => match parent.canonicalize() {
            Ok(parent) => parent.join(name),
            Err(_) => path.to_path_buf(),
        },
        _ => path.to_path_buf(),
    }
}

/// Watches a directory tree and forwards candidate paths.
pub struct FileWatcher {
    directory: PathBuf,
    debouncer: Debouncer<RecommendedWatcher>,
}

impl FileWatcher {
    /// Create a watcher that sends every candidate path to `tx`.
    pub fn new(
        directory: &Path,
        filter: CandidateFilter,
        debounce: Duration,
        tx: UnboundedSender<PathBuf>,
    ) -> IngestResult<Self> {
        let debouncer = new_debouncer(debounce, move |result: DebounceEventResult| {
            match result {
                Ok(events) => {
                    for event in events {
                        if !filter.is_candidate(&event.path) {
                            debug!("Ignoring file: {:?}", event.path);
                            continue;
                        }
                        // Deletions also arrive as events
                        if !event.path.exists() {
                            continue;
                        }
                        if tx.send(event.path).is_err() {
                            debug!("Candidate channel closed");
                            return;
                        }
                    }
                }
                Err(e) => error!("Watch error: {:?}", e),
            }
        })
        .map_err(|e| IngestError::Watch(e.to_string()))?;

        Ok(Self {
            directory: directory.to_path_buf(),
            debouncer,
        })
    }

    /// Start watching the directory recursively.
    pub fn start(&mut self) -> IngestResult<()> {
        if !self.directory.exists() {
            return Err(IngestError::FileNotFound(self.directory.clone()));
        }

        info!("Watching directory: {:?}", self.directory);
        self.debouncer
            .watcher()
            .watch(&self.directory, RecursiveMode::Recursive)
            .map_err(|e| IngestError::Watch(e.to_string()))
    }
}

/// Scan a directory for files already present.
pub fn scan_directory(dir: &Path, filter: &CandidateFilter) -> IngestResult<Vec<PathBuf>> {
    if !dir.exists() {
        return Err(IngestError::FileNotFound(dir.to_path_buf()));
    }

    let mut files: Vec<PathBuf> = walkdir::WalkDir::new(dir)
        .follow_links(true)
        .into_iter()
        .filter_map(|e| e.ok())
        .map(|e| e.into_path())
        .filter(|path| filter.is_candidate(path))
        .collect();
    files.sort();

    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn filter() -> CandidateFilter {
        CandidateFilter::new(
            &["pdf".to_string(), "PNG".to_string()],
            &["*.tmp".to_string(), "~$*".to_string()],
        )
    }

    #[test]
    fn test_candidate_filter() {
        let filter = filter();

        assert!(filter.is_candidate(Path::new("/inbox/scan.pdf")));
        assert!(filter.is_candidate(Path::new("/inbox/photo.png")));
        assert!(filter.is_candidate(Path::new("/inbox/SCAN.PDF")));
        assert!(!filter.is_candidate(Path::new("/inbox/.hidden.pdf")));
        assert!(!filter.is_candidate(Path::new("/inbox/scan.pdf~")));
        assert!(!filter.is_candidate(Path::new("/inbox/scan.tmp")));
        assert!(!filter.is_candidate(Path::new("/inbox/~$scan.pdf")));
        assert!(!filter.is_candidate(Path::new("/inbox/notes.txt")));
        assert!(!filter.is_candidate(Path::new("/inbox/README")));
    }

    #[test]
    fn test_output_directory_is_excluded() {
        let temp = TempDir::new().unwrap();
        let output = temp.path().join("archive");
        std::fs::create_dir_all(&output).unwrap();
        let filter = filter().exclude(&output);

        assert!(!filter.is_candidate(&output.join("anna/bills/2024-01-01-rent.pdf")));
        assert!(filter.is_candidate(&temp.path().join("scan.pdf")));
    }

    #[test]
    fn test_relative_watch_path_excludes_output() {
        let temp = TempDir::new_in(".").unwrap();
        let inbox = temp.path().join("inbox");
        let placed = inbox.join("archive/Anna/bills");
        std::fs::create_dir_all(&placed).unwrap();
        std::fs::write(placed.join("2024-01-01-rent.pdf"), b"placed").unwrap();
        std::fs::write(inbox.join("scan.pdf"), b"new").unwrap();
        assert!(inbox.is_relative());

        let filter = filter().exclude(&inbox.join("archive"));
        let files = scan_directory(&inbox, &filter).unwrap();

        assert_eq!(files.len(), 1);
        assert!(files[0].ends_with("inbox/scan.pdf"));
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinked_watch_path_excludes_output() {
        let temp = TempDir::new().unwrap();
        let real = temp.path().join("real-inbox");
        std::fs::create_dir_all(real.join("archive")).unwrap();
        std::fs::write(real.join("archive/2024-01-01-rent.pdf"), b"placed").unwrap();
        let link = temp.path().join("inbox");
        std::os::unix::fs::symlink(&real, &link).unwrap();

        let filter = filter().exclude(&real.join("archive"));

        assert!(!filter.is_candidate(&link.join("archive/2024-01-01-rent.pdf")));
        // Removed files resolve through their directory
        assert!(!filter.is_candidate(&link.join("archive/gone.pdf")));
        assert!(filter.is_candidate(&link.join("scan.pdf")));
    }

    #[test]
    fn test_scan_directory() {
        let temp = TempDir::new().unwrap();
        let nested = temp.path().join("nested");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(temp.path().join("a.pdf"), b"a").unwrap();
        std::fs::write(nested.join("b.png"), b"b").unwrap();
        std::fs::write(temp.path().join("c.tmp"), b"c").unwrap();
        std::fs::write(temp.path().join(".d.pdf"), b"d").unwrap();

        let files = scan_directory(temp.path(), &filter()).unwrap();
        assert_eq!(files.len(), 2);
        assert!(files.iter().any(|p| p.ends_with("a.pdf")));
        assert!(files.iter().any(|p| p.ends_with("nested/b.png")));
    }

    #[test]
    fn test_scan_missing_directory() {
        let result = scan_directory(Path::new("/definitely/not/here"), &filter());
        assert!(matches!(result, Err(IngestError::FileNotFound(_))));
    }
}
