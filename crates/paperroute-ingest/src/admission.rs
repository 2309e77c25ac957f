//! Turns candidate paths into admitted files: stability gate, fingerprint,
//! dedup check.

use crate::dedup::AdmissionCache;
use crate::error::IngestResult;
use crate::stability::{Stability, StabilityGate};
use chrono::{DateTime, Utc};
use paperroute_config::FingerprintMode;
use paperroute_core::Fingerprint;
use sha2::{Digest, Sha256};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::UNIX_EPOCH;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// A complete, not-yet-seen file ready to become a job.
#[derive(Debug, Clone)]
pub struct AdmittedFile {
    pub path: PathBuf,
    pub fingerprint: Fingerprint,
    pub detected_at: DateTime<Utc>,
}

/// Compute the dedup fingerprint of a file. Content hashing runs on the
/// blocking pool.
pub async fn fingerprint_file(path: &Path, mode: FingerprintMode) -> IngestResult<Fingerprint> {
    match mode {
        FingerprintMode::Metadata => {
            let metadata = tokio::fs::metadata(path).await?;
            let modified = metadata
                .modified()?
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_nanos())
                .unwrap_or_default();
            Ok(Fingerprint::from_metadata(path, metadata.len(), modified))
        }
        FingerprintMode::Content => {
            let path = path.to_path_buf();
            let digest = tokio::task::spawn_blocking(move || hash_contents(&path)).await??;
            Ok(Fingerprint::new(format!("sha256:{digest}")))
        }
    }
}

fn hash_contents(path: &Path) -> std::io::Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];

    loop {
        let bytes_read = file.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

/// Stability gate plus dedup cache.
pub struct Admission {
    gate: StabilityGate,
    cache: AdmissionCache,
    mode: FingerprintMode,
}

impl Admission {
    pub fn new(gate: StabilityGate, cache: AdmissionCache, mode: FingerprintMode) -> Self {
        Self { gate, cache, mode }
    }

    /// Gate one candidate. Returns `None` when the file never stabilized,
    /// disappeared, or was already admitted within the retention window.
    pub async fn admit(&self, path: &Path) -> Option<AdmittedFile> {
        match self.gate.wait_until_stable(path).await {
            Stability::Stable { size } => {
                debug!(size, "File is stable: {}", path.display());
            }
            Stability::Vanished => {
                debug!("File disappeared before admission: {}", path.display());
                return None;
            }
            Stability::Unstable { .. } => return None,
        }

        let fingerprint = match fingerprint_file(path, self.mode).await {
            Ok(fp) => fp,
            Err(e) => {
                warn!("Could not fingerprint {}: {}", path.display(), e);
                return None;
            }
        };

        if !self.cache.admit(&fingerprint) {
            debug!(%fingerprint, "Duplicate event discarded: {}", path.display());
            return None;
        }

        info!(%fingerprint, "Admitted: {}", path.display());
        Some(AdmittedFile {
            path: path.to_path_buf(),
            fingerprint,
            detected_at: Utc::now(),
        })
    }

    /// Gate every candidate from `candidates` concurrently and forward the
    /// admitted ones. The returned channel closes once `cancel` fires or the
    /// candidate stream ends and every pending check has finished.
    pub fn spawn(
        self: Arc<Self>,
        mut candidates: mpsc::UnboundedReceiver<PathBuf>,
        capacity: usize,
        cancel: CancellationToken,
    ) -> mpsc::Receiver<AdmittedFile> {
        let (tx, rx) = mpsc::channel(capacity.max(1));

        tokio::spawn(async move {
            let mut checks = JoinSet::new();

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    Some(_) = checks.join_next(), if !checks.is_empty() => {}
                    candidate = candidates.recv() => {
                        let Some(path) = candidate else { break };
                        let admission = Arc::clone(&self);
                        let tx = tx.clone();
                        let cancel = cancel.clone();
                        checks.spawn(async move {
                            let admitted = tokio::select! {
                                _ = cancel.cancelled() => None,
                                admitted = admission.admit(&path) => admitted,
                            };
                            if let Some(file) = admitted {
                                if tx.send(file).await.is_err() {
                                    debug!("Admission channel closed");
                                }
                            }
                        });
                    }
                }
            }

            if cancel.is_cancelled() {
                checks.abort_all();
            }
            while checks.join_next().await.is_some() {}
            debug!("Admission loop stopped");
        });

        rx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    fn admission() -> Admission {
        Admission::new(
            StabilityGate::new(Duration::from_millis(10), 2),
            AdmissionCache::new(Duration::from_secs(60), 100),
            FingerprintMode::Metadata,
        )
    }

    #[tokio::test]
    async fn test_metadata_fingerprint_tracks_changes() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("scan.pdf");
        std::fs::write(&path, b"one").unwrap();
        let first = fingerprint_file(&path, FingerprintMode::Metadata).await.unwrap();
        assert_eq!(first, fingerprint_file(&path, FingerprintMode::Metadata).await.unwrap());

        std::fs::write(&path, b"one and two").unwrap();
        let second = fingerprint_file(&path, FingerprintMode::Metadata).await.unwrap();
        assert_ne!(first, second);
    }

    #[tokio::test]
    async fn test_content_fingerprint_ignores_location() {
        let temp = TempDir::new().unwrap();
        let a = temp.path().join("a.pdf");
        let b = temp.path().join("b.pdf");
        std::fs::write(&a, b"same bytes").unwrap();
        std::fs::write(&b, b"same bytes").unwrap();

        let fa = fingerprint_file(&a, FingerprintMode::Content).await.unwrap();
        assert_eq!(fa, fingerprint_file(&b, FingerprintMode::Content).await.unwrap());
        assert!(fa.as_str().starts_with("sha256:"));
    }

    #[tokio::test]
    async fn test_same_file_admitted_once() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("scan.pdf");
        std::fs::write(&path, b"%PDF").unwrap();

        let admission = admission();
        assert!(admission.admit(&path).await.is_some());
        assert!(admission.admit(&path).await.is_none());
    }

    #[tokio::test]
    async fn test_spawned_admission_forwards_unique_files() {
        let temp = TempDir::new().unwrap();
        let a = temp.path().join("a.pdf");
        let b = temp.path().join("b.pdf");
        std::fs::write(&a, b"aaaa").unwrap();
        std::fs::write(&b, b"bbbb").unwrap();

        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let mut admitted = Arc::new(admission()).spawn(rx, 8, cancel.clone());

        tx.send(a.clone()).unwrap();
        tx.send(a.clone()).unwrap();
        tx.send(b.clone()).unwrap();
        drop(tx);

        let mut paths = Vec::new();
        while let Some(file) = admitted.recv().await {
            paths.push(file.path);
        }
        paths.sort();
        assert_eq!(paths, vec![a, b]);
    }
}
