//! Size sampling that decides when a dropped file is completely written.

use std::path::Path;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Verdict of the stability gate for one candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stability {
    /// Size unchanged and non-zero across one sampling interval.
    Stable { size: u64 },
    /// The file disappeared while being sampled.
    Vanished,
    /// Still changing (or empty) after every round.
    Unstable { rounds: u32 },
}

#[derive(Debug, Clone)]
pub struct StabilityGate {
    interval: Duration,
    max_rounds: u32,
}

impl StabilityGate {
    pub fn new(interval: Duration, max_rounds: u32) -> Self {
        Self {
            interval,
            max_rounds: max_rounds.max(1),
        }
    }

    pub fn from_config(config: &paperroute_config::WatchConfig) -> Self {
        Self::new(config.stability_interval(), config.stability_rounds)
    }

    /// Sample the size twice, `interval` apart, until two samples agree on a
    /// non-zero size or the rounds run out.
    pub async fn wait_until_stable(&self, path: &Path) -> Stability {
        for round in 1..=self.max_rounds {
            let Some(before) = file_size(path).await else {
                return Stability::Vanished;
            };
            sleep(self.interval).await;
            let Some(after) = file_size(path).await else {
                return Stability::Vanished;
            };

            if before == after && after > 0 {
                return Stability::Stable { size: after };
            }
            debug!(
                round,
                before, after, "File still being written: {}", path.display()
            );
        }

        warn!(
            rounds = self.max_rounds,
            "Giving up on file that never stabilized: {}",
            path.display()
        );
        Stability::Unstable {
            rounds: self.max_rounds,
        }
    }
}

async fn file_size(path: &Path) -> Option<u64> {
    tokio::fs::metadata(path)
        .await
        .ok()
        .filter(|m| m.is_file())
        .map(|m| m.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn gate() -> StabilityGate {
        StabilityGate::new(Duration::from_millis(20), 3)
    }

    #[tokio::test]
    async fn test_complete_file_is_stable() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("scan.pdf");
        std::fs::write(&path, b"%PDF-1.7 content").unwrap();

        assert_eq!(
            gate().wait_until_stable(&path).await,
            Stability::Stable { size: 16 }
        );
    }

    #[tokio::test]
    async fn test_empty_file_is_never_stable() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("empty.pdf");
        std::fs::write(&path, b"").unwrap();

        assert_eq!(
            gate().wait_until_stable(&path).await,
            Stability::Unstable { rounds: 3 }
        );
    }

    #[tokio::test]
    async fn test_missing_file_vanishes() {
        let temp = TempDir::new().unwrap();
        assert_eq!(
            gate().wait_until_stable(&temp.path().join("gone.pdf")).await,
            Stability::Vanished
        );
    }

    #[tokio::test]
    async fn test_growing_file_is_unstable() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("growing.pdf");
        std::fs::write(&path, b"start").unwrap();

        let writer_path = path.clone();
        let writer = tokio::spawn(async move {
            for _ in 0..100 {
                let mut file = std::fs::OpenOptions::new()
                    .append(true)
                    .open(&writer_path)
                    .unwrap();
                file.write_all(b"more bytes").unwrap();
                sleep(Duration::from_millis(2)).await;
            }
        });

        let verdict = gate().wait_until_stable(&path).await;
        writer.abort();
        assert_eq!(verdict, Stability::Unstable { rounds: 3 });
    }
}
