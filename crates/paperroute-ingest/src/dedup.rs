//! Bounded, time-evicted set of admitted fingerprints.

use moka::sync::Cache;
use paperroute_core::Fingerprint;
use std::time::Duration;

/// Gate against duplicate filesystem events creating duplicate jobs.
///
/// Entries expire `retention` after insertion. Capacity bounds memory; when
/// exceeded, the least recently used entries go first.
#[derive(Clone)]
pub struct AdmissionCache {
    entries: Cache<Fingerprint, ()>,
}

impl AdmissionCache {
    pub fn new(retention: Duration, capacity: u64) -> Self {
        Self {
            entries: Cache::builder()
                .max_capacity(capacity)
                .time_to_live(retention)
                .build(),
        }
    }

    pub fn from_config(config: &paperroute_config::WatchConfig) -> Self {
        Self::new(config.dedup_retention(), config.dedup_capacity)
    }

    /// Returns `true` if the fingerprint was not present and is now recorded.
    /// The check and the insert are one atomic step.
    pub fn admit(&self, fingerprint: &Fingerprint) -> bool {
        self.entries.entry_by_ref(fingerprint).or_insert(()).is_fresh()
    }

    pub fn contains(&self, fingerprint: &Fingerprint) -> bool {
        self.entries.contains_key(fingerprint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_admit_once_within_window() {
        let cache = AdmissionCache::new(Duration::from_secs(60), 100);
        let fp = Fingerprint::new("/inbox/a.pdf:10:1");

        assert!(cache.admit(&fp));
        assert!(!cache.admit(&fp));
        assert!(cache.contains(&fp));
        assert!(cache.admit(&Fingerprint::new("/inbox/a.pdf:11:2")));
    }

    #[test]
    fn test_entries_expire() {
        let cache = AdmissionCache::new(Duration::from_millis(50), 100);
        let fp = Fingerprint::new("fp");

        assert!(cache.admit(&fp));
        std::thread::sleep(Duration::from_millis(120));
        assert!(cache.admit(&fp));
    }

    #[test]
    fn test_concurrent_admission_admits_exactly_once() {
        let cache = Arc::new(AdmissionCache::new(Duration::from_secs(60), 100));
        let fp = Fingerprint::new("shared");

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let fp = fp.clone();
                std::thread::spawn(move || cache.admit(&fp))
            })
            .collect();

        let admitted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|admitted| *admitted)
            .count();
        assert_eq!(admitted, 1);
    }
}
