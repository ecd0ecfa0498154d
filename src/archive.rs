//! Timestamped content snapshots with retention.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::info;

use crate::app::Result;
use crate::domain::{ArchiveEntry, TargetKey};
use crate::store::Store;

pub struct ArchiveStore<S: Store> {
    store: Arc<S>,
}

impl<S: Store> Clone for ArchiveStore<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
        }
    }
}

impl<S: Store> ArchiveStore<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    pub fn append(
        &self,
        user_id: i64,
        url: &str,
        content: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<i64> {
        self.store.add_archive(user_id, url, content, timestamp)
    }

    pub fn list(&self, user_id: i64, url: &str) -> Result<Vec<ArchiveEntry>> {
        self.store.get_archives(&TargetKey::new(user_id, url))
    }

    /// Deletes entries older than `now - retention`. Safe to repeat.
    pub fn sweep(&self, retention: Duration, now: DateTime<Utc>) -> Result<usize> {
        let cutoff = now - retention;
        let deleted = self.store.delete_archives_before(cutoff)?;
        if deleted > 0 {
            info!("Swept {} archives older than {}", deleted, cutoff.format("%Y-%m-%d %H:%M"));
        }
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SqliteStore;

    fn archives() -> ArchiveStore<SqliteStore> {
        ArchiveStore::new(Arc::new(SqliteStore::in_memory().unwrap()))
    }

    #[test]
    fn test_list_newest_first_per_target() {
        let archive = archives();
        let now = Utc::now();
        archive.append(1, "https://a.example.com", "v1", now - Duration::minutes(30)).unwrap();
        archive.append(1, "https://a.example.com", "v2", now).unwrap();
        archive.append(1, "https://b.example.com", "other", now).unwrap();
        archive.append(2, "https://a.example.com", "other user", now).unwrap();

        let entries = archive.list(1, "https://a.example.com").unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].content, "v2");
        assert_eq!(entries[1].content, "v1");
    }

    #[test]
    fn test_sweep_is_idempotent() {
        let archive = archives();
        let now = Utc::now();
        archive.append(1, "https://a.example.com", "old", now - Duration::days(10)).unwrap();
        archive.append(1, "https://a.example.com", "fresh", now - Duration::days(2)).unwrap();

        assert_eq!(archive.sweep(Duration::days(7), now).unwrap(), 1);
        assert_eq!(archive.sweep(Duration::days(7), now).unwrap(), 0);

        let entries = archive.list(1, "https://a.example.com").unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].content, "fresh");
    }

    #[test]
    fn test_sweep_keeps_entry_at_boundary() {
        let archive = archives();
        let now = Utc::now();
        archive.append(1, "https://a.example.com", "edge", now - Duration::days(7)).unwrap();

        assert_eq!(archive.sweep(Duration::days(7), now).unwrap(), 0);
    }
}
