//! Per-(user, url) success/failure counters and derived metrics.

use std::sync::Arc;

use tracing::{debug, error};

use crate::app::Result;
use crate::domain::{EventKind, Outcome, StatRecord, StatsSummary};
use crate::store::Store;

pub struct StatisticsAggregator<S: Store> {
    store: Arc<S>,
}

impl<S: Store> Clone for StatisticsAggregator<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
        }
    }
}

impl<S: Store> StatisticsAggregator<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    pub fn record(&self, kind: EventKind, user_id: i64, url: &str, outcome: Outcome) -> Result<()> {
        debug!("stat {} {:?} for {}:{}", kind, outcome, user_id, url);
        self.store.increment_stat(user_id, url, kind, outcome)
    }

    /// Like [`record`](Self::record) but validates a free-form event name first.
    pub fn record_named(&self, kind: &str, user_id: i64, url: &str, outcome: Outcome) -> Result<()> {
        let kind: EventKind = kind.parse()?;
        self.record(kind, user_id, url, outcome)
    }

    /// Records and logs instead of returning the error. Used on paths that
    /// are already reporting a failure.
    pub fn record_quietly(&self, kind: EventKind, user_id: i64, url: &str, outcome: Outcome) {
        if let Err(e) = self.record(kind, user_id, url, outcome) {
            error!("Failed to record {} stat for {}: {}", kind, url, e);
        }
    }

    pub fn summarize(&self, user_id: i64) -> Result<StatsSummary> {
        let records = self.store.get_stats(user_id)?;
        let total_tracked = self.store.get_targets_for_user(user_id)?.len() as i64;
        Ok(summarize_records(total_tracked, &records))
    }
}

/// Folds raw counters into a summary. Uptime is recomputed every time so it
/// can never drift from the counters.
pub fn summarize_records(total_tracked: i64, records: &[StatRecord]) -> StatsSummary {
    let mut summary = StatsSummary {
        total_tracked,
        ..Default::default()
    };

    for record in records {
        summary.success_downloads += record.downloads.success;
        summary.failed_downloads += record.downloads.failure;
        summary.success_checks += record.checks.success;
        summary.failed_checks += record.checks.failure;
        summary.suppressed_checks += record.checks.suppressed;
        summary.content_changes += record.content_changes.success;
    }

    let total_checks = summary.success_checks + summary.failed_checks;
    summary.uptime = if total_checks == 0 {
        0.0
    } else {
        summary.success_checks as f64 / total_checks as f64
    };

    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::PagewatchError;
    use crate::domain::TrackedTarget;
    use crate::store::SqliteStore;

    fn aggregator() -> (Arc<SqliteStore>, StatisticsAggregator<SqliteStore>) {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        (store.clone(), StatisticsAggregator::new(store))
    }

    #[test]
    fn test_uptime_zero_without_checks() {
        let (_, stats) = aggregator();
        let summary = stats.summarize(1).unwrap();
        assert_eq!(summary.uptime, 0.0);
        assert_eq!(summary.total_tracked, 0);
    }

    #[test]
    fn test_uptime_one_when_all_succeed() {
        let (_, stats) = aggregator();
        for _ in 0..3 {
            stats.record(EventKind::Checks, 1, "https://a.example.com", Outcome::Success).unwrap();
        }
        stats.record(EventKind::Checks, 1, "https://b.example.com", Outcome::Success).unwrap();

        let summary = stats.summarize(1).unwrap();
        assert_eq!(summary.uptime, 1.0);
        assert_eq!(summary.success_checks, 4);
    }

    #[test]
    fn test_uptime_ignores_suppressed_checks() {
        let (_, stats) = aggregator();
        let url = "https://a.example.com";
        stats.record(EventKind::Checks, 1, url, Outcome::Success).unwrap();
        stats.record(EventKind::Checks, 1, url, Outcome::Failure).unwrap();
        stats.record(EventKind::Checks, 1, url, Outcome::Suppressed).unwrap();

        let summary = stats.summarize(1).unwrap();
        assert_eq!(summary.uptime, 0.5);
        assert_eq!(summary.suppressed_checks, 1);
        assert_eq!(summary.uptime_percentage(), 50.0);
    }

    #[test]
    fn test_summary_aggregates_across_urls() {
        let (store, stats) = aggregator();
        store
            .add_target(&TrackedTarget::new(1, "https://a.example.com".into()))
            .unwrap();
        store
            .add_target(&TrackedTarget::new(1, "https://b.example.com".into()))
            .unwrap();

        stats.record(EventKind::Downloads, 1, "https://a.example.com", Outcome::Success).unwrap();
        stats.record(EventKind::Downloads, 1, "https://b.example.com", Outcome::Success).unwrap();
        stats.record(EventKind::Downloads, 1, "https://b.example.com", Outcome::Failure).unwrap();
        stats.record(EventKind::Downloads, 2, "https://b.example.com", Outcome::Failure).unwrap();

        let summary = stats.summarize(1).unwrap();
        assert_eq!(summary.total_tracked, 2);
        assert_eq!(summary.success_downloads, 2);
        assert_eq!(summary.failed_downloads, 1);
    }

    #[test]
    fn test_record_named_rejects_unknown_kind() {
        let (store, stats) = aggregator();
        let err = stats
            .record_named("visits", 1, "https://a.example.com", Outcome::Success)
            .unwrap_err();
        assert!(matches!(err, PagewatchError::Validation(_)));
        assert!(store.get_stats(1).unwrap().is_empty());

        stats
            .record_named("content_changes", 1, "https://a.example.com", Outcome::Success)
            .unwrap();
        assert_eq!(store.get_stats(1).unwrap()[0].content_changes.success, 1);
    }

    #[tokio::test]
    async fn test_concurrent_increments_not_lost() {
        let (store, stats) = aggregator();
        let mut handles = Vec::new();
        for i in 0..20 {
            let stats = stats.clone();
            handles.push(tokio::spawn(async move {
                let url = if i % 2 == 0 { "https://a.example.com" } else { "https://b.example.com" };
                stats.record(EventKind::Checks, 1, url, Outcome::Success).unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let total: i64 = store.get_stats(1).unwrap().iter().map(|r| r.checks.success).sum();
        assert_eq!(total, 20);
    }
}
