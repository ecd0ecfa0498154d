pub mod sqlite;

use chrono::{DateTime, Utc};

use crate::app::Result;
use crate::domain::{
    ArchiveEntry, CheckUpdate, EventKind, NotificationSettings, Outcome, StatRecord, TargetKey,
    TrackedTarget,
};

pub use sqlite::SqliteStore;

pub trait Store {
    // Target operations
    /// Returns false if the target already exists.
    fn add_target(&self, target: &TrackedTarget) -> Result<bool>;
    fn get_target(&self, key: &TargetKey) -> Result<Option<TrackedTarget>>;
    fn get_targets_for_user(&self, user_id: i64) -> Result<Vec<TrackedTarget>>;
    fn get_all_targets(&self) -> Result<Vec<TrackedTarget>>;
    fn delete_target(&self, key: &TargetKey) -> Result<bool>;
    fn set_night_mode(&self, key: &TargetKey, enabled: bool) -> Result<bool>;
    /// Atomically records a finished check: hash, content, resources and
    /// newly delivered fingerprints land together or not at all.
    fn commit_check(&self, key: &TargetKey, update: &CheckUpdate) -> Result<()>;

    // Statistics operations
    fn increment_stat(
        &self,
        user_id: i64,
        url: &str,
        kind: EventKind,
        outcome: Outcome,
    ) -> Result<()>;
    fn get_stats(&self, user_id: i64) -> Result<Vec<StatRecord>>;
    fn delete_stats(&self, key: &TargetKey) -> Result<usize>;

    // Archive operations
    fn add_archive(
        &self,
        user_id: i64,
        url: &str,
        content: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<i64>;
    /// Newest first.
    fn get_archives(&self, key: &TargetKey) -> Result<Vec<ArchiveEntry>>;
    fn delete_archives_before(&self, cutoff: DateTime<Utc>) -> Result<usize>;
    fn delete_archives(&self, key: &TargetKey) -> Result<usize>;

    // Notification settings
    fn get_settings(&self, user_id: i64) -> Result<Option<NotificationSettings>>;
    fn save_settings(&self, settings: &NotificationSettings) -> Result<()>;
}
