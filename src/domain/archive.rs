use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Immutable snapshot of a page's content at a point in time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveEntry {
    pub id: i64,
    pub user_id: i64,
    pub url: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}
