use std::collections::HashSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Compound identity of a tracked page.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TargetKey {
    pub user_id: i64,
    pub url: String,
}

impl TargetKey {
    pub fn new(user_id: i64, url: impl Into<String>) -> Self {
        Self {
            user_id,
            url: url.into(),
        }
    }
}

impl fmt::Display for TargetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.user_id, self.url)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackedTarget {
    pub user_id: i64,
    pub url: String,
    pub name: Option<String>,
    /// Empty until the first successful check.
    pub content_hash: String,
    pub content: Option<String>,
    pub last_checked: Option<DateTime<Utc>>,
    pub night_mode: bool,
    pub sent_hashes: HashSet<String>,
    pub resources: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl TrackedTarget {
    pub fn new(user_id: i64, url: String) -> Self {
        Self {
            user_id,
            url,
            name: None,
            content_hash: String::new(),
            content: None,
            last_checked: None,
            night_mode: false,
            sent_hashes: HashSet::new(),
            resources: Vec::new(),
            created_at: Utc::now(),
        }
    }

    pub fn key(&self) -> TargetKey {
        TargetKey::new(self.user_id, self.url.clone())
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("Unnamed")
    }

    pub fn is_initialized(&self) -> bool {
        !self.content_hash.is_empty()
    }
}

/// Everything a successful check cycle writes back, applied in one transaction.
#[derive(Debug, Clone)]
pub struct CheckUpdate {
    pub content_hash: String,
    pub content: String,
    pub last_checked: DateTime<Utc>,
    pub resources: Vec<String>,
    /// Fingerprints delivered during this cycle. Appended, never replaced.
    pub new_sent_hashes: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_target_is_uninitialized() {
        let target = TrackedTarget::new(42, "https://example.com".into());
        assert!(!target.is_initialized());
        assert!(target.sent_hashes.is_empty());
        assert_eq!(target.display_name(), "Unnamed");
    }

    #[test]
    fn test_key_display() {
        let key = TargetKey::new(7, "https://example.com/page");
        assert_eq!(key.to_string(), "7:https://example.com/page");
    }

    #[test]
    fn test_display_name_prefers_name() {
        let mut target = TrackedTarget::new(1, "https://example.com".into());
        target.name = Some("Exam notices".into());
        assert_eq!(target.display_name(), "Exam notices");
    }
}
