use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::app::PagewatchError;

/// The closed set of event kinds statistics are kept for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Checks,
    Downloads,
    ContentChanges,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::Checks => "checks",
            EventKind::Downloads => "downloads",
            EventKind::ContentChanges => "content_changes",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = PagewatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "checks" => Ok(EventKind::Checks),
            "downloads" => Ok(EventKind::Downloads),
            "content_changes" => Ok(EventKind::ContentChanges),
            other => Err(PagewatchError::Validation(format!(
                "Invalid event kind: {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure,
    /// Check skipped by night mode. Counted apart from failures.
    Suppressed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counter {
    pub success: i64,
    pub failure: i64,
    pub suppressed: i64,
}

/// Raw counters for one (user, url) pair.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatRecord {
    pub user_id: i64,
    pub url: String,
    pub checks: Counter,
    pub downloads: Counter,
    pub content_changes: Counter,
}

impl StatRecord {
    pub fn counter(&self, kind: EventKind) -> &Counter {
        match kind {
            EventKind::Checks => &self.checks,
            EventKind::Downloads => &self.downloads,
            EventKind::ContentChanges => &self.content_changes,
        }
    }

    pub fn counter_mut(&mut self, kind: EventKind) -> &mut Counter {
        match kind {
            EventKind::Checks => &mut self.checks,
            EventKind::Downloads => &mut self.downloads,
            EventKind::ContentChanges => &mut self.content_changes,
        }
    }
}

/// Per-user aggregate derived from raw counters on demand.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatsSummary {
    pub total_tracked: i64,
    pub success_downloads: i64,
    pub failed_downloads: i64,
    pub success_checks: i64,
    pub failed_checks: i64,
    pub suppressed_checks: i64,
    pub content_changes: i64,
    /// successful checks / (successful + failed checks), 0 with no checks.
    pub uptime: f64,
}

impl StatsSummary {
    pub fn uptime_percentage(&self) -> f64 {
        self.uptime * 100.0
    }
}
