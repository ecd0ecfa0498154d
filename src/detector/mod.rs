//! Content fingerprinting and line diffs between check cycles.

use similar::TextDiff;

use crate::domain::fingerprint;
use crate::notify::{truncate_chars, MAX_MESSAGE_LENGTH};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change {
    Unchanged,
    ChangedWithDiff(String),
    /// First successful check of a target; nothing to diff against.
    InitialSnapshot,
}

impl Change {
    pub fn is_change(&self) -> bool {
        !matches!(self, Change::Unchanged)
    }
}

/// Result of comparing freshly fetched content with the stored state.
#[derive(Debug, Clone)]
pub struct Detection {
    pub content_hash: String,
    pub change: Change,
}

#[derive(Debug, Clone)]
pub struct ChangeDetector {
    max_diff_len: usize,
}

impl Default for ChangeDetector {
    fn default() -> Self {
        Self::new(MAX_MESSAGE_LENGTH)
    }
}

impl ChangeDetector {
    pub fn new(max_diff_len: usize) -> Self {
        Self { max_diff_len }
    }

    pub fn detect(
        &self,
        previous_hash: &str,
        previous_content: Option<&str>,
        current: &str,
    ) -> Detection {
        let content_hash = fingerprint(current);

        let change = if previous_hash.is_empty() {
            Change::InitialSnapshot
        } else if previous_hash == content_hash {
            Change::Unchanged
        } else {
            Change::ChangedWithDiff(self.diff(previous_content.unwrap_or_default(), current))
        };

        Detection {
            content_hash,
            change,
        }
    }

    /// Unified line diff, truncated on a char boundary.
    pub fn diff(&self, old: &str, new: &str) -> String {
        let diff = TextDiff::from_lines(old, new)
            .unified_diff()
            .context_radius(3)
            .header("Previous", "Current")
            .to_string();

        truncate_chars(&diff, self.max_diff_len).to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_check_is_initial_snapshot() {
        let detector = ChangeDetector::default();
        let detection = detector.detect("", None, "<p>hello</p>");
        assert_eq!(detection.change, Change::InitialSnapshot);
        assert_eq!(detection.content_hash, fingerprint("<p>hello</p>"));
    }

    #[test]
    fn test_same_content_unchanged() {
        let detector = ChangeDetector::default();
        let hash = fingerprint("line one\nline two\n");
        let detection = detector.detect(&hash, Some("line one\nline two\n"), "line one\nline two\n");
        assert_eq!(detection.change, Change::Unchanged);
        assert!(!detection.change.is_change());
    }

    #[test]
    fn test_changed_content_produces_diff() {
        let detector = ChangeDetector::default();
        let old = "line one\nline two\n";
        let new = "line one\nline 2\n";
        let detection = detector.detect(&fingerprint(old), Some(old), new);

        match detection.change {
            Change::ChangedWithDiff(diff) => {
                assert!(diff.contains("--- Previous"));
                assert!(diff.contains("+++ Current"));
                assert!(diff.contains("-line two"));
                assert!(diff.contains("+line 2"));
            }
            other => panic!("expected diff, got {:?}", other),
        }
    }

    #[test]
    fn test_changed_without_stored_content_diffs_against_empty() {
        let detector = ChangeDetector::default();
        let detection = detector.detect("stale-hash", None, "fresh\n");
        match detection.change {
            Change::ChangedWithDiff(diff) => assert!(diff.contains("+fresh")),
            other => panic!("expected diff, got {:?}", other),
        }
    }

    #[test]
    fn test_diff_truncated() {
        let detector = ChangeDetector::new(50);
        let old: String = (0..100).map(|i| format!("old {}\n", i)).collect();
        let new: String = (0..100).map(|i| format!("new {}\n", i)).collect();
        assert_eq!(detector.diff(&old, &new).chars().count(), 50);
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate_chars("ñandú", 3), "ñan");
        assert_eq!(truncate_chars("short", 10), "short");
    }
}
