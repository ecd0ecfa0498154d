//! At-most-once delivery bookkeeping for one check cycle.

use std::collections::HashSet;

/// Snapshot of a target's delivered fingerprints plus what this cycle adds.
///
/// Fingerprints are marked only after delivery is confirmed. The additions
/// are written back together with the target's new hash in one transaction.
#[derive(Debug, Clone, Default)]
pub struct DedupSet {
    sent: HashSet<String>,
    added: Vec<String>,
}

impl DedupSet {
    pub fn new(sent: HashSet<String>) -> Self {
        Self {
            sent,
            added: Vec::new(),
        }
    }

    pub fn is_new(&self, fingerprint: &str) -> bool {
        !self.sent.contains(fingerprint)
    }

    /// Idempotent: marking a known fingerprint is a no-op.
    pub fn mark_sent(&mut self, fingerprint: &str) {
        if self.sent.insert(fingerprint.to_string()) {
            self.added.push(fingerprint.to_string());
        }
    }

    /// Fingerprints marked during this cycle, in marking order.
    pub fn newly_sent(&self) -> &[String] {
        &self.added
    }

    pub fn len(&self) -> usize {
        self.sent.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sent.is_empty()
    }
}
