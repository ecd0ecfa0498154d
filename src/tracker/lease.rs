use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashSet;

use crate::domain::TargetKey;

/// Per-target exclusive claims.
///
/// Acquisition never waits: a target that is already leased is skipped for
/// this tick. Closing the map refuses new leases while existing ones run to
/// completion.
#[derive(Debug, Clone, Default)]
pub struct LeaseMap {
    held: Arc<DashSet<TargetKey>>,
    closed: Arc<AtomicBool>,
}

impl LeaseMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_acquire(&self, key: &TargetKey) -> Option<Lease> {
        if self.closed.load(Ordering::SeqCst) {
            return None;
        }
        if !self.held.insert(key.clone()) {
            return None;
        }
        Some(Lease {
            held: self.held.clone(),
            key: key.clone(),
        })
    }

    pub fn is_held(&self, key: &TargetKey) -> bool {
        self.held.contains(key)
    }

    pub fn active(&self) -> usize {
        self.held.len()
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Released on drop, including on early return and panic unwind.
#[derive(Debug)]
pub struct Lease {
    held: Arc<DashSet<TargetKey>>,
    key: TargetKey,
}

impl Lease {
    pub fn key(&self) -> &TargetKey {
        &self.key
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        self.held.remove(&self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_acquire_fails_until_release() {
        let leases = LeaseMap::new();
        let key = TargetKey::new(1, "https://example.com");

        let lease = leases.try_acquire(&key).unwrap();
        assert!(leases.try_acquire(&key).is_none());
        assert!(leases.is_held(&key));

        drop(lease);
        assert!(!leases.is_held(&key));
        assert!(leases.try_acquire(&key).is_some());
    }

    #[test]
    fn test_keys_are_independent() {
        let leases = LeaseMap::new();
        let _a = leases.try_acquire(&TargetKey::new(1, "https://a.example")).unwrap();
        let _b = leases.try_acquire(&TargetKey::new(2, "https://a.example")).unwrap();
        assert_eq!(leases.active(), 2);
    }

    #[test]
    fn test_closed_map_refuses_new_leases() {
        let leases = LeaseMap::new();
        let key = TargetKey::new(1, "https://example.com");
        let held = leases.try_acquire(&key).unwrap();

        leases.close();
        assert!(leases.try_acquire(&TargetKey::new(2, "https://example.com")).is_none());

        drop(held);
        assert_eq!(leases.active(), 0);
        assert!(leases.try_acquire(&key).is_none());
    }

    #[tokio::test]
    async fn test_concurrent_acquire_single_winner() {
        let leases = LeaseMap::new();
        let key = TargetKey::new(1, "https://example.com");

        let mut handles = Vec::new();
        for _ in 0..16 {
            let leases = leases.clone();
            let key = key.clone();
            handles.push(tokio::spawn(async move {
                let lease = leases.try_acquire(&key);
                tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                lease.is_some()
            }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }
}
