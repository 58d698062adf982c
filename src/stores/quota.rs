//! Backend capacity accounting
//!
//! Tracks bytes used per backend against an optional capacity. Placement
//! asks for a reservation before each put; a backend whose reservation would
//! overshoot its capacity is passed over for that shard but stays available
//! for smaller ones. Backends without a configured capacity are unbounded.

use parking_lot::Mutex;
use std::collections::HashMap;

use super::{LsEntry, LsEntrySink};

#[derive(Default)]
struct QuotaState {
    capacity: Option<u64>,
    used: u64,
}

/// Per-backend usage and capacity tracking
pub struct QuotaMan {
    states: Mutex<HashMap<String, QuotaState>>,
}

impl QuotaMan {
    pub fn new() -> Self {
        Self {
            states: Mutex::new(HashMap::new()),
        }
    }

    /// Cap a backend's total bytes
    pub fn set_capacity(&self, copier_id: &str, capacity: u64) {
        self.states
            .lock()
            .entry(copier_id.to_string())
            .or_default()
            .capacity = Some(capacity);
    }

    /// Record bytes already resident on a backend
    pub fn add_use(&self, copier_id: &str, bytes: u64) {
        self.states
            .lock()
            .entry(copier_id.to_string())
            .or_default()
            .used += bytes;
    }

    /// Reserve room for a shard. On success the bytes count as used; on
    /// refusal nothing changes and the backend is skipped for this shard.
    pub fn reserve(&self, copier_id: &str, bytes: u64) -> bool {
        let mut states = self.states.lock();
        let state = states.entry(copier_id.to_string()).or_default();
        if let Some(capacity) = state.capacity {
            if state.used + bytes > capacity {
                return false;
            }
        }
        state.used += bytes;
        true
    }

    /// Return a reservation that will not be used
    pub fn release(&self, copier_id: &str, bytes: u64) {
        let mut states = self.states.lock();
        if let Some(state) = states.get_mut(copier_id) {
            state.used = state.used.saturating_sub(bytes);
        }
    }

    /// Bytes currently accounted to a backend
    pub fn used(&self, copier_id: &str) -> u64 {
        self.states
            .lock()
            .get(copier_id)
            .map(|s| s.used)
            .unwrap_or(0)
    }
}

impl Default for QuotaMan {
    fn default() -> Self {
        Self::new()
    }
}

impl LsEntrySink for QuotaMan {
    fn add(&self, copier_id: &str, entry: &LsEntry) {
        self.add_use(copier_id, entry.size);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uncapped_backend_always_reserves() {
        let quota = QuotaMan::new();
        assert!(quota.reserve("a", u64::MAX / 2));
        assert!(quota.reserve("a", u64::MAX / 2));
    }

    #[test]
    fn test_capacity_refuses_overshoot() {
        let quota = QuotaMan::new();
        quota.set_capacity("a", 100);

        assert!(quota.reserve("a", 60));
        // 60 + 50 > 100: refused, usage unchanged
        assert!(!quota.reserve("a", 50));
        assert_eq!(quota.used("a"), 60);
        // a smaller shard still fits
        assert!(quota.reserve("a", 40));
        assert_eq!(quota.used("a"), 100);
    }

    #[test]
    fn test_release_returns_reserved_room() {
        let quota = QuotaMan::new();
        quota.set_capacity("a", 100);

        assert!(quota.reserve("a", 80));
        assert!(!quota.reserve("a", 30));
        quota.release("a", 80);
        assert!(quota.reserve("a", 30));
        assert_eq!(quota.used("a"), 30);
    }

    #[test]
    fn test_listing_counts_toward_quota() {
        let quota = QuotaMan::new();
        quota.set_capacity("a", 10);
        quota.add_use("a", 8);
        assert!(!quota.reserve("a", 3));
        assert!(quota.reserve("a", 2));
    }
}
