//! Bounded request-id deduplication
//!
//! Shutdown and abort requests carry a UUID `requestId`; re-delivered
//! duplicates must produce no additional state transitions. The set is
//! bounded so long-lived workers do not grow without limit.

use std::collections::{HashSet, VecDeque};

const DEFAULT_CAPACITY: usize = 2048;

/// FIFO-bounded set of request ids this process has already handled.
#[derive(Debug)]
pub struct SeenRequests {
    entries: HashSet<String>,
    order: VecDeque<String>,
    capacity: usize,
}

impl Default for SeenRequests {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

impl SeenRequests {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: HashSet::new(),
            order: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    /// Returns `true` when the id was already seen; otherwise records it.
    pub fn check_and_insert(&mut self, request_id: &str) -> bool {
        if self.entries.contains(request_id) {
            return true;
        }
        self.entries.insert(request_id.to_string());
        self.order.push_back(request_id.to_string());
        while self.entries.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.entries.remove(&oldest);
            } else {
                break;
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_insert_is_fresh() {
        let mut seen = SeenRequests::default();
        assert!(!seen.check_and_insert("r1"));
        assert!(seen.check_and_insert("r1"));
        assert!(!seen.check_and_insert("r2"));
    }

    #[test]
    fn capacity_evicts_oldest() {
        let mut seen = SeenRequests::with_capacity(2);
        assert!(!seen.check_and_insert("a"));
        assert!(!seen.check_and_insert("b"));
        assert!(!seen.check_and_insert("c"));
        // "a" was evicted and reads as fresh again.
        assert!(!seen.check_and_insert("a"));
        // "c" is still tracked.
        assert!(seen.check_and_insert("c"));
    }
}
