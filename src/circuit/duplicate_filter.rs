use std::collections::VecDeque;
use rustc_hash::FxHashSet;

/// Remembers the most recently received sequence numbers. A peer re-sends reliable packets
///  when our ack gets lost, and those must be acked again but not dispatched a second time.
pub struct DuplicateFilter {
    capacity: usize,
    order: VecDeque<u32>,
    seen: FxHashSet<u32>,
}

impl DuplicateFilter {
    pub fn new(capacity: usize) -> DuplicateFilter {
        DuplicateFilter {
            capacity,
            order: VecDeque::with_capacity(capacity),
            seen: FxHashSet::default(),
        }
    }

    /// Returns `true` if the sequence number was not seen before (within the window), and
    ///  records it
    #[must_use]
    pub fn check_and_insert(&mut self, sequence: u32) -> bool {
        if !self.seen.insert(sequence) {
            return false;
        }

        self.order.push_back(sequence);
        while self.order.len() > self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.seen.remove(&evicted);
            }
        }
        true
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicates() {
        let mut filter = DuplicateFilter::new(10);
        assert!(filter.check_and_insert(1));
        assert!(filter.check_and_insert(2));
        assert!(!filter.check_and_insert(1));
        assert!(!filter.check_and_insert(2));
        assert!(filter.check_and_insert(3));
        assert_eq!(filter.len(), 3);
    }

    #[test]
    fn test_window_eviction() {
        let mut filter = DuplicateFilter::new(3);
        for seq in 1..=4 {
            assert!(filter.check_and_insert(seq));
        }
        assert_eq!(filter.len(), 3);

        // 1 fell out of the window
        assert!(filter.check_and_insert(1));
        assert!(!filter.check_and_insert(4));
        assert!(filter.check_and_insert(2));
    }
}
