//! Producer/consumer hand-off queue with a drained flag.
//!
//! The producer appends one batch per frame. Consumers either pop entries
//! one at a time or take everything at once; reading the contents in place
//! and calling [`DrainQueue::mark_drained`] has the same effect on the next
//! refill: the producer clears the queue before appending.
//!
//! A bounded queue drops its oldest entries once the limit is reached, so
//! a consumer that stops draining cannot grow it without end.

use std::collections::VecDeque;

#[derive(Debug, Clone)]
pub struct DrainQueue<T> {
    items: VecDeque<T>,
    drained: bool,
    limit: usize,
}

impl<T> Default for DrainQueue<T> {
    fn default() -> Self {
        Self {
            items: VecDeque::new(),
            drained: false,
            limit: usize::MAX,
        }
    }
}

impl<T> DrainQueue<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue holding at most `limit` entries (at least 1)
    pub fn bounded(limit: usize) -> Self {
        Self {
            limit: limit.max(1),
            ..Self::default()
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Producer side: append a frame's batch, clearing first if the
    /// previous contents were consumed
    pub fn refill(&mut self, batch: impl IntoIterator<Item = T>) {
        if self.drained {
            self.items.clear();
            self.drained = false;
        }
        self.items.extend(batch);
        let overflow = self.items.len().saturating_sub(self.limit);
        if overflow > 0 {
            self.items.drain(..overflow);
        }
    }

    /// Take the oldest entry
    pub fn pop_front(&mut self) -> Option<T> {
        self.items.pop_front()
    }

    /// Take every entry and flag the queue as drained
    pub fn drain_all(&mut self) -> Vec<T> {
        self.drained = true;
        self.items.drain(..).collect()
    }

    /// Consumer finished reading in place
    pub fn mark_drained(&mut self) {
        self.drained = true;
    }

    pub fn is_drained(&self) -> bool {
        self.drained
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pop_front_once() {
        let mut q = DrainQueue::new();
        q.refill(["a", "b"]);
        assert_eq!(q.pop_front(), Some("a"));
        assert_eq!(q.pop_front(), Some("b"));
        assert_eq!(q.pop_front(), None);
    }

    #[test]
    fn test_refill_appends_until_drained() {
        let mut q = DrainQueue::new();
        q.refill([1, 2]);
        q.refill([3]);
        assert_eq!(q.len(), 3);

        q.mark_drained();
        q.refill([4]);
        assert_eq!(q.iter().copied().collect::<Vec<_>>(), vec![4]);
        assert!(!q.is_drained());
    }

    #[test]
    fn test_bounded_queue_drops_oldest() {
        let mut q = DrainQueue::bounded(3);
        for n in 0..10 {
            q.refill([n]);
        }
        assert_eq!(q.len(), 3);
        assert_eq!(q.iter().copied().collect::<Vec<_>>(), vec![7, 8, 9]);

        q.refill([10, 11, 12, 13]);
        assert_eq!(q.iter().copied().collect::<Vec<_>>(), vec![11, 12, 13]);
    }

    #[test]
    fn test_drain_all_sets_flag() {
        let mut q = DrainQueue::new();
        q.refill([1, 2, 3]);
        assert_eq!(q.drain_all(), vec![1, 2, 3]);
        assert!(q.is_empty());
        assert!(q.is_drained());
    }
}
