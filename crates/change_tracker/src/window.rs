//! Bounded window of per-frame batches.
//!
//! Backed by a `HeapRb`; pushing onto a full window overwrites the oldest
//! batch, so `len() <= capacity()` holds after every push.

use std::collections::HashSet;
use std::fmt;

use contracts::EntitySnapshot;
use ringbuf::{traits::*, HeapRb};

/// Items stored in a window expose a stable identity
pub trait Keyed {
    fn key(&self) -> &str;
}

impl Keyed for EntitySnapshot {
    fn key(&self) -> &str {
        &self.id
    }
}

/// Sliding window of frame batches, oldest to newest
pub struct SlidingWindow<T> {
    batches: HeapRb<Vec<T>>,
}

impl<T> fmt::Debug for SlidingWindow<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlidingWindow")
            .field("len", &self.batches.occupied_len())
            .field("capacity", &self.capacity())
            .finish()
    }
}

impl<T> SlidingWindow<T> {
    /// Create a window; a zero capacity is raised to 1
    pub fn new(capacity: usize) -> Self {
        Self {
            batches: HeapRb::new(capacity.max(1)),
        }
    }

    /// Append a batch, evicting the oldest one when full
    pub fn push(&mut self, batch: Vec<T>) {
        self.batches.push_overwrite(batch);
    }

    pub fn len(&self) -> usize {
        self.batches.occupied_len()
    }

    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.batches.capacity().get()
    }

    pub fn clear(&mut self) {
        self.batches.clear();
    }

    /// Batches from newest to oldest
    pub fn newest_first(&self) -> impl Iterator<Item = &Vec<T>> {
        let (older, newer) = self.batches.as_slices();
        newer.iter().rev().chain(older.iter().rev())
    }
}

impl<T: Keyed + Clone> SlidingWindow<T> {
    /// Newest to oldest, keeping only the first occurrence of each key
    pub fn consolidated(&self) -> Vec<T> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for batch in self.newest_first() {
            for item in batch {
                if seen.insert(item.key()) {
                    out.push(item.clone());
                }
            }
        }
        out
    }
}
