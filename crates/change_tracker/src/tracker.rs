//! Per-frame diff between the previous and the current snapshot sets.

use std::collections::{HashMap, HashSet};

use contracts::{ChangeSet, EntitySnapshot};
use rayon::prelude::*;
use tracing::{debug, instrument};

use crate::{DrainQueue, SlidingWindow};

/// Upper bound on the added/removed queues between two drains
pub const QUEUE_LIMIT: usize = 10_000;

/// Sliding-window change tracker
///
/// One instance per simulation instance. `track` is called by the
/// data-collection task once per frame; the controller reads the
/// consolidated windows and consumes the added/removed queues.
#[derive(Debug)]
pub struct ChangeTracker {
    previous: Vec<EntitySnapshot>,
    disappearing: SlidingWindow<EntitySnapshot>,
    appearing: SlidingWindow<EntitySnapshot>,
    added: DrainQueue<EntitySnapshot>,
    removed: DrainQueue<EntitySnapshot>,
    frames: u64,
}

impl ChangeTracker {
    pub fn new(window_size: usize) -> Self {
        Self {
            previous: Vec::new(),
            disappearing: SlidingWindow::new(window_size),
            appearing: SlidingWindow::new(window_size),
            added: DrainQueue::bounded(QUEUE_LIMIT),
            removed: DrainQueue::bounded(QUEUE_LIMIT),
            frames: 0,
        }
    }

    /// Diff `current` against the previous frame and advance the windows.
    ///
    /// `current` becomes the previous frame for the next call.
    #[instrument(name = "change_track", skip(self, current), fields(current = current.len()))]
    pub fn track(&mut self, current: Vec<EntitySnapshot>) -> ChangeSet {
        let current_ids: HashSet<&str> = current.iter().map(|e| e.id.as_str()).collect();
        let disappeared: Vec<EntitySnapshot> = self
            .previous
            .par_iter()
            .filter(|e| !current_ids.contains(e.id.as_str()))
            .cloned()
            .collect();

        let previous_by_id: HashMap<&str, &EntitySnapshot> =
            self.previous.iter().map(|e| (e.id.as_str(), e)).collect();

        let mut appeared = Vec::new();
        let mut updated = Vec::new();
        let mut next_previous = Vec::with_capacity(current.len());
        for mut entity in current.iter().cloned() {
            match previous_by_id.get(entity.id.as_str()) {
                Some(prev) => {
                    smooth_height(prev, &mut entity);
                    updated.push(entity.clone());
                }
                None => appeared.push(entity.clone()),
            }
            next_previous.push(entity);
        }

        self.disappearing.push(disappeared.clone());
        self.appearing.push(appeared.clone());
        self.removed.refill(disappeared.iter().cloned());
        self.added.refill(appeared.iter().cloned());
        self.previous = next_previous;
        self.frames += 1;

        debug!(
            frame = self.frames,
            appeared = appeared.len(),
            disappeared = disappeared.len(),
            updated = updated.len(),
            "Frame changes tracked"
        );

        ChangeSet {
            disappeared,
            appeared,
            updated,
        }
    }

    /// Disappearance window merged newest-first
    pub fn consolidated_disappearing(&self) -> Vec<EntitySnapshot> {
        self.disappearing.consolidated()
    }

    /// Appearance window merged newest-first
    pub fn consolidated_appearing(&self) -> Vec<EntitySnapshot> {
        self.appearing.consolidated()
    }

    /// View of a frame for publishing: the consolidated windows for the
    /// disappeared and appeared lists, the frame's own updated list.
    ///
    /// An entity missing for a single frame keeps being reported as removed
    /// until its batch leaves the window.
    pub fn published(&self, frame: &ChangeSet) -> ChangeSet {
        ChangeSet {
            disappeared: self.consolidated_disappearing(),
            appeared: self.consolidated_appearing(),
            updated: frame.updated.clone(),
        }
    }

    /// Entities that appeared since the queue was last drained
    pub fn added(&mut self) -> &mut DrainQueue<EntitySnapshot> {
        &mut self.added
    }

    /// Entities that disappeared since the queue was last drained
    pub fn removed(&mut self) -> &mut DrainQueue<EntitySnapshot> {
        &mut self.removed
    }

    /// Snapshot set of the last tracked frame
    pub fn previous(&self) -> &[EntitySnapshot] {
        &self.previous
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }
}

/// Snap a zero altitude to the previous one, then derive pitch (degrees)
/// from the height change over the planar distance travelled.
pub fn smooth_height(previous: &EntitySnapshot, current: &mut EntitySnapshot) {
    if current.position.z == 0.0 {
        current.position.z = previous.position.z;
    }
    let dz = current.position.z - previous.position.z;
    let planar = current.position.planar_distance(&previous.position);
    current.rotation.pitch = dz.atan2(planar).to_degrees();
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::Vector3;

    fn at(id: &str, x: f64, z: f64) -> EntitySnapshot {
        EntitySnapshot::vehicle(id, Vector3::new(x, 0.0, z), 0.0, 5.0, "car")
    }

    fn ids(list: &[EntitySnapshot]) -> Vec<&str> {
        let mut v: Vec<_> = list.iter().map(|e| e.id.as_str()).collect();
        v.sort();
        v
    }

    #[test]
    fn test_diff_previous_and_current() {
        let mut tracker = ChangeTracker::new(10);
        tracker.track(vec![at("A", 0.0, 0.0), at("B", 0.0, 0.0), at("C", 0.0, 0.0)]);
        let changes =
            tracker.track(vec![at("B", 1.0, 0.0), at("C", 1.0, 0.0), at("D", 0.0, 0.0)]);

        assert_eq!(ids(&changes.disappeared), vec!["A"]);
        assert_eq!(ids(&changes.appeared), vec!["D"]);
        assert_eq!(ids(&changes.updated), vec!["B", "C"]);
    }

    #[test]
    fn test_first_frame_all_appeared() {
        let mut tracker = ChangeTracker::new(10);
        let changes = tracker.track(vec![at("A", 0.0, 0.0), at("B", 0.0, 0.0)]);
        assert_eq!(changes.appeared.len(), 2);
        assert!(changes.disappeared.is_empty());
        assert!(changes.updated.is_empty());
    }

    #[test]
    fn test_disappeared_and_appeared_are_disjoint() {
        let mut tracker = ChangeTracker::new(3);
        let frames = [
            vec!["a", "b", "c"],
            vec!["b", "d"],
            vec!["a", "d", "e"],
            vec![],
            vec!["e", "f"],
        ];
        for frame in frames {
            let current: Vec<_> = frame.iter().map(|id| at(id, 0.0, 0.0)).collect();
            let expected: HashSet<&str> = frame.iter().copied().collect();
            let changes = tracker.track(current);

            let gone: HashSet<_> = changes.disappeared.iter().map(|e| e.id.clone()).collect();
            assert!(changes.appeared.iter().all(|e| !gone.contains(&e.id)));

            let seen: HashSet<&str> = changes
                .appeared
                .iter()
                .chain(changes.updated.iter())
                .map(|e| e.id.as_str())
                .collect();
            assert_eq!(seen, expected);
        }
    }

    #[test]
    fn test_zero_height_snapped_before_pitch() {
        let prev = at("A", 0.0, 12.0);
        let mut cur = at("A", 10.0, 0.0);
        smooth_height(&prev, &mut cur);
        assert_eq!(cur.position.z, 12.0);
        assert!(cur.rotation.pitch.abs() < 1e-9);
    }

    #[test]
    fn test_pitch_in_degrees() {
        let prev = at("A", 0.0, 1.0);
        let mut cur = at("A", 1.0, 2.0);
        smooth_height(&prev, &mut cur);
        assert!((cur.rotation.pitch - 45.0).abs() < 1e-9);
    }

    #[test]
    fn test_smoothed_height_carries_to_next_frame() {
        let mut tracker = ChangeTracker::new(10);
        tracker.track(vec![at("A", 0.0, 5.0)]);
        tracker.track(vec![at("A", 1.0, 0.0)]);
        let changes = tracker.track(vec![at("A", 2.0, 0.0)]);
        assert_eq!(changes.updated[0].position.z, 5.0);
    }

    #[test]
    fn test_windows_and_queues() {
        let mut tracker = ChangeTracker::new(2);
        tracker.track(vec![at("A", 0.0, 0.0)]);
        tracker.track(vec![at("B", 0.0, 0.0)]);
        tracker.track(vec![at("A", 0.0, 0.0)]);

        // capacity 2: frame 1's appearance of A has been evicted
        assert_eq!(ids(&tracker.consolidated_appearing()), vec!["A", "B"]);
        assert_eq!(ids(&tracker.consolidated_disappearing()), vec!["A", "B"]);

        let added = tracker.added().drain_all();
        assert_eq!(ids(&added), vec!["A", "A", "B"]);
        let removed: Vec<_> = std::iter::from_fn(|| tracker.removed().pop_front()).collect();
        assert_eq!(ids(&removed), vec!["A", "B"]);

        // 生产者在下一帧清空已消费的队列
        tracker.track(vec![at("C", 0.0, 0.0)]);
        assert_eq!(ids(&tracker.added().drain_all()), vec!["C"]);
    }

    #[test]
    fn test_queues_bounded_without_consumer() {
        let mut tracker = ChangeTracker::new(2);
        for n in 0..QUEUE_LIMIT + 50 {
            tracker.track(vec![at(&format!("v{n}"), 0.0, 0.0)]);
        }
        assert_eq!(tracker.added().len(), QUEUE_LIMIT);
        assert_eq!(tracker.removed().len(), QUEUE_LIMIT);
        // 最旧的条目先被丢弃
        let newest = format!("v{}", QUEUE_LIMIT + 49);
        assert_eq!(tracker.added().iter().last().map(|e| e.id.clone()), Some(newest));
    }

    #[test]
    fn test_published_view_keeps_window() {
        let mut tracker = ChangeTracker::new(3);
        tracker.track(vec![at("A", 0.0, 0.0), at("B", 0.0, 0.0)]);
        let second = tracker.track(vec![at("B", 1.0, 0.0)]);
        assert_eq!(ids(&tracker.published(&second).disappeared), vec!["A"]);

        let third = tracker.track(vec![at("B", 2.0, 0.0)]);
        assert!(third.disappeared.is_empty());
        let view = tracker.published(&third);
        assert_eq!(ids(&view.disappeared), vec!["A"]);
        assert_eq!(ids(&view.updated), vec!["B"]);
        assert_eq!(view.updated[0].position.x, 2.0);

        // A 的批次移出窗口后不再上报
        tracker.track(vec![at("B", 3.0, 0.0)]);
        let fifth = tracker.track(vec![at("B", 4.0, 0.0)]);
        assert!(tracker.published(&fifth).disappeared.is_empty());
    }
}
