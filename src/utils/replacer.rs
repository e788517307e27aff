use std::cmp::Ordering;
use std::collections::{HashSet, VecDeque};
use std::sync::Mutex;

use hashlink::LinkedHashMap;
use thiserror::Error;

pub type FrameId = u32;

// Backward k-distance of a frame with fewer than k recorded accesses.
const POS_INFINITY: Option<u64> = None;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ReplacerError {
    #[error("frame id {frame_id} is outside the replacer range [0, {capacity})")]
    InvalidFrame { frame_id: FrameId, capacity: usize },
}

pub trait Replacer {
    fn record_access(&self, frame_id: FrameId) -> Result<(), ReplacerError>;
    fn set_evictable(&self, frame_id: FrameId, evictable: bool);
    fn evict(&self) -> Option<FrameId>;
    fn remove(&self, frame_id: FrameId) -> Result<(), ReplacerError>;
    fn size(&self) -> usize;
}

#[derive(Debug)]
struct LruKNode {
    // Most recent k access timestamps, oldest at the front.
    history: VecDeque<u64>,
    is_evictable: bool,
}

impl LruKNode {
    fn new() -> Self {
        LruKNode {
            history: VecDeque::new(),
            is_evictable: false,
        }
    }

    fn push_timestamp(&mut self, timestamp: u64, k: usize) {
        self.history.push_back(timestamp);
        if self.history.len() > k {
            self.history.pop_front();
        }
    }

    fn backward_k_distance(&self, now: u64, k: usize) -> Option<u64> {
        if self.history.len() < k {
            return POS_INFINITY;
        }
        self.history.front().map(|&oldest| now - oldest)
    }

    // A frame that was never accessed ranks as timestamp 0 and wins every tie.
    fn last_access(&self) -> u64 {
        self.history.back().copied().unwrap_or(0)
    }
}

struct ReplacerState {
    node_store: LinkedHashMap<FrameId, LruKNode>,
    evictable_set: HashSet<FrameId>,
    evictable_count: usize,
    current_timestamp: u64,
}

// Monitor-style LRU-K replacer: one mutex covers the node store, the evictable
// set and the logical clock, so every public operation is a single critical
// section and the cached count never drifts from the set.
pub struct LruKReplacer {
    state: Mutex<ReplacerState>,
    replacer_size: usize,
    k: usize,
}

impl LruKReplacer {
    pub fn new(number_of_frames: usize, k: usize) -> Self {
        LruKReplacer {
            state: Mutex::new(ReplacerState {
                node_store: LinkedHashMap::new(),
                evictable_set: HashSet::new(),
                evictable_count: 0,
                current_timestamp: 0,
            }),
            replacer_size: number_of_frames,
            k,
        }
    }

    fn check_frame_id(&self, frame_id: FrameId) -> Result<(), ReplacerError> {
        if frame_id as usize >= self.replacer_size {
            return Err(ReplacerError::InvalidFrame {
                frame_id,
                capacity: self.replacer_size,
            });
        }
        Ok(())
    }
}

// None is "infinite", i.e. farther away than any finite distance.
fn farther(lhs: Option<u64>, rhs: Option<u64>) -> Ordering {
    match (lhs, rhs) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(a), Some(b)) => a.cmp(&b),
    }
}

impl Replacer for LruKReplacer {
    fn record_access(&self, frame_id: FrameId) -> Result<(), ReplacerError> {
        self.check_frame_id(frame_id)?;
        let mut state = self.state.lock().unwrap();

        state.current_timestamp += 1;
        let timestamp = state.current_timestamp;
        state
            .node_store
            .entry(frame_id)
            .or_insert_with(LruKNode::new)
            .push_timestamp(timestamp, self.k);
        Ok(())
    }

    fn set_evictable(&self, frame_id: FrameId, evictable: bool) {
        let mut state = self.state.lock().unwrap();

        let node = state
            .node_store
            .entry(frame_id)
            .or_insert_with(LruKNode::new);
        let was_evictable = node.is_evictable;
        node.is_evictable = evictable;

        if !was_evictable && evictable {
            state.evictable_set.insert(frame_id);
            state.evictable_count += 1;
        } else if was_evictable && !evictable {
            state.evictable_set.remove(&frame_id);
            state.evictable_count -= 1;
        }
    }

    fn evict(&self) -> Option<FrameId> {
        let mut state = self.state.lock().unwrap();
        if state.evictable_count == 0 {
            return None;
        }

        // The clock is read under the same lock acquisition that scans the
        // candidates, so distances always reflect the latest recorded access.
        let now = state.current_timestamp;

        let mut victim: Option<(FrameId, Option<u64>, u64)> = None;
        for (&frame_id, node) in state.node_store.iter() {
            if !node.is_evictable {
                continue;
            }
            let distance = node.backward_k_distance(now, self.k);
            let last = node.last_access();

            let better = match victim {
                None => true,
                Some((_, best_distance, best_last)) => match farther(distance, best_distance) {
                    Ordering::Greater => true,
                    Ordering::Equal => last < best_last,
                    Ordering::Less => false,
                },
            };
            if better {
                victim = Some((frame_id, distance, last));
            }
        }

        let (frame_id, _, _) = victim?;
        state.node_store.remove(&frame_id);
        state.evictable_set.remove(&frame_id);
        state.evictable_count -= 1;
        Some(frame_id)
    }

    fn remove(&self, frame_id: FrameId) -> Result<(), ReplacerError> {
        self.check_frame_id(frame_id)?;
        let mut state = self.state.lock().unwrap();

        // Pinned (non-evictable) and untracked frames are left alone.
        if state
            .node_store
            .get(&frame_id)
            .is_some_and(|node| node.is_evictable)
        {
            state.node_store.remove(&frame_id);
            state.evictable_set.remove(&frame_id);
            state.evictable_count -= 1;
        }
        Ok(())
    }

    fn size(&self) -> usize {
        self.state.lock().unwrap().evictable_count
    }
}

#[cfg(test)]
pub mod test {
    use std::sync::Arc;

    use super::{LruKReplacer, Replacer, ReplacerError};

    #[test]
    fn replacer_test() {
        let replacer = LruKReplacer::new(7, 2);

        // Add six frames to the replacer. Frames [1, 2, 3, 4, 5] are
        // evictable, frame 6 stays pinned.
        replacer.record_access(1).unwrap();
        replacer.record_access(2).unwrap();
        replacer.record_access(3).unwrap();
        replacer.record_access(4).unwrap();
        replacer.record_access(5).unwrap();
        replacer.record_access(6).unwrap();

        replacer.set_evictable(1, true);
        replacer.set_evictable(2, true);
        replacer.set_evictable(3, true);
        replacer.set_evictable(4, true);
        replacer.set_evictable(5, true);
        replacer.set_evictable(6, false);

        assert_eq!(5, replacer.size());

        // Record an access for frame 1. Frame 1 now has two accesses total,
        // so its backward k-distance is finite while every other frame still
        // sits at +infinity. Ties inside the infinite group go to the frame
        // with the oldest timestamp, so the eviction order is [2, 3, 4, 5, 1].
        replacer.record_access(1).unwrap();

        assert_eq!(Some(2), replacer.evict());
        assert_eq!(Some(3), replacer.evict());
        assert_eq!(Some(4), replacer.evict());
        assert_eq!(2, replacer.size());

        // Insert new frames [3, 4] and update the access history for 5.
        replacer.record_access(3).unwrap();
        replacer.record_access(4).unwrap();
        replacer.record_access(5).unwrap();
        replacer.record_access(4).unwrap();
        replacer.set_evictable(3, true);
        replacer.set_evictable(4, true);
        assert_eq!(4, replacer.size());

        // Frame 3 is the only frame with fewer than two accesses.
        assert_eq!(Some(3), replacer.evict());
        assert_eq!(3, replacer.size());

        // Pin frame 1; of [5, 4], frame 5 has the larger k-distance.
        replacer.set_evictable(1, false);
        assert_eq!(2, replacer.size());
        assert_eq!(Some(5), replacer.evict());
        assert_eq!(1, replacer.size());

        // Update the access history for frame 1 and unpin it.
        replacer.record_access(1).unwrap();
        replacer.record_access(1).unwrap();
        replacer.set_evictable(1, true);
        assert_eq!(2, replacer.size());

        assert_eq!(Some(4), replacer.evict());
        assert_eq!(1, replacer.size());
        assert_eq!(Some(1), replacer.evict());
        assert_eq!(0, replacer.size());

        // Insert frame 1 again, pinned. A failed eviction must not change
        // the size of the replacer.
        replacer.record_access(1).unwrap();
        replacer.set_evictable(1, false);
        assert_eq!(0, replacer.size());
        assert_eq!(None, replacer.evict());
        assert_eq!(0, replacer.size());

        replacer.set_evictable(1, true);
        assert_eq!(1, replacer.size());
        assert_eq!(Some(1), replacer.evict());
        assert_eq!(0, replacer.size());

        // Nothing left to evict.
        assert_eq!(None, replacer.evict());
        assert_eq!(0, replacer.size());

        // Frame 6 has been tracked since the start; unpinning it makes it the
        // only candidate again.
        replacer.set_evictable(6, false);
        replacer.set_evictable(6, true);
        assert_eq!(1, replacer.size());
        assert_eq!(Some(6), replacer.evict());
    }

    #[test]
    fn infinite_distance_beats_finite() {
        let replacer = LruKReplacer::new(5, 2);

        // Frame 1 reaches k accesses; frames 2 and 3 stay below k.
        replacer.record_access(1).unwrap();
        replacer.record_access(2).unwrap();
        replacer.record_access(3).unwrap();
        replacer.record_access(1).unwrap();

        replacer.set_evictable(1, true);
        replacer.set_evictable(2, true);
        replacer.set_evictable(3, true);

        // Both infinite-distance frames go first, LRU order among them.
        assert_eq!(Some(2), replacer.evict());
        assert_eq!(Some(3), replacer.evict());
        assert_eq!(Some(1), replacer.evict());
    }

    #[test]
    fn tie_break_prefers_oldest_access() {
        let replacer = LruKReplacer::new(5, 2);

        replacer.record_access(1).unwrap();
        replacer.record_access(2).unwrap();
        replacer.record_access(3).unwrap();

        replacer.set_evictable(1, true);
        replacer.set_evictable(2, true);
        replacer.set_evictable(3, true);

        // All three frames sit at +infinity; frame 1 was recorded first.
        assert_eq!(Some(1), replacer.evict());
    }

    #[test]
    fn never_accessed_frame_wins_ties() {
        let replacer = LruKReplacer::new(5, 2);

        replacer.record_access(1).unwrap();
        // Frame 2 is tracked through set_evictable alone, with no history.
        replacer.set_evictable(2, true);
        replacer.set_evictable(1, true);

        assert_eq!(Some(2), replacer.evict());
        assert_eq!(Some(1), replacer.evict());
    }

    #[test]
    fn frame_id_bounds() {
        let replacer = LruKReplacer::new(4, 2);

        assert_eq!(
            Err(ReplacerError::InvalidFrame {
                frame_id: 4,
                capacity: 4
            }),
            replacer.record_access(4)
        );
        assert!(replacer.record_access(3).is_ok());

        assert!(replacer.remove(4).is_err());
        assert!(replacer.remove(3).is_ok());
    }

    #[test]
    fn remove_skips_pinned_frames() {
        let replacer = LruKReplacer::new(5, 2);

        replacer.record_access(1).unwrap();
        replacer.record_access(2).unwrap();
        replacer.set_evictable(1, true);

        // Frame 2 is pinned and frame 3 unknown; both removals are no-ops.
        replacer.remove(2).unwrap();
        replacer.remove(3).unwrap();
        assert_eq!(1, replacer.size());
        replacer.set_evictable(2, true);
        assert_eq!(2, replacer.size());

        // An evictable frame is deleted outright, history included.
        replacer.remove(1).unwrap();
        assert_eq!(1, replacer.size());
        assert_eq!(Some(2), replacer.evict());
        assert_eq!(None, replacer.evict());
    }

    #[test]
    fn set_evictable_is_idempotent() {
        let replacer = LruKReplacer::new(5, 2);

        replacer.record_access(1).unwrap();
        replacer.set_evictable(1, true);
        assert_eq!(1, replacer.size());
        replacer.set_evictable(1, true);
        assert_eq!(1, replacer.size());

        replacer.set_evictable(1, false);
        replacer.set_evictable(1, false);
        assert_eq!(0, replacer.size());
    }

    #[test]
    fn concurrent_access_recording() {
        let replacer = Arc::new(LruKReplacer::new(8, 2));

        let handles: Vec<_> = (0..4u32)
            .map(|frame_id| {
                let replacer = Arc::clone(&replacer);
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        replacer.record_access(frame_id).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        for frame_id in 0..4 {
            replacer.set_evictable(frame_id, true);
        }
        assert_eq!(4, replacer.size());

        let mut evicted = Vec::new();
        while let Some(frame_id) = replacer.evict() {
            evicted.push(frame_id);
        }
        evicted.sort_unstable();
        assert_eq!(vec![0, 1, 2, 3], evicted);
        assert_eq!(0, replacer.size());
    }
}
