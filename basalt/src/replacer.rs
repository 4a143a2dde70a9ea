use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use crate::FrameId;

/// Access history of one frame: the `k` most recent logical timestamps,
/// newest first.
struct LruKNode {
    history: VecDeque<u64>,
    is_evictable: bool,
}

impl LruKNode {
    fn new() -> Self {
        Self {
            history: VecDeque::new(),
            is_evictable: false,
        }
    }

    /// Oldest retained access. With a full history this is also the kth
    /// most recent access, so it orders frames by backward k-distance.
    fn earliest_timestamp(&self) -> u64 {
        *self.history.back().expect("history is never empty")
    }

    fn has_infinite_k_distance(&self, k: usize) -> bool {
        self.history.len() < k
    }
}

struct ReplacerInner {
    node_store: HashMap<FrameId, LruKNode>,
    current_timestamp: u64,
    evictable_count: usize,
}

/// LRU-K replacement policy over buffer pool frames.
///
/// Evicts the frame whose backward k-distance (now minus the timestamp of
/// the kth previous access) is largest; frames with fewer than k recorded
/// accesses have infinite distance and are preferred, oldest first. Time is
/// a logical counter, so ordering is exact and tests are deterministic.
pub struct LruKReplacer {
    inner: Mutex<ReplacerInner>,
    max_frames: usize,
    k: usize,
}

impl LruKReplacer {
    pub fn new(num_frames: usize, k: usize) -> Self {
        assert!(k > 0, "k must be positive");
        Self {
            inner: Mutex::new(ReplacerInner {
                node_store: HashMap::with_capacity(num_frames),
                current_timestamp: 0,
                evictable_count: 0,
            }),
            max_frames: num_frames,
            k,
        }
    }

    /// Records an access to `frame_id` at the current logical time,
    /// creating its history on first sight.
    pub fn record_access(&self, frame_id: FrameId) {
        assert!(frame_id < self.max_frames, "invalid frame id {frame_id}");
        let mut inner = self.inner.lock().unwrap();
        inner.current_timestamp += 1;
        let timestamp = inner.current_timestamp;

        let k = self.k;
        let node = inner.node_store.entry(frame_id).or_insert_with(LruKNode::new);
        if node.history.len() == k {
            node.history.pop_back();
        }
        node.history.push_front(timestamp);
    }

    pub fn set_evictable(&self, frame_id: FrameId, evictable: bool) {
        let mut inner = self.inner.lock().unwrap();
        let node = inner
            .node_store
            .get_mut(&frame_id)
            .unwrap_or_else(|| panic!("unknown frame id {frame_id}"));
        if node.is_evictable == evictable {
            return;
        }
        node.is_evictable = evictable;
        if evictable {
            inner.evictable_count += 1;
        } else {
            inner.evictable_count -= 1;
        }
    }

    /// Selects and removes a victim, or `None` when nothing is evictable.
    pub fn evict(&self) -> Option<FrameId> {
        let mut inner = self.inner.lock().unwrap();
        if inner.evictable_count == 0 {
            return None;
        }

        // Frames still short of k accesses have +inf backward k-distance
        // and are evicted first, classical-LRU style. Otherwise the largest
        // k-distance wins, which is the smallest kth-recent timestamp.
        let mut victim: Option<(FrameId, bool, u64)> = None;
        for (&frame_id, node) in &inner.node_store {
            if !node.is_evictable {
                continue;
            }
            let inf = node.has_infinite_k_distance(self.k);
            let earliest = node.earliest_timestamp();
            let better = match victim {
                None => true,
                Some((_, best_inf, best_earliest)) => {
                    (inf && !best_inf) || (inf == best_inf && earliest < best_earliest)
                }
            };
            if better {
                victim = Some((frame_id, inf, earliest));
            }
        }

        let (frame_id, _, _) = victim?;
        inner.node_store.remove(&frame_id);
        inner.evictable_count -= 1;
        Some(frame_id)
    }

    /// Drops a specific frame's history without running victim selection.
    /// The frame must currently be evictable.
    pub fn remove(&self, frame_id: FrameId) {
        let mut inner = self.inner.lock().unwrap();
        let Some(node) = inner.node_store.get(&frame_id) else {
            return;
        };
        assert!(node.is_evictable, "cannot remove a pinned frame");
        inner.node_store.remove(&frame_id);
        inner.evictable_count -= 1;
    }

    /// Number of evictable frames.
    pub fn size(&self) -> usize {
        self.inner.lock().unwrap().evictable_count
    }
}
