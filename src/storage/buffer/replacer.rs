use std::collections::{HashMap, VecDeque};

use parking_lot::Mutex;

use crate::common::types::FrameId;

struct LruKNode {
    access_count: usize,
    is_evictable: bool,
}

struct ReplacerInner {
    nodes: HashMap<FrameId, LruKNode>,
    /// Frames with fewer than K accesses, ordered by first access
    history: VecDeque<FrameId>,
    /// Frames with at least K accesses, ordered by most recent access (oldest first)
    cache: VecDeque<FrameId>,
    /// Count of tracked frames whose evictable flag is set
    evictable: usize,
}

fn remove_from_list(list: &mut VecDeque<FrameId>, frame_id: FrameId) {
    if let Some(pos) = list.iter().position(|&f| f == frame_id) {
        list.remove(pos);
    }
}

/// LRU-K replacement policy.
///
/// Frames that have not yet reached K accesses have an infinite backward
/// K-distance and are always preferred for eviction, earliest-seen first.
/// Among frames with K or more accesses, victim selection is LRU on the
/// most recent access.
pub struct LruKReplacer {
    k: usize,
    inner: Mutex<ReplacerInner>,
}

impl LruKReplacer {
    pub fn new(num_frames: usize, k: usize) -> Self {
        assert!(k >= 1, "LRU-K needs k >= 1");
        Self {
            k,
            inner: Mutex::new(ReplacerInner {
                nodes: HashMap::with_capacity(num_frames),
                history: VecDeque::with_capacity(num_frames),
                cache: VecDeque::with_capacity(num_frames),
                evictable: 0,
            }),
        }
    }

    /// Record an access to a frame, promoting it to the cache list once it
    /// reaches K accesses and refreshing its position afterwards.
    pub fn record_access(&self, frame_id: FrameId) {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;

        match inner.nodes.get_mut(&frame_id) {
            None => {
                inner.nodes.insert(
                    frame_id,
                    LruKNode {
                        access_count: 1,
                        is_evictable: false,
                    },
                );
                inner.history.push_back(frame_id);
            }
            Some(node) => {
                node.access_count += 1;
                if node.access_count == self.k {
                    remove_from_list(&mut inner.history, frame_id);
                    inner.cache.push_back(frame_id);
                } else if node.access_count > self.k {
                    remove_from_list(&mut inner.cache, frame_id);
                    inner.cache.push_back(frame_id);
                }
            }
        }
    }

    /// Flip the evictable flag of a tracked frame. Untracked frames are
    /// ignored.
    pub fn set_evictable(&self, frame_id: FrameId, evictable: bool) {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        if let Some(node) = inner.nodes.get_mut(&frame_id) {
            let was = node.is_evictable;
            node.is_evictable = evictable;
            if was && !evictable {
                inner.evictable -= 1;
            } else if !was && evictable {
                inner.evictable += 1;
            }
        }
    }

    /// Pick and untrack a victim frame: the first evictable frame in the
    /// history list, falling back to the cache list.
    pub fn evict(&self) -> Option<FrameId> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;

        for list in [&mut inner.history, &mut inner.cache] {
            let found = list
                .iter()
                .position(|f| inner.nodes.get(f).is_some_and(|n| n.is_evictable));
            if let Some(pos) = found {
                let frame_id = list.remove(pos).unwrap();
                inner.nodes.remove(&frame_id);
                inner.evictable -= 1;
                return Some(frame_id);
            }
        }

        None
    }

    /// Untrack a frame regardless of its position.
    ///
    /// Panics if the frame is tracked but not evictable; callers must unpin
    /// before removing.
    pub fn remove(&self, frame_id: FrameId) {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        let Some(node) = inner.nodes.get(&frame_id) else {
            return;
        };
        assert!(
            node.is_evictable,
            "removing a non-evictable frame {} from the replacer",
            frame_id
        );

        if node.access_count >= self.k {
            remove_from_list(&mut inner.cache, frame_id);
        } else {
            remove_from_list(&mut inner.history, frame_id);
        }
        inner.nodes.remove(&frame_id);
        inner.evictable -= 1;
    }

    /// Number of tracked frames currently marked evictable.
    pub fn size(&self) -> usize {
        self.inner.lock().evictable
    }
}
