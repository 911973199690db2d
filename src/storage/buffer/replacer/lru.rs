use linked_hash_map::LinkedHashMap;

use crate::common::types::FrameId;

/// LRU (Least Recently Used) victim policy over unpinned frames.
///
/// The insertion-ordered map doubles as the recency list and the
/// frame-to-position index, so every operation is O(1). Frames enter at
/// the back on unpin and leave from the front as victims; re-unpinning a
/// tracked frame does not refresh its position.
pub struct LruReplacer {
    frames: LinkedHashMap<FrameId, ()>,
}

impl LruReplacer {
    pub fn new(pool_size: usize) -> Self {
        Self {
            frames: LinkedHashMap::with_capacity(pool_size),
        }
    }

    /// Remove and return the least-recently-unpinned frame, if any.
    pub fn victim(&mut self) -> Option<FrameId> {
        self.frames.pop_front().map(|(frame_id, ())| frame_id)
    }

    /// Stop tracking a frame because its page got pinned. Idempotent.
    pub fn pin(&mut self, frame_id: FrameId) {
        self.frames.remove(&frame_id);
    }

    /// Track a frame whose page's pin count dropped to zero. Idempotent:
    /// a frame already tracked keeps its position.
    pub fn unpin(&mut self, frame_id: FrameId) {
        if !self.frames.contains_key(&frame_id) {
            self.frames.insert(frame_id, ());
        }
    }

    /// Number of frames eligible for eviction.
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}
