use image::RgbaImage;
use std::collections::VecDeque;

use crate::canvas::{copy_region, paste_region, union_opt, Document, LayerId, PixelRect};

// ============================================================================
// PIXEL PATCH - rectangular before/after record for one completed operation
// ============================================================================

/// Before/after pixels of one rectangle of one layer.  Immutable once built.
#[derive(Clone)]
pub struct PixelPatch {
    pub layer: LayerId,
    pub rect: PixelRect,
    pub before: RgbaImage,
    pub after: RgbaImage,
    pub description: String,
}

impl PixelPatch {
    pub fn new(layer: LayerId, rect: PixelRect, before: RgbaImage, after: RgbaImage, description: impl Into<String>) -> Self {
        Self {
            layer,
            rect,
            before,
            after,
            description: description.into(),
        }
    }

    /// Write `before` (undo) or `after` (redo) back into the document.
    /// Returns false if the layer no longer exists.
    fn apply(&self, doc: &mut Document, use_after: bool) -> bool {
        let Some(layer) = doc.layer_by_id_mut(self.layer) else {
            return false;
        };
        let src = if use_after { &self.after } else { &self.before };
        paste_region(&mut layer.pixels, self.rect, src);
        doc.mark_dirty(Some(self.rect));
        true
    }

    pub fn memory_size(&self) -> usize {
        self.before.as_raw().len() + self.after.as_raw().len() + self.description.len()
    }
}

// ============================================================================
// STROKE SNAPSHOT - full copy of the active layer for an open gesture
// ============================================================================

pub struct StrokeSnapshot {
    pub layer: LayerId,
    pub pixels: RgbaImage,
    /// Union of every region touched since the snapshot was taken.
    pub pending: Option<PixelRect>,
}

// ============================================================================
// HISTORY MANAGER - patch list with a cursor and memory limits
// ============================================================================

/// Undo/redo history.  `patches[..cursor]` are applied, `patches[cursor..]`
/// can be redone.  Any push discards the redo suffix.
pub struct HistoryManager {
    patches: VecDeque<PixelPatch>,
    cursor: usize,
    stroke: Option<StrokeSnapshot>,
    max_history_size: usize,
    /// Optional memory cap in bytes.
    max_memory_bytes: Option<usize>,
    /// Running memory total across all patches.
    total_memory: usize,
}

impl Default for HistoryManager {
    fn default() -> Self {
        Self::new(50)
    }
}

impl HistoryManager {
    pub fn new(max_history_size: usize) -> Self {
        Self {
            patches: VecDeque::new(),
            cursor: 0,
            stroke: None,
            max_history_size: max_history_size.max(1),
            max_memory_bytes: Some(100 * 1024 * 1024), // 100 MB default limit
            total_memory: 0,
        }
    }

    pub fn with_memory_limit(mut self, max_memory_bytes: Option<usize>) -> Self {
        self.max_memory_bytes = max_memory_bytes;
        self
    }

    pub fn set_limits(&mut self, max_history_size: usize, max_memory_bytes: Option<usize>) {
        self.max_history_size = max_history_size.max(1);
        self.max_memory_bytes = max_memory_bytes;
        self.prune();
    }

    // ------------------------------------------------------------------------
    // Stroke flow
    // ------------------------------------------------------------------------

    /// Snapshot the active layer and start a fresh pending rect.  An already
    /// open snapshot is cancelled first.
    pub fn begin_stroke_snapshot(&mut self, doc: &mut Document) {
        if self.stroke.is_some() {
            log_warn!("begin_stroke_snapshot: previous gesture still open, cancelling it");
            self.cancel_stroke(doc);
        }
        let layer = doc.active_layer();
        self.stroke = Some(StrokeSnapshot {
            layer: layer.id,
            pixels: layer.pixels.clone(),
            pending: None,
        });
    }

    pub fn has_open_stroke(&self) -> bool {
        self.stroke.is_some()
    }

    pub fn pending_rect(&self) -> Option<PixelRect> {
        self.stroke.as_ref().and_then(|s| s.pending)
    }

    /// Grow the pending rect.  Ignored when no snapshot is open.
    pub fn expand_pending_rect(&mut self, rect: PixelRect) {
        if let Some(stroke) = self.stroke.as_mut() {
            stroke.pending = Some(union_opt(stroke.pending, rect));
        }
    }

    /// Grow the pending rect by raw bounds, clamped to the canvas.  Regions
    /// that clamp to nothing are ignored.
    pub fn expand_pending_rect_by_rect(&mut self, x: f32, y: f32, w: f32, h: f32, canvas_w: u32, canvas_h: u32) {
        if let Some(rect) = PixelRect::from_bounds_clamped(x, y, x + w, y + h, canvas_w, canvas_h) {
            self.expand_pending_rect(rect);
        }
    }

    /// Close the open gesture.  Returns the committed rect, or `None` when
    /// nothing was touched (the snapshot is released either way).
    pub fn finish_stroke_to_history(&mut self, doc: &mut Document, description: &str) -> Option<PixelRect> {
        let stroke = self.stroke.take()?;
        let rect = stroke.pending?.intersect(doc.bounds())?;
        let Some(layer) = doc.layer_by_id(stroke.layer) else {
            log_warn!("finish_stroke_to_history: layer {} vanished during '{}'", stroke.layer, description);
            return None;
        };
        let before = copy_region(&stroke.pixels, rect);
        let after = copy_region(&layer.pixels, rect);
        self.push(PixelPatch::new(stroke.layer, rect, before, after, description));
        Some(rect)
    }

    /// Restore the pending region from the snapshot and drop the gesture.
    /// Returns true if a snapshot was open.
    pub fn cancel_stroke(&mut self, doc: &mut Document) -> bool {
        let Some(stroke) = self.stroke.take() else {
            return false;
        };
        if let Some(rect) = stroke.pending.and_then(|r| r.intersect(doc.bounds()))
            && let Some(layer) = doc.layer_by_id_mut(stroke.layer)
        {
            let restore = copy_region(&stroke.pixels, rect);
            paste_region(&mut layer.pixels, rect, &restore);
            doc.mark_dirty(Some(rect));
        }
        true
    }

    // ------------------------------------------------------------------------
    // Patch list
    // ------------------------------------------------------------------------

    pub fn push(&mut self, patch: PixelPatch) {
        // Branch on write: everything past the cursor is gone
        for dropped in self.patches.drain(self.cursor..) {
            self.total_memory = self.total_memory.saturating_sub(dropped.memory_size());
        }

        self.total_memory += patch.memory_size();
        self.patches.push_back(patch);
        self.cursor = self.patches.len();

        self.prune();
    }

    pub fn undo(&mut self, doc: &mut Document) -> Option<String> {
        if self.cursor == 0 {
            return None;
        }
        self.cursor -= 1;
        let patch = &self.patches[self.cursor];
        if !patch.apply(doc, false) {
            log_warn!("undo '{}': layer {} no longer exists, skipped", patch.description, patch.layer);
        }
        Some(patch.description.clone())
    }

    pub fn redo(&mut self, doc: &mut Document) -> Option<String> {
        let patch = self.patches.get(self.cursor)?;
        if !patch.apply(doc, true) {
            log_warn!("redo '{}': layer {} no longer exists, skipped", patch.description, patch.layer);
        }
        self.cursor += 1;
        Some(patch.description.clone())
    }

    pub fn can_undo(&self) -> bool {
        self.cursor > 0
    }

    pub fn can_redo(&self) -> bool {
        self.cursor < self.patches.len()
    }

    pub fn undo_description(&self) -> Option<String> {
        self.cursor.checked_sub(1).map(|i| self.patches[i].description.clone())
    }

    pub fn redo_description(&self) -> Option<String> {
        self.patches.get(self.cursor).map(|p| p.description.clone())
    }

    /// Get all undo descriptions (most recent first)
    pub fn undo_history(&self) -> Vec<String> {
        self.patches.iter().take(self.cursor).rev().map(|p| p.description.clone()).collect()
    }

    /// Rect of the patch `undo` would revert next.
    pub fn last_patch_rect(&self) -> Option<PixelRect> {
        self.cursor.checked_sub(1).map(|i| self.patches[i].rect)
    }

    pub fn undo_count(&self) -> usize {
        self.cursor
    }

    pub fn redo_count(&self) -> usize {
        self.patches.len() - self.cursor
    }

    /// Get the current memory usage of the history (O(1) via cached total)
    pub fn memory_usage(&self) -> usize {
        self.total_memory
    }

    /// Prune to stay within limits.  The oldest applied patches go first;
    /// once none are left the newest redo patches are dropped, so the
    /// remaining redo chain always starts at the current state.
    fn prune(&mut self) {
        let mut pruned = 0usize;
        while self.patches.len() > self.max_history_size {
            self.pop_one();
            pruned += 1;
        }

        if let Some(max_bytes) = self.max_memory_bytes {
            while self.total_memory > max_bytes && self.patches.len() > 1 {
                self.pop_one();
                pruned += 1;
            }
        }

        if pruned > 0 {
            log_info!("history: pruned {} oldest patch(es), {} bytes retained", pruned, self.total_memory);
        }
    }

    fn pop_one(&mut self) {
        let removed = if self.cursor > 0 {
            self.cursor -= 1;
            self.patches.pop_front()
        } else {
            self.patches.pop_back()
        };
        if let Some(removed) = removed {
            self.total_memory = self.total_memory.saturating_sub(removed.memory_size());
        }
    }

    pub fn clear(&mut self) {
        self.patches.clear();
        self.cursor = 0;
        self.stroke = None;
        self.total_memory = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    fn paint(doc: &mut Document, history: &mut HistoryManager, rect: PixelRect, color: Rgba<u8>, desc: &str) {
        history.begin_stroke_snapshot(doc);
        crate::canvas::fill_region(&mut doc.active_layer_mut().pixels, rect, color);
        history.expand_pending_rect(rect);
        history.finish_stroke_to_history(doc, desc);
    }

    #[test]
    fn undo_redo_restores_exact_bytes() {
        let mut doc = Document::new(16, 16);
        let mut history = HistoryManager::default();
        let original = doc.active_layer().pixels.clone();

        paint(&mut doc, &mut history, PixelRect::new(2, 3, 5, 4), Rgba([10, 20, 30, 255]), "Paint");
        let painted = doc.active_layer().pixels.clone();

        assert_eq!(history.undo(&mut doc).as_deref(), Some("Paint"));
        assert_eq!(doc.active_layer().pixels, original);
        assert_eq!(history.redo(&mut doc).as_deref(), Some("Paint"));
        assert_eq!(doc.active_layer().pixels, painted);
    }

    #[test]
    fn boundaries_are_no_ops() {
        let mut doc = Document::new(4, 4);
        let mut history = HistoryManager::default();
        assert_eq!(history.undo(&mut doc), None);
        assert_eq!(history.redo(&mut doc), None);
    }

    #[test]
    fn push_after_undo_discards_redo() {
        let mut doc = Document::new(8, 8);
        let mut history = HistoryManager::default();
        paint(&mut doc, &mut history, PixelRect::new(0, 0, 2, 2), Rgba([255, 0, 0, 255]), "A");
        paint(&mut doc, &mut history, PixelRect::new(2, 2, 2, 2), Rgba([0, 255, 0, 255]), "B");
        history.undo(&mut doc);
        paint(&mut doc, &mut history, PixelRect::new(4, 4, 2, 2), Rgba([0, 0, 255, 255]), "C");
        assert!(!history.can_redo());
        assert_eq!(history.redo(&mut doc), None);
        assert_eq!(history.undo_history(), vec!["C".to_string(), "A".to_string()]);
    }

    #[test]
    fn empty_stroke_commits_nothing() {
        let mut doc = Document::new(4, 4);
        let mut history = HistoryManager::default();
        history.begin_stroke_snapshot(&mut doc);
        assert_eq!(history.finish_stroke_to_history(&mut doc, "Nothing"), None);
        assert!(!history.has_open_stroke());
        assert!(!history.can_undo());
    }

    #[test]
    fn cancel_restores_pending_region() {
        let mut doc = Document::new(8, 8);
        let mut history = HistoryManager::default();
        let original = doc.active_layer().pixels.clone();
        history.begin_stroke_snapshot(&mut doc);
        let rect = PixelRect::new(1, 1, 3, 3);
        crate::canvas::fill_region(&mut doc.active_layer_mut().pixels, rect, Rgba([0, 0, 0, 255]));
        history.expand_pending_rect(rect);
        assert!(history.cancel_stroke(&mut doc));
        assert_eq!(doc.active_layer().pixels, original);
        assert!(!history.can_undo());
    }

    #[test]
    fn expand_by_rect_clamps_and_ignores_empty() {
        let mut doc = Document::new(10, 10);
        let mut history = HistoryManager::default();
        history.begin_stroke_snapshot(&mut doc);
        history.expand_pending_rect_by_rect(20.0, 20.0, 5.0, 5.0, 10, 10);
        assert_eq!(history.pending_rect(), None);
        history.expand_pending_rect_by_rect(-2.0, 8.5, 4.0, 4.0, 10, 10);
        assert_eq!(history.pending_rect(), Some(PixelRect::new(0, 8, 2, 2)));
    }

    #[test]
    fn patch_for_deleted_layer_is_skipped_but_cursor_moves() {
        let mut doc = Document::new(4, 4);
        let mut history = HistoryManager::default();
        doc.add_layer(None);
        paint(&mut doc, &mut history, PixelRect::new(0, 0, 1, 1), Rgba([1, 2, 3, 255]), "Dot");
        doc.delete_layer(1);
        assert_eq!(history.undo(&mut doc).as_deref(), Some("Dot"));
        assert!(history.can_redo());
        assert!(!history.can_undo());
    }

    #[test]
    fn count_limit_prunes_oldest() {
        let mut doc = Document::new(4, 4);
        let mut history = HistoryManager::new(2);
        for name in ["one", "two", "three"] {
            paint(&mut doc, &mut history, PixelRect::new(0, 0, 1, 1), Rgba([9, 9, 9, 255]), name);
        }
        assert_eq!(history.undo_count(), 2);
        assert_eq!(history.undo_history(), vec!["three".to_string(), "two".to_string()]);
    }

    #[test]
    fn shrinking_limits_keeps_redo_chain_consistent() {
        let mut doc = Document::new(4, 4);
        let mut history = HistoryManager::new(10);
        let dot = PixelRect::new(1, 1, 1, 1);
        let red = Rgba([255, 0, 0, 255]);
        paint(&mut doc, &mut history, dot, red, "A");
        paint(&mut doc, &mut history, dot, Rgba([0, 0, 255, 255]), "B");
        paint(&mut doc, &mut history, dot, Rgba([0, 255, 0, 255]), "C");
        for _ in 0..3 {
            history.undo(&mut doc);
        }

        history.set_limits(1, None);
        assert_eq!(history.undo_count(), 0);
        assert_eq!(history.redo_count(), 1);
        assert_eq!(history.redo(&mut doc).as_deref(), Some("A"));
        assert_eq!(*doc.active_layer().pixels.get_pixel(1, 1), red);
        assert_eq!(history.redo(&mut doc), None);
    }

    #[test]
    fn shrinking_limits_drops_applied_patches_first() {
        let mut doc = Document::new(4, 4);
        let mut history = HistoryManager::new(10);
        let dot = PixelRect::new(0, 0, 1, 1);
        for (name, v) in [("A", 10u8), ("B", 20), ("C", 30)] {
            paint(&mut doc, &mut history, dot, Rgba([v, v, v, 255]), name);
        }
        history.undo(&mut doc);

        history.set_limits(2, None);
        assert_eq!(history.undo_history(), vec!["B".to_string()]);
        assert_eq!(history.redo_description().as_deref(), Some("C"));
        assert_eq!(history.last_patch_rect(), Some(dot));
        history.undo(&mut doc);
        assert_eq!(*doc.active_layer().pixels.get_pixel(0, 0), Rgba([10, 10, 10, 255]));
    }
}
