use image::RgbaImage;

use crate::canvas::{copy_region, fill_region, Document, PixelRect, TRANSPARENT};
use crate::components::history::HistoryManager;
use crate::ops::brush::source_over;

/// Length of one marching-ants dash cycle.
pub const DASH_CYCLE: u32 = 16;

/// Pixels lifted out of the layer while a selection is being moved.
pub struct FloatingPixels {
    pub pixels: RgbaImage,
    /// Top-left in image space; may lie off-canvas while dragging.
    pub x: i64,
    pub y: i64,
    /// Where the pixels were lifted from.
    pub source: PixelRect,
    adjusted: bool,
}

impl FloatingPixels {
    /// On-canvas part of the floating buffer.
    /// Still sitting where it was lifted, with its pixels untouched.
    pub fn is_unchanged(&self) -> bool {
        !self.adjusted && self.x == self.source.x as i64 && self.y == self.source.y as i64
    }

    pub fn target_rect(&self, canvas_w: u32, canvas_h: u32) -> Option<PixelRect> {
        PixelRect::from_xywh_clamped(
            self.x,
            self.y,
            self.pixels.width() as i64,
            self.pixels.height() as i64,
            canvas_w,
            canvas_h,
        )
    }
}

/// Rectangular selection with an optional floating buffer.
#[derive(Default)]
pub struct Selection {
    rect: Option<PixelRect>,
    floating: Option<FloatingPixels>,
    pub dash_offset: u32,
}

impl Selection {
    pub fn rect(&self) -> Option<PixelRect> {
        self.rect
    }

    pub fn set_rect(&mut self, rect: PixelRect) {
        if rect.w >= 1 && rect.h >= 1 {
            self.rect = Some(rect);
        }
    }

    pub fn has_selection(&self) -> bool {
        self.rect.is_some()
    }

    pub fn is_floating(&self) -> bool {
        self.floating.is_some()
    }

    pub fn floating(&self) -> Option<&FloatingPixels> {
        self.floating.as_ref()
    }

    pub fn floating_origin(&self) -> Option<(i64, i64)> {
        self.floating.as_ref().map(|f| (f.x, f.y))
    }

    /// Swap in new floating pixels of the same size (e.g. an adjusted copy).
    pub fn replace_floating_pixels(&mut self, pixels: RgbaImage) -> bool {
        match self.floating.as_mut() {
            Some(f) if f.pixels.dimensions() == pixels.dimensions() => {
                f.pixels = pixels;
                f.adjusted = true;
                true
            }
            _ => false,
        }
    }

    /// Forget the selection geometry.  A floating buffer is left alone; it
    /// is owned by the move gesture that created it.
    pub fn clear_selection(&mut self) {
        if self.floating.is_none() {
            self.rect = None;
        }
    }

    /// Advance the marching ants.
    pub fn tick(&mut self) {
        self.dash_offset = (self.dash_offset + 1) % DASH_CYCLE;
    }

    /// Lift the selected pixels of the active layer into the floating buffer
    /// and clear them in the layer.  Opens a stroke snapshot that stays open
    /// until `drop_floating` or `cancel_floating`.
    pub fn pick_up(&mut self, doc: &mut Document, history: &mut HistoryManager) -> bool {
        if self.floating.is_some() {
            return false;
        }
        let Some(rect) = self.rect.and_then(|r| r.intersect(doc.bounds())) else {
            return false;
        };
        history.begin_stroke_snapshot(doc);
        let layer = doc.active_layer_mut();
        let pixels = copy_region(&layer.pixels, rect);
        fill_region(&mut layer.pixels, rect, TRANSPARENT);
        history.expand_pending_rect(rect);
        doc.mark_dirty(Some(rect));

        self.rect = Some(rect);
        self.floating = Some(FloatingPixels {
            pixels,
            x: rect.x as i64,
            y: rect.y as i64,
            source: rect,
            adjusted: false,
        });
        true
    }

    /// Reposition the floating buffer.  Layer pixels are untouched.
    pub fn move_to(&mut self, x: i64, y: i64, canvas_w: u32, canvas_h: u32) {
        let Some(floating) = self.floating.as_mut() else { return };
        floating.x = x;
        floating.y = y;
        self.rect = floating.target_rect(canvas_w, canvas_h);
    }

    /// Composite the floating buffer into the active layer at its current
    /// position and commit the move.  Returns the committed rect.  A buffer
    /// that never moved and was never adjusted is put back without a patch.
    pub fn drop_floating(&mut self, doc: &mut Document, history: &mut HistoryManager) -> Option<PixelRect> {
        if self.floating.as_ref().is_some_and(FloatingPixels::is_unchanged) {
            self.cancel_floating(doc, history);
            return None;
        }
        let floating = self.floating.take()?;
        if let Some(target) = floating.target_rect(doc.width, doc.height) {
            let layer = doc.active_layer_mut();
            for y in target.y..target.bottom() {
                for x in target.x..target.right() {
                    let sx = (x as i64 - floating.x) as u32;
                    let sy = (y as i64 - floating.y) as u32;
                    let src = *floating.pixels.get_pixel(sx, sy);
                    let dst = layer.pixels.get_pixel_mut(x, y);
                    *dst = source_over(*dst, src, 1.0);
                }
            }
            history.expand_pending_rect(target);
            doc.mark_dirty(Some(target));
        }
        self.rect = floating.target_rect(doc.width, doc.height);
        history.finish_stroke_to_history(doc, "Move Selection")
    }

    /// Put the lifted pixels back where they came from.
    pub fn cancel_floating(&mut self, doc: &mut Document, history: &mut HistoryManager) -> bool {
        let Some(floating) = self.floating.take() else {
            return false;
        };
        history.cancel_stroke(doc);
        self.rect = Some(floating.source);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    fn doc_with_square() -> Document {
        let mut doc = Document::new(20, 20);
        fill_region(&mut doc.active_layer_mut().pixels, PixelRect::new(2, 2, 4, 4), Rgba([200, 0, 0, 255]));
        doc
    }

    #[test]
    fn pick_up_clears_source_and_move_keeps_layer() {
        let mut doc = doc_with_square();
        let mut history = HistoryManager::default();
        let mut sel = Selection::default();
        sel.set_rect(PixelRect::new(2, 2, 4, 4));
        assert!(sel.pick_up(&mut doc, &mut history));
        assert_eq!(doc.active_layer().pixels.get_pixel(3, 3)[3], 0);

        let lifted = doc.active_layer().pixels.clone();
        sel.move_to(10, 10, 20, 20);
        assert_eq!(doc.active_layer().pixels, lifted, "moving must not touch layer pixels");
        assert_eq!(sel.rect(), Some(PixelRect::new(10, 10, 4, 4)));
    }

    #[test]
    fn drop_commits_union_of_old_and_new() {
        let mut doc = doc_with_square();
        let mut history = HistoryManager::default();
        let mut sel = Selection::default();
        sel.set_rect(PixelRect::new(2, 2, 4, 4));
        sel.pick_up(&mut doc, &mut history);
        sel.move_to(10, 10, 20, 20);
        let committed = sel.drop_floating(&mut doc, &mut history);
        assert_eq!(committed, Some(PixelRect::new(2, 2, 12, 12)));
        assert!(!sel.is_floating());
        assert_eq!(*doc.active_layer().pixels.get_pixel(11, 11), Rgba([200, 0, 0, 255]));
    }

    #[test]
    fn drop_partly_off_canvas_clips() {
        let mut doc = doc_with_square();
        let mut history = HistoryManager::default();
        let mut sel = Selection::default();
        sel.set_rect(PixelRect::new(2, 2, 4, 4));
        sel.pick_up(&mut doc, &mut history);
        sel.move_to(18, -2, 20, 20);
        sel.drop_floating(&mut doc, &mut history);
        assert_eq!(sel.rect(), Some(PixelRect::new(18, 0, 2, 2)));
        assert_eq!(*doc.active_layer().pixels.get_pixel(19, 1), Rgba([200, 0, 0, 255]));
    }

    #[test]
    fn cancel_puts_pixels_back() {
        let mut doc = doc_with_square();
        let original = doc.active_layer().pixels.clone();
        let mut history = HistoryManager::default();
        let mut sel = Selection::default();
        sel.set_rect(PixelRect::new(2, 2, 4, 4));
        sel.pick_up(&mut doc, &mut history);
        sel.move_to(9, 9, 20, 20);
        assert!(sel.cancel_floating(&mut doc, &mut history));
        assert_eq!(doc.active_layer().pixels, original);
        assert_eq!(sel.rect(), Some(PixelRect::new(2, 2, 4, 4)));
        assert!(!history.can_undo());
    }

    #[test]
    fn unmoved_drop_commits_nothing() {
        let mut doc = doc_with_square();
        let original = doc.active_layer().pixels.clone();
        let mut history = HistoryManager::default();
        let mut sel = Selection::default();
        sel.set_rect(PixelRect::new(2, 2, 4, 4));
        sel.pick_up(&mut doc, &mut history);
        sel.move_to(2, 2, 20, 20);
        assert_eq!(sel.drop_floating(&mut doc, &mut history), None);
        assert_eq!(doc.active_layer().pixels, original);
        assert!(!history.can_undo());
        assert!(!history.has_open_stroke());
        assert_eq!(sel.rect(), Some(PixelRect::new(2, 2, 4, 4)));
    }

    #[test]
    fn adjusted_drop_in_place_is_committed() {
        let mut doc = doc_with_square();
        let mut history = HistoryManager::default();
        let mut sel = Selection::default();
        sel.set_rect(PixelRect::new(2, 2, 4, 4));
        sel.pick_up(&mut doc, &mut history);
        assert!(sel.replace_floating_pixels(RgbaImage::from_pixel(4, 4, Rgba([0, 0, 200, 255]))));
        assert_eq!(sel.drop_floating(&mut doc, &mut history), Some(PixelRect::new(2, 2, 4, 4)));
        assert_eq!(*doc.active_layer().pixels.get_pixel(3, 3), Rgba([0, 0, 200, 255]));
        assert_eq!(history.undo_description().as_deref(), Some("Move Selection"));
    }

    #[test]
    fn ants_wrap_at_cycle() {
        let mut sel = Selection::default();
        for _ in 0..DASH_CYCLE + 3 {
            sel.tick();
        }
        assert_eq!(sel.dash_offset, 3);
    }
}
