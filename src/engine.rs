//! The editing engine: owns the document, history, selection and active
//! tool, and is the only thing the host talks to.
//!
//! Every call is synchronous.  Calls that change pixels or layer state
//! re-flatten the stale region of the composite before returning and raise
//! the repaint flag, which the host drains with [`Engine::take_repaint_request`].

use egui::{Color32, Key, Pos2};
use image::{Rgba, RgbaImage};

use crate::canvas::{copy_region, paste_region, BlendMode, Document, Layer, LayerId, PixelRect, TRANSPARENT};
use crate::components::history::{HistoryManager, PixelPatch};
use crate::components::input::{InputDispatcher, PointerEvent};
use crate::components::selection::{FloatingPixels, Selection};
use crate::components::tools::{ActiveTool, EditContext, Overlay, OverlayShape, Tool, ToolKind};
use crate::io::{EngineError, FlatSnapshot};
use crate::ops::adjustments::ColorAdjust;
use crate::ops::brush::source_over;
use crate::settings::EngineSettings;
use crate::viewport::Viewport;

/// Disjoint mutable views of the engine used to route one event.
struct Parts<'a> {
    ctx: EditContext<'a>,
    tool: &'a mut ActiveTool,
    input: &'a mut InputDispatcher,
    viewport: &'a mut Viewport,
}

pub struct Engine {
    document: Document,
    history: HistoryManager,
    selection: Selection,
    settings: EngineSettings,
    viewport: Viewport,
    input: InputDispatcher,
    tool: ActiveTool,
    primary_color: Color32,
    secondary_color: Color32,
    repaint_requested: bool,
}

fn to_rgba(c: Color32) -> Rgba<u8> {
    Rgba(c.to_srgba_unmultiplied())
}

impl Engine {
    pub fn new(width: u32, height: u32) -> Self {
        Self::with_settings(width, height, EngineSettings::default())
    }

    pub fn with_settings(width: u32, height: u32, settings: EngineSettings) -> Self {
        let history = HistoryManager::new(settings.max_history_steps).with_memory_limit(settings.history_memory_limit());
        let input = InputDispatcher::new(settings.double_click_ms, settings.double_click_distance);
        log_info!("engine: new {}x{} document", width, height);
        Self {
            document: Document::new(width, height),
            history,
            selection: Selection::default(),
            primary_color: settings.primary_color,
            secondary_color: settings.secondary_color,
            settings,
            viewport: Viewport::default(),
            input,
            tool: ActiveTool::default(),
            repaint_requested: true,
        }
    }

    fn parts(&mut self) -> Parts<'_> {
        Parts {
            ctx: EditContext {
                doc: &mut self.document,
                history: &mut self.history,
                selection: &mut self.selection,
                settings: &self.settings,
                primary_color: to_rgba(self.primary_color),
                secondary_color: to_rgba(self.secondary_color),
            },
            tool: &mut self.tool,
            input: &mut self.input,
            viewport: &mut self.viewport,
        }
    }

    /// Re-flatten whatever went stale and ask the host to repaint.
    fn after_edit(&mut self) {
        self.document.refresh_composite();
        self.repaint_requested = true;
    }

    /// Abandon whatever gesture the active tool has open.
    fn cancel_gesture(&mut self) {
        let Parts { mut ctx, tool, .. } = self.parts();
        tool.cancel(&mut ctx);
    }

    // ------------------------------------------------------------------------
    // Read access
    // ------------------------------------------------------------------------

    pub fn document(&self) -> &Document {
        &self.document
    }

    pub fn history(&self) -> &HistoryManager {
        &self.history
    }

    pub fn selection(&self) -> &Selection {
        &self.selection
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn viewport(&self) -> &Viewport {
        &self.viewport
    }

    pub fn viewport_mut(&mut self) -> &mut Viewport {
        self.repaint_requested = true;
        &mut self.viewport
    }

    pub fn tool_kind(&self) -> ToolKind {
        self.tool.kind()
    }

    /// Flattened composite of all visible layers (floating pixels excluded).
    pub fn composite(&self) -> &RgbaImage {
        self.document.flattened()
    }

    /// Pixels currently being moved, drawn by the host above the composite.
    pub fn floating_pixels(&self) -> Option<&FloatingPixels> {
        self.selection.floating()
    }

    /// Everything the host should draw on top of the composite this frame.
    pub fn overlay(&self) -> Overlay {
        let mut overlay = Overlay::default();
        self.tool.draw_preview(&mut overlay);
        if let Some(rect) = self.selection.rect() {
            overlay.push(OverlayShape::MarchingAnts {
                rect,
                dash_offset: self.selection.dash_offset,
            });
        }
        if let Some(f) = self.selection.floating() {
            overlay.push(OverlayShape::FloatingPixels {
                x: f.x,
                y: f.y,
                w: f.pixels.width(),
                h: f.pixels.height(),
            });
        }
        overlay
    }

    // ------------------------------------------------------------------------
    // Settings, colours, tools
    // ------------------------------------------------------------------------

    pub fn set_settings(&mut self, settings: EngineSettings) {
        self.history.set_limits(settings.max_history_steps, settings.history_memory_limit());
        self.input.set_double_click(settings.double_click_ms, settings.double_click_distance);
        self.settings = settings;
    }

    pub fn primary_color(&self) -> Color32 {
        self.primary_color
    }

    pub fn secondary_color(&self) -> Color32 {
        self.secondary_color
    }

    pub fn set_primary_color(&mut self, color: Color32) {
        self.primary_color = color;
    }

    pub fn set_secondary_color(&mut self, color: Color32) {
        self.secondary_color = color;
    }

    pub fn swap_colors(&mut self) {
        std::mem::swap(&mut self.primary_color, &mut self.secondary_color);
    }

    /// Switch tools.  The outgoing tool is cancelled first.
    pub fn set_tool(&mut self, kind: ToolKind) {
        if self.tool.kind() == kind {
            return;
        }
        let Parts { mut ctx, tool, input, .. } = self.parts();
        input.switch_tool(kind, tool, &mut ctx);
        self.after_edit();
    }

    // ------------------------------------------------------------------------
    // Input
    // ------------------------------------------------------------------------

    pub fn pointer_down(&mut self, ev: PointerEvent) {
        let Parts { mut ctx, tool, input, viewport } = self.parts();
        input.pointer_down(&ev, viewport, tool, &mut ctx);
        self.after_edit();
    }

    pub fn pointer_move(&mut self, ev: PointerEvent) {
        let Parts { mut ctx, tool, input, viewport } = self.parts();
        input.pointer_move(&ev, viewport, tool, &mut ctx);
        self.after_edit();
    }

    pub fn pointer_up(&mut self, ev: PointerEvent) {
        let Parts { mut ctx, tool, input, viewport } = self.parts();
        input.pointer_up(&ev, viewport, tool, &mut ctx);
        self.after_edit();
    }

    /// Returns true if the key was consumed.
    pub fn key_down(&mut self, key: Key) -> bool {
        let Parts { mut ctx, tool, input, .. } = self.parts();
        let consumed = input.key_down(key, tool, &mut ctx);
        self.after_edit();
        consumed
    }

    pub fn key_up(&mut self, key: Key) -> bool {
        self.input.key_up(key)
    }

    pub fn scroll(&mut self, scroll: f32, anchor: Pos2) {
        self.input.scroll(scroll, anchor, &mut self.viewport);
        self.repaint_requested = true;
    }

    // ------------------------------------------------------------------------
    // Scheduling
    // ------------------------------------------------------------------------

    /// Animation tick: advances the marching ants while a selection exists.
    pub fn tick(&mut self) {
        if self.selection.has_selection() {
            self.selection.tick();
            self.repaint_requested = true;
        }
    }

    pub fn take_repaint_request(&mut self) -> bool {
        std::mem::take(&mut self.repaint_requested)
    }

    // ------------------------------------------------------------------------
    // History
    // ------------------------------------------------------------------------

    pub fn undo(&mut self) -> Option<String> {
        self.cancel_gesture();
        let result = self.history.undo(&mut self.document);
        match &result {
            Some(desc) => {
                log_info!("undo: {}", desc);
            }
            None => {
                log_info!("undo: nothing to undo");
            }
        }
        self.after_edit();
        result
    }

    pub fn redo(&mut self) -> Option<String> {
        self.cancel_gesture();
        let result = self.history.redo(&mut self.document);
        match &result {
            Some(desc) => {
                log_info!("redo: {}", desc);
            }
            None => {
                log_info!("redo: nothing to redo");
            }
        }
        self.after_edit();
        result
    }

    // ------------------------------------------------------------------------
    // Whole-layer edits
    // ------------------------------------------------------------------------

    /// Clear the active layer to transparent as one undoable step.
    pub fn clear_canvas(&mut self) -> bool {
        self.cancel_gesture();
        let rect = self.document.bounds();
        let layer = self.document.active_layer_mut();
        if layer.pixels.pixels().all(|p| p[3] == 0) {
            return false;
        }
        let id = layer.id;
        let before = copy_region(&layer.pixels, rect);
        let after = RgbaImage::from_pixel(rect.w, rect.h, TRANSPARENT);
        paste_region(&mut layer.pixels, rect, &after);
        self.parts().ctx.push_patch(PixelPatch::new(id, rect, before, after, "Clear Canvas"));
        self.after_edit();
        true
    }

    /// Adjusted copy of what `apply_adjustment` would change: the floating
    /// pixels, else the selection region, else the whole active layer.
    pub fn preview_adjustment(&self, adjust: &ColorAdjust) -> RgbaImage {
        if let Some(f) = self.selection.floating() {
            return adjust.preview(&f.pixels);
        }
        let rect = self.adjust_target();
        adjust.preview(&copy_region(&self.document.active_layer().pixels, rect))
    }

    fn adjust_target(&self) -> PixelRect {
        self.selection
            .rect()
            .and_then(|r| r.intersect(self.document.bounds()))
            .unwrap_or_else(|| self.document.bounds())
    }

    /// Apply a colour adjustment.  A floating buffer is replaced wholesale;
    /// otherwise the selection (or whole layer) is committed as one patch.
    pub fn apply_adjustment(&mut self, adjust: &ColorAdjust) -> bool {
        if adjust.is_identity() {
            return false;
        }
        if let Some(f) = self.selection.floating() {
            let adjusted = adjust.preview(&f.pixels);
            let replaced = self.selection.replace_floating_pixels(adjusted);
            self.repaint_requested = true;
            return replaced;
        }

        self.cancel_gesture();
        let rect = self.adjust_target();
        let layer = self.document.active_layer_mut();
        let id = layer.id;
        let before = copy_region(&layer.pixels, rect);
        let after = adjust.preview(&before);
        if after == before {
            return false;
        }
        paste_region(&mut layer.pixels, rect, &after);
        self.parts().ctx.push_patch(PixelPatch::new(id, rect, before, after, "Color Adjust"));
        self.after_edit();
        true
    }

    /// Composite a pre-rasterised block (e.g. rendered text) onto the active
    /// layer at `(x, y)` and commit it as one step.
    pub fn commit_external_raster(&mut self, raster: &RgbaImage, x: i64, y: i64, description: &str) -> Option<PixelRect> {
        self.cancel_gesture();
        let target = PixelRect::from_xywh_clamped(
            x,
            y,
            raster.width() as i64,
            raster.height() as i64,
            self.document.width,
            self.document.height,
        )?;

        let mut parts = self.parts();
        let ctx = &mut parts.ctx;
        ctx.begin_stroke_snapshot();
        let layer = ctx.doc.active_layer_mut();
        for ty in target.y..target.bottom() {
            for tx in target.x..target.right() {
                let src = *raster.get_pixel((tx as i64 - x) as u32, (ty as i64 - y) as u32);
                let dst = layer.pixels.get_pixel_mut(tx, ty);
                *dst = source_over(*dst, src, 1.0);
            }
        }
        ctx.expand_pending_rect(target);
        let committed = ctx.finish_stroke_to_history(description);
        self.after_edit();
        committed
    }

    // ------------------------------------------------------------------------
    // Persistence collaborator
    // ------------------------------------------------------------------------

    /// Replace the document with a blank one.  History, selection and any
    /// open gesture are discarded.
    pub fn init_document(&mut self, width: u32, height: u32) {
        self.cancel_gesture();
        self.document = Document::new(width, height);
        self.history.clear();
        self.selection = Selection::default();
        self.tool = ActiveTool::new(self.tool.kind());
        log_info!("engine: init document {}x{}", self.document.width, self.document.height);
        self.after_edit();
    }

    /// Draw decoded pixels into the active layer.  Not recorded in history.
    pub fn restore_from_snapshot(&mut self, snapshot: &FlatSnapshot) -> Result<(), EngineError> {
        if snapshot.width != self.document.width || snapshot.height != self.document.height {
            log_err!(
                "restore: snapshot is {}x{}, document is {}x{}",
                snapshot.width,
                snapshot.height,
                self.document.width,
                self.document.height
            );
            return Err(EngineError::InvalidSnapshot(format!(
                "snapshot is {}x{} but the document is {}x{}",
                snapshot.width, snapshot.height, self.document.width, self.document.height
            )));
        }
        let img = snapshot.to_image()?;
        self.cancel_gesture();
        let rect = self.document.bounds();
        paste_region(&mut self.document.active_layer_mut().pixels, rect, &img);
        self.document.mark_dirty(None);
        log_info!("restore: {}x{} snapshot drawn into active layer", snapshot.width, snapshot.height);
        self.after_edit();
        Ok(())
    }

    pub fn flattened_snapshot(&mut self) -> FlatSnapshot {
        self.document.refresh_composite();
        FlatSnapshot::from_image(self.document.flattened())
    }

    // ------------------------------------------------------------------------
    // Layer management
    // ------------------------------------------------------------------------

    pub fn add_layer(&mut self, name: Option<String>) -> LayerId {
        self.cancel_gesture();
        let id = self.document.add_layer(name);
        log_info!("layer: added {} at {}", id, self.document.active_layer_index);
        self.after_edit();
        id
    }

    pub fn duplicate_layer(&mut self, index: usize) -> Option<LayerId> {
        self.cancel_gesture();
        let id = self.document.duplicate_layer(index);
        self.after_edit();
        id
    }

    /// Refuses to delete the last layer.
    pub fn delete_layer(&mut self, index: usize) -> bool {
        self.cancel_gesture();
        let deleted = self.document.delete_layer(index);
        if deleted {
            log_info!("layer: deleted index {}", index);
        } else {
            log_warn!("layer: refused to delete index {} ({} layer(s))", index, self.document.layers.len());
        }
        self.after_edit();
        deleted
    }

    pub fn move_layer(&mut self, from: usize, to: usize) -> bool {
        self.cancel_gesture();
        let moved = self.document.move_layer(from, to);
        self.after_edit();
        moved
    }

    pub fn rename_layer(&mut self, index: usize, name: String) -> bool {
        let renamed = self.document.rename_layer(index, name);
        self.repaint_requested = true;
        renamed
    }

    pub fn set_active_layer(&mut self, index: usize) -> bool {
        if index == self.document.active_layer_index {
            return index < self.document.layers.len();
        }
        self.cancel_gesture();
        let changed = self.document.set_active_layer(index);
        self.repaint_requested = true;
        changed
    }

    fn update_layer(&mut self, index: usize, f: impl FnOnce(&mut Layer)) -> bool {
        let Some(layer) = self.document.layers.get_mut(index) else {
            return false;
        };
        f(layer);
        self.document.mark_dirty(None);
        self.after_edit();
        true
    }

    pub fn set_layer_visible(&mut self, index: usize, visible: bool) -> bool {
        self.update_layer(index, |l| l.visible = visible)
    }

    pub fn set_layer_opacity(&mut self, index: usize, opacity: f32) -> bool {
        let opacity = if opacity.is_finite() { opacity.clamp(0.0, 1.0) } else { 1.0 };
        self.update_layer(index, |l| l.opacity = opacity)
    }

    pub fn set_layer_blend_mode(&mut self, index: usize, mode: BlendMode) -> bool {
        self.update_layer(index, |l| l.blend_mode = mode)
    }

    pub fn set_layer_clip(&mut self, index: usize, clip_to_below: bool) -> bool {
        self.update_layer(index, |l| l.clip_to_below = clip_to_below)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn press(engine: &mut Engine, x: f32, y: f32, t: u64) {
        engine.pointer_down(PointerEvent::new(Pos2::new(x, y), t));
    }

    fn release(engine: &mut Engine, x: f32, y: f32, t: u64) {
        engine.pointer_up(PointerEvent::new(Pos2::new(x, y), t));
    }

    #[test]
    fn switching_tools_cancels_open_stroke() {
        let mut engine = Engine::new(32, 32);
        let original = engine.document().active_layer().pixels.clone();
        press(&mut engine, 5.0, 5.0, 0);
        engine.set_tool(ToolKind::Fill);
        assert_eq!(engine.document().active_layer().pixels, original);
        assert!(!engine.history().can_undo());
        assert_eq!(engine.tool_kind(), ToolKind::Fill);
    }

    #[test]
    fn escape_cancels_and_enter_commits_curve() {
        let mut engine = Engine::new(40, 40);
        engine.set_tool(ToolKind::Nurbs);
        for (i, x) in [5.0, 20.0, 35.0].into_iter().enumerate() {
            let t = i as u64 * 1000;
            press(&mut engine, x, 20.0, t);
            release(&mut engine, x, 20.0, t + 10);
        }
        assert!(engine.key_down(Key::Escape));
        assert!(engine.key_down(Key::Enter));
        assert!(!engine.history().can_undo());

        press(&mut engine, 5.0, 20.0, 10_000);
        press(&mut engine, 35.0, 20.0, 11_000);
        engine.key_down(Key::Enter);
        assert_eq!(engine.history().undo_description().as_deref(), Some("NURBS Curve"));
    }

    #[test]
    fn clear_canvas_is_undoable() {
        let mut engine = Engine::new(8, 8);
        let original = engine.document().active_layer().pixels.clone();
        assert!(engine.clear_canvas());
        assert!(!engine.clear_canvas(), "already clear");
        assert_eq!(engine.composite().get_pixel(3, 3)[3], 0);
        assert_eq!(engine.undo().as_deref(), Some("Clear Canvas"));
        assert_eq!(engine.document().active_layer().pixels, original);
        assert_eq!(*engine.composite().get_pixel(3, 3), Rgba([255, 255, 255, 255]));
    }

    #[test]
    fn adjustment_over_selection_only() {
        let mut engine = Engine::new(10, 10);
        engine.set_tool(ToolKind::RectangleSelect);
        press(&mut engine, 2.0, 2.0, 0);
        release(&mut engine, 5.0, 5.0, 50);
        assert_eq!(engine.selection().rect(), Some(PixelRect::new(2, 2, 3, 3)));
        assert!(engine.apply_adjustment(&ColorAdjust { invert: true, ..Default::default() }));
        let layer = &engine.document().active_layer().pixels;
        assert_eq!(*layer.get_pixel(3, 3), Rgba([0, 0, 0, 255]));
        assert_eq!(*layer.get_pixel(7, 7), Rgba([255, 255, 255, 255]));
        assert_eq!(engine.history().undo_description().as_deref(), Some("Color Adjust"));
    }

    #[test]
    fn external_raster_commits_one_patch() {
        let mut engine = Engine::new(10, 10);
        let text = RgbaImage::from_pixel(4, 2, Rgba([0, 0, 255, 255]));
        let rect = engine.commit_external_raster(&text, 8, 1, "Text");
        assert_eq!(rect, Some(PixelRect::new(8, 1, 2, 2)));
        assert_eq!(*engine.composite().get_pixel(9, 2), Rgba([0, 0, 255, 255]));
        assert!(engine.commit_external_raster(&text, 20, 20, "Text").is_none());
        assert_eq!(engine.history().undo_count(), 1);
    }

    #[test]
    fn last_layer_cannot_be_deleted() {
        let mut engine = Engine::new(4, 4);
        assert!(!engine.delete_layer(0));
        engine.add_layer(None);
        assert!(engine.delete_layer(1));
        assert_eq!(engine.document().layers.len(), 1);
    }

    #[test]
    fn layer_property_changes_recomposite() {
        let mut engine = Engine::new(4, 4);
        engine.add_layer(None);
        engine.commit_external_raster(&RgbaImage::from_pixel(4, 4, Rgba([0, 0, 0, 255])), 0, 0, "Paste");
        assert_eq!(*engine.composite().get_pixel(0, 0), Rgba([0, 0, 0, 255]));
        engine.set_layer_visible(1, false);
        assert_eq!(*engine.composite().get_pixel(0, 0), Rgba([255, 255, 255, 255]));
        engine.set_layer_visible(1, true);
        engine.set_layer_blend_mode(1, BlendMode::Screen);
        assert_eq!(*engine.composite().get_pixel(0, 0), Rgba([255, 255, 255, 255]));
    }

    #[test]
    fn snapshot_restore_checks_dimensions() {
        let mut engine = Engine::new(6, 6);
        let snap = engine.flattened_snapshot();
        let mut other = Engine::new(5, 5);
        assert!(matches!(other.restore_from_snapshot(&snap), Err(EngineError::InvalidSnapshot(_))));
        other.init_document(6, 6);
        assert!(other.restore_from_snapshot(&snap).is_ok());
        assert_eq!(other.flattened_snapshot(), snap);
    }

    #[test]
    fn tick_only_animates_with_selection() {
        let mut engine = Engine::new(8, 8);
        engine.take_repaint_request();
        engine.tick();
        assert!(!engine.take_repaint_request());
        engine.set_tool(ToolKind::RectangleSelect);
        press(&mut engine, 1.0, 1.0, 0);
        release(&mut engine, 4.0, 4.0, 10);
        engine.take_repaint_request();
        engine.tick();
        assert!(engine.take_repaint_request());
        assert_eq!(engine.selection().dash_offset, 1);
    }
}
