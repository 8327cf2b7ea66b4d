use egui::{Modifiers, PointerButton, Pos2, Vec2};
use image::Rgba;

use crate::canvas::{Document, PixelRect};
use crate::components::history::{HistoryManager, PixelPatch};
use crate::components::selection::Selection;
use crate::ops::brush::{stroke_polyline, BrushParams, BrushSample, BrushStroke};
use crate::ops::curves::{polyline_bounds, CurveKind};
use crate::ops::fill::flood_fill;
use crate::settings::EngineSettings;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum ToolKind {
    #[default]
    Brush,
    Eraser,
    Fill,
    CatmullRom,
    BSpline,
    Nurbs,
    RectangleSelect,
}

impl ToolKind {
    pub fn all() -> &'static [ToolKind] {
        &[
            ToolKind::Brush,
            ToolKind::Eraser,
            ToolKind::Fill,
            ToolKind::CatmullRom,
            ToolKind::BSpline,
            ToolKind::Nurbs,
            ToolKind::RectangleSelect,
        ]
    }

    pub fn label(&self) -> &'static str {
        match self {
            ToolKind::Brush => "Brush",
            ToolKind::Eraser => "Eraser",
            ToolKind::Fill => "Fill",
            ToolKind::CatmullRom => "Catmull-Rom Curve",
            ToolKind::BSpline => "B-Spline Curve",
            ToolKind::Nurbs => "NURBS Curve",
            ToolKind::RectangleSelect => "Rectangle Select",
        }
    }
}

/// Pointer event delivered to a tool, already in image space.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ToolEvent {
    pub pos: Pos2,
    pub button: PointerButton,
    /// 1 for a single click, 2 for a double click
    pub click_count: u8,
    pub modifiers: Modifiers,
    pub pressure: Option<f32>,
    pub time_ms: u64,
}

impl ToolEvent {
    pub fn new(pos: Pos2, time_ms: u64) -> Self {
        Self {
            pos,
            button: PointerButton::Primary,
            click_count: 1,
            modifiers: Modifiers::NONE,
            pressure: None,
            time_ms,
        }
    }

    fn sample(&self) -> BrushSample {
        BrushSample {
            pos: self.pos,
            pressure: self.pressure,
            time_ms: self.time_ms,
        }
    }
}

// ============================================================================
// EDIT CONTEXT - everything a tool may touch during one event
// ============================================================================

pub struct EditContext<'a> {
    pub doc: &'a mut Document,
    pub history: &'a mut HistoryManager,
    pub selection: &'a mut Selection,
    pub settings: &'a EngineSettings,
    pub primary_color: Rgba<u8>,
    pub secondary_color: Rgba<u8>,
}

impl EditContext<'_> {
    pub fn begin_stroke_snapshot(&mut self) {
        self.history.begin_stroke_snapshot(self.doc);
    }

    /// Record `rect` as touched by the open gesture and stale in the composite.
    pub fn expand_pending_rect(&mut self, rect: PixelRect) {
        self.history.expand_pending_rect(rect);
        self.doc.mark_dirty(Some(rect));
    }

    pub fn expand_pending_rect_by_rect(&mut self, x: f32, y: f32, w: f32, h: f32) {
        if let Some(rect) = PixelRect::from_bounds_clamped(x, y, x + w, y + h, self.doc.width, self.doc.height) {
            self.expand_pending_rect(rect);
        }
    }

    pub fn finish_stroke_to_history(&mut self, description: &str) -> Option<PixelRect> {
        self.history.finish_stroke_to_history(self.doc, description)
    }

    pub fn cancel_stroke(&mut self) -> bool {
        self.history.cancel_stroke(self.doc)
    }

    /// Commit a patch produced outside the snapshot flow.
    pub fn push_patch(&mut self, patch: PixelPatch) {
        self.doc.mark_dirty(Some(patch.rect));
        self.history.push(patch);
    }

    pub fn clear_selection(&mut self) {
        self.selection.clear_selection();
    }

    pub fn point_in_rect(point: Pos2, rect: PixelRect) -> bool {
        rect.contains_point(point)
    }

    pub fn color_for(&self, button: PointerButton) -> Rgba<u8> {
        match button {
            PointerButton::Secondary => self.secondary_color,
            _ => self.primary_color,
        }
    }
}

// ============================================================================
// OVERLAY - image-space preview shapes for the host to draw
// ============================================================================

#[derive(Clone, Debug, PartialEq)]
pub enum OverlayShape {
    Polyline { points: Vec<Pos2>, width: f32 },
    ControlPoint(Pos2),
    /// Rubber band of a selection being dragged out
    Marquee(PixelRect),
    MarchingAnts { rect: PixelRect, dash_offset: u32 },
    /// Where the floating selection buffer is drawn (origin may be off-canvas)
    FloatingPixels { x: i64, y: i64, w: u32, h: u32 },
    BrushCursor { center: Pos2, radius: f32 },
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Overlay {
    pub shapes: Vec<OverlayShape>,
}

impl Overlay {
    pub fn push(&mut self, shape: OverlayShape) {
        self.shapes.push(shape);
    }

    pub fn is_empty(&self) -> bool {
        self.shapes.is_empty()
    }
}

// ============================================================================
// TOOL CONTRACT
// ============================================================================

pub trait Tool {
    fn on_pointer_down(&mut self, ctx: &mut EditContext, ev: &ToolEvent);
    fn on_pointer_move(&mut self, ctx: &mut EditContext, ev: &ToolEvent);
    fn on_pointer_up(&mut self, ctx: &mut EditContext, ev: &ToolEvent);
    fn draw_preview(&self, _overlay: &mut Overlay) {}
    /// Discard uncommitted gesture state.  Must leave the document as it was
    /// before the gesture began.
    fn cancel(&mut self, _ctx: &mut EditContext) {}
    fn on_enter(&mut self, _ctx: &mut EditContext) {}
}

/// The single active tool.  Each variant owns its gesture state.
pub enum ActiveTool {
    Brush(BrushTool),
    Fill(FillTool),
    Curve(CurveTool),
    Select(SelectTool),
}

impl ActiveTool {
    pub fn new(kind: ToolKind) -> Self {
        match kind {
            ToolKind::Brush => ActiveTool::Brush(BrushTool::new(false)),
            ToolKind::Eraser => ActiveTool::Brush(BrushTool::new(true)),
            ToolKind::Fill => ActiveTool::Fill(FillTool),
            ToolKind::CatmullRom => ActiveTool::Curve(CurveTool::new(CurveKind::CatmullRom)),
            ToolKind::BSpline => ActiveTool::Curve(CurveTool::new(CurveKind::BSpline)),
            ToolKind::Nurbs => ActiveTool::Curve(CurveTool::new(CurveKind::Nurbs)),
            ToolKind::RectangleSelect => ActiveTool::Select(SelectTool::default()),
        }
    }

    pub fn kind(&self) -> ToolKind {
        match self {
            ActiveTool::Brush(t) if t.eraser => ToolKind::Eraser,
            ActiveTool::Brush(_) => ToolKind::Brush,
            ActiveTool::Fill(_) => ToolKind::Fill,
            ActiveTool::Curve(t) => match t.kind {
                CurveKind::CatmullRom => ToolKind::CatmullRom,
                CurveKind::BSpline => ToolKind::BSpline,
                CurveKind::Nurbs => ToolKind::Nurbs,
            },
            ActiveTool::Select(_) => ToolKind::RectangleSelect,
        }
    }

    fn as_tool(&mut self) -> &mut dyn Tool {
        match self {
            ActiveTool::Brush(t) => t,
            ActiveTool::Fill(t) => t,
            ActiveTool::Curve(t) => t,
            ActiveTool::Select(t) => t,
        }
    }
}

impl Default for ActiveTool {
    fn default() -> Self {
        Self::new(ToolKind::default())
    }
}

impl Tool for ActiveTool {
    fn on_pointer_down(&mut self, ctx: &mut EditContext, ev: &ToolEvent) {
        self.as_tool().on_pointer_down(ctx, ev);
    }

    fn on_pointer_move(&mut self, ctx: &mut EditContext, ev: &ToolEvent) {
        self.as_tool().on_pointer_move(ctx, ev);
    }

    fn on_pointer_up(&mut self, ctx: &mut EditContext, ev: &ToolEvent) {
        self.as_tool().on_pointer_up(ctx, ev);
    }

    fn draw_preview(&self, overlay: &mut Overlay) {
        match self {
            ActiveTool::Brush(t) => t.draw_preview(overlay),
            ActiveTool::Fill(t) => t.draw_preview(overlay),
            ActiveTool::Curve(t) => t.draw_preview(overlay),
            ActiveTool::Select(t) => t.draw_preview(overlay),
        }
    }

    fn cancel(&mut self, ctx: &mut EditContext) {
        self.as_tool().cancel(ctx);
    }

    fn on_enter(&mut self, ctx: &mut EditContext) {
        self.as_tool().on_enter(ctx);
    }
}

// ============================================================================
// BRUSH / ERASER
// ============================================================================

pub struct BrushTool {
    eraser: bool,
    stroke: Option<BrushStroke>,
    cursor: Option<(Pos2, f32)>,
}

impl BrushTool {
    pub fn new(eraser: bool) -> Self {
        Self {
            eraser,
            stroke: None,
            cursor: None,
        }
    }

    pub fn is_stroking(&self) -> bool {
        self.stroke.is_some()
    }

    fn description(&self) -> &'static str {
        if self.eraser { "Eraser Stroke" } else { "Brush Stroke" }
    }
}

impl Tool for BrushTool {
    fn on_pointer_down(&mut self, ctx: &mut EditContext, ev: &ToolEvent) {
        if !matches!(ev.button, PointerButton::Primary | PointerButton::Secondary) {
            return;
        }
        if self.stroke.is_some() {
            self.cancel(ctx);
        }
        let params = BrushParams::from_settings(ctx.settings, ctx.color_for(ev.button), self.eraser);
        ctx.begin_stroke_snapshot();
        let (stroke, dirty) = BrushStroke::begin(params, ev.sample(), &mut ctx.doc.active_layer_mut().pixels);
        if let Some(rect) = dirty {
            ctx.expand_pending_rect(rect);
        }
        self.cursor = Some((ev.pos, stroke.radius()));
        self.stroke = Some(stroke);
    }

    fn on_pointer_move(&mut self, ctx: &mut EditContext, ev: &ToolEvent) {
        let Some(stroke) = self.stroke.as_mut() else {
            self.cursor = Some((ev.pos, ctx.settings.brush_radius));
            return;
        };
        if let Some(rect) = stroke.extend(ev.sample(), &mut ctx.doc.active_layer_mut().pixels) {
            ctx.expand_pending_rect(rect);
        }
        self.cursor = Some((ev.pos, stroke.radius()));
    }

    fn on_pointer_up(&mut self, ctx: &mut EditContext, ev: &ToolEvent) {
        let Some(stroke) = self.stroke.take() else { return };
        if let Some(rect) = stroke.finish(ev.sample(), &mut ctx.doc.active_layer_mut().pixels) {
            ctx.expand_pending_rect(rect);
        }
        ctx.finish_stroke_to_history(self.description());
    }

    fn draw_preview(&self, overlay: &mut Overlay) {
        if let Some((center, radius)) = self.cursor {
            overlay.push(OverlayShape::BrushCursor { center, radius });
        }
    }

    fn cancel(&mut self, ctx: &mut EditContext) {
        if self.stroke.take().is_some() {
            ctx.cancel_stroke();
        }
    }
}

// ============================================================================
// FILL
// ============================================================================

pub struct FillTool;

impl Tool for FillTool {
    fn on_pointer_down(&mut self, ctx: &mut EditContext, ev: &ToolEvent) {
        if !matches!(ev.button, PointerButton::Primary | PointerButton::Secondary) {
            return;
        }
        let color = ctx.color_for(ev.button);
        let tolerance = ctx.settings.fill_tolerance;
        let limit = ctx.selection.rect();
        let layer = ctx.doc.active_layer_mut();
        let layer_id = layer.id;
        let (x, y) = (ev.pos.x.floor() as i64, ev.pos.y.floor() as i64);
        if let Some(result) = flood_fill(&mut layer.pixels, x, y, color, tolerance, limit) {
            ctx.push_patch(PixelPatch::new(layer_id, result.rect, result.before, result.after, "Fill"));
        }
    }

    fn on_pointer_move(&mut self, _ctx: &mut EditContext, _ev: &ToolEvent) {}

    fn on_pointer_up(&mut self, _ctx: &mut EditContext, _ev: &ToolEvent) {}
}

// ============================================================================
// MULTI-CLICK CURVES
// ============================================================================

/// Weight given to NURBS points placed with shift held.
pub const HEAVY_POINT_WEIGHT: f32 = 3.0;

pub struct CurveTool {
    kind: CurveKind,
    points: Vec<Pos2>,
    weights: Vec<f32>,
    hover: Option<Pos2>,
    line_width: f32,
    samples_per_segment: usize,
}

impl CurveTool {
    pub fn new(kind: CurveKind) -> Self {
        Self {
            kind,
            points: Vec::new(),
            weights: Vec::new(),
            hover: None,
            line_width: 3.0,
            samples_per_segment: 16,
        }
    }

    pub fn points(&self) -> &[Pos2] {
        &self.points
    }

    /// Polyline for the points placed so far.
    pub fn evaluate(&self) -> Vec<Pos2> {
        self.kind.evaluate(&self.points, &self.weights, self.samples_per_segment)
    }

    fn reset(&mut self) {
        self.points.clear();
        self.weights.clear();
    }

    /// Stroke the curve into the active layer and commit it.  Too few points
    /// silently discards the curve.
    fn finalize(&mut self, ctx: &mut EditContext) {
        if self.points.len() < self.kind.min_points() {
            self.reset();
            return;
        }
        let polyline = self.evaluate();
        self.reset();
        if polyline.is_empty() {
            return;
        }

        let line_width = ctx.settings.line_width;
        let color = ctx.primary_color;
        let hardness = ctx.settings.hardness;
        ctx.begin_stroke_snapshot();
        let stamped = stroke_polyline(&mut ctx.doc.active_layer_mut().pixels, &polyline, line_width / 2.0, hardness, color);
        if let Some(rect) = polyline_bounds(&polyline, line_width, ctx.doc.width, ctx.doc.height) {
            ctx.expand_pending_rect(rect);
        }
        if let Some(rect) = stamped {
            ctx.expand_pending_rect(rect);
        }
        ctx.finish_stroke_to_history(self.kind.name());
    }
}

impl Tool for CurveTool {
    fn on_pointer_down(&mut self, ctx: &mut EditContext, ev: &ToolEvent) {
        if ev.button != PointerButton::Primary {
            return;
        }
        self.line_width = ctx.settings.line_width;
        self.samples_per_segment = ctx.settings.curve_samples_per_segment;
        if ev.click_count >= 2 {
            self.finalize(ctx);
            return;
        }
        self.points.push(ev.pos);
        self.weights.push(if ev.modifiers.shift { HEAVY_POINT_WEIGHT } else { 1.0 });
    }

    fn on_pointer_move(&mut self, _ctx: &mut EditContext, ev: &ToolEvent) {
        self.hover = Some(ev.pos);
    }

    fn on_pointer_up(&mut self, _ctx: &mut EditContext, _ev: &ToolEvent) {}

    fn draw_preview(&self, overlay: &mut Overlay) {
        for p in &self.points {
            overlay.push(OverlayShape::ControlPoint(*p));
        }
        if self.points.len() >= 2 {
            overlay.push(OverlayShape::Polyline {
                points: self.evaluate(),
                width: self.line_width,
            });
        }
        if let (Some(last), Some(hover)) = (self.points.last(), self.hover) {
            overlay.push(OverlayShape::Polyline {
                points: vec![*last, hover],
                width: 1.0,
            });
        }
    }

    fn cancel(&mut self, _ctx: &mut EditContext) {
        self.reset();
    }

    fn on_enter(&mut self, ctx: &mut EditContext) {
        self.finalize(ctx);
    }
}

// ============================================================================
// RECTANGLE SELECT / MOVE PIXELS
// ============================================================================

enum SelectDrag {
    Marquee { start: Pos2, current: Pos2 },
    Moving { grab_offset: Vec2 },
}

#[derive(Default)]
pub struct SelectTool {
    drag: Option<SelectDrag>,
}

impl SelectTool {
    pub fn is_moving(&self) -> bool {
        matches!(self.drag, Some(SelectDrag::Moving { .. }))
    }

    fn marquee_rect(start: Pos2, current: Pos2, canvas_w: u32, canvas_h: u32) -> Option<PixelRect> {
        let min = start.min(current);
        let max = start.max(current);
        let rect = PixelRect::from_bounds_clamped(min.x.floor(), min.y.floor(), max.x.floor(), max.y.floor(), canvas_w, canvas_h)?;
        (rect.w >= 1 && rect.h >= 1).then_some(rect)
    }
}

impl Tool for SelectTool {
    fn on_pointer_down(&mut self, ctx: &mut EditContext, ev: &ToolEvent) {
        if ev.button != PointerButton::Primary {
            return;
        }
        if let Some(rect) = ctx.selection.rect()
            && EditContext::point_in_rect(ev.pos, rect)
            && ctx.selection.pick_up(ctx.doc, ctx.history)
        {
            let (x, y) = ctx.selection.floating_origin().unwrap_or((rect.x as i64, rect.y as i64));
            self.drag = Some(SelectDrag::Moving {
                grab_offset: ev.pos - Pos2::new(x as f32, y as f32),
            });
            return;
        }
        self.drag = Some(SelectDrag::Marquee { start: ev.pos, current: ev.pos });
    }

    fn on_pointer_move(&mut self, ctx: &mut EditContext, ev: &ToolEvent) {
        match self.drag.as_mut() {
            Some(SelectDrag::Marquee { current, .. }) => *current = ev.pos,
            Some(SelectDrag::Moving { grab_offset }) => {
                let origin = ev.pos - *grab_offset;
                ctx.selection.move_to(origin.x.round() as i64, origin.y.round() as i64, ctx.doc.width, ctx.doc.height);
            }
            None => {}
        }
    }

    fn on_pointer_up(&mut self, ctx: &mut EditContext, ev: &ToolEvent) {
        match self.drag.take() {
            Some(SelectDrag::Marquee { start, .. }) => {
                match Self::marquee_rect(start, ev.pos, ctx.doc.width, ctx.doc.height) {
                    Some(rect) => ctx.selection.set_rect(rect),
                    // A click without a drag deselects
                    None => ctx.clear_selection(),
                }
            }
            Some(SelectDrag::Moving { grab_offset }) => {
                let origin = ev.pos - grab_offset;
                ctx.selection.move_to(origin.x.round() as i64, origin.y.round() as i64, ctx.doc.width, ctx.doc.height);
                ctx.selection.drop_floating(ctx.doc, ctx.history);
            }
            None => {}
        }
    }

    fn draw_preview(&self, overlay: &mut Overlay) {
        if let Some(SelectDrag::Marquee { start, current }) = self.drag {
            let min = start.min(current);
            let max = start.max(current);
            let rect = PixelRect::new(
                min.x.max(0.0).floor() as u32,
                min.y.max(0.0).floor() as u32,
                (max.x - min.x).max(0.0).floor() as u32,
                (max.y - min.y).max(0.0).floor() as u32,
            );
            overlay.push(OverlayShape::Marquee(rect));
        }
    }

    fn cancel(&mut self, ctx: &mut EditContext) {
        if let Some(SelectDrag::Moving { .. }) = self.drag.take() {
            ctx.selection.cancel_floating(ctx.doc, ctx.history);
        }
    }
}
