use egui::{Pos2, Rect, Vec2};

pub const MIN_ZOOM: f32 = 0.1;
pub const MAX_ZOOM: f32 = 32.0;

/// Image <-> screen mapping: `screen = image * zoom + pan`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Viewport {
    pub zoom: f32,
    /// Screen-space position of the image origin.
    pub pan_offset: Vec2,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            zoom: 1.0,
            pan_offset: Vec2::ZERO,
        }
    }
}

impl Viewport {
    pub fn new(zoom: f32, pan_offset: Vec2) -> Self {
        Self {
            zoom: clamp_zoom(zoom),
            pan_offset,
        }
    }

    pub fn image_to_screen(&self, p: Pos2) -> Pos2 {
        Pos2::new(p.x * self.zoom + self.pan_offset.x, p.y * self.zoom + self.pan_offset.y)
    }

    pub fn screen_to_image(&self, p: Pos2) -> Pos2 {
        Pos2::new((p.x - self.pan_offset.x) / self.zoom, (p.y - self.pan_offset.y) / self.zoom)
    }

    /// Screen rect covered by an image-space rect.
    pub fn image_rect_to_screen(&self, r: Rect) -> Rect {
        Rect::from_min_max(self.image_to_screen(r.min), self.image_to_screen(r.max))
    }

    pub fn set_zoom(&mut self, zoom: f32) {
        self.zoom = clamp_zoom(zoom);
    }

    /// Scale by `zoom_factor` keeping the image point under `anchor` fixed.
    pub fn zoom_at(&mut self, zoom_factor: f32, anchor: Pos2) {
        if !zoom_factor.is_finite() || zoom_factor <= 0.0 {
            return;
        }
        let image_anchor = self.screen_to_image(anchor);
        self.zoom = clamp_zoom(self.zoom * zoom_factor);
        // Solve anchor = image_anchor * zoom + pan for the new pan
        self.pan_offset = Vec2::new(
            anchor.x - image_anchor.x * self.zoom,
            anchor.y - image_anchor.y * self.zoom,
        );
    }

    /// Pan the viewport by a screen-space delta
    pub fn pan_by(&mut self, delta: Vec2) {
        self.pan_offset += delta;
    }

    /// Centre an image of the given size inside a screen rect at the current zoom.
    pub fn center_in(&mut self, image_w: u32, image_h: u32, screen: Rect) {
        let size = Vec2::new(image_w as f32 * self.zoom, image_h as f32 * self.zoom);
        self.pan_offset = screen.center().to_vec2() - size / 2.0;
    }
}

fn clamp_zoom(zoom: f32) -> f32 {
    if zoom.is_finite() { zoom.clamp(MIN_ZOOM, MAX_ZOOM) } else { 1.0 }
}
