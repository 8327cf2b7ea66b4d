use egui::{Pos2, Rect};
use image::{Rgba, RgbaImage};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const TRANSPARENT: Rgba<u8> = Rgba([0, 0, 0, 0]);

// ============================================================================
// PIXEL RECT – integer region in image space
// ============================================================================

/// Integer pixel rectangle.  Every constructor that takes raw coordinates
/// clamps to the canvas and refuses to produce an empty rect.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PixelRect {
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
}

impl PixelRect {
    pub const fn new(x: u32, y: u32, w: u32, h: u32) -> Self {
        Self { x, y, w, h }
    }

    /// The whole canvas.
    pub const fn full(canvas_w: u32, canvas_h: u32) -> Self {
        Self::new(0, 0, canvas_w, canvas_h)
    }

    pub fn right(&self) -> u32 {
        self.x + self.w
    }

    pub fn bottom(&self) -> u32 {
        self.y + self.h
    }

    pub fn area(&self) -> u64 {
        self.w as u64 * self.h as u64
    }

    /// Build from float bounds (min inclusive, max exclusive).  Min is floored,
    /// max is ceiled, both are clamped to `[0, canvas]`.
    pub fn from_bounds_clamped(
        min_x: f32,
        min_y: f32,
        max_x: f32,
        max_y: f32,
        canvas_w: u32,
        canvas_h: u32,
    ) -> Option<Self> {
        if !(min_x.is_finite() && min_y.is_finite() && max_x.is_finite() && max_y.is_finite()) {
            return None;
        }
        let x0 = min_x.floor().clamp(0.0, canvas_w as f32) as u32;
        let y0 = min_y.floor().clamp(0.0, canvas_h as f32) as u32;
        let x1 = max_x.ceil().clamp(0.0, canvas_w as f32) as u32;
        let y1 = max_y.ceil().clamp(0.0, canvas_h as f32) as u32;
        if x1 <= x0 || y1 <= y0 {
            return None;
        }
        Some(Self::new(x0, y0, x1 - x0, y1 - y0))
    }

    /// Build from a signed origin + size (e.g. a selection dragged partly off
    /// canvas).
    pub fn from_xywh_clamped(x: i64, y: i64, w: i64, h: i64, canvas_w: u32, canvas_h: u32) -> Option<Self> {
        if w <= 0 || h <= 0 {
            return None;
        }
        let x0 = x.clamp(0, canvas_w as i64);
        let y0 = y.clamp(0, canvas_h as i64);
        let x1 = (x + w).clamp(0, canvas_w as i64);
        let y1 = (y + h).clamp(0, canvas_h as i64);
        if x1 <= x0 || y1 <= y0 {
            return None;
        }
        Some(Self::new(x0 as u32, y0 as u32, (x1 - x0) as u32, (y1 - y0) as u32))
    }

    pub fn union(self, other: Self) -> Self {
        let x0 = self.x.min(other.x);
        let y0 = self.y.min(other.y);
        let x1 = self.right().max(other.right());
        let y1 = self.bottom().max(other.bottom());
        Self::new(x0, y0, x1 - x0, y1 - y0)
    }

    pub fn intersect(self, other: Self) -> Option<Self> {
        let x0 = self.x.max(other.x);
        let y0 = self.y.max(other.y);
        let x1 = self.right().min(other.right());
        let y1 = self.bottom().min(other.bottom());
        if x1 <= x0 || y1 <= y0 {
            None
        } else {
            Some(Self::new(x0, y0, x1 - x0, y1 - y0))
        }
    }

    pub fn contains(&self, x: u32, y: u32) -> bool {
        x >= self.x && x < self.right() && y >= self.y && y < self.bottom()
    }

    /// Sub-pixel containment test in image space.
    pub fn contains_point(&self, p: Pos2) -> bool {
        p.x >= self.x as f32 && p.x < self.right() as f32 && p.y >= self.y as f32 && p.y < self.bottom() as f32
    }

    pub fn to_rect(&self) -> Rect {
        Rect::from_min_max(
            Pos2::new(self.x as f32, self.y as f32),
            Pos2::new(self.right() as f32, self.bottom() as f32),
        )
    }
}

/// Union helper for optional accumulators.
pub fn union_opt(acc: Option<PixelRect>, rect: PixelRect) -> PixelRect {
    match acc {
        Some(existing) => existing.union(rect),
        None => rect,
    }
}

/// Copy `rect` out of `img` into a tightly sized buffer.
pub fn copy_region(img: &RgbaImage, rect: PixelRect) -> RgbaImage {
    image::imageops::crop_imm(img, rect.x, rect.y, rect.w, rect.h).to_image()
}

/// Overwrite `img` at `rect`'s origin with `src` (no blending).
pub fn paste_region(img: &mut RgbaImage, rect: PixelRect, src: &RgbaImage) {
    image::imageops::replace(img, src, rect.x as i64, rect.y as i64);
}

/// Fill `rect` with `color` (no blending).
pub fn fill_region(img: &mut RgbaImage, rect: PixelRect, color: Rgba<u8>) {
    for y in rect.y..rect.bottom().min(img.height()) {
        for x in rect.x..rect.right().min(img.width()) {
            img.put_pixel(x, y, color);
        }
    }
}

// ============================================================================
// BLEND MODES
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BlendMode {
    #[default]
    Normal,
    Multiply,
    Screen,
    Overlay,
    Darken,
    Lighten,
    ColorDodge,
    ColorBurn,
    HardLight,
    SoftLight,
    Difference,
    Exclusion,
}

impl BlendMode {
    pub fn all() -> &'static [BlendMode] {
        &[
            BlendMode::Normal,
            BlendMode::Multiply,
            BlendMode::Screen,
            BlendMode::Overlay,
            BlendMode::Darken,
            BlendMode::Lighten,
            BlendMode::ColorDodge,
            BlendMode::ColorBurn,
            BlendMode::HardLight,
            BlendMode::SoftLight,
            BlendMode::Difference,
            BlendMode::Exclusion,
        ]
    }

    pub fn name(&self) -> &'static str {
        match self {
            BlendMode::Normal => "Normal",
            BlendMode::Multiply => "Multiply",
            BlendMode::Screen => "Screen",
            BlendMode::Overlay => "Overlay",
            BlendMode::Darken => "Darken",
            BlendMode::Lighten => "Lighten",
            BlendMode::ColorDodge => "Color Dodge",
            BlendMode::ColorBurn => "Color Burn",
            BlendMode::HardLight => "Hard Light",
            BlendMode::SoftLight => "Soft Light",
            BlendMode::Difference => "Difference",
            BlendMode::Exclusion => "Exclusion",
        }
    }

    /// Separable blend function on normalised channels.
    fn channel(&self, base: f32, top: f32) -> f32 {
        match self {
            BlendMode::Normal => top,
            BlendMode::Multiply => base * top,
            BlendMode::Screen => 1.0 - (1.0 - base) * (1.0 - top),
            BlendMode::Overlay => overlay_channel(base, top),
            BlendMode::Darken => base.min(top),
            BlendMode::Lighten => base.max(top),
            BlendMode::ColorDodge => {
                if base <= 0.0 {
                    0.0
                } else if top >= 1.0 {
                    1.0
                } else {
                    (base / (1.0 - top)).min(1.0)
                }
            }
            BlendMode::ColorBurn => {
                if base >= 1.0 {
                    1.0
                } else if top <= 0.0 {
                    0.0
                } else {
                    (1.0 - (1.0 - base) / top).max(0.0)
                }
            }
            BlendMode::HardLight => overlay_channel(top, base),
            BlendMode::SoftLight => soft_light_channel(base, top),
            BlendMode::Difference => (base - top).abs(),
            BlendMode::Exclusion => base + top - 2.0 * base * top,
        }
    }
}

fn overlay_channel(base: f32, top: f32) -> f32 {
    if base < 0.5 {
        2.0 * base * top
    } else {
        1.0 - 2.0 * (1.0 - base) * (1.0 - top)
    }
}

/// W3C Soft Light formula.
fn soft_light_channel(base: f32, top: f32) -> f32 {
    if top <= 0.5 {
        base - (1.0 - 2.0 * top) * base * (1.0 - base)
    } else {
        let d = if base <= 0.25 {
            ((16.0 * base - 12.0) * base + 4.0) * base
        } else {
            base.sqrt()
        };
        base + (2.0 * top - 1.0) * (d - base)
    }
}

/// Composite `top` over `base` with a blend mode and a layer opacity
/// (straight, non-premultiplied alpha).
pub fn blend_pixel(base: Rgba<u8>, top: Rgba<u8>, mode: BlendMode, opacity: f32) -> Rgba<u8> {
    if top[3] == 0 || opacity <= 0.0 {
        return base;
    }
    if mode == BlendMode::Normal && opacity >= 1.0 && top[3] == 255 {
        return top;
    }

    let opacity = opacity.clamp(0.0, 1.0);
    let base_a = base[3] as f32 / 255.0;
    let top_a = (top[3] as f32 / 255.0) * opacity;

    let out_a = top_a + base_a * (1.0 - top_a);
    if out_a <= 0.0 {
        return TRANSPARENT;
    }

    let mut out = [0u8; 4];
    for c in 0..3 {
        let b = base[c] as f32 / 255.0;
        let t = top[c] as f32 / 255.0;
        // Where the backdrop is transparent the blend degenerates to the source.
        let mixed = (1.0 - base_a) * t + base_a * mode.channel(b, t);
        let v = (mixed * top_a + b * base_a * (1.0 - top_a)) / out_a;
        out[c] = (v * 255.0).round().clamp(0.0, 255.0) as u8;
    }
    out[3] = (out_a * 255.0).round().clamp(0.0, 255.0) as u8;
    Rgba(out)
}

// ============================================================================
// LAYERS
// ============================================================================

/// Position-independent layer identity.  History patches refer to layers by
/// this id and resolve it to an index only when applied.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct LayerId(Uuid);

impl LayerId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for LayerId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for LayerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub struct Layer {
    pub id: LayerId,
    pub name: String,
    pub visible: bool,
    pub opacity: f32,
    pub blend_mode: BlendMode,
    /// Mask this layer by the alpha of the layer directly beneath it.
    pub clip_to_below: bool,
    pub pixels: RgbaImage,
}

impl Layer {
    pub fn new(name: String, width: u32, height: u32, fill_color: Rgba<u8>) -> Self {
        Self {
            id: LayerId::new(),
            name,
            visible: true,
            opacity: 1.0,
            blend_mode: BlendMode::Normal,
            clip_to_below: false,
            pixels: RgbaImage::from_pixel(width, height, fill_color),
        }
    }
}

// ============================================================================
// DOCUMENT
// ============================================================================

pub struct Document {
    pub layers: Vec<Layer>,
    pub active_layer_index: usize,
    pub width: u32,
    pub height: u32,
    /// Flattened view of all visible layers, refreshed by `refresh_composite`.
    flattened: RgbaImage,
    /// Region of `flattened` that is stale.
    pub dirty_rect: Option<PixelRect>,
    /// Monotonically increasing counter, bumped on each mark_dirty call
    pub dirty_generation: u64,
    next_layer_number: usize,
}

impl Document {
    /// New document with a single opaque white "Background" layer.
    pub fn new(width: u32, height: u32) -> Self {
        let width = width.max(1);
        let height = height.max(1);
        let white = Rgba([255, 255, 255, 255]);
        let background = Layer::new("Background".to_string(), width, height, white);
        let mut doc = Self {
            layers: vec![background],
            active_layer_index: 0,
            width,
            height,
            flattened: RgbaImage::new(width, height),
            dirty_rect: None,
            dirty_generation: 0,
            next_layer_number: 1,
        };
        doc.mark_dirty(None);
        doc.refresh_composite();
        doc
    }

    /// New document with a single fully transparent layer.
    pub fn new_transparent(width: u32, height: u32) -> Self {
        let mut doc = Self::new(width, height);
        doc.layers[0].pixels = RgbaImage::new(doc.width, doc.height);
        doc.mark_dirty(None);
        doc.refresh_composite();
        doc
    }

    pub fn bounds(&self) -> PixelRect {
        PixelRect::full(self.width, self.height)
    }

    pub fn active_layer(&self) -> &Layer {
        &self.layers[self.active_layer_index]
    }

    pub fn active_layer_mut(&mut self) -> &mut Layer {
        &mut self.layers[self.active_layer_index]
    }

    pub fn active_layer_id(&self) -> LayerId {
        self.active_layer().id
    }

    pub fn layer_index(&self, id: LayerId) -> Option<usize> {
        self.layers.iter().position(|l| l.id == id)
    }

    pub fn layer_by_id(&self, id: LayerId) -> Option<&Layer> {
        self.layers.iter().find(|l| l.id == id)
    }

    pub fn layer_by_id_mut(&mut self, id: LayerId) -> Option<&mut Layer> {
        self.layers.iter_mut().find(|l| l.id == id)
    }

    /// Record that `rect` of the flattened view is stale (`None` = everything).
    pub fn mark_dirty(&mut self, rect: Option<PixelRect>) {
        let new_rect = rect.unwrap_or_else(|| self.bounds());
        // Merge with any existing dirty rect so we never lose pending updates
        self.dirty_rect = Some(union_opt(self.dirty_rect, new_rect));
        self.dirty_generation = self.dirty_generation.wrapping_add(1);
    }

    /// Re-flatten the stale region, if any.  Returns the refreshed rect.
    pub fn refresh_composite(&mut self) -> Option<PixelRect> {
        let rect = self.dirty_rect.take()?.intersect(self.bounds())?;
        let mut flat = std::mem::replace(&mut self.flattened, RgbaImage::new(0, 0));
        if flat.width() != self.width || flat.height() != self.height {
            flat = RgbaImage::new(self.width, self.height);
        }
        self.composite_region(rect, &mut flat);
        self.flattened = flat;
        Some(rect)
    }

    /// The flattened view as of the last `refresh_composite`.
    pub fn flattened(&self) -> &RgbaImage {
        &self.flattened
    }

    /// A freshly computed full composite (ignores the cache).
    pub fn composite(&self) -> RgbaImage {
        let mut out = RgbaImage::new(self.width, self.height);
        self.composite_region(self.bounds(), &mut out);
        out
    }

    /// Flatten the layer stack into `out` for `rect` only.  `out` must be
    /// canvas-sized.  Rows are processed in parallel.
    pub fn composite_region(&self, rect: PixelRect, out: &mut RgbaImage) {
        let Some(rect) = rect.intersect(self.bounds()) else { return };
        let stride = self.width as usize * 4;
        let layers = &self.layers;
        let (x0, x1) = (rect.x, rect.right());

        out.par_chunks_mut(stride)
            .enumerate()
            .skip(rect.y as usize)
            .take(rect.h as usize)
            .for_each(|(y, row)| {
                let y = y as u32;
                for x in x0..x1 {
                    let mut acc = TRANSPARENT;
                    for (li, layer) in layers.iter().enumerate() {
                        if !layer.visible || layer.opacity <= 0.0 {
                            continue;
                        }
                        let mut top = *layer.pixels.get_pixel(x, y);
                        if layer.clip_to_below && li > 0 {
                            // Alpha intersection with the layer directly beneath
                            let below_a = layers[li - 1].pixels.get_pixel(x, y)[3] as u32;
                            top[3] = ((top[3] as u32 * below_a + 127) / 255) as u8;
                        }
                        acc = blend_pixel(acc, top, layer.blend_mode, layer.opacity);
                    }
                    let off = x as usize * 4;
                    row[off..off + 4].copy_from_slice(&acc.0);
                }
            });
    }

    // ------------------------------------------------------------------------
    // Layer structure
    // ------------------------------------------------------------------------

    /// Insert a transparent layer above the active one and make it active.
    pub fn add_layer(&mut self, name: Option<String>) -> LayerId {
        let name = name.unwrap_or_else(|| {
            let n = self.next_layer_number;
            format!("Layer {}", n)
        });
        self.next_layer_number += 1;
        let layer = Layer::new(name, self.width, self.height, TRANSPARENT);
        let id = layer.id;
        let insert_at = (self.active_layer_index + 1).min(self.layers.len());
        self.layers.insert(insert_at, layer);
        self.active_layer_index = insert_at;
        self.mark_dirty(None);
        id
    }

    /// Copy a layer (pixels and properties, fresh id) directly above it.
    pub fn duplicate_layer(&mut self, index: usize) -> Option<LayerId> {
        let src = self.layers.get(index)?;
        let layer = Layer {
            id: LayerId::new(),
            name: format!("{} copy", src.name),
            visible: src.visible,
            opacity: src.opacity,
            blend_mode: src.blend_mode,
            clip_to_below: src.clip_to_below,
            pixels: src.pixels.clone(),
        };
        let id = layer.id;
        self.layers.insert(index + 1, layer);
        self.active_layer_index = index + 1;
        self.mark_dirty(None);
        Some(id)
    }

    /// Remove a layer.  Refuses to remove the last remaining one.
    pub fn delete_layer(&mut self, index: usize) -> bool {
        if self.layers.len() <= 1 || index >= self.layers.len() {
            return false;
        }
        self.layers.remove(index);
        if index < self.active_layer_index {
            self.active_layer_index -= 1;
        }
        self.active_layer_index = self.active_layer_index.min(self.layers.len() - 1);
        self.mark_dirty(None);
        true
    }

    /// Move a layer to a new position.  The active layer keeps its identity.
    pub fn move_layer(&mut self, from: usize, to: usize) -> bool {
        let len = self.layers.len();
        if from >= len || to >= len || from == to {
            return false;
        }
        let active_id = self.active_layer_id();
        let layer = self.layers.remove(from);
        self.layers.insert(to, layer);
        self.active_layer_index = self.layer_index(active_id).unwrap_or(0);
        self.mark_dirty(None);
        true
    }

    pub fn rename_layer(&mut self, index: usize, name: String) -> bool {
        match self.layers.get_mut(index) {
            Some(layer) => {
                layer.name = name;
                true
            }
            None => false,
        }
    }

    pub fn set_active_layer(&mut self, index: usize) -> bool {
        if index < self.layers.len() {
            self.active_layer_index = index;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rect_clamps_to_canvas_and_rejects_empty() {
        let r = PixelRect::from_bounds_clamped(-3.2, 2.5, 12.1, 4.0, 10, 10);
        assert_eq!(r, Some(PixelRect::new(0, 2, 10, 2)));
        assert_eq!(PixelRect::from_bounds_clamped(11.0, 0.0, 20.0, 5.0, 10, 10), None);
        assert_eq!(PixelRect::from_xywh_clamped(8, 8, 5, 5, 10, 10), Some(PixelRect::new(8, 8, 2, 2)));
        assert_eq!(PixelRect::from_xywh_clamped(2, 2, 0, 4, 10, 10), None);
    }

    #[test]
    fn union_and_intersect() {
        let a = PixelRect::new(2, 2, 4, 4);
        let b = PixelRect::new(10, 10, 4, 4);
        assert_eq!(a.union(b), PixelRect::new(2, 2, 12, 12));
        assert_eq!(a.intersect(b), None);
        assert_eq!(a.intersect(PixelRect::new(4, 4, 10, 10)), Some(PixelRect::new(4, 4, 2, 2)));
    }

    #[test]
    fn normal_blend_over_transparent_keeps_source() {
        let px = blend_pixel(TRANSPARENT, Rgba([200, 10, 30, 128]), BlendMode::Normal, 1.0);
        assert_eq!(px, Rgba([200, 10, 30, 128]));
    }

    #[test]
    fn multiply_on_opaque_backdrop() {
        let px = blend_pixel(Rgba([255, 128, 0, 255]), Rgba([128, 255, 255, 255]), BlendMode::Multiply, 1.0);
        assert_eq!(px, Rgba([128, 128, 0, 255]));
    }

    #[test]
    fn composite_skips_hidden_and_applies_opacity() {
        let mut doc = Document::new(4, 4);
        doc.add_layer(None);
        doc.active_layer_mut().pixels = RgbaImage::from_pixel(4, 4, Rgba([0, 0, 0, 255]));
        doc.layers[1].opacity = 0.5;
        let flat = doc.composite();
        let px = flat.get_pixel(1, 1);
        assert!((126..=129).contains(&px[0]), "half black over white should be mid grey, got {:?}", px);

        doc.layers[1].visible = false;
        assert_eq!(*doc.composite().get_pixel(1, 1), Rgba([255, 255, 255, 255]));
    }

    #[test]
    fn clip_to_below_masks_by_lower_alpha() {
        let mut doc = Document::new_transparent(4, 1);
        // Bottom layer: only pixel 0 is opaque
        doc.layers[0].pixels.put_pixel(0, 0, Rgba([0, 0, 255, 255]));
        doc.add_layer(None);
        doc.active_layer_mut().pixels = RgbaImage::from_pixel(4, 1, Rgba([255, 0, 0, 255]));
        doc.active_layer_mut().clip_to_below = true;
        let flat = doc.composite();
        assert_eq!(*flat.get_pixel(0, 0), Rgba([255, 0, 0, 255]));
        assert_eq!(flat.get_pixel(2, 0)[3], 0, "clipped layer must not show outside the layer below");
    }

    #[test]
    fn refresh_composite_updates_only_dirty_region() {
        let mut doc = Document::new(8, 8);
        doc.active_layer_mut().pixels.put_pixel(1, 1, Rgba([0, 0, 0, 255]));
        doc.active_layer_mut().pixels.put_pixel(6, 6, Rgba([0, 0, 0, 255]));
        doc.mark_dirty(Some(PixelRect::new(0, 0, 2, 2)));
        assert_eq!(doc.refresh_composite(), Some(PixelRect::new(0, 0, 2, 2)));
        assert_eq!(*doc.flattened().get_pixel(1, 1), Rgba([0, 0, 0, 255]));
        assert_eq!(*doc.flattened().get_pixel(6, 6), Rgba([255, 255, 255, 255]));
    }

    #[test]
    fn layer_moves_keep_active_identity() {
        let mut doc = Document::new(2, 2);
        let a = doc.add_layer(None);
        let b = doc.add_layer(None);
        assert_eq!(doc.active_layer_id(), b);
        assert!(doc.move_layer(2, 0));
        assert_eq!(doc.active_layer_id(), b);
        assert_eq!(doc.layer_index(a), Some(2));
        assert!(doc.delete_layer(0));
        assert!(doc.delete_layer(0));
        assert!(!doc.delete_layer(0), "the last layer must never be removed");
        assert_eq!(doc.active_layer_index, 0);
    }
}
