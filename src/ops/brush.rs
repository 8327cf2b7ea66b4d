// ============================================================================
// BRUSH STROKES - smoothed, speed/pressure adaptive circle stamping
// ============================================================================
//
// A stroke is a chain of circular stamps.  Raw pointer samples are smoothed
// with an exponential moving average, the radius follows pressure (or the
// inverse of pointer speed when no pressure is reported) and stamps are laid
// at a fixed spacing along the smoothed path.
// ============================================================================

use egui::Pos2;
use image::{Rgba, RgbaImage};

use crate::canvas::{union_opt, PixelRect};
use crate::settings::EngineSettings;

/// Exponent applied to tablet pressure before scaling the radius.
pub const PRESSURE_EXPONENT: f32 = 0.7;
/// Fraction of the distance to the target radius covered per sample.
const RADIUS_EASING: f32 = 0.5;
/// Smallest allowed distance between two stamps.
const MIN_STEP: f32 = 0.5;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BrushParams {
    pub base_radius: f32,
    pub smoothing_alpha: f32,
    pub spacing_ratio: f32,
    pub min_width_scale: f32,
    pub max_width_scale: f32,
    /// Speed (image px per ms) mapped halfway between min and max width
    pub speed_half_width: f32,
    pub hardness: f32,
    pub color: Rgba<u8>,
    /// Stamps remove alpha instead of depositing colour
    pub eraser: bool,
}

impl BrushParams {
    pub fn from_settings(settings: &EngineSettings, color: Rgba<u8>, eraser: bool) -> Self {
        Self {
            base_radius: settings.brush_radius,
            smoothing_alpha: settings.smoothing_alpha,
            spacing_ratio: settings.spacing_ratio,
            min_width_scale: settings.min_width_scale,
            max_width_scale: settings.max_width_scale,
            speed_half_width: settings.speed_half_width,
            hardness: settings.hardness,
            color,
            eraser,
        }
    }

    /// Radius for a tablet pressure reading.
    pub fn pressure_radius(&self, pressure: f32) -> f32 {
        self.base_radius * pressure.clamp(0.0, 1.0).powf(PRESSURE_EXPONENT)
    }

    /// Radius for a pointer speed: slow strokes are wide, fast ones thin.
    pub fn speed_radius(&self, speed: f32) -> f32 {
        let speed = if speed.is_finite() { speed.max(0.0) } else { 0.0 };
        let half = self.speed_half_width.max(f32::EPSILON);
        let span = self.max_width_scale - self.min_width_scale;
        let scale = self.max_width_scale - span * (speed / (speed + half));
        self.base_radius * scale.clamp(self.min_width_scale, self.max_width_scale)
    }

    /// Radius used when neither pressure nor speed is known yet.
    pub fn default_radius(&self) -> f32 {
        self.base_radius * self.max_width_scale
    }

    fn step_for(&self, radius: f32) -> f32 {
        (radius * self.spacing_ratio).max(MIN_STEP)
    }
}

/// One pointer sample in image space.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BrushSample {
    pub pos: Pos2,
    pub pressure: Option<f32>,
    pub time_ms: u64,
}

/// Per-stroke state.  Created on pointer-down, consumed on pointer-up.
#[derive(Clone, Debug)]
pub struct BrushStroke {
    params: BrushParams,
    last_raw: Pos2,
    last_time_ms: u64,
    smoothed: Pos2,
    last_stamp: Pos2,
    radius: f32,
    stamps: usize,
}

impl BrushStroke {
    /// Start a stroke and lay the first stamp at the raw position.
    pub fn begin(params: BrushParams, sample: BrushSample, img: &mut RgbaImage) -> (Self, Option<PixelRect>) {
        let radius = match sample.pressure {
            Some(p) => params.pressure_radius(p),
            None => params.default_radius(),
        };
        let mut stroke = Self {
            params,
            last_raw: sample.pos,
            last_time_ms: sample.time_ms,
            smoothed: sample.pos,
            last_stamp: sample.pos,
            radius,
            stamps: 0,
        };
        let dirty = stroke.stamp(img, sample.pos);
        (stroke, dirty)
    }

    pub fn radius(&self) -> f32 {
        self.radius
    }

    pub fn smoothed(&self) -> Pos2 {
        self.smoothed
    }

    pub fn stamp_count(&self) -> usize {
        self.stamps
    }

    /// Feed a move sample.  Returns the union of every stamp laid.
    pub fn extend(&mut self, sample: BrushSample, img: &mut RgbaImage) -> Option<PixelRect> {
        self.absorb(sample);

        let step = self.params.step_for(self.radius);
        let mut dirty = None;
        loop {
            let delta = self.smoothed - self.last_stamp;
            let dist = delta.length();
            if dist < step || !dist.is_finite() {
                break;
            }
            // Partial distance past the last full step stays for the next sample
            self.last_stamp += delta / dist * step;
            if let Some(r) = self.stamp(img, self.last_stamp) {
                dirty = Some(union_opt(dirty, r));
            }
        }
        dirty
    }

    /// Feed the pointer-up sample and close the gap to the final position.
    pub fn finish(mut self, sample: BrushSample, img: &mut RgbaImage) -> Option<PixelRect> {
        self.absorb(sample);

        let gap = (self.smoothed - self.last_stamp).length();
        if gap <= 0.0 || !gap.is_finite() {
            return None;
        }
        let step = self.params.step_for(self.radius);
        let steps = (gap / step).ceil().max(1.0) as usize;
        let from = self.last_stamp;
        let to = self.smoothed;
        let mut dirty = None;
        for i in 1..=steps {
            let p = from.lerp(to, i as f32 / steps as f32);
            if let Some(r) = self.stamp(img, p) {
                dirty = Some(union_opt(dirty, r));
            }
        }
        self.last_stamp = to;
        dirty
    }

    fn absorb(&mut self, sample: BrushSample) {
        let alpha = self.params.smoothing_alpha.clamp(0.0, 1.0);
        self.smoothed = self.smoothed.lerp(sample.pos, alpha);

        let target = match sample.pressure {
            Some(p) => self.params.pressure_radius(p),
            None => {
                let dt = sample.time_ms.saturating_sub(self.last_time_ms).max(1) as f32;
                let speed = (sample.pos - self.last_raw).length() / dt;
                self.params.speed_radius(speed)
            }
        };
        self.radius += (target - self.radius) * RADIUS_EASING;

        self.last_raw = sample.pos;
        self.last_time_ms = sample.time_ms;
    }

    fn stamp(&mut self, img: &mut RgbaImage, center: Pos2) -> Option<PixelRect> {
        self.stamps += 1;
        stamp_circle(img, center, self.radius, self.params.hardness, self.params.color, self.params.eraser)
    }
}

// ============================================================================
// STAMPING PRIMITIVES
// ============================================================================

/// Bounding square of a stamp: radius plus one pixel of padding, clamped.
pub fn stamp_bounds(center: Pos2, radius: f32, canvas_w: u32, canvas_h: u32) -> Option<PixelRect> {
    let pad = radius + 1.0;
    PixelRect::from_bounds_clamped(center.x - pad, center.y - pad, center.x + pad, center.y + pad, canvas_w, canvas_h)
}

/// Coverage of a pixel whose centre lies `dist` from the stamp centre.
/// The edge is anti-aliased over half a pixel outside the nominal radius
/// and feathered inward as hardness drops.
pub fn stamp_coverage(dist: f32, radius: f32, hardness: f32) -> f32 {
    let outer = radius + 0.5;
    if dist >= outer {
        return 0.0;
    }
    let hardness = (0.02 + hardness.clamp(0.0, 1.0) * 0.98).min(0.99);
    let fade = (radius * (1.0 - hardness)).max(1.0).min(outer);
    let solid = outer - fade;
    if dist <= solid {
        return 1.0;
    }
    let x = 1.0 - ((dist - solid) / fade).clamp(0.0, 1.0);
    x * x * (3.0 - 2.0 * x)
}

/// Lay one anti-aliased circle.  Returns the stamp's bounding square, or
/// `None` if it lies entirely off-canvas.
pub fn stamp_circle(
    img: &mut RgbaImage,
    center: Pos2,
    radius: f32,
    hardness: f32,
    color: Rgba<u8>,
    eraser: bool,
) -> Option<PixelRect> {
    if !(radius.is_finite() && center.x.is_finite() && center.y.is_finite()) || radius <= 0.0 {
        return None;
    }
    let rect = stamp_bounds(center, radius, img.width(), img.height())?;
    let strength = color[3] as f32 / 255.0;

    for y in rect.y..rect.bottom() {
        for x in rect.x..rect.right() {
            let dx = x as f32 + 0.5 - center.x;
            let dy = y as f32 + 0.5 - center.y;
            let coverage = stamp_coverage((dx * dx + dy * dy).sqrt(), radius, hardness);
            if coverage <= 0.0 {
                continue;
            }
            let px = img.get_pixel_mut(x, y);
            if eraser {
                let keep = 1.0 - coverage * strength;
                px[3] = (px[3] as f32 * keep).round().clamp(0.0, 255.0) as u8;
            } else {
                *px = source_over(*px, color, coverage);
            }
        }
    }
    Some(rect)
}

/// Straight-alpha source-over of `src` (scaled by `coverage`) onto `dst`.
pub fn source_over(dst: Rgba<u8>, src: Rgba<u8>, coverage: f32) -> Rgba<u8> {
    let sa = src[3] as f32 / 255.0 * coverage.clamp(0.0, 1.0);
    if sa <= 0.0 {
        return dst;
    }
    let da = dst[3] as f32 / 255.0;
    let out_a = sa + da * (1.0 - sa);
    if out_a <= 0.0 {
        return Rgba([0, 0, 0, 0]);
    }
    let mut out = [0u8; 4];
    for c in 0..3 {
        let v = (src[c] as f32 * sa + dst[c] as f32 * da * (1.0 - sa)) / out_a;
        out[c] = v.round().clamp(0.0, 255.0) as u8;
    }
    out[3] = (out_a * 255.0).round().clamp(0.0, 255.0) as u8;
    Rgba(out)
}

/// Stroke a connected polyline with evenly spaced stamps of `radius`.
pub fn stroke_polyline(img: &mut RgbaImage, points: &[Pos2], radius: f32, hardness: f32, color: Rgba<u8>) -> Option<PixelRect> {
    let step = (radius * 0.25).max(MIN_STEP);
    let mut dirty = None;
    let mut add = |r: Option<PixelRect>| {
        if let Some(r) = r {
            dirty = Some(union_opt(dirty, r));
        }
    };

    let Some(&first) = points.first() else { return None };
    add(stamp_circle(img, first, radius, hardness, color, false));

    // Distance left over from the previous segment
    let mut carry = 0.0f32;
    for pair in points.windows(2) {
        let (a, b) = (pair[0], pair[1]);
        let len = (b - a).length();
        if len <= 0.0 || !len.is_finite() {
            continue;
        }
        let mut t = step - carry;
        while t <= len {
            add(stamp_circle(img, a.lerp(b, t / len), radius, hardness, color, false));
            t += step;
        }
        carry = len - (t - step);
    }
    if let Some(&last) = points.last() {
        add(stamp_circle(img, last, radius, hardness, color, false));
    }
    dirty
}
