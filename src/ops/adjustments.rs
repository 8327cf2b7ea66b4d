// ============================================================================
// COLOUR ADJUSTMENT - brightness, contrast, HSV saturation/hue, invert
// ============================================================================
//
// The stages always run in the same order: brightness → contrast →
// saturation/hue → invert.  Alpha is never touched.  Rows are processed in
// parallel via rayon.
// ============================================================================

use image::RgbaImage;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ColorAdjust {
    /// Added to every channel, in `[-1, 1]`
    pub brightness: f32,
    /// Scale around mid grey, 1.0 = unchanged
    pub contrast: f32,
    /// HSV saturation multiplier, 1.0 = unchanged
    pub saturation: f32,
    /// Hue rotation in degrees
    pub hue: f32,
    pub invert: bool,
}

impl Default for ColorAdjust {
    fn default() -> Self {
        Self {
            brightness: 0.0,
            contrast: 1.0,
            saturation: 1.0,
            hue: 0.0,
            invert: false,
        }
    }
}

impl ColorAdjust {
    pub fn is_identity(&self) -> bool {
        self.brightness == 0.0
            && self.contrast == 1.0
            && self.saturation == 1.0
            && self.hue.rem_euclid(360.0) == 0.0
            && !self.invert
    }

    /// Transform one straight-alpha RGB triple (0..1 channels).
    pub fn apply_rgb(&self, r: f32, g: f32, b: f32) -> (f32, f32, f32) {
        let brightness = self.brightness.clamp(-1.0, 1.0);
        let contrast = self.contrast.max(0.0);
        let stage = |c: f32| {
            let c = (c + brightness).clamp(0.0, 1.0);
            ((c - 0.5) * contrast + 0.5).clamp(0.0, 1.0)
        };
        let (mut r, mut g, mut b) = (stage(r), stage(g), stage(b));

        if self.saturation != 1.0 || self.hue != 0.0 {
            let (h, s, v) = rgb_to_hsv(r, g, b);
            let h = (h + self.hue).rem_euclid(360.0);
            let s = (s * self.saturation.max(0.0)).clamp(0.0, 1.0);
            (r, g, b) = hsv_to_rgb(h, s, v);
        }

        if self.invert {
            (r, g, b) = (1.0 - r, 1.0 - g, 1.0 - b);
        }
        (r, g, b)
    }

    /// Adjusted copy of `src`.
    pub fn preview(&self, src: &RgbaImage) -> RgbaImage {
        let mut out = src.clone();
        self.apply_in_place(&mut out);
        out
    }

    pub fn apply_in_place(&self, img: &mut RgbaImage) {
        let stride = img.width() as usize * 4;
        if stride == 0 {
            return;
        }
        img.par_chunks_mut(stride).for_each(|row| {
            for px in row.chunks_exact_mut(4) {
                let (r, g, b) = self.apply_rgb(px[0] as f32 / 255.0, px[1] as f32 / 255.0, px[2] as f32 / 255.0);
                px[0] = (r * 255.0).round().clamp(0.0, 255.0) as u8;
                px[1] = (g * 255.0).round().clamp(0.0, 255.0) as u8;
                px[2] = (b * 255.0).round().clamp(0.0, 255.0) as u8;
            }
        });
    }
}

/// RGB (0..1) → HSV with hue in degrees.
pub fn rgb_to_hsv(r: f32, g: f32, b: f32) -> (f32, f32, f32) {
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let delta = max - min;

    let h = if delta <= f32::EPSILON {
        0.0
    } else if max == r {
        60.0 * ((g - b) / delta).rem_euclid(6.0)
    } else if max == g {
        60.0 * ((b - r) / delta + 2.0)
    } else {
        60.0 * ((r - g) / delta + 4.0)
    };
    let s = if max <= 0.0 { 0.0 } else { delta / max };
    (h, s, max)
}

pub fn hsv_to_rgb(h: f32, s: f32, v: f32) -> (f32, f32, f32) {
    let c = v * s;
    let hp = h.rem_euclid(360.0) / 60.0;
    let x = c * (1.0 - (hp % 2.0 - 1.0).abs());
    let (r, g, b) = match hp as u32 {
        0 => (c, x, 0.0),
        1 => (x, c, 0.0),
        2 => (0.0, c, x),
        3 => (0.0, x, c),
        4 => (x, 0.0, c),
        _ => (c, 0.0, x),
    };
    let m = v - c;
    (r + m, g + m, b + m)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    fn one(px: Rgba<u8>, adj: ColorAdjust) -> Rgba<u8> {
        *adj.preview(&RgbaImage::from_pixel(1, 1, px)).get_pixel(0, 0)
    }

    #[test]
    fn default_is_identity() {
        let img = RgbaImage::from_fn(5, 3, |x, y| Rgba([x as u8 * 40, y as u8 * 70, 90, 200]));
        assert!(ColorAdjust::default().is_identity());
        assert_eq!(ColorAdjust::default().preview(&img), img);
    }

    #[test]
    fn brightness_runs_before_invert() {
        let adj = ColorAdjust { brightness: 0.2, invert: true, ..Default::default() };
        // 0.5 + 0.2 = 0.7, inverted = 0.3
        let out = one(Rgba([128, 128, 128, 77]), adj);
        assert_eq!(out, Rgba([76, 76, 76, 77]));
    }

    #[test]
    fn contrast_pivots_on_mid_grey() {
        let adj = ColorAdjust { contrast: 2.0, ..Default::default() };
        assert_eq!(one(Rgba([60, 200, 255, 255]), adj), Rgba([0, 255, 255, 255]));
    }

    #[test]
    fn zero_saturation_greys_out() {
        let adj = ColorAdjust { saturation: 0.0, ..Default::default() };
        let out = one(Rgba([200, 40, 40, 255]), adj);
        assert_eq!(out[0], out[1]);
        assert_eq!(out[1], out[2]);
    }

    #[test]
    fn hue_rotation_moves_red_to_green() {
        let adj = ColorAdjust { hue: 120.0, ..Default::default() };
        assert_eq!(one(Rgba([255, 0, 0, 255]), adj), Rgba([0, 255, 0, 255]));
    }

    #[test]
    fn preview_leaves_source_untouched() {
        let src = RgbaImage::from_pixel(2, 2, Rgba([10, 20, 30, 255]));
        let copy = src.clone();
        let _ = ColorAdjust { invert: true, ..Default::default() }.preview(&src);
        assert_eq!(src, copy);
    }
}
