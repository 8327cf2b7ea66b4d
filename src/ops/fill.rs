// ============================================================================
// FLOOD FILL - 4-connected scanline fill with an L1 RGBA tolerance
// ============================================================================

use image::{Rgba, RgbaImage};

use crate::canvas::{copy_region, PixelRect};

/// Pixels touched by a fill, with the layer contents before and after.
pub struct FillResult {
    pub rect: PixelRect,
    pub before: RgbaImage,
    pub after: RgbaImage,
}

/// Sum of absolute per-channel differences (0..=1020).
#[inline]
pub fn color_distance(a: Rgba<u8>, b: Rgba<u8>) -> u32 {
    a.0.iter().zip(b.0.iter()).map(|(&x, &y)| (x as i32 - y as i32).unsigned_abs()).sum()
}

/// Fill the region 4-connected to `seed` whose colour lies within
/// `threshold` of the seed colour.  `limit` restricts the fill (e.g. to the
/// selection); pixels outside it are neither filled nor crossed.
///
/// Returns `None` when the seed is outside the canvas (or outside `limit`), or
/// when the seed already has the fill colour and `threshold` is zero.
pub fn flood_fill(
    img: &mut RgbaImage,
    seed_x: i64,
    seed_y: i64,
    fill: Rgba<u8>,
    threshold: u32,
    limit: Option<PixelRect>,
) -> Option<FillResult> {
    let canvas = PixelRect::full(img.width(), img.height());
    let bounds = match limit {
        Some(l) => l.intersect(canvas)?,
        None => canvas,
    };
    if seed_x < 0 || seed_y < 0 || !bounds.contains(seed_x as u32, seed_y as u32) {
        return None;
    }
    let (sx, sy) = (seed_x as u32, seed_y as u32);
    let target = *img.get_pixel(sx, sy);
    if threshold == 0 && color_distance(target, fill) == 0 {
        return None;
    }

    let mask = region_mask(img, sx, sy, target, threshold, bounds);
    let rect = mask.rect?;

    let before = copy_region(img, rect);
    let w = img.width() as usize;
    for y in rect.y..rect.bottom() {
        for x in rect.x..rect.right() {
            if mask.bits[y as usize * w + x as usize] {
                img.put_pixel(x, y, fill);
            }
        }
    }
    let after = copy_region(img, rect);
    Some(FillResult { rect, before, after })
}

struct RegionMask {
    bits: Vec<bool>,
    rect: Option<PixelRect>,
}

/// Scanline walk.  Matching is against the original pixels only, so the
/// mask is computed before anything is painted.
fn region_mask(img: &RgbaImage, sx: u32, sy: u32, target: Rgba<u8>, threshold: u32, bounds: PixelRect) -> RegionMask {
    let w = img.width() as usize;
    let mut bits = vec![false; w * img.height() as usize];
    let matches = |x: u32, y: u32| color_distance(*img.get_pixel(x, y), target) <= threshold;

    let (mut min_x, mut min_y, mut max_x, mut max_y) = (u32::MAX, u32::MAX, 0u32, 0u32);
    let mut stack: Vec<(u32, u32)> = vec![(sx, sy)];

    while let Some((x, y)) = stack.pop() {
        if bits[y as usize * w + x as usize] || !matches(x, y) {
            continue;
        }

        // Extend the span left and right
        let mut left = x;
        while left > bounds.x && !bits[y as usize * w + left as usize - 1] && matches(left - 1, y) {
            left -= 1;
        }
        let mut right = x;
        while right + 1 < bounds.right() && !bits[y as usize * w + right as usize + 1] && matches(right + 1, y) {
            right += 1;
        }

        for px in left..=right {
            bits[y as usize * w + px as usize] = true;
        }
        min_x = min_x.min(left);
        max_x = max_x.max(right);
        min_y = min_y.min(y);
        max_y = max_y.max(y);

        // Seed the neighbouring rows once per run of matching pixels
        for ny in [y.checked_sub(1), Some(y + 1)].into_iter().flatten() {
            if ny < bounds.y || ny >= bounds.bottom() {
                continue;
            }
            let mut in_run = false;
            for px in left..=right {
                let open = !bits[ny as usize * w + px as usize] && matches(px, ny);
                if open && !in_run {
                    stack.push((px, ny));
                }
                in_run = open;
            }
        }
    }

    let rect = (min_x <= max_x && min_y <= max_y).then(|| PixelRect::new(min_x, min_y, max_x - min_x + 1, max_y - min_y + 1));
    RegionMask { bits, rect }
}
