// ============================================================================
// PARAMETRIC CURVES - Catmull-Rom, clamped cubic B-spline, rational B-spline
// ============================================================================
//
// Every evaluator returns a fresh polyline; the curve tool draws it as a
// preview while points are being placed and strokes it on finalisation.
// ============================================================================

use egui::Pos2;

use crate::canvas::PixelRect;

/// Inward bias of the last sampled NURBS parameter so the final sample stays
/// inside the half-open knot span.
pub const NURBS_END_EPSILON: f32 = 1e-4;

const BSPLINE_DEGREE: usize = 3;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum CurveKind {
    #[default]
    CatmullRom,
    BSpline,
    Nurbs,
}

impl CurveKind {
    pub fn name(&self) -> &'static str {
        match self {
            CurveKind::CatmullRom => "Catmull-Rom Curve",
            CurveKind::BSpline => "B-Spline Curve",
            CurveKind::Nurbs => "NURBS Curve",
        }
    }

    /// Control points needed before the curve can be committed.
    pub fn min_points(&self) -> usize {
        match self {
            CurveKind::CatmullRom => 4,
            CurveKind::BSpline | CurveKind::Nurbs => 2,
        }
    }

    /// Evaluate the curve.  `weights` is only read for NURBS; missing entries
    /// default to 1.
    pub fn evaluate(&self, points: &[Pos2], weights: &[f32], samples_per_segment: usize) -> Vec<Pos2> {
        match self {
            CurveKind::CatmullRom => catmull_rom(points, samples_per_segment),
            CurveKind::BSpline => bspline(points, samples_per_segment),
            CurveKind::Nurbs => nurbs(points, weights, samples_per_segment),
        }
    }
}

// ----------------------------------------------------------------------------
// Catmull-Rom
// ----------------------------------------------------------------------------

/// Uniform Catmull-Rom weights for P_{i-1}, P_i, P_{i+1}, P_{i+2}.
#[inline]
fn catmull_rom_weights(t: f32) -> [f32; 4] {
    let t2 = t * t;
    let t3 = t2 * t;
    [
        -0.5 * t3 + t2 - 0.5 * t,
        1.5 * t3 - 2.5 * t2 + 1.0,
        -1.5 * t3 + 2.0 * t2 + 0.5 * t,
        0.5 * t3 - 0.5 * t2,
    ]
}

/// Piecewise cubic through every control point.  End segments reuse the
/// nearest endpoint as their missing neighbour.
pub fn catmull_rom(points: &[Pos2], samples_per_segment: usize) -> Vec<Pos2> {
    let n = points.len();
    if n < 2 {
        return points.to_vec();
    }
    let samples = samples_per_segment.max(1);
    let mut out = Vec::with_capacity((n - 1) * samples + 1);

    for i in 0..n - 1 {
        let p0 = points[i.saturating_sub(1)];
        let p1 = points[i];
        let p2 = points[i + 1];
        let p3 = points[(i + 2).min(n - 1)];
        for s in 0..samples {
            let w = catmull_rom_weights(s as f32 / samples as f32);
            out.push(Pos2::new(
                w[0] * p0.x + w[1] * p1.x + w[2] * p2.x + w[3] * p3.x,
                w[0] * p0.y + w[1] * p1.y + w[2] * p2.y + w[3] * p3.y,
            ));
        }
    }
    out.push(points[n - 1]);
    out
}

// ----------------------------------------------------------------------------
// Clamped cubic B-spline (de Boor)
// ----------------------------------------------------------------------------

/// Clamped knot vector: `degree + 1` repeats at each end, unit interior steps.
fn clamped_knots(n: usize, degree: usize) -> Vec<f32> {
    let spans = n - degree;
    let mut knots = Vec::with_capacity(n + degree + 1);
    knots.extend(std::iter::repeat_n(0.0, degree + 1));
    knots.extend((1..spans).map(|k| k as f32));
    knots.extend(std::iter::repeat_n(spans as f32, degree + 1));
    knots
}

fn de_boor(points: &[Pos2], knots: &[f32], degree: usize, t: f32) -> Pos2 {
    let n = points.len();
    // Span k with knots[k] <= t < knots[k+1], the last span owning the far end
    let mut k = degree;
    while k < n - 1 && t >= knots[k + 1] {
        k += 1;
    }

    let mut d: Vec<Pos2> = (0..=degree).map(|j| points[j + k - degree]).collect();
    for r in 1..=degree {
        for j in (r..=degree).rev() {
            let i = j + k - degree;
            let denom = knots[i + degree + 1 - r] - knots[i];
            let alpha = if denom.abs() > f32::EPSILON { (t - knots[i]) / denom } else { 0.0 };
            d[j] = d[j - 1].lerp(d[j], alpha);
        }
    }
    d[degree]
}

/// Degree-3 B-spline with a clamped knot vector, so it starts and ends on
/// the first and last control points.  Three or fewer points are returned
/// unchanged.
pub fn bspline(points: &[Pos2], samples_per_segment: usize) -> Vec<Pos2> {
    let n = points.len();
    if n <= BSPLINE_DEGREE {
        return points.to_vec();
    }
    let knots = clamped_knots(n, BSPLINE_DEGREE);
    let spans = n - BSPLINE_DEGREE;
    let total = spans * samples_per_segment.max(1);

    (0..=total)
        .map(|s| {
            let t = spans as f32 * s as f32 / total as f32;
            de_boor(points, &knots, BSPLINE_DEGREE, t)
        })
        .collect()
}

// ----------------------------------------------------------------------------
// NURBS
// ----------------------------------------------------------------------------

/// All `n_ctrl` basis functions of `degree` at `t`, evaluated bottom-up with
/// the Cox–de Boor recurrence in a single table.
pub fn nurbs_basis(n_ctrl: usize, degree: usize, knots: &[f32], t: f32) -> Vec<f32> {
    let last = knots.len().saturating_sub(1);
    if n_ctrl == 0 || last < n_ctrl {
        return vec![0.0; n_ctrl];
    }

    let mut basis: Vec<f32> = (0..last)
        .map(|i| if knots[i] <= t && t < knots[i + 1] { 1.0 } else { 0.0 })
        .collect();

    for d in 1..=degree.min(last - 1) {
        for i in 0..last - d {
            let left_den = knots[i + d] - knots[i];
            let right_den = knots[i + d + 1] - knots[i + 1];
            let left = if left_den != 0.0 { (t - knots[i]) / left_den * basis[i] } else { 0.0 };
            let right = if right_den != 0.0 { (knots[i + d + 1] - t) / right_den * basis[i + 1] } else { 0.0 };
            basis[i] = left + right;
        }
    }
    basis.truncate(n_ctrl);
    basis
}

/// Uniform unclamped knot vector `0, 1, ..., n + degree`.
pub fn uniform_knots(n: usize, degree: usize) -> Vec<f32> {
    (0..=n + degree).map(|k| k as f32).collect()
}

/// Rational B-spline over an unclamped uniform knot vector.  Degree is 3, or
/// `n - 1` for fewer points.  The curve spans `[degree, n]` in parameter space.
pub fn nurbs(points: &[Pos2], weights: &[f32], samples_per_segment: usize) -> Vec<Pos2> {
    let n = points.len();
    if n < 2 {
        return points.to_vec();
    }
    let degree = BSPLINE_DEGREE.min(n - 1);
    let knots = uniform_knots(n, degree);
    let spans = n - degree;
    let total = spans * samples_per_segment.max(1);
    let start = degree as f32;

    let mut out = Vec::with_capacity(total + 1);
    for s in 0..=total {
        let mut t = start + spans as f32 * s as f32 / total as f32;
        if s == total {
            t -= NURBS_END_EPSILON;
        }
        let basis = nurbs_basis(n, degree, &knots, t);

        let (mut x, mut y, mut w_sum) = (0.0f32, 0.0f32, 0.0f32);
        for (i, (p, b)) in points.iter().zip(&basis).enumerate() {
            let w = b * weights.get(i).copied().unwrap_or(1.0);
            x += p.x * w;
            y += p.y * w;
            w_sum += w;
        }
        if !w_sum.is_finite() || w_sum.abs() < 1e-8 {
            continue;
        }
        out.push(Pos2::new(x / w_sum, y / w_sum));
    }
    out
}

// ----------------------------------------------------------------------------
// Rasterisation helpers
// ----------------------------------------------------------------------------

/// Bounding box of a polyline grown by the stroke width (at least 2 px).
pub fn polyline_bounds(points: &[Pos2], line_width: f32, canvas_w: u32, canvas_h: u32) -> Option<PixelRect> {
    let first = points.first()?;
    let (mut min, mut max) = (*first, *first);
    for p in points {
        min = min.min(*p);
        max = max.max(*p);
    }
    let pad = line_width.max(2.0);
    PixelRect::from_bounds_clamped(min.x - pad, min.y - pad, max.x + pad, max.y + pad, canvas_w, canvas_h)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pts(coords: &[(f32, f32)]) -> Vec<Pos2> {
        coords.iter().map(|&(x, y)| Pos2::new(x, y)).collect()
    }

    #[test]
    fn catmull_rom_passes_through_endpoints() {
        let control = pts(&[(0.0, 0.0), (10.0, 5.0), (20.0, -3.0), (30.0, 4.0)]);
        let out = catmull_rom(&control, 8);
        assert_eq!(out.first(), control.first());
        assert_eq!(out.last(), control.last());
        assert_eq!(out.len(), 3 * 8 + 1);
        // Interior control points are hit at segment boundaries
        assert!((out[8] - control[1]).length() < 1e-4);
    }

    #[test]
    fn catmull_rom_collinear_stays_collinear() {
        let control = pts(&[(0.0, 0.0), (1.0, 2.0), (3.0, 6.0), (4.0, 8.0), (7.0, 14.0)]);
        for p in catmull_rom(&control, 10) {
            assert!((p.y - 2.0 * p.x).abs() < 1e-3, "{:?} left the line y = 2x", p);
        }
    }

    #[test]
    fn bspline_is_clamped_to_end_points() {
        let control = pts(&[(0.0, 0.0), (5.0, 10.0), (10.0, -10.0), (15.0, 10.0), (20.0, 0.0)]);
        let out = bspline(&control, 12);
        assert!((out[0] - control[0]).length() < 1e-4);
        assert!((*out.last().unwrap() - control[4]).length() < 1e-3);
    }

    #[test]
    fn bspline_with_few_points_returns_them() {
        let control = pts(&[(0.0, 0.0), (3.0, 3.0), (6.0, 0.0)]);
        assert_eq!(bspline(&control, 8), control);
    }

    #[test]
    fn nurbs_basis_is_a_partition_of_unity() {
        for n in 2..8usize {
            let degree = BSPLINE_DEGREE.min(n - 1);
            let knots = uniform_knots(n, degree);
            let mut t = degree as f32;
            while t < n as f32 {
                let sum: f32 = nurbs_basis(n, degree, &knots, t).iter().sum();
                assert!((sum - 1.0).abs() < 1e-4, "n={} t={} sum={}", n, t, sum);
                t += 0.037;
            }
        }
    }

    #[test]
    fn equal_weight_nurbs_matches_between_controls() {
        let control = pts(&[(0.0, 0.0), (10.0, 0.0)]);
        let out = nurbs(&control, &[1.0, 1.0], 4);
        assert_eq!(out.len(), 5);
        assert!((out[0] - control[0]).length() < 1e-4);
        assert!((out[4] - control[1]).length() < 1e-2);
    }

    #[test]
    fn heavier_weight_pulls_the_curve() {
        let control = pts(&[(0.0, 0.0), (10.0, 20.0), (20.0, 0.0), (30.0, 20.0), (40.0, 0.0)]);
        let flat = nurbs(&control, &[1.0; 5], 8);
        let pulled = nurbs(&control, &[1.0, 1.0, 8.0, 1.0, 1.0], 8);
        let mid = flat.len() / 2;
        assert!(pulled[mid].y < flat[mid].y, "weight on (20,0) should drag the midpoint down");
    }

    #[test]
    fn zero_weights_skip_samples() {
        let control = pts(&[(0.0, 0.0), (10.0, 0.0), (20.0, 0.0)]);
        assert!(nurbs(&control, &[0.0, 0.0, 0.0], 4).is_empty());
    }

    #[test]
    fn bounds_are_padded_by_line_width() {
        let r = polyline_bounds(&pts(&[(10.0, 10.0), (20.0, 15.0)]), 1.0, 100, 100).unwrap();
        assert_eq!(r, PixelRect::new(8, 8, 14, 9));
    }
}
