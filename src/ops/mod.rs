// ============================================================================
// OPS - stateless pixel algorithms
// ============================================================================
//
//   brush.rs       - adaptive stamp strokes, circle stamps, polyline stroking
//   fill.rs        - scanline flood fill
//   curves.rs      - Catmull-Rom, B-spline and NURBS evaluators
//   adjustments.rs - brightness/contrast/HSV/invert filter
// ============================================================================

pub mod adjustments;
pub mod brush;
pub mod curves;
pub mod fill;
