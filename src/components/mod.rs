// ============================================================================
// COMPONENTS - stateful editing machinery built on the pixel algorithms
// ============================================================================
//
//   history.rs   - patch list with cursor, stroke snapshot + pending rect
//   tools.rs     - Tool trait, ActiveTool variants, EditContext, Overlay
//   selection.rs - rectangle selection and floating pixel buffer
//   input.rs     - pointer/keyboard routing, click counting, panning
// ============================================================================

pub mod history;
pub mod input;
pub mod selection;
pub mod tools;
