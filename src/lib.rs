//! Raster editing engine: layered pixel canvases, pointer-driven tools and
//! patch-based undo/redo.
//!
//! The host owns the window, the event loop and persistence. It feeds pointer
//! and keyboard events into [`Engine`], calls [`Engine::tick`] from whatever
//! frame source it has, and reads the flattened composite back for display.
#![allow(clippy::too_many_arguments)]
#![allow(clippy::type_complexity)]

#[macro_use]
pub mod logger;
pub mod canvas;
pub mod components;
pub mod engine;
pub mod io;
pub mod ops;
pub mod settings;
pub mod viewport;

pub use canvas::{BlendMode, Document, Layer, LayerId, PixelRect};
pub use components::history::{HistoryManager, PixelPatch};
pub use components::input::{InputDispatcher, PointerEvent};
pub use components::selection::Selection;
pub use components::tools::{ActiveTool, EditContext, Overlay, Tool, ToolEvent, ToolKind};
pub use engine::Engine;
pub use io::{EngineError, FlatSnapshot};
pub use ops::adjustments::ColorAdjust;
pub use settings::EngineSettings;
pub use viewport::Viewport;
