use egui::{Key, Modifiers, PointerButton, Pos2};

use crate::components::tools::{ActiveTool, EditContext, Tool, ToolEvent, ToolKind};
use crate::viewport::Viewport;

/// Zoom factor per unit of scroll.
const WHEEL_ZOOM_STEP: f32 = 1.1;

/// Raw pointer event in screen space, as delivered by the host.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PointerEvent {
    pub screen_pos: Pos2,
    pub button: PointerButton,
    pub modifiers: Modifiers,
    pub pressure: Option<f32>,
    pub time_ms: u64,
}

impl PointerEvent {
    pub fn new(screen_pos: Pos2, time_ms: u64) -> Self {
        Self {
            screen_pos,
            button: PointerButton::Primary,
            modifiers: Modifiers::NONE,
            pressure: None,
            time_ms,
        }
    }

    pub fn with_button(mut self, button: PointerButton) -> Self {
        self.button = button;
        self
    }

    pub fn with_modifiers(mut self, modifiers: Modifiers) -> Self {
        self.modifiers = modifiers;
        self
    }

    pub fn with_pressure(mut self, pressure: f32) -> Self {
        self.pressure = Some(pressure);
        self
    }
}

/// Routes host input to the active tool.  Pan gestures are handled here and
/// never reach the tool.
pub struct InputDispatcher {
    double_click_ms: u64,
    double_click_distance: f32,
    last_click: Option<(Pos2, u64)>,
    click_count: u8,
    /// Last screen position of an in-progress pan
    pan_anchor: Option<Pos2>,
    space_held: bool,
}

impl Default for InputDispatcher {
    fn default() -> Self {
        Self::new(350, 4.0)
    }
}

impl InputDispatcher {
    pub fn new(double_click_ms: u64, double_click_distance: f32) -> Self {
        Self {
            double_click_ms,
            double_click_distance,
            last_click: None,
            click_count: 0,
            pan_anchor: None,
            space_held: false,
        }
    }

    /// Change the double-click thresholds without dropping gesture state.
    pub fn set_double_click(&mut self, double_click_ms: u64, double_click_distance: f32) {
        self.double_click_ms = double_click_ms;
        self.double_click_distance = double_click_distance;
    }

    pub fn is_panning(&self) -> bool {
        self.pan_anchor.is_some()
    }

    pub fn space_held(&self) -> bool {
        self.space_held
    }

    fn starts_pan(&self, ev: &PointerEvent) -> bool {
        match ev.button {
            PointerButton::Middle => true,
            PointerButton::Primary => ev.modifiers.ctrl || self.space_held,
            _ => false,
        }
    }

    /// Continue the previous click if it was close in time and space.
    fn register_click(&mut self, ev: &PointerEvent) -> u8 {
        let continues = self.last_click.is_some_and(|(pos, t)| {
            ev.time_ms.saturating_sub(t) <= self.double_click_ms
                && pos.distance(ev.screen_pos) <= self.double_click_distance
        });
        self.click_count = if continues { (self.click_count + 1).min(2) } else { 1 };
        self.last_click = Some((ev.screen_pos, ev.time_ms));
        self.click_count
    }

    fn tool_event(&self, ev: &PointerEvent, viewport: &Viewport) -> ToolEvent {
        ToolEvent {
            pos: viewport.screen_to_image(ev.screen_pos),
            button: ev.button,
            click_count: self.click_count.max(1),
            modifiers: ev.modifiers,
            pressure: ev.pressure,
            time_ms: ev.time_ms,
        }
    }

    pub fn pointer_down(&mut self, ev: &PointerEvent, viewport: &mut Viewport, tool: &mut ActiveTool, ctx: &mut EditContext) {
        if self.starts_pan(ev) {
            self.pan_anchor = Some(ev.screen_pos);
            return;
        }
        self.register_click(ev);
        let tool_ev = self.tool_event(ev, viewport);
        tool.on_pointer_down(ctx, &tool_ev);
    }

    pub fn pointer_move(&mut self, ev: &PointerEvent, viewport: &mut Viewport, tool: &mut ActiveTool, ctx: &mut EditContext) {
        if let Some(anchor) = self.pan_anchor {
            viewport.pan_by(ev.screen_pos - anchor);
            self.pan_anchor = Some(ev.screen_pos);
            return;
        }
        let tool_ev = self.tool_event(ev, viewport);
        tool.on_pointer_move(ctx, &tool_ev);
    }

    pub fn pointer_up(&mut self, ev: &PointerEvent, viewport: &mut Viewport, tool: &mut ActiveTool, ctx: &mut EditContext) {
        if self.pan_anchor.take().is_some() {
            return;
        }
        let tool_ev = self.tool_event(ev, viewport);
        tool.on_pointer_up(ctx, &tool_ev);
    }

    /// Returns true if the key was consumed.
    pub fn key_down(&mut self, key: Key, tool: &mut ActiveTool, ctx: &mut EditContext) -> bool {
        match key {
            Key::Space => {
                self.space_held = true;
                true
            }
            Key::Escape => {
                tool.cancel(ctx);
                true
            }
            Key::Enter => {
                tool.on_enter(ctx);
                true
            }
            _ => false,
        }
    }

    pub fn key_up(&mut self, key: Key) -> bool {
        if key == Key::Space {
            self.space_held = false;
            true
        } else {
            false
        }
    }

    /// Zoom around the pointer by `scroll` wheel units (positive zooms in).
    pub fn scroll(&mut self, scroll: f32, anchor: Pos2, viewport: &mut Viewport) {
        if scroll.is_finite() && scroll != 0.0 {
            viewport.zoom_at(WHEEL_ZOOM_STEP.powf(scroll), anchor);
        }
    }

    /// Cancel the outgoing tool, then install a fresh `kind`.
    pub fn switch_tool(&mut self, kind: ToolKind, tool: &mut ActiveTool, ctx: &mut EditContext) {
        tool.cancel(ctx);
        *tool = ActiveTool::new(kind);
        self.last_click = None;
        self.click_count = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canvas::Document;
    use crate::components::history::HistoryManager;
    use crate::components::selection::Selection;
    use crate::settings::EngineSettings;
    use egui::Vec2;
    use image::Rgba;

    struct Rig {
        doc: Document,
        history: HistoryManager,
        selection: Selection,
        settings: EngineSettings,
        viewport: Viewport,
        tool: ActiveTool,
        input: InputDispatcher,
    }

    impl Rig {
        fn new(kind: ToolKind) -> Self {
            Self {
                doc: Document::new(64, 64),
                history: HistoryManager::default(),
                selection: Selection::default(),
                settings: EngineSettings::default(),
                viewport: Viewport::default(),
                tool: ActiveTool::new(kind),
                input: InputDispatcher::default(),
            }
        }

        fn down(&mut self, ev: PointerEvent) {
            let mut ctx = EditContext {
                doc: &mut self.doc,
                history: &mut self.history,
                selection: &mut self.selection,
                settings: &self.settings,
                primary_color: Rgba([0, 0, 0, 255]),
                secondary_color: Rgba([255, 255, 255, 255]),
            };
            self.input.pointer_down(&ev, &mut self.viewport, &mut self.tool, &mut ctx);
        }

        fn mv(&mut self, ev: PointerEvent) {
            let mut ctx = EditContext {
                doc: &mut self.doc,
                history: &mut self.history,
                selection: &mut self.selection,
                settings: &self.settings,
                primary_color: Rgba([0, 0, 0, 255]),
                secondary_color: Rgba([255, 255, 255, 255]),
            };
            self.input.pointer_move(&ev, &mut self.viewport, &mut self.tool, &mut ctx);
        }

        fn up(&mut self, ev: PointerEvent) {
            let mut ctx = EditContext {
                doc: &mut self.doc,
                history: &mut self.history,
                selection: &mut self.selection,
                settings: &self.settings,
                primary_color: Rgba([0, 0, 0, 255]),
                secondary_color: Rgba([255, 255, 255, 255]),
            };
            self.input.pointer_up(&ev, &mut self.viewport, &mut self.tool, &mut ctx);
        }
    }

    fn ev(x: f32, y: f32, t: u64) -> PointerEvent {
        PointerEvent::new(Pos2::new(x, y), t)
    }

    #[test]
    fn click_count_respects_time_and_distance() {
        let mut input = InputDispatcher::default();
        assert_eq!(input.register_click(&ev(10.0, 10.0, 0)), 1);
        assert_eq!(input.register_click(&ev(12.0, 11.0, 200)), 2);
        assert_eq!(input.register_click(&ev(12.0, 11.0, 300)), 2, "count is capped at 2");
        assert_eq!(input.register_click(&ev(12.0, 11.0, 1000)), 1, "too slow");
        assert_eq!(input.register_click(&ev(30.0, 11.0, 1100)), 1, "too far");
    }

    #[test]
    fn retuning_thresholds_keeps_gesture_state() {
        let mut input = InputDispatcher::default();
        input.register_click(&ev(10.0, 10.0, 0));
        input.space_held = true;
        input.pan_anchor = Some(Pos2::new(1.0, 1.0));
        input.set_double_click(800, 10.0);
        assert!(input.space_held());
        assert!(input.is_panning());
        assert_eq!(input.register_click(&ev(18.0, 10.0, 700)), 2, "new thresholds apply to the pending click");
    }

    #[test]
    fn middle_drag_pans_without_touching_tool() {
        let mut rig = Rig::new(ToolKind::Brush);
        let original = rig.doc.active_layer().pixels.clone();
        rig.down(ev(10.0, 10.0, 0).with_button(PointerButton::Middle));
        rig.mv(ev(30.0, 15.0, 16));
        rig.up(ev(30.0, 15.0, 32));
        assert_eq!(rig.viewport.pan_offset, Vec2::new(20.0, 5.0));
        assert_eq!(rig.doc.active_layer().pixels, original);
        assert!(!rig.history.can_undo());
    }

    #[test]
    fn ctrl_primary_drag_pans() {
        let mut rig = Rig::new(ToolKind::Brush);
        rig.down(ev(0.0, 0.0, 0).with_modifiers(Modifiers::CTRL));
        assert!(rig.input.is_panning());
        rig.mv(ev(-5.0, 3.0, 10));
        rig.up(ev(-5.0, 3.0, 20));
        assert!(!rig.input.is_panning());
        assert_eq!(rig.viewport.pan_offset, Vec2::new(-5.0, 3.0));
    }

    #[test]
    fn space_held_turns_primary_into_pan() {
        let mut rig = Rig::new(ToolKind::Fill);
        let mut ctx = EditContext {
            doc: &mut rig.doc,
            history: &mut rig.history,
            selection: &mut rig.selection,
            settings: &rig.settings,
            primary_color: Rgba([0, 0, 0, 255]),
            secondary_color: Rgba([255, 255, 255, 255]),
        };
        assert!(rig.input.key_down(Key::Space, &mut rig.tool, &mut ctx));
        rig.down(ev(5.0, 5.0, 0));
        rig.up(ev(5.0, 5.0, 10));
        assert!(!rig.history.can_undo(), "fill must not run while panning");
        rig.input.key_up(Key::Space);
        rig.down(ev(5.0, 5.0, 1000));
        assert!(rig.history.can_undo());
    }

    #[test]
    fn screen_positions_are_mapped_through_viewport() {
        let mut rig = Rig::new(ToolKind::Fill);
        rig.viewport = Viewport::new(2.0, Vec2::new(100.0, 100.0));
        // Screen (110, 110) is image (5, 5)
        add_wall_at_x20(&mut rig.doc);
        rig.down(ev(110.0, 110.0, 0));
        assert_eq!(*rig.doc.active_layer().pixels.get_pixel(5, 5), Rgba([0, 0, 0, 255]));
    }

    fn add_wall_at_x20(doc: &mut Document) {
        // Wall so the fill stays local to the top-left quadrant
        for i in 0..64 {
            doc.active_layer_mut().pixels.put_pixel(20, i, Rgba([10, 10, 10, 255]));
        }
    }
}
