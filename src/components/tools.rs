use egui::Pos2;

use crate::canvas::CanvasLayout;
use crate::ops::brush::BrushShape;

pub const MIN_BRUSH_SIZE: u32 = 1;
pub const MAX_BRUSH_SIZE: u32 = 10;
pub const DEFAULT_BRUSH_SIZE: u32 = 3;
/// 3 px on the 128×128 editing canvas of a 1024×1024 target.
pub const DEFAULT_BRUSH_SIZE_PERCENT: f32 = 3.0 / 181.019_34;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Tool {
    #[default]
    Brush,
    Eraser,
}

impl Tool {
    pub fn label(&self) -> &'static str {
        match self {
            Tool::Brush => "Brush",
            Tool::Eraser => "Eraser",
        }
    }

    pub fn all() -> &'static [Tool] {
        &[Tool::Brush, Tool::Eraser]
    }

    pub fn is_eraser(&self) -> bool {
        matches!(self, Tool::Eraser)
    }

    pub fn toggled(self) -> Self {
        match self {
            Tool::Brush => Tool::Eraser,
            Tool::Eraser => Tool::Brush,
        }
    }
}

/// Absolute brush size for a canvas of the given diagonal.
pub fn absolute_brush_size(size_percent: f32, diagonal: f32) -> u32 {
    let size = (diagonal * size_percent).round();
    if size.is_finite() {
        (size.max(0.0) as u32).clamp(MIN_BRUSH_SIZE, MAX_BRUSH_SIZE)
    } else {
        DEFAULT_BRUSH_SIZE
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BrushSettings {
    pub tool: Tool,
    pub shape: BrushShape,
    /// Absolute size (circle radius) on the current canvas, 1–10.
    pub size: u32,
    /// Size as a fraction of the canvas diagonal; this is what persists
    /// between sessions so the brush looks the same at any resolution.
    pub size_percent: f32,
}

impl Default for BrushSettings {
    fn default() -> Self {
        Self {
            tool: Tool::Brush,
            shape: BrushShape::Circle,
            size: DEFAULT_BRUSH_SIZE,
            size_percent: DEFAULT_BRUSH_SIZE_PERCENT,
        }
    }
}

impl BrushSettings {
    /// Recompute the absolute size for a new canvas diagonal.
    pub fn rescale(&mut self, diagonal: f32) {
        self.size = absolute_brush_size(self.size_percent, diagonal);
    }

    /// Set the absolute size and remember it relative to `diagonal`.
    pub fn set_size(&mut self, size: u32, diagonal: f32) {
        self.size = size.clamp(MIN_BRUSH_SIZE, MAX_BRUSH_SIZE);
        if diagonal > 0.0 {
            self.size_percent = self.size as f32 / diagonal;
        }
    }
}

// ---------------------------------------------------------------------------
//  Pointer input
// ---------------------------------------------------------------------------

/// Pointer input as seen by the mask canvas. `Up` is delivered from
/// anywhere in the window, not only over the canvas, so a drag released
/// off-canvas still ends the stroke.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum PointerEvent {
    Down(Pos2),
    Move(Pos2),
    Up,
    Enter(Pos2),
    Leave,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum TouchEvent {
    Start(Pos2),
    Move(Pos2),
    End,
    Cancel,
}

impl From<TouchEvent> for PointerEvent {
    fn from(touch: TouchEvent) -> Self {
        match touch {
            TouchEvent::Start(p) => PointerEvent::Down(p),
            TouchEvent::Move(p) => PointerEvent::Move(p),
            TouchEvent::End | TouchEvent::Cancel => PointerEvent::Up,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum StrokeState {
    #[default]
    Idle,
    Dragging,
}

/// Work for the brush, produced by [`dispatch`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DrawCommand {
    /// Destructive dab into the live buffer.
    Stamp {
        x: i32,
        y: i32,
        shape: BrushShape,
        size: u32,
        erase: bool,
    },
    /// Cursor footprint on the preview overlay.
    Preview {
        x: i32,
        y: i32,
        shape: BrushShape,
        size: u32,
        erase: bool,
    },
    ClearPreview,
}

/// Advance the stroke state machine by one event.
///
/// Positions outside the drawn canvas produce no stamp and no preview, but a
/// drag stays alive until `Up` so re-entering the canvas resumes painting.
pub fn dispatch(
    state: StrokeState,
    event: PointerEvent,
    layout: &CanvasLayout,
    brush: &BrushSettings,
) -> (StrokeState, Vec<DrawCommand>) {
    let erase = brush.tool.is_eraser();
    let stamp = |x, y| DrawCommand::Stamp {
        x,
        y,
        shape: brush.shape,
        size: brush.size,
        erase,
    };
    let preview = |x, y| DrawCommand::Preview {
        x,
        y,
        shape: brush.shape,
        size: brush.size,
        erase,
    };

    match event {
        PointerEvent::Down(pos) => {
            let mut cmds = vec![DrawCommand::ClearPreview];
            if let Some((x, y)) = layout.to_canvas_pixel(pos) {
                cmds.push(stamp(x, y));
                cmds.push(preview(x, y));
            }
            (StrokeState::Dragging, cmds)
        }
        PointerEvent::Move(pos) | PointerEvent::Enter(pos) => {
            let mut cmds = vec![DrawCommand::ClearPreview];
            if let Some((x, y)) = layout.to_canvas_pixel(pos) {
                if state == StrokeState::Dragging {
                    cmds.push(stamp(x, y));
                }
                cmds.push(preview(x, y));
            }
            (state, cmds)
        }
        PointerEvent::Leave => (state, vec![DrawCommand::ClearPreview]),
        PointerEvent::Up => (StrokeState::Idle, Vec::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use egui::{Rect, Vec2, pos2};

    fn layout() -> CanvasLayout {
        // 1:1 scale, no padding
        CanvasLayout::new(Rect::from_min_size(pos2(0.0, 0.0), Vec2::new(100.0, 50.0)), 100, 50)
    }

    fn count_stamps(cmds: &[DrawCommand]) -> usize {
        cmds.iter()
            .filter(|c| matches!(c, DrawCommand::Stamp { .. }))
            .count()
    }

    #[test]
    fn rescale_law_holds_across_resolutions() {
        let d1 = 100.0f32;
        for n in 1..=10u32 {
            let mut brush = BrushSettings::default();
            brush.set_size(n, d1);
            for d2 in [37.0f32, 100.0, 181.0, 263.0, 1000.0] {
                brush.rescale(d2);
                let expected = ((d2 * n as f32 / d1).round() as u32).clamp(1, 10);
                assert_eq!(brush.size, expected, "n={n} d2={d2}");
            }
        }
    }

    #[test]
    fn sizes_are_clamped() {
        let mut brush = BrushSettings::default();
        brush.set_size(0, 50.0);
        assert_eq!(brush.size, 1);
        brush.set_size(99, 50.0);
        assert_eq!(brush.size, 10);
        assert_eq!(absolute_brush_size(f32::NAN, 10.0), DEFAULT_BRUSH_SIZE);
    }

    #[test]
    fn hover_previews_without_painting() {
        let (state, cmds) = dispatch(
            StrokeState::Idle,
            PointerEvent::Move(pos2(10.5, 10.5)),
            &layout(),
            &BrushSettings::default(),
        );
        assert_eq!(state, StrokeState::Idle);
        assert_eq!(count_stamps(&cmds), 0);
        assert!(cmds.iter().any(|c| matches!(c, DrawCommand::Preview { x: 10, y: 10, .. })));
    }

    #[test]
    fn drag_survives_leaving_and_reentering() {
        let brush = BrushSettings::default();
        let l = layout();
        let (s, cmds) = dispatch(StrokeState::Idle, PointerEvent::Down(pos2(5.0, 5.0)), &l, &brush);
        assert_eq!((s, count_stamps(&cmds)), (StrokeState::Dragging, 1));

        let (s, cmds) = dispatch(s, PointerEvent::Move(pos2(150.0, 5.0)), &l, &brush);
        assert_eq!(cmds, vec![DrawCommand::ClearPreview]);
        let (s, cmds) = dispatch(s, PointerEvent::Leave, &l, &brush);
        assert_eq!((s, cmds), (StrokeState::Dragging, vec![DrawCommand::ClearPreview]));

        let (s, cmds) = dispatch(s, PointerEvent::Enter(pos2(20.0, 5.0)), &l, &brush);
        assert_eq!((s, count_stamps(&cmds)), (StrokeState::Dragging, 1));

        let (s, cmds) = dispatch(s, PointerEvent::Up, &l, &brush);
        assert_eq!((s, cmds.len()), (StrokeState::Idle, 0));
        let (_, cmds) = dispatch(s, PointerEvent::Move(pos2(30.0, 5.0)), &l, &brush);
        assert_eq!(count_stamps(&cmds), 0);
    }

    #[test]
    fn eraser_commands_are_marked() {
        let brush = BrushSettings {
            tool: Tool::Eraser,
            ..BrushSettings::default()
        };
        let (_, cmds) = dispatch(StrokeState::Idle, PointerEvent::Down(pos2(1.0, 1.0)), &layout(), &brush);
        assert!(cmds.iter().any(|c| matches!(c, DrawCommand::Stamp { erase: true, .. })));
    }

    #[test]
    fn touch_maps_onto_pointer_events() {
        let p = pos2(3.0, 4.0);
        assert_eq!(PointerEvent::from(TouchEvent::Start(p)), PointerEvent::Down(p));
        assert_eq!(PointerEvent::from(TouchEvent::Move(p)), PointerEvent::Move(p));
        assert_eq!(PointerEvent::from(TouchEvent::Cancel), PointerEvent::Up);
    }
}
