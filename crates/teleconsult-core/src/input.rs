//! Pointer input translation into annotation and viewport events.

use kurbo::{Point, Vec2};
use serde::{Deserialize, Serialize};

use crate::annotation::{
    AnnotationAction, AnnotationEvent, DEFAULT_STROKE_COLOR, DEFAULT_STROKE_WIDTH, Stroke,
};
use crate::geometry::SurfaceGeometry;
use crate::protocol::ParticipantId;
use crate::viewport::{ViewportState, ZOOM_IN_FACTOR, ZOOM_OUT_FACTOR};

/// Mouse button identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MouseButton {
    Left,
    Right,
    Middle,
}

/// Pointer event type for unified mouse/touch handling.
///
/// Positions are in rendering-surface pixels.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PointerEvent {
    Down {
        position: Point,
        button: MouseButton,
    },
    Up {
        position: Point,
        button: MouseButton,
    },
    Move {
        position: Point,
    },
    Scroll {
        position: Point,
        delta: Vec2,
    },
}

/// Available tools.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum ToolKind {
    #[default]
    Pen,
    Eraser,
    Pan,
}

/// Color and width applied to new strokes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrokeStyle {
    pub color: String,
    pub width: f64,
}

impl Default for StrokeStyle {
    fn default() -> Self {
        Self {
            color: DEFAULT_STROKE_COLOR.to_string(),
            width: DEFAULT_STROKE_WIDTH,
        }
    }
}

/// State of a pointer interaction.
#[derive(Debug, Clone, Default)]
enum ToolState {
    #[default]
    Idle,
    Drawing {
        stroke: Stroke,
        erase: bool,
    },
    Panning {
        anchor: Point,
    },
}

/// Output of the translator.
#[derive(Debug, Clone, PartialEq)]
pub enum Gesture {
    /// The full accumulated stroke. `finished` is set on release.
    Stroke { event: AnnotationEvent, finished: bool },
    /// A new viewport value to apply and broadcast.
    Viewport(ViewportState),
    Clear(AnnotationEvent),
}

/// Turns raw pointer input into annotation and viewport events.
#[derive(Debug, Clone)]
pub struct InputTranslator {
    tool: ToolKind,
    style: StrokeStyle,
    state: ToolState,
    participant_id: ParticipantId,
}

impl InputTranslator {
    pub fn new(participant_id: ParticipantId) -> Self {
        Self {
            tool: ToolKind::default(),
            style: StrokeStyle::default(),
            state: ToolState::Idle,
            participant_id,
        }
    }

    pub fn tool(&self) -> ToolKind {
        self.tool
    }

    /// Switch tools. An in-progress gesture is abandoned.
    pub fn set_tool(&mut self, tool: ToolKind) {
        if tool != self.tool {
            self.tool = tool;
            self.state = ToolState::Idle;
        }
    }

    pub fn style(&self) -> &StrokeStyle {
        &self.style
    }

    pub fn set_color(&mut self, color: impl Into<String>) {
        self.style.color = color.into();
    }

    /// Non-finite or non-positive widths are ignored.
    pub fn set_width(&mut self, width: f64) {
        if width.is_finite() && width > 0.0 {
            self.style.width = width;
        }
    }

    /// Whether a stroke or pan is in progress.
    pub fn is_active(&self) -> bool {
        !matches!(self.state, ToolState::Idle)
    }

    /// Feed one pointer event.
    pub fn handle(
        &mut self,
        event: &PointerEvent,
        geometry: &SurfaceGeometry,
        viewport: &ViewportState,
    ) -> Option<Gesture> {
        match *event {
            PointerEvent::Down { position, button: MouseButton::Left } => {
                self.press(position, geometry, viewport);
                None
            }
            PointerEvent::Down { .. } => None,
            PointerEvent::Move { position } => self.drag(position, geometry, viewport),
            PointerEvent::Up { button: MouseButton::Left, .. } => self.release(),
            PointerEvent::Up { .. } => None,
            PointerEvent::Scroll { delta, .. } => {
                if delta.y < 0.0 {
                    Some(self.zoom(viewport, ZOOM_IN_FACTOR))
                } else if delta.y > 0.0 {
                    Some(self.zoom(viewport, ZOOM_OUT_FACTOR))
                } else {
                    None
                }
            }
        }
    }

    fn press(&mut self, position: Point, geometry: &SurfaceGeometry, viewport: &ViewportState) {
        if self.is_active() {
            return;
        }
        self.state = match self.tool {
            ToolKind::Pan => ToolState::Panning { anchor: position },
            ToolKind::Pen | ToolKind::Eraser => {
                let Some(first) = geometry.to_relative(position, viewport) else {
                    log::trace!("Press at {:?} is off the image", position);
                    return;
                };
                ToolState::Drawing {
                    stroke: Stroke::begin(first, self.style.color.clone(), self.style.width),
                    erase: self.tool == ToolKind::Eraser,
                }
            }
        };
    }

    fn drag(&mut self, position: Point, geometry: &SurfaceGeometry, viewport: &ViewportState) -> Option<Gesture> {
        match &mut self.state {
            ToolState::Idle => None,
            ToolState::Drawing { stroke, erase } => {
                let point = geometry.to_relative(position, viewport)?;
                stroke.add_point(point);
                let event = stroke_event(stroke, *erase, &self.participant_id);
                Some(Gesture::Stroke { event, finished: false })
            }
            ToolState::Panning { anchor } => {
                let delta = position - *anchor;
                *anchor = position;
                Some(Gesture::Viewport(viewport.panned(delta, &self.participant_id)))
            }
        }
    }

    fn release(&mut self) -> Option<Gesture> {
        match std::mem::take(&mut self.state) {
            ToolState::Drawing { stroke, erase } => {
                let event = stroke_event(&stroke, erase, &self.participant_id);
                Some(Gesture::Stroke { event, finished: true })
            }
            ToolState::Idle | ToolState::Panning { .. } => None,
        }
    }

    /// Zoom by `factor` (clamped), keeping the pan.
    pub fn zoom(&self, viewport: &ViewportState, factor: f64) -> Gesture {
        Gesture::Viewport(viewport.zoomed(factor, &self.participant_id))
    }

    /// Explicit clear action. Abandons any stroke in progress.
    pub fn clear(&mut self) -> Gesture {
        if matches!(self.state, ToolState::Drawing { .. }) {
            self.state = ToolState::Idle;
        }
        Gesture::Clear(AnnotationEvent::clear(self.participant_id.clone()))
    }
}

fn stroke_event(stroke: &Stroke, erase: bool, participant_id: &ParticipantId) -> AnnotationEvent {
    let action = if erase {
        AnnotationAction::Erase(stroke.clone())
    } else {
        AnnotationAction::Draw(stroke.clone())
    };
    AnnotationEvent::new(action, participant_id.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use kurbo::Size;

    fn setup() -> (InputTranslator, SurfaceGeometry, ViewportState) {
        let id = ParticipantId::from("a");
        (
            InputTranslator::new(id.clone()),
            SurfaceGeometry::new(Size::new(400.0, 300.0), Some(Size::new(800.0, 600.0))),
            ViewportState::new(id),
        )
    }

    fn down(x: f64, y: f64) -> PointerEvent {
        PointerEvent::Down { position: Point::new(x, y), button: MouseButton::Left }
    }

    fn up(x: f64, y: f64) -> PointerEvent {
        PointerEvent::Up { position: Point::new(x, y), button: MouseButton::Left }
    }

    fn mv(x: f64, y: f64) -> PointerEvent {
        PointerEvent::Move { position: Point::new(x, y) }
    }

    fn points(gesture: &Gesture) -> Vec<(f64, f64)> {
        match gesture {
            Gesture::Stroke { event, .. } => event
                .stroke()
                .map(|s| s.points.iter().map(|p| (p.x, p.y)).collect())
                .unwrap_or_default(),
            other => panic!("Expected stroke, got {:?}", other),
        }
    }

    #[test]
    fn test_stroke_accumulates_n_plus_one_points() {
        let (mut t, g, vp) = setup();
        assert!(t.handle(&down(40.0, 30.0), &g, &vp).is_none());

        let mut last_len = 1;
        for i in 1..=5 {
            let gesture = t.handle(&mv(40.0 + i as f64 * 10.0, 30.0), &g, &vp).unwrap();
            let len = points(&gesture).len();
            assert_eq!(len, last_len + 1);
            last_len = len;
        }

        let done = t.handle(&up(100.0, 30.0), &g, &vp).unwrap();
        assert!(matches!(done, Gesture::Stroke { finished: true, .. }));
        assert_eq!(points(&done).len(), 6);
        assert!(!t.is_active());
    }

    #[test]
    fn test_emissions_share_stroke_id() {
        let (mut t, g, vp) = setup();
        t.handle(&down(40.0, 30.0), &g, &vp);
        let a = t.handle(&mv(50.0, 30.0), &g, &vp).unwrap();
        let b = t.handle(&up(50.0, 30.0), &g, &vp).unwrap();
        let id = |g: &Gesture| match g {
            Gesture::Stroke { event, .. } => event.stroke().and_then(|s| s.id.clone()),
            _ => None,
        };
        assert!(id(&a).is_some());
        assert_eq!(id(&a), id(&b));
    }

    #[test]
    fn test_points_are_normalized() {
        let (mut t, g, vp) = setup();
        t.handle(&down(40.0, 30.0), &g, &vp);
        let gesture = t.handle(&mv(80.0, 30.0), &g, &vp).unwrap();
        let pts = points(&gesture);
        assert!((pts[0].0 - 10.0).abs() < 1e-9);
        assert!((pts[1].0 - 20.0).abs() < 1e-9);
        assert!((pts[1].1 - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_press_off_image_has_no_effect() {
        let (mut t, _, vp) = setup();
        // Square container with a 4:3 image leaves a band at the top.
        let g = SurfaceGeometry::new(Size::new(400.0, 400.0), Some(Size::new(800.0, 600.0)));
        t.handle(&down(200.0, 10.0), &g, &vp);
        assert!(!t.is_active());
        assert!(t.handle(&mv(200.0, 200.0), &g, &vp).is_none());
        assert!(t.handle(&up(200.0, 200.0), &g, &vp).is_none());
    }

    #[test]
    fn test_off_image_moves_dropped() {
        let (mut t, g, vp) = setup();
        t.handle(&down(40.0, 30.0), &g, &vp);
        assert!(t.handle(&mv(-50.0, 30.0), &g, &vp).is_none());
        assert!(t.is_active());
        let gesture = t.handle(&mv(60.0, 30.0), &g, &vp).unwrap();
        assert_eq!(points(&gesture).len(), 2);
    }

    #[test]
    fn test_eraser_emits_erase() {
        let (mut t, g, vp) = setup();
        t.set_tool(ToolKind::Eraser);
        t.handle(&down(40.0, 30.0), &g, &vp);
        match t.handle(&up(40.0, 30.0), &g, &vp) {
            Some(Gesture::Stroke { event, .. }) => assert!(event.is_erase()),
            other => panic!("Expected erase stroke, got {:?}", other),
        }
    }

    #[test]
    fn test_pan_emits_viewport_with_delta() {
        let (mut t, g, vp) = setup();
        t.set_tool(ToolKind::Pan);
        t.handle(&down(100.0, 100.0), &g, &vp);
        let first = match t.handle(&mv(110.0, 95.0), &g, &vp) {
            Some(Gesture::Viewport(state)) => state,
            other => panic!("Expected viewport, got {:?}", other),
        };
        assert_eq!(first.pan(), Vec2::new(10.0, -5.0));
        assert!((first.zoom - 1.0).abs() < f64::EPSILON);

        let second = match t.handle(&mv(120.0, 95.0), &g, &first) {
            Some(Gesture::Viewport(state)) => state,
            other => panic!("Expected viewport, got {:?}", other),
        };
        assert_eq!(second.pan(), Vec2::new(20.0, -5.0));
        assert!(t.handle(&up(120.0, 95.0), &g, &second).is_none());
        assert!(!t.is_active());
    }

    #[test]
    fn test_wheel_zoom_direction() {
        let (mut t, g, vp) = setup();
        let scroll = |dy| PointerEvent::Scroll { position: Point::ZERO, delta: Vec2::new(0.0, dy) };
        match t.handle(&scroll(-1.0), &g, &vp) {
            Some(Gesture::Viewport(state)) => assert!((state.zoom - 1.2).abs() < 1e-9),
            other => panic!("Expected zoom in, got {:?}", other),
        }
        match t.handle(&scroll(1.0), &g, &vp) {
            Some(Gesture::Viewport(state)) => assert!((state.zoom - 1.0 / 1.2).abs() < 1e-9),
            other => panic!("Expected zoom out, got {:?}", other),
        }
        assert!(t.handle(&scroll(0.0), &g, &vp).is_none());
    }

    #[test]
    fn test_tool_switch_abandons_stroke() {
        let (mut t, g, vp) = setup();
        t.handle(&down(40.0, 30.0), &g, &vp);
        t.set_tool(ToolKind::Pan);
        assert!(!t.is_active());
        assert!(t.handle(&up(40.0, 30.0), &g, &vp).is_none());
    }

    #[test]
    fn test_non_left_buttons_ignored() {
        let (mut t, g, vp) = setup();
        t.handle(&PointerEvent::Down { position: Point::new(40.0, 30.0), button: MouseButton::Right }, &g, &vp);
        assert!(!t.is_active());
    }

    #[test]
    fn test_style_applies_to_new_strokes() {
        let (mut t, g, vp) = setup();
        t.set_color("#00ff00");
        t.set_width(6.0);
        t.set_width(f64::NAN);
        t.handle(&down(40.0, 30.0), &g, &vp);
        match t.handle(&up(40.0, 30.0), &g, &vp) {
            Some(Gesture::Stroke { event, .. }) => {
                let stroke = event.stroke().unwrap();
                assert_eq!(stroke.color, "#00ff00");
                assert!((stroke.width - 6.0).abs() < f64::EPSILON);
            }
            other => panic!("Expected stroke, got {:?}", other),
        }
    }

    #[test]
    fn test_clear_gesture() {
        let (mut t, _, _) = setup();
        match t.clear() {
            Gesture::Clear(event) => assert!(event.is_clear()),
            other => panic!("Expected clear, got {:?}", other),
        }
    }
}
