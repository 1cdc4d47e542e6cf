//! Annotation events and the session-scoped annotation list.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::geometry::NormalizedPoint;
use crate::protocol::{ParticipantId, ProtocolError};

/// Default stroke color for new strokes.
pub const DEFAULT_STROKE_COLOR: &str = "#ff0000";
/// Default stroke width in surface pixels at zoom 1.
pub const DEFAULT_STROKE_WIDTH: f64 = 3.0;

/// One continuous pointer gesture: an ordered polyline in image percentages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stroke {
    /// Points in gesture order.
    #[serde(rename = "puntos")]
    pub points: Vec<NormalizedPoint>,
    /// CSS color string.
    pub color: String,
    /// Stroke width in surface pixels at zoom 1.
    #[serde(rename = "grosor")]
    pub width: f64,
    /// Identity shared by every emission of the same gesture.
    #[serde(rename = "trazoId", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

impl Stroke {
    /// Start a new stroke with a fresh identity.
    pub fn begin(first: NormalizedPoint, color: impl Into<String>, width: f64) -> Self {
        Self {
            points: vec![first],
            color: color.into(),
            width,
            id: Some(Uuid::new_v4().to_string()),
        }
    }

    /// Append a point to the path.
    pub fn add_point(&mut self, point: NormalizedPoint) {
        self.points.push(point);
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

/// What an annotation event does.
#[derive(Debug, Clone, PartialEq)]
pub enum AnnotationAction {
    Draw(Stroke),
    /// Drawn in the background color over earlier strokes.
    Erase(Stroke),
    Clear,
}

/// A single annotation change, as exchanged in `evento-anotacion`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawAnnotationEvent", into = "RawAnnotationEvent")]
pub struct AnnotationEvent {
    pub action: AnnotationAction,
    pub timestamp: i64,
    pub participant_id: ParticipantId,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
enum RawKind {
    Draw,
    Erase,
    Clear,
}

#[derive(Serialize, Deserialize)]
struct RawAnnotationEvent {
    tipo: RawKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    datos: Option<Stroke>,
    timestamp: i64,
    #[serde(rename = "usuarioId")]
    usuario_id: ParticipantId,
}

impl TryFrom<RawAnnotationEvent> for AnnotationEvent {
    type Error = ProtocolError;

    fn try_from(raw: RawAnnotationEvent) -> Result<Self, Self::Error> {
        let action = match (raw.tipo, raw.datos) {
            (RawKind::Clear, _) => AnnotationAction::Clear,
            (RawKind::Draw, Some(stroke)) => AnnotationAction::Draw(stroke),
            (RawKind::Erase, Some(stroke)) => AnnotationAction::Erase(stroke),
            (kind, None) => {
                return Err(ProtocolError::InvalidAnnotation(format!(
                    "{:?} event without stroke data",
                    kind
                )));
            }
        };
        Ok(Self {
            action,
            timestamp: raw.timestamp,
            participant_id: raw.usuario_id,
        })
    }
}

impl From<AnnotationEvent> for RawAnnotationEvent {
    fn from(event: AnnotationEvent) -> Self {
        let (tipo, datos) = match event.action {
            AnnotationAction::Draw(stroke) => (RawKind::Draw, Some(stroke)),
            AnnotationAction::Erase(stroke) => (RawKind::Erase, Some(stroke)),
            AnnotationAction::Clear => (RawKind::Clear, None),
        };
        Self {
            tipo,
            datos,
            timestamp: event.timestamp,
            usuario_id: event.participant_id,
        }
    }
}

impl AnnotationEvent {
    pub fn new(action: AnnotationAction, participant_id: ParticipantId) -> Self {
        Self {
            action,
            timestamp: crate::protocol::now_millis(),
            participant_id,
        }
    }

    pub fn clear(participant_id: ParticipantId) -> Self {
        Self::new(AnnotationAction::Clear, participant_id)
    }

    /// The stroke carried by a draw/erase event.
    pub fn stroke(&self) -> Option<&Stroke> {
        match &self.action {
            AnnotationAction::Draw(stroke) | AnnotationAction::Erase(stroke) => Some(stroke),
            AnnotationAction::Clear => None,
        }
    }

    pub fn is_erase(&self) -> bool {
        matches!(self.action, AnnotationAction::Erase(_))
    }

    pub fn is_clear(&self) -> bool {
        matches!(self.action, AnnotationAction::Clear)
    }
}

/// Outcome of applying an event to an [`AnnotationList`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListChange {
    Appended,
    /// An emission of a stroke already in the list replaced it in place.
    Replaced(usize),
    Cleared,
}

/// Ordered, session-scoped list of strokes in arrival order.
///
/// Holds only draw/erase events; a clear empties it.
#[derive(Debug, Clone, Default)]
pub struct AnnotationList {
    entries: Vec<AnnotationEvent>,
}

impl AnnotationList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply an event: clear empties the list, strokes are upserted by stroke id.
    pub fn apply(&mut self, event: AnnotationEvent) -> ListChange {
        if event.is_clear() {
            self.entries.clear();
            return ListChange::Cleared;
        }

        let existing = event
            .stroke()
            .and_then(|s| s.id.as_deref())
            .and_then(|id| self.position_of(id));

        match existing {
            Some(index) => {
                self.entries[index] = event;
                ListChange::Replaced(index)
            }
            None => {
                self.entries.push(event);
                ListChange::Appended
            }
        }
    }

    fn position_of(&self, stroke_id: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|e| e.stroke().and_then(|s| s.id.as_deref()) == Some(stroke_id))
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &AnnotationEvent> {
        self.entries.iter()
    }

    pub fn as_slice(&self) -> &[AnnotationEvent] {
        &self.entries
    }
}
