//! Wire protocol for the live session socket.
//!
//! Every frame is a JSON envelope `{ "type": ..., "data": ... }`. The
//! envelope is modelled as a tagged union so each listener sees a fully typed
//! payload for its event kind.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::annotation::AnnotationEvent;
use crate::document::Document;
use crate::viewport::ViewportState;

/// Protocol errors.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Malformed envelope: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("Invalid annotation event: {0}")]
    InvalidAnnotation(String),
}

/// Socket URL query parameter naming the connecting participant.
pub const PARTICIPANT_PARAM: &str = "usuarioId";
/// Socket URL query parameter carrying the participant's display name.
pub const NAME_PARAM: &str = "nombre";

/// Milliseconds since the Unix epoch, the timestamp unit used on the wire.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Opaque identifier distinguishing participants.
///
/// Peers may send it as a JSON string or number; it is always written back as
/// a string.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "RawParticipantId")]
pub struct ParticipantId(String);

#[derive(Deserialize)]
#[serde(untagged)]
enum RawParticipantId {
    Text(String),
    Number(i64),
}

impl From<RawParticipantId> for ParticipantId {
    fn from(raw: RawParticipantId) -> Self {
        match raw {
            RawParticipantId::Text(s) => ParticipantId(s),
            RawParticipantId::Number(n) => ParticipantId(n.to_string()),
        }
    }
}

impl ParticipantId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ParticipantId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ParticipantId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Payload of the `authenticate` message.
#[derive(Clone, Serialize, Deserialize)]
pub struct AuthPayload {
    pub token: String,
}

impl fmt::Debug for AuthPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthPayload").field("token", &"<redacted>").finish()
    }
}

/// Payload of `cambio-documento`: the active document changed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentChange {
    #[serde(rename = "documentoId")]
    pub document_id: String,
    #[serde(rename = "documento", default, skip_serializing_if = "Option::is_none")]
    pub document: Option<Document>,
    pub timestamp: i64,
    #[serde(rename = "usuarioId")]
    pub participant_id: ParticipantId,
}

/// Payload of `usuario-conectado` / `usuario-desconectado`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Presence {
    #[serde(rename = "usuarioId")]
    pub participant_id: ParticipantId,
    #[serde(rename = "nombre", default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Payload of `error`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    #[serde(rename = "mensaje")]
    pub message: String,
}

/// A message exchanged over the session socket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum Message {
    /// Sent once per opened connection, before anything else.
    #[serde(rename = "authenticate")]
    Authenticate(AuthPayload),
    /// Stroke drawn/erased or the board cleared.
    #[serde(rename = "evento-anotacion")]
    Annotation(AnnotationEvent),
    /// Zoom/pan changed.
    #[serde(rename = "evento-viewport")]
    Viewport(ViewportState),
    /// The shared document changed.
    #[serde(rename = "cambio-documento")]
    DocumentChanged(DocumentChange),
    #[serde(rename = "usuario-conectado")]
    ParticipantJoined(Presence),
    #[serde(rename = "usuario-desconectado")]
    ParticipantLeft(Presence),
    /// Remote error, or a locally synthesized transport failure.
    #[serde(rename = "error")]
    Error(ErrorPayload),
}

/// Discriminant of [`Message`], used to key listeners.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Authenticate,
    Annotation,
    Viewport,
    DocumentChanged,
    ParticipantJoined,
    ParticipantLeft,
    Error,
}

impl MessageKind {
    /// Wire name of this kind.
    pub fn wire_name(self) -> &'static str {
        match self {
            MessageKind::Authenticate => "authenticate",
            MessageKind::Annotation => "evento-anotacion",
            MessageKind::Viewport => "evento-viewport",
            MessageKind::DocumentChanged => "cambio-documento",
            MessageKind::ParticipantJoined => "usuario-conectado",
            MessageKind::ParticipantLeft => "usuario-desconectado",
            MessageKind::Error => "error",
        }
    }
}

impl Message {
    pub fn kind(&self) -> MessageKind {
        match self {
            Message::Authenticate(_) => MessageKind::Authenticate,
            Message::Annotation(_) => MessageKind::Annotation,
            Message::Viewport(_) => MessageKind::Viewport,
            Message::DocumentChanged(_) => MessageKind::DocumentChanged,
            Message::ParticipantJoined(_) => MessageKind::ParticipantJoined,
            Message::ParticipantLeft(_) => MessageKind::ParticipantLeft,
            Message::Error(_) => MessageKind::Error,
        }
    }

    /// Build an `authenticate` message.
    pub fn authenticate(token: impl Into<String>) -> Self {
        Message::Authenticate(AuthPayload { token: token.into() })
    }

    /// Build an `error` message.
    pub fn error(message: impl Into<String>) -> Self {
        Message::Error(ErrorPayload { message: message.into() })
    }

    pub fn to_json(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(json)?)
    }
}
