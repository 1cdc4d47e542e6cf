//! Teleconsult Core Library
//!
//! Session logic for annotating a shared clinical document in real time:
//! coordinate normalization, the annotation model, input translation, the
//! live socket transport, the document registry client and the session
//! orchestrator that ties them together.

pub mod annotation;
pub mod config;
pub mod document;
pub mod geometry;
pub mod input;
pub mod protocol;
pub mod registry;
pub mod session;
pub mod transport;
pub mod viewport;

pub use annotation::{AnnotationAction, AnnotationEvent, AnnotationList, ListChange, Stroke};
pub use config::{ConfigError, SessionConfig};
pub use document::{Document, DocumentCategory, UploadFile, UploadRejection, MAX_UPLOAD_BYTES};
pub use geometry::{NormalizedPoint, SurfaceGeometry, to_pixel, to_relative};
pub use input::{Gesture, InputTranslator, MouseButton, PointerEvent, StrokeStyle, ToolKind};
pub use protocol::{Message, MessageKind, ParticipantId, ProtocolError};
pub use registry::{DocumentRegistry, HttpDocumentRegistry, MemoryDocumentRegistry, RegistryError, SelectRequest};
pub use session::{RequestTicket, SelectTicket, Session, SessionError, SessionNotice};
pub use transport::{ConnectionState, Transport, TransportError, TransportOptions};
pub use viewport::{MAX_ZOOM, MIN_ZOOM, ViewportState};
