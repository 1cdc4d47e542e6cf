//! Document registry client.
//!
//! The registry lists, selects and uploads the documents of a session. It is
//! independent of the live socket: participants learn about a selection
//! through the `cambio-documento` broadcast, not through this client.

mod http;
mod memory;

pub use http::HttpDocumentRegistry;
pub use memory::MemoryDocumentRegistry;

use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::document::{Document, UploadFile, UploadRejection};
use crate::protocol::ParticipantId;

/// Registry errors.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Refused locally before any request was made.
    #[error("Upload rejected: {0}")]
    Rejected(#[from] UploadRejection),
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("Registry error ({status}): {body}")]
    Api { status: u16, body: String },
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Invalid registry URL: {0}")]
    InvalidUrl(String),
}

/// Result type for registry operations.
pub type RegistryResult<T> = Result<T, RegistryError>;

/// Boxed future returned by registry operations.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + 'a>>;

/// Body of `POST /sesiones/{id}/documento-activo`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectRequest {
    #[serde(rename = "documentId")]
    pub document_id: String,
    #[serde(rename = "usuarioId", default, skip_serializing_if = "Option::is_none")]
    pub participant_id: Option<ParticipantId>,
}

impl SelectRequest {
    pub fn new(document_id: impl Into<String>) -> Self {
        Self {
            document_id: document_id.into(),
            participant_id: None,
        }
    }

    pub fn by(mut self, participant_id: ParticipantId) -> Self {
        self.participant_id = Some(participant_id);
        self
    }
}

/// Backend holding the documents of each session.
pub trait DocumentRegistry: Send + Sync {
    /// List the documents registered for a session.
    fn list(&self, session_id: &str) -> BoxFuture<'_, RegistryResult<Vec<Document>>>;

    /// Make a document the active one for a session.
    fn select(&self, session_id: &str, request: &SelectRequest) -> BoxFuture<'_, RegistryResult<()>>;

    /// Upload a file and register it.
    ///
    /// The file is validated before the future is created; a rejected file
    /// never reaches the backend.
    fn upload(&self, session_id: &str, file: UploadFile) -> BoxFuture<'_, RegistryResult<Document>>;
}

#[cfg(test)]
pub(crate) fn block_on<F: Future>(f: F) -> F::Output {
    use std::task::{Context, Poll, RawWaker, RawWakerVTable, Waker};

    fn dummy_raw_waker() -> RawWaker {
        fn no_op(_: *const ()) {}
        fn clone(_: *const ()) -> RawWaker {
            dummy_raw_waker()
        }
        static VTABLE: RawWakerVTable = RawWakerVTable::new(clone, no_op, no_op, no_op);
        RawWaker::new(std::ptr::null(), &VTABLE)
    }

    let waker = unsafe { Waker::from_raw(dummy_raw_waker()) };
    let mut cx = Context::from_waker(&waker);
    let mut f = std::pin::pin!(f);

    loop {
        match f.as_mut().poll(&mut cx) {
            Poll::Ready(result) => return result,
            Poll::Pending => {}
        }
    }
}
