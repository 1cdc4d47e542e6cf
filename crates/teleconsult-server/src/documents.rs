//! In-memory document registry and its REST handlers.

use std::sync::Arc;

use axum::Json;
use axum::extract::multipart::MultipartError;
use axum::extract::{Multipart, Path, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use chrono::Utc;
use dashmap::DashMap;
use teleconsult_core::document::{Document, DocumentCategory, FileFormat, UploadFile, UploadRejection};
use teleconsult_core::protocol::{DocumentChange, ErrorPayload, Message, ParticipantId, now_millis};
use teleconsult_core::registry::SelectRequest;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::AppState;
use crate::rooms::SERVER_SENDER;

/// Multipart field carrying the file.
const FILE_FIELD: &str = "archivo";
/// Multipart field carrying the category name.
const CATEGORY_FIELD: &str = "categoria";

/// Uploaded file contents, served back under `/archivos/{id}`.
#[derive(Debug, Clone)]
pub struct StoredFile {
    pub format: FileFormat,
    pub bytes: Bytes,
}

#[derive(Default)]
struct SessionDocuments {
    documents: Vec<Document>,
    active: Option<String>,
}

/// Documents of every session, held in memory.
pub struct DocumentStore {
    sessions: DashMap<String, SessionDocuments>,
    files: DashMap<String, StoredFile>,
    public_url: String,
}

impl DocumentStore {
    pub fn new(public_url: impl Into<String>) -> Self {
        Self {
            sessions: DashMap::new(),
            files: DashMap::new(),
            public_url: public_url.into(),
        }
    }

    pub fn list(&self, session_id: &str) -> Vec<Document> {
        self.sessions
            .get(session_id)
            .map(|s| s.documents.clone())
            .unwrap_or_default()
    }

    /// Validate and register an upload. Nothing is stored on rejection.
    pub fn insert(&self, session_id: &str, upload: UploadFile) -> Result<Document, UploadRejection> {
        let format = upload.validate()?;
        let id = Uuid::new_v4().to_string();
        let url = format!("{}/archivos/{}", self.public_url, id);
        let thumbnail_url = (format != FileFormat::Pdf).then(|| url.clone());
        let document = Document {
            id: id.clone(),
            name: upload.file_name.clone(),
            thumbnail_url,
            url,
            category: upload.resolved_category(),
            uploaded_at: Some(Utc::now()),
        };

        self.files.insert(
            id,
            StoredFile {
                format,
                bytes: Bytes::from(upload.bytes),
            },
        );
        self.sessions
            .entry(session_id.to_string())
            .or_default()
            .documents
            .push(document.clone());
        Ok(document)
    }

    /// Mark a document active. `None` if the session has no such document.
    pub fn select(&self, session_id: &str, document_id: &str) -> Option<Document> {
        let mut session = self.sessions.get_mut(session_id)?;
        let document = session.documents.iter().find(|d| d.id == document_id)?.clone();
        session.active = Some(document.id.clone());
        Some(document)
    }

    pub fn active(&self, session_id: &str) -> Option<Document> {
        let session = self.sessions.get(session_id)?;
        let active = session.active.as_deref()?;
        session.documents.iter().find(|d| d.id == active).cloned()
    }

    pub fn file(&self, id: &str) -> Option<StoredFile> {
        self.files.get(id).map(|f| f.value().clone())
    }
}

/// REST failures, rendered as an `{mensaje}` body.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    BadRequest(String),
    #[error(transparent)]
    Rejected(#[from] UploadRejection),
    #[error(transparent)]
    Multipart(#[from] MultipartError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Rejected(UploadRejection::TooLarge { .. }) => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::Rejected(UploadRejection::UnsupportedType(_)) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            ApiError::Rejected(UploadRejection::Empty) => StatusCode::BAD_REQUEST,
            ApiError::Multipart(e) => e.status(),
        };
        let body = ErrorPayload {
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

/// `GET /sesiones/{session_id}/documentos`
pub async fn list_documents(
    Path(session_id): Path<String>,
    State(state): State<Arc<AppState>>,
) -> Json<Vec<Document>> {
    Json(state.documents.list(&session_id))
}

/// `POST /sesiones/{session_id}/documentos`, multipart `archivo` + optional `categoria`.
pub async fn upload_document(
    Path(session_id): Path<String>,
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<Document>), ApiError> {
    let mut upload: Option<UploadFile> = None;
    let mut category: Option<DocumentCategory> = None;

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some(FILE_FIELD) => {
                let file_name = field.file_name().unwrap_or("documento").to_string();
                let mime_type = field.content_type().unwrap_or_default().to_string();
                let bytes = field.bytes().await?;
                upload = Some(UploadFile::new(file_name, mime_type, bytes.to_vec()));
            }
            Some(CATEGORY_FIELD) => {
                let text = field.text().await?;
                category = Some(
                    DocumentCategory::from_name(&text)
                        .ok_or_else(|| ApiError::BadRequest(format!("Unknown category: {}", text)))?,
                );
            }
            _ => {}
        }
    }

    let mut upload = upload.ok_or_else(|| ApiError::BadRequest(format!("Missing field `{}`", FILE_FIELD)))?;
    if let Some(category) = category {
        upload = upload.with_category(category);
    }

    match state.documents.insert(&session_id, upload) {
        Ok(document) => {
            info!("Session {}: registered {} ({})", session_id, document.name, document.id);
            Ok((StatusCode::CREATED, Json(document)))
        }
        Err(rejection) => {
            warn!("Session {}: upload rejected: {}", session_id, rejection);
            Err(rejection.into())
        }
    }
}

/// `POST /sesiones/{session_id}/documento-activo`
///
/// Broadcasts `cambio-documento` to every participant, the requester included.
pub async fn select_document(
    Path(session_id): Path<String>,
    State(state): State<Arc<AppState>>,
    Json(request): Json<SelectRequest>,
) -> Result<StatusCode, ApiError> {
    let document = state
        .documents
        .select(&session_id, &request.document_id)
        .ok_or_else(|| ApiError::NotFound(format!("Unknown document: {}", request.document_id)))?;

    let change = DocumentChange {
        document_id: document.id.clone(),
        document: Some(document),
        timestamp: now_millis(),
        participant_id: request
            .participant_id
            .unwrap_or_else(|| ParticipantId::from(SERVER_SENDER)),
    };
    let delivered = state
        .rooms
        .broadcast(&session_id, SERVER_SENDER, Message::DocumentChanged(change));
    info!(
        "Session {}: active document {} ({} receivers)",
        session_id, request.document_id, delivered
    );
    Ok(StatusCode::NO_CONTENT)
}

/// `GET /archivos/{id}`
pub async fn get_file(
    Path(id): Path<String>,
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
    let file = state
        .documents
        .file(&id)
        .ok_or_else(|| ApiError::NotFound(format!("Unknown file: {}", id)))?;
    Ok(([(header::CONTENT_TYPE, file.format.mime_type())], file.bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    const PNG: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0];

    fn store() -> DocumentStore {
        DocumentStore::new("http://files.test")
    }

    #[test]
    fn test_insert_lists_per_session() {
        let store = store();
        let doc = store
            .insert("s1", UploadFile::new("rx.png", "image/png", PNG.to_vec()))
            .unwrap();
        assert_eq!(doc.url, format!("http://files.test/archivos/{}", doc.id));
        assert_eq!(doc.thumbnail_url.as_deref(), Some(doc.url.as_str()));
        assert_eq!(doc.category, DocumentCategory::Scan);
        assert!(doc.uploaded_at.is_some());

        assert_eq!(store.list("s1"), vec![doc.clone()]);
        assert!(store.list("s2").is_empty());
        assert_eq!(store.file(&doc.id).unwrap().bytes.as_ref(), PNG);
    }

    #[test]
    fn test_pdf_has_no_thumbnail() {
        let store = store();
        let doc = store
            .insert("s1", UploadFile::new("informe.pdf", "application/pdf", b"%PDF-1.7".to_vec()))
            .unwrap();
        assert!(doc.thumbnail_url.is_none());
        assert_eq!(doc.category, DocumentCategory::ReportFile);
    }

    #[test]
    fn test_rejected_upload_stores_nothing() {
        let store = store();
        let result = store.insert("s1", UploadFile::new("a.exe", "application/x-msdownload", vec![1]));
        assert!(matches!(result, Err(UploadRejection::UnsupportedType(_))));
        assert!(store.list("s1").is_empty());
        assert!(store.files.is_empty());
    }

    #[test]
    fn test_select_and_active() {
        let store = store();
        let a = store.insert("s1", UploadFile::new("a.png", "image/png", PNG.to_vec())).unwrap();
        let b = store.insert("s1", UploadFile::new("b.png", "image/png", PNG.to_vec())).unwrap();
        assert!(store.active("s1").is_none());

        assert_eq!(store.select("s1", &b.id), Some(b.clone()));
        assert_eq!(store.active("s1"), Some(b));
        assert_eq!(store.select("s1", &a.id), Some(a.clone()));
        assert_eq!(store.active("s1"), Some(a.clone()));

        assert!(store.select("s1", "missing").is_none());
        assert!(store.select("s2", &a.id).is_none());
        assert_eq!(store.active("s1"), Some(a));
    }

    #[test]
    fn test_error_statuses() {
        let too_large = ApiError::from(UploadRejection::TooLarge { size: 2, limit: 1 }).into_response();
        assert_eq!(too_large.status(), StatusCode::PAYLOAD_TOO_LARGE);
        let missing = ApiError::NotFound("x".into()).into_response();
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);
        let unsupported = ApiError::from(UploadRejection::UnsupportedType("x".into())).into_response();
        assert_eq!(unsupported.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
    }
}
