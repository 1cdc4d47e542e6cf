//! In-memory document registry.

use std::collections::HashMap;
use std::sync::RwLock;

use uuid::Uuid;

use super::{BoxFuture, DocumentRegistry, RegistryError, RegistryResult, SelectRequest};
use crate::document::{Document, UploadFile};

/// In-memory registry for tests and offline hosts.
#[derive(Default)]
pub struct MemoryDocumentRegistry {
    documents: RwLock<HashMap<String, Vec<Document>>>,
    active: RwLock<HashMap<String, String>>,
}

fn lock_error(e: impl std::fmt::Display) -> RegistryError {
    RegistryError::Api {
        status: 500,
        body: format!("Lock error: {}", e),
    }
}

impl MemoryDocumentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a session with documents.
    pub fn with_documents(self, session_id: &str, documents: Vec<Document>) -> Self {
        if let Ok(mut map) = self.documents.write() {
            map.entry(session_id.to_string()).or_default().extend(documents);
        }
        self
    }

    /// Id of the active document for a session, if one was selected.
    pub fn active_document(&self, session_id: &str) -> Option<String> {
        self.active.read().ok()?.get(session_id).cloned()
    }
}

impl DocumentRegistry for MemoryDocumentRegistry {
    fn list(&self, session_id: &str) -> BoxFuture<'_, RegistryResult<Vec<Document>>> {
        let session_id = session_id.to_string();
        Box::pin(async move {
            let docs = self.documents.read().map_err(lock_error)?;
            Ok(docs.get(&session_id).cloned().unwrap_or_default())
        })
    }

    fn select(&self, session_id: &str, request: &SelectRequest) -> BoxFuture<'_, RegistryResult<()>> {
        let session_id = session_id.to_string();
        let document_id = request.document_id.clone();
        Box::pin(async move {
            let known = self
                .documents
                .read()
                .map_err(lock_error)?
                .get(&session_id)
                .is_some_and(|docs| docs.iter().any(|d| d.id == document_id));
            if !known {
                return Err(RegistryError::Api {
                    status: 404,
                    body: format!("Document not found: {}", document_id),
                });
            }
            self.active.write().map_err(lock_error)?.insert(session_id, document_id);
            Ok(())
        })
    }

    fn upload(&self, session_id: &str, file: UploadFile) -> BoxFuture<'_, RegistryResult<Document>> {
        if let Err(rejection) = file.validate() {
            return Box::pin(std::future::ready(Err(rejection.into())));
        }
        let session_id = session_id.to_string();
        Box::pin(async move {
            let id = Uuid::new_v4().to_string();
            let document = Document {
                url: format!("memory://{}/{}", session_id, id),
                thumbnail_url: None,
                name: file.file_name.clone(),
                category: file.resolved_category(),
                uploaded_at: Some(chrono::Utc::now()),
                id,
            };
            self.documents
                .write()
                .map_err(lock_error)?
                .entry(session_id)
                .or_default()
                .push(document.clone());
            Ok(document)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{DocumentCategory, MAX_UPLOAD_BYTES};
    use crate::registry::block_on;

    fn doc(id: &str) -> Document {
        Document {
            id: id.to_string(),
            name: format!("Doc {}", id),
            thumbnail_url: None,
            url: format!("/f/{}", id),
            category: DocumentCategory::Scan,
            uploaded_at: None,
        }
    }

    #[test]
    fn test_list_is_per_session() {
        let registry = MemoryDocumentRegistry::new()
            .with_documents("s1", vec![doc("a"), doc("b")])
            .with_documents("s2", vec![doc("c")]);

        assert_eq!(block_on(registry.list("s1")).unwrap().len(), 2);
        assert_eq!(block_on(registry.list("s2")).unwrap().len(), 1);
        assert!(block_on(registry.list("other")).unwrap().is_empty());
    }

    #[test]
    fn test_select_known_and_unknown() {
        let registry = MemoryDocumentRegistry::new().with_documents("s1", vec![doc("a")]);

        block_on(registry.select("s1", &SelectRequest::new("a"))).unwrap();
        assert_eq!(registry.active_document("s1").as_deref(), Some("a"));

        let result = block_on(registry.select("s1", &SelectRequest::new("zzz")));
        assert!(matches!(result, Err(RegistryError::Api { status: 404, .. })));
        assert_eq!(registry.active_document("s1").as_deref(), Some("a"));
    }

    #[test]
    fn test_upload_registers_document() {
        let registry = MemoryDocumentRegistry::new();
        let file = UploadFile::new("foto.jpg", "image/jpeg", vec![0xFF, 0xD8, 0xFF, 0xE0]);

        let uploaded = block_on(registry.upload("s1", file)).unwrap();
        assert_eq!(uploaded.category, DocumentCategory::Photo);
        assert_eq!(block_on(registry.list("s1")).unwrap(), vec![uploaded]);
    }

    #[test]
    fn test_rejected_upload_registers_nothing() {
        let registry = MemoryDocumentRegistry::new();
        let file = UploadFile::new("big.pdf", "application/pdf", vec![0; MAX_UPLOAD_BYTES + 1]);

        assert!(matches!(block_on(registry.upload("s1", file)), Err(RegistryError::Rejected(_))));
        assert!(block_on(registry.list("s1")).unwrap().is_empty());
    }
}
