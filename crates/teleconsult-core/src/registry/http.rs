//! REST implementation of the document registry.

use reqwest::multipart::{Form, Part};
use url::Url;

use super::{BoxFuture, DocumentRegistry, RegistryError, RegistryResult, SelectRequest};
use crate::document::{Document, UploadFile};

/// Registry backed by the session REST API.
pub struct HttpDocumentRegistry {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

impl HttpDocumentRegistry {
    /// * `base_url` - API root, e.g. `http://host:3000/api`.
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), base_url, token)
    }

    /// Reuse an existing [`reqwest::Client`] for connection pooling.
    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
        }
    }

    /// `{base_url}/sesiones/{session_id}/{leaf}`, with the session id escaped
    /// as a single path segment.
    fn session_url(&self, session_id: &str, leaf: &str) -> RegistryResult<Url> {
        let mut url = Url::parse(&self.base_url).map_err(|e| RegistryError::InvalidUrl(e.to_string()))?;
        url.path_segments_mut()
            .map_err(|_| RegistryError::InvalidUrl(self.base_url.clone()))?
            .pop_if_empty()
            .extend(["sesiones", session_id, leaf]);
        Ok(url)
    }

    fn documents_url(&self, session_id: &str) -> RegistryResult<Url> {
        self.session_url(session_id, "documentos")
    }

    fn active_url(&self, session_id: &str) -> RegistryResult<Url> {
        self.session_url(session_id, "documento-activo")
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if self.token.is_empty() {
            request
        } else {
            request.bearer_auth(&self.token)
        }
    }

    /// Turn a non-2xx response into [`RegistryError::Api`].
    async fn ensure_success(response: reqwest::Response) -> RegistryResult<reqwest::Response> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(RegistryError::Api {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    async fn parse_response<T: serde::de::DeserializeOwned>(response: reqwest::Response) -> RegistryResult<T> {
        let response = Self::ensure_success(response).await?;
        let bytes = response.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

impl DocumentRegistry for HttpDocumentRegistry {
    fn list(&self, session_id: &str) -> BoxFuture<'_, RegistryResult<Vec<Document>>> {
        let url = self.documents_url(session_id);
        Box::pin(async move {
            let url = url?;
            log::debug!("Listing documents: GET {}", url);
            let response = self.authorize(self.client.get(url)).send().await?;
            Self::parse_response(response).await
        })
    }

    fn select(&self, session_id: &str, request: &SelectRequest) -> BoxFuture<'_, RegistryResult<()>> {
        let url = self.active_url(session_id);
        let request = request.clone();
        Box::pin(async move {
            let url = url?;
            log::debug!("Selecting document {}: POST {}", request.document_id, url);
            let response = self.authorize(self.client.post(url)).json(&request).send().await?;
            Self::ensure_success(response).await?;
            Ok(())
        })
    }

    fn upload(&self, session_id: &str, file: UploadFile) -> BoxFuture<'_, RegistryResult<Document>> {
        let format = match file.validate() {
            Ok(format) => format,
            Err(rejection) => {
                log::warn!("Upload of {} rejected: {}", file.file_name, rejection);
                return Box::pin(std::future::ready(Err(rejection.into())));
            }
        };
        let url = self.documents_url(session_id);
        let category = file.resolved_category();

        Box::pin(async move {
            let url = url?;
            log::info!("Uploading {} ({} bytes)", file.file_name, file.bytes.len());
            let part = Part::bytes(file.bytes)
                .file_name(file.file_name)
                .mime_str(format.mime_type())?;
            let form = Form::new()
                .part("archivo", part)
                .text("categoria", category.as_str());

            let response = self.authorize(self.client.post(url)).multipart(form).send().await?;
            Self::parse_response(response).await
        })
    }
}
