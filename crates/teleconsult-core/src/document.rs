//! Documents shared in a session and upload validation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Largest accepted upload, in bytes.
pub const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

/// MIME types accepted for upload.
pub const ALLOWED_MIME_TYPES: &[&str] = &[
    "image/png",
    "image/jpeg",
    "image/webp",
    "image/gif",
    "image/bmp",
    "application/pdf",
];

/// Kind of clinical document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DocumentCategory {
    Scan,
    Photo,
    ReportFile,
    VolumetricScan,
}

impl DocumentCategory {
    /// Best-effort category for an upload that did not name one.
    pub fn from_mime(mime: &str) -> Self {
        match mime {
            "application/pdf" => DocumentCategory::ReportFile,
            "image/jpeg" | "image/webp" => DocumentCategory::Photo,
            _ => DocumentCategory::Scan,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentCategory::Scan => "scan",
            DocumentCategory::Photo => "photo",
            DocumentCategory::ReportFile => "report-file",
            DocumentCategory::VolumetricScan => "volumetric-scan",
        }
    }

    /// Inverse of [`DocumentCategory::as_str`].
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim() {
            "scan" => Some(DocumentCategory::Scan),
            "photo" => Some(DocumentCategory::Photo),
            "report-file" => Some(DocumentCategory::ReportFile),
            "volumetric-scan" => Some(DocumentCategory::VolumetricScan),
            _ => None,
        }
    }
}

/// A document registered for a session. Owned by the registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    #[serde(rename = "nombre")]
    pub name: String,
    #[serde(rename = "miniaturaUrl", default)]
    pub thumbnail_url: Option<String>,
    /// Full-resolution reference.
    pub url: String,
    #[serde(rename = "categoria")]
    pub category: DocumentCategory,
    #[serde(rename = "fechaSubida", default, skip_serializing_if = "Option::is_none")]
    pub uploaded_at: Option<DateTime<Utc>>,
}

/// File format recognised for uploads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    Png,
    Jpeg,
    WebP,
    Gif,
    Bmp,
    Pdf,
}

impl FileFormat {
    pub fn mime_type(&self) -> &'static str {
        match self {
            FileFormat::Png => "image/png",
            FileFormat::Jpeg => "image/jpeg",
            FileFormat::WebP => "image/webp",
            FileFormat::Gif => "image/gif",
            FileFormat::Bmp => "image/bmp",
            FileFormat::Pdf => "application/pdf",
        }
    }

    pub fn from_mime(mime: &str) -> Option<Self> {
        let essence = mime.split(';').next().unwrap_or_default().trim().to_ascii_lowercase();
        match essence.as_str() {
            "image/png" => Some(FileFormat::Png),
            "image/jpeg" | "image/jpg" => Some(FileFormat::Jpeg),
            "image/webp" => Some(FileFormat::WebP),
            "image/gif" => Some(FileFormat::Gif),
            "image/bmp" => Some(FileFormat::Bmp),
            "application/pdf" => Some(FileFormat::Pdf),
            _ => None,
        }
    }

    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "png" => Some(FileFormat::Png),
            "jpg" | "jpeg" => Some(FileFormat::Jpeg),
            "webp" => Some(FileFormat::WebP),
            "gif" => Some(FileFormat::Gif),
            "bmp" => Some(FileFormat::Bmp),
            "pdf" => Some(FileFormat::Pdf),
            _ => None,
        }
    }

    /// Detect format from magic bytes.
    pub fn from_magic_bytes(data: &[u8]) -> Option<Self> {
        if data.len() < 4 {
            return None;
        }
        if data.starts_with(&[0x89, 0x50, 0x4E, 0x47]) {
            return Some(FileFormat::Png);
        }
        if data.starts_with(&[0xFF, 0xD8, 0xFF]) {
            return Some(FileFormat::Jpeg);
        }
        if data.len() >= 12 && &data[0..4] == b"RIFF" && &data[8..12] == b"WEBP" {
            return Some(FileFormat::WebP);
        }
        if data.starts_with(b"GIF8") {
            return Some(FileFormat::Gif);
        }
        if data.starts_with(b"BM") {
            return Some(FileFormat::Bmp);
        }
        if data.starts_with(b"%PDF") {
            return Some(FileFormat::Pdf);
        }
        None
    }
}

/// Why an upload was refused before reaching the network.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UploadRejection {
    #[error("File is empty")]
    Empty,
    #[error("File is {size} bytes, the limit is {limit} bytes")]
    TooLarge { size: usize, limit: usize },
    #[error("Unsupported file type: {0}")]
    UnsupportedType(String),
}

/// A file selected for upload.
#[derive(Clone)]
pub struct UploadFile {
    pub file_name: String,
    /// Declared MIME type; may be empty when the host could not tell.
    pub mime_type: String,
    pub bytes: Vec<u8>,
    pub category: Option<DocumentCategory>,
}

impl std::fmt::Debug for UploadFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadFile")
            .field("file_name", &self.file_name)
            .field("mime_type", &self.mime_type)
            .field("size", &self.bytes.len())
            .field("category", &self.category)
            .finish()
    }
}

impl UploadFile {
    pub fn new(file_name: impl Into<String>, mime_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            file_name: file_name.into(),
            mime_type: mime_type.into(),
            bytes,
            category: None,
        }
    }

    pub fn with_category(mut self, category: DocumentCategory) -> Self {
        self.category = Some(category);
        self
    }

    /// Format from the declared MIME type, falling back to content sniffing
    /// and then the file extension when nothing was declared.
    pub fn format(&self) -> Option<FileFormat> {
        if !self.mime_type.trim().is_empty() {
            return FileFormat::from_mime(&self.mime_type);
        }
        FileFormat::from_magic_bytes(&self.bytes).or_else(|| {
            self.file_name
                .rsplit_once('.')
                .and_then(|(_, ext)| FileFormat::from_extension(ext))
        })
    }

    /// Category to register the upload under.
    pub fn resolved_category(&self) -> DocumentCategory {
        self.category.unwrap_or_else(|| {
            self.format()
                .map(|f| DocumentCategory::from_mime(f.mime_type()))
                .unwrap_or(DocumentCategory::Scan)
        })
    }

    /// Check type and size limits.
    pub fn validate(&self) -> Result<FileFormat, UploadRejection> {
        if self.bytes.is_empty() {
            return Err(UploadRejection::Empty);
        }
        if self.bytes.len() > MAX_UPLOAD_BYTES {
            return Err(UploadRejection::TooLarge {
                size: self.bytes.len(),
                limit: MAX_UPLOAD_BYTES,
            });
        }
        self.format().ok_or_else(|| {
            let declared = if self.mime_type.is_empty() {
                self.file_name.clone()
            } else {
                self.mime_type.clone()
            };
            UploadRejection::UnsupportedType(declared)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_json_shape() {
        let json = r#"{
            "id": "d1",
            "nombre": "Panorámica",
            "miniaturaUrl": "/thumbs/d1.png",
            "url": "/files/d1.png",
            "categoria": "volumetric-scan",
            "fechaSubida": "2024-03-01T10:00:00Z"
        }"#;
        let doc: Document = serde_json::from_str(json).unwrap();
        assert_eq!(doc.name, "Panorámica");
        assert_eq!(doc.category, DocumentCategory::VolumetricScan);
        assert!(doc.uploaded_at.is_some());
    }

    #[test]
    fn test_document_without_optional_fields() {
        let json = r#"{"id":"d2","nombre":"Informe","url":"/f/d2.pdf","categoria":"report-file"}"#;
        let doc: Document = serde_json::from_str(json).unwrap();
        assert!(doc.thumbnail_url.is_none());
        assert!(doc.uploaded_at.is_none());
    }

    #[test]
    fn test_allowed_types_accepted() {
        for mime in ALLOWED_MIME_TYPES {
            let file = UploadFile::new("f", *mime, vec![1, 2, 3]);
            assert!(file.validate().is_ok(), "{mime} should be accepted");
        }
    }

    #[test]
    fn test_disallowed_type_rejected() {
        let file = UploadFile::new("notes.txt", "text/plain", b"hello".to_vec());
        assert_eq!(
            file.validate(),
            Err(UploadRejection::UnsupportedType("text/plain".to_string()))
        );
    }

    #[test]
    fn test_oversized_rejected() {
        let file = UploadFile::new("big.png", "image/png", vec![0; MAX_UPLOAD_BYTES + 1]);
        assert!(matches!(file.validate(), Err(UploadRejection::TooLarge { .. })));
    }

    #[test]
    fn test_exact_limit_accepted() {
        let file = UploadFile::new("edge.png", "image/png", vec![0; MAX_UPLOAD_BYTES]);
        assert_eq!(file.validate(), Ok(FileFormat::Png));
    }

    #[test]
    fn test_sniffs_when_mime_missing() {
        let file = UploadFile::new("scan", "", b"%PDF-1.7 ...".to_vec());
        assert_eq!(file.validate(), Ok(FileFormat::Pdf));
        assert_eq!(file.resolved_category(), DocumentCategory::ReportFile);
    }

    #[test]
    fn test_explicit_category_wins() {
        let file = UploadFile::new("x.png", "image/png", vec![1])
            .with_category(DocumentCategory::VolumetricScan);
        assert_eq!(file.resolved_category(), DocumentCategory::VolumetricScan);
    }

    #[test]
    fn test_category_names() {
        for category in [
            DocumentCategory::Scan,
            DocumentCategory::Photo,
            DocumentCategory::ReportFile,
            DocumentCategory::VolumetricScan,
        ] {
            assert_eq!(DocumentCategory::from_name(category.as_str()), Some(category));
        }
        assert_eq!(DocumentCategory::from_name("x-ray"), None);
    }
}
