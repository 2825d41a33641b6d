//! Types for document-service operations.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur talking to the document service.
#[derive(Debug, Error)]
pub enum DocServiceError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Not authenticated")]
    NotAuthenticated,

    #[error("HTTP {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Request timeout")]
    Timeout,
}

impl From<reqwest::Error> for DocServiceError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            DocServiceError::Timeout
        } else if e.is_connect() {
            DocServiceError::ConnectionFailed(e.to_string())
        } else if e.is_decode() {
            DocServiceError::InvalidResponse(e.to_string())
        } else {
            DocServiceError::ConnectionFailed(e.to_string())
        }
    }
}

/// One search condition: field identifier and the value to match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchCriterion {
    pub field: String,
    pub value: String,
}

impl SearchCriterion {
    pub fn new(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            value: value.into(),
        }
    }
}

/// A document as returned by search or link listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentSummary {
    pub id: String,
    pub title: Option<String>,
    pub content_type: Option<String>,
}

impl DocumentSummary {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: None,
            content_type: None,
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// File extension for the downloaded content, lowercase without dot.
    ///
    /// Derived from the content type, then the title, defaulting to `pdf`.
    pub fn extension(&self) -> String {
        let from_mime = self.content_type.as_deref().and_then(|mime| {
            let mime = mime.split(';').next().unwrap_or(mime).trim();
            match mime.to_ascii_lowercase().as_str() {
                "application/pdf" => Some("pdf"),
                "image/tiff" | "image/tif" => Some("tif"),
                "image/png" => Some("png"),
                "image/jpeg" | "image/jpg" => Some("jpg"),
                "image/bmp" => Some("bmp"),
                "text/plain" => Some("txt"),
                "application/msword" => Some("doc"),
                "application/vnd.openxmlformats-officedocument.wordprocessingml.document" => {
                    Some("docx")
                }
                _ => None,
            }
        });

        if let Some(ext) = from_mime {
            return ext.to_string();
        }

        self.title
            .as_deref()
            .and_then(|t| t.rsplit_once('.'))
            .map(|(_, ext)| ext.trim().to_ascii_lowercase())
            .filter(|ext| !ext.is_empty() && ext.len() <= 5 && ext.chars().all(|c| c.is_ascii_alphanumeric()))
            .unwrap_or_else(|| "pdf".to_string())
    }
}

/// A file cabinet on the document platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cabinet {
    pub id: String,
    pub name: String,
    /// `FileCabinet` or `Basket`.
    #[serde(rename = "type")]
    pub kind: String,
}

/// A search dialog of a cabinet, usable as a job's `dialog_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchDialog {
    pub id: String,
    pub display_name: String,
}

/// An index field of a cabinet. `db_name` is what search criteria name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CabinetField {
    pub db_name: String,
    pub display_name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub length: Option<u32>,
    pub is_required: bool,
}

impl CabinetField {
    pub fn new(db_name: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            db_name: db_name.into(),
            display_name: display_name.into(),
            kind: "Text".to_string(),
            length: None,
            is_required: false,
        }
    }
}

/// One index value of a stored document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexValue {
    pub name: String,
    pub value: Option<String>,
}

/// Metadata of a single document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentDetails {
    pub id: String,
    pub title: Option<String>,
    pub content_type: Option<String>,
    pub file_size: Option<u64>,
    pub fields: Vec<IndexValue>,
}

/// Client for the external document-management service.
///
/// Every call is bounded by the client's configured timeout. Callers treat
/// any error other than from `authenticate` as "no result".
#[async_trait]
pub trait DocumentService: Send + Sync {
    /// Open a session. An error here is fatal to the job.
    async fn authenticate(&self) -> Result<(), DocServiceError>;

    /// Run a dialog search in a cabinet. An empty list means no match.
    async fn search(
        &self,
        cabinet_id: &str,
        dialog_id: &str,
        criteria: &[SearchCriterion],
    ) -> Result<Vec<DocumentSummary>, DocServiceError>;

    /// Fetch the binary content of a document.
    async fn download(&self, document_id: &str, cabinet_id: &str)
        -> Result<Vec<u8>, DocServiceError>;

    /// Documents linked to the given one.
    async fn linked_documents(
        &self,
        document_id: &str,
        cabinet_id: &str,
    ) -> Result<Vec<DocumentSummary>, DocServiceError>;

    /// File cabinets visible to the service account.
    async fn list_cabinets(&self) -> Result<Vec<Cabinet>, DocServiceError>;

    /// Search dialogs of a cabinet. Store and result dialogs are left out.
    async fn list_dialogs(&self, cabinet_id: &str) -> Result<Vec<SearchDialog>, DocServiceError>;

    /// Index fields of a cabinet.
    async fn list_fields(&self, cabinet_id: &str) -> Result<Vec<CabinetField>, DocServiceError>;

    /// Metadata of one document. A missing document is an `Api` error with
    /// status 404.
    async fn document(
        &self,
        document_id: &str,
        cabinet_id: &str,
    ) -> Result<DocumentDetails, DocServiceError>;

    /// Close the session. Best effort.
    async fn close(&self) {}
}
