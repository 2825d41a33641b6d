//! Mock document service for testing.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::docservice::{
    Cabinet, CabinetField, DocServiceError, DocumentDetails, DocumentService, DocumentSummary,
    SearchCriterion, SearchDialog,
};

/// Callback run at the start of every search with the first criterion value.
pub type SearchHook = Arc<dyn Fn(&str) + Send + Sync>;

/// Mock implementation of the DocumentService trait.
///
/// Documents are registered under a search value; a search matches when any
/// of its criteria carries that value.
///
/// # Example
///
/// ```rust,ignore
/// use docfetch_core::testing::MockDocumentService;
///
/// let docs = MockDocumentService::new();
/// docs.add_document("INV-1", "doc-1", b"%PDF-1.4").await;
/// docs.fail_download("doc-1").await;
/// ```
#[derive(Default)]
pub struct MockDocumentService {
    /// Search value -> matching documents.
    matches: Arc<RwLock<HashMap<String, Vec<DocumentSummary>>>>,
    /// Document id -> content.
    contents: Arc<RwLock<HashMap<String, Vec<u8>>>>,
    /// Document id -> linked documents.
    links: Arc<RwLock<HashMap<String, Vec<DocumentSummary>>>>,
    failing_searches: Arc<RwLock<HashSet<String>>>,
    failing_downloads: Arc<RwLock<HashSet<String>>>,
    fail_authentication: Arc<RwLock<bool>>,
    /// Recorded search criteria, in call order.
    searches: Arc<RwLock<Vec<Vec<SearchCriterion>>>>,
    authentications: Arc<RwLock<usize>>,
    search_hook: Arc<RwLock<Option<SearchHook>>>,
    cabinets: Arc<RwLock<Vec<Cabinet>>>,
    /// Cabinet id -> search dialogs.
    dialogs: Arc<RwLock<HashMap<String, Vec<SearchDialog>>>>,
    /// Cabinet id -> index fields.
    fields: Arc<RwLock<HashMap<String, Vec<CabinetField>>>>,
    /// When set, calls fail with `NotAuthenticated` until `authenticate`.
    session_expired: Arc<RwLock<bool>>,
}

impl MockDocumentService {
    /// Create a new mock with no documents.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a PDF document found by `search_value`.
    pub async fn add_document(&self, search_value: &str, document_id: &str, content: &[u8]) {
        self.add_document_with_type(search_value, document_id, "application/pdf", content)
            .await;
    }

    /// Register a document with an explicit content type.
    pub async fn add_document_with_type(
        &self,
        search_value: &str,
        document_id: &str,
        content_type: &str,
        content: &[u8],
    ) {
        self.matches
            .write()
            .await
            .entry(search_value.to_string())
            .or_default()
            .push(DocumentSummary::new(document_id).with_content_type(content_type));
        self.contents
            .write()
            .await
            .insert(document_id.to_string(), content.to_vec());
    }

    /// Link a PDF document to `parent_id`.
    pub async fn add_link(&self, parent_id: &str, document_id: &str, content: &[u8]) {
        self.links
            .write()
            .await
            .entry(parent_id.to_string())
            .or_default()
            .push(DocumentSummary::new(document_id).with_content_type("application/pdf"));
        self.contents
            .write()
            .await
            .insert(document_id.to_string(), content.to_vec());
    }

    /// Make searches for `search_value` fail with a connection error.
    pub async fn fail_search(&self, search_value: &str) {
        self.failing_searches
            .write()
            .await
            .insert(search_value.to_string());
    }

    /// Make downloads of `document_id` fail.
    pub async fn fail_download(&self, document_id: &str) {
        self.failing_downloads
            .write()
            .await
            .insert(document_id.to_string());
    }

    /// Make `authenticate` fail.
    pub async fn set_fail_authentication(&self, fail: bool) {
        *self.fail_authentication.write().await = fail;
    }

    /// Install a callback run at the start of each search.
    pub async fn set_search_hook(&self, hook: SearchHook) {
        *self.search_hook.write().await = Some(hook);
    }

    /// Register a cabinet with its search dialogs and index fields.
    pub async fn add_cabinet(
        &self,
        cabinet: Cabinet,
        dialogs: Vec<SearchDialog>,
        fields: Vec<CabinetField>,
    ) {
        self.dialogs.write().await.insert(cabinet.id.clone(), dialogs);
        self.fields.write().await.insert(cabinet.id.clone(), fields);
        self.cabinets.write().await.push(cabinet);
    }

    /// Drop the session: the next call fails until `authenticate` runs.
    pub async fn expire_session(&self) {
        *self.session_expired.write().await = true;
    }

    async fn check_session(&self) -> Result<(), DocServiceError> {
        if *self.session_expired.read().await {
            return Err(DocServiceError::NotAuthenticated);
        }
        Ok(())
    }

    async fn check_cabinet(&self, cabinet_id: &str) -> Result<(), DocServiceError> {
        if self.cabinets.read().await.iter().any(|c| c.id == cabinet_id) {
            return Ok(());
        }
        Err(DocServiceError::Api {
            status: 404,
            message: format!("cabinet {} not found", cabinet_id),
        })
    }

    /// Get all recorded searches.
    pub async fn recorded_searches(&self) -> Vec<Vec<SearchCriterion>> {
        self.searches.read().await.clone()
    }

    /// Get the number of searches performed.
    pub async fn search_count(&self) -> usize {
        self.searches.read().await.len()
    }

    /// Get the number of authenticate calls.
    pub async fn authentication_count(&self) -> usize {
        *self.authentications.read().await
    }
}

#[async_trait]
impl DocumentService for MockDocumentService {
    async fn authenticate(&self) -> Result<(), DocServiceError> {
        *self.authentications.write().await += 1;
        if *self.fail_authentication.read().await {
            return Err(DocServiceError::AuthenticationFailed(
                "invalid credentials".to_string(),
            ));
        }
        *self.session_expired.write().await = false;
        Ok(())
    }

    async fn search(
        &self,
        _cabinet_id: &str,
        _dialog_id: &str,
        criteria: &[SearchCriterion],
    ) -> Result<Vec<DocumentSummary>, DocServiceError> {
        self.check_session().await?;
        self.searches.write().await.push(criteria.to_vec());

        let hook = self.search_hook.read().await.clone();
        if let (Some(hook), Some(first)) = (hook, criteria.first()) {
            hook(&first.value);
        }

        let failing = self.failing_searches.read().await;
        if criteria.iter().any(|c| failing.contains(&c.value)) {
            return Err(DocServiceError::ConnectionFailed(
                "mock search failure".to_string(),
            ));
        }

        let matches = self.matches.read().await;
        Ok(criteria
            .iter()
            .find_map(|c| matches.get(&c.value))
            .cloned()
            .unwrap_or_default())
    }

    async fn download(
        &self,
        document_id: &str,
        _cabinet_id: &str,
    ) -> Result<Vec<u8>, DocServiceError> {
        if self.failing_downloads.read().await.contains(document_id) {
            return Err(DocServiceError::Api {
                status: 500,
                message: "mock download failure".to_string(),
            });
        }
        self.contents
            .read()
            .await
            .get(document_id)
            .cloned()
            .ok_or_else(|| DocServiceError::Api {
                status: 404,
                message: format!("document {} not found", document_id),
            })
    }

    async fn linked_documents(
        &self,
        document_id: &str,
        _cabinet_id: &str,
    ) -> Result<Vec<DocumentSummary>, DocServiceError> {
        Ok(self
            .links
            .read()
            .await
            .get(document_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn list_cabinets(&self) -> Result<Vec<Cabinet>, DocServiceError> {
        self.check_session().await?;
        Ok(self.cabinets.read().await.clone())
    }

    async fn list_dialogs(&self, cabinet_id: &str) -> Result<Vec<SearchDialog>, DocServiceError> {
        self.check_session().await?;
        self.check_cabinet(cabinet_id).await?;
        Ok(self
            .dialogs
            .read()
            .await
            .get(cabinet_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn list_fields(&self, cabinet_id: &str) -> Result<Vec<CabinetField>, DocServiceError> {
        self.check_session().await?;
        self.check_cabinet(cabinet_id).await?;
        Ok(self
            .fields
            .read()
            .await
            .get(cabinet_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn document(
        &self,
        document_id: &str,
        _cabinet_id: &str,
    ) -> Result<DocumentDetails, DocServiceError> {
        self.check_session().await?;
        let size = self
            .contents
            .read()
            .await
            .get(document_id)
            .map(|content| content.len() as u64)
            .ok_or_else(|| DocServiceError::Api {
                status: 404,
                message: format!("document {} not found", document_id),
            })?;

        let summary = self
            .matches
            .read()
            .await
            .values()
            .chain(self.links.read().await.values())
            .flatten()
            .find(|doc| doc.id == document_id)
            .cloned()
            .unwrap_or_else(|| DocumentSummary::new(document_id));

        Ok(DocumentDetails {
            id: summary.id,
            title: summary.title,
            content_type: summary.content_type,
            file_size: Some(size),
            fields: Vec::new(),
        })
    }
}
