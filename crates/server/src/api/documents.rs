//! Document-service discovery handlers.
//!
//! Cabinets, search dialogs and index fields are what a job configuration
//! refers to; these endpoints let a client pick them instead of typing ids.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use docfetch_core::{
    Cabinet, CabinetField, DocServiceError, DocumentDetails, DocumentService, DocumentSummary,
    SearchCriterion, SearchDialog,
};

use super::handlers::ApiError;
use crate::state::AppState;

impl From<DocServiceError> for ApiError {
    fn from(e: DocServiceError) -> Self {
        let status = match &e {
            DocServiceError::ConnectionFailed(_) | DocServiceError::Timeout => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            DocServiceError::Api { status: 404, .. } => StatusCode::NOT_FOUND,
            DocServiceError::AuthenticationFailed(_)
            | DocServiceError::NotAuthenticated
            | DocServiceError::Api { .. }
            | DocServiceError::InvalidResponse(_) => StatusCode::BAD_GATEWAY,
        };
        warn!(error = %e, "Document service call failed");
        Self::new(status, format!("Document service: {}", e))
    }
}

fn service(state: &AppState) -> Result<Arc<dyn DocumentService>, ApiError> {
    state.documents().ok_or_else(|| {
        ApiError::new(
            StatusCode::SERVICE_UNAVAILABLE,
            "No document service configured",
        )
    })
}

/// Run `call`, logging on and retrying once if there is no session yet.
async fn with_session<T, F, Fut>(docs: &Arc<dyn DocumentService>, call: F) -> Result<T, ApiError>
where
    F: Fn(Arc<dyn DocumentService>) -> Fut,
    Fut: Future<Output = Result<T, DocServiceError>>,
{
    match call(Arc::clone(docs)).await {
        Err(DocServiceError::NotAuthenticated) => {
            docs.authenticate().await?;
            Ok(call(Arc::clone(docs)).await?)
        }
        other => Ok(other?),
    }
}

#[derive(Debug, Serialize)]
pub struct ConnectionResponse {
    pub status: &'static str,
    pub server_url: Option<String>,
    pub username: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CabinetsResponse {
    pub cabinets: Vec<Cabinet>,
    pub total: usize,
}

#[derive(Debug, Serialize)]
pub struct DialogsResponse {
    pub cabinet_id: String,
    pub dialogs: Vec<SearchDialog>,
    pub total: usize,
}

#[derive(Debug, Serialize)]
pub struct FieldsResponse {
    pub cabinet_id: String,
    pub fields: Vec<CabinetField>,
    pub total: usize,
}

/// Ad-hoc search: field database name -> value.
#[derive(Debug, Deserialize)]
pub struct SearchBody {
    pub cabinet_id: String,
    pub dialog_id: String,
    pub search_params: BTreeMap<String, String>,
}

#[derive(Debug, Serialize)]
pub struct SearchResponse {
    pub cabinet_id: String,
    pub dialog_id: String,
    pub documents: Vec<DocumentSummary>,
    pub total: usize,
}

#[derive(Debug, Serialize)]
pub struct LinksResponse {
    pub document_id: String,
    pub links: Vec<DocumentSummary>,
    pub total: usize,
}

/// Log on with the configured credentials.
pub async fn test_connection(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ConnectionResponse>, ApiError> {
    let docs = service(&state)?;
    docs.authenticate().await?;

    let config = state.document_service_config();
    info!("Document service connection verified");
    Ok(Json(ConnectionResponse {
        status: "connected",
        server_url: config.map(|c| c.url.clone()),
        username: config.map(|c| c.username.clone()),
    }))
}

pub async fn list_cabinets(
    State(state): State<Arc<AppState>>,
) -> Result<Json<CabinetsResponse>, ApiError> {
    let docs = service(&state)?;
    let cabinets = with_session(&docs, |d| async move { d.list_cabinets().await }).await?;
    Ok(Json(CabinetsResponse {
        total: cabinets.len(),
        cabinets,
    }))
}

pub async fn list_dialogs(
    State(state): State<Arc<AppState>>,
    Path(cabinet_id): Path<String>,
) -> Result<Json<DialogsResponse>, ApiError> {
    let docs = service(&state)?;
    let dialogs = with_session(&docs, |d| {
        let cabinet_id = cabinet_id.clone();
        async move { d.list_dialogs(&cabinet_id).await }
    })
    .await?;
    Ok(Json(DialogsResponse {
        cabinet_id,
        total: dialogs.len(),
        dialogs,
    }))
}

pub async fn list_fields(
    State(state): State<Arc<AppState>>,
    Path(cabinet_id): Path<String>,
) -> Result<Json<FieldsResponse>, ApiError> {
    let docs = service(&state)?;
    let fields = with_session(&docs, |d| {
        let cabinet_id = cabinet_id.clone();
        async move { d.list_fields(&cabinet_id).await }
    })
    .await?;
    Ok(Json(FieldsResponse {
        cabinet_id,
        total: fields.len(),
        fields,
    }))
}

/// Run one dialog search with every parameter as an AND condition.
pub async fn search_documents(
    State(state): State<Arc<AppState>>,
    Json(body): Json<SearchBody>,
) -> Result<Json<SearchResponse>, ApiError> {
    if body.cabinet_id.trim().is_empty() || body.dialog_id.trim().is_empty() {
        return Err(ApiError::bad_request(
            "cabinet_id and dialog_id must not be empty",
        ));
    }
    let criteria: Vec<SearchCriterion> = body
        .search_params
        .iter()
        .filter(|(_, value)| !value.trim().is_empty())
        .map(|(field, value)| SearchCriterion::new(field.as_str(), value.trim()))
        .collect();
    if criteria.is_empty() {
        return Err(ApiError::bad_request(
            "search_params needs at least one non-empty value",
        ));
    }

    let docs = service(&state)?;
    let documents = with_session(&docs, |d| {
        let (cabinet_id, dialog_id) = (body.cabinet_id.clone(), body.dialog_id.clone());
        let criteria = criteria.clone();
        async move { d.search(&cabinet_id, &dialog_id, &criteria).await }
    })
    .await?;

    Ok(Json(SearchResponse {
        cabinet_id: body.cabinet_id,
        dialog_id: body.dialog_id,
        total: documents.len(),
        documents,
    }))
}

pub async fn get_document(
    State(state): State<Arc<AppState>>,
    Path((cabinet_id, document_id)): Path<(String, String)>,
) -> Result<Json<DocumentDetails>, ApiError> {
    let docs = service(&state)?;
    let details = with_session(&docs, |d| {
        let (cabinet_id, document_id) = (cabinet_id.clone(), document_id.clone());
        async move { d.document(&document_id, &cabinet_id).await }
    })
    .await?;
    Ok(Json(details))
}

pub async fn get_document_links(
    State(state): State<Arc<AppState>>,
    Path((cabinet_id, document_id)): Path<(String, String)>,
) -> Result<Json<LinksResponse>, ApiError> {
    let docs = service(&state)?;
    let links = with_session(&docs, |d| {
        let (cabinet_id, document_id) = (cabinet_id.clone(), document_id.clone());
        async move { d.linked_documents(&document_id, &cabinet_id).await }
    })
    .await?;
    Ok(Json(LinksResponse {
        document_id,
        total: links.len(),
        links,
    }))
}
