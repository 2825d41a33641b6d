use axum::{
    middleware,
    routing::{delete, get, post},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use super::{documents, handlers, jobs, middleware::metrics_middleware, spreadsheets, ws};
use crate::state::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    // API routes
    let api_routes = Router::new()
        // Health and config
        .route("/health", get(handlers::health))
        .route("/config", get(handlers::get_config))
        // Jobs
        .route("/jobs", post(jobs::create_job).get(jobs::list_jobs))
        .route(
            "/jobs/{id}",
            get(jobs::get_job)
                .patch(jobs::update_job)
                .delete(jobs::delete_job),
        )
        .route("/jobs/{id}/start", post(jobs::start_job))
        .route("/jobs/{id}/records", get(jobs::list_records))
        .route("/jobs/{id}/logs", get(jobs::list_logs))
        // Spreadsheets
        .route(
            "/spreadsheets",
            post(spreadsheets::upload_spreadsheet).get(spreadsheets::list_uploads),
        )
        .route("/spreadsheets/validate", post(spreadsheets::validate_spreadsheet))
        .route("/spreadsheets/{name}", delete(spreadsheets::delete_upload))
        .route("/spreadsheets/{name}/sheets", get(spreadsheets::list_sheets))
        .route("/spreadsheets/{name}/preview", get(spreadsheets::preview_upload))
        // Document service discovery
        .route("/document-service/test-connection", get(documents::test_connection))
        .route("/document-service/cabinets", get(documents::list_cabinets))
        .route(
            "/document-service/cabinets/{id}/dialogs",
            get(documents::list_dialogs),
        )
        .route(
            "/document-service/cabinets/{id}/fields",
            get(documents::list_fields),
        )
        .route("/document-service/search", post(documents::search_documents))
        .route(
            "/document-service/documents/{cabinet_id}/{document_id}",
            get(documents::get_document),
        )
        .route(
            "/document-service/documents/{cabinet_id}/{document_id}/links",
            get(documents::get_document_links),
        )
        // Live progress
        .route("/ws/jobs/{id}", get(ws::ws_handler));

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/metrics", get(handlers::metrics))
        .with_state(state)
        .layer(middleware::from_fn(metrics_middleware))
        .layer(TraceLayer::new_for_http())
}
