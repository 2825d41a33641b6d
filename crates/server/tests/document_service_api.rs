//! Document-service discovery over HTTP, against the mock platform.

mod common;

use axum::http::StatusCode;
use serde_json::json;

use common::{TestConfig, TestFixture};
use docfetch_core::{Cabinet, CabinetField, SearchDialog};

async fn fixture_with_cabinet() -> TestFixture {
    let fixture = TestFixture::new().await;
    fixture
        .documents
        .add_cabinet(
            Cabinet {
                id: "cab-1".into(),
                name: "Invoices".into(),
                kind: "FileCabinet".into(),
            },
            vec![SearchDialog {
                id: "dlg-1".into(),
                display_name: "Invoice search".into(),
            }],
            vec![
                CabinetField::new("INVOICE_NO", "Invoice"),
                CabinetField::new("SUPPLIER", "Supplier"),
            ],
        )
        .await;
    fixture
}

#[tokio::test]
async fn test_connection_authenticates() {
    let fixture = TestFixture::new().await;

    let response = fixture.get("/api/v1/document-service/test-connection").await;
    assert_status!(response, StatusCode::OK);
    assert_eq!(response.body["status"], "connected");
    assert_eq!(fixture.documents.authentication_count().await, 1);
}

#[tokio::test]
async fn test_connection_bad_credentials() {
    let fixture = TestFixture::new().await;
    fixture.documents.set_fail_authentication(true).await;

    let response = fixture.get("/api/v1/document-service/test-connection").await;
    assert_status!(response, StatusCode::BAD_GATEWAY);
    assert!(response.body["error"]
        .as_str()
        .unwrap()
        .contains("invalid credentials"));
}

#[tokio::test]
async fn test_unconfigured_service_unavailable() {
    let fixture = TestFixture::with_config(TestConfig::without_documents()).await;

    for path in [
        "/api/v1/document-service/test-connection",
        "/api/v1/document-service/cabinets",
        "/api/v1/document-service/cabinets/cab-1/fields",
    ] {
        let response = fixture.get(path).await;
        assert_status!(response, StatusCode::SERVICE_UNAVAILABLE);
    }
}

#[tokio::test]
async fn test_list_cabinets_dialogs_and_fields() {
    let fixture = fixture_with_cabinet().await;

    let response = fixture.get("/api/v1/document-service/cabinets").await;
    assert_status!(response, StatusCode::OK);
    assert_eq!(response.body["total"], 1);
    assert_eq!(
        response.body["cabinets"][0],
        json!({"id": "cab-1", "name": "Invoices", "type": "FileCabinet"})
    );

    let response = fixture
        .get("/api/v1/document-service/cabinets/cab-1/dialogs")
        .await;
    assert_status!(response, StatusCode::OK);
    assert_eq!(response.body["cabinet_id"], "cab-1");
    assert_eq!(response.body["dialogs"][0]["id"], "dlg-1");

    let response = fixture
        .get("/api/v1/document-service/cabinets/cab-1/fields")
        .await;
    assert_status!(response, StatusCode::OK);
    assert_eq!(response.body["total"], 2);
    assert_eq!(response.body["fields"][0]["db_name"], "INVOICE_NO");
    assert_eq!(response.body["fields"][1]["display_name"], "Supplier");
}

#[tokio::test]
async fn test_unknown_cabinet_not_found() {
    let fixture = fixture_with_cabinet().await;

    let response = fixture
        .get("/api/v1/document-service/cabinets/nope/dialogs")
        .await;
    assert_status!(response, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_expired_session_logs_on_again() {
    let fixture = fixture_with_cabinet().await;
    fixture.documents.expire_session().await;

    let response = fixture.get("/api/v1/document-service/cabinets").await;
    assert_status!(response, StatusCode::OK);
    assert_eq!(response.body["total"], 1);
    assert_eq!(fixture.documents.authentication_count().await, 1);
}

#[tokio::test]
async fn test_search_and_document_lookup() {
    let fixture = fixture_with_cabinet().await;
    fixture
        .documents
        .add_document("A-1", "doc-1", b"%PDF-1.4 invoice")
        .await;
    fixture
        .documents
        .add_link("doc-1", "doc-2", b"%PDF-1.4 delivery note")
        .await;

    let response = fixture
        .post(
            "/api/v1/document-service/search",
            json!({
                "cabinet_id": "cab-1",
                "dialog_id": "dlg-1",
                "search_params": {"INVOICE_NO": " A-1 ", "SUPPLIER": ""},
            }),
        )
        .await;
    assert_status!(response, StatusCode::OK);
    assert_eq!(response.body["total"], 1);
    assert_eq!(response.body["documents"][0]["id"], "doc-1");

    let searches = fixture.documents.recorded_searches().await;
    assert_eq!(searches.len(), 1);
    assert_eq!(searches[0].len(), 1);
    assert_eq!(searches[0][0].field, "INVOICE_NO");
    assert_eq!(searches[0][0].value, "A-1");

    let response = fixture
        .get("/api/v1/document-service/documents/cab-1/doc-1")
        .await;
    assert_status!(response, StatusCode::OK);
    assert_eq!(response.body["id"], "doc-1");
    assert_eq!(response.body["content_type"], "application/pdf");
    assert_eq!(response.body["file_size"], 16);

    let response = fixture
        .get("/api/v1/document-service/documents/cab-1/doc-1/links")
        .await;
    assert_status!(response, StatusCode::OK);
    assert_eq!(response.body["document_id"], "doc-1");
    assert_eq!(response.body["links"][0]["id"], "doc-2");

    let response = fixture
        .get("/api/v1/document-service/documents/cab-1/missing")
        .await;
    assert_status!(response, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_search_requires_a_value() {
    let fixture = fixture_with_cabinet().await;

    let response = fixture
        .post(
            "/api/v1/document-service/search",
            json!({
                "cabinet_id": "cab-1",
                "dialog_id": "dlg-1",
                "search_params": {"INVOICE_NO": "  "},
            }),
        )
        .await;
    assert_status!(response, StatusCode::BAD_REQUEST);
    assert_eq!(fixture.documents.search_count().await, 0);
}
