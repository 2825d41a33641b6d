//! HTTP document-service client.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::config::DocumentServiceConfig;

use super::{
    Cabinet, CabinetField, DocServiceError, DocumentDetails, DocumentService, DocumentSummary,
    IndexValue, SearchCriterion, SearchDialog,
};

/// Document-service client speaking the platform REST API.
///
/// `Account/Logon` sets a session cookie in the client jar and later calls
/// reuse it. A 401 on any call triggers one re-logon and a retry.
pub struct HttpDocumentService {
    client: Client,
    config: DocumentServiceConfig,
    authenticated: RwLock<bool>,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct LogonRequest<'a> {
    user_name: &'a str,
    password: &'a str,
    organization: &'a str,
    remember_me: bool,
}

#[derive(Serialize)]
struct Condition<'a> {
    #[serde(rename = "DBName")]
    db_name: &'a str,
    #[serde(rename = "Value")]
    value: [&'a str; 1],
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct DialogQuery<'a> {
    condition: Vec<Condition<'a>>,
    operation: &'a str,
    dialog_id: &'a str,
}

impl HttpDocumentService {
    pub fn new(config: DocumentServiceConfig) -> Result<Self, DocServiceError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs as u64))
            .cookie_store(true)
            .build()
            .map_err(|e| DocServiceError::ConnectionFailed(e.to_string()))?;

        Ok(Self {
            client,
            config,
            authenticated: RwLock::new(false),
        })
    }

    fn base_url(&self) -> &str {
        self.config.url.trim_end_matches('/')
    }

    fn document_url(&self, cabinet_id: &str, document_id: &str, suffix: &str) -> String {
        format!(
            "{}/FileCabinets/{}/Documents/{}/{}",
            self.base_url(),
            urlencoding::encode(cabinet_id),
            urlencoding::encode(document_id),
            suffix
        )
    }

    async fn logon(&self) -> Result<(), DocServiceError> {
        let url = format!("{}/Account/Logon", self.base_url());
        let body = LogonRequest {
            user_name: &self.config.username,
            password: &self.config.password,
            organization: &self.config.organization,
            remember_me: false,
        };

        let response = self.client.post(&url).json(&body).send().await?;
        let status = response.status();

        if status.is_success() {
            *self.authenticated.write().await = true;
            info!(url = %self.base_url(), "Document service session opened");
            Ok(())
        } else {
            *self.authenticated.write().await = false;
            let text = response.text().await.unwrap_or_default();
            Err(DocServiceError::AuthenticationFailed(format!(
                "HTTP {}: {}",
                status.as_u16(),
                text.chars().take(200).collect::<String>()
            )))
        }
    }

    async fn ensure_authenticated(&self) -> Result<(), DocServiceError> {
        if *self.authenticated.read().await {
            return Ok(());
        }
        Err(DocServiceError::NotAuthenticated)
    }

    /// Send a request built by `build`, re-authenticating once on 401.
    async fn send<F>(&self, build: F) -> Result<Response, DocServiceError>
    where
        F: Fn(&Client) -> reqwest::RequestBuilder,
    {
        self.ensure_authenticated().await?;

        let response = build(&self.client).send().await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Self::check(response).await;
        }

        warn!("Document service session expired, re-authenticating");
        *self.authenticated.write().await = false;
        self.logon().await?;

        let response = build(&self.client).send().await?;
        Self::check(response).await
    }

    async fn check(response: Response) -> Result<Response, DocServiceError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let text = response.text().await.unwrap_or_default();
        Err(DocServiceError::Api {
            status: status.as_u16(),
            message: text.chars().take(200).collect(),
        })
    }

    async fn get_json(&self, url: &str) -> Result<Value, DocServiceError> {
        let response = self
            .send(|client| {
                client
                    .get(url)
                    .header(reqwest::header::ACCEPT, "application/json")
            })
            .await?;
        Ok(response.json().await?)
    }
}

/// First non-empty string or number under any of `keys`, as text.
fn text(item: &Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| match item.get(*key) {
        Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

/// The array under the first present key. Missing or null is empty.
fn array<'a>(body: &'a Value, keys: &[&str]) -> Result<&'a [Value], DocServiceError> {
    match keys.iter().find_map(|key| body.get(*key)) {
        Some(Value::Array(items)) => Ok(items.as_slice()),
        Some(Value::Null) | None => Ok(&[][..]),
        Some(other) => Err(DocServiceError::InvalidResponse(format!(
            "{} is not an array: {}",
            keys[0], other
        ))),
    }
}

/// Extract document summaries from an `{"Items": [...]}` response body.
pub(crate) fn parse_items(body: &Value) -> Result<Vec<DocumentSummary>, DocServiceError> {
    let items = array(body, &["Items"])?;

    let mut docs = Vec::with_capacity(items.len());
    for item in items {
        let Some(id) = text(item, &["Id", "DocumentId", "DocId"]) else {
            debug!(item = %item, "Skipping item without an id");
            continue;
        };

        docs.push(DocumentSummary {
            id,
            title: text(item, &["Title"]),
            content_type: text(item, &["ContentType"]),
        });
    }

    Ok(docs)
}

pub(crate) fn parse_cabinets(body: &Value) -> Result<Vec<Cabinet>, DocServiceError> {
    Ok(array(body, &["FileCabinet", "fileCabinet"])?
        .iter()
        .filter_map(|item| {
            let id = text(item, &["Id", "id"])?;
            let kind = text(item, &["Type", "type"]).unwrap_or_else(|| {
                if item.get("IsBasket").and_then(Value::as_bool) == Some(true) {
                    "Basket".to_string()
                } else {
                    "FileCabinet".to_string()
                }
            });
            Some(Cabinet {
                name: text(item, &["Name", "name"]).unwrap_or_default(),
                id,
                kind,
            })
        })
        .collect())
}

/// Search dialogs only; store, result and task-list dialogs are skipped.
pub(crate) fn parse_dialogs(body: &Value) -> Result<Vec<SearchDialog>, DocServiceError> {
    Ok(array(body, &["Dialog"])?
        .iter()
        .filter(|item| item.get("Type").and_then(Value::as_str) == Some("Search"))
        .filter_map(|item| {
            let id = text(item, &["Id"])?;
            Some(SearchDialog {
                display_name: text(item, &["DisplayName"]).unwrap_or_else(|| id.clone()),
                id,
            })
        })
        .collect())
}

/// Index fields from a cabinet description. Platform versions disagree on
/// key names, so each property has fallbacks.
pub(crate) fn parse_fields(body: &Value) -> Result<Vec<CabinetField>, DocServiceError> {
    let mut fields = Vec::new();
    for item in array(body, &["Fields"])? {
        let Some(db_name) = text(item, &["DBName", "DBFieldName", "FieldName", "Name"]) else {
            warn!(field = %item, "Skipping cabinet field without a database name");
            continue;
        };
        fields.push(CabinetField {
            display_name: text(item, &["DisplayName", "Label", "Name"])
                .unwrap_or_else(|| db_name.clone()),
            kind: text(item, &["DWFieldType", "FieldType", "Type"]).unwrap_or_default(),
            length: item
                .get("Length")
                .and_then(Value::as_u64)
                .and_then(|n| u32::try_from(n).ok()),
            is_required: ["IsRequired", "NotEmpty"]
                .iter()
                .any(|key| item.get(*key).and_then(Value::as_bool) == Some(true)),
            db_name,
        });
    }
    Ok(fields)
}

pub(crate) fn parse_document(body: &Value) -> Result<DocumentDetails, DocServiceError> {
    let id = text(body, &["Id"])
        .ok_or_else(|| DocServiceError::InvalidResponse("document without Id".to_string()))?;

    let fields = array(body, &["Fields"])?
        .iter()
        .filter_map(|field| {
            let name = text(field, &["FieldName", "DBName"])?;
            let is_null = field.get("IsNull").and_then(Value::as_bool) == Some(true);
            let value = match field.get("Item") {
                _ if is_null => None,
                None | Some(Value::Null) => None,
                Some(Value::String(s)) => Some(s.clone()),
                Some(other) => Some(other.to_string()),
            };
            Some(IndexValue { name, value })
        })
        .collect();

    Ok(DocumentDetails {
        id,
        title: text(body, &["Title"]),
        content_type: text(body, &["ContentType"]),
        file_size: body.get("FileSize").and_then(Value::as_u64),
        fields,
    })
}

#[async_trait]
impl DocumentService for HttpDocumentService {
    async fn authenticate(&self) -> Result<(), DocServiceError> {
        self.logon().await
    }

    async fn search(
        &self,
        cabinet_id: &str,
        dialog_id: &str,
        criteria: &[SearchCriterion],
    ) -> Result<Vec<DocumentSummary>, DocServiceError> {
        let url = format!(
            "{}/FileCabinets/{}/Query/DialogExpression",
            self.base_url(),
            urlencoding::encode(cabinet_id)
        );
        let query = DialogQuery {
            condition: criteria
                .iter()
                .map(|c| Condition {
                    db_name: c.field.as_str(),
                    value: [c.value.as_str()],
                })
                .collect(),
            operation: "And",
            dialog_id,
        };

        debug!(cabinet_id, dialog_id, conditions = criteria.len(), "Searching documents");

        let response = self
            .send(|client| {
                client
                    .post(&url)
                    .header(reqwest::header::ACCEPT, "application/json")
                    .json(&query)
            })
            .await?;
        let body: Value = response.json().await?;
        let docs = parse_items(&body)?;

        debug!(cabinet_id, found = docs.len(), "Search finished");
        Ok(docs)
    }

    async fn download(
        &self,
        document_id: &str,
        cabinet_id: &str,
    ) -> Result<Vec<u8>, DocServiceError> {
        let url = self.document_url(cabinet_id, document_id, "FileDownload");
        let response = self
            .send(|client| client.get(&url).query(&[("targetFileType", "Auto")]))
            .await?;
        let bytes = response.bytes().await?;

        debug!(document_id, size = bytes.len(), "Downloaded document");
        Ok(bytes.to_vec())
    }

    async fn linked_documents(
        &self,
        document_id: &str,
        cabinet_id: &str,
    ) -> Result<Vec<DocumentSummary>, DocServiceError> {
        let url = self.document_url(cabinet_id, document_id, "DocumentLinks");
        let mut links = parse_items(&self.get_json(&url).await?)?;
        links.retain(|doc| doc.id != document_id);
        Ok(links)
    }

    async fn list_cabinets(&self) -> Result<Vec<Cabinet>, DocServiceError> {
        let url = format!("{}/FileCabinets", self.base_url());
        let cabinets = parse_cabinets(&self.get_json(&url).await?)?;
        debug!(count = cabinets.len(), "Listed cabinets");
        Ok(cabinets)
    }

    async fn list_dialogs(&self, cabinet_id: &str) -> Result<Vec<SearchDialog>, DocServiceError> {
        let url = format!(
            "{}/FileCabinets/{}/Dialogs",
            self.base_url(),
            urlencoding::encode(cabinet_id)
        );
        let dialogs = parse_dialogs(&self.get_json(&url).await?)?;
        debug!(cabinet_id, count = dialogs.len(), "Listed search dialogs");
        Ok(dialogs)
    }

    async fn list_fields(&self, cabinet_id: &str) -> Result<Vec<CabinetField>, DocServiceError> {
        let url = format!(
            "{}/FileCabinets/{}",
            self.base_url(),
            urlencoding::encode(cabinet_id)
        );
        let fields = parse_fields(&self.get_json(&url).await?)?;
        debug!(cabinet_id, count = fields.len(), "Listed cabinet fields");
        Ok(fields)
    }

    async fn document(
        &self,
        document_id: &str,
        cabinet_id: &str,
    ) -> Result<DocumentDetails, DocServiceError> {
        let url = self.document_url(cabinet_id, document_id, "");
        parse_document(&self.get_json(url.trim_end_matches('/')).await?)
    }

    async fn close(&self) {
        if !*self.authenticated.read().await {
            return;
        }
        let url = format!("{}/Account/Logoff", self.base_url());
        match self
            .client
            .post(&url)
            .timeout(Duration::from_secs(5))
            .send()
            .await
        {
            Ok(_) => debug!("Document service session closed"),
            Err(e) => debug!(error = %e, "Logoff failed"),
        }
        *self.authenticated.write().await = false;
    }
}
