//! Remote drive and document editor over HTTP.
//!
//! A single [`GoogleClient`] serves both [`BlobStore`] (Drive v3) and
//! [`DocumentService`] (Docs v1). Authentication is a bearer access token
//! obtained out of band.

use crate::document::{DocumentError, DocumentService, DocumentStructure, EditOperation};
use crate::store::{
    is_transient_status, BlobStore, FileEntry, StoreError, DOCUMENT_MIME, FOLDER_MIME,
};
use async_trait::async_trait;
use reqwest::{RequestBuilder, Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, warn};

const DRIVE_API: &str = "https://www.googleapis.com/drive/v3";
const DRIVE_UPLOAD_API: &str = "https://www.googleapis.com/upload/drive/v3";
const DOCS_API: &str = "https://docs.googleapis.com/v1";

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 250,
            max_backoff_ms: 2_000,
        }
    }
}

fn retry_delay(
    attempt: u32,
    policy: &RetryPolicy,
    retry_after: Option<&reqwest::header::HeaderValue>,
) -> Duration {
    if let Some(secs) = retry_after
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
    {
        return Duration::from_secs(secs.min(30));
    }
    let exponent = 2u64.saturating_pow(attempt.saturating_sub(1));
    Duration::from_millis(
        policy
            .initial_backoff_ms
            .saturating_mul(exponent)
            .min(policy.max_backoff_ms),
    )
}

/// Send a request, retrying throttling, server errors and transport hiccups.
pub async fn send_with_retry(
    request: RequestBuilder,
    policy: &RetryPolicy,
) -> Result<Response, StoreError> {
    let attempts = policy.max_attempts.max(1);
    for attempt in 1..=attempts {
        let Some(cloned) = request.try_clone() else {
            return Ok(request.send().await?);
        };

        match cloned.send().await {
            Ok(response) => {
                let status = response.status();
                if is_transient_status(status.as_u16()) && attempt < attempts {
                    let delay = retry_delay(
                        attempt,
                        policy,
                        response.headers().get(reqwest::header::RETRY_AFTER),
                    );
                    warn!(attempt, attempts, %status, ?delay, "retrying request");
                    tokio::time::sleep(delay).await;
                    continue;
                }
                return Ok(response);
            }
            Err(err) => {
                let err = StoreError::Http(err);
                if err.is_retryable() && attempt < attempts {
                    let delay = retry_delay(attempt, policy, None);
                    warn!(attempt, attempts, error = %err, ?delay, "retrying request");
                    tokio::time::sleep(delay).await;
                    continue;
                }
                return Err(err);
            }
        }
    }

    Err(StoreError::Api {
        status: 0,
        message: "request exhausted retries".to_string(),
    })
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileList {
    #[serde(default)]
    files: Vec<FileEntry>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileMeta {
    id: String,
    #[serde(default)]
    mime_type: String,
    #[serde(default)]
    parents: Vec<String>,
}

pub struct GoogleClient {
    http: reqwest::Client,
    token: String,
    retry: RetryPolicy,
}

impl GoogleClient {
    pub fn new(token: impl Into<String>) -> Result<Self, StoreError> {
        let token = token.into();
        if token.trim().is_empty() {
            return Err(StoreError::MissingToken);
        }
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()?;
        Ok(Self {
            http,
            token,
            retry: RetryPolicy::default(),
        })
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn url(base: &str, params: &[(&str, &str)]) -> Result<Url, StoreError> {
        Url::parse_with_params(base, params).map_err(|e| StoreError::InvalidId(e.to_string()))
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, StoreError> {
        let response = send_with_retry(request.bearer_auth(&self.token), &self.retry).await?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            if status == StatusCode::NOT_FOUND {
                return Err(StoreError::NotFound(message));
            }
            return Err(StoreError::Api {
                status: status.as_u16(),
                message,
            });
        }
        Ok(response)
    }

    async fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, StoreError> {
        Ok(self.send(request).await?.json().await?)
    }

    async fn metadata(&self, file_id: &str) -> Result<FileMeta, StoreError> {
        let url = Self::url(
            &format!("{DRIVE_API}/files/{file_id}"),
            &[("fields", "id,mimeType,parents"), ("supportsAllDrives", "true")],
        )?;
        self.send_json(self.http.get(url)).await
    }
}

#[async_trait]
impl BlobStore for GoogleClient {
    async fn list_children(
        &self,
        folder_id: &str,
        mime_filter: Option<&str>,
    ) -> Result<Vec<FileEntry>, StoreError> {
        let mut query = format!("'{folder_id}' in parents and trashed = false");
        if let Some(mime) = mime_filter {
            query.push_str(&format!(" and mimeType = '{mime}'"));
        }

        let mut entries = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let mut params = vec![
                ("q", query.as_str()),
                ("fields", "nextPageToken,files(id,name,mimeType)"),
                ("pageSize", "1000"),
                ("supportsAllDrives", "true"),
                ("includeItemsFromAllDrives", "true"),
            ];
            if let Some(token) = page_token.as_deref() {
                params.push(("pageToken", token));
            }
            let url = Self::url(&format!("{DRIVE_API}/files"), &params)?;
            let page: FileList = self.send_json(self.http.get(url)).await?;
            entries.extend(page.files);
            match page.next_page_token {
                Some(next) => page_token = Some(next),
                None => break,
            }
        }
        debug!(folder = folder_id, count = entries.len(), "listed folder");
        Ok(entries)
    }

    async fn get_content(&self, file_id: &str) -> Result<String, StoreError> {
        let meta = self.metadata(file_id).await?;
        let url = if meta.mime_type == DOCUMENT_MIME {
            Self::url(
                &format!("{DRIVE_API}/files/{}/export", meta.id),
                &[("mimeType", "text/plain")],
            )?
        } else {
            Self::url(
                &format!("{DRIVE_API}/files/{}", meta.id),
                &[("alt", "media"), ("supportsAllDrives", "true")],
            )?
        };
        Ok(self.send(self.http.get(url)).await?.text().await?)
    }

    async fn create(
        &self,
        name: &str,
        content: &[u8],
        mime_type: &str,
        parent_id: &str,
    ) -> Result<String, StoreError> {
        let url = Self::url(&format!("{DRIVE_API}/files"), &[("supportsAllDrives", "true")])?;
        let created: FileMeta = self
            .send_json(self.http.post(url).json(&json!({
                "name": name,
                "mimeType": mime_type,
                "parents": [parent_id],
            })))
            .await?;

        let upload = Self::url(
            &format!("{DRIVE_UPLOAD_API}/files/{}", created.id),
            &[("uploadType", "media"), ("supportsAllDrives", "true")],
        )?;
        self.send(
            self.http
                .patch(upload)
                .header(reqwest::header::CONTENT_TYPE, mime_type)
                .body(content.to_vec()),
        )
        .await?;
        Ok(created.id)
    }

    async fn create_folder(&self, name: &str, parent_id: &str) -> Result<String, StoreError> {
        let url = Self::url(&format!("{DRIVE_API}/files"), &[("supportsAllDrives", "true")])?;
        let created: FileMeta = self
            .send_json(self.http.post(url).json(&json!({
                "name": name,
                "mimeType": FOLDER_MIME,
                "parents": [parent_id],
            })))
            .await?;
        Ok(created.id)
    }

    async fn move_file(&self, file_id: &str, new_parent_id: &str) -> Result<(), StoreError> {
        let meta = self.metadata(file_id).await?;
        let previous = meta.parents.join(",");
        let url = Self::url(
            &format!("{DRIVE_API}/files/{file_id}"),
            &[
                ("addParents", new_parent_id),
                ("removeParents", previous.as_str()),
                ("supportsAllDrives", "true"),
            ],
        )?;
        self.send(self.http.patch(url).json(&json!({}))).await?;
        Ok(())
    }

    async fn copy(
        &self,
        file_id: &str,
        new_parent_id: &str,
        new_name: Option<&str>,
    ) -> Result<String, StoreError> {
        let url = Self::url(
            &format!("{DRIVE_API}/files/{file_id}/copy"),
            &[("supportsAllDrives", "true")],
        )?;
        let mut body = json!({ "parents": [new_parent_id] });
        if let Some(name) = new_name {
            body["name"] = json!(name);
        }
        let copied: FileMeta = self.send_json(self.http.post(url).json(&body)).await?;
        Ok(copied.id)
    }

    fn file_url(&self, file_id: &str) -> String {
        format!("https://drive.google.com/file/d/{file_id}/view")
    }

    fn transcript_mime(&self) -> &'static str {
        DOCUMENT_MIME
    }
}

#[async_trait]
impl DocumentService for GoogleClient {
    async fn copy_template(&self, template_id: &str, title: &str) -> Result<String, DocumentError> {
        let url = Self::url(
            &format!("{DRIVE_API}/files/{template_id}/copy"),
            &[("supportsAllDrives", "true")],
        )?;
        let copied: FileMeta = self
            .send_json(self.http.post(url).json(&json!({ "name": title })))
            .await?;
        Ok(copied.id)
    }

    async fn get(&self, doc_id: &str) -> Result<DocumentStructure, DocumentError> {
        let url = Self::url(&format!("{DOCS_API}/documents/{doc_id}"), &[])?;
        Ok(self.send_json(self.http.get(url)).await?)
    }

    async fn batch_update(&self, doc_id: &str, ops: &[EditOperation]) -> Result<(), DocumentError> {
        if ops.is_empty() {
            return Ok(());
        }
        let requests: Vec<_> = ops.iter().map(EditOperation::to_request).collect();
        let url = Self::url(&format!("{DOCS_API}/documents/{doc_id}:batchUpdate"), &[])?;
        self.send(self.http.post(url).json(&json!({ "requests": requests })))
            .await?;
        debug!(doc_id, ops = ops.len(), "batch applied");
        Ok(())
    }

    async fn move_to_folder(&self, doc_id: &str, folder_id: &str) -> Result<(), DocumentError> {
        Ok(self.move_file(doc_id, folder_id).await?)
    }

    fn doc_url(&self, doc_id: &str) -> String {
        format!("https://docs.google.com/document/d/{doc_id}/edit")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_after_header_wins() {
        let policy = RetryPolicy::default();
        let header = reqwest::header::HeaderValue::from_static("7");
        assert_eq!(
            retry_delay(1, &policy, Some(&header)),
            Duration::from_secs(7)
        );
    }

    #[test]
    fn test_backoff_is_capped() {
        let policy = RetryPolicy::default();
        assert_eq!(retry_delay(1, &policy, None), Duration::from_millis(250));
        assert_eq!(retry_delay(2, &policy, None), Duration::from_millis(500));
        assert_eq!(retry_delay(9, &policy, None), Duration::from_millis(2_000));
    }

    #[test]
    fn test_retryable_statuses() {
        assert!(is_transient_status(StatusCode::TOO_MANY_REQUESTS.as_u16()));
        assert!(is_transient_status(StatusCode::BAD_GATEWAY.as_u16()));
        assert!(is_transient_status(StatusCode::REQUEST_TIMEOUT.as_u16()));
        assert!(!is_transient_status(StatusCode::FORBIDDEN.as_u16()));
    }

    #[test]
    fn test_empty_token_rejected() {
        assert!(matches!(
            GoogleClient::new("  "),
            Err(StoreError::MissingToken)
        ));
    }

    #[test]
    fn test_query_parameters_are_encoded() {
        let url = GoogleClient::url(
            "https://www.googleapis.com/drive/v3/files",
            &[("q", "'abc' in parents")],
        )
        .unwrap();
        assert_eq!(url.query(), Some("q=%27abc%27+in+parents"));
    }
}
