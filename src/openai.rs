//! Remote store gateway over the OpenAI files and vector store APIs.
//!
//! A document lives remotely as a file uploaded with purpose `assistants`
//! (filename = document key) that is attached to the configured vector store.
//!
//! | Operation | Requests |
//! |-----------|----------|
//! | list | `GET /vector_stores/{vs}/files?order=asc`; names from `GET /files`, paged once per listing |
//! | create | `POST /files` (multipart), then `POST /vector_stores/{vs}/files` |
//! | delete | `DELETE /vector_stores/{vs}/files/{id}`, then `DELETE /files/{id}` |
//! | name | `GET /files/{id}` |
//!
//! Requires the `OPENAI_API_KEY` environment variable.
//!
//! # Errors
//!
//! - HTTP 429 → [`RemoteError::RateLimited`], with the `retry-after-ms` or
//!   `retry-after` header as the hint when present
//! - HTTP 404 → [`RemoteError::NotFound`]; delete treats it as already done
//! - any other non-success status, network or decode error →
//!   [`RemoteError::Permanent`]

use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use reqwest::header::HeaderMap;
use reqwest::{Method, RequestBuilder, StatusCode};
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::AssistantConfig;
use crate::error::RemoteError;
use crate::models::{RemoteFile, RemotePage};
use crate::store::RemoteStore;

const FILE_PURPOSE: &str = "assistants";
const FILE_LIST_LIMIT: usize = 10_000;

/// [`RemoteStore`] backed by an OpenAI vector store.
///
/// Build one at startup and share it; the inner HTTP client pools connections.
pub struct OpenAiStore {
    client: reqwest::Client,
    api_base: String,
    api_key: String,
    vector_store_id: String,
    page_size: usize,
    /// File id → filename, refreshed when a listing starts.
    names: DashMap<String, String>,
}

struct FileListPage {
    files: Vec<RemoteFile>,
    last_id: Option<String>,
    has_more: bool,
}

impl OpenAiStore {
    /// Create a gateway from configuration and `OPENAI_API_KEY`.
    ///
    /// # Errors
    ///
    /// Returns an error if the API key or `assistant.vector_store_id` is missing.
    pub fn new(config: &AssistantConfig) -> Result<Self> {
        let api_key = match std::env::var("OPENAI_API_KEY") {
            Ok(key) if !key.is_empty() => key,
            _ => bail!("OPENAI_API_KEY environment variable not set"),
        };
        let vector_store_id = config.require_vector_store_id()?.to_string();

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            api_key,
            vector_store_id,
            page_size: config.page_size,
            names: DashMap::new(),
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.client
            .request(method, format!("{}{}", self.api_base, path))
            .bearer_auth(&self.api_key)
            .header("OpenAI-Beta", "assistants=v2")
    }

    async fn send(&self, request: RequestBuilder) -> Result<Value, RemoteError> {
        let response = request
            .send()
            .await
            .map_err(|e| RemoteError::Permanent(e.into()))?;

        let status = response.status();
        if status.is_success() {
            return response
                .json::<Value>()
                .await
                .map_err(|e| RemoteError::Permanent(e.into()));
        }

        let retry_after = retry_after(response.headers());
        let body = response.text().await.unwrap_or_default();
        Err(classify_failure(status, retry_after, &body))
    }

    /// Reload the filename cache from every page of `GET /files`.
    async fn refresh_names(&self) -> Result<(), RemoteError> {
        self.names.clear();
        let mut after: Option<String> = None;

        loop {
            let mut path = format!(
                "/files?purpose={}&order=asc&limit={}",
                FILE_PURPOSE, FILE_LIST_LIMIT
            );
            if let Some(after) = &after {
                path.push_str(&format!("&after={}", after));
            }

            let json = self.send(self.request(Method::GET, &path)).await?;
            let page = parse_file_list(&json)?;
            for file in page.files {
                self.names.insert(file.id, file.display_name);
            }

            match page.last_id {
                Some(last) if page.has_more => after = Some(last),
                _ => break,
            }
        }

        debug!(count = self.names.len(), "Loaded file names");
        Ok(())
    }

    /// Filename for `id`, from the cache or a single lookup. Empty if the file is gone.
    async fn resolve_name(&self, id: &str) -> Result<String, RemoteError> {
        if let Some(name) = self.names.get(id) {
            return Ok(name.value().clone());
        }
        match self.file_name(id).await {
            Ok(name) => {
                self.names.insert(id.to_string(), name.clone());
                Ok(name)
            }
            Err(e) if e.is_not_found() => {
                debug!(remote_id = %id, "Vector store file has no file object");
                Ok(String::new())
            }
            Err(e) => Err(e),
        }
    }

    async fn upload(&self, key: &str, content: &str) -> Result<String, RemoteError> {
        let part = reqwest::multipart::Part::text(content.to_string())
            .file_name(key.to_string())
            .mime_str("text/markdown")
            .map_err(|e| RemoteError::Permanent(e.into()))?;
        let form = reqwest::multipart::Form::new()
            .text("purpose", FILE_PURPOSE)
            .part("file", part);

        let json = self
            .send(self.request(Method::POST, "/files").multipart(form))
            .await?;
        parse_id(&json)
    }
}

#[async_trait]
impl RemoteStore for OpenAiStore {
    async fn list_files_page(&self, after: Option<&str>) -> Result<RemotePage, RemoteError> {
        let mut path = format!(
            "/vector_stores/{}/files?order=asc&limit={}",
            self.vector_store_id, self.page_size
        );
        if let Some(after) = after {
            path.push_str(&format!("&after={}", after));
        }

        let json = self.send(self.request(Method::GET, &path)).await?;
        let (ids, has_more) = parse_vector_store_page(&json)?;
        if ids.is_empty() {
            return Ok(RemotePage::default());
        }

        if after.is_none() {
            self.refresh_names().await?;
        }

        let mut files = Vec::with_capacity(ids.len());
        for id in ids {
            let display_name = self.resolve_name(&id).await?;
            files.push(RemoteFile { id, display_name });
        }

        Ok(RemotePage { files, has_more })
    }

    async fn create_file(&self, key: &str, content: &str) -> Result<String, RemoteError> {
        let file_id = self.upload(key, content).await?;

        let attach = self
            .send(
                self.request(
                    Method::POST,
                    &format!("/vector_stores/{}/files", self.vector_store_id),
                )
                .json(&serde_json::json!({ "file_id": file_id })),
            )
            .await;

        if let Err(e) = attach {
            // Do not leave an unattached upload behind.
            if let Err(cleanup) = self
                .send(self.request(Method::DELETE, &format!("/files/{}", file_id)))
                .await
            {
                warn!(remote_id = %file_id, error = %cleanup, "Failed to remove unattached file");
            }
            return Err(e);
        }

        self.names.insert(file_id.clone(), key.to_string());
        Ok(file_id)
    }

    async fn delete_file(&self, id: &str) -> Result<(), RemoteError> {
        // Each step may already have happened on an earlier, rate-limited attempt.
        done_if_not_found(
            self.send(self.request(
                Method::DELETE,
                &format!("/vector_stores/{}/files/{}", self.vector_store_id, id),
            ))
            .await,
        )?;
        done_if_not_found(
            self.send(self.request(Method::DELETE, &format!("/files/{}", id)))
                .await,
        )?;
        self.names.remove(id);
        Ok(())
    }

    async fn file_name(&self, id: &str) -> Result<String, RemoteError> {
        let json = self
            .send(self.request(Method::GET, &format!("/files/{}", id)))
            .await?;
        json.get("filename")
            .and_then(|f| f.as_str())
            .map(str::to_string)
            .ok_or_else(|| RemoteError::permanent("Invalid file response: missing filename"))
    }
}

/// Map a non-success response to a [`RemoteError`].
fn classify_failure(status: StatusCode, retry_after: Option<Duration>, body: &str) -> RemoteError {
    match status {
        StatusCode::TOO_MANY_REQUESTS => RemoteError::rate_limited(retry_after),
        StatusCode::NOT_FOUND => {
            RemoteError::not_found(format!("OpenAI API error {}: {}", status, body))
        }
        _ => RemoteError::permanent(format!("OpenAI API error {}: {}", status, body)),
    }
}

fn done_if_not_found(result: Result<Value, RemoteError>) -> Result<(), RemoteError> {
    match result {
        Ok(_) => Ok(()),
        Err(e) if e.is_not_found() => Ok(()),
        Err(e) => Err(e),
    }
}

/// Read the server's requested wait. `retry-after-ms` wins over `retry-after` (seconds).
fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<f64>().ok())
            .filter(|v| v.is_finite() && *v >= 0.0)
    };

    header("retry-after-ms")
        .and_then(|ms| Duration::try_from_secs_f64(ms / 1000.0).ok())
        .or_else(|| header("retry-after").and_then(|s| Duration::try_from_secs_f64(s).ok()))
}

fn parse_vector_store_page(json: &Value) -> Result<(Vec<String>, bool), RemoteError> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| RemoteError::permanent("Invalid vector store response: missing data array"))?;

    let ids = data
        .iter()
        .map(|item| {
            item.get("id")
                .and_then(|id| id.as_str())
                .map(str::to_string)
                .ok_or_else(|| RemoteError::permanent("Invalid vector store response: missing id"))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let has_more = json
        .get("has_more")
        .and_then(|h| h.as_bool())
        .unwrap_or(false);

    Ok((ids, has_more))
}

fn parse_file_list(json: &Value) -> Result<FileListPage, RemoteError> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| RemoteError::permanent("Invalid file list response: missing data array"))?;

    let files = data
        .iter()
        .filter_map(|item| {
            let id = item.get("id")?.as_str()?;
            let filename = item.get("filename")?.as_str()?;
            Some(RemoteFile {
                id: id.to_string(),
                display_name: filename.to_string(),
            })
        })
        .collect();

    // Cursor from the raw last entry, even one without a filename.
    let last_id = data
        .last()
        .and_then(|item| item.get("id"))
        .and_then(|id| id.as_str())
        .map(str::to_string);

    let has_more = json
        .get("has_more")
        .and_then(|h| h.as_bool())
        .unwrap_or(false);

    Ok(FileListPage {
        files,
        last_id,
        has_more,
    })
}

fn parse_id(json: &Value) -> Result<String, RemoteError> {
    json.get("id")
        .and_then(|id| id.as_str())
        .map(str::to_string)
        .ok_or_else(|| RemoteError::permanent("Invalid file response: missing id"))
}
