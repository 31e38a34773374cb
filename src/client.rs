//! Typed caller of this service's own HTTP API.
//!
//! This is what the browser front end does: start a task, poll its status
//! from the client side, then browse the bucket and resolve model URLs.

use std::collections::BTreeMap;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::debug;

use crate::error::{AppError, AppResult};
use crate::models::{GenerationRequest, JobStatus, StartResponse};
use crate::routes::{SignedUrlResponse, StatusResponse};
use crate::runpod::JobBackend;
use crate::storage::{SignedUrlCache, StoredFile};

pub struct StudioClient {
    client: Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilePage {
    pub files: Vec<StoredFile>,
    pub has_more: bool,
    #[serde(default)]
    pub next_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionPage {
    pub sessions: BTreeMap<String, Vec<StoredFile>>,
    pub has_more: bool,
    #[serde(default)]
    pub next_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
}

impl StudioClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Sends the request and turns error replies back into [`AppError`]s.
    async fn send(&self, request: RequestBuilder) -> AppResult<Response> {
        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response
            .json::<ErrorBody>()
            .await
            .map(|b| b.error)
            .unwrap_or_else(|_| status.canonical_reason().unwrap_or_default().to_string());
        debug!("request failed with {}: {}", status, message);
        Err(match status.as_u16() {
            400 => AppError::Validation(message),
            404 => AppError::NotFound(message),
            code => AppError::Remote { status: code, status_text: message },
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> AppResult<T> {
        self.send(request)
            .await?
            .json()
            .await
            .map_err(|e| AppError::Decode(e.to_string()))
    }

    fn list_request(&self, prefix: Option<&str>, max_results: i32, models_only: bool, grouped: bool) -> RequestBuilder {
        let mut query = vec![
            ("maxResults", max_results.to_string()),
            ("filterModels", models_only.to_string()),
            ("groupBySessions", grouped.to_string()),
        ];
        if let Some(prefix) = prefix {
            query.push(("prefix", prefix.to_string()));
        }
        self.client.get(self.url("/api/r2/list")).query(&query)
    }

    pub async fn list_files(
        &self,
        prefix: Option<&str>,
        max_results: i32,
        continuation_token: Option<&str>,
        models_only: bool,
    ) -> AppResult<FilePage> {
        let mut request = self.list_request(prefix, max_results, models_only, false);
        if let Some(token) = continuation_token {
            request = request.query(&[("continuationToken", token)]);
        }
        self.get_json(request).await
    }

    /// Model files grouped by generation run, as shown in the model browser.
    pub async fn list_sessions(&self, max_results: i32) -> AppResult<SessionPage> {
        self.get_json(self.list_request(None, max_results, true, true)).await
    }

    pub async fn sign_url(&self, key: &str, expires_in: Option<u64>) -> AppResult<SignedUrlResponse> {
        let mut request = self.client.get(self.url("/api/r2/url")).query(&[("key", key)]);
        if let Some(expires_in) = expires_in {
            request = request.query(&[("expiresIn", expires_in)]);
        }
        self.get_json(request).await
    }

    /// Downloads a stored file, returning its bytes and content type.
    pub async fn fetch_file(&self, path: &str) -> AppResult<(Bytes, String)> {
        let response = self
            .send(self.client.get(self.url("/api/r2/file")).query(&[("path", path)]))
            .await?;
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("application/octet-stream")
            .to_string();
        Ok((response.bytes().await?, content_type))
    }
}

#[async_trait]
impl JobBackend for StudioClient {
    async fn submit(&self, request: &GenerationRequest) -> AppResult<String> {
        let started: StartResponse = self
            .get_json(self.client.post(self.url("/api/hunyuan/start")).json(request))
            .await?;
        Ok(started.task_id)
    }

    async fn status(&self, job_id: &str) -> AppResult<JobStatus> {
        let status: StatusResponse = self
            .get_json(self.client.get(self.url("/api/hunyuan/status")).query(&[("taskId", job_id)]))
            .await?;
        Ok(status.into())
    }
}

/// One visit to the model browser: a client plus the URLs it already signed.
pub struct BrowseSession<'a> {
    client: &'a StudioClient,
    urls: SignedUrlCache,
}

impl<'a> BrowseSession<'a> {
    pub fn new(client: &'a StudioClient) -> Self {
        Self { client, urls: SignedUrlCache::new() }
    }

    /// Signed URL for `key`, asking the server only the first time.
    pub async fn model_url(&mut self, key: &str) -> AppResult<String> {
        if let Some(url) = self.urls.get(key) {
            return Ok(url.to_string());
        }
        let signed = self.client.sign_url(key, None).await?;
        self.urls.insert(key, signed.url.clone());
        Ok(signed.url)
    }

    pub fn cache(&self) -> &SignedUrlCache {
        &self.urls
    }
}
