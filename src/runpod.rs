use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::Deserialize;
use serde_json::json;
use tracing::{error, info};

use crate::config::RunpodConfig;
use crate::error::{AppError, AppResult};
use crate::models::{GenerationRequest, JobStatus};

/// Anything that can start a generation job and report on it.
#[async_trait]
pub trait JobBackend: Send + Sync {
    /// Starts a job and returns the id issued by the remote side.
    async fn submit(&self, request: &GenerationRequest) -> AppResult<String>;

    /// Fetches the current status of a job. Never cached.
    async fn status(&self, job_id: &str) -> AppResult<JobStatus>;
}

/// Client for a RunPod serverless endpoint hosting the Hunyuan worker.
pub struct RunpodClient {
    client: Client,
    endpoint_base: String,
    api_key: String,
}

#[derive(Debug, Deserialize)]
struct RunResponse {
    #[serde(default)]
    id: Option<String>,
}

impl RunpodClient {
    pub fn new(config: &RunpodConfig) -> Self {
        Self {
            client: Client::new(),
            endpoint_base: config.endpoint_base(),
            api_key: config.api_key.clone(),
        }
    }

    pub fn endpoint_base(&self) -> &str {
        &self.endpoint_base
    }

    async fn check(response: Response, what: &str) -> AppResult<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        error!("❌ RunPod {} error {}: {}", what, status, body);
        Err(AppError::Remote {
            status: status.as_u16(),
            status_text: status.canonical_reason().unwrap_or_default().to_string(),
        })
    }
}

#[async_trait]
impl JobBackend for RunpodClient {
    async fn submit(&self, request: &GenerationRequest) -> AppResult<String> {
        let url = format!("{}/run", self.endpoint_base);
        info!(
            "🚀 Starting {} task at {}",
            request.workflow.as_deref().unwrap_or("?"),
            url
        );

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&json!({ "input": request }))
            .send()
            .await?;
        let response = Self::check(response, "run").await?;

        let parsed: RunResponse = response
            .json()
            .await
            .map_err(|e| AppError::Decode(format!("run response: {e}")))?;
        let id = parsed
            .id
            .filter(|id| !id.is_empty())
            .ok_or_else(|| AppError::Decode("run response has no job id".into()))?;

        info!("✅ Task started with ID: {}", id);
        Ok(id)
    }

    async fn status(&self, job_id: &str) -> AppResult<JobStatus> {
        let url = format!("{}/status/{}", self.endpoint_base, job_id);
        let response = self.client.get(&url).bearer_auth(&self.api_key).send().await?;
        let response = Self::check(response, "status").await?;

        let status: JobStatus = response
            .json()
            .await
            .map_err(|e| AppError::Decode(format!("status response: {e}")))?;
        info!("📥 Task {} status: {}", job_id, status.status);
        Ok(status)
    }
}
