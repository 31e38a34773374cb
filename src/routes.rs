use std::{collections::HashMap, sync::Arc, time::Duration};

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use serde_with::skip_serializing_none;
use tower_http::cors::{Any, CorsLayer};
use uuid::Uuid;

use crate::{
    config::{Config, Section, DEFAULT_TRACKED_RETENTION},
    error::{AppError, AppResult},
    models::{GenerationRequest, GenerationResult, JobState, JobStatus, StartResponse, Workflow},
    poller::{self, PollConfig, Progress, FAILED_FALLBACK_MESSAGE},
    runpod::{JobBackend, RunpodClient},
    storage::{self, ObjectStore, R2Store, StoredFile, DEFAULT_EXPIRES_IN, DEFAULT_MAX_RESULTS},
};

pub type TrackedStore = Arc<RwLock<HashMap<Uuid, TrackedJob>>>;

#[derive(Clone)]
pub struct AppState {
    pub jobs: Section<Arc<dyn JobBackend>>,
    pub storage: Section<Arc<dyn ObjectStore>>,
    pub poll: PollConfig,
    pub tracked: TrackedStore,
    pub retention: Duration,
}

impl AppState {
    pub fn new(jobs: Section<Arc<dyn JobBackend>>, storage: Section<Arc<dyn ObjectStore>>, poll: PollConfig) -> Self {
        Self { jobs, storage, poll, tracked: TrackedStore::default(), retention: DEFAULT_TRACKED_RETENTION }
    }

    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    pub fn from_config(config: &Config) -> Self {
        let jobs: Section<Arc<dyn JobBackend>> = match &config.runpod {
            Section::Ready(rp) => Section::Ready(Arc::new(RunpodClient::new(rp))),
            Section::Missing(vars) => Section::Missing(vars.clone()),
        };
        let storage: Section<Arc<dyn ObjectStore>> = match &config.r2 {
            Section::Ready(r2) => Section::Ready(Arc::new(R2Store::new(r2))),
            Section::Missing(vars) => Section::Missing(vars.clone()),
        };
        Self::new(jobs, storage, config.poll).with_retention(config.tracked_retention)
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/hunyuan/start", post(start_task))
        .route("/api/hunyuan/status", get(task_status))
        .route("/api/jobs", post(create_job))
        .route("/api/jobs/:id", get(get_job))
        .route("/api/r2/list", get(list_files))
        .route("/api/r2/url", get(signed_url))
        .route("/api/r2/file", get(fetch_file))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
        )
        .with_state(state)
}

// --- Jobs ---

/// Status as reported to callers: `output` only on COMPLETED, `error` only on FAILED.
#[skip_serializing_none]
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub status: JobState,
    pub task_id: String,
    pub delay_time: Option<u64>,
    pub execution_time: Option<u64>,
    pub output: Option<Value>,
    pub error: Option<String>,
}

impl From<JobStatus> for StatusResponse {
    fn from(remote: JobStatus) -> Self {
        let (output, error) = match remote.status {
            JobState::Completed => (remote.output, None),
            JobState::Failed => (
                None,
                Some(remote.error.filter(|e| !e.is_empty()).unwrap_or_else(|| FAILED_FALLBACK_MESSAGE.to_string())),
            ),
            _ => (None, None),
        };
        Self {
            status: remote.status,
            task_id: remote.id,
            delay_time: remote.delay_time,
            execution_time: remote.execution_time,
            output,
            error,
        }
    }
}

impl From<StatusResponse> for JobStatus {
    fn from(r: StatusResponse) -> Self {
        Self {
            status: r.status,
            id: r.task_id,
            delay_time: r.delay_time,
            execution_time: r.execution_time,
            output: r.output,
            error: r.error,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusQuery {
    task_id: Option<String>,
}

/// Configuration first, then the body.
fn accept_request(
    state: &AppState,
    body: Result<Json<GenerationRequest>, JsonRejection>,
) -> AppResult<(Arc<dyn JobBackend>, GenerationRequest)> {
    let backend = state.jobs.get()?.clone();
    let Json(body) = body.map_err(|e| AppError::Validation(e.body_text()))?;
    Ok((backend, body))
}

/// Checks the two required fields and forwards the body as received.
pub async fn start_task(
    State(state): State<AppState>,
    body: Result<Json<GenerationRequest>, JsonRejection>,
) -> AppResult<Json<StartResponse>> {
    let (backend, request) = accept_request(&state, body)?;
    let workflow = request.validate()?;
    tracing::info!("🚀 Starting Hunyuan {} task", workflow);
    let task_id = backend.submit(&request).await?;
    Ok(Json(StartResponse { task_id }))
}

pub async fn task_status(
    State(state): State<AppState>,
    Query(query): Query<StatusQuery>,
) -> AppResult<Json<StatusResponse>> {
    let backend = state.jobs.get()?;
    let task_id = query
        .task_id
        .filter(|id| !id.is_empty())
        .ok_or_else(|| AppError::Validation("taskId parameter is required".into()))?;
    let status = backend.status(&task_id).await?;
    Ok(Json(status.into()))
}

/// Which screen the front end should show for a tracked job.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum View {
    Generator,
    Results,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TrackedState {
    Running,
    Completed,
    Failed,
}

/// A generation the server submits and polls on the caller's behalf.
/// Finished jobs are dropped once the retention window passes.
#[skip_serializing_none]
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct TrackedJob {
    pub id: Uuid,
    pub task_id: Option<String>,
    pub workflow: Workflow,
    pub state: TrackedState,
    pub view: View,
    pub progress: String,
    pub result: Option<Value>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn update_tracked(store: &TrackedStore, id: Uuid, apply: impl FnOnce(&mut TrackedJob)) {
    if let Some(job) = store.write().get_mut(&id) {
        apply(job);
        job.updated_at = Utc::now();
    }
}

pub async fn create_job(
    State(state): State<AppState>,
    body: Result<Json<GenerationRequest>, JsonRejection>,
) -> AppResult<(StatusCode, Json<TrackedJob>)> {
    let (backend, request) = accept_request(&state, body)?;
    let (workflow, request) = request.prepare()?;

    let id = Uuid::new_v4();
    let job = TrackedJob {
        id,
        task_id: None,
        workflow,
        state: TrackedState::Running,
        view: View::Generator,
        progress: Progress::Starting.to_string(),
        result: None,
        error: None,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    };
    state.tracked.write().insert(id, job.clone());
    tracing::info!("🎯 Tracking {} generation {}", workflow, id);

    let store = state.tracked.clone();
    let poll = state.poll;
    let retention = state.retention;
    tokio::spawn(async move {
        let progress_store = store.clone();
        let on_progress = move |p: &Progress| {
            update_tracked(&progress_store, id, |job| {
                if let Progress::Started { job_id } = p {
                    job.task_id = Some(job_id.clone());
                }
                job.progress = p.to_string();
            });
        };

        match poller::generate(backend.as_ref(), request, &poll, on_progress).await {
            Ok(result) => {
                let files = GenerationResult::from_output(&result).map_or(0, |r| r.output_files.len());
                tracing::info!("✅ Generation {} finished with {} files", id, files);
                update_tracked(&store, id, |job| {
                    job.state = TrackedState::Completed;
                    job.view = View::Results;
                    job.result = Some(result);
                });
            }
            Err(e) => {
                tracing::error!("❌ Generation {} failed: {}", id, e);
                update_tracked(&store, id, |job| {
                    job.state = TrackedState::Failed;
                    job.progress = String::new();
                    job.error = Some(e.to_string());
                });
            }
        }

        tokio::time::sleep(retention).await;
        if store.write().remove(&id).is_some() {
            tracing::debug!("🧹 Dropped finished generation {}", id);
        }
    });

    Ok((StatusCode::ACCEPTED, Json(job)))
}

pub async fn get_job(Path(id): Path<Uuid>, State(state): State<AppState>) -> AppResult<Json<TrackedJob>> {
    state
        .tracked
        .read()
        .get(&id)
        .cloned()
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("No tracked job {id}")))
}

// --- Storage ---

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ListQuery {
    prefix: Option<String>,
    max_results: Option<String>,
    continuation_token: Option<String>,
    filter_models: Option<String>,
    group_by_sessions: Option<String>,
}

#[skip_serializing_none]
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct FilesResponse {
    files: Vec<StoredFile>,
    has_more: bool,
    next_token: Option<String>,
}

#[skip_serializing_none]
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SessionsResponse {
    sessions: std::collections::BTreeMap<String, Vec<StoredFile>>,
    has_more: bool,
    next_token: Option<String>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

fn flag(value: &Option<String>) -> bool {
    value.as_deref() == Some("true")
}

pub async fn list_files(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> AppResult<Response> {
    let store = state.storage.get()?;
    let max_results = query
        .max_results
        .as_deref()
        .and_then(|v| v.parse::<i32>().ok())
        .unwrap_or(DEFAULT_MAX_RESULTS);
    let prefix = non_empty(query.prefix);
    let token = non_empty(query.continuation_token);

    let page = storage::list_files(
        store.as_ref(),
        prefix.as_deref(),
        max_results,
        token.as_deref(),
        flag(&query.filter_models),
    )
    .await?;

    if flag(&query.group_by_sessions) {
        let sessions = storage::group_by_session(page.files);
        return Ok(Json(SessionsResponse { sessions, has_more: page.has_more, next_token: page.next_token })
            .into_response());
    }
    Ok(Json(FilesResponse { files: page.files, has_more: page.has_more, next_token: page.next_token }).into_response())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UrlQuery {
    key: Option<String>,
    expires_in: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SignedUrlResponse {
    pub key: String,
    pub url: String,
    pub expires_in: u64,
    pub expires_at: DateTime<Utc>,
}

pub async fn signed_url(
    State(state): State<AppState>,
    Query(query): Query<UrlQuery>,
) -> AppResult<Json<SignedUrlResponse>> {
    let store = state.storage.get()?;
    let expires_in = query
        .expires_in
        .as_deref()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(DEFAULT_EXPIRES_IN);
    let key = non_empty(query.key).ok_or_else(|| AppError::Validation("key parameter is required".into()))?;

    let url = store.sign_url(&key, Duration::from_secs(expires_in)).await?;
    let lifetime = chrono::Duration::seconds(i64::try_from(expires_in).unwrap_or(i64::MAX).min(i64::MAX / 1000));
    let expires_at = Utc::now().checked_add_signed(lifetime).unwrap_or(DateTime::<Utc>::MAX_UTC);
    Ok(Json(SignedUrlResponse { key, url, expires_in, expires_at }))
}

#[derive(Debug, Deserialize)]
pub struct FileQuery {
    path: Option<String>,
}

pub async fn fetch_file(
    State(state): State<AppState>,
    Query(query): Query<FileQuery>,
) -> AppResult<Response> {
    let store = state.storage.get()?;
    let path = non_empty(query.path).ok_or_else(|| AppError::Validation("File path is required".into()))?;

    let file = storage::fetch_file(store.as_ref(), &path).await?;
    let headers = [
        (header::CONTENT_TYPE, HeaderValue::from_static(file.content_type)),
        (header::CACHE_CONTROL, HeaderValue::from_static("public, max-age=31536000")),
    ];
    Ok((StatusCode::OK, headers, file.bytes).into_response())
}

// --- Health ---

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Health {
    status: &'static str,
    jobs_configured: bool,
    storage_configured: bool,
}

pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(Health {
        status: "ok",
        jobs_configured: state.jobs.is_ready(),
        storage_configured: state.storage.is_ready(),
    })
}
