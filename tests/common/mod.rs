//! Test doubles shared by the integration tests.
#![allow(dead_code)]

use std::collections::{BTreeMap, VecDeque};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use bytes::Bytes;
use parking_lot::Mutex;
use serde_json::{json, Value};

use hunyuan_studio::config::Section;
use hunyuan_studio::error::{AppError, AppResult};
use hunyuan_studio::models::{GenerationRequest, JobState, JobStatus};
use hunyuan_studio::poller::PollConfig;
use hunyuan_studio::routes::AppState;
use hunyuan_studio::runpod::JobBackend;
use hunyuan_studio::storage::{ListPage, ObjectStore, StoredFile};

pub const PNG_B64: &str = "iVBORw0KGgo=";

/// Job endpoint that replays scripted statuses; the last one repeats.
#[derive(Default)]
pub struct FakeJobs {
    pub submitted: Mutex<Vec<GenerationRequest>>,
    pub script: Mutex<VecDeque<JobStatus>>,
    pub polls: Mutex<u32>,
}

impl FakeJobs {
    pub fn with_script(script: Vec<JobStatus>) -> Arc<Self> {
        Arc::new(Self { script: Mutex::new(script.into()), ..Default::default() })
    }

    pub fn polls(&self) -> u32 {
        *self.polls.lock()
    }
}

#[async_trait]
impl JobBackend for FakeJobs {
    async fn submit(&self, request: &GenerationRequest) -> AppResult<String> {
        self.submitted.lock().push(request.clone());
        Ok("job-1".to_string())
    }

    async fn status(&self, job_id: &str) -> AppResult<JobStatus> {
        *self.polls.lock() += 1;
        let mut script = self.script.lock();
        let next = if script.len() > 1 { script.pop_front() } else { script.front().cloned() };
        let mut status = next.unwrap_or_else(|| JobStatus::new(job_id, JobState::InQueue));
        status.id = job_id.to_string();
        Ok(status)
    }
}

/// Bucket kept in memory. Signed URLs encode the key and lifetime.
#[derive(Default)]
pub struct MemoryStore {
    pub objects: Mutex<BTreeMap<String, Bytes>>,
    pub signed: Mutex<u32>,
}

impl MemoryStore {
    pub fn with_files(keys: &[&str]) -> Arc<Self> {
        let store = Self::default();
        for key in keys {
            store.objects.lock().insert(key.to_string(), Bytes::from(format!("contents of {key}")));
        }
        Arc::new(store)
    }

    pub fn signed(&self) -> u32 {
        *self.signed.lock()
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn list(
        &self,
        prefix: Option<&str>,
        max_results: i32,
        continuation_token: Option<&str>,
    ) -> AppResult<ListPage> {
        let objects = self.objects.lock();
        let matching: Vec<StoredFile> = objects
            .iter()
            .filter(|(k, _)| prefix.map_or(true, |p| k.starts_with(p)))
            .filter(|(k, _)| continuation_token.map_or(true, |t| k.as_str() > t))
            .map(|(k, v)| StoredFile { key: k.clone(), last_modified: None, size: v.len() as i64, etag: "\"etag\"".into() })
            .collect();
        let limit = usize::try_from(max_results).unwrap_or(0);
        let has_more = matching.len() > limit;
        let files: Vec<StoredFile> = matching.into_iter().take(limit).collect();
        let next_token = if has_more { files.last().map(|f| f.key.clone()) } else { None };
        Ok(ListPage { files, has_more, next_token })
    }

    async fn sign_url(&self, key: &str, expires_in: Duration) -> AppResult<String> {
        *self.signed.lock() += 1;
        Ok(format!("https://signed.test/{key}?X-Amz-Expires={}", expires_in.as_secs()))
    }

    async fn get(&self, key: &str) -> AppResult<Bytes> {
        self.objects
            .lock()
            .get(key)
            .cloned()
            .ok_or_else(|| AppError::NotFound("File not found in R2 storage".into()))
    }
}

/// Worker output, including fields this service has no type for.
pub fn sample_result() -> Value {
    json!({
        "status": "success",
        "workflow_type": "mesh",
        "output_files": [{
            "filename": "shoe_base_00001_.glb",
            "download_url": "https://pub.example.r2.dev/models/mesh/shoe.glb",
            "file_type": "base_mesh",
            "full_path": "/app/output/3D/shoe_base_00001_.glb",
            "uploaded_to_r2": true,
            "r2_key": "models/mesh/shoe_base_00001_.glb"
        }],
        "mesh_stats": { "original_faces": 1000, "decimation_ratio": 0.5 },
        "processing_time": 42.5,
        "r2_configured": true,
        "r2_public_base": "https://pub.example.r2.dev"
    })
}

pub fn completed() -> JobStatus {
    let mut status = JobStatus::new("job-1", JobState::Completed);
    status.output = Some(sample_result());
    status
}

pub fn quick_poll() -> PollConfig {
    PollConfig { interval: Duration::from_millis(1), max_attempts: 5 }
}

pub fn state(jobs: Arc<FakeJobs>, store: Arc<MemoryStore>) -> AppState {
    AppState::new(Section::Ready(jobs), Section::Ready(store), quick_poll())
}

pub fn unconfigured() -> AppState {
    AppState::new(
        Section::Missing(vec!["RUNPOD_ENDPOINT_ID", "RUNPOD_API_KEY"]),
        Section::Missing(vec!["R2_BUCKET_NAME"]),
        quick_poll(),
    )
}

/// Serves `app` on an ephemeral local port.
pub async fn serve(app: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("serve");
    });
    addr
}
