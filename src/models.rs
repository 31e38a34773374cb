use std::fmt;

use base64::Engine;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use serde_with::skip_serializing_none;

use crate::error::{AppError, AppResult};

/// Generation mode understood by the Hunyuan worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Workflow {
    /// Image to untextured mesh.
    Mesh,
    /// Texture synthesis only.
    Texture,
    /// Mesh, texture and decimation in one run.
    Enhanced,
}

impl Workflow {
    pub const ALL: [Workflow; 3] = [Workflow::Mesh, Workflow::Texture, Workflow::Enhanced];

    pub fn as_str(&self) -> &'static str {
        match self {
            Workflow::Mesh => "mesh",
            Workflow::Texture => "texture",
            Workflow::Enhanced => "enhanced",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|w| w.as_str() == value)
    }

    pub fn needs_mesh(&self) -> bool { matches!(self, Workflow::Mesh | Workflow::Enhanced) }
    pub fn needs_texture(&self) -> bool { matches!(self, Workflow::Texture | Workflow::Enhanced) }
    pub fn needs_decimation(&self) -> bool { matches!(self, Workflow::Enhanced) }
}

impl fmt::Display for Workflow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shape-generation options. Fields the caller leaves out stay out of the
/// forwarded body; the worker applies its own defaults.
#[skip_serializing_none]
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct MeshParams {
    pub steps: Option<u32>,
    pub guidance_scale: Option<f64>,
    pub seed: Option<i64>,
    pub max_facenum: Option<u32>,
    pub octree_resolution: Option<u32>,
    pub num_chunks: Option<u32>,
    pub enable_flash_vdm: Option<bool>,
    pub force_offload: Option<bool>,
    /// Worker options this service does not know about, forwarded as-is.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for MeshParams {
    fn default() -> Self {
        Self {
            steps: Some(25),
            guidance_scale: Some(3.5),
            seed: Some(42),
            max_facenum: Some(20000),
            octree_resolution: Some(224),
            num_chunks: Some(3000),
            enable_flash_vdm: Some(true),
            force_offload: Some(true),
            extra: Map::new(),
        }
    }
}

#[skip_serializing_none]
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct TextureParams {
    pub view_size: Option<u32>,
    pub steps: Option<u32>,
    pub guidance_scale: Option<f64>,
    pub texture_size: Option<u32>,
    pub upscale_albedo: Option<bool>,
    pub upscale_mr: Option<bool>,
    /// Comma separated degrees, e.g. `"0, 180, 90"`.
    pub camera_azimuths: Option<String>,
    pub camera_elevations: Option<String>,
    pub view_weights: Option<String>,
    pub ortho_scale: Option<f64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for TextureParams {
    fn default() -> Self {
        Self {
            view_size: Some(512),
            steps: Some(15),
            guidance_scale: Some(3.5),
            texture_size: Some(1024),
            upscale_albedo: Some(false),
            upscale_mr: Some(false),
            camera_azimuths: Some("0, 180, 90, 270, 45, 315".to_string()),
            camera_elevations: Some("0, 0, 0, 0, 30, 30".to_string()),
            view_weights: Some("1.0, 1.0, 1.0, 1.0, 0.8, 0.8".to_string()),
            ortho_scale: Some(1.10),
            extra: Map::new(),
        }
    }
}

#[skip_serializing_none]
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct DecimationParams {
    pub enable_decimation: Option<bool>,
    pub target_face_count: Option<u32>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for DecimationParams {
    fn default() -> Self {
        Self { enable_decimation: Some(false), target_face_count: Some(15000), extra: Map::new() }
    }
}

/// Body of a generation request, as posted by the front end and forwarded
/// to the worker under `input`.
///
/// `workflow` and `input_image` stay loosely typed so that bad values reach
/// [`GenerationRequest::validate`] instead of failing JSON extraction.
#[skip_serializing_none]
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct GenerationRequest {
    pub workflow: Option<String>,
    pub input_image: Option<String>,
    pub output_name: Option<String>,
    pub vae_model: Option<String>,
    pub diffusion_model: Option<String>,
    pub upload_to_r2: Option<bool>,
    pub keep_local_files: Option<bool>,
    pub remove_background: Option<bool>,
    pub bg_threshold: Option<f64>,
    pub bg_use_jit: Option<bool>,
    pub mesh_params: Option<MeshParams>,
    pub texture_params: Option<TextureParams>,
    pub decimation_params: Option<DecimationParams>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl GenerationRequest {
    pub fn new(workflow: Workflow, input_image: impl Into<String>) -> Self {
        Self {
            workflow: Some(workflow.as_str().to_string()),
            input_image: Some(input_image.into()),
            ..Default::default()
        }
    }

    /// Checks the two fields the worker cannot run without. The request
    /// itself is left untouched.
    pub fn validate(&self) -> AppResult<Workflow> {
        let image = self.input_image.as_deref().map(strip_data_url).unwrap_or_default();
        if image.is_empty() {
            return Err(AppError::Validation("input_image is required".into()));
        }
        let workflow = self
            .workflow
            .as_deref()
            .and_then(Workflow::parse)
            .ok_or_else(|| AppError::Validation("workflow must be one of: mesh, texture, enhanced".into()))?;
        if base64::engine::general_purpose::STANDARD.decode(image).is_err() {
            return Err(AppError::Validation("input_image must be base64 encoded".into()));
        }
        Ok(workflow)
    }

    /// Validates, then normalises the request the way the front end does
    /// before submitting: the `data:` prefix goes, required parameter blocks
    /// get defaults and blocks the workflow ignores are dropped.
    pub fn prepare(mut self) -> AppResult<(Workflow, Self)> {
        let workflow = self.validate()?;
        self.input_image = self.input_image.as_deref().map(|img| strip_data_url(img).to_string());

        if workflow.needs_mesh() {
            self.mesh_params.get_or_insert_with(MeshParams::default);
        } else {
            self.mesh_params = None;
        }
        if workflow.needs_texture() {
            self.texture_params.get_or_insert_with(TextureParams::default);
        } else {
            self.texture_params = None;
        }
        if workflow.needs_decimation() {
            self.decimation_params.get_or_insert_with(DecimationParams::default);
        } else {
            self.decimation_params = None;
        }
        Ok((workflow, self))
    }
}

/// Drops a `data:image/...;base64,` prefix as produced by browser file readers.
pub fn strip_data_url(image: &str) -> &str {
    let image = image.trim();
    match image.strip_prefix("data:") {
        Some(rest) => rest.split_once(',').map(|(_, payload)| payload).unwrap_or(""),
        None => image,
    }
}

/// Remote job state. Unknown strings are kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobState {
    InQueue,
    InProgress,
    Completed,
    Failed,
    Other(String),
}

impl JobState {
    pub fn as_str(&self) -> &str {
        match self {
            JobState::InQueue => "IN_QUEUE",
            JobState::InProgress => "IN_PROGRESS",
            JobState::Completed => "COMPLETED",
            JobState::Failed => "FAILED",
            JobState::Other(s) => s,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }
}

impl From<String> for JobState {
    fn from(value: String) -> Self {
        match value.as_str() {
            "IN_QUEUE" => JobState::InQueue,
            "IN_PROGRESS" => JobState::InProgress,
            "COMPLETED" => JobState::Completed,
            "FAILED" => JobState::Failed,
            _ => JobState::Other(value),
        }
    }
}

impl Serialize for JobState {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for JobState {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(JobState::from)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status document of one remote job (`GET /status/{id}`).
///
/// `output` is kept as raw JSON so a completed result travels through
/// unmodified, whatever the worker put in it.
#[skip_serializing_none]
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JobStatus {
    pub status: JobState,
    #[serde(default)]
    pub id: String,
    pub delay_time: Option<u64>,
    pub execution_time: Option<u64>,
    pub output: Option<Value>,
    pub error: Option<String>,
}

impl JobStatus {
    pub fn new(id: impl Into<String>, status: JobState) -> Self {
        Self { status, id: id.into(), delay_time: None, execution_time: None, output: None, error: None }
    }
}

#[skip_serializing_none]
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
#[serde(default)]
pub struct OutputFile {
    pub filename: String,
    pub download_url: Option<String>,
    pub file_type: Option<String>,
    pub full_path: Option<String>,
    pub uploaded_to_r2: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[skip_serializing_none]
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
pub struct MeshStats {
    pub original_faces: Option<u64>,
    pub processed_faces: Option<u64>,
    pub final_faces: Option<u64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[skip_serializing_none]
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
pub struct TextureInfo {
    pub generated_views: Option<u32>,
    pub texture_size: Option<u32>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Typed view of a completed job's output. Every field is optional so a
/// payload of any shape can be inspected; the raw JSON stays authoritative.
#[skip_serializing_none]
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
#[serde(default)]
pub struct GenerationResult {
    pub status: Option<String>,
    pub workflow_type: Option<String>,
    pub output_files: Vec<OutputFile>,
    pub mesh_stats: Option<MeshStats>,
    pub texture_info: Option<TextureInfo>,
    pub processing_time: Option<f64>,
    pub r2_configured: Option<bool>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl GenerationResult {
    /// Reads `output`; `None` when it is not an object of the expected shape.
    pub fn from_output(output: &Value) -> Option<Self> {
        serde_json::from_value(output.clone()).ok()
    }
}

/// Reply of `POST /api/hunyuan/start`.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StartResponse {
    pub task_id: String,
}
