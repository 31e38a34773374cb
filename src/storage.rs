//! Access to the bucket holding generated models.
//!
//! [`ObjectStore`] is the seam; [`R2Store`] talks to Cloudflare R2 through the
//! S3 API. The free functions layer the listing, grouping and content-type
//! rules on top of any store.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region};
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::presigning::PresigningConfig;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use tracing::{error, info};

use crate::config::R2Config;
use crate::error::{AppError, AppResult};

pub const MODEL_EXTENSIONS: [&str; 5] = [".glb", ".gltf", ".obj", ".ply", ".stl"];
pub const SESSION_SUFFIXES: [&str; 4] = ["base", "textured", "final", "enhanced"];
pub const DEFAULT_MAX_RESULTS: i32 = 50;
pub const DEFAULT_EXPIRES_IN: u64 = 3600;

#[skip_serializing_none]
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StoredFile {
    pub key: String,
    pub last_modified: Option<DateTime<Utc>>,
    pub size: i64,
    pub etag: String,
}

/// One page of a bucket listing.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ListPage {
    pub files: Vec<StoredFile>,
    pub has_more: bool,
    pub next_token: Option<String>,
}

#[derive(Debug, Clone)]
pub struct FetchedFile {
    pub bytes: Bytes,
    pub content_type: &'static str,
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn list(
        &self,
        prefix: Option<&str>,
        max_results: i32,
        continuation_token: Option<&str>,
    ) -> AppResult<ListPage>;

    /// Time-limited GET URL for `key`. `expires_in` is passed through as is.
    async fn sign_url(&self, key: &str, expires_in: Duration) -> AppResult<String>;

    /// Raw object body, or [`AppError::NotFound`].
    async fn get(&self, key: &str) -> AppResult<Bytes>;
}

pub struct R2Store {
    client: aws_sdk_s3::Client,
    bucket: String,
}

impl R2Store {
    pub fn new(config: &R2Config) -> Self {
        let credentials = Credentials::new(
            config.access_key_id.clone(),
            config.secret_access_key.clone(),
            None,
            None,
            "r2-environment",
        );
        let s3_config = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new("auto"))
            .endpoint_url(config.endpoint_url())
            .credentials_provider(credentials)
            .force_path_style(true)
            .build();
        Self {
            client: aws_sdk_s3::Client::from_conf(s3_config),
            bucket: config.bucket.clone(),
        }
    }
}

#[async_trait]
impl ObjectStore for R2Store {
    async fn list(
        &self,
        prefix: Option<&str>,
        max_results: i32,
        continuation_token: Option<&str>,
    ) -> AppResult<ListPage> {
        let output = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .set_prefix(prefix.map(str::to_string))
            .max_keys(max_results)
            .set_continuation_token(continuation_token.map(str::to_string))
            .send()
            .await
            .map_err(|e| {
                error!("❌ Error listing R2 files: {}", DisplayErrorContext(&e));
                AppError::Storage(format!("Failed to list R2 files: {e}"))
            })?;

        let files = output
            .contents()
            .iter()
            .filter_map(|obj| {
                Some(StoredFile {
                    key: obj.key()?.to_string(),
                    last_modified: obj
                        .last_modified()
                        .and_then(|t| DateTime::<Utc>::from_timestamp(t.secs(), t.subsec_nanos())),
                    size: obj.size().unwrap_or_default(),
                    etag: obj.e_tag().unwrap_or_default().to_string(),
                })
            })
            .collect();

        Ok(ListPage {
            files,
            has_more: output.is_truncated().unwrap_or(false),
            next_token: output.next_continuation_token().map(str::to_string),
        })
    }

    async fn sign_url(&self, key: &str, expires_in: Duration) -> AppResult<String> {
        let presigning = PresigningConfig::expires_in(expires_in)
            .map_err(|e| AppError::Storage(format!("Failed to generate presigned URL: {e}")))?;
        let request = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .presigned(presigning)
            .await
            .map_err(|e| {
                error!("❌ Error generating presigned URL: {}", DisplayErrorContext(&e));
                AppError::Storage(format!("Failed to generate presigned URL: {e}"))
            })?;
        Ok(request.uri().to_string())
    }

    async fn get(&self, key: &str) -> AppResult<Bytes> {
        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                let missing = e.as_service_error().map(|se| se.is_no_such_key()).unwrap_or(false)
                    || e.raw_response().map(|r| r.status().as_u16() == 404).unwrap_or(false);
                if missing {
                    AppError::NotFound("File not found in R2 storage".into())
                } else {
                    error!("❌ Error fetching file from R2: {}", DisplayErrorContext(&e));
                    AppError::Storage("Failed to fetch file from R2 storage".into())
                }
            })?;

        let body = output
            .body
            .collect()
            .await
            .map_err(|e| AppError::Storage(format!("Failed to read R2 object body: {e}")))?;
        Ok(body.into_bytes())
    }
}

/// Strips one leading `/` from a requested path.
pub fn clean_path(path: &str) -> &str {
    path.strip_prefix('/').unwrap_or(path)
}

fn extension(path: &str) -> Option<String> {
    let name = path.rsplit('/').next().unwrap_or(path);
    name.rsplit_once('.').map(|(_, ext)| ext.to_ascii_lowercase())
}

pub fn content_type_for(path: &str) -> &'static str {
    match extension(path).as_deref() {
        Some("glb") => "model/gltf-binary",
        Some("gltf") => "model/gltf+json",
        Some("obj") | Some("mtl") => "text/plain",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        _ => "application/octet-stream",
    }
}

pub fn is_model(key: &str) -> bool {
    let key = key.to_ascii_lowercase();
    MODEL_EXTENSIONS.iter().any(|ext| key.ends_with(ext))
}

pub fn filter_models(files: Vec<StoredFile>) -> Vec<StoredFile> {
    files.into_iter().filter(|f| is_model(&f.key)).collect()
}

/// Base name of the generation run a file belongs to.
///
/// `shoe_textured_final_00001_.glb` belongs to `shoe`: the shortest non-empty
/// prefix followed by `_base`, `_textured`, `_final` or `_enhanced`. Anything
/// else is its own session, named after the file without extension.
pub fn session_name(key: &str) -> String {
    let name = key.rsplit('/').next().unwrap_or(key);
    for (idx, _) in name.match_indices('_') {
        if idx == 0 {
            continue;
        }
        let rest = &name[idx + 1..];
        if SESSION_SUFFIXES.iter().any(|s| rest.starts_with(s)) {
            return name[..idx].to_string();
        }
    }
    match name.rsplit_once('.') {
        Some((stem, _)) => stem.to_string(),
        None => name.to_string(),
    }
}

pub fn group_by_session(files: Vec<StoredFile>) -> BTreeMap<String, Vec<StoredFile>> {
    let mut grouped: BTreeMap<String, Vec<StoredFile>> = BTreeMap::new();
    for file in files {
        grouped.entry(session_name(&file.key)).or_default().push(file);
    }
    grouped
}

/// Lists a page, optionally restricted to 3D model files.
pub async fn list_files<S: ObjectStore + ?Sized>(
    store: &S,
    prefix: Option<&str>,
    max_results: i32,
    continuation_token: Option<&str>,
    models_only: bool,
) -> AppResult<ListPage> {
    let mut page = store.list(prefix, max_results, continuation_token).await?;
    if models_only {
        page.files = filter_models(page.files);
    }
    info!("📂 Listed {} files (more: {})", page.files.len(), page.has_more);
    Ok(page)
}

pub async fn fetch_file<S: ObjectStore + ?Sized>(store: &S, path: &str) -> AppResult<FetchedFile> {
    let key = clean_path(path);
    info!("📦 Fetching file from R2: {}", key);
    let bytes = store.get(key).await?;
    Ok(FetchedFile { bytes, content_type: content_type_for(key) })
}

/// Signed URLs already resolved during one browsing session.
///
/// Owned by whoever drives the session; dropping it forgets every URL.
#[derive(Debug, Default, Clone)]
pub struct SignedUrlCache {
    urls: HashMap<String, String>,
}

impl SignedUrlCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.urls.get(key).map(String::as_str)
    }

    pub fn insert(&mut self, key: impl Into<String>, url: impl Into<String>) {
        self.urls.insert(key.into(), url.into());
    }

    pub fn len(&self) -> usize {
        self.urls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.urls.is_empty()
    }

    pub fn clear(&mut self) {
        self.urls.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn file(key: &str) -> StoredFile {
        StoredFile { key: key.into(), last_modified: None, size: 1, etag: "\"e\"".into() }
    }

    fn keys(files: &[StoredFile]) -> Vec<&str> {
        files.iter().map(|f| f.key.as_str()).collect()
    }

    #[test]
    fn groups_outputs_by_generation_run() {
        let grouped = group_by_session(vec![
            file("shoe_base.glb"),
            file("shoe_textured.glb"),
            file("lamp.glb"),
        ]);
        assert_eq!(grouped.len(), 2);
        assert_eq!(keys(&grouped["shoe"]), vec!["shoe_base.glb", "shoe_textured.glb"]);
        assert_eq!(keys(&grouped["lamp"]), vec!["lamp.glb"]);
    }

    #[test]
    fn session_name_uses_shortest_prefix_and_ignores_folders() {
        assert_eq!(session_name("models/enhanced/test_mesh_base_00001_.glb"), "test_mesh");
        assert_eq!(session_name("test_mesh_textured_final_00001_.glb"), "test_mesh");
        assert_eq!(session_name("my_enhanced_base.glb"), "my");
        assert_eq!(session_name("_base.glb"), "_base");
        assert_eq!(session_name("README"), "README");
    }

    #[test]
    fn content_types_follow_extension_table() {
        assert_eq!(content_type_for("model.glb"), "model/gltf-binary");
        assert_eq!(content_type_for("scene.gltf"), "model/gltf+json");
        assert_eq!(content_type_for("mesh.OBJ"), "text/plain");
        assert_eq!(content_type_for("mesh.mtl"), "text/plain");
        assert_eq!(content_type_for("preview.png"), "image/png");
        assert_eq!(content_type_for("preview.JPEG"), "image/jpeg");
        assert_eq!(content_type_for("archive.xyz"), "application/octet-stream");
        assert_eq!(content_type_for("v1.2/noext"), "application/octet-stream");
    }

    #[test]
    fn filters_model_files_case_insensitively() {
        let files = vec![file("a.GLB"), file("b.png"), file("c.stl"), file("d.ply"), file("e.json")];
        assert_eq!(keys(&filter_models(files)), vec!["a.GLB", "c.stl", "d.ply"]);
    }

    #[test]
    fn clean_path_strips_a_single_slash() {
        assert_eq!(clean_path("/models/a.glb"), "models/a.glb");
        assert_eq!(clean_path("//a.glb"), "/a.glb");
        assert_eq!(clean_path("a.glb"), "a.glb");
    }

    #[test]
    fn url_cache_is_per_instance() {
        let mut session = SignedUrlCache::new();
        session.insert("a.glb", "https://signed/a");
        assert_eq!(session.get("a.glb"), Some("https://signed/a"));

        let other = SignedUrlCache::new();
        assert!(other.get("a.glb").is_none());
        session.clear();
        assert!(session.is_empty());
    }
}
