//! C3 provider interface: the capability set mesh/retexture drivers implement
//! (§4.4). `Provider` is a closed sum type over the four mesh backends;
//! `MeshDriver`/`RetextureDriver` are the uniform capability traits the
//! registry (`m3d-providers`) dispatches onto per-variant.

use async_trait::async_trait;
use m3d_types::error::ProviderError;
use m3d_types::pipeline::{DownloadFile, MeshFormat};
use serde_json::Value;

/// Provider-reported task state (§4.4 state mapping table).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Queued,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

/// Result of a `submit` call: an opaque handle plus whatever subscription key
/// the provider needs for subsequent polls.
#[derive(Debug, Clone)]
pub struct TaskHandle {
    pub task_id: String,
    pub subscription_key: Option<String>,
}

/// Result of a `poll` call. `progress` is `None` when the provider gives no
/// progress signal (treated by the state machine as indeterminate, §4.4).
#[derive(Debug, Clone)]
pub struct PollResult {
    pub state: TaskState,
    pub progress: Option<u8>,
    pub failure_reason: Option<String>,
}

/// Uniform capability contract for a 3D mesh-generation backend.
#[async_trait]
pub trait MeshDriver: Send + Sync {
    fn id(&self) -> &'static str;

    /// Flat per-job credit cost (§4.4 registry table).
    fn cost(&self) -> i64;

    /// Submits reference image URLs plus provider-specific options
    /// (§4.4: "invoke provider `submit` with URLs").
    async fn submit(
        &self,
        image_urls: &[String],
        options: &Value,
    ) -> Result<TaskHandle, ProviderError>;

    async fn poll(&self, handle: &TaskHandle) -> Result<PollResult, ProviderError>;

    /// Requests the pipeline's configured format; the registry applies the
    /// `glb > fbx > obj > stl` fallback (§4.4) before calling this, so a
    /// driver only ever sees one concrete format per call attempt, with the
    /// registry retrying the next preference on `NoMatchingFormat`.
    async fn download(
        &self,
        handle: &TaskHandle,
        required_format: MeshFormat,
    ) -> Result<Vec<DownloadFile>, ProviderError>;

    async fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>, ProviderError>;
}

/// Options accepted by the single retexture implementation (Meshy Retexture).
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct RetextureOptions {
    pub style_url: String,
    pub text_prompt: Option<String>,
    pub enable_pbr: bool,
}

/// Separate capability interface for the retexture stage (§4.4).
#[async_trait]
pub trait RetextureDriver: Send + Sync {
    async fn submit_from_mesh(
        &self,
        mesh_task_id: &str,
        options: RetextureOptions,
    ) -> Result<TaskHandle, ProviderError>;

    async fn poll(&self, handle: &TaskHandle) -> Result<PollResult, ProviderError>;

    async fn download(&self, handle: &TaskHandle) -> Result<Vec<DownloadFile>, ProviderError>;

    async fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>, ProviderError>;
}
