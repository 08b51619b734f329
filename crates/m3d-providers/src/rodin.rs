//! Rodin image-to-3D driver (§4.4): cost 8, no extra options.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};

use m3d_api::provider::{MeshDriver, PollResult, TaskHandle, TaskState};
use m3d_types::error::ProviderError;
use m3d_types::pipeline::{DownloadFile, MeshFormat};

use crate::http::{build_client, decode_json, get, post_json};

pub struct RodinDriver {
    client: Client,
    api_key: String,
    base_url: String,
}

impl RodinDriver {
    pub fn new(api_key: String) -> Self {
        Self::with_base_url(api_key, "https://hyperhuman.deemos.com".to_string())
    }

    pub fn with_base_url(api_key: String, base_url: String) -> Self {
        Self {
            client: build_client(),
            api_key,
            base_url,
        }
    }
}

#[derive(Deserialize)]
struct SubmitResponse {
    uuid: String,
    subscription_key: Option<String>,
}

#[derive(Deserialize)]
struct StatusResponse {
    status: String,
    progress: Option<u8>,
    error: Option<String>,
    artifacts: Option<Vec<ArtifactBody>>,
}

#[derive(Deserialize)]
struct ArtifactBody {
    format: String,
    url: String,
    name: String,
}

fn map_state(status: &str) -> TaskState {
    match status {
        "Queued" | "Waiting" => TaskState::Queued,
        "Generating" => TaskState::Running,
        "Done" => TaskState::Succeeded,
        "Failed" => TaskState::Failed,
        "Canceled" => TaskState::Cancelled,
        _ => TaskState::Running,
    }
}

fn parse_format(raw: &str) -> Option<MeshFormat> {
    match raw.to_lowercase().as_str() {
        "glb" => Some(MeshFormat::Glb),
        "fbx" => Some(MeshFormat::Fbx),
        "obj" => Some(MeshFormat::Obj),
        "stl" => Some(MeshFormat::Stl),
        _ => None,
    }
}

#[async_trait]
impl MeshDriver for RodinDriver {
    fn id(&self) -> &'static str {
        "rodin"
    }

    fn cost(&self) -> i64 {
        8
    }

    async fn submit(
        &self,
        image_urls: &[String],
        _options: &Value,
    ) -> Result<TaskHandle, ProviderError> {
        let body = json!({ "images": image_urls });

        let response = post_json(
            &self.client,
            &format!("{}/api/v2/rodin", self.base_url),
            &self.api_key,
            &body,
        )
        .await?;
        let parsed: SubmitResponse = decode_json(response).await?;

        Ok(TaskHandle {
            task_id: parsed.uuid,
            subscription_key: parsed.subscription_key,
        })
    }

    async fn poll(&self, handle: &TaskHandle) -> Result<PollResult, ProviderError> {
        let response = get(
            &self.client,
            &format!("{}/api/v2/status/{}", self.base_url, handle.task_id),
            &self.api_key,
        )
        .await?;
        let parsed: StatusResponse = decode_json(response).await?;

        Ok(PollResult {
            state: map_state(&parsed.status),
            progress: parsed.progress,
            failure_reason: parsed.error,
        })
    }

    async fn download(
        &self,
        handle: &TaskHandle,
        required_format: MeshFormat,
    ) -> Result<Vec<DownloadFile>, ProviderError> {
        let response = get(
            &self.client,
            &format!("{}/api/v2/download/{}", self.base_url, handle.task_id),
            &self.api_key,
        )
        .await?;
        let parsed: StatusResponse = decode_json(response).await?;
        let artifacts = parsed.artifacts.unwrap_or_default();

        let files: Vec<DownloadFile> = artifacts
            .into_iter()
            .filter_map(|a| {
                let format = parse_format(&a.format)?;
                if format != required_format {
                    return None;
                }
                Some(DownloadFile {
                    format,
                    url: a.url,
                    name: a.name,
                })
            })
            .collect();

        Ok(files)
    }

    async fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>, ProviderError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ProviderError::Transport(e.to_string()))?;
        response
            .bytes()
            .await
            .map(|b| b.to_vec())
            .map_err(|e| ProviderError::Transport(e.to_string()))
    }
}
