//! Meshy Retexture driver (§4.4): the single `RetextureDriver`
//! implementation, submitted from a completed mesh task rather than from
//! reference images.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

use m3d_api::provider::{PollResult, RetextureDriver, RetextureOptions, TaskHandle, TaskState};
use m3d_types::error::ProviderError;
use m3d_types::pipeline::{DownloadFile, MeshFormat};

use crate::http::{build_client, decode_json, get, post_json};

pub struct MeshyRetextureDriver {
    client: Client,
    api_key: String,
    base_url: String,
}

impl MeshyRetextureDriver {
    pub fn new(api_key: String) -> Self {
        Self::with_base_url(api_key, "https://api.meshy.ai".to_string())
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
    result: String,
}

#[derive(Deserialize)]
struct StatusResponse {
    status: String,
    progress: Option<u8>,
    task_error: Option<TaskErrorBody>,
    model_urls: Option<std::collections::HashMap<String, String>>,
}

#[derive(Deserialize)]
struct TaskErrorBody {
    message: String,
}

fn map_state(status: &str) -> TaskState {
    match status {
        "PENDING" | "IN_QUEUE" => TaskState::Queued,
        "IN_PROGRESS" => TaskState::Running,
        "SUCCEEDED" => TaskState::Succeeded,
        "FAILED" => TaskState::Failed,
        "CANCELED" => TaskState::Cancelled,
        _ => TaskState::Running,
    }
}

#[async_trait]
impl RetextureDriver for MeshyRetextureDriver {
    async fn submit_from_mesh(
        &self,
        mesh_task_id: &str,
        options: RetextureOptions,
    ) -> Result<TaskHandle, ProviderError> {
        let body = json!({
            "input_task_id": mesh_task_id,
            "style_image_url": options.style_url,
            "text_style_prompt": options.text_prompt,
            "enable_pbr": options.enable_pbr,
        });

        let response = post_json(
            &self.client,
            &format!("{}/openapi/v1/retexture", self.base_url),
            &self.api_key,
            &body,
        )
        .await?;
        let parsed: SubmitResponse = decode_json(response).await?;

        Ok(TaskHandle {
            task_id: parsed.result,
            subscription_key: None,
        })
    }

    async fn poll(&self, handle: &TaskHandle) -> Result<PollResult, ProviderError> {
        let response = get(
            &self.client,
            &format!("{}/openapi/v1/retexture/{}", self.base_url, handle.task_id),
            &self.api_key,
        )
        .await?;
        let parsed: StatusResponse = decode_json(response).await?;

        Ok(PollResult {
            state: map_state(&parsed.status),
            progress: parsed.progress,
            failure_reason: parsed.task_error.map(|e| e.message),
        })
    }

    async fn download(&self, handle: &TaskHandle) -> Result<Vec<DownloadFile>, ProviderError> {
        let response = get(
            &self.client,
            &format!("{}/openapi/v1/retexture/{}", self.base_url, handle.task_id),
            &self.api_key,
        )
        .await?;
        let parsed: StatusResponse = decode_json(response).await?;
        let urls = parsed.model_urls.unwrap_or_default();

        Ok(urls
            .into_iter()
            .filter_map(|(format_str, url)| {
                let format = match format_str.as_str() {
                    "glb" => MeshFormat::Glb,
                    "fbx" => MeshFormat::Fbx,
                    "obj" => MeshFormat::Obj,
                    "stl" => MeshFormat::Stl,
                    _ => return None,
                };
                Some(DownloadFile {
                    format,
                    url,
                    name: format!("textured.{format_str}"),
                })
            })
            .collect())
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
