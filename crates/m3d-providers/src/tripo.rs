//! Tripo image-to-3D driver (§4.4): cost 5, no extra options.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};

use m3d_api::provider::{MeshDriver, PollResult, TaskHandle, TaskState};
use m3d_types::error::ProviderError;
use m3d_types::pipeline::{DownloadFile, MeshFormat};

use crate::http::{build_client, decode_json, get, post_json};

pub struct TripoDriver {
    client: Client,
    api_key: String,
    base_url: String,
}

impl TripoDriver {
    pub fn new(api_key: String) -> Self {
        Self::with_base_url(api_key, "https://api.tripo3d.ai".to_string())
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
    task_id: String,
}

#[derive(Deserialize)]
struct StatusResponse {
    status: String,
    progress: Option<u8>,
    message: Option<String>,
    output: Option<OutputBody>,
}

#[derive(Deserialize)]
struct OutputBody {
    model_urls: std::collections::HashMap<String, String>,
}

fn map_state(status: &str) -> TaskState {
    match status {
        "queued" => TaskState::Queued,
        "running" => TaskState::Running,
        "success" => TaskState::Succeeded,
        "failed" => TaskState::Failed,
        "cancelled" | "banned" => TaskState::Cancelled,
        _ => TaskState::Running,
    }
}

#[async_trait]
impl MeshDriver for TripoDriver {
    fn id(&self) -> &'static str {
        "tripo"
    }

    fn cost(&self) -> i64 {
        5
    }

    async fn submit(
        &self,
        image_urls: &[String],
        _options: &Value,
    ) -> Result<TaskHandle, ProviderError> {
        let body = json!({
            "type": "image_to_model",
            "file": { "urls": image_urls },
        });

        let response = post_json(
            &self.client,
            &format!("{}/v2/openapi/task", self.base_url),
            &self.api_key,
            &body,
        )
        .await?;
        let parsed: SubmitResponse = decode_json(response).await?;

        Ok(TaskHandle {
            task_id: parsed.task_id,
            subscription_key: None,
        })
    }

    async fn poll(&self, handle: &TaskHandle) -> Result<PollResult, ProviderError> {
        let response = get(
            &self.client,
            &format!("{}/v2/openapi/task/{}", self.base_url, handle.task_id),
            &self.api_key,
        )
        .await?;
        let parsed: StatusResponse = decode_json(response).await?;

        Ok(PollResult {
            state: map_state(&parsed.status),
            progress: parsed.progress,
            failure_reason: parsed.message,
        })
    }

    async fn download(
        &self,
        handle: &TaskHandle,
        required_format: MeshFormat,
    ) -> Result<Vec<DownloadFile>, ProviderError> {
        let response = get(
            &self.client,
            &format!("{}/v2/openapi/task/{}", self.base_url, handle.task_id),
            &self.api_key,
        )
        .await?;
        let parsed: StatusResponse = decode_json(response).await?;
        let urls = parsed
            .output
            .map(|o| o.model_urls)
            .unwrap_or_default();

        match urls.get(required_format.as_str()) {
            Some(url) => Ok(vec![DownloadFile {
                format: required_format,
                url: url.clone(),
                name: format!("mesh.{}", required_format.as_str()),
            }]),
            None => Ok(vec![]),
        }
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
