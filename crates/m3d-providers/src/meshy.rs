//! Meshy image-to-3D driver (§4.4): cost 5, optional `precision` in
//! `{standard, high}`.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};

use m3d_api::provider::{MeshDriver, PollResult, TaskHandle, TaskState};
use m3d_types::error::ProviderError;
use m3d_types::pipeline::{DownloadFile, MeshFormat};

use crate::http::{build_client, decode_json, get, post_json};

pub struct MeshyDriver {
    client: Client,
    api_key: String,
    base_url: String,
}

impl MeshyDriver {
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

    fn validate_options(options: &Value) -> Result<(), ProviderError> {
        if let Some(precision) = options.get("precision").and_then(|v| v.as_str()) {
            if precision != "standard" && precision != "high" {
                return Err(ProviderError::SubmissionRejected(format!(
                    "invalid meshy precision '{precision}'"
                )));
            }
        }
        Ok(())
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
impl MeshDriver for MeshyDriver {
    fn id(&self) -> &'static str {
        "meshy"
    }

    fn cost(&self) -> i64 {
        5
    }

    async fn submit(
        &self,
        image_urls: &[String],
        options: &Value,
    ) -> Result<TaskHandle, ProviderError> {
        Self::validate_options(options)?;
        let mut body = json!({
            "mode": "preview",
            "image_urls": image_urls,
        });
        if let Some(precision) = options.get("precision") {
            body["precision"] = precision.clone();
        }

        let response = post_json(
            &self.client,
            &format!("{}/openapi/v2/image-to-3d", self.base_url),
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
            &format!(
                "{}/openapi/v2/image-to-3d/{}",
                self.base_url, handle.task_id
            ),
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

    async fn download(
        &self,
        handle: &TaskHandle,
        required_format: MeshFormat,
    ) -> Result<Vec<DownloadFile>, ProviderError> {
        let response = get(
            &self.client,
            &format!(
                "{}/openapi/v2/image-to-3d/{}",
                self.base_url, handle.task_id
            ),
            &self.api_key,
        )
        .await?;
        let parsed: StatusResponse = decode_json(response).await?;
        let urls = parsed.model_urls.unwrap_or_default();

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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_unknown_precision() {
        let options = json!({ "precision": "ultra" });
        assert!(MeshyDriver::validate_options(&options).is_err());
    }

    #[test]
    fn accepts_known_precisions() {
        assert!(MeshyDriver::validate_options(&json!({ "precision": "standard" })).is_ok());
        assert!(MeshyDriver::validate_options(&json!({ "precision": "high" })).is_ok());
        assert!(MeshyDriver::validate_options(&json!({})).is_ok());
    }
}
