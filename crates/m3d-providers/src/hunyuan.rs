//! Hunyuan image-to-3D driver (§4.4): cost 6, optional `faceCount` in
//! `[40_000, 1_500_000]`.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};

use m3d_api::provider::{MeshDriver, PollResult, TaskHandle, TaskState};
use m3d_types::error::ProviderError;
use m3d_types::pipeline::{DownloadFile, MeshFormat};

use crate::http::{build_client, decode_json, get, post_json};

pub const MIN_FACE_COUNT: u64 = 40_000;
pub const MAX_FACE_COUNT: u64 = 1_500_000;

pub struct HunyuanDriver {
    client: Client,
    api_key: String,
    base_url: String,
}

impl HunyuanDriver {
    pub fn new(api_key: String) -> Self {
        Self::with_base_url(api_key, "https://api.hunyuan3d.tencentcloudapi.com".to_string())
    }

    pub fn with_base_url(api_key: String, base_url: String) -> Self {
        Self {
            client: build_client(),
            api_key,
            base_url,
        }
    }

    fn validate_options(options: &Value) -> Result<(), ProviderError> {
        if let Some(face_count) = options.get("faceCount").and_then(|v| v.as_u64()) {
            if !(MIN_FACE_COUNT..=MAX_FACE_COUNT).contains(&face_count) {
                return Err(ProviderError::SubmissionRejected(format!(
                    "faceCount {face_count} out of range [{MIN_FACE_COUNT}, {MAX_FACE_COUNT}]"
                )));
            }
        }
        Ok(())
    }
}

#[derive(Deserialize)]
struct SubmitResponse {
    job_id: String,
}

#[derive(Deserialize)]
struct StatusResponse {
    state: String,
    percent: Option<u8>,
    error_message: Option<String>,
    result_urls: Option<std::collections::HashMap<String, String>>,
}

fn map_state(state: &str) -> TaskState {
    match state {
        "WAITING" => TaskState::Queued,
        "RUNNING" => TaskState::Running,
        "DONE" => TaskState::Succeeded,
        "ERROR" => TaskState::Failed,
        "CANCELLED" => TaskState::Cancelled,
        _ => TaskState::Running,
    }
}

#[async_trait]
impl MeshDriver for HunyuanDriver {
    fn id(&self) -> &'static str {
        "hunyuan"
    }

    fn cost(&self) -> i64 {
        6
    }

    async fn submit(
        &self,
        image_urls: &[String],
        options: &Value,
    ) -> Result<TaskHandle, ProviderError> {
        Self::validate_options(options)?;
        let mut body = json!({ "image_urls": image_urls });
        if let Some(face_count) = options.get("faceCount") {
            body["face_count"] = face_count.clone();
        }

        let response = post_json(
            &self.client,
            &format!("{}/v1/image-to-3d", self.base_url),
            &self.api_key,
            &body,
        )
        .await?;
        let parsed: SubmitResponse = decode_json(response).await?;

        Ok(TaskHandle {
            task_id: parsed.job_id,
            subscription_key: None,
        })
    }

    async fn poll(&self, handle: &TaskHandle) -> Result<PollResult, ProviderError> {
        let response = get(
            &self.client,
            &format!("{}/v1/image-to-3d/{}", self.base_url, handle.task_id),
            &self.api_key,
        )
        .await?;
        let parsed: StatusResponse = decode_json(response).await?;

        Ok(PollResult {
            state: map_state(&parsed.state),
            progress: parsed.percent,
            failure_reason: parsed.error_message,
        })
    }

    async fn download(
        &self,
        handle: &TaskHandle,
        required_format: MeshFormat,
    ) -> Result<Vec<DownloadFile>, ProviderError> {
        let response = get(
            &self.client,
            &format!("{}/v1/image-to-3d/{}", self.base_url, handle.task_id),
            &self.api_key,
        )
        .await?;
        let parsed: StatusResponse = decode_json(response).await?;
        let urls = parsed.result_urls.unwrap_or_default();

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
    fn rejects_face_count_below_minimum() {
        let options = json!({ "faceCount": 1000 });
        assert!(HunyuanDriver::validate_options(&options).is_err());
    }

    #[test]
    fn rejects_face_count_above_maximum() {
        let options = json!({ "faceCount": 2_000_000 });
        assert!(HunyuanDriver::validate_options(&options).is_err());
    }

    #[test]
    fn accepts_face_count_within_range() {
        let options = json!({ "faceCount": 100_000 });
        assert!(HunyuanDriver::validate_options(&options).is_ok());
    }
}
