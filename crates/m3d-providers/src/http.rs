//! Shared HTTP plumbing for the mesh drivers (§4.4), grounded on the same
//! `reqwest::Client` + bearer-token pattern the kernel's HTTP inference
//! adapter uses for its own external calls.

use std::time::Duration;

use m3d_types::error::ProviderError;
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use serde_json::Value;

/// Per-provider-call timeout ceiling (§5): 30 s for poll/submit calls; the
/// `Client` itself carries a generous upper bound and callers additionally
/// wrap individual requests in `tokio::time::timeout` where §5 calls for a
/// tighter bound (fetch/download up to 540 s).
#[allow(clippy::expect_used)]
pub fn build_client() -> Client {
    Client::builder()
        .timeout(Duration::from_secs(60))
        .build()
        .expect("failed to build provider HTTP client")
}

pub async fn post_json(
    client: &Client,
    url: &str,
    api_key: &str,
    body: &Value,
) -> Result<Response, ProviderError> {
    client
        .post(url)
        .header("Authorization", format!("Bearer {api_key}"))
        .json(body)
        .send()
        .await
        .map_err(|e| ProviderError::Transport(e.to_string()))
}

pub async fn get(client: &Client, url: &str, api_key: &str) -> Result<Response, ProviderError> {
    client
        .get(url)
        .header("Authorization", format!("Bearer {api_key}"))
        .send()
        .await
        .map_err(|e| ProviderError::Transport(e.to_string()))
}

pub async fn decode_json<T: DeserializeOwned>(response: Response) -> Result<T, ProviderError> {
    let status = response.status();
    if !status.is_success() {
        let text = response.text().await.unwrap_or_default();
        return Err(ProviderError::SubmissionRejected(format!(
            "provider returned {status}: {text}"
        )));
    }
    response
        .json::<T>()
        .await
        .map_err(|e| ProviderError::Transport(format!("invalid response body: {e}")))
}
