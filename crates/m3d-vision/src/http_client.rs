//! HTTP-backed vision provider adapter (§4.3), built around a generic
//! OpenAI-compatible chat-completions client. Talks to a
//! multimodal image model over a chat-completions-shaped endpoint: the
//! reference image goes in as a base64 data URL content part, the prompt as
//! text, and the response is expected to carry one generated image plus a
//! short palette/description payload as structured JSON in the first
//! choice's message content.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use m3d_api::vision::GeneratedView;
use m3d_types::error::VisionError;
use m3d_types::pipeline::{Analysis, Angle, PrinterType, Style};

use crate::fanout::AngleGenerator;
use crate::prompt::build_angle_prompt;

/// Drives an OpenAI-compatible multimodal endpoint to analyze a reference
/// image and synthesize consistent per-angle views.
pub struct HttpVisionBackend {
    client: Client,
    api_url: String,
    api_key: String,
    model_name: String,
}

impl HttpVisionBackend {
    #[allow(clippy::expect_used)]
    pub fn new(api_url: String, api_key: String, model_name: String) -> Self {
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(60))
                .build()
                .expect("failed to build vision HTTP client"),
            api_url,
            api_key,
            model_name,
        }
    }

    fn data_url(bytes: &[u8], mime_type: &str) -> String {
        let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
        format!("data:{mime_type};base64,{encoded}")
    }

    async fn chat(
        &self,
        text_prompt: &str,
        ref_bytes: &[u8],
        mime_type: &str,
    ) -> Result<ChatCompletionResponse, VisionError> {
        let body = ChatCompletionRequest {
            model: self.model_name.clone(),
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: vec![
                    ContentPart::Text {
                        text: text_prompt.to_string(),
                    },
                    ContentPart::ImageUrl {
                        image_url: ImageUrl {
                            url: Self::data_url(ref_bytes, mime_type),
                        },
                    },
                ],
            }],
            temperature: 0.2,
        };

        let response = self
            .client
            .post(&self.api_url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| VisionError::ProviderError(format!("request failed: {e}")))?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(VisionError::ProviderError("rate limited".to_string()));
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            if text.to_lowercase().contains("safety") || text.to_lowercase().contains("blocked") {
                return Err(VisionError::SafetyBlocked(text));
            }
            return Err(VisionError::ProviderError(format!(
                "provider returned {status}: {text}"
            )));
        }

        response
            .json::<ChatCompletionResponse>()
            .await
            .map_err(|e| VisionError::ProviderError(format!("invalid response body: {e}")))
    }
}

#[derive(Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
}

#[derive(Serialize)]
struct ChatMessage {
    role: String,
    content: Vec<ContentPart>,
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Serialize)]
struct ImageUrl {
    url: String,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
}

/// Expected payload shape of the model's message content: a JSON object
/// carrying the generated image as a base64 data URL plus its palette, or
/// (for analysis calls) the full `imageAnalysis` record.
#[derive(Deserialize)]
struct GeneratedViewPayload {
    image_data_url: String,
    color_palette: Vec<String>,
}

fn parse_data_url(data_url: &str) -> Result<(Vec<u8>, String), VisionError> {
    let rest = data_url.strip_prefix("data:").ok_or_else(|| {
        VisionError::NoImageReturned {
            diagnostic: "response did not contain a data: URL".to_string(),
        }
    })?;
    let (meta, b64) = rest.split_once(',').ok_or_else(|| VisionError::NoImageReturned {
        diagnostic: "malformed data URL".to_string(),
    })?;
    let mime_type = meta.split(';').next().unwrap_or("image/png").to_string();
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(b64)
        .map_err(|e| VisionError::NoImageReturned {
            diagnostic: format!("invalid base64 image payload: {e}"),
        })?;
    Ok((bytes, mime_type))
}

#[async_trait]
impl AngleGenerator for HttpVisionBackend {
    async fn generate(
        &self,
        ref_bytes: &[u8],
        mime_type: &str,
        angle: Angle,
        user_description: Option<&str>,
        palette: Option<&[String]>,
        style: Style,
        hint: Option<&str>,
    ) -> Result<GeneratedView, VisionError> {
        let prompt = build_angle_prompt(angle, user_description, palette, style, hint);
        let response = self.chat(&prompt, ref_bytes, mime_type).await?;

        let content = response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| VisionError::NoImageReturned {
                diagnostic: "no choices in provider response".to_string(),
            })?;

        let payload: GeneratedViewPayload = serde_json::from_str(&content).map_err(|e| {
            VisionError::NoImageReturned {
                diagnostic: format!("could not parse generation payload: {e}"),
            }
        })?;

        let (image_bytes, resolved_mime) = parse_data_url(&payload.image_data_url)?;

        Ok(GeneratedView {
            angle,
            image_bytes,
            mime_type: resolved_mime,
            color_palette: payload.color_palette,
        })
    }
}

impl HttpVisionBackend {
    /// Runs the `analyzeImage` call (§4.2). Distinct endpoint shape from
    /// angle generation: the model is asked to return the full
    /// `imageAnalysis` record as JSON rather than a generated image.
    pub async fn analyze(
        &self,
        ref_bytes: &[u8],
        color_count: u8,
        printer_type: PrinterType,
        locale: &str,
        style: Style,
    ) -> Result<Analysis, VisionError> {
        let prompt = format!(
            "Analyze the attached reference image for 3D-printable figurine \
             generation. Respond with a single JSON object with exactly these \
             snake_case keys: description, color_palette (exactly \
             {color_count} hex colors), dominant_colors, detected_materials, \
             object_type, print_friendliness (score 1-5, color_suggestions, \
             structural_concerns, material_recommendations, orientation_tips), \
             recommended_style, style_confidence (0..1), style_reasoning, \
             style_suitability (0..1), analyzed_with_style. Target printer \
             type: {printer_type:?}. Locale: {locale}. Requested style \
             override: {style:?}."
        );

        let response = self.chat(&prompt, ref_bytes, "image/png").await?;
        let content = response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| VisionError::NoImageReturned {
                diagnostic: "no choices in analysis response".to_string(),
            })?;

        serde_json::from_str(&content).map_err(|e| VisionError::ProviderError(format!(
            "could not parse analysis payload: {e}"
        )))
    }
}
