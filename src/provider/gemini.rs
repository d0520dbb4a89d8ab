//! Google Imagen through the Generative Language REST API. Images come back
//! inline as base64.

use super::{
    error_from_response, invalid_response, trim_base_url, ImageProvider, PanelRequest,
    ProviderKind, ProviderTimeouts,
};
use crate::error::GenerationError;
use crate::image::{ImageData, DEFAULT_MIME};
use crate::prompt::styled_prompt;
use crate::settings::GenerationSettings;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

pub const DEFAULT_MODEL: &str = "imagen-3.0-generate-001";
pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

#[derive(Deserialize)]
struct PredictResponse {
    #[serde(default)]
    predictions: Vec<Prediction>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Prediction {
    bytes_base64_encoded: Option<String>,
    mime_type: Option<String>,
}

pub struct GeminiProvider {
    client: Client,
    api_key: String,
    base_url: String,
    settings: GenerationSettings,
    timeouts: ProviderTimeouts,
}

impl GeminiProvider {
    pub fn new(
        client: Client,
        api_key: String,
        base_url: Option<String>,
        settings: GenerationSettings,
        timeouts: ProviderTimeouts,
    ) -> Self {
        let base_url = base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        Self {
            client,
            api_key,
            base_url: trim_base_url(&base_url),
            settings,
            timeouts,
        }
    }

    fn model(&self) -> &str {
        self.settings.model.as_deref().unwrap_or(DEFAULT_MODEL)
    }
}

#[async_trait]
impl ImageProvider for GeminiProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Gemini
    }

    fn model_name(&self) -> String {
        self.model().to_string()
    }

    async fn generate(&self, request: PanelRequest<'_>) -> Result<ImageData, GenerationError> {
        let body = json!({
            "instances": [{ "prompt": styled_prompt(request.description) }],
            "parameters": {
                "sampleCount": 1,
                "aspectRatio": self.settings.aspect_ratio.as_deref().unwrap_or("1:1"),
                "safetyFilterLevel": "block_some",
                "personGeneration": "allow_adult",
            }
        });

        let url = format!("{}/models/{}:predict", self.base_url, self.model());
        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .timeout(self.timeouts.hosted_request)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(error_from_response("Gemini", response).await);
        }

        let parsed: PredictResponse = response
            .json()
            .await
            .map_err(|e| invalid_response("Gemini", e))?;
        let prediction = parsed
            .predictions
            .into_iter()
            .next()
            .ok_or_else(|| invalid_response("Gemini", "no predictions in response"))?;
        let payload = prediction
            .bytes_base64_encoded
            .ok_or_else(|| invalid_response("Gemini", "prediction has no image bytes"))?;
        let mime = prediction.mime_type.unwrap_or_else(|| DEFAULT_MIME.to_string());
        ImageData::from_base64(&payload, &mime)
    }
}
