//! Stable Diffusion WebUI (Automatic1111) over its `--api` HTTP interface.

use super::{
    error_from_response, invalid_response, trim_base_url, ImageProvider, PanelRequest,
    ProviderKind, ProviderTimeouts,
};
use crate::error::{ErrorCategory, GenerationError};
use crate::image::{ImageData, ImageSource, DEFAULT_MIME};
use crate::prompt::styled_prompt;
use crate::settings::GenerationSettings;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info};

pub const DEFAULT_URL: &str = "http://127.0.0.1:7860";
const NEGATIVE_PROMPT: &str =
    "blurry, low quality, distorted, ugly, bad anatomy, extra limbs, watermark, text";

#[derive(Debug, Deserialize)]
struct SdModel {
    title: String,
}

#[derive(Serialize)]
struct Txt2ImgRequest<'a> {
    prompt: String,
    negative_prompt: &'a str,
    width: u32,
    height: u32,
    steps: u32,
    cfg_scale: f64,
    sampler_name: &'a str,
    seed: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    override_settings: Option<serde_json::Value>,
}

#[derive(Deserialize)]
struct Txt2ImgResponse {
    #[serde(default)]
    images: Vec<String>,
}

pub struct Automatic1111Provider {
    client: Client,
    server_url: String,
    settings: GenerationSettings,
    timeouts: ProviderTimeouts,
    /// Checkpoint chosen by settings or discovered during prepare.
    model: Option<String>,
}

impl Automatic1111Provider {
    pub fn new(
        client: Client,
        server_url: String,
        settings: GenerationSettings,
        timeouts: ProviderTimeouts,
    ) -> Self {
        let model = settings.model.clone();
        Self {
            client,
            server_url: trim_base_url(&server_url),
            settings,
            timeouts,
            model,
        }
    }

    fn unreachable(&self) -> GenerationError {
        GenerationError::with_category(
            ErrorCategory::Network,
            format!(
                "Failed to connect to Automatic1111 at {}. Make sure SD WebUI is running with --api flag.",
                self.server_url
            ),
        )
    }

    async fn list_models(&self) -> Result<Vec<SdModel>, GenerationError> {
        let url = format!("{}/sdapi/v1/sd-models", self.server_url);
        let response = self
            .client
            .get(&url)
            .timeout(self.timeouts.probe)
            .send()
            .await
            .map_err(|e| {
                debug!(error = %e, "Automatic1111 probe failed");
                self.unreachable()
            })?;
        if !response.status().is_success() {
            return Err(self.unreachable());
        }
        response
            .json()
            .await
            .map_err(|e| invalid_response("Automatic1111", e))
    }
}

#[async_trait]
impl ImageProvider for Automatic1111Provider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Automatic1111
    }

    fn model_name(&self) -> String {
        self.model
            .clone()
            .unwrap_or_else(|| "server default".to_string())
    }

    async fn prepare(&mut self, _reference: Option<&ImageSource>) -> Result<(), GenerationError> {
        let models = self.list_models().await?;
        if self.model.is_none() {
            self.model = models.into_iter().next().map(|m| m.title);
        }
        info!(
            server = %self.server_url,
            model = self.model.as_deref().unwrap_or("server default"),
            "Connected to Automatic1111"
        );
        Ok(())
    }

    async fn generate(&self, request: PanelRequest<'_>) -> Result<ImageData, GenerationError> {
        let s = &self.settings;
        let body = Txt2ImgRequest {
            prompt: styled_prompt(request.description),
            negative_prompt: s.negative_prompt.as_deref().unwrap_or(NEGATIVE_PROMPT),
            width: s.width.unwrap_or(1024),
            height: s.height.unwrap_or(1024),
            steps: s.steps.unwrap_or(30),
            cfg_scale: s.cfg_scale.unwrap_or(7.0),
            sampler_name: s.sampler.as_deref().unwrap_or("DPM++ 2M Karras"),
            seed: s.panel_seed(request.index()).unwrap_or(-1),
            override_settings: self
                .model
                .as_ref()
                .map(|model| json!({ "sd_model_checkpoint": model })),
        };

        let url = format!("{}/sdapi/v1/txt2img", self.server_url);
        let response = self
            .client
            .post(&url)
            .timeout(self.timeouts.local_request)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(error_from_response("Automatic1111", response).await);
        }

        let parsed: Txt2ImgResponse = response
            .json()
            .await
            .map_err(|e| invalid_response("Automatic1111", e))?;
        let encoded = parsed
            .images
            .into_iter()
            .next()
            .ok_or_else(|| invalid_response("Automatic1111", "no images in response"))?;
        ImageData::from_base64(&encoded, DEFAULT_MIME)
    }
}
