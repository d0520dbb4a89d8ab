//! Modal GPU function running Qwen Image Edit. Requires an inline reference
//! image and is driven by the coordinator in concurrent batches.

use super::{
    error_from_response, invalid_response, ImageProvider, PanelRequest, ProviderKind,
    ProviderTimeouts,
};
use crate::error::GenerationError;
use crate::image::{ImageData, ImageDownloader, ImageOutput, ImageSource};
use crate::settings::GenerationSettings;
use async_trait::async_trait;
use rand::Rng;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

pub const DEFAULT_MODEL: &str = "Qwen-Image-Edit-2511";
pub const DEFAULT_ASPECT_RATIO: &str = "16:9";
pub const DEFAULT_FUNCTION_URL: &str =
    "https://andrej-galad--film-generator-image-edit-qwenimageeditgen-94d79a.modal.run/";

/// Target dimensions for an aspect ratio; unknown ratios fall back to a
/// 1024 square.
pub fn dimensions_for(aspect_ratio: &str) -> (u32, u32) {
    match aspect_ratio {
        "1:1" => (1328, 1328),
        "16:9" => (1664, 928),
        "9:16" => (928, 1664),
        "4:3" => (1472, 1140),
        "3:4" => (1140, 1472),
        "3:2" => (1584, 1056),
        "2:3" => (1056, 1584),
        _ => (1024, 1024),
    }
}

#[derive(Serialize)]
struct EditRequest<'a> {
    prompt: &'a str,
    reference_images: Vec<String>,
    aspect_ratio: &'a str,
    width: u32,
    height: u32,
    num_inference_steps: u32,
    guidance_scale: f64,
    true_cfg_scale: f64,
    seed: i64,
}

#[derive(Deserialize)]
struct EditResponse {
    image: Option<serde_json::Value>,
    width: Option<u32>,
    height: Option<u32>,
}

pub struct ModalProvider {
    client: Client,
    downloader: ImageDownloader,
    api_token: String,
    function_url: String,
    settings: GenerationSettings,
    timeouts: ProviderTimeouts,
}

impl ModalProvider {
    pub fn new(
        client: Client,
        downloader: ImageDownloader,
        api_token: String,
        function_url: String,
        settings: GenerationSettings,
        timeouts: ProviderTimeouts,
    ) -> Self {
        Self {
            client,
            downloader,
            api_token,
            function_url,
            settings,
            timeouts,
        }
    }

    fn aspect_ratio(&self) -> &str {
        self.settings
            .aspect_ratio
            .as_deref()
            .unwrap_or(DEFAULT_ASPECT_RATIO)
    }
}

fn reference_required() -> GenerationError {
    GenerationError::validation(
        "Modal Qwen-Image-Edit requires a reference image for character consistency. \
         Please upload a reference image in the storyboard settings before generating with Modal.",
    )
}

#[async_trait]
impl ImageProvider for ModalProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Modal
    }

    fn model_name(&self) -> String {
        self.settings
            .model
            .clone()
            .unwrap_or_else(|| DEFAULT_MODEL.to_string())
    }

    async fn prepare(&mut self, reference: Option<&ImageSource>) -> Result<(), GenerationError> {
        match reference {
            Some(source) if source.is_inline() && !source.is_empty() => Ok(()),
            _ => Err(reference_required()),
        }
    }

    async fn generate(&self, request: PanelRequest<'_>) -> Result<ImageData, GenerationError> {
        let reference = match request.reference {
            Some(source @ ImageSource::Inline(_)) => source.to_url_string(),
            _ => return Err(reference_required()),
        };
        let aspect_ratio = self.aspect_ratio();
        let (width, height) = dimensions_for(aspect_ratio);
        let s = &self.settings;
        let seed = s
            .panel_seed(request.index())
            .unwrap_or_else(|| rand::rng().random_range(0..1_000_000));

        let body = EditRequest {
            prompt: request.description,
            reference_images: vec![reference],
            aspect_ratio,
            width,
            height,
            num_inference_steps: s.steps.unwrap_or(40),
            guidance_scale: s.guidance_scale.unwrap_or(1.0),
            true_cfg_scale: s.true_cfg_scale.unwrap_or(4.0),
            seed,
        };

        let response = self
            .client
            .post(&self.function_url)
            .bearer_auth(&self.api_token)
            .timeout(self.timeouts.batch_request)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(error_from_response("Modal", response).await);
        }

        let parsed: EditResponse = response
            .json()
            .await
            .map_err(|e| invalid_response("Modal", e))?;
        let image = match parsed.image {
            Some(serde_json::Value::String(image)) if !image.is_empty() => image,
            other => {
                return Err(invalid_response(
                    "Modal",
                    format!("missing image field ({})", other.unwrap_or_default()),
                ))
            }
        };
        debug!(
            panel = request.number,
            width = parsed.width.unwrap_or(width),
            height = parsed.height.unwrap_or(height),
            "Modal image generated"
        );
        self.downloader.normalize(ImageOutput::Encoded(image)).await
    }
}
