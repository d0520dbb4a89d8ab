//! HuggingFace Inference API. Text-to-image by default; image-to-image when
//! the settings ask for it, falling back to text-to-image when the model
//! rejects the reference image.

use super::{
    error_from_response, trim_base_url, ImageProvider, PanelRequest, ProviderKind,
    ProviderTimeouts, DEFAULT_NEGATIVE_PROMPT,
};
use crate::error::GenerationError;
use crate::image::{content_type, ImageData, ImageDownloader, ImageOutput, ImageSource};
use crate::prompt::styled_prompt;
use crate::settings::{GenerationSettings, ModelType};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use tracing::{info, warn};

pub const DEFAULT_MODEL: &str = "stabilityai/stable-diffusion-xl-base-1.0";
pub const DEFAULT_BASE_URL: &str = "https://api-inference.huggingface.co/models";

pub struct HuggingFaceProvider {
    client: Client,
    downloader: ImageDownloader,
    api_key: String,
    base_url: String,
    settings: GenerationSettings,
    timeouts: ProviderTimeouts,
}

impl HuggingFaceProvider {
    pub fn new(
        client: Client,
        downloader: ImageDownloader,
        api_key: String,
        base_url: Option<String>,
        settings: GenerationSettings,
        timeouts: ProviderTimeouts,
    ) -> Self {
        let base_url = base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        Self {
            client,
            downloader,
            api_key,
            base_url: trim_base_url(&base_url),
            settings,
            timeouts,
        }
    }

    fn model(&self) -> &str {
        self.settings.model.as_deref().unwrap_or(DEFAULT_MODEL)
    }

    fn negative_prompt(&self) -> &str {
        self.settings
            .negative_prompt
            .as_deref()
            .unwrap_or(DEFAULT_NEGATIVE_PROMPT)
    }

    fn text_to_image_body(&self, prompt: String, seed: Option<i64>) -> Value {
        let s = &self.settings;
        let mut parameters = json!({
            "negative_prompt": self.negative_prompt(),
            "width": s.width.unwrap_or(1024),
            "height": s.height.unwrap_or(1024),
            "num_inference_steps": s.steps.unwrap_or(30),
            "guidance_scale": s.guidance_scale.unwrap_or(7.5),
        });
        if let Some(seed) = seed {
            parameters["seed"] = json!(seed);
        }
        json!({ "inputs": prompt, "parameters": parameters })
    }

    fn image_to_image_body(&self, reference: &ImageData, prompt: String) -> Value {
        json!({
            "inputs": reference.to_base64(),
            "parameters": {
                "prompt": prompt,
                "negative_prompt": self.negative_prompt(),
                "strength": self.settings.strength.unwrap_or(0.7),
                "guidance_scale": self.settings.guidance_scale.unwrap_or(7.5),
            }
        })
    }

    async fn infer(&self, body: &Value) -> Result<ImageData, GenerationError> {
        let url = format!("{}/{}", self.base_url, self.model());
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .timeout(self.timeouts.hosted_request)
            .json(body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(error_from_response("HuggingFace", response).await);
        }

        let content_type = content_type(response.headers());
        let bytes = response.bytes().await?.to_vec();
        let output = match content_type.as_deref() {
            Some("application/json") => {
                let value: Value = serde_json::from_slice(&bytes).map_err(|e| {
                    GenerationError::from_message(format!(
                        "Failed to convert image result: {}",
                        e
                    ))
                })?;
                ImageOutput::Json(value)
            }
            _ => ImageOutput::Bytes {
                bytes,
                content_type,
            },
        };
        self.downloader.normalize(output).await
    }

    async fn reference_bytes(&self, reference: &ImageSource) -> Result<ImageData, GenerationError> {
        match reference {
            ImageSource::Inline(data) => Ok(data.clone()),
            ImageSource::Url(url) => self.downloader.download(url).await,
        }
    }
}

#[async_trait]
impl ImageProvider for HuggingFaceProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::HuggingFace
    }

    fn model_name(&self) -> String {
        self.model().to_string()
    }

    async fn generate(&self, request: PanelRequest<'_>) -> Result<ImageData, GenerationError> {
        let model_type = self.settings.model_type.unwrap_or_default();
        if model_type == ModelType::ImageToImage {
            if let Some(reference) = request.reference {
                let reference = self.reference_bytes(reference).await?;
                let prompt = format!("{}\n\nStyle: Cinematic, photorealistic.", request.description);
                match self.infer(&self.image_to_image_body(&reference, prompt)).await {
                    Ok(image) => return Ok(image),
                    Err(err) => {
                        warn!(
                            panel = request.number,
                            model = self.model(),
                            error = %err,
                            "Image-to-image not supported, falling back to text-to-image"
                        );
                    }
                }
                let prompt = format!(
                    "{}\n\nStyle: Cinematic, photorealistic, based on the reference image.",
                    request.description
                );
                return self.infer(&self.text_to_image_body(prompt, None)).await;
            }
        }

        info!(panel = request.number, model = self.model(), "Using text-to-image mode");
        let seed = self.settings.panel_seed(request.index());
        self.infer(&self.text_to_image_body(styled_prompt(request.description), seed))
            .await
    }
}
