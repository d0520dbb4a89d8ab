//! OpenAI image generation (DALL-E 3). Returns a hosted URL that is
//! downloaded and embedded.

use super::{
    error_from_response, invalid_response, trim_base_url, ImageProvider, PanelRequest,
    ProviderKind, ProviderTimeouts,
};
use crate::error::GenerationError;
use crate::image::{ImageData, ImageDownloader, ImageOutput};
use crate::prompt::styled_prompt;
use crate::settings::GenerationSettings;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

pub const DEFAULT_MODEL: &str = "dall-e-3";
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

#[derive(Serialize)]
struct ImageGenerationRequest<'a> {
    model: &'a str,
    prompt: String,
    n: u32,
    size: String,
    quality: &'a str,
    response_format: &'a str,
}

#[derive(Deserialize)]
struct ImageGenerationResponse {
    #[serde(default)]
    data: Vec<GeneratedImage>,
}

#[derive(Deserialize)]
struct GeneratedImage {
    url: Option<String>,
    b64_json: Option<String>,
}

pub struct OpenAiProvider {
    client: Client,
    downloader: ImageDownloader,
    api_key: String,
    base_url: String,
    settings: GenerationSettings,
    timeouts: ProviderTimeouts,
}

impl OpenAiProvider {
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
}

#[async_trait]
impl ImageProvider for OpenAiProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::OpenAi
    }

    fn model_name(&self) -> String {
        self.model().to_string()
    }

    async fn generate(&self, request: PanelRequest<'_>) -> Result<ImageData, GenerationError> {
        let body = ImageGenerationRequest {
            model: self.model(),
            prompt: styled_prompt(request.description),
            n: 1,
            size: format!(
                "{}x{}",
                self.settings.width.unwrap_or(1024),
                self.settings.height.unwrap_or(1024)
            ),
            quality: "hd",
            response_format: "url",
        };

        let url = format!("{}/images/generations", self.base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .timeout(self.timeouts.hosted_request)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(error_from_response("OpenAI", response).await);
        }

        let parsed: ImageGenerationResponse = response
            .json()
            .await
            .map_err(|e| invalid_response("OpenAI", e))?;
        let image = parsed
            .data
            .into_iter()
            .next()
            .ok_or_else(|| invalid_response("OpenAI", "no images in response"))?;

        let output = match (image.url, image.b64_json) {
            (Some(url), _) => {
                debug!(panel = request.number, "Downloading OpenAI result");
                ImageOutput::Encoded(url)
            }
            (None, Some(b64)) => ImageOutput::Encoded(b64),
            (None, None) => return Err(invalid_response("OpenAI", "image has neither url nor data")),
        };
        self.downloader.normalize(output).await
    }
}
