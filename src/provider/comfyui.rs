//! ComfyUI node-graph server. Each panel submits an SDXL text-to-image
//! workflow, polls its history until an output image appears, then fetches
//! the image through `/view`.

use super::{
    error_from_response, invalid_response, trim_base_url, ImageProvider, PanelRequest,
    ProviderKind, ProviderTimeouts,
};
use crate::error::{ErrorCategory, GenerationError};
use crate::image::{content_type, ImageData, ImageSource, DEFAULT_MIME};
use crate::settings::GenerationSettings;
use async_trait::async_trait;
use rand::Rng;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::time::sleep;
use tracing::{debug, info};
use uuid::Uuid;

pub const DEFAULT_URL: &str = "http://127.0.0.1:8188";
pub const DEFAULT_CHECKPOINT: &str = "sd_xl_base_1.0.safetensors";
const NEGATIVE_PROMPT: &str = "blurry, low quality, distorted, ugly, bad anatomy";
const STYLE: &str = "Style: Cinematic, photorealistic, consistent visual style.";

#[derive(Deserialize)]
struct SubmitResponse {
    prompt_id: String,
}

/// Output image reference inside a history entry.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct OutputImage {
    pub filename: String,
    #[serde(default)]
    pub subfolder: String,
    #[serde(rename = "type", default = "default_output_type")]
    pub kind: String,
}

fn default_output_type() -> String {
    "output".to_string()
}

pub struct ComfyUiProvider {
    client: Client,
    server_url: String,
    settings: GenerationSettings,
    timeouts: ProviderTimeouts,
}

impl ComfyUiProvider {
    pub fn new(
        client: Client,
        server_url: String,
        settings: GenerationSettings,
        timeouts: ProviderTimeouts,
    ) -> Self {
        Self {
            client,
            server_url: trim_base_url(&server_url),
            settings,
            timeouts,
        }
    }

    fn checkpoint(&self) -> &str {
        self.settings.model.as_deref().unwrap_or(DEFAULT_CHECKPOINT)
    }

    /// SDXL text-to-image graph: sampler (3), checkpoint (4), latent (5),
    /// positive (6) and negative (7) prompts, decode (8), save (9).
    pub fn workflow(&self, request: &PanelRequest<'_>) -> Value {
        let s = &self.settings;
        let seed = s
            .panel_seed(request.index())
            .unwrap_or_else(|| rand::rng().random_range(0..1_000_000));
        json!({
            "3": {
                "inputs": {
                    "seed": seed,
                    "steps": s.steps.unwrap_or(30),
                    "cfg": s.cfg_scale.unwrap_or(7.0),
                    "sampler_name": s.sampler.as_deref().unwrap_or("dpmpp_2m"),
                    "scheduler": s.scheduler.as_deref().unwrap_or("karras"),
                    "denoise": s.denoise.unwrap_or(1.0),
                    "model": ["4", 0],
                    "positive": ["6", 0],
                    "negative": ["7", 0],
                    "latent_image": ["5", 0]
                },
                "class_type": "KSampler"
            },
            "4": {
                "inputs": { "ckpt_name": self.checkpoint() },
                "class_type": "CheckpointLoaderSimple"
            },
            "5": {
                "inputs": {
                    "width": s.width.unwrap_or(1024),
                    "height": s.height.unwrap_or(1024),
                    "batch_size": 1
                },
                "class_type": "EmptyLatentImage"
            },
            "6": {
                "inputs": {
                    "text": format!("{}\n\n{}", request.description, STYLE),
                    "clip": ["4", 1]
                },
                "class_type": "CLIPTextEncode"
            },
            "7": {
                "inputs": {
                    "text": s.negative_prompt.as_deref().unwrap_or(NEGATIVE_PROMPT),
                    "clip": ["4", 1]
                },
                "class_type": "CLIPTextEncode"
            },
            "8": {
                "inputs": { "samples": ["3", 0], "vae": ["4", 2] },
                "class_type": "VAEDecode"
            },
            "9": {
                "inputs": { "filename_prefix": "storyboard", "images": ["8", 0] },
                "class_type": "SaveImage"
            }
        })
    }

    async fn submit(&self, request: &PanelRequest<'_>) -> Result<String, GenerationError> {
        let body = json!({
            "prompt": self.workflow(request),
            "client_id": format!("storyboard-{}-{}", Uuid::new_v4(), request.index()),
        });
        let response = self
            .client
            .post(format!("{}/prompt", self.server_url))
            .timeout(self.timeouts.submit)
            .json(&body)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(error_from_response("ComfyUI", response).await);
        }
        let submitted: SubmitResponse = response
            .json()
            .await
            .map_err(|e| invalid_response("ComfyUI", e))?;
        Ok(submitted.prompt_id)
    }

    /// Polls the history endpoint; transient poll failures are skipped.
    async fn wait_for_output(&self, prompt_id: &str) -> Result<OutputImage, GenerationError> {
        let url = format!("{}/history/{}", self.server_url, prompt_id);
        for attempt in 0..self.timeouts.poll_attempts {
            sleep(self.timeouts.poll_interval).await;
            let history = match self.fetch_history(&url).await {
                Ok(history) => history,
                Err(err) => {
                    debug!(prompt_id, attempt, error = %err, "ComfyUI history poll failed");
                    continue;
                }
            };
            if let Some(image) = find_output_image(&history, prompt_id) {
                return Ok(image);
            }
        }
        Err(GenerationError::with_category(
            ErrorCategory::Timeout,
            "ComfyUI generation timed out",
        ))
    }

    async fn fetch_history(&self, url: &str) -> Result<Value, GenerationError> {
        let response = self
            .client
            .get(url)
            .timeout(self.timeouts.probe)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(error_from_response("ComfyUI", response).await);
        }
        response
            .json()
            .await
            .map_err(|e| invalid_response("ComfyUI", e))
    }

    async fn fetch_image(&self, image: &OutputImage) -> Result<ImageData, GenerationError> {
        let response = self
            .client
            .get(format!("{}/view", self.server_url))
            .query(&[
                ("filename", image.filename.as_str()),
                ("subfolder", image.subfolder.as_str()),
                ("type", image.kind.as_str()),
            ])
            .timeout(self.timeouts.local_request)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(error_from_response("ComfyUI", response).await);
        }
        let mime = content_type(response.headers())
            .filter(|ct| ct.starts_with("image/"))
            .unwrap_or_else(|| DEFAULT_MIME.to_string());
        let bytes = response.bytes().await?;
        Ok(ImageData::new(mime, bytes.to_vec()))
    }
}

/// First image of any output node in the history entry for `prompt_id`.
pub fn find_output_image(history: &Value, prompt_id: &str) -> Option<OutputImage> {
    let outputs = history.get(prompt_id)?.get("outputs")?.as_object()?;
    outputs.values().find_map(|node| {
        let first = node.get("images")?.as_array()?.first()?;
        serde_json::from_value(first.clone()).ok()
    })
}

#[async_trait]
impl ImageProvider for ComfyUiProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::ComfyUi
    }

    fn model_name(&self) -> String {
        self.checkpoint().to_string()
    }

    async fn prepare(&mut self, _reference: Option<&ImageSource>) -> Result<(), GenerationError> {
        let url = format!("{}/system_stats", self.server_url);
        let reachable = match self.client.get(&url).timeout(self.timeouts.probe).send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                debug!(error = %e, "ComfyUI probe failed");
                false
            }
        };
        if !reachable {
            return Err(GenerationError::with_category(
                ErrorCategory::Network,
                format!(
                    "Failed to connect to ComfyUI at {}. Make sure ComfyUI is running.",
                    self.server_url
                ),
            ));
        }
        info!(server = %self.server_url, checkpoint = self.checkpoint(), "Connected to ComfyUI");
        Ok(())
    }

    async fn generate(&self, request: PanelRequest<'_>) -> Result<ImageData, GenerationError> {
        let prompt_id = self.submit(&request).await?;
        debug!(panel = request.number, prompt_id = %prompt_id, "ComfyUI job submitted");
        let image = self.wait_for_output(&prompt_id).await?;
        self.fetch_image(&image).await
    }
}
