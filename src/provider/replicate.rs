//! Replicate predictions (SDXL). Submits with `Prefer: wait` and polls the
//! prediction briefly if it has not finished by the time the call returns.

use super::{
    error_from_response, invalid_response, trim_base_url, ImageProvider, PanelRequest,
    ProviderKind, ProviderTimeouts, DEFAULT_NEGATIVE_PROMPT,
};
use crate::error::{ErrorCategory, GenerationError};
use crate::image::{ImageData, ImageDownloader, ImageOutput};
use crate::prompt::styled_prompt;
use crate::settings::GenerationSettings;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::time::sleep;
use tracing::debug;

pub const DEFAULT_MODEL: &str = "stability-ai/sdxl";
pub const DEFAULT_VERSION: &str =
    "39ed52f2a78e934b3ba6e2a89f5b1c712de7dfea535525255b1aa35c5565e08b";
pub const DEFAULT_BASE_URL: &str = "https://api.replicate.com/v1";

#[derive(Debug, Deserialize)]
struct Prediction {
    #[serde(default)]
    status: String,
    #[serde(default)]
    output: Value,
    #[serde(default)]
    error: Value,
    urls: Option<PredictionUrls>,
}

#[derive(Debug, Deserialize)]
struct PredictionUrls {
    get: Option<String>,
}

enum PredictionState {
    Succeeded(Value),
    Failed(String),
    Running,
}

impl Prediction {
    fn state(&self) -> PredictionState {
        match self.status.as_str() {
            "succeeded" => PredictionState::Succeeded(self.output.clone()),
            "failed" | "canceled" => PredictionState::Failed(match &self.error {
                Value::String(s) => s.clone(),
                Value::Null => format!("prediction {}", self.status),
                other => other.to_string(),
            }),
            _ => PredictionState::Running,
        }
    }
}

pub struct ReplicateProvider {
    client: Client,
    downloader: ImageDownloader,
    api_key: String,
    base_url: String,
    settings: GenerationSettings,
    timeouts: ProviderTimeouts,
}

impl ReplicateProvider {
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

    /// `owner/name:version`, or a bare version hash.
    fn version(&self) -> &str {
        match self.settings.model.as_deref() {
            Some(model) => model.rsplit(':').next().unwrap_or(model),
            None => DEFAULT_VERSION,
        }
    }

    fn input(&self, request: &PanelRequest<'_>) -> Value {
        let s = &self.settings;
        let mut input = json!({
            "prompt": styled_prompt(request.description),
            "negative_prompt": s.negative_prompt.as_deref().unwrap_or(DEFAULT_NEGATIVE_PROMPT),
            "width": s.width.unwrap_or(1024),
            "height": s.height.unwrap_or(1024),
            "num_inference_steps": s.steps.unwrap_or(30),
            "scheduler": s.scheduler.as_deref().unwrap_or("DPMSolverMultistep"),
            "refine": "expert_ensemble_refiner",
            "high_noise_frac": 0.8,
        });
        if let Some(seed) = s.panel_seed(request.index()) {
            input["seed"] = json!(seed);
        }
        input
    }

    async fn poll(&self, url: &str) -> Result<Value, GenerationError> {
        for _ in 0..self.timeouts.poll_attempts {
            sleep(self.timeouts.poll_interval).await;
            let response = self
                .client
                .get(url)
                .bearer_auth(&self.api_key)
                .timeout(self.timeouts.hosted_request)
                .send()
                .await?;
            if !response.status().is_success() {
                return Err(error_from_response("Replicate", response).await);
            }
            let prediction: Prediction = response
                .json()
                .await
                .map_err(|e| invalid_response("Replicate", e))?;
            match prediction.state() {
                PredictionState::Succeeded(output) => return Ok(output),
                PredictionState::Failed(reason) => return Err(prediction_failed(reason)),
                PredictionState::Running => debug!(status = %prediction.status, "Replicate prediction pending"),
            }
        }
        Err(GenerationError::with_category(
            ErrorCategory::Timeout,
            "Replicate prediction timed out",
        ))
    }
}

fn prediction_failed(reason: String) -> GenerationError {
    GenerationError::from_message(format!("Replicate prediction failed: {}", reason))
}

#[async_trait]
impl ImageProvider for ReplicateProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Replicate
    }

    fn model_name(&self) -> String {
        match self.settings.model.as_deref() {
            Some(model) => model.to_string(),
            None => format!("{}:{}", DEFAULT_MODEL, DEFAULT_VERSION),
        }
    }

    async fn generate(&self, request: PanelRequest<'_>) -> Result<ImageData, GenerationError> {
        let body = json!({ "version": self.version(), "input": self.input(&request) });
        let url = format!("{}/predictions", self.base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .header("Prefer", "wait")
            .timeout(self.timeouts.hosted_request)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(error_from_response("Replicate", response).await);
        }

        let prediction: Prediction = response
            .json()
            .await
            .map_err(|e| invalid_response("Replicate", e))?;
        let output = match prediction.state() {
            PredictionState::Succeeded(output) => output,
            PredictionState::Failed(reason) => return Err(prediction_failed(reason)),
            PredictionState::Running => {
                let poll_url = prediction
                    .urls
                    .and_then(|u| u.get)
                    .ok_or_else(|| invalid_response("Replicate", "pending prediction has no poll url"))?;
                self.poll(&poll_url).await?
            }
        };

        if output.is_null() {
            return Err(invalid_response("Replicate", "prediction has no output"));
        }
        self.downloader.normalize(ImageOutput::Json(output)).await
    }
}
