//! Image Provider Abstraction
//!
//! Uniform interface over heterogeneous image back ends: hosted APIs that
//! answer synchronously, local servers that answer synchronously or through
//! submit-and-poll, and a GPU function invoked in concurrent batches. The
//! provider set is closed; [`ProviderKind`] selects one exhaustively and
//! [`ProviderFactory`] builds it.

use crate::config::{ApiKeys, EndpointsConfig};
use crate::error::{GenerationError, RawError};
use crate::image::{ImageData, ImageDownloader, ImageSource};
use crate::retry::BackoffPolicy;
use crate::settings::GenerationSettings;
use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

pub mod automatic1111;
pub mod comfyui;
pub mod gemini;
pub mod huggingface;
pub mod modal;
pub mod openai;
pub mod replicate;

pub use automatic1111::Automatic1111Provider;
pub use comfyui::ComfyUiProvider;
pub use gemini::GeminiProvider;
pub use huggingface::HuggingFaceProvider;
pub use modal::ModalProvider;
pub use openai::OpenAiProvider;
pub use replicate::ReplicateProvider;

/// Default negative prompt for diffusion back ends.
pub const DEFAULT_NEGATIVE_PROMPT: &str =
    "blurry, low quality, distorted, ugly, bad anatomy, extra limbs";

/// How the coordinator drives a provider's panels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// One panel at a time, in order.
    Sequential,
    /// Fixed-size groups of panels in parallel.
    ConcurrentBatch,
}

/// The closed set of supported back ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    OpenAi,
    Gemini,
    Replicate,
    HuggingFace,
    Modal,
    Automatic1111,
    ComfyUi,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 7] = [
        ProviderKind::OpenAi,
        ProviderKind::Gemini,
        ProviderKind::Replicate,
        ProviderKind::HuggingFace,
        ProviderKind::Modal,
        ProviderKind::Automatic1111,
        ProviderKind::ComfyUi,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "openai",
            ProviderKind::Gemini => "gemini",
            ProviderKind::Replicate => "replicate",
            ProviderKind::HuggingFace => "huggingface",
            ProviderKind::Modal => "modal",
            ProviderKind::Automatic1111 => "automatic1111",
            ProviderKind::ComfyUi => "comfyui",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "OpenAI",
            ProviderKind::Gemini => "Gemini",
            ProviderKind::Replicate => "Replicate",
            ProviderKind::HuggingFace => "HuggingFace",
            ProviderKind::Modal => "Modal",
            ProviderKind::Automatic1111 => "Automatic1111",
            ProviderKind::ComfyUi => "ComfyUI",
        }
    }

    pub fn mode(self) -> ExecutionMode {
        match self {
            ProviderKind::Modal => ExecutionMode::ConcurrentBatch,
            ProviderKind::OpenAi
            | ProviderKind::Gemini
            | ProviderKind::Replicate
            | ProviderKind::HuggingFace
            | ProviderKind::Automatic1111
            | ProviderKind::ComfyUi => ExecutionMode::Sequential,
        }
    }

    /// Hosted back ends are rate limited and get an inter-panel pause.
    pub fn is_hosted(self) -> bool {
        !matches!(self, ProviderKind::Automatic1111 | ProviderKind::ComfyUi)
    }

    pub fn requires_api_key(self) -> bool {
        self.is_hosted()
    }

    /// Model used when the settings do not name one.
    pub fn default_model(self) -> &'static str {
        match self {
            ProviderKind::OpenAi => openai::DEFAULT_MODEL,
            ProviderKind::Gemini => gemini::DEFAULT_MODEL,
            ProviderKind::Replicate => replicate::DEFAULT_MODEL,
            ProviderKind::HuggingFace => huggingface::DEFAULT_MODEL,
            ProviderKind::Modal => modal::DEFAULT_MODEL,
            ProviderKind::Automatic1111 => "server default",
            ProviderKind::ComfyUi => comfyui::DEFAULT_CHECKPOINT,
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = GenerationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = s.trim().to_ascii_lowercase();
        ProviderKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == key)
            .ok_or_else(|| GenerationError::validation(format!("Unsupported provider: {}", s)))
    }
}

/// One panel's generation request.
#[derive(Debug, Clone, Copy)]
pub struct PanelRequest<'a> {
    /// 1-based panel number.
    pub number: usize,
    pub description: &'a str,
    pub reference: Option<&'a ImageSource>,
}

impl PanelRequest<'_> {
    /// Zero-based index, used for seed offsets.
    pub fn index(&self) -> usize {
        self.number.saturating_sub(1)
    }
}

/// A generation back end.
///
/// Adapters hold no per-run state beyond what [`prepare`](Self::prepare)
/// discovers. All progress reporting belongs to the caller.
#[async_trait]
pub trait ImageProvider: Send + Sync {
    fn kind(&self) -> ProviderKind;

    /// Model identifier reported in result metadata.
    fn model_name(&self) -> String;

    /// Runs once per generation before any panel: liveness probes, model
    /// discovery, input checks.
    async fn prepare(&mut self, _reference: Option<&ImageSource>) -> Result<(), GenerationError> {
        Ok(())
    }

    /// Generates a single panel. Called once per attempt.
    async fn generate(&self, request: PanelRequest<'_>) -> Result<ImageData, GenerationError>;
}

/// Builds the adapter for a run. Injected into the coordinator so tests can
/// substitute scripted providers.
pub trait ProviderResolver: Send + Sync {
    fn resolve(
        &self,
        kind: ProviderKind,
        settings: &GenerationSettings,
    ) -> Result<Box<dyn ImageProvider>, GenerationError>;
}

/// Timeouts and poll budgets shared by the adapters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProviderTimeouts {
    pub probe: Duration,
    pub hosted_request: Duration,
    pub local_request: Duration,
    pub submit: Duration,
    pub batch_request: Duration,
    pub poll_interval: Duration,
    pub poll_attempts: u32,
}

impl Default for ProviderTimeouts {
    fn default() -> Self {
        Self {
            probe: Duration::from_secs(5),
            hosted_request: Duration::from_secs(90),
            local_request: Duration::from_secs(120),
            submit: Duration::from_secs(30),
            batch_request: Duration::from_secs(180),
            poll_interval: Duration::from_secs(1),
            poll_attempts: 120,
        }
    }
}

const PROVIDER_HTTP_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

pub(crate) fn build_provider_http_client() -> Result<Client, GenerationError> {
    Client::builder()
        .no_proxy()
        .connect_timeout(PROVIDER_HTTP_CONNECT_TIMEOUT)
        .build()
        .map_err(|e| GenerationError::from_message(format!("Failed to create HTTP client: {}", e)))
}

/// Turns a non-success response into a classified error carrying the status
/// and the body text.
pub(crate) async fn error_from_response(provider: &str, response: Response) -> GenerationError {
    let status = response.status();
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "Unknown error".to_string());
    let detail = extract_error_detail(&body).unwrap_or(body);
    GenerationError::from_raw(
        RawError::new(format!(
            "{} request failed with status {}: {}",
            provider,
            status.as_u16(),
            detail.trim()
        ))
        .with_status(status.as_u16()),
    )
}

/// Pulls `error` / `error.message` / `detail` out of a JSON error body.
fn extract_error_detail(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    let candidate = value
        .pointer("/error/message")
        .or_else(|| value.get("error"))
        .or_else(|| value.get("detail"))?;
    match candidate {
        serde_json::Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// Response body that does not match the provider's documented shape.
pub(crate) fn invalid_response(provider: &str, detail: impl fmt::Display) -> GenerationError {
    GenerationError::from_message(format!("{} returned an unexpected response: {}", provider, detail))
}

/// Default [`ProviderResolver`]: builds real HTTP adapters from endpoints,
/// API keys and timeouts.
#[derive(Debug, Clone)]
pub struct ProviderFactory {
    pub endpoints: EndpointsConfig,
    pub api_keys: ApiKeys,
    pub timeouts: ProviderTimeouts,
    pub download_policy: BackoffPolicy,
}

impl ProviderFactory {
    pub fn new(endpoints: EndpointsConfig, api_keys: ApiKeys) -> Self {
        Self {
            endpoints,
            api_keys,
            timeouts: ProviderTimeouts::default(),
            download_policy: BackoffPolicy::default(),
        }
    }

    pub fn with_timeouts(mut self, timeouts: ProviderTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    fn api_key(&self, kind: ProviderKind) -> Result<String, GenerationError> {
        self.api_keys
            .for_provider(kind)
            .map(str::to_string)
            .ok_or_else(|| {
                GenerationError::validation(format!("{} API key is required", kind.display_name()))
            })
    }

    /// Create an adapter for the given kind.
    pub fn create(
        &self,
        kind: ProviderKind,
        settings: &GenerationSettings,
    ) -> Result<Box<dyn ImageProvider>, GenerationError> {
        let client = build_provider_http_client()?;
        let downloader = ImageDownloader::new(client.clone(), self.download_policy);
        let settings = settings.clone();
        let timeouts = self.timeouts;

        let provider: Box<dyn ImageProvider> = match kind {
            ProviderKind::OpenAi => Box::new(OpenAiProvider::new(
                client,
                downloader,
                self.api_key(kind)?,
                self.endpoints.openai_base_url.clone(),
                settings,
                timeouts,
            )),
            ProviderKind::Gemini => Box::new(GeminiProvider::new(
                client,
                self.api_key(kind)?,
                self.endpoints.gemini_base_url.clone(),
                settings,
                timeouts,
            )),
            ProviderKind::Replicate => Box::new(ReplicateProvider::new(
                client,
                downloader,
                self.api_key(kind)?,
                self.endpoints.replicate_base_url.clone(),
                settings,
                timeouts,
            )),
            ProviderKind::HuggingFace => Box::new(HuggingFaceProvider::new(
                client,
                downloader,
                self.api_key(kind)?,
                self.endpoints.huggingface_base_url.clone(),
                settings,
                timeouts,
            )),
            ProviderKind::Modal => {
                let url = settings
                    .modal_function_url
                    .clone()
                    .unwrap_or_else(|| self.endpoints.modal_function_url.clone());
                Box::new(ModalProvider::new(
                    client,
                    downloader,
                    self.api_key(kind)?,
                    url,
                    settings,
                    timeouts,
                ))
            }
            ProviderKind::Automatic1111 => {
                let url = settings
                    .automatic1111_url
                    .clone()
                    .unwrap_or_else(|| self.endpoints.automatic1111_url.clone());
                Box::new(Automatic1111Provider::new(client, url, settings, timeouts))
            }
            ProviderKind::ComfyUi => {
                let url = settings
                    .comfyui_url
                    .clone()
                    .unwrap_or_else(|| self.endpoints.comfyui_url.clone());
                Box::new(ComfyUiProvider::new(client, url, settings, timeouts))
            }
        };
        Ok(provider)
    }
}

impl ProviderResolver for ProviderFactory {
    fn resolve(
        &self,
        kind: ProviderKind,
        settings: &GenerationSettings,
    ) -> Result<Box<dyn ImageProvider>, GenerationError> {
        self.create(kind, settings)
    }
}

pub(crate) fn trim_base_url(url: &str) -> String {
    url.trim_end_matches('/').to_string()
}
