//! Per-request generation settings.
//!
//! A flat record whose keys are shared by every provider. Provider-specific
//! keys are ignored by the providers that do not use them. Both the camelCase
//! keys sent by front ends and the snake_case keys used in config files are
//! accepted.

use serde::{Deserialize, Deserializer, Serialize};

/// HuggingFace generation mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelType {
    #[default]
    TextToImage,
    ImageToImage,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GenerationSettings {
    /// Provider key, parsed at the start of a run. Empty means openai.
    pub provider: String,
    #[serde(alias = "panel_count")]
    pub panel_count: Option<usize>,
    #[serde(alias = "max_retries")]
    pub max_retries: Option<u32>,
    #[serde(alias = "prompt_id")]
    pub prompt_id: Option<String>,

    pub model: Option<String>,
    #[serde(alias = "model_type")]
    pub model_type: Option<ModelType>,
    #[serde(alias = "negative_prompt")]
    pub negative_prompt: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    #[serde(alias = "num_inference_steps", alias = "numInferenceSteps")]
    pub steps: Option<u32>,
    #[serde(alias = "cfg_scale")]
    pub cfg_scale: Option<f64>,
    #[serde(alias = "guidance_scale")]
    pub guidance_scale: Option<f64>,
    #[serde(alias = "true_cfg_scale")]
    pub true_cfg_scale: Option<f64>,
    pub strength: Option<f64>,
    pub denoise: Option<f64>,
    pub sampler: Option<String>,
    pub scheduler: Option<String>,
    #[serde(deserialize_with = "deserialize_seed")]
    pub seed: Option<i64>,
    #[serde(alias = "aspect_ratio")]
    pub aspect_ratio: Option<String>,

    #[serde(alias = "automatic1111_url")]
    pub automatic1111_url: Option<String>,
    #[serde(alias = "comfyui_url", alias = "comfyUiUrl")]
    pub comfyui_url: Option<String>,
    #[serde(alias = "modal_function_url")]
    pub modal_function_url: Option<String>,
    /// Panels generated concurrently by batch providers.
    #[serde(alias = "batch_size", alias = "modalConcurrency", alias = "modal_concurrency")]
    pub batch_size: Option<usize>,
}

impl GenerationSettings {
    pub fn for_provider(provider: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            ..Self::default()
        }
    }

    /// Provider key with the openai fallback applied.
    pub fn provider_key(&self) -> &str {
        let key = self.provider.trim();
        if key.is_empty() {
            "openai"
        } else {
            key
        }
    }

    /// Configured seed offset by the zero-based panel index.
    pub fn panel_seed(&self, index: usize) -> Option<i64> {
        self.seed
            .map(|seed| seed.saturating_add(i64::try_from(index).unwrap_or(i64::MAX)))
    }
}

/// Seeds arrive as numbers from config files and as strings from form input.
fn deserialize_seed<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum SeedRepr {
        Int(i64),
        Float(f64),
        Text(String),
    }

    match Option::<SeedRepr>::deserialize(deserializer)? {
        None => Ok(None),
        Some(SeedRepr::Int(seed)) => Ok(Some(seed)),
        Some(SeedRepr::Float(seed)) => Ok(Some(seed.trunc() as i64)),
        Some(SeedRepr::Text(text)) => {
            let text = text.trim();
            if text.is_empty() {
                Ok(None)
            } else {
                text.parse::<i64>()
                    .map(Some)
                    .map_err(|_| serde::de::Error::custom(format!("invalid seed: {}", text)))
            }
        }
    }
}
