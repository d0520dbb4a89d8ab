//! Configuration System
//!
//! Layered configuration: built-in defaults, then the global file
//! (`$XDG_CONFIG_HOME/storyboard/config.toml`), then the workspace
//! `storyboard.toml`, then `STORYBOARD__SECTION__KEY` environment variables.
//! API keys missing after layering are read from the providers' conventional
//! environment variables.

use crate::error::AppError;
use crate::logging::LoggingConfig;
use crate::provider::ProviderKind;
use crate::retry::BackoffPolicy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

mod merge {
    pub mod merge_policy;
}
mod sources {
    pub mod global_file;
    pub mod workspace_file;
}

pub use sources::global_file::global_config_path;
pub use sources::workspace_file::WORKSPACE_CONFIG_FILE;

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoryboardConfig {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub api_keys: ApiKeys,
    #[serde(default)]
    pub endpoints: EndpointsConfig,
    #[serde(default)]
    pub generation: GenerationDefaults,
    #[serde(default)]
    pub retry: BackoffPolicy,
    #[serde(default)]
    pub storage: StorageConfig,
}

/// Credentials for hosted providers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiKeys {
    pub openai: Option<String>,
    pub gemini: Option<String>,
    pub replicate: Option<String>,
    pub huggingface: Option<String>,
    pub modal: Option<String>,
}

impl ApiKeys {
    /// Conventional environment variable for a provider's key.
    pub fn env_var(kind: ProviderKind) -> Option<&'static str> {
        match kind {
            ProviderKind::OpenAi => Some("OPENAI_API_KEY"),
            ProviderKind::Gemini => Some("GEMINI_API_KEY"),
            ProviderKind::Replicate => Some("REPLICATE_API_TOKEN"),
            ProviderKind::HuggingFace => Some("HF_TOKEN"),
            ProviderKind::Modal => Some("MODAL_TOKEN"),
            ProviderKind::Automatic1111 | ProviderKind::ComfyUi => None,
        }
    }

    fn slot(&mut self, kind: ProviderKind) -> Option<&mut Option<String>> {
        match kind {
            ProviderKind::OpenAi => Some(&mut self.openai),
            ProviderKind::Gemini => Some(&mut self.gemini),
            ProviderKind::Replicate => Some(&mut self.replicate),
            ProviderKind::HuggingFace => Some(&mut self.huggingface),
            ProviderKind::Modal => Some(&mut self.modal),
            ProviderKind::Automatic1111 | ProviderKind::ComfyUi => None,
        }
    }

    /// Non-empty key for the provider, if configured.
    pub fn for_provider(&self, kind: ProviderKind) -> Option<&str> {
        let key = match kind {
            ProviderKind::OpenAi => &self.openai,
            ProviderKind::Gemini => &self.gemini,
            ProviderKind::Replicate => &self.replicate,
            ProviderKind::HuggingFace => &self.huggingface,
            ProviderKind::Modal => &self.modal,
            ProviderKind::Automatic1111 | ProviderKind::ComfyUi => return None,
        };
        key.as_deref().map(str::trim).filter(|k| !k.is_empty())
    }

    pub fn set(&mut self, kind: ProviderKind, key: impl Into<String>) {
        if let Some(slot) = self.slot(kind) {
            *slot = Some(key.into());
        }
    }

    /// Fills missing keys from `lookup` (normally the process environment).
    pub fn fill_missing_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        for kind in ProviderKind::ALL {
            if self.for_provider(kind).is_some() {
                continue;
            }
            if let Some(value) = Self::env_var(kind).and_then(&lookup) {
                if !value.trim().is_empty() {
                    self.set(kind, value);
                }
            }
        }
    }
}

/// Server and API base URLs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointsConfig {
    pub automatic1111_url: String,
    pub comfyui_url: String,
    pub modal_function_url: String,
    pub openai_base_url: Option<String>,
    pub gemini_base_url: Option<String>,
    pub replicate_base_url: Option<String>,
    pub huggingface_base_url: Option<String>,
}

impl Default for EndpointsConfig {
    fn default() -> Self {
        Self {
            automatic1111_url: crate::provider::automatic1111::DEFAULT_URL.to_string(),
            comfyui_url: crate::provider::comfyui::DEFAULT_URL.to_string(),
            modal_function_url: crate::provider::modal::DEFAULT_FUNCTION_URL.to_string(),
            openai_base_url: None,
            gemini_base_url: None,
            replicate_base_url: None,
            huggingface_base_url: None,
        }
    }
}

/// Defaults applied when request settings leave a value unset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationDefaults {
    pub panel_count: usize,
    pub max_retries: u32,
    pub batch_size: usize,
    /// Pause after each completed panel for hosted providers.
    pub inter_panel_delay_ms: u64,
}

impl Default for GenerationDefaults {
    fn default() -> Self {
        Self {
            panel_count: 20,
            max_retries: crate::retry::DEFAULT_MAX_ATTEMPTS,
            batch_size: 10,
            inter_panel_delay_ms: 1000,
        }
    }
}

impl GenerationDefaults {
    pub fn inter_panel_delay(&self) -> Duration {
        Duration::from_millis(self.inter_panel_delay_ms)
    }
}

/// Where finished panels and generation records are written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub output_dir: PathBuf,
    pub records_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        let data_dir = directories::ProjectDirs::from("", "", "storyboard")
            .map(|dirs| dirs.data_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from(".storyboard"));
        Self {
            output_dir: PathBuf::from("storyboards"),
            records_dir: data_dir.join("generations"),
        }
    }
}

impl StoryboardConfig {
    pub fn validate(&self) -> Result<(), AppError> {
        let mut errors = Vec::new();
        if self.generation.panel_count == 0 {
            errors.push("generation.panel_count must be at least 1".to_string());
        }
        if self.generation.max_retries == 0 {
            errors.push("generation.max_retries must be at least 1".to_string());
        }
        if self.generation.batch_size == 0 {
            errors.push("generation.batch_size must be at least 1".to_string());
        }
        if !(self.retry.multiplier >= 1.0) {
            errors.push("retry.multiplier must be >= 1.0".to_string());
        }
        if !(0.0..=1.0).contains(&self.retry.jitter_ratio) {
            errors.push("retry.jitter_ratio must be between 0.0 and 1.0".to_string());
        }
        if self.storage.output_dir.as_os_str().is_empty() {
            errors.push("storage.output_dir cannot be empty".to_string());
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(AppError::ConfigError(format!(
                "Configuration validation failed:\n{}",
                errors.join("\n")
            )))
        }
    }
}

/// Loads [`StoryboardConfig`] from the layered sources.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load using the global config path, `<workspace_root>/storyboard.toml`
    /// and the process environment.
    pub fn load(workspace_root: &Path) -> Result<StoryboardConfig, AppError> {
        Self::load_from(
            global_config_path().as_deref(),
            &workspace_root.join(WORKSPACE_CONFIG_FILE),
            None,
        )
    }

    /// Load from explicit file paths. `env` replaces the process environment
    /// for both the `STORYBOARD__` overrides and API key lookup when given.
    pub fn load_from(
        global_file: Option<&Path>,
        workspace_file: &Path,
        env: Option<HashMap<String, String>>,
    ) -> Result<StoryboardConfig, AppError> {
        let mut builder = merge::merge_policy::builder_with_defaults()?;
        if let Some(global_file) = global_file {
            builder = sources::global_file::add_to_builder(builder, global_file)?;
        }
        builder = sources::workspace_file::add_to_builder(builder, workspace_file)?;
        builder = builder.add_source(
            config::Environment::with_prefix("STORYBOARD")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true)
                .source(env.clone().map(|vars| vars.into_iter().collect())),
        );

        let mut loaded: StoryboardConfig = builder.build()?.try_deserialize()?;
        match env {
            Some(vars) => loaded.api_keys.fill_missing_from(|name| vars.get(name).cloned()),
            None => loaded.api_keys.fill_missing_from(|name| std::env::var(name).ok()),
        }
        loaded.validate()?;
        Ok(loaded)
    }
}
