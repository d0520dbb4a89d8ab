//! CLI route: run context and command dispatch.

use crate::cli::output::{
    format_config_toml, format_generation_json, format_generation_text, format_providers_json,
    format_providers_text, format_segments_text,
};
use crate::cli::parse::Commands;
use crate::config::{ConfigLoader, StoryboardConfig};
use crate::error::{AppError, GenerationError};
use crate::generation::{CoordinatorOptions, GenerationCoordinator, GenerationRequest};
use crate::image::{ImageData, ImageSource};
use crate::persist::PanelWriter;
use crate::progress::TracingSink;
use crate::prompt::parse_panel_descriptions;
use crate::provider::ProviderFactory;
use crate::settings::GenerationSettings;
use crate::store::JsonDirStore;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

/// Runtime context for CLI execution: loaded configuration and workspace.
pub struct RunContext {
    config: StoryboardConfig,
    workspace_root: PathBuf,
}

impl RunContext {
    /// Load configuration for the workspace, or from `config_path` when given.
    pub fn new(workspace_root: PathBuf, config_path: Option<PathBuf>) -> Result<Self, AppError> {
        let config = match config_path {
            Some(path) => ConfigLoader::load_from(
                crate::config::global_config_path().as_deref(),
                &path,
                None,
            )?,
            None => ConfigLoader::load(&workspace_root)?,
        };
        Ok(Self::from_config(workspace_root, config))
    }

    pub fn from_config(workspace_root: PathBuf, config: StoryboardConfig) -> Self {
        Self {
            config,
            workspace_root,
        }
    }

    pub fn config(&self) -> &StoryboardConfig {
        &self.config
    }

    /// Execute a command and return its stdout text.
    pub fn execute(&self, command: &Commands) -> Result<String, AppError> {
        match command {
            Commands::Generate {
                image,
                prompt,
                prompt_file,
                provider,
                settings,
                panel_count,
                max_retries,
                model,
                out,
                json,
            } => {
                let prompt = read_prompt(prompt.as_deref(), prompt_file.as_deref())?;
                let reference = load_reference(image)?;
                let mut settings = match settings {
                    Some(raw) => serde_json::from_str::<GenerationSettings>(raw).map_err(|e| {
                        AppError::ConfigError(format!("Invalid --settings JSON: {}", e))
                    })?,
                    None => GenerationSettings::default(),
                };
                if let Some(provider) = provider {
                    settings.provider = provider.clone();
                }
                if panel_count.is_some() {
                    settings.panel_count = *panel_count;
                }
                if max_retries.is_some() {
                    settings.max_retries = *max_retries;
                }
                if model.is_some() {
                    settings.model = model.clone();
                }
                let out_dir = out
                    .clone()
                    .unwrap_or_else(|| self.resolve(&self.config.storage.output_dir));

                let runtime = tokio::runtime::Runtime::new().map_err(|e| {
                    AppError::ConfigError(format!("Failed to create async runtime: {}", e))
                })?;
                let request = GenerationRequest::new(Some(reference), prompt, settings);
                let result = runtime.block_on(self.generate(request, out_dir))?;
                if *json {
                    format_generation_json(&result)
                } else {
                    Ok(format_generation_text(&result))
                }
            }
            Commands::Segment {
                prompt,
                prompt_file,
                json,
            } => {
                let prompt = read_prompt(prompt.as_deref(), prompt_file.as_deref())?;
                let descriptions = parse_panel_descriptions(&prompt);
                if *json {
                    Ok(serde_json::to_string_pretty(&descriptions)?)
                } else if descriptions.is_empty() {
                    Ok("No numbered panel lines found".to_string())
                } else {
                    Ok(format_segments_text(&descriptions))
                }
            }
            Commands::Providers { json } => {
                if *json {
                    format_providers_json()
                } else {
                    Ok(format_providers_text())
                }
            }
            Commands::Config => format_config_toml(&self.config),
        }
    }

    async fn generate(
        &self,
        request: GenerationRequest,
        out_dir: PathBuf,
    ) -> Result<crate::generation::GenerationResult, AppError> {
        let store = JsonDirStore::new(self.resolve(&self.config.storage.records_dir))?;
        let factory = ProviderFactory::new(
            self.config.endpoints.clone(),
            self.config.api_keys.clone(),
        );
        let options = CoordinatorOptions {
            defaults: self.config.generation,
            backoff: self.config.retry,
        };
        info!(out_dir = %out_dir.display(), "Panels will be written to disk");
        let coordinator = GenerationCoordinator::new(
            Arc::new(factory),
            Arc::new(store),
            Arc::new(TracingSink),
            options,
        )
        .with_panel_writer(PanelWriter::new(out_dir));
        Ok(coordinator.run(request).await?)
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.workspace_root.join(path)
        }
    }
}

fn read_prompt(prompt: Option<&str>, prompt_file: Option<&Path>) -> Result<String, AppError> {
    match (prompt, prompt_file) {
        (Some(prompt), _) => Ok(prompt.to_string()),
        (None, Some(path)) => Ok(std::fs::read_to_string(path)?),
        (None, None) => Err(AppError::ConfigError(
            "Either --prompt or --prompt-file is required".to_string(),
        )),
    }
}

/// Accepts a data URL, an http(s) URL or a local file path.
fn load_reference(value: &str) -> Result<ImageSource, GenerationError> {
    let trimmed = value.trim();
    if trimmed.starts_with("data:") || trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        ImageSource::parse(trimmed)
    } else {
        ImageData::from_path(Path::new(trimmed)).map(ImageSource::Inline)
    }
}
