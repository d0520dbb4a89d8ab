//! CLI output: error mapping and text/JSON presentation of command results.

use crate::config::{ApiKeys, StoryboardConfig};
use crate::error::AppError;
use crate::generation::GenerationResult;
use crate::provider::{ExecutionMode, ProviderKind};
use serde_json::json;

/// Map application errors to the text printed on stderr. Generation
/// failures include the user-facing title and recovery steps.
pub fn map_error(e: &AppError) -> String {
    match e {
        AppError::Generation(err) => {
            let message = err.user_message();
            let mut out = format!("{}: {}", message.title, err.message);
            if !message.recovery.is_empty() {
                out.push_str("\n\n");
                out.push_str(&message.recovery);
            }
            out
        }
        other => other.to_string(),
    }
}

pub fn format_generation_text(result: &GenerationResult) -> String {
    let mut lines = vec![format!(
        "Generation {} ({}, model {}): {}/{} panels completed in {:.1}s",
        result.generation_id,
        result.provider,
        result.metadata.model,
        result.completed_count(),
        result.panels.len(),
        result.metadata.duration_ms as f64 / 1000.0
    )];
    for panel in &result.panels {
        let detail = match (&panel.file_path, &panel.error) {
            (Some(path), _) => path.display().to_string(),
            (None, Some(error)) => error.clone(),
            (None, None) => "inline image".to_string(),
        };
        lines.push(format!(
            "  {:<9} {:<10} attempts={} {}",
            panel.id, panel.status, panel.attempts, detail
        ));
    }
    lines.join("\n")
}

pub fn format_generation_json(result: &GenerationResult) -> Result<String, AppError> {
    Ok(serde_json::to_string_pretty(result)?)
}

pub fn format_segments_text(descriptions: &[String]) -> String {
    descriptions
        .iter()
        .enumerate()
        .map(|(index, description)| format!("{}. {}", index + 1, description))
        .collect::<Vec<_>>()
        .join("\n")
}

fn mode_label(mode: ExecutionMode) -> &'static str {
    match mode {
        ExecutionMode::Sequential => "sequential",
        ExecutionMode::ConcurrentBatch => "concurrent-batch",
    }
}

pub fn format_providers_text() -> String {
    let mut lines = vec![format!(
        "{:<14} {:<17} {:<40} {}",
        "PROVIDER", "MODE", "DEFAULT MODEL", "API KEY"
    )];
    for kind in ProviderKind::ALL {
        lines.push(format!(
            "{:<14} {:<17} {:<40} {}",
            kind.as_str(),
            mode_label(kind.mode()),
            kind.default_model(),
            ApiKeys::env_var(kind).unwrap_or("-")
        ));
    }
    lines.join("\n")
}

pub fn format_providers_json() -> Result<String, AppError> {
    let providers: Vec<_> = ProviderKind::ALL
        .into_iter()
        .map(|kind| {
            json!({
                "key": kind.as_str(),
                "name": kind.display_name(),
                "mode": mode_label(kind.mode()),
                "defaultModel": kind.default_model(),
                "apiKeyEnv": ApiKeys::env_var(kind),
            })
        })
        .collect();
    Ok(serde_json::to_string_pretty(&providers)?)
}

/// Effective configuration as TOML with every API key replaced.
pub fn format_config_toml(config: &StoryboardConfig) -> Result<String, AppError> {
    let mut redacted = config.clone();
    for kind in ProviderKind::ALL {
        if redacted.api_keys.for_provider(kind).is_some() {
            redacted.api_keys.set(kind, "********");
        }
    }
    toml::to_string_pretty(&redacted)
        .map_err(|e| AppError::ConfigError(format!("Failed to render configuration: {}", e)))
}
