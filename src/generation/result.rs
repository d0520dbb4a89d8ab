//! Request and result types for one generation run.

use crate::error::GenerationError;
use crate::image::ImageSource;
use crate::progress::{PanelStats, PanelStatus};
use crate::provider::ProviderKind;
use crate::settings::GenerationSettings;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Input to [`GenerationCoordinator::run`](super::GenerationCoordinator::run).
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub reference: Option<ImageSource>,
    pub prompt: String,
    pub settings: GenerationSettings,
}

impl GenerationRequest {
    pub fn new(
        reference: Option<ImageSource>,
        prompt: impl Into<String>,
        settings: GenerationSettings,
    ) -> Self {
        Self {
            reference,
            prompt: prompt.into(),
            settings,
        }
    }
}

/// One entry of the returned panel array. Failed panels keep their
/// description and carry the last error instead of an image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PanelResult {
    pub id: String,
    pub number: usize,
    /// `data:` URL while in memory, `file://` URL once written to disk.
    pub url: Option<String>,
    pub description: String,
    pub status: PanelStatus,
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_path: Option<PathBuf>,
}

impl PanelResult {
    pub fn completed(number: usize, description: String, url: String, attempts: u32) -> Self {
        Self {
            id: panel_id(number),
            number,
            url: Some(url),
            description,
            status: PanelStatus::Completed,
            attempts,
            error: None,
            file_path: None,
        }
    }

    pub fn failed(number: usize, description: String, error: &GenerationError, attempts: u32) -> Self {
        Self {
            id: panel_id(number),
            number,
            url: None,
            description,
            status: PanelStatus::Error,
            attempts,
            error: Some(error.message.clone()),
            file_path: None,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == PanelStatus::Completed
    }
}

fn panel_id(number: usize) -> String {
    format!("panel-{}", number)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationMetadata {
    pub model: String,
    pub timestamp: DateTime<Utc>,
    pub stats: PanelStats,
    pub total_panels: usize,
    pub duration_ms: u64,
}

/// Ordered panels plus run metadata. Always holds one entry per panel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationResult {
    pub generation_id: String,
    pub provider: ProviderKind,
    pub panels: Vec<PanelResult>,
    pub metadata: GenerationMetadata,
}

impl GenerationResult {
    pub fn completed_count(&self) -> usize {
        self.panels.iter().filter(|p| p.is_completed()).count()
    }

    pub fn failed_panels(&self) -> impl Iterator<Item = &PanelResult> {
        self.panels.iter().filter(|p| !p.is_completed())
    }
}
