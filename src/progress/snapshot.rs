//! Progress snapshot schema.

use crate::error::{ErrorCategory, FailureReport};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Generation stage reported with every snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Initializing,
    Preparing,
    Generating,
    Retrying,
    ErrorPanel,
    PostProcessing,
    Completed,
    Error,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Initializing => "initializing",
            Stage::Preparing => "preparing",
            Stage::Generating => "generating",
            Stage::Retrying => "retrying",
            Stage::ErrorPanel => "error_panel",
            Stage::PostProcessing => "post_processing",
            Stage::Completed => "completed",
            Stage::Error => "error",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Stage::Completed | Stage::Error)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PanelStatus {
    Pending,
    Generating,
    Completed,
    Error,
}

impl PanelStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PanelStatus::Pending => "pending",
            PanelStatus::Generating => "generating",
            PanelStatus::Completed => "completed",
            PanelStatus::Error => "error",
        }
    }
}

impl fmt::Display for PanelStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tracked state of one panel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PanelRecord {
    pub number: usize,
    pub status: PanelStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub attempts: u32,
}

impl PanelRecord {
    pub fn pending(number: usize) -> Self {
        Self {
            number,
            status: PanelStatus::Pending,
            error_message: None,
            attempts: 0,
        }
    }
}

/// Panel counts per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PanelStats {
    pub total: usize,
    pub completed: usize,
    pub generating: usize,
    pub pending: usize,
    pub error: usize,
}

/// Retry metadata attached to retrying and error_panel snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryInfo {
    pub panel: usize,
    pub attempt: u32,
    pub max_retries: u32,
    pub category: ErrorCategory,
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delay_ms: Option<u64>,
}

/// Batch position for concurrent-batch runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchInfo {
    /// 1-based batch number.
    pub batch: usize,
    pub total_batches: usize,
    pub batch_size: usize,
}

/// Optional fields a caller adds to a snapshot.
#[derive(Debug, Clone, Default)]
pub struct SnapshotExtra {
    pub retry: Option<RetryInfo>,
    pub batch: Option<BatchInfo>,
    pub error: Option<String>,
    pub failure: Option<FailureReport>,
}

impl SnapshotExtra {
    pub fn retry(retry: RetryInfo) -> Self {
        Self {
            retry: Some(retry),
            ..Self::default()
        }
    }

    pub fn batch(batch: BatchInfo) -> Self {
        Self {
            batch: Some(batch),
            ..Self::default()
        }
    }
}

/// Full view of a generation at one moment, pushed to a progress sink.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressSnapshot {
    pub generation_id: String,
    pub status: Stage,
    pub stage: Stage,
    pub progress: u8,
    pub message: String,
    pub current_panel: usize,
    pub total_panels: usize,
    pub panels: Vec<PanelRecord>,
    pub eta: String,
    pub stats: PanelStats,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch: Option<BatchInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureReport>,
}
