//! Per-generation progress state.
//!
//! The tracker owns every panel record for one generation. Status changes go
//! through [`ProgressTracker::update_panel_status`]; snapshots are pushed to
//! the configured [`ProgressSink`].

use super::sink::ProgressSink;
use super::snapshot::{
    PanelRecord, PanelStats, PanelStatus, ProgressSnapshot, SnapshotExtra, Stage,
};
use crate::error::{ErrorCategory, GenerationError};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

pub const ETA_CALCULATING: &str = "Calculating...";

/// Attempt counter and last failure category for one panel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryState {
    pub attempts: u32,
    pub last_category: Option<ErrorCategory>,
}

pub struct ProgressTracker {
    generation_id: String,
    total_panels: usize,
    max_retries: u32,
    started: Instant,
    panels: Vec<PanelRecord>,
    current_panel: usize,
    retries: HashMap<usize, RetryState>,
    stage: Stage,
    provider: Option<String>,
    sink: Arc<dyn ProgressSink>,
}

impl ProgressTracker {
    pub fn new(
        generation_id: impl Into<String>,
        total_panels: usize,
        max_retries: u32,
        sink: Arc<dyn ProgressSink>,
    ) -> Self {
        Self {
            generation_id: generation_id.into(),
            total_panels,
            max_retries: max_retries.max(1),
            started: Instant::now(),
            panels: Vec::with_capacity(total_panels),
            current_panel: 0,
            retries: HashMap::new(),
            stage: Stage::Initializing,
            provider: None,
            sink,
        }
    }

    pub fn set_provider(&mut self, provider: impl Into<String>) {
        self.provider = Some(provider.into());
    }

    pub fn total_panels(&self) -> usize {
        self.total_panels
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn panel(&self, number: usize) -> Option<&PanelRecord> {
        self.panels.iter().find(|p| p.number == number)
    }

    pub fn panels(&self) -> &[PanelRecord] {
        &self.panels
    }

    pub fn retry_state(&self, number: usize) -> RetryState {
        self.retries.get(&number).copied().unwrap_or_default()
    }

    /// Upserts the panel record. Entering `Generating` counts as one attempt.
    pub fn update_panel_status(
        &mut self,
        number: usize,
        status: PanelStatus,
        error_message: Option<String>,
    ) {
        match self.panels.iter_mut().find(|p| p.number == number) {
            Some(panel) => {
                panel.status = status;
                panel.error_message = error_message;
                if status == PanelStatus::Generating {
                    panel.attempts += 1;
                }
            }
            None => {
                let mut panel = PanelRecord::pending(number);
                panel.status = status;
                panel.error_message = error_message;
                if status == PanelStatus::Generating {
                    panel.attempts = 1;
                }
                let at = self.panels.partition_point(|p| p.number < number);
                self.panels.insert(at, panel);
            }
        }
        self.current_panel = number;
    }

    /// Marks the panel failed and records the failure. Returns whether the
    /// panel still has retry budget.
    pub fn record_failure(&mut self, number: usize, error: &GenerationError) -> bool {
        let state = self.retries.entry(number).or_default();
        state.attempts += 1;
        state.last_category = Some(error.category);
        let attempts = state.attempts;
        self.update_panel_status(number, PanelStatus::Error, Some(error.message.clone()));
        attempts < self.max_retries
    }

    fn count(&self, status: PanelStatus) -> usize {
        self.panels.iter().filter(|p| p.status == status).count()
    }

    /// floor(100 * completed / total).
    pub fn calculate_progress(&self) -> u8 {
        if self.total_panels == 0 {
            return 0;
        }
        let completed = self.count(PanelStatus::Completed).min(self.total_panels);
        (completed * 100 / self.total_panels) as u8
    }

    pub fn calculate_eta(&self) -> String {
        self.eta_after(self.elapsed())
    }

    /// Projects the remaining time from the average time per completed panel.
    pub fn eta_after(&self, elapsed: Duration) -> String {
        let completed = self.count(PanelStatus::Completed);
        if completed == 0 {
            return ETA_CALCULATING.to_string();
        }
        let remaining_panels = self.total_panels.saturating_sub(completed) as f64;
        let average_ms = elapsed.as_secs_f64() * 1000.0 / completed as f64;
        format_remaining(average_ms * remaining_panels)
    }

    pub fn get_panel_stats(&self) -> PanelStats {
        PanelStats {
            total: self.total_panels,
            completed: self.count(PanelStatus::Completed),
            generating: self.count(PanelStatus::Generating),
            pending: self.count(PanelStatus::Pending),
            error: self.count(PanelStatus::Error),
        }
    }

    pub fn snapshot(
        &self,
        stage: Stage,
        message: impl Into<String>,
        extra: SnapshotExtra,
    ) -> ProgressSnapshot {
        ProgressSnapshot {
            generation_id: self.generation_id.clone(),
            status: stage,
            stage,
            progress: self.calculate_progress(),
            message: message.into(),
            current_panel: self.current_panel,
            total_panels: self.total_panels,
            panels: self.panels.clone(),
            eta: self.calculate_eta(),
            stats: self.get_panel_stats(),
            provider: self.provider.clone(),
            retry: extra.retry,
            batch: extra.batch,
            error: extra.error,
            failure: extra.failure,
        }
    }

    pub fn send_progress(&mut self, stage: Stage, message: impl Into<String>) {
        self.send_progress_with(stage, message, SnapshotExtra::default());
    }

    pub fn send_progress_with(
        &mut self,
        stage: Stage,
        message: impl Into<String>,
        extra: SnapshotExtra,
    ) {
        self.stage = stage;
        let snapshot = self.snapshot(stage, message, extra);
        self.sink.send(&snapshot);
    }
}

fn format_remaining(remaining_ms: f64) -> String {
    if remaining_ms < 60_000.0 {
        format!("{} seconds left", (remaining_ms / 1000.0).ceil() as u64)
    } else if remaining_ms < 3_600_000.0 {
        format!("{} minutes left", (remaining_ms / 60_000.0).ceil() as u64)
    } else {
        format!("{} hours left", (remaining_ms / 3_600_000.0).ceil() as u64)
    }
}
