//! Generation coordinator: drives one storyboard run end to end.
//!
//! Validates the request, resolves the provider adapter, runs the panel loop
//! (sequential or batched per the provider's execution mode), retries failed
//! panels with backoff, and reports every state change to the progress sink.
//! Panel failures degrade to error entries; only request-level failures
//! abort the run.

use super::result::{GenerationMetadata, GenerationRequest, GenerationResult, PanelResult};
use crate::config::GenerationDefaults;
use crate::error::GenerationError;
use crate::image::ImageSource;
use crate::persist::PanelWriter;
use crate::progress::{
    BatchInfo, PanelStatus, ProgressSink, ProgressTracker, RetryInfo, SnapshotExtra, Stage,
};
use crate::prompt::segment_or_default;
use crate::provider::{ExecutionMode, ImageProvider, PanelRequest, ProviderKind, ProviderResolver};
use crate::retry::BackoffPolicy;
use crate::store::{GenerationRecord, GenerationStore};
use chrono::Utc;
use futures::stream::{FuturesUnordered, StreamExt};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::time::{sleep, Instant};
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

/// Run-wide knobs that do not come from the request.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CoordinatorOptions {
    pub defaults: GenerationDefaults,
    pub backoff: BackoffPolicy,
}

/// Top-level entry point for storyboard generation.
pub struct GenerationCoordinator {
    resolver: Arc<dyn ProviderResolver>,
    store: Arc<dyn GenerationStore>,
    sink: Arc<dyn ProgressSink>,
    options: CoordinatorOptions,
    writer: Option<PanelWriter>,
}

/// What a successful panel loop hands back to `run`.
struct Completed {
    provider: ProviderKind,
    model: String,
    panels: Vec<PanelResult>,
}

impl GenerationCoordinator {
    pub fn new(
        resolver: Arc<dyn ProviderResolver>,
        store: Arc<dyn GenerationStore>,
        sink: Arc<dyn ProgressSink>,
        options: CoordinatorOptions,
    ) -> Self {
        Self {
            resolver,
            store,
            sink,
            options,
            writer: None,
        }
    }

    /// Write completed panels to disk during post-processing.
    pub fn with_panel_writer(mut self, writer: PanelWriter) -> Self {
        self.writer = Some(writer);
        self
    }

    pub fn options(&self) -> &CoordinatorOptions {
        &self.options
    }

    /// Runs one generation. Returns one panel entry per description, in
    /// panel order, even when some panels failed.
    pub async fn run(&self, request: GenerationRequest) -> Result<GenerationResult, GenerationError> {
        let generation_id = Uuid::new_v4().to_string();
        let span = info_span!(
            "generation",
            generation_id = %generation_id,
            provider = %request.settings.provider_key()
        );
        self.run_with_id(generation_id, request).instrument(span).await
    }

    async fn run_with_id(
        &self,
        generation_id: String,
        request: GenerationRequest,
    ) -> Result<GenerationResult, GenerationError> {
        let started = Instant::now();
        let defaults = self.options.defaults;
        let panel_count = request
            .settings
            .panel_count
            .filter(|count| *count > 0)
            .unwrap_or(defaults.panel_count);
        let descriptions = segment_or_default(&request.prompt, panel_count);
        let max_retries = request.settings.max_retries.unwrap_or(defaults.max_retries);

        let tracker = Mutex::new(ProgressTracker::new(
            generation_id.clone(),
            descriptions.len(),
            max_retries,
            self.sink.clone(),
        ));
        {
            let mut tracker = tracker.lock();
            tracker.set_provider(request.settings.provider_key());
            tracker.send_progress(Stage::Initializing, "Initializing storyboard generation...");
        }
        info!(
            panels = descriptions.len(),
            max_retries,
            "Starting storyboard generation"
        );

        let mut recorded = false;
        let outcome = self
            .execute(&generation_id, &request, &descriptions, &tracker, &mut recorded)
            .await;

        match outcome {
            Ok(completed) => {
                tracker
                    .lock()
                    .send_progress(Stage::PostProcessing, "Finalizing storyboard...");
                let mut result = GenerationResult {
                    generation_id: generation_id.clone(),
                    provider: completed.provider,
                    metadata: GenerationMetadata {
                        model: completed.model,
                        timestamp: Utc::now(),
                        stats: tracker.lock().get_panel_stats(),
                        total_panels: descriptions.len(),
                        duration_ms: 0,
                    },
                    panels: completed.panels,
                };
                if let Some(writer) = &self.writer {
                    let written = writer.write_all(&mut result).await;
                    debug!(written, "Panels written to disk");
                }
                if let Err(err) = self.store.record_completed(&generation_id, &result.panels) {
                    error!(operation = "record_completed", error = %err, "Failed to record generation completion");
                }
                result.metadata.duration_ms =
                    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

                let stats = result.metadata.stats;
                tracker.lock().send_progress(
                    Stage::Completed,
                    format!(
                        "Storyboard complete: {} of {} panels generated",
                        stats.completed, stats.total
                    ),
                );
                info!(
                    completed = stats.completed,
                    failed = stats.error,
                    duration_ms = result.metadata.duration_ms,
                    "Storyboard generation finished"
                );
                Ok(result)
            }
            Err(err) => {
                if recorded {
                    if let Err(store_err) = self.store.record_failed(&generation_id, &err.message) {
                        error!(operation = "record_failed", error = %store_err, "Failed to record generation failure");
                    }
                }
                tracker.lock().send_progress_with(
                    Stage::Error,
                    format!("Generation failed: {}", err.message),
                    SnapshotExtra {
                        error: Some(err.message.clone()),
                        failure: Some(err.report(true)),
                        ..SnapshotExtra::default()
                    },
                );
                error!(
                    operation = "generate_storyboard",
                    category = %err.category,
                    severity = %err.severity,
                    error = %err,
                    "Storyboard generation failed"
                );
                Err(err)
            }
        }
    }

    async fn execute(
        &self,
        generation_id: &str,
        request: &GenerationRequest,
        descriptions: &[String],
        tracker: &Mutex<ProgressTracker>,
        recorded: &mut bool,
    ) -> Result<Completed, GenerationError> {
        if request.prompt.trim().is_empty() {
            return Err(GenerationError::validation(
                "Prompt is required for storyboard generation",
            ));
        }
        let reference = match &request.reference {
            Some(reference) if !reference.is_empty() => reference,
            _ => return Err(GenerationError::validation("Reference image is required")),
        };
        let kind: ProviderKind = request.settings.provider_key().parse()?;

        let record = GenerationRecord::starting(
            generation_id,
            request.settings.prompt_id.clone(),
            request.prompt.clone(),
            reference.summary(),
            serde_json::to_value(&request.settings).unwrap_or_default(),
        );
        self.store
            .record_started(&record)
            .map_err(|err| GenerationError::from(err).context("Failed to record generation start"))?;
        *recorded = true;

        let mut adapter = self.resolver.resolve(kind, &request.settings)?;
        adapter
            .prepare(Some(reference))
            .await
            .map_err(|err| {
                warn!(operation = "prepare", provider = %kind, error = %err, "Provider preparation failed");
                err
            })?;

        {
            let mut tracker = tracker.lock();
            for number in 1..=descriptions.len() {
                tracker.update_panel_status(number, PanelStatus::Pending, None);
            }
            tracker.send_progress(
                Stage::Preparing,
                format!(
                    "Preparing {} panels with {}...",
                    descriptions.len(),
                    kind.display_name()
                ),
            );
        }

        let panel_loop = PanelLoop {
            adapter: adapter.as_ref(),
            reference: Some(reference),
            total: descriptions.len(),
            tracker,
            backoff: self.options.backoff,
        };
        let panels = match kind.mode() {
            ExecutionMode::Sequential => self.run_sequential(kind, &panel_loop, descriptions).await,
            ExecutionMode::ConcurrentBatch => {
                let batch_size = request
                    .settings
                    .batch_size
                    .filter(|size| *size > 0)
                    .unwrap_or(self.options.defaults.batch_size);
                run_batched(&panel_loop, descriptions, batch_size).await
            }
        };

        Ok(Completed {
            provider: kind,
            model: adapter.model_name(),
            panels,
        })
    }

    async fn run_sequential(
        &self,
        kind: ProviderKind,
        panel_loop: &PanelLoop<'_>,
        descriptions: &[String],
    ) -> Vec<PanelResult> {
        let delay = self.options.defaults.inter_panel_delay();
        let mut panels = Vec::with_capacity(descriptions.len());
        for (index, description) in descriptions.iter().enumerate() {
            let number = index + 1;
            let panel = panel_loop.generate_panel(number, description).await;
            let succeeded = panel.is_completed();
            panels.push(panel);
            if succeeded && kind.is_hosted() && number < descriptions.len() && !delay.is_zero() {
                sleep(delay).await;
            }
        }
        panels
    }
}

async fn run_batched(
    panel_loop: &PanelLoop<'_>,
    descriptions: &[String],
    batch_size: usize,
) -> Vec<PanelResult> {
    let batch_size = batch_size.max(1);
    let total_batches = descriptions.len().div_ceil(batch_size);
    let mut panels = Vec::with_capacity(descriptions.len());

    for (batch_index, chunk) in descriptions.chunks(batch_size).enumerate() {
        let batch = batch_index + 1;
        let first = batch_index * batch_size + 1;
        panel_loop.tracker.lock().send_progress_with(
            Stage::Generating,
            format!("Processing batch {} of {}", batch, total_batches),
            SnapshotExtra::batch(BatchInfo {
                batch,
                total_batches,
                batch_size: chunk.len(),
            }),
        );
        debug!(batch, total_batches, size = chunk.len(), "Dispatching batch");

        let mut futures = FuturesUnordered::new();
        for (offset, description) in chunk.iter().enumerate() {
            futures.push(panel_loop.generate_panel(first + offset, description));
        }
        let mut batch_panels = Vec::with_capacity(chunk.len());
        while let Some(panel) = futures.next().await {
            batch_panels.push(panel);
        }
        batch_panels.sort_by_key(|panel| panel.number);
        panels.extend(batch_panels);
    }
    panels
}

/// Shared state for generating panels of one run.
struct PanelLoop<'a> {
    adapter: &'a dyn ImageProvider,
    reference: Option<&'a ImageSource>,
    total: usize,
    tracker: &'a Mutex<ProgressTracker>,
    backoff: BackoffPolicy,
}

impl PanelLoop<'_> {
    /// Generates one panel, retrying until it succeeds or the retry budget
    /// is spent. Never fails: exhaustion yields an error entry.
    async fn generate_panel(&self, number: usize, description: &str) -> PanelResult {
        loop {
            {
                let mut tracker = self.tracker.lock();
                tracker.update_panel_status(number, PanelStatus::Generating, None);
                tracker.send_progress(
                    Stage::Generating,
                    format!("Generating panel {} of {}...", number, self.total),
                );
            }

            let request = PanelRequest {
                number,
                description,
                reference: self.reference,
            };
            let err = match self.adapter.generate(request).await {
                Ok(image) => {
                    let mut tracker = self.tracker.lock();
                    tracker.update_panel_status(number, PanelStatus::Completed, None);
                    tracker.send_progress(
                        Stage::Generating,
                        format!("Completed panel {} of {}", number, self.total),
                    );
                    let attempts = tracker.panel(number).map_or(1, |panel| panel.attempts);
                    return PanelResult::completed(
                        number,
                        description.to_string(),
                        image.to_data_url(),
                        attempts,
                    );
                }
                Err(err) => err,
            };

            let (has_budget, attempts, max_retries) = {
                let mut tracker = self.tracker.lock();
                let has_budget = tracker.record_failure(number, &err);
                (
                    has_budget,
                    tracker.retry_state(number).attempts,
                    tracker.max_retries(),
                )
            };

            if has_budget {
                let delay = self.backoff.delay_for_attempt(attempts.saturating_sub(1));
                let delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
                warn!(
                    operation = "generate_panel",
                    panel = number,
                    attempt = attempts,
                    max_retries,
                    category = %err.category,
                    delay_ms,
                    error = %err,
                    "Panel generation failed, retrying"
                );
                self.tracker.lock().send_progress_with(
                    Stage::Retrying,
                    format!(
                        "Retrying panel {} (attempt {} of {})...",
                        number,
                        attempts + 1,
                        max_retries
                    ),
                    SnapshotExtra::retry(RetryInfo {
                        panel: number,
                        attempt: attempts,
                        max_retries,
                        category: err.category,
                        error: err.message.clone(),
                        delay_ms: Some(delay_ms),
                    }),
                );
                sleep(delay).await;
                continue;
            }

            error!(
                operation = "generate_panel",
                panel = number,
                attempt = attempts,
                max_retries,
                category = %err.category,
                error = %err,
                "Panel failed after exhausting retries"
            );
            self.tracker.lock().send_progress_with(
                Stage::ErrorPanel,
                format!("Panel {} failed after {} attempts", number, attempts),
                SnapshotExtra {
                    retry: Some(RetryInfo {
                        panel: number,
                        attempt: attempts,
                        max_retries,
                        category: err.category,
                        error: err.message.clone(),
                        delay_ms: None,
                    }),
                    error: Some(err.message.clone()),
                    failure: Some(err.report(true)),
                    batch: None,
                },
            );
            return PanelResult::failed(number, description.to_string(), &err, attempts);
        }
    }
}
