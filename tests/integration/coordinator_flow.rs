//! End-to-end coordinator behavior with scripted providers.

use crate::integration::test_utils::{
    fast_options, harness, harness_with_store, numbered_prompt, request, Script, Step,
};
use std::sync::Arc;
use std::time::Duration;
use storyboard::config::GenerationDefaults;
use storyboard::error::{ErrorCategory, StorageError};
use storyboard::generation::{CoordinatorOptions, GenerationRequest, PanelResult};
use storyboard::progress::{PanelStatus, ProgressSnapshot, Stage, ETA_CALCULATING};
use storyboard::retry::BackoffPolicy;
use storyboard::settings::GenerationSettings;
use storyboard::store::{GenerationRecord, GenerationStatus, GenerationStore};

fn settings(provider: &str) -> GenerationSettings {
    GenerationSettings::for_provider(provider)
}

fn numbers(panels: &[PanelResult]) -> Vec<usize> {
    panels.iter().map(|p| p.number).collect()
}

fn batch_snapshots(snapshots: &[ProgressSnapshot]) -> Vec<&ProgressSnapshot> {
    snapshots.iter().filter(|s| s.batch.is_some()).collect()
}

#[tokio::test]
async fn test_out_of_order_prompt_yields_ordered_panels() {
    let h = harness(Script::new(), fast_options());
    let result = h
        .coordinator
        .run(request("2. second\n1. first\n3. third", settings("automatic1111")))
        .await
        .unwrap();

    assert_eq!(numbers(&result.panels), vec![1, 2, 3]);
    let descriptions: Vec<&str> = result.panels.iter().map(|p| p.description.as_str()).collect();
    assert_eq!(descriptions, vec!["first", "second", "third"]);
    let ids: Vec<&str> = result.panels.iter().map(|p| p.id.as_str()).collect();
    assert_eq!(ids, vec!["panel-1", "panel-2", "panel-3"]);
    assert_eq!(h.script.calls(), vec![1, 2, 3]);
    assert!(result.panels.iter().all(|p| p
        .url
        .as_deref()
        .is_some_and(|url| url.starts_with("data:image/png;base64,"))));
}

#[tokio::test]
async fn test_unnumbered_prompt_falls_back_to_panel_count() {
    let h = harness(Script::new(), fast_options());
    let mut s = settings("comfyui");
    s.panel_count = Some(4);
    let result = h
        .coordinator
        .run(request("A lighthouse keeper's long night", s))
        .await
        .unwrap();

    assert_eq!(result.panels.len(), 4);
    assert_eq!(result.metadata.total_panels, 4);
    assert_eq!(result.panels[2].description, "Panel 3 of the storyboard");
}

#[tokio::test]
async fn test_attempt_counts_follow_retries() {
    let script = Script::new().on_panel(
        2,
        vec![Step::fail("ECONNRESET by peer"), Step::fail_status(503)],
    );
    let h = harness(script, fast_options());
    let result = h
        .coordinator
        .run(request(&numbered_prompt(2), settings("automatic1111")))
        .await
        .unwrap();

    assert_eq!(result.panels[0].attempts, 1);
    assert_eq!(result.panels[1].attempts, 3);
    assert_eq!(result.panels[1].status, PanelStatus::Completed);
    assert_eq!(h.script.calls(), vec![1, 2, 2, 2]);

    let retries: Vec<_> = h
        .sink
        .snapshots()
        .into_iter()
        .filter_map(|s| s.retry)
        .collect();
    assert_eq!(retries.len(), 2);
    assert_eq!(retries[0].category, ErrorCategory::Network);
    assert_eq!(retries[1].category, ErrorCategory::Api);
    assert_eq!(retries[1].attempt, 2);
}

#[tokio::test]
async fn test_panel_errors_only_after_max_retries() {
    let script = Script::new().on_panel(
        1,
        vec![
            Step::fail_status(404),
            Step::fail_status(404),
            Step::fail_status(404),
            Step::fail_status(404),
        ],
    );
    let h = harness(script, fast_options());
    let mut s = settings("automatic1111");
    s.max_retries = Some(3);
    let result = h.coordinator.run(request(&numbered_prompt(2), s)).await.unwrap();

    let failed = &result.panels[0];
    assert_eq!(failed.status, PanelStatus::Error);
    assert_eq!(failed.attempts, 3);
    assert_eq!(failed.url, None);
    assert_eq!(failed.description, "Shot number 1");
    assert!(failed.error.as_deref().unwrap().contains("404"));
    assert_eq!(h.script.calls_for(1), 3);

    // Partial failure still completes the generation.
    assert_eq!(result.panels[1].status, PanelStatus::Completed);
    assert_eq!(result.metadata.stats.error, 1);
    assert_eq!(result.metadata.stats.completed, 1);

    let snapshots = h.sink.snapshots();
    for snapshot in &snapshots {
        for panel in &snapshot.panels {
            if panel.status == PanelStatus::Error && snapshot.stage == Stage::ErrorPanel {
                assert_eq!(panel.attempts, 3);
            }
        }
    }
    let error_panel = snapshots
        .iter()
        .find(|s| s.stage == Stage::ErrorPanel)
        .unwrap();
    let failure = error_panel.failure.as_ref().unwrap();
    assert!(failure.is_final);
    assert_eq!(failure.category, ErrorCategory::Api);
    assert_eq!(snapshots.last().unwrap().stage, Stage::Completed);
}

#[tokio::test]
async fn test_progress_is_monotonic_and_eta_tracks_completion() {
    let script = Script::new().on_panel(3, vec![Step::fail("network unreachable")]);
    let h = harness(script, fast_options());
    h.coordinator
        .run(request(&numbered_prompt(5), settings("automatic1111")))
        .await
        .unwrap();

    let snapshots = h.sink.snapshots();
    let mut last = 0;
    for snapshot in &snapshots {
        assert!(snapshot.progress >= last, "progress went backwards");
        last = snapshot.progress;
        if snapshot.stats.completed == 0 {
            assert_eq!(snapshot.eta, ETA_CALCULATING);
        } else {
            assert_ne!(snapshot.eta, ETA_CALCULATING);
            assert!(!snapshot.eta.is_empty());
        }
        assert_eq!(snapshot.total_panels, 5);
    }
    assert_eq!(last, 100);
}

#[tokio::test]
async fn test_batches_run_concurrently_and_reorder() {
    // Later panels finish first within each batch.
    let script = Script::new()
        .with_latency(1, Duration::from_millis(60))
        .with_latency(2, Duration::from_millis(30))
        .with_latency(4, Duration::from_millis(60))
        .with_latency(5, Duration::from_millis(30));
    let h = harness(script, fast_options());
    let mut s = settings("modal");
    s.batch_size = Some(3);
    let result = h.coordinator.run(request(&numbered_prompt(7), s)).await.unwrap();

    assert_eq!(numbers(&result.panels), vec![1, 2, 3, 4, 5, 6, 7]);
    assert_eq!(h.script.max_in_flight(), 3);

    let snapshots = h.sink.snapshots();
    let batches = batch_snapshots(&snapshots);
    assert_eq!(batches.len(), 3);
    let last_batch = batches[2].batch.unwrap();
    assert_eq!(last_batch.batch, 3);
    assert_eq!(last_batch.total_batches, 3);
    assert_eq!(last_batch.batch_size, 1);
    assert_eq!(batches[0].message, "Processing batch 1 of 3");
}

#[tokio::test]
async fn test_batch_size_defaults_to_config() {
    let options = CoordinatorOptions {
        defaults: GenerationDefaults {
            batch_size: 4,
            inter_panel_delay_ms: 0,
            ..GenerationDefaults::default()
        },
        backoff: BackoffPolicy::immediate(),
    };
    let h = harness(Script::new(), options);
    let result = h
        .coordinator
        .run(request(&numbered_prompt(10), settings("modal")))
        .await
        .unwrap();
    assert_eq!(result.panels.len(), 10);
    assert_eq!(batch_snapshots(&h.sink.snapshots()).len(), 3);
}

#[tokio::test]
async fn test_sequential_providers_never_overlap() {
    let script = Script::new()
        .with_latency(1, Duration::from_millis(20))
        .with_latency(2, Duration::from_millis(20));
    let h = harness(script, fast_options());
    h.coordinator
        .run(request(&numbered_prompt(3), settings("huggingface")))
        .await
        .unwrap();
    assert_eq!(h.script.max_in_flight(), 1);
    assert!(batch_snapshots(&h.sink.snapshots()).is_empty());
}

#[tokio::test]
async fn test_batch_provider_without_reference_makes_no_attempts() {
    let h = harness(Script::new(), fast_options());
    let req = GenerationRequest::new(None, numbered_prompt(3), settings("modal"));
    let err = h.coordinator.run(req).await.unwrap_err();

    assert_eq!(err.category, ErrorCategory::Validation);
    assert!(!err.retryable);
    assert!(h.script.calls().is_empty());
    assert!(h.store.is_empty());

    let last = h.sink.snapshots().pop().unwrap();
    assert_eq!(last.stage, Stage::Error);
    assert!(last.panels.iter().all(|p| p.attempts == 0));
    let failure = last.failure.unwrap();
    assert!(failure.is_final);
    assert!(!failure.user_message.title.is_empty());
}

#[tokio::test]
async fn test_unsupported_provider_aborts() {
    let h = harness(Script::new(), fast_options());
    let err = h
        .coordinator
        .run(request(&numbered_prompt(2), settings("midjourney")))
        .await
        .unwrap_err();
    assert_eq!(err.category, ErrorCategory::Validation);
    assert_eq!(err.message, "Unsupported provider: midjourney");
    assert!(h.script.calls().is_empty());
}

#[tokio::test]
async fn test_blank_provider_defaults_to_openai() {
    let h = harness(Script::new(), fast_options());
    let result = h
        .coordinator
        .run(request("1. only", GenerationSettings::default()))
        .await
        .unwrap();
    assert_eq!(result.provider.as_str(), "openai");
    assert_eq!(result.metadata.model, "scripted-openai");
}

struct FailingStore;

impl GenerationStore for FailingStore {
    fn record_started(&self, _record: &GenerationRecord) -> Result<(), StorageError> {
        Err(StorageError::IoError(std::io::Error::new(
            std::io::ErrorKind::Other,
            "disk full",
        )))
    }

    fn record_completed(&self, _id: &str, _panels: &[PanelResult]) -> Result<(), StorageError> {
        Ok(())
    }

    fn record_failed(&self, _id: &str, _error: &str) -> Result<(), StorageError> {
        Ok(())
    }

    fn get(&self, _id: &str) -> Result<Option<GenerationRecord>, StorageError> {
        Ok(None)
    }
}

#[tokio::test]
async fn test_store_start_failure_is_a_database_error() {
    let script = Script::new();
    let (coordinator, _sink) = harness_with_store(script.clone(), Arc::new(FailingStore));
    let err = coordinator
        .run(request(&numbered_prompt(2), settings("automatic1111")))
        .await
        .unwrap_err();
    assert_eq!(err.category, ErrorCategory::Database);
    assert!(err.message.starts_with("Failed to record generation start"));
    assert!(script.calls().is_empty());
}

/// Loses completion updates; the run must still succeed.
struct ForgetfulStore;

impl GenerationStore for ForgetfulStore {
    fn record_started(&self, _record: &GenerationRecord) -> Result<(), StorageError> {
        Ok(())
    }

    fn record_completed(&self, id: &str, _panels: &[PanelResult]) -> Result<(), StorageError> {
        Err(StorageError::NotFound(id.to_string()))
    }

    fn record_failed(&self, id: &str, _error: &str) -> Result<(), StorageError> {
        Err(StorageError::NotFound(id.to_string()))
    }

    fn get(&self, _id: &str) -> Result<Option<GenerationRecord>, StorageError> {
        Ok(None)
    }
}

#[tokio::test]
async fn test_store_completion_failure_does_not_fail_run() {
    let (coordinator, sink) = harness_with_store(Script::new(), Arc::new(ForgetfulStore));
    let result = coordinator
        .run(request(&numbered_prompt(2), settings("automatic1111")))
        .await
        .unwrap();
    assert_eq!(result.completed_count(), 2);
    assert_eq!(sink.snapshots().last().unwrap().stage, Stage::Completed);
}

#[tokio::test]
async fn test_completed_generation_is_recorded() {
    let h = harness(Script::new(), fast_options());
    let mut s = settings("automatic1111");
    s.prompt_id = Some("prompt-12".to_string());
    let result = h.coordinator.run(request("1. a\n2. b", s)).await.unwrap();

    let record = h.store.get(&result.generation_id).unwrap().unwrap();
    assert_eq!(record.status, GenerationStatus::Completed);
    assert_eq!(record.prompt_id.as_deref(), Some("prompt-12"));
    assert_eq!(record.output_panels.len(), 2);
    assert_eq!(record.settings["provider"], "automatic1111");
}

#[tokio::test(start_paused = true)]
async fn test_backoff_waits_between_attempts() {
    let script = Script::new().on_panel(
        1,
        vec![Step::fail("socket hang up: network"), Step::fail("network down")],
    );
    let options = CoordinatorOptions {
        defaults: GenerationDefaults {
            inter_panel_delay_ms: 0,
            ..GenerationDefaults::default()
        },
        backoff: BackoffPolicy::default(),
    };
    let h = harness(script, options);
    let started = tokio::time::Instant::now();
    let result = h
        .coordinator
        .run(request("1. only", settings("automatic1111")))
        .await
        .unwrap();
    let elapsed = started.elapsed();

    assert_eq!(result.panels[0].attempts, 3);
    // 1000ms then 2000ms, each with up to 30% jitter.
    assert!(elapsed >= Duration::from_millis(3000), "elapsed {:?}", elapsed);
    assert!(elapsed <= Duration::from_millis(3900), "elapsed {:?}", elapsed);

    let delays: Vec<u64> = h
        .sink
        .snapshots()
        .into_iter()
        .filter_map(|s| s.retry.and_then(|r| r.delay_ms))
        .collect();
    assert_eq!(delays.len(), 2);
    assert!((1000..=1300).contains(&delays[0]));
    assert!((2000..=2600).contains(&delays[1]));
}

#[tokio::test(start_paused = true)]
async fn test_hosted_providers_pause_between_panels() {
    let options = CoordinatorOptions {
        defaults: GenerationDefaults::default(),
        backoff: BackoffPolicy::immediate(),
    };

    let hosted = harness(Script::new(), options);
    let started = tokio::time::Instant::now();
    hosted
        .coordinator
        .run(request(&numbered_prompt(3), settings("openai")))
        .await
        .unwrap();
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(2000), "elapsed {:?}", elapsed);
    assert!(elapsed < Duration::from_millis(2100), "elapsed {:?}", elapsed);

    let local = harness(Script::new(), options);
    let started = tokio::time::Instant::now();
    local
        .coordinator
        .run(request(&numbered_prompt(3), settings("comfyui")))
        .await
        .unwrap();
    assert_eq!(started.elapsed(), Duration::ZERO);
}
