//! Automatic1111 and ComfyUI adapters against fake local servers.

use crate::integration::test_utils::{bind, closed_port_url, fast_options, request, serve};
use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use storyboard::config::{ApiKeys, EndpointsConfig};
use storyboard::error::ErrorCategory;
use storyboard::generation::GenerationCoordinator;
use storyboard::image::ImageData;
use storyboard::progress::{CollectingSink, PanelStatus};
use storyboard::prompt::STYLE_SUFFIX;
use storyboard::provider::{ProviderFactory, ProviderTimeouts};
use storyboard::settings::GenerationSettings;
use storyboard::store::{GenerationStatus, GenerationStore, InMemoryStore};

const PNG: &[u8] = &[0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a];
const CHECKPOINT: &str = "sdxl_base.safetensors [31e35c80fc]";

fn fast_timeouts() -> ProviderTimeouts {
    ProviderTimeouts {
        probe: Duration::from_millis(500),
        poll_interval: Duration::from_millis(10),
        poll_attempts: 20,
        ..ProviderTimeouts::default()
    }
}

fn coordinator(endpoints: EndpointsConfig) -> (GenerationCoordinator, Arc<InMemoryStore>) {
    let factory = ProviderFactory::new(endpoints, ApiKeys::default()).with_timeouts(fast_timeouts());
    let store = Arc::new(InMemoryStore::new());
    let coordinator = GenerationCoordinator::new(
        Arc::new(factory),
        store.clone(),
        Arc::new(CollectingSink::default()),
        fast_options(),
    );
    (coordinator, store)
}

fn decode_panel(url: &str) -> ImageData {
    ImageData::from_data_url(url).unwrap()
}

#[derive(Clone, Default)]
struct A1111State {
    bodies: Arc<Mutex<Vec<Value>>>,
    fail_generation: bool,
}

async fn sd_models() -> Json<Value> {
    Json(json!([
        { "title": CHECKPOINT, "model_name": "sdxl_base" },
        { "title": "other.safetensors", "model_name": "other" }
    ]))
}

async fn txt2img(
    State(state): State<A1111State>,
    Json(body): Json<Value>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    state.bodies.lock().push(body);
    if state.fail_generation {
        return Err((
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "detail": "CUDA out of memory" })),
        ));
    }
    Ok(Json(json!({ "images": [STANDARD.encode(PNG)], "info": "{}" })))
}

async fn start_a1111(state: A1111State) -> String {
    let app = Router::new()
        .route("/sdapi/v1/sd-models", get(sd_models))
        .route("/sdapi/v1/txt2img", post(txt2img))
        .with_state(state);
    let (listener, url) = bind().await;
    serve(listener, app);
    url
}

#[tokio::test]
async fn test_automatic1111_generates_with_discovered_model() {
    let state = A1111State::default();
    let url = start_a1111(state.clone()).await;
    let (coordinator, _) = coordinator(EndpointsConfig {
        automatic1111_url: url,
        ..EndpointsConfig::default()
    });

    let mut settings = GenerationSettings::for_provider("automatic1111");
    settings.seed = Some(42);
    let result = coordinator
        .run(request("1. Wide shot\n2. Close-up", settings))
        .await
        .unwrap();

    assert_eq!(result.metadata.model, CHECKPOINT);
    assert_eq!(result.completed_count(), 2);
    let image = decode_panel(result.panels[1].url.as_deref().unwrap());
    assert_eq!(image.bytes, PNG);
    assert_eq!(image.mime, "image/png");

    let bodies = state.bodies.lock().clone();
    assert_eq!(bodies.len(), 2);
    assert_eq!(bodies[0]["seed"], 42);
    assert_eq!(bodies[1]["seed"], 43);
    assert_eq!(bodies[0]["override_settings"]["sd_model_checkpoint"], CHECKPOINT);
    let prompt = bodies[0]["prompt"].as_str().unwrap();
    assert!(prompt.starts_with("Wide shot"));
    assert!(prompt.ends_with(STYLE_SUFFIX));
}

#[tokio::test]
async fn test_automatic1111_unreachable_aborts_before_panels() {
    let (coordinator, store) = coordinator(EndpointsConfig {
        automatic1111_url: closed_port_url().await,
        ..EndpointsConfig::default()
    });
    let err = coordinator
        .run(request("1. Wide shot", GenerationSettings::for_provider("automatic1111")))
        .await
        .unwrap_err();

    assert_eq!(err.category, ErrorCategory::Network);
    assert!(err.message.starts_with("Failed to connect to Automatic1111 at http://127.0.0.1:"));
    assert!(err.message.ends_with("Make sure SD WebUI is running with --api flag."));
    assert_eq!(store.len(), 1);
}

#[tokio::test]
async fn test_automatic1111_server_error_exhausts_panel_retries() {
    let state = A1111State {
        fail_generation: true,
        ..A1111State::default()
    };
    let url = start_a1111(state.clone()).await;
    let (coordinator, store) = coordinator(EndpointsConfig {
        automatic1111_url: url,
        ..EndpointsConfig::default()
    });
    let mut settings = GenerationSettings::for_provider("automatic1111");
    settings.max_retries = Some(2);
    let result = coordinator.run(request("1. Wide shot", settings)).await.unwrap();

    let panel = &result.panels[0];
    assert_eq!(panel.status, PanelStatus::Error);
    assert_eq!(panel.attempts, 2);
    assert_eq!(
        panel.error.as_deref(),
        Some("Automatic1111 request failed with status 500: CUDA out of memory")
    );
    assert_eq!(state.bodies.lock().len(), 2);

    let record = store.get(&result.generation_id).unwrap().unwrap();
    assert_eq!(record.status, GenerationStatus::Completed);
}

#[derive(Clone, Default)]
struct ComfyState {
    submissions: Arc<Mutex<Vec<Value>>>,
    polls: Arc<Mutex<HashMap<String, usize>>>,
    views: Arc<Mutex<Vec<HashMap<String, String>>>>,
    never_finish: bool,
}

async fn system_stats() -> Json<Value> {
    Json(json!({ "system": { "os": "posix" }, "devices": [] }))
}

async fn submit_prompt(State(state): State<ComfyState>, Json(body): Json<Value>) -> Json<Value> {
    let mut submissions = state.submissions.lock();
    submissions.push(body);
    Json(json!({ "prompt_id": format!("job-{}", submissions.len()), "number": submissions.len() }))
}

async fn history(State(state): State<ComfyState>, Path(id): Path<String>) -> Json<Value> {
    let polls = {
        let mut polls = state.polls.lock();
        let count = polls.entry(id.clone()).or_insert(0);
        *count += 1;
        *count
    };
    if state.never_finish || polls < 2 {
        return Json(json!({}));
    }
    let entry = json!({
        "outputs": {
            "9": { "images": [{ "filename": format!("{}.png", id), "subfolder": "", "type": "output" }] }
        }
    });
    let mut body = serde_json::Map::new();
    body.insert(id, entry);
    Json(Value::Object(body))
}

async fn view(
    State(state): State<ComfyState>,
    Query(query): Query<HashMap<String, String>>,
) -> impl axum::response::IntoResponse {
    state.views.lock().push(query);
    ([(header::CONTENT_TYPE, "image/png")], PNG.to_vec())
}

async fn start_comfyui(state: ComfyState) -> String {
    let app = Router::new()
        .route("/system_stats", get(system_stats))
        .route("/prompt", post(submit_prompt))
        .route("/history/{id}", get(history))
        .route("/view", get(view))
        .with_state(state);
    let (listener, url) = bind().await;
    serve(listener, app);
    url
}

#[tokio::test]
async fn test_comfyui_submits_polls_and_fetches() {
    let state = ComfyState::default();
    let url = start_comfyui(state.clone()).await;
    let (coordinator, _) = coordinator(EndpointsConfig {
        comfyui_url: url,
        ..EndpointsConfig::default()
    });

    let result = coordinator
        .run(request("1. Harbor at dawn\n2. Storm rolls in", GenerationSettings::for_provider("comfyui")))
        .await
        .unwrap();

    assert_eq!(result.completed_count(), 2);
    assert_eq!(result.metadata.model, "sd_xl_base_1.0.safetensors");
    assert_eq!(decode_panel(result.panels[0].url.as_deref().unwrap()).bytes, PNG);

    let submissions = state.submissions.lock().clone();
    assert_eq!(submissions.len(), 2);
    let text = submissions[1]["prompt"]["6"]["inputs"]["text"].as_str().unwrap();
    assert!(text.starts_with("Storm rolls in"));
    assert!(submissions[0]["client_id"].as_str().unwrap().starts_with("storyboard-"));
    assert_eq!(state.polls.lock().get("job-1"), Some(&2));
    let views = state.views.lock().clone();
    assert_eq!(views.len(), 2);
    assert_eq!(views[0].get("type").map(String::as_str), Some("output"));
    assert_eq!(views[0].get("filename").map(String::as_str), Some("job-1.png"));
}

#[tokio::test]
async fn test_comfyui_poll_budget_times_out() {
    let state = ComfyState {
        never_finish: true,
        ..ComfyState::default()
    };
    let url = start_comfyui(state.clone()).await;
    let (coordinator, _) = coordinator(EndpointsConfig {
        comfyui_url: url,
        ..EndpointsConfig::default()
    });
    let mut settings = GenerationSettings::for_provider("comfyui");
    settings.max_retries = Some(1);
    let result = coordinator.run(request("1. Harbor", settings)).await.unwrap();

    let panel = &result.panels[0];
    assert_eq!(panel.status, PanelStatus::Error);
    assert_eq!(panel.error.as_deref(), Some("ComfyUI generation timed out"));
    assert_eq!(state.polls.lock().get("job-1"), Some(&20));
}

#[tokio::test]
async fn test_comfyui_unreachable_is_a_network_error() {
    let (coordinator, _) = coordinator(EndpointsConfig {
        comfyui_url: closed_port_url().await,
        ..EndpointsConfig::default()
    });
    let err = coordinator
        .run(request("1. Harbor", GenerationSettings::for_provider("comfyui")))
        .await
        .unwrap_err();
    assert_eq!(err.category, ErrorCategory::Network);
    assert!(err.message.ends_with("Make sure ComfyUI is running."));
}

#[tokio::test]
async fn test_settings_url_overrides_endpoint_config() {
    let state = A1111State::default();
    let url = start_a1111(state.clone()).await;
    let (coordinator, _) = coordinator(EndpointsConfig {
        automatic1111_url: closed_port_url().await,
        ..EndpointsConfig::default()
    });
    let mut settings = GenerationSettings::for_provider("automatic1111");
    settings.automatic1111_url = Some(format!("{}/", url));
    let result = coordinator.run(request("1. Wide shot", settings)).await.unwrap();
    assert_eq!(result.completed_count(), 1);
    assert_eq!(state.bodies.lock().len(), 1);
}
