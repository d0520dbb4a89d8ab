//! Hosted adapters (OpenAI, Gemini, Replicate, HuggingFace, Modal) against
//! fake API servers.

use crate::integration::test_utils::{bind, fast_options, reference_image, request, serve};
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::Arc;
use storyboard::config::{ApiKeys, EndpointsConfig};
use storyboard::error::ErrorCategory;
use storyboard::generation::{GenerationCoordinator, GenerationRequest};
use storyboard::image::{ImageData, ImageSource};
use storyboard::progress::{CollectingSink, PanelStatus};
use storyboard::provider::{ProviderFactory, ProviderKind};
use storyboard::settings::GenerationSettings;
use storyboard::store::InMemoryStore;

const JPEG: &[u8] = &[0xff, 0xd8, 0xff, 0xe0, 0x00, 0x10];
const PNG: &[u8] = &[0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a];

/// Requests seen by a fake server: path, authorization header and body.
#[derive(Clone, Default)]
struct Recorder {
    seen: Arc<Mutex<Vec<(String, Option<String>, Value)>>>,
}

impl Recorder {
    fn push(&self, path: impl Into<String>, headers: &HeaderMap, body: Value) {
        let auth = headers
            .get(header::AUTHORIZATION)
            .or_else(|| headers.get("x-goog-api-key"))
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        self.seen.lock().push((path.into(), auth, body));
    }

    fn all(&self) -> Vec<(String, Option<String>, Value)> {
        self.seen.lock().clone()
    }
}

fn coordinator(endpoints: EndpointsConfig, kind: ProviderKind, key: &str) -> GenerationCoordinator {
    let mut api_keys = ApiKeys::default();
    api_keys.set(kind, key);
    let factory = ProviderFactory::new(endpoints, api_keys);
    GenerationCoordinator::new(
        Arc::new(factory),
        Arc::new(InMemoryStore::new()),
        Arc::new(CollectingSink::default()),
        fast_options(),
    )
}

fn decode(url: &Option<String>) -> ImageData {
    ImageData::from_data_url(url.as_deref().unwrap()).unwrap()
}

async fn openai_generate(
    State((recorder, base)): State<(Recorder, String)>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Json<Value> {
    recorder.push("/v1/images/generations", &headers, body);
    Json(json!({ "created": 1, "data": [{ "url": format!("{}/files/panel.jpg", base) }] }))
}

async fn hosted_file() -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "image/jpeg")], JPEG.to_vec())
}

#[tokio::test]
async fn test_openai_downloads_returned_url() {
    let recorder = Recorder::default();
    let (listener, url) = bind().await;
    let app = Router::new()
        .route("/v1/images/generations", post(openai_generate))
        .route("/files/panel.jpg", get(hosted_file))
        .with_state((recorder.clone(), url.clone()));
    serve(listener, app);

    let coordinator = coordinator(
        EndpointsConfig {
            openai_base_url: Some(format!("{}/v1", url)),
            ..EndpointsConfig::default()
        },
        ProviderKind::OpenAi,
        "sk-test",
    );
    let result = coordinator
        .run(request("1. A lighthouse\n2. The keeper", GenerationSettings::for_provider("openai")))
        .await
        .unwrap();

    assert_eq!(result.completed_count(), 2);
    assert_eq!(result.metadata.model, "dall-e-3");
    let image = decode(&result.panels[0].url);
    assert_eq!(image.mime, "image/jpeg");
    assert_eq!(image.bytes, JPEG);

    let seen = recorder.all();
    assert_eq!(seen.len(), 2);
    assert_eq!(seen[0].1.as_deref(), Some("Bearer sk-test"));
    assert_eq!(seen[0].2["size"], "1024x1024");
    assert!(seen[1].2["prompt"].as_str().unwrap().starts_with("The keeper"));
}

async fn rate_limited(State(recorder): State<Recorder>, headers: HeaderMap, Json(body): Json<Value>) -> Response {
    recorder.push("/images/generations", &headers, body);
    (
        StatusCode::TOO_MANY_REQUESTS,
        Json(json!({ "error": { "message": "Rate limit exceeded", "type": "requests" } })),
    )
        .into_response()
}

#[tokio::test]
async fn test_openai_rate_limit_fails_panel_after_retries() {
    let recorder = Recorder::default();
    let (listener, url) = bind().await;
    let app = Router::new()
        .route("/images/generations", post(rate_limited))
        .with_state(recorder.clone());
    serve(listener, app);

    let coordinator = coordinator(
        EndpointsConfig {
            openai_base_url: Some(url),
            ..EndpointsConfig::default()
        },
        ProviderKind::OpenAi,
        "sk-test",
    );
    let mut settings = GenerationSettings::for_provider("openai");
    settings.max_retries = Some(2);
    let result = coordinator.run(request("1. A lighthouse", settings)).await.unwrap();

    let panel = &result.panels[0];
    assert_eq!(panel.status, PanelStatus::Error);
    assert_eq!(panel.attempts, 2);
    assert_eq!(
        panel.error.as_deref(),
        Some("OpenAI request failed with status 429: Rate limit exceeded")
    );
    assert_eq!(recorder.all().len(), 2);
}

#[tokio::test]
async fn test_missing_api_key_is_rejected_before_any_request() {
    let factory = ProviderFactory::new(EndpointsConfig::default(), ApiKeys::default());
    let coordinator = GenerationCoordinator::new(
        Arc::new(factory),
        Arc::new(InMemoryStore::new()),
        Arc::new(CollectingSink::default()),
        fast_options(),
    );
    let err = coordinator
        .run(request("1. A lighthouse", GenerationSettings::for_provider("openai")))
        .await
        .unwrap_err();
    assert_eq!(err.category, ErrorCategory::Validation);
    assert_eq!(err.message, "OpenAI API key is required");
}

async fn gemini_predict(
    State(recorder): State<Recorder>,
    Path(rest): Path<String>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Json<Value> {
    recorder.push(rest, &headers, body);
    Json(json!({
        "predictions": [{ "bytesBase64Encoded": STANDARD.encode(JPEG), "mimeType": "image/jpeg" }]
    }))
}

#[tokio::test]
async fn test_gemini_decodes_prediction_bytes() {
    let recorder = Recorder::default();
    let (listener, url) = bind().await;
    let app = Router::new()
        .route("/models/{*rest}", post(gemini_predict))
        .with_state(recorder.clone());
    serve(listener, app);

    let coordinator = coordinator(
        EndpointsConfig {
            gemini_base_url: Some(url),
            ..EndpointsConfig::default()
        },
        ProviderKind::Gemini,
        "g-key",
    );
    let mut settings = GenerationSettings::for_provider("gemini");
    settings.aspect_ratio = Some("16:9".to_string());
    let result = coordinator.run(request("1. Dunes", settings)).await.unwrap();

    let image = decode(&result.panels[0].url);
    assert_eq!(image.mime, "image/jpeg");
    assert_eq!(image.bytes, JPEG);

    let seen = recorder.all();
    assert_eq!(seen[0].0, "imagen-3.0-generate-001:predict");
    assert_eq!(seen[0].1.as_deref(), Some("g-key"));
    assert_eq!(seen[0].2["parameters"]["aspectRatio"], "16:9");
}

async fn replicate_predict(
    State((recorder, base)): State<(Recorder, String)>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Json<Value> {
    let prefer = headers.get("prefer").and_then(|v| v.to_str().ok()).unwrap_or_default().to_string();
    recorder.push(format!("/predictions prefer={}", prefer), &headers, body);
    Json(json!({
        "id": "p1",
        "status": "succeeded",
        "output": [format!("{}/files/out.png", base)]
    }))
}

async fn replicate_file() -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "image/png")], PNG.to_vec())
}

#[tokio::test]
async fn test_replicate_waits_and_downloads_first_output() {
    let recorder = Recorder::default();
    let (listener, url) = bind().await;
    let app = Router::new()
        .route("/predictions", post(replicate_predict))
        .route("/files/out.png", get(replicate_file))
        .with_state((recorder.clone(), url.clone()));
    serve(listener, app);

    let coordinator = coordinator(
        EndpointsConfig {
            replicate_base_url: Some(url),
            ..EndpointsConfig::default()
        },
        ProviderKind::Replicate,
        "r8_token",
    );
    let result = coordinator
        .run(request("1. Canyon", GenerationSettings::for_provider("replicate")))
        .await
        .unwrap();

    assert_eq!(decode(&result.panels[0].url).bytes, PNG);
    let seen = recorder.all();
    assert_eq!(seen[0].0, "/predictions prefer=wait");
    assert_eq!(seen[0].1.as_deref(), Some("Bearer r8_token"));
}

async fn huggingface_infer(
    State(recorder): State<Recorder>,
    Path(model): Path<String>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> impl IntoResponse {
    recorder.push(model, &headers, body);
    ([(header::CONTENT_TYPE, "image/jpeg")], JPEG.to_vec())
}

#[tokio::test]
async fn test_huggingface_returns_raw_image_bytes() {
    let recorder = Recorder::default();
    let (listener, url) = bind().await;
    let app = Router::new()
        .route("/models/{*model}", post(huggingface_infer))
        .with_state(recorder.clone());
    serve(listener, app);

    let coordinator = coordinator(
        EndpointsConfig {
            huggingface_base_url: Some(format!("{}/models", url)),
            ..EndpointsConfig::default()
        },
        ProviderKind::HuggingFace,
        "hf_token",
    );
    let result = coordinator
        .run(request("1. Forest", GenerationSettings::for_provider("huggingface")))
        .await
        .unwrap();

    let image = decode(&result.panels[0].url);
    assert_eq!(image.mime, "image/jpeg");
    let seen = recorder.all();
    assert_eq!(seen[0].0, "stabilityai/stable-diffusion-xl-base-1.0");
    assert_eq!(seen[0].1.as_deref(), Some("Bearer hf_token"));
}

async fn modal_edit(State(recorder): State<Recorder>, headers: HeaderMap, Json(body): Json<Value>) -> Json<Value> {
    recorder.push("/", &headers, body);
    Json(json!({
        "image": format!("data:image/png;base64,{}", STANDARD.encode(PNG)),
        "width": 1664,
        "height": 928
    }))
}

#[tokio::test]
async fn test_modal_sends_reference_in_batches() {
    let recorder = Recorder::default();
    let (listener, url) = bind().await;
    let app = Router::new().route("/", post(modal_edit)).with_state(recorder.clone());
    serve(listener, app);

    let coordinator = coordinator(
        EndpointsConfig {
            modal_function_url: format!("{}/", url),
            ..EndpointsConfig::default()
        },
        ProviderKind::Modal,
        "modal-token",
    );
    let mut settings = GenerationSettings::for_provider("modal");
    settings.batch_size = Some(2);
    settings.seed = Some(7);
    let result = coordinator
        .run(request("1. One\n2. Two\n3. Three", settings))
        .await
        .unwrap();

    assert_eq!(result.completed_count(), 3);
    let numbers: Vec<usize> = result.panels.iter().map(|p| p.number).collect();
    assert_eq!(numbers, vec![1, 2, 3]);

    let seen = recorder.all();
    assert_eq!(seen.len(), 3);
    let reference = reference_image().to_url_string();
    for (_, auth, body) in &seen {
        assert_eq!(auth.as_deref(), Some("Bearer modal-token"));
        assert_eq!(body["reference_images"][0].as_str(), Some(reference.as_str()));
        assert_eq!(body["width"], 1664);
        assert_eq!(body["height"], 928);
    }
    let mut seeds: Vec<i64> = seen.iter().map(|(_, _, b)| b["seed"].as_i64().unwrap()).collect();
    seeds.sort_unstable();
    assert_eq!(seeds, vec![7, 8, 9]);
}

#[tokio::test]
async fn test_modal_rejects_remote_reference() {
    let coordinator = coordinator(EndpointsConfig::default(), ProviderKind::Modal, "modal-token");
    let request = GenerationRequest::new(
        Some(ImageSource::Url("https://example.com/ref.png".to_string())),
        "1. One",
        GenerationSettings::for_provider("modal"),
    );
    let err = coordinator.run(request).await.unwrap_err();
    assert_eq!(err.category, ErrorCategory::Validation);
    assert!(err.message.starts_with("Modal Qwen-Image-Edit requires a reference image"));
}
