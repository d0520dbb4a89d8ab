//! Layered configuration feeding the CLI run context.

use axum::routing::{get, post};
use axum::{Json, Router};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::Path;
use storyboard::cli::{Commands, RunContext};
use storyboard::config::{ConfigLoader, StoryboardConfig, WORKSPACE_CONFIG_FILE};
use storyboard::provider::ProviderKind;
use storyboard::store::{GenerationStatus, JsonDirStore};
use tempfile::TempDir;

fn load(dir: &Path, env: &[(&str, &str)]) -> StoryboardConfig {
    let env: HashMap<String, String> = env
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    ConfigLoader::load_from(
        Some(&dir.join("global.toml")),
        &dir.join(WORKSPACE_CONFIG_FILE),
        Some(env),
    )
    .unwrap()
}

#[test]
fn test_three_layers_resolve_per_key() {
    let temp = TempDir::new().unwrap();
    std::fs::write(
        temp.path().join("global.toml"),
        "[generation]\npanel_count = 12\nbatch_size = 6\nmax_retries = 4\n\n[retry]\nbase_delay_ms = 250\n",
    )
    .unwrap();
    std::fs::write(
        temp.path().join(WORKSPACE_CONFIG_FILE),
        "[generation]\nbatch_size = 3\n\n[logging]\nlevel = \"debug\"\n",
    )
    .unwrap();

    let config = load(
        temp.path(),
        &[
            ("STORYBOARD__GENERATION__MAX_RETRIES", "2"),
            ("REPLICATE_API_TOKEN", "r8_env"),
        ],
    );
    assert_eq!(config.generation.panel_count, 12);
    assert_eq!(config.generation.batch_size, 3);
    assert_eq!(config.generation.max_retries, 2);
    assert_eq!(config.retry.base_delay_ms, 250);
    assert_eq!(config.logging.level, "debug");
    assert_eq!(config.api_keys.for_provider(ProviderKind::Replicate), Some("r8_env"));
}

#[test]
fn test_config_command_redacts_keys() {
    let temp = TempDir::new().unwrap();
    std::fs::write(
        temp.path().join(WORKSPACE_CONFIG_FILE),
        "[api_keys]\nopenai = \"sk-very-secret\"\n\n[endpoints]\ncomfyui_url = \"http://gpu-box:8188\"\n",
    )
    .unwrap();
    let config = load(temp.path(), &[]);
    let ctx = RunContext::from_config(temp.path().to_path_buf(), config);

    let output = ctx.execute(&Commands::Config).unwrap();
    assert!(!output.contains("sk-very-secret"));
    assert!(output.contains("********"));
    assert!(output.contains("http://gpu-box:8188"));

    let reparsed: toml::Value = toml::from_str(&output).unwrap();
    assert_eq!(reparsed["generation"]["panel_count"].as_integer(), Some(20));
}

#[test]
fn test_segment_command_reads_prompt_file() {
    let temp = TempDir::new().unwrap();
    let prompt_file = temp.path().join("prompt.txt");
    std::fs::write(&prompt_file, "Intro line\n3. Exit\n1. Enter\n").unwrap();
    let ctx = RunContext::from_config(temp.path().to_path_buf(), StoryboardConfig::default());

    let output = ctx
        .execute(&Commands::Segment {
            prompt: None,
            prompt_file: Some(prompt_file),
            json: false,
        })
        .unwrap();
    assert_eq!(output, "1. Enter\n2. Exit");
}

async fn sd_models() -> Json<Value> {
    Json(json!([{ "title": "dreamshaper_8.safetensors" }]))
}

async fn txt2img(Json(_body): Json<Value>) -> Json<Value> {
    Json(json!({ "images": [STANDARD.encode([0x89, b'P', b'N', b'G'])] }))
}

#[test]
fn test_generate_command_uses_workspace_config() {
    // The command builds its own runtime, so the fake server runs on a
    // separate one and the command is called from plain test code.
    let server_runtime = tokio::runtime::Runtime::new().unwrap();
    let url = server_runtime.block_on(async {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        let app = Router::new()
            .route("/sdapi/v1/sd-models", get(sd_models))
            .route("/sdapi/v1/txt2img", post(txt2img));
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        url
    });

    let temp = TempDir::new().unwrap();
    std::fs::write(
        temp.path().join(WORKSPACE_CONFIG_FILE),
        format!(
            "[endpoints]\nautomatic1111_url = \"{}\"\n\n[storage]\noutput_dir = \"boards\"\nrecords_dir = \"records\"\n",
            url
        ),
    )
    .unwrap();
    let reference = temp.path().join("reference.png");
    std::fs::write(&reference, [0x89, b'P', b'N', b'G', 0x0d, 0x0a]).unwrap();

    let ctx = RunContext::from_config(temp.path().to_path_buf(), load(temp.path(), &[]));
    let output = ctx
        .execute(&Commands::Generate {
            image: reference.display().to_string(),
            prompt: Some("1. Establishing shot\n2. Reaction".to_string()),
            prompt_file: None,
            provider: Some("automatic1111".to_string()),
            settings: Some(r#"{"seed": "100"}"#.to_string()),
            panel_count: None,
            max_retries: Some(1),
            model: None,
            out: None,
            json: true,
        })
        .unwrap();

    let result: Value = serde_json::from_str(&output).unwrap();
    assert_eq!(result["provider"], "automatic1111");
    assert_eq!(result["metadata"]["model"], "dreamshaper_8.safetensors");
    let generation_id = result["generationId"].as_str().unwrap();
    let panel_path = temp
        .path()
        .join("boards")
        .join(generation_id)
        .join("panel-2.png");
    assert_eq!(std::fs::read(&panel_path).unwrap(), vec![0x89, b'P', b'N', b'G']);

    let store = JsonDirStore::new(temp.path().join("records")).unwrap();
    let records = store.list_all().unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].id, generation_id);
    assert_eq!(records[0].status, GenerationStatus::Completed);
    assert_eq!(records[0].output_panels.len(), 2);
}
