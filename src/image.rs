//! Image payloads
//!
//! Providers answer in many shapes: raw response bytes, base64 strings,
//! data URLs, remote URLs and serialized byte buffers. Everything is
//! normalized to [`ImageData`] and rendered as a `data:` URL in results.

use crate::error::{ErrorCategory, GenerationError, RawError};
use crate::retry::{with_retry, with_timeout, BackoffPolicy};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::Client;
use serde_json::Value;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_MIME: &str = "image/png";

/// Decoded image bytes with their MIME type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageData {
    pub mime: String,
    pub bytes: Vec<u8>,
}

impl ImageData {
    pub fn new(mime: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            mime: mime.into(),
            bytes,
        }
    }

    pub fn png(bytes: Vec<u8>) -> Self {
        Self::new(DEFAULT_MIME, bytes)
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn to_base64(&self) -> String {
        STANDARD.encode(&self.bytes)
    }

    pub fn to_data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime, self.to_base64())
    }

    /// Parses `data:<mime>;base64,<payload>`.
    pub fn from_data_url(url: &str) -> Result<Self, GenerationError> {
        let rest = url
            .strip_prefix("data:")
            .ok_or_else(|| GenerationError::validation("Invalid data URL: missing data: prefix"))?;
        let (header, payload) = rest
            .split_once(',')
            .ok_or_else(|| GenerationError::validation("Invalid data URL: missing payload"))?;
        let mime = header.strip_suffix(";base64").ok_or_else(|| {
            GenerationError::validation("Invalid data URL: only base64 payloads are supported")
        })?;
        let mime = if mime.is_empty() { DEFAULT_MIME } else { mime };
        Self::from_base64(payload, mime)
    }

    pub fn from_base64(payload: &str, mime: &str) -> Result<Self, GenerationError> {
        let bytes = STANDARD
            .decode(payload.trim())
            .map_err(|e| GenerationError::validation(format!("Invalid base64 image data: {}", e)))?;
        Ok(Self::new(mime, bytes))
    }

    /// Reads an image file, guessing the MIME type from the extension.
    pub fn from_path(path: &Path) -> Result<Self, GenerationError> {
        let bytes = std::fs::read(path).map_err(|e| {
            let raw = RawError::new(format!(
                "Failed to read image file {}: {}",
                path.display(),
                e
            ));
            GenerationError::from_raw(match io_error_code(&e) {
                Some(code) => raw.with_code(code),
                None => raw,
            })
        })?;
        let mime = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(mime_for_extension)
            .unwrap_or(DEFAULT_MIME);
        Ok(Self::new(mime, bytes))
    }

    /// File extension matching the MIME type.
    pub fn extension(&self) -> &'static str {
        extension_for_mime(&self.mime)
    }
}

/// System error code for an I/O failure, as understood by the classifier.
pub fn io_error_code(err: &std::io::Error) -> Option<&'static str> {
    match err.kind() {
        std::io::ErrorKind::NotFound => Some("ENOENT"),
        std::io::ErrorKind::PermissionDenied => Some("EACCES"),
        _ => None,
    }
}

pub fn extension_for_mime(mime: &str) -> &'static str {
    match mime.split(';').next().unwrap_or_default().trim() {
        "image/jpeg" | "image/jpg" => "jpg",
        "image/webp" => "webp",
        "image/gif" => "gif",
        _ => "png",
    }
}

fn mime_for_extension(ext: &str) -> &'static str {
    match ext.to_ascii_lowercase().as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "webp" => "image/webp",
        "gif" => "image/gif",
        _ => DEFAULT_MIME,
    }
}

/// The reference image supplied with a generation request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageSource {
    /// Embedded bytes, sent to providers as a data URL.
    Inline(ImageData),
    /// A remotely hosted image.
    Url(String),
}

impl ImageSource {
    /// Parses a data URL or an http(s) URL.
    pub fn parse(value: &str) -> Result<Self, GenerationError> {
        let value = value.trim();
        if value.starts_with("data:") {
            ImageData::from_data_url(value).map(ImageSource::Inline)
        } else if value.starts_with("http://") || value.starts_with("https://") {
            Ok(ImageSource::Url(value.to_string()))
        } else {
            Err(GenerationError::validation(format!(
                "Unsupported reference image: expected a data URL or an http(s) URL, got {}",
                truncate(value, 48)
            )))
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            ImageSource::Inline(data) => data.is_empty(),
            ImageSource::Url(url) => url.trim().is_empty(),
        }
    }

    pub fn is_inline(&self) -> bool {
        matches!(self, ImageSource::Inline(_))
    }

    /// The form providers expect in JSON bodies.
    pub fn to_url_string(&self) -> String {
        match self {
            ImageSource::Inline(data) => data.to_data_url(),
            ImageSource::Url(url) => url.clone(),
        }
    }

    /// Short description suitable for logs and persisted records.
    pub fn summary(&self) -> String {
        match self {
            ImageSource::Inline(data) => format!("inline {} ({} bytes)", data.mime, data.bytes.len()),
            ImageSource::Url(url) => url.clone(),
        }
    }
}

fn truncate(value: &str, max: usize) -> String {
    if value.chars().count() <= max {
        value.to_string()
    } else {
        let cut: String = value.chars().take(max).collect();
        format!("{}...", cut)
    }
}

/// An unnormalized provider result.
#[derive(Debug, Clone)]
pub enum ImageOutput {
    /// Raw response body with its Content-Type, if any.
    Bytes {
        bytes: Vec<u8>,
        content_type: Option<String>,
    },
    /// A base64 payload, a data URL or a remote URL.
    Encoded(String),
    /// A JSON value: a string, a `{"type":"Buffer","data":[..]}` object, a
    /// byte array, or an array whose first element is any of these.
    Json(Value),
}

const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(30);
const DOWNLOAD_ATTEMPTS: u32 = 2;

/// Downloads remote images, following redirects.
#[derive(Debug, Clone)]
pub struct ImageDownloader {
    client: Client,
    timeout: Duration,
    attempts: u32,
    policy: BackoffPolicy,
}

impl ImageDownloader {
    pub fn new(client: Client, policy: BackoffPolicy) -> Self {
        Self {
            client,
            timeout: DOWNLOAD_TIMEOUT,
            attempts: DOWNLOAD_ATTEMPTS,
            policy,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Downloads with the timeout applied per attempt and one retry for
    /// retryable failures.
    pub async fn download(&self, url: &str) -> Result<ImageData, GenerationError> {
        with_retry("download-image", self.attempts, &self.policy, || {
            with_timeout("Image download", self.timeout, self.fetch(url))
        })
        .await
    }

    async fn fetch(&self, url: &str) -> Result<ImageData, GenerationError> {
        debug!(url, "Downloading image");
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if status.as_u16() == 404 {
            return Err(GenerationError::from_raw(
                RawError::new(format!("Image not found at {}", url)).with_status(404),
            ));
        }
        if !status.is_success() {
            return Err(GenerationError::from_raw(
                RawError::new(format!("Failed to download image: HTTP {}", status.as_u16()))
                    .with_status(status.as_u16()),
            ));
        }
        let mime = content_type(response.headers()).unwrap_or_else(|| DEFAULT_MIME.to_string());
        let bytes = response.bytes().await?;
        Ok(ImageData::new(mime, bytes.to_vec()))
    }

    /// Normalizes any provider result shape to [`ImageData`].
    pub async fn normalize(&self, output: ImageOutput) -> Result<ImageData, GenerationError> {
        let image = match output {
            ImageOutput::Bytes {
                bytes,
                content_type,
            } => ImageData::new(
                content_type
                    .filter(|ct| ct.starts_with("image/"))
                    .unwrap_or_else(|| DEFAULT_MIME.to_string()),
                bytes,
            ),
            ImageOutput::Encoded(text) => self.decode_text(&text).await?,
            ImageOutput::Json(value) => self.decode_json(value).await?,
        };
        if image.is_empty() {
            return Err(GenerationError::with_category(
                ErrorCategory::Unknown,
                "Provider returned an empty image",
            ));
        }
        Ok(image)
    }

    async fn decode_text(&self, text: &str) -> Result<ImageData, GenerationError> {
        let text = text.trim();
        if text.starts_with("data:") {
            ImageData::from_data_url(text)
        } else if text.starts_with("http://") || text.starts_with("https://") {
            self.download(text).await
        } else {
            ImageData::from_base64(text, DEFAULT_MIME)
        }
    }

    async fn decode_json(&self, value: Value) -> Result<ImageData, GenerationError> {
        match value {
            Value::String(text) => self.decode_text(&text).await,
            Value::Array(items) if items.iter().all(Value::is_u64) => byte_array(&items),
            Value::Array(mut items) => {
                if items.is_empty() {
                    return Err(unexpected_shape("empty array"));
                }
                let first = items.swap_remove(0);
                Box::pin(self.decode_json(first)).await
            }
            Value::Object(map) => match (map.get("type"), map.get("data")) {
                (Some(Value::String(kind)), Some(Value::Array(data))) if kind == "Buffer" => {
                    byte_array(data)
                }
                _ => Err(unexpected_shape("object")),
            },
            other => Err(unexpected_shape(json_type_name(&other))),
        }
    }
}

fn byte_array(items: &[Value]) -> Result<ImageData, GenerationError> {
    let bytes = items
        .iter()
        .map(|v| v.as_u64().and_then(|b| u8::try_from(b).ok()))
        .collect::<Option<Vec<u8>>>()
        .ok_or_else(|| unexpected_shape("array with non-byte values"))?;
    Ok(ImageData::png(bytes))
}

fn unexpected_shape(shape: &str) -> GenerationError {
    GenerationError::with_category(
        ErrorCategory::Unknown,
        format!("Failed to convert image result: unexpected result type {}", shape),
    )
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

pub(crate) fn content_type(headers: &reqwest::header::HeaderMap) -> Option<String> {
    headers
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.split(';').next().unwrap_or(v).trim().to_string())
        .filter(|v| !v.is_empty())
}
