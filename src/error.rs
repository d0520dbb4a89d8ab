//! Error types for storyboard generation.
//!
//! Panel-level and generation-level failures are carried as a single
//! [`GenerationError`] whose category, severity and retry eligibility are
//! fixed at the point of classification. [`AppError`] covers the surrounding
//! application (configuration, I/O, serialization).

use crate::classify::{classify, user_message_for};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Failure taxonomy shared by the classifier, the retry helper and the UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Network,
    Timeout,
    Api,
    File,
    Validation,
    Database,
    Unknown,
}

impl ErrorCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCategory::Network => "network",
            ErrorCategory::Timeout => "timeout",
            ErrorCategory::Api => "api",
            ErrorCategory::File => "file",
            ErrorCategory::Validation => "validation",
            ErrorCategory::Database => "database",
            ErrorCategory::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An unclassified failure as observed at a call site.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawError {
    pub message: String,
    /// HTTP status code, when the failure came from an HTTP response.
    pub status: Option<u16>,
    /// System error code such as `ECONNREFUSED` or `ENOENT`.
    pub code: Option<String>,
}

impl RawError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status: None,
            code: None,
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }
}

/// Result of running a [`RawError`] through the classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    pub category: ErrorCategory,
    pub severity: Severity,
    pub retryable: bool,
}

/// Short title, plain-language message and remediation text for the UI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserMessage {
    pub title: String,
    pub message: String,
    pub recovery: String,
}

/// Serializable failure handed to an external error-presentation layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureReport {
    pub category: ErrorCategory,
    pub severity: Severity,
    pub user_message: UserMessage,
    pub is_final: bool,
    pub error_message: String,
}

/// A classified generation failure.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct GenerationError {
    pub category: ErrorCategory,
    pub severity: Severity,
    pub retryable: bool,
    pub message: String,
    pub status: Option<u16>,
    pub code: Option<String>,
}

impl GenerationError {
    /// Classify a raw failure.
    pub fn from_raw(raw: RawError) -> Self {
        let classification = classify(&raw);
        Self {
            category: classification.category,
            severity: classification.severity,
            retryable: classification.retryable,
            message: raw.message,
            status: raw.status,
            code: raw.code,
        }
    }

    /// Classify a bare message.
    pub fn from_message(message: impl Into<String>) -> Self {
        Self::from_raw(RawError::new(message))
    }

    /// Input rejected before any provider work; never retried.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::with_category(ErrorCategory::Validation, message)
    }

    /// Builds an error with a known category, deriving severity and
    /// retryability the same way the classifier would.
    pub fn with_category(category: ErrorCategory, message: impl Into<String>) -> Self {
        let raw = RawError::new(message);
        let classification = crate::classify::classification_for(category, &raw);
        Self {
            category,
            severity: classification.severity,
            retryable: classification.retryable,
            message: raw.message,
            status: None,
            code: None,
        }
    }

    pub fn timeout(operation: &str, after: std::time::Duration) -> Self {
        let mut err = Self::with_category(
            ErrorCategory::Timeout,
            format!("{} timed out after {}ms", operation, after.as_millis()),
        );
        err.code = Some("TIMEOUT".to_string());
        err
    }

    /// Prefixes the message with provider or operation context while keeping
    /// the classification.
    pub fn context(mut self, prefix: impl fmt::Display) -> Self {
        self.message = format!("{}: {}", prefix, self.message);
        self
    }

    pub fn raw(&self) -> RawError {
        RawError {
            message: self.message.clone(),
            status: self.status,
            code: self.code.clone(),
        }
    }

    pub fn user_message(&self) -> UserMessage {
        user_message_for(self.category, &self.raw())
    }

    pub fn report(&self, is_final: bool) -> FailureReport {
        FailureReport {
            category: self.category,
            severity: self.severity,
            user_message: self.user_message(),
            is_final,
            error_message: self.message.clone(),
        }
    }
}

impl From<reqwest::Error> for GenerationError {
    fn from(error: reqwest::Error) -> Self {
        GenerationError::from_raw(raw_from_reqwest(&error))
    }
}

/// Maps transport failures onto the codes the classifier understands.
pub fn raw_from_reqwest(error: &reqwest::Error) -> RawError {
    if error.is_timeout() {
        RawError::new(format!("Request timed out: {}", error)).with_code("ETIMEDOUT")
    } else if error.is_connect() {
        RawError::new(format!("Network connection refused: {}", error)).with_code("ECONNREFUSED")
    } else if let Some(status) = error.status() {
        RawError::new(format!("Request failed with status {}: {}", status, error))
            .with_status(status.as_u16())
    } else {
        RawError::new(format!("HTTP error: {}", error))
    }
}

/// Generation record storage errors.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Generation not found: {0}")]
    NotFound(String),

    #[error("Invalid generation record: {0}")]
    InvalidData(String),

    #[error("Storage I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl From<StorageError> for GenerationError {
    fn from(err: StorageError) -> Self {
        GenerationError::with_category(ErrorCategory::Database, err.to_string())
    }
}

/// Application-level errors outside the generation core.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Generation(#[from] GenerationError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::ConfigError(err.to_string())
    }
}
