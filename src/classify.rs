//! Error classification
//!
//! Maps a raw failure (message, optional HTTP status, optional system code)
//! onto a category, a severity and retry eligibility. Category rules are
//! evaluated in order and the first match wins.

use crate::error::{Classification, ErrorCategory, RawError, Severity, UserMessage};

const NETWORK_CODES: &[&str] = &["econnrefused", "enotfound", "econnreset"];
const NETWORK_PHRASES: &[&str] = &[
    "econnrefused",
    "enotfound",
    "econnreset",
    "connection refused",
    "connection reset",
    "host not found",
    "network",
];
const FILE_CODES: &[&str] = &["enoent", "eacces", "eperm"];
const PERMISSION_CODES: &[&str] = &["eacces", "eperm"];

/// Classify a raw failure.
pub fn classify(raw: &RawError) -> Classification {
    classification_for(categorize(raw), raw)
}

/// Severity and retryability for a failure whose category is already known.
pub fn classification_for(category: ErrorCategory, raw: &RawError) -> Classification {
    Classification {
        category,
        severity: severity(category, raw),
        retryable: is_retryable(category, raw),
    }
}

pub fn categorize(raw: &RawError) -> ErrorCategory {
    let message = raw.message.to_lowercase();
    let code = raw.code.as_deref().unwrap_or_default().to_lowercase();

    if NETWORK_CODES.iter().any(|c| code.contains(c))
        || NETWORK_PHRASES.iter().any(|p| message.contains(p))
    {
        return ErrorCategory::Network;
    }

    if message.contains("timeout")
        || message.contains("timed out")
        || code.contains("timeout")
        || code.contains("etimedout")
    {
        return ErrorCategory::Timeout;
    }

    if raw.status.is_some() {
        return ErrorCategory::Api;
    }

    if FILE_CODES.iter().any(|c| code.contains(c))
        || message.contains("file")
        || message.contains("directory")
    {
        return ErrorCategory::File;
    }

    if message.contains("database") || message.contains("sql") {
        return ErrorCategory::Database;
    }

    if message.contains("invalid") || message.contains("required") || message.contains("validation")
    {
        return ErrorCategory::Validation;
    }

    ErrorCategory::Unknown
}

fn has_permission_code(raw: &RawError) -> bool {
    let code = raw.code.as_deref().unwrap_or_default().to_lowercase();
    PERMISSION_CODES.iter().any(|c| code.contains(c))
}

pub fn severity(category: ErrorCategory, raw: &RawError) -> Severity {
    match category {
        ErrorCategory::Network | ErrorCategory::Timeout => Severity::Medium,
        ErrorCategory::Api => match raw.status {
            Some(status) if status >= 500 => Severity::High,
            Some(status) if status >= 400 => Severity::Medium,
            _ => Severity::Low,
        },
        ErrorCategory::Database => Severity::High,
        ErrorCategory::File => {
            if has_permission_code(raw) {
                Severity::High
            } else {
                Severity::Medium
            }
        }
        ErrorCategory::Validation => Severity::Low,
        ErrorCategory::Unknown => Severity::Medium,
    }
}

pub fn is_retryable(category: ErrorCategory, raw: &RawError) -> bool {
    match category {
        ErrorCategory::Network | ErrorCategory::Timeout => true,
        ErrorCategory::Api => matches!(raw.status, Some(s) if s >= 500 || s == 429 || s == 408),
        ErrorCategory::File => {
            let code = raw.code.as_deref().unwrap_or_default().to_lowercase();
            !FILE_CODES.iter().any(|c| code.contains(c))
        }
        ErrorCategory::Database | ErrorCategory::Validation | ErrorCategory::Unknown => false,
    }
}

fn message(title: &str, message: impl Into<String>, recovery: &str) -> UserMessage {
    UserMessage {
        title: title.to_string(),
        message: message.into(),
        recovery: recovery.to_string(),
    }
}

/// Plain-language description of a failure for the error-presentation layer.
pub fn user_message_for(category: ErrorCategory, raw: &RawError) -> UserMessage {
    match category {
        ErrorCategory::Network => message(
            "Network Connection Error",
            "Unable to connect to the server. Please check your internet connection and try again.",
            "Check your internet connection and ensure the server is accessible.",
        ),
        ErrorCategory::Timeout => message(
            "Request Timeout",
            "The request took too long to complete. Please try again.",
            "Try again, and contact support if the issue persists.",
        ),
        ErrorCategory::Api => api_user_message(raw),
        ErrorCategory::File => message(
            "File Operation Error",
            format!("Unable to access file: {}", raw.message),
            "Check file permissions and ensure the file exists.",
        ),
        ErrorCategory::Database => message(
            "Database Error",
            "An error occurred while accessing the database.",
            "Please restart the application. If the issue persists, contact support.",
        ),
        ErrorCategory::Validation => message(
            "Validation Error",
            if raw.message.is_empty() {
                "The provided data is invalid.".to_string()
            } else {
                raw.message.clone()
            },
            "Please check your input and try again.",
        ),
        ErrorCategory::Unknown => message(
            "Unexpected Error",
            "An unexpected error occurred. Please try again.",
            "If the problem persists, please contact support with the error details.",
        ),
    }
}

fn api_user_message(raw: &RawError) -> UserMessage {
    let lower = raw.message.to_lowercase();

    if lower.contains("does not have sufficient permissions")
        || lower.contains("inference providers on behalf of")
    {
        return message(
            "HuggingFace API Permissions Error",
            "Your API key does not have permission to use the Inference API. This is likely because the token was created without \"Inference\" permissions.",
            "1. Go to https://huggingface.co/settings/tokens\n2. Create a new token\n3. Make sure to check \"Inference\" under \"Token permissions\"\n4. Copy the new token and update it in the app settings",
        );
    }

    if lower.contains("no inference provider available") {
        return message(
            "Model Not Available",
            "The selected model is not available on HuggingFace's free Inference API. Some models require a paid subscription or specific provider access.",
            "1. Switch the model to \"stabilityai/stable-diffusion-xl-base-1.0\", which works with the free tier\n2. Or choose a different provider such as Replicate",
        );
    }

    match raw.status {
        Some(401) => message(
            "Authentication Error",
            "Your API key appears to be invalid or expired.",
            "Please check your API keys in settings and try again.",
        ),
        Some(429) => message(
            "Rate Limit Exceeded",
            "Too many requests. Please wait a moment and try again.",
            "Wait a few minutes before making another request.",
        ),
        Some(500) => message(
            "Server Error",
            "The server encountered an error. Please try again.",
            "The issue has been logged. Try again in a few minutes.",
        ),
        status => message(
            "API Error",
            format!(
                "An error occurred while communicating with the API (Status: {}).",
                status.map_or_else(|| "unknown".to_string(), |s| s.to_string())
            ),
            "Please try again. If the problem persists, contact support.",
        ),
    }
}
