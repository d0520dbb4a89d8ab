//! Generation Record Store
//!
//! Records one entry per generation: inserted when a run starts, updated
//! when it completes or fails. The coordinator only depends on the
//! [`GenerationStore`] trait; the surrounding application picks the backend.

pub mod persistence;

pub use persistence::JsonDirStore;

use crate::error::StorageError;
use crate::generation::PanelResult;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Lifecycle status of a stored generation. Terminal once it leaves
/// `Starting`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationStatus {
    Starting,
    Completed,
    Error,
}

/// Persisted view of one generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationRecord {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt_id: Option<String>,
    pub prompt: String,
    /// Summary of the reference image, never the payload itself.
    pub input_image: String,
    pub settings: serde_json::Value,
    pub status: GenerationStatus,
    #[serde(default)]
    pub output_panels: Vec<PanelResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl GenerationRecord {
    pub fn starting(
        id: impl Into<String>,
        prompt_id: Option<String>,
        prompt: impl Into<String>,
        input_image: impl Into<String>,
        settings: serde_json::Value,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            prompt_id,
            prompt: prompt.into(),
            input_image: input_image.into(),
            settings,
            status: GenerationStatus::Starting,
            output_panels: Vec::new(),
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn complete(&mut self, panels: &[PanelResult]) {
        self.status = GenerationStatus::Completed;
        self.output_panels = panels.to_vec();
        self.updated_at = Utc::now();
    }

    fn fail(&mut self, error: &str) {
        self.status = GenerationStatus::Error;
        self.error = Some(error.to_string());
        self.updated_at = Utc::now();
    }
}

/// Generation store interface
pub trait GenerationStore: Send + Sync {
    fn record_started(&self, record: &GenerationRecord) -> Result<(), StorageError>;
    fn record_completed(&self, id: &str, panels: &[PanelResult]) -> Result<(), StorageError>;
    fn record_failed(&self, id: &str, error: &str) -> Result<(), StorageError>;
    fn get(&self, id: &str) -> Result<Option<GenerationRecord>, StorageError>;
}

/// Process-local store, used by tests and one-shot CLI runs.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    records: RwLock<HashMap<String, GenerationRecord>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

impl GenerationStore for InMemoryStore {
    fn record_started(&self, record: &GenerationRecord) -> Result<(), StorageError> {
        self.records
            .write()
            .insert(record.id.clone(), record.clone());
        Ok(())
    }

    fn record_completed(&self, id: &str, panels: &[PanelResult]) -> Result<(), StorageError> {
        let mut records = self.records.write();
        let record = records
            .get_mut(id)
            .ok_or_else(|| StorageError::NotFound(id.to_string()))?;
        record.complete(panels);
        Ok(())
    }

    fn record_failed(&self, id: &str, error: &str) -> Result<(), StorageError> {
        let mut records = self.records.write();
        let record = records
            .get_mut(id)
            .ok_or_else(|| StorageError::NotFound(id.to_string()))?;
        record.fail(error);
        Ok(())
    }

    fn get(&self, id: &str) -> Result<Option<GenerationRecord>, StorageError> {
        Ok(self.records.read().get(id).cloned())
    }
}
