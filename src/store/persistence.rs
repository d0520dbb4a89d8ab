use super::{GenerationRecord, GenerationStore};
use crate::error::StorageError;
use crate::generation::PanelResult;
use parking_lot::Mutex;
use std::fs;
use std::path::{Path, PathBuf};

/// One pretty-printed JSON file per generation under a directory.
pub struct JsonDirStore {
    dir: PathBuf,
    // Serializes read-modify-write updates from concurrent runs.
    write_lock: Mutex<()>,
}

impl JsonDirStore {
    /// Open or create a store rooted at `path`.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let dir = path.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            write_lock: Mutex::new(()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn record_path(&self, id: &str) -> Result<PathBuf, StorageError> {
        let valid = !id.is_empty()
            && id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(StorageError::InvalidData(format!(
                "generation id {:?} is not a valid file name",
                id
            )));
        }
        Ok(self.dir.join(format!("{}.json", id)))
    }

    fn write(&self, record: &GenerationRecord) -> Result<(), StorageError> {
        let path = self.record_path(&record.id)?;
        let body = serde_json::to_vec_pretty(record).map_err(|e| {
            StorageError::InvalidData(format!("Failed to serialize generation record: {}", e))
        })?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, body)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn update<F>(&self, id: &str, apply: F) -> Result<(), StorageError>
    where
        F: FnOnce(&mut GenerationRecord),
    {
        let _guard = self.write_lock.lock();
        let mut record = self
            .get(id)?
            .ok_or_else(|| StorageError::NotFound(id.to_string()))?;
        apply(&mut record);
        self.write(&record)
    }

    /// All stored records, newest first.
    pub fn list_all(&self) -> Result<Vec<GenerationRecord>, StorageError> {
        let mut records = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            records.push(read_record(&path)?);
        }
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(records)
    }
}

fn read_record(path: &Path) -> Result<GenerationRecord, StorageError> {
    let body = fs::read(path)?;
    serde_json::from_slice(&body).map_err(|e| {
        StorageError::InvalidData(format!(
            "Failed to deserialize generation record {}: {}",
            path.display(),
            e
        ))
    })
}

impl GenerationStore for JsonDirStore {
    fn record_started(&self, record: &GenerationRecord) -> Result<(), StorageError> {
        let _guard = self.write_lock.lock();
        self.write(record)
    }

    fn record_completed(&self, id: &str, panels: &[PanelResult]) -> Result<(), StorageError> {
        self.update(id, |record| record.complete(panels))
    }

    fn record_failed(&self, id: &str, error: &str) -> Result<(), StorageError> {
        self.update(id, |record| record.fail(error))
    }

    fn get(&self, id: &str) -> Result<Option<GenerationRecord>, StorageError> {
        let path = self.record_path(id)?;
        if !path.exists() {
            return Ok(None);
        }
        read_record(&path).map(Some)
    }
}
