//! Writes finished panels to disk.

use crate::generation::{GenerationResult, PanelResult};
use crate::image::ImageData;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Writes each completed panel to `<root>/<generation id>/panel-<n>.<ext>`
/// and points its url at the written file.
#[derive(Debug, Clone)]
pub struct PanelWriter {
    root: PathBuf,
}

impl PanelWriter {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn generation_dir(&self, generation_id: &str) -> PathBuf {
        self.root.join(generation_id)
    }

    /// Returns the number of panels written. A panel that cannot be
    /// written keeps its in-memory url.
    pub async fn write_all(&self, result: &mut GenerationResult) -> usize {
        let dir = self.generation_dir(&result.generation_id);
        if let Err(err) = tokio::fs::create_dir_all(&dir).await {
            warn!(dir = %dir.display(), error = %err, "Failed to create panel output directory");
            return 0;
        }
        let mut written = 0;
        for panel in result.panels.iter_mut() {
            match write_panel(&dir, panel).await {
                Ok(true) => written += 1,
                Ok(false) => {}
                Err(err) => warn!(
                    panel = panel.number,
                    error = %err,
                    "Failed to write panel; keeping inline image"
                ),
            }
        }
        written
    }
}

async fn write_panel(dir: &Path, panel: &mut PanelResult) -> Result<bool, String> {
    let Some(url) = panel.url.as_deref() else {
        return Ok(false);
    };
    if !url.starts_with("data:") {
        debug!(panel = panel.number, "Panel url is not inline; skipping write");
        return Ok(false);
    }
    let image = ImageData::from_data_url(url).map_err(|e| e.message)?;
    let path = dir.join(format!("panel-{}.{}", panel.number, image.extension()));
    tokio::fs::write(&path, &image.bytes)
        .await
        .map_err(|e| format!("{}: {}", path.display(), e))?;
    panel.url = Some(format!("file://{}", path.display()));
    panel.file_path = Some(path);
    Ok(true)
}
