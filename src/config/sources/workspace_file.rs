//! Workspace config file source: ./storyboard.toml

use config::builder::DefaultState;
use config::ConfigBuilder;
use config::ConfigError;
use config::{File, FileFormat};
use std::path::Path;

pub const WORKSPACE_CONFIG_FILE: &str = "storyboard.toml";

/// Add the workspace config file to the builder. Takes precedence over the
/// global file.
pub fn add_to_builder(
    builder: ConfigBuilder<DefaultState>,
    path: &Path,
) -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    if !path.exists() {
        return Ok(builder);
    }
    Ok(builder.add_source(File::from(path).format(FileFormat::Toml).required(false)))
}
