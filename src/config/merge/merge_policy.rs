//! Merge rules: built-in defaults below every other source.

use config::Config;
use config::ConfigBuilder;
use config::ConfigError;

/// Create a Config builder with merge policy defaults applied.
pub fn builder_with_defaults() -> Result<ConfigBuilder<config::builder::DefaultState>, ConfigError>
{
    Config::builder()
        .set_default("logging.level", "info")?
        .set_default("logging.format", "text")?
        .set_default("logging.output", "stderr")?
        .set_default("generation.panel_count", 20)?
        .set_default("generation.max_retries", 3)?
        .set_default("generation.batch_size", 10)?
        .set_default("generation.inter_panel_delay_ms", 1000)?
        .set_default("retry.base_delay_ms", 1000)?
        .set_default("retry.multiplier", 2.0)?
        .set_default("retry.max_delay_ms", 30_000)?
        .set_default("retry.jitter_ratio", 0.3)
}
