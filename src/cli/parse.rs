//! CLI parse: clap types for storyboard. No behavior; definitions only.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Storyboard CLI - generate storyboard panels from a reference image
#[derive(Parser)]
#[command(name = "storyboard")]
#[command(about = "Generate storyboard panels from a reference image and a panel prompt")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Workspace root directory (searched for storyboard.toml)
    #[arg(long, default_value = ".")]
    pub workspace: PathBuf,

    /// Configuration file path (replaces <workspace>/storyboard.toml)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(long, short = 'v')]
    pub verbose: bool,

    /// Log level (trace, debug, info, warn, error, off)
    #[arg(long)]
    pub log_level: Option<String>,

    /// Log format (json, text)
    #[arg(long)]
    pub log_format: Option<String>,

    /// Log output (stdout, stderr, file)
    #[arg(long)]
    pub log_output: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Generate a storyboard
    Generate {
        /// Reference image: a file path, an http(s) URL or a data URL
        #[arg(long)]
        image: String,
        /// Panel prompt text ("1. ...\n2. ...")
        #[arg(long, conflicts_with = "prompt_file", required_unless_present = "prompt_file")]
        prompt: Option<String>,
        /// Read the panel prompt from a file
        #[arg(long)]
        prompt_file: Option<PathBuf>,
        /// Provider key (openai, gemini, replicate, huggingface, modal, automatic1111, comfyui)
        #[arg(long)]
        provider: Option<String>,
        /// Generation settings as a JSON object
        #[arg(long)]
        settings: Option<String>,
        /// Panels to generate when the prompt has no numbered lines
        #[arg(long)]
        panel_count: Option<usize>,
        /// Attempts per panel
        #[arg(long)]
        max_retries: Option<u32>,
        /// Model identifier override
        #[arg(long)]
        model: Option<String>,
        /// Output directory for panel images (defaults to storage.output_dir)
        #[arg(long)]
        out: Option<PathBuf>,
        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print the panel descriptions parsed from a prompt
    Segment {
        #[arg(long, conflicts_with = "prompt_file", required_unless_present = "prompt_file")]
        prompt: Option<String>,
        #[arg(long)]
        prompt_file: Option<PathBuf>,
        /// Print as a JSON array
        #[arg(long)]
        json: bool,
    },
    /// List supported providers
    Providers {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print the effective configuration as TOML (API keys redacted)
    Config,
}
