//! Storyboard CLI Binary
//!
//! Command-line interface for storyboard generation.

use anyhow::Context;
use clap::Parser;
use std::process;
use storyboard::cli::{map_error, Cli, RunContext};
use storyboard::config::StoryboardConfig;
use storyboard::error::AppError;
use storyboard::logging::{init_logging, LoggingConfig};
use tracing::{error, info};

fn main() {
    let cli = Cli::parse();

    let context = match RunContext::new(cli.workspace.clone(), cli.config.clone()) {
        Ok(ctx) => ctx,
        Err(e) => {
            eprintln!("{}", map_error(&e));
            process::exit(1);
        }
    };

    let logging_config = build_logging_config(&cli, context.config());
    if let Err(e) = init_logging(Some(&logging_config)).context("Failed to initialize logging") {
        eprintln!("{:#}", e);
        process::exit(1);
    }

    info!("Storyboard CLI starting");

    match context.execute(&cli.command) {
        Ok(output) => {
            info!("Command completed successfully");
            println!("{}", output);
        }
        Err(e) => {
            report_failure(&e);
            process::exit(1);
        }
    }
}

fn report_failure(e: &AppError) {
    error!("Command failed: {}", e);
    eprintln!("{}", map_error(e));
}

/// Build logging configuration from the loaded config and CLI flags.
/// Precedence: CLI flags override config file override defaults.
fn build_logging_config(cli: &Cli, config: &StoryboardConfig) -> LoggingConfig {
    let mut logging = config.logging.clone();
    if cli.verbose {
        logging.level = "debug".to_string();
    }
    if let Some(ref level) = cli.log_level {
        logging.level = level.clone();
    }
    if let Some(ref format) = cli.log_format {
        logging.format = format.clone();
    }
    if let Some(ref output) = cli.log_output {
        logging.output = output.clone();
    }
    logging
}
