//! Storyboard: multi-provider storyboard panel generation
//!
//! Turns a reference image and a numbered panel prompt into an ordered set
//! of generated panels. The [`generation::GenerationCoordinator`] drives one
//! of several interchangeable image back ends, retries failed panels with
//! backoff, and streams progress snapshots to a caller-supplied sink.

pub mod classify;
pub mod cli;
pub mod config;
pub mod error;
pub mod generation;
pub mod image;
pub mod logging;
pub mod persist;
pub mod progress;
pub mod prompt;
pub mod provider;
pub mod retry;
pub mod settings;
pub mod store;
