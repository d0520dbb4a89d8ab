//! Integration tests for storyboard generation

mod config_layers;
mod coordinator_flow;
mod hosted_providers;
mod local_providers;
