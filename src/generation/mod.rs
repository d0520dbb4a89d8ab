//! Storyboard generation: the coordinator and its request/result types.

pub mod coordinator;
pub mod result;

pub use coordinator::{CoordinatorOptions, GenerationCoordinator};
pub use result::{GenerationMetadata, GenerationRequest, GenerationResult, PanelResult};
