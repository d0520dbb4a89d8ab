//! Progress tracking and reporting.

pub mod sink;
pub mod snapshot;
pub mod tracker;

pub use sink::{ChannelSink, CollectingSink, FnSink, NullSink, ProgressSink, TracingSink};
pub use snapshot::{
    BatchInfo, PanelRecord, PanelStats, PanelStatus, ProgressSnapshot, RetryInfo, SnapshotExtra,
    Stage,
};
pub use tracker::{ProgressTracker, RetryState, ETA_CALCULATING};
