//! Progress sinks
//!
//! The coordinator writes every snapshot to a [`ProgressSink`]; transport is
//! the sink's business. Sends never block and never fail the generation.

use super::snapshot::ProgressSnapshot;
use parking_lot::Mutex;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tracing::{debug, info};

pub trait ProgressSink: Send + Sync {
    fn send(&self, snapshot: &ProgressSnapshot);
}

/// Discards every snapshot.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl ProgressSink for NullSink {
    fn send(&self, _snapshot: &ProgressSnapshot) {}
}

/// Calls a closure for every snapshot.
pub struct FnSink<F>(F);

impl<F> FnSink<F>
where
    F: Fn(&ProgressSnapshot) + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> ProgressSink for FnSink<F>
where
    F: Fn(&ProgressSnapshot) + Send + Sync,
{
    fn send(&self, snapshot: &ProgressSnapshot) {
        (self.0)(snapshot)
    }
}

/// Forwards snapshots over an unbounded tokio channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    sender: UnboundedSender<ProgressSnapshot>,
}

impl ChannelSink {
    pub fn new_pair() -> (Self, UnboundedReceiver<ProgressSnapshot>) {
        let (sender, receiver) = unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl ProgressSink for ChannelSink {
    fn send(&self, snapshot: &ProgressSnapshot) {
        if self.sender.send(snapshot.clone()).is_err() {
            debug!(stage = %snapshot.stage, "Progress receiver dropped");
        }
    }
}

/// Logs each snapshot as a structured `tracing` event.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl ProgressSink for TracingSink {
    fn send(&self, snapshot: &ProgressSnapshot) {
        info!(
            generation_id = %snapshot.generation_id,
            stage = %snapshot.stage,
            progress = snapshot.progress,
            panel = snapshot.current_panel,
            total = snapshot.total_panels,
            completed = snapshot.stats.completed,
            failed = snapshot.stats.error,
            eta = %snapshot.eta,
            "{}",
            snapshot.message
        );
    }
}

/// Keeps every snapshot in memory.
#[derive(Debug, Default)]
pub struct CollectingSink {
    snapshots: Mutex<Vec<ProgressSnapshot>>,
}

impl CollectingSink {
    pub fn snapshots(&self) -> Vec<ProgressSnapshot> {
        self.snapshots.lock().clone()
    }
}

impl ProgressSink for CollectingSink {
    fn send(&self, snapshot: &ProgressSnapshot) {
        self.snapshots.lock().push(snapshot.clone());
    }
}
