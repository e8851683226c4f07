//! Progress handler trait and events

use crate::pipeline::Stage;
use std::time::Duration;

/// Events emitted while the fleet is processed
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    /// Run started
    RunStarted { services: usize },

    /// A service was taken off the queue
    ServiceStarted { service: String },

    /// A service was not processed at all
    ServiceSkipped { service: String, reason: String },

    StageStarted { service: String, stage: Stage },

    StageComplete {
        service: String,
        stage: Stage,
        duration: Duration,
    },

    /// A service reached its terminal success state
    ServiceComplete { service: String, duration: Duration },

    /// A service failed; siblings continue
    ServiceFailed {
        service: String,
        stage: Stage,
        error: String,
    },

    /// Every dispatched service has finished
    RunComplete {
        processed: usize,
        failed: usize,
        total_time: Duration,
    },
}

/// Trait for handling progress events during a run
pub trait ProgressHandler: Send + Sync {
    /// Called when a progress event occurs
    fn on_progress(&self, event: &ProgressEvent);
}

/// No-op handler that ignores all events
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpHandler;

impl ProgressHandler for NoOpHandler {
    fn on_progress(&self, _event: &ProgressEvent) {}
}
