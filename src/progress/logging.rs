//! Logging-based progress handler

use super::{ProgressEvent, ProgressHandler};
use tracing::{debug, error, info};

/// Handler that logs progress events using tracing
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingHandler;

impl ProgressHandler for LoggingHandler {
    fn on_progress(&self, event: &ProgressEvent) {
        match event {
            ProgressEvent::RunStarted { services } => {
                info!(services, "Processing services");
            }
            ProgressEvent::ServiceStarted { service } => {
                info!(service = %service, "Processing service");
            }
            ProgressEvent::ServiceSkipped { service, reason } => {
                info!(service = %service, reason = %reason, "Skipping service");
            }
            ProgressEvent::StageStarted { service, stage } => {
                debug!(service = %service, stage = %stage, "Starting stage");
            }
            ProgressEvent::StageComplete {
                service,
                stage,
                duration,
            } => {
                debug!(
                    service = %service,
                    stage = %stage,
                    duration_ms = duration.as_millis() as u64,
                    "Stage complete"
                );
            }
            ProgressEvent::ServiceComplete { service, duration } => {
                info!(
                    service = %service,
                    duration_ms = duration.as_millis() as u64,
                    "Finished processing service"
                );
            }
            ProgressEvent::ServiceFailed {
                service,
                stage,
                error,
            } => {
                error!(service = %service, stage = %stage, error = %error, "Service failed");
            }
            ProgressEvent::RunComplete {
                processed,
                failed,
                total_time,
            } => {
                info!(
                    processed,
                    failed,
                    total_time_ms = total_time.as_millis() as u64,
                    "Run complete"
                );
            }
        }
    }
}
