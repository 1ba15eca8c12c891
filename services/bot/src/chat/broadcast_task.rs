//! services/bot/src/chat/broadcast_task.rs
//!
//! Sends one admin message to every recipient, one at a time with a fixed pause
//! between sends. A failed recipient is counted and skipped, never retried.

use renamer_core::domain::UserId;
use renamer_core::ports::ChatTransport;
use renamer_core::progress::{BroadcastProgress, EventSink};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub success_count: usize,
    pub failure_count: usize,
}

pub fn broadcast_text(message: &str) -> String {
    format!("📢 Broadcast Message\n\n{message}")
}

pub struct BroadcastDispatcher {
    transport: Arc<dyn ChatTransport>,
    pacing: Duration,
    /// Emit cumulative progress after this many attempts. Zero disables it.
    progress_every: usize,
}

impl BroadcastDispatcher {
    pub fn new(transport: Arc<dyn ChatTransport>, pacing: Duration, progress_every: usize) -> Self {
        Self {
            transport,
            pacing,
            progress_every,
        }
    }

    pub async fn dispatch(
        &self,
        message: &str,
        recipients: &[UserId],
        progress: &EventSink<BroadcastProgress>,
    ) -> BroadcastReport {
        let text = broadcast_text(message);
        let total = recipients.len();
        let mut report = BroadcastReport::default();
        info!("Broadcasting to {} recipients", total);

        for (index, recipient) in recipients.iter().enumerate() {
            if index > 0 && !self.pacing.is_zero() {
                tokio::time::sleep(self.pacing).await;
            }

            match self.transport.send_text(*recipient, &text).await {
                Ok(_) => report.success_count += 1,
                Err(e) => {
                    debug!(user_id = *recipient, "Broadcast delivery failed: {}", e);
                    report.failure_count += 1;
                }
            }

            let attempted = index + 1;
            if self.progress_every > 0 && attempted % self.progress_every == 0 && attempted < total {
                progress.emit(BroadcastProgress {
                    attempted,
                    total,
                    success_count: report.success_count,
                    failure_count: report.failure_count,
                });
            }
        }

        info!(
            "Broadcast finished: {} delivered, {} failed",
            report.success_count, report.failure_count
        );
        report
    }
}
