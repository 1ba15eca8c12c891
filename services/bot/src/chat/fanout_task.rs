//! services/bot/src/chat/fanout_task.rs
//!
//! Copies a finished artifact to every configured dump destination. Deliveries run
//! concurrently, each failure stays with its destination, and nothing is retried.

use futures::future::join_all;
use renamer_core::domain::DumpDestination;
use renamer_core::ports::{Artifact, ChatTransport};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FanoutReport {
    pub delivered: usize,
    pub failed: usize,
}

pub async fn forward(
    transport: &dyn ChatTransport,
    artifact: &Artifact,
    destinations: &[DumpDestination],
) -> FanoutReport {
    if destinations.is_empty() {
        return FanoutReport::default();
    }

    let deliveries = destinations.iter().map(|destination| async move {
        match transport.send_to_destination(destination.chat_id, artifact).await {
            Ok(()) => true,
            Err(e) => {
                warn!(
                    destination = destination.chat_id,
                    "Dump delivery to '{}' failed: {}", destination.title, e
                );
                false
            }
        }
    });
    let outcomes = join_all(deliveries).await;

    let delivered = outcomes.iter().filter(|ok| **ok).count();
    let report = FanoutReport {
        delivered,
        failed: outcomes.len() - delivered,
    };
    info!(
        "Forwarded '{}' to {}/{} dump destinations",
        artifact.file_name,
        report.delivered,
        destinations.len()
    );
    report
}
