//! crates/renamer_core/src/progress.rs
//!
//! One-way progress notifications. Emitting never fails and never blocks: if nobody
//! is listening any more the event is dropped.

use tokio::sync::mpsc;

/// Fire-and-forget sender half of a progress channel.
#[derive(Debug)]
pub struct EventSink<T> {
    tx: Option<mpsc::UnboundedSender<T>>,
}

impl<T> Clone for EventSink<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<T> EventSink<T> {
    /// A sink together with the receiver that observes it.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<T>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    /// A sink that drops everything.
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    pub fn emit(&self, event: T) {
        if let Some(tx) = &self.tx {
            // A closed receiver only means nobody is watching.
            let _ = tx.send(event);
        }
    }
}

/// Stages of a file job, in the order they run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStage {
    Downloading,
    Inspecting,
    Composing,
    Renaming,
    Tagging,
    Recording,
}

impl JobStage {
    pub fn label(&self) -> &'static str {
        match self {
            JobStage::Downloading => "Downloading",
            JobStage::Inspecting => "Reading metadata",
            JobStage::Composing => "Generating name",
            JobStage::Renaming => "Renaming",
            JobStage::Tagging => "Writing metadata",
            JobStage::Recording => "Saving",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobEvent {
    Stage(JobStage),
    Download { percent: u8 },
}

pub type ProgressSink = EventSink<JobEvent>;

/// Turns byte counts into download events, one per 5 % step.
#[derive(Debug)]
pub struct DownloadMeter {
    total: u64,
    received: u64,
    last_reported: Option<u8>,
}

impl DownloadMeter {
    pub const STEP: u8 = 5;

    pub fn new(total: u64) -> Self {
        Self {
            total,
            received: 0,
            last_reported: None,
        }
    }

    pub fn received(&self) -> u64 {
        self.received
    }

    /// Records `bytes` more and emits when a new step boundary was crossed.
    pub fn advance(&mut self, bytes: u64, sink: &ProgressSink) {
        self.received += bytes;
        if self.total == 0 {
            return;
        }
        let percent = ((self.received.saturating_mul(100)) / self.total).min(100) as u8;
        let step = percent - percent % Self::STEP;
        if self.last_reported.map_or(true, |last| step > last) {
            self.last_reported = Some(step);
            sink.emit(JobEvent::Download { percent: step });
        }
    }
}

/// Cumulative counts reported while a broadcast runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BroadcastProgress {
    pub attempted: usize,
    pub total: usize,
    pub success_count: usize,
    pub failure_count: usize,
}
