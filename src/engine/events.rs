use std::path::PathBuf;

use tokio::sync::mpsc;

/// Terminal state of one post download
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Newly fetched
    Done(PathBuf),
    /// Destination already existed
    Skipped(PathBuf),
    /// Fetch failed after retries
    Failed(String),
}

/// Progress reported by the dispatcher and the bulk engine
#[derive(Debug, Clone, PartialEq)]
pub enum DownloadEvent {
    PageStarted { page: u32 },
    Jumped { from: u32, to: u32 },
    Progress { post_id: u64, fraction: f64 },
    Finished { post_id: u64, outcome: Outcome },
}

pub type EventSender = mpsc::UnboundedSender<DownloadEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<DownloadEvent>;

pub fn event_channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}

/// Best-effort send; a dropped receiver never fails a download.
pub(crate) fn emit(events: Option<&EventSender>, event: DownloadEvent) {
    if let Some(tx) = events {
        let _ = tx.send(event);
    }
}

/// Aggregate counts for a batch or a whole run
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BatchReport {
    pub done: usize,
    pub skipped: usize,
    pub failed: usize,
    pub cancelled: usize,
}

impl BatchReport {
    pub fn record(&mut self, outcome: Option<&Outcome>) {
        match outcome {
            Some(Outcome::Done(_)) => self.done += 1,
            Some(Outcome::Skipped(_)) => self.skipped += 1,
            Some(Outcome::Failed(_)) => self.failed += 1,
            None => self.cancelled += 1,
        }
    }

    pub fn merge(&mut self, other: BatchReport) {
        self.done += other.done;
        self.skipped += other.skipped;
        self.failed += other.failed;
        self.cancelled += other.cancelled;
    }

    /// Posts that reached a terminal outcome.
    pub fn settled(&self) -> usize {
        self.done + self.skipped + self.failed
    }
}
