//! Shared stop and pause signals for every transfer of a run.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::info;

struct ControlInner {
    stop: Mutex<CancellationToken>,
    paused: watch::Sender<bool>,
}

/// Cloneable handle over the stop token and the pause flag
#[derive(Clone)]
pub struct TransferControl {
    inner: Arc<ControlInner>,
}

impl Default for TransferControl {
    fn default() -> Self {
        Self::new()
    }
}

impl TransferControl {
    pub fn new() -> Self {
        let (paused, _) = watch::channel(false);
        Self {
            inner: Arc::new(ControlInner {
                stop: Mutex::new(CancellationToken::new()),
                paused,
            }),
        }
    }

    /// Token for a new run. A token spent by an earlier cancel is replaced.
    pub fn begin_run(&self) -> CancellationToken {
        let mut stop = self.inner.stop.lock();
        if stop.is_cancelled() {
            *stop = CancellationToken::new();
        }
        stop.clone()
    }

    /// Stop every transfer of the current run. Also lifts a pause so paused
    /// transfers can observe the stop.
    pub fn cancel(&self) {
        self.inner.stop.lock().cancel();
        self.inner.paused.send_replace(false);
        info!("Cancellation requested");
    }

    pub fn pause(&self) {
        self.inner.paused.send_replace(true);
        info!("Downloads paused");
    }

    pub fn resume(&self) {
        self.inner.paused.send_replace(false);
        info!("Downloads resumed");
    }

    /// Flip the pause flag and return true when now paused.
    pub fn toggle_pause(&self) -> bool {
        if self.is_paused() {
            self.resume();
            false
        } else {
            self.pause();
            true
        }
    }

    pub fn is_paused(&self) -> bool {
        *self.inner.paused.borrow()
    }

    /// Wait while paused. Returns false if `token` was cancelled first.
    pub async fn wait_if_paused(&self, token: &CancellationToken) -> bool {
        let mut rx = self.inner.paused.subscribe();
        loop {
            if token.is_cancelled() {
                return false;
            }
            if !*rx.borrow_and_update() {
                return true;
            }
            tokio::select! {
                _ = token.cancelled() => return false,
                changed = rx.changed() => {
                    if changed.is_err() {
                        return true;
                    }
                }
            }
        }
    }
}
