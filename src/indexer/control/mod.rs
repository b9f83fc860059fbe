
use std::sync::Arc;

use tokio::sync::watch;
use tracing::info;

/// Requested state of the active indexing run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunSignal {
    Running,
    Paused,
    Cancelled,
}

/// Pause, resume and cancel handle for an indexing run.
///
/// Clones share the same signal. The batch loop checks it before every batch
/// and, while paused, sleeps on the channel until the signal changes.
#[derive(Debug, Clone)]
pub struct IndexingControl {
    sender: Arc<watch::Sender<RunSignal>>,
}

impl Default for IndexingControl {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl IndexingControl {
    #[inline]
    pub fn new() -> Self {
        let (sender, _) = watch::channel(RunSignal::Running);
        Self {
            sender: Arc::new(sender),
        }
    }

    #[inline]
    pub fn signal(&self) -> RunSignal {
        *self.sender.borrow()
    }

    #[inline]
    pub fn is_paused(&self) -> bool {
        self.signal() == RunSignal::Paused
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.signal() == RunSignal::Cancelled
    }

    /// Only a running run can be paused
    #[inline]
    pub fn pause(&self) {
        if self.transition(RunSignal::Running, RunSignal::Paused) {
            info!("Indexing paused");
        }
    }

    #[inline]
    pub fn resume(&self) {
        if self.transition(RunSignal::Paused, RunSignal::Running) {
            info!("Indexing resumed");
        }
    }

    #[inline]
    pub fn cancel(&self) {
        let changed = self.sender.send_if_modified(|signal| {
            let was_cancelled = *signal == RunSignal::Cancelled;
            *signal = RunSignal::Cancelled;
            !was_cancelled
        });
        if changed {
            info!("Indexing cancelled");
        }
    }

    /// Back to `Running`, at the start of a new run
    #[inline]
    pub fn reset(&self) {
        self.sender.send_replace(RunSignal::Running);
    }

    /// Suspend while paused. Returns the signal that ended the wait.
    #[inline]
    pub async fn wait_while_paused(&self) -> RunSignal {
        let mut receiver = self.sender.subscribe();
        loop {
            let signal = *receiver.borrow_and_update();
            if signal != RunSignal::Paused {
                return signal;
            }
            if receiver.changed().await.is_err() {
                return RunSignal::Cancelled;
            }
        }
    }

    fn transition(&self, from: RunSignal, to: RunSignal) -> bool {
        self.sender.send_if_modified(|signal| {
            if *signal == from {
                *signal = to;
                true
            } else {
                false
            }
        })
    }
}
