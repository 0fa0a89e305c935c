//! Run-wide cancellation built on a `watch` channel.

use std::sync::Arc;

use tokio::sync::watch;

/// Sending half: flips the run into the cancelled state.
#[derive(Debug, Clone)]
pub struct Canceller {
    tx: Arc<watch::Sender<bool>>,
}

impl Canceller {
    pub fn cancel(&self) {
        // send_replace never fails, even with no receivers left.
        self.tx.send_replace(true);
    }

    pub fn signal(&self) -> CancelSignal {
        CancelSignal {
            rx: self.tx.subscribe(),
        }
    }
}

/// Receiving half, cloned into every task that must stop on cancel.
#[derive(Debug, Clone)]
pub struct CancelSignal {
    rx: watch::Receiver<bool>,
}

impl CancelSignal {
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once the run is cancelled; never resolves otherwise.
    pub async fn cancelled(&mut self) {
        if self.rx.wait_for(|cancelled| *cancelled).await.is_err() {
            // Every Canceller is gone, so cancellation can no longer happen.
            std::future::pending::<()>().await;
        }
    }
}

/// Create a linked cancel pair.
pub fn cancel_pair() -> (Canceller, CancelSignal) {
    let (tx, rx) = watch::channel(false);
    (Canceller { tx: Arc::new(tx) }, CancelSignal { rx })
}
