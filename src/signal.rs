//! Cooperative stop signal shared by a group of device workers
//!
//! The flag only ever moves from "running" to "stopped". Workers read it at the
//! top of every loop iteration and may also await it while sleeping, so a stop
//! never has to wait out a long tick interval.

use std::sync::Arc;
use tokio::sync::watch;

#[derive(Debug, Clone)]
pub struct StopSignal {
    tx: Arc<watch::Sender<bool>>,
}

impl StopSignal {
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Raises the signal. Raising twice is a no-op.
    pub fn raise(&self) {
        self.tx.send_if_modified(|stopped| {
            if *stopped {
                false
            } else {
                *stopped = true;
                true
            }
        });
    }

    #[must_use]
    pub fn is_raised(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once the signal has been raised
    pub async fn raised(&self) {
        let mut rx = self.tx.subscribe();
        // the sender lives as long as `self`, so this can only end on `true`
        let _ = rx.wait_for(|stopped| *stopped).await;
    }
}

impl Default for StopSignal {
    fn default() -> Self {
        Self::new()
    }
}
