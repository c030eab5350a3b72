//! Cooperative stop signal shared by every loop

use std::time::Duration;
use tokio::sync::watch;

/// Sender half; triggering is idempotent
pub struct ShutdownTrigger {
    tx: watch::Sender<bool>,
}

/// Receiver half cloned into each loop
#[derive(Clone)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
}

pub fn channel() -> (ShutdownTrigger, Shutdown) {
    let (tx, rx) = watch::channel(false);
    (ShutdownTrigger { tx }, Shutdown { rx })
}

impl ShutdownTrigger {
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }
}

impl Shutdown {
    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Sleep for `duration` or until stopped; returns true when stopped
    pub async fn sleep(&mut self, duration: Duration) -> bool {
        if self.is_triggered() {
            return true;
        }
        let stopped = tokio::select! {
            _ = tokio::time::sleep(duration) => false,
            // A dropped trigger counts as a stop
            _ = self.rx.wait_for(|stop| *stop) => true,
        };
        stopped || self.is_triggered()
    }
}
