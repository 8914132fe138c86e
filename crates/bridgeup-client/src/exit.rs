//! Lifecycle exit signal
//!
//! One `ExitHandle` owned by the lifecycle manager; any number of
//! `ExitSignal` listeners held by background runners.

use std::sync::Arc;
use tokio::sync::watch;

/// Trigger side of the exit signal
#[derive(Debug, Clone)]
pub struct ExitHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl ExitHandle {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Signal every listener; idempotent
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> ExitSignal {
        ExitSignal {
            rx: self.tx.subscribe(),
        }
    }
}

impl Default for ExitHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Listener side of the exit signal
#[derive(Debug, Clone)]
pub struct ExitSignal {
    rx: watch::Receiver<bool>,
}

impl ExitSignal {
    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once the exit signal has been triggered.
    ///
    /// Never resolves if the handle is dropped without triggering.
    pub async fn triggered(&mut self) {
        while !*self.rx.borrow_and_update() {
            if self.rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}
