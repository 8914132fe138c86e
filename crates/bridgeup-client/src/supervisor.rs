//! Reconnection supervision
//!
//! A supervised connection is re-established forever with a fixed delay
//! between attempts. There is no backoff and no retry budget. If an exit
//! signal is attached, it is checked before every attempt and raced against
//! the delay; an attempt that is already in flight is never interrupted.

use std::future::Future;
use std::time::Duration;
use tracing::{error, info};

use crate::connector::TunnelConnector;
use crate::error::ConnectionError;
use crate::exit::ExitSignal;

pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Runs a connection attempt in a loop until told to exit
#[derive(Debug, Clone)]
pub struct ReconnectionSupervisor {
    name: String,
    delay: Duration,
    exit: Option<ExitSignal>,
}

impl ReconnectionSupervisor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            delay: DEFAULT_RECONNECT_DELAY,
            exit: None,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_exit_signal(mut self, exit: ExitSignal) -> Self {
        self.exit = Some(exit);
        self
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Call `connect` repeatedly, sleeping `delay` after each attempt.
    ///
    /// Returns only once the exit signal fires; without one it never returns.
    pub async fn supervise<F, Fut>(&self, mut connect: F)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<(), ConnectionError>>,
    {
        let mut exit = self.exit.clone();

        loop {
            if exit.as_ref().is_some_and(ExitSignal::is_triggered) {
                info!("{}: exit requested, stopping reconnection", self.name);
                return;
            }

            match connect().await {
                Ok(()) => info!(
                    "{}: client closed! It will be reconnected in {} seconds",
                    self.name,
                    self.delay.as_secs()
                ),
                Err(e) => error!(
                    "{}: {}. It will be reconnected in {} seconds",
                    self.name,
                    e,
                    self.delay.as_secs()
                ),
            }

            match exit.as_mut() {
                Some(signal) => {
                    tokio::select! {
                        _ = tokio::time::sleep(self.delay) => {}
                        _ = signal.triggered() => {
                            info!("{}: exit requested, stopping reconnection", self.name);
                            return;
                        }
                    }
                }
                None => tokio::time::sleep(self.delay).await,
            }
        }
    }

    /// Supervise a connector's `connect_and_serve`
    pub async fn run<C>(&self, connector: &C)
    where
        C: TunnelConnector + ?Sized,
    {
        self.supervise(|| connector.connect_and_serve()).await
    }
}
