//! Background task with a panic boundary
//!
//! A panic inside the runner is caught at the task boundary, logged with its
//! message and a backtrace, and reported as `TaskOutcome::Panicked`. The
//! process keeps running.

use futures::FutureExt;
use std::any::Any;
use std::backtrace::Backtrace;
use std::cell::RefCell;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Once;
use tokio::task::JoinHandle;
use tracing::{error, info};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Completed,
    Panicked(String),
    Cancelled,
}

thread_local! {
    static LAST_BACKTRACE: RefCell<Option<String>> = const { RefCell::new(None) };
}

static PANIC_HOOK: Once = Once::new();

/// Record a backtrace for every panic before the previous hook runs
fn install_panic_hook() {
    PANIC_HOOK.call_once(|| {
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            let backtrace = Backtrace::force_capture().to_string();
            LAST_BACKTRACE.with(|slot| *slot.borrow_mut() = Some(backtrace));
            previous(info);
        }));
    });
}

fn take_backtrace() -> String {
    LAST_BACKTRACE
        .with(|slot| slot.borrow_mut().take())
        .unwrap_or_else(|| "<no backtrace captured>".to_string())
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Handle to a spawned runner
#[derive(Debug)]
pub struct SupervisedTask {
    name: String,
    handle: Option<JoinHandle<TaskOutcome>>,
    outcome: Option<TaskOutcome>,
}

impl SupervisedTask {
    pub fn spawn<F>(name: impl Into<String>, future: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        install_panic_hook();

        let name = name.into();
        let task_name = name.clone();
        let handle = tokio::spawn(async move {
            match AssertUnwindSafe(future).catch_unwind().await {
                Ok(()) => {
                    info!("Task {} finished", task_name);
                    TaskOutcome::Completed
                }
                Err(payload) => {
                    let message = panic_message(payload.as_ref());
                    error!(
                        "Task {} panicked: {}\n{}",
                        task_name,
                        message,
                        take_backtrace()
                    );
                    TaskOutcome::Panicked(message)
                }
            }
        });

        Self {
            name,
            handle: Some(handle),
            outcome: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_finished(&self) -> bool {
        match &self.handle {
            Some(handle) => handle.is_finished(),
            None => true,
        }
    }

    /// Wait for the task to end. Cancel safe; repeat calls return the same
    /// outcome.
    pub async fn join(&mut self) -> TaskOutcome {
        if let Some(outcome) = &self.outcome {
            return outcome.clone();
        }

        let outcome = match self.handle.as_mut() {
            Some(handle) => match handle.await {
                Ok(outcome) => outcome,
                Err(e) if e.is_cancelled() => TaskOutcome::Cancelled,
                Err(e) => TaskOutcome::Panicked(e.to_string()),
            },
            None => TaskOutcome::Cancelled,
        };

        self.handle = None;
        self.outcome = Some(outcome.clone());
        outcome
    }

    pub fn abort(&self) {
        if let Some(handle) = &self.handle {
            handle.abort();
        }
    }
}
