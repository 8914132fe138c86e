//! Service lifecycle
//!
//! `Stopped --start--> Starting --(spawn)--> Running --stop--> Stopping
//! --(cleanup)--> Stopped`
//!
//! Start spawns the runner and returns. Stop triggers the exit signal, then
//! deregisters the auto-provisioned client if one was registered with
//! delete-on-exit. Deregistration errors are logged and never keep the
//! manager from reaching `Stopped`.

use bridgeup_admin::ControlPlane;
use bridgeup_client::{ExitHandle, ExitSignal};
use std::future::Future;
use std::io::IsTerminal;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::task::{SupervisedTask, TaskOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LifecycleError {
    #[error("Cannot {action} while {state:?}")]
    InvalidTransition {
        action: &'static str,
        state: LifecycleState,
    },
}

/// Where the process is hosted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostEnvironment {
    /// Attached to a terminal
    Interactive,
    /// Run by systemd, launchd or another supervisor
    ServiceManager,
}

impl HostEnvironment {
    pub fn detect() -> Self {
        if std::io::stdin().is_terminal() {
            HostEnvironment::Interactive
        } else {
            HostEnvironment::ServiceManager
        }
    }
}

/// What the caller should do once `stop` returns
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    ExitProcess,
    Return,
}

struct Deregistration {
    control_plane: Arc<dyn ControlPlane>,
    verify_key: String,
}

pub struct ServiceLifecycleManager {
    state: LifecycleState,
    host: HostEnvironment,
    exit: ExitHandle,
    task: Option<SupervisedTask>,
    deregistration: Option<Deregistration>,
}

impl ServiceLifecycleManager {
    pub fn new(host: HostEnvironment) -> Self {
        Self {
            state: LifecycleState::Stopped,
            host,
            exit: ExitHandle::new(),
            task: None,
            deregistration: None,
        }
    }

    /// Delete the client registered under `verify_key` when stopping
    pub fn with_deregistration(
        mut self,
        control_plane: Arc<dyn ControlPlane>,
        verify_key: impl Into<String>,
    ) -> Self {
        self.deregistration = Some(Deregistration {
            control_plane,
            verify_key: verify_key.into(),
        });
        self
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// Exit signal to hand to the runner before `start`
    pub fn exit_signal(&self) -> ExitSignal {
        self.exit.subscribe()
    }

    /// Spawn `runner` in the background and return immediately
    pub fn start<F>(&mut self, runner: F) -> Result<(), LifecycleError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.state != LifecycleState::Stopped {
            return Err(LifecycleError::InvalidTransition {
                action: "start",
                state: self.state,
            });
        }

        self.state = LifecycleState::Starting;
        self.task = Some(SupervisedTask::spawn("bridgeup-runner", runner));
        self.state = LifecycleState::Running;
        info!("Service started");
        Ok(())
    }

    /// Wait until the runner ends on its own; pending forever if none runs
    pub async fn wait(&mut self) -> TaskOutcome {
        match self.task.as_mut() {
            Some(task) => task.join().await,
            None => std::future::pending().await,
        }
    }

    pub async fn stop(&mut self) -> StopOutcome {
        if self.state != LifecycleState::Running {
            warn!("Stop requested while {:?}; nothing to do", self.state);
            return self.outcome();
        }

        self.state = LifecycleState::Stopping;
        self.exit.trigger();
        info!("Stopping...");

        if let Some(deregistration) = &self.deregistration {
            deregister(deregistration).await;
        }

        if let Some(task) = self.task.take() {
            if !task.is_finished() {
                info!("Task {} will end at its next retry boundary", task.name());
            }
        }

        self.state = LifecycleState::Stopped;
        self.outcome()
    }

    fn outcome(&self) -> StopOutcome {
        match self.host {
            HostEnvironment::Interactive => StopOutcome::ExitProcess,
            HostEnvironment::ServiceManager => StopOutcome::Return,
        }
    }
}

async fn deregister(deregistration: &Deregistration) {
    let key = &deregistration.verify_key;
    let admin = &deregistration.control_plane;

    let id = match admin.client_id_by_verify_key(key).await {
        Ok(id) => id,
        Err(e) => {
            error!("Failed to resolve client id for {}: {}", key, e);
            return;
        }
    };

    match admin.delete_client(id).await {
        Ok(()) => info!("Deleted client {} ({})", id, key),
        Err(e) => error!("Failed to delete client {} ({}): {}", id, key, e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bridgeup_admin::{AdminClientRecord, AdminError, ClientList};
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct RecordingAdmin {
        rows: Vec<AdminClientRecord>,
        fail_list: bool,
        deleted: Mutex<Vec<i64>>,
    }

    #[async_trait]
    impl ControlPlane for RecordingAdmin {
        async fn add_client(&self, _verify_key: &str) -> Result<(), AdminError> {
            Ok(())
        }

        async fn list_clients(&self, _search: &str) -> Result<ClientList, AdminError> {
            if self.fail_list {
                return Err(AdminError::InvalidResponse("connection reset".to_string()));
            }
            Ok(ClientList {
                status: Some(1),
                msg: None,
                bridge_port: Some(8024),
                rows: self.rows.clone(),
            })
        }

        async fn delete_client(&self, id: i64) -> Result<(), AdminError> {
            self.deleted.lock().unwrap().push(id);
            Ok(())
        }
    }

    fn record(id: i64, key: &str) -> AdminClientRecord {
        AdminClientRecord {
            id,
            verify_key: key.to_string(),
        }
    }

    #[tokio::test]
    async fn test_start_then_stop() {
        let mut manager = ServiceLifecycleManager::new(HostEnvironment::ServiceManager);
        assert_eq!(manager.state(), LifecycleState::Stopped);

        let mut exit = manager.exit_signal();
        manager
            .start(async move { exit.triggered().await })
            .unwrap();
        assert_eq!(manager.state(), LifecycleState::Running);

        assert_eq!(manager.stop().await, StopOutcome::Return);
        assert_eq!(manager.state(), LifecycleState::Stopped);
    }

    #[tokio::test]
    async fn test_start_twice_is_rejected() {
        let mut manager = ServiceLifecycleManager::new(HostEnvironment::ServiceManager);
        manager.start(async {}).unwrap();

        assert_eq!(
            manager.start(async {}),
            Err(LifecycleError::InvalidTransition {
                action: "start",
                state: LifecycleState::Running,
            })
        );
    }

    #[tokio::test]
    async fn test_stop_deletes_resolved_client_once() {
        let admin = Arc::new(RecordingAdmin {
            rows: vec![record(4, "other"), record(9, "mykey")],
            ..Default::default()
        });
        let mut manager = ServiceLifecycleManager::new(HostEnvironment::ServiceManager)
            .with_deregistration(admin.clone(), "mykey");

        manager.start(async {}).unwrap();
        manager.stop().await;

        assert_eq!(*admin.deleted.lock().unwrap(), vec![9_i64]);
        assert_eq!(manager.state(), LifecycleState::Stopped);
    }

    #[tokio::test]
    async fn test_stop_completes_when_resolution_fails() {
        let admin = Arc::new(RecordingAdmin {
            fail_list: true,
            ..Default::default()
        });
        let mut manager = ServiceLifecycleManager::new(HostEnvironment::Interactive)
            .with_deregistration(admin.clone(), "mykey");

        manager.start(async {}).unwrap();
        assert_eq!(manager.stop().await, StopOutcome::ExitProcess);
        assert!(admin.deleted.lock().unwrap().is_empty());
        assert_eq!(manager.state(), LifecycleState::Stopped);
    }

    #[tokio::test]
    async fn test_stop_completes_when_key_not_found() {
        let admin = Arc::new(RecordingAdmin::default());
        let mut manager = ServiceLifecycleManager::new(HostEnvironment::ServiceManager)
            .with_deregistration(admin.clone(), "mykey");

        manager.start(async {}).unwrap();
        manager.stop().await;
        assert!(admin.deleted.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_no_delete_without_deregistration() {
        let mut manager = ServiceLifecycleManager::new(HostEnvironment::ServiceManager);
        manager.start(async {}).unwrap();
        assert_eq!(manager.stop().await, StopOutcome::Return);
    }

    #[tokio::test]
    async fn test_stop_when_not_running_is_noop() {
        let admin = Arc::new(RecordingAdmin {
            rows: vec![record(9, "mykey")],
            ..Default::default()
        });
        let mut manager = ServiceLifecycleManager::new(HostEnvironment::ServiceManager)
            .with_deregistration(admin.clone(), "mykey");

        manager.stop().await;
        assert!(admin.deleted.lock().unwrap().is_empty());
        assert_eq!(manager.state(), LifecycleState::Stopped);
    }

    #[tokio::test]
    async fn test_runner_panic_is_contained() {
        let mut manager = ServiceLifecycleManager::new(HostEnvironment::ServiceManager);
        manager
            .start(async {
                panic!("runner failure");
            })
            .unwrap();

        let outcome = tokio::time::timeout(Duration::from_secs(5), manager.wait())
            .await
            .unwrap();
        assert_eq!(outcome, TaskOutcome::Panicked("runner failure".to_string()));

        assert_eq!(manager.stop().await, StopOutcome::Return);
        assert_eq!(manager.state(), LifecycleState::Stopped);
    }

    #[tokio::test]
    async fn test_stop_signals_runner() {
        let mut manager = ServiceLifecycleManager::new(HostEnvironment::ServiceManager);
        let mut exit = manager.exit_signal();
        let (done_tx, done_rx) = tokio::sync::oneshot::channel();

        manager
            .start(async move {
                exit.triggered().await;
                let _ = done_tx.send(());
            })
            .unwrap();
        manager.stop().await;

        tokio::time::timeout(Duration::from_secs(5), done_rx)
            .await
            .expect("runner should observe exit")
            .unwrap();
    }
}
