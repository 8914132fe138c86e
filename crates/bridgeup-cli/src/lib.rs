//! Bridgeup agent: bootstrap selection, provisioning and service lifecycle
pub mod bootstrap;
pub mod cli;
pub mod config;
pub mod diagnostics;
pub mod lifecycle;
pub mod logging;
pub mod provision;
pub mod service;
pub mod task;
pub mod update;

/// Version string printed by `--version`
pub fn version_info() -> String {
    format!(
        "bridgeup {}\nCommit: {}\nBuilt: {}\nProtocol: {}",
        env!("GIT_TAG"),
        env!("GIT_HASH"),
        env!("BUILD_TIME"),
        bridgeup_proto::PROTOCOL_VERSION
    )
}
