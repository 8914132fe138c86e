//! Bridge client: sessions, reconnection supervision and local servers
pub mod allowlist;
pub mod connector;
pub mod dialer;
pub mod error;
pub mod exit;
pub mod file_runner;
pub mod forwarder;
pub mod local_server;
pub mod proxy;
pub mod register;
pub mod session;
pub mod stun;
pub mod supervisor;

pub use allowlist::AllowedTargets;
pub use connector::{BridgeConnector, SessionConfig, TunnelConnector};
pub use dialer::Dialer;
pub use error::ConnectionError;
pub use exit::{ExitHandle, ExitSignal};
pub use file_runner::ConfigFileRunner;
pub use local_server::{LocalServer, LocalServerSpec};
pub use register::register_local_ip;
pub use session::FramedSession;
pub use stun::{discover_public_addr, StunError, DEFAULT_STUN_SERVER};
pub use supervisor::{ReconnectionSupervisor, DEFAULT_RECONNECT_DELAY};
