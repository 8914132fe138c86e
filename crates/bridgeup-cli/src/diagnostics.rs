//! Debug HTTP endpoint enabled with `--pprof <addr>`

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum DiagnosticsError {
    #[error("Invalid diagnostics address {0:?} (expected ip:port)")]
    InvalidAddress(String),

    #[error("Failed to bind diagnostics endpoint on {address}: {source}")]
    Bind {
        address: String,
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RuntimeStatus {
    pub version: String,
    pub commit: String,
    pub protocol: u32,
    pub pid: u32,
    pub uptime_secs: u64,
}

struct DiagnosticsState {
    started: Instant,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("GIT_TAG").to_string(),
    })
}

async fn status(State(state): State<Arc<DiagnosticsState>>) -> Json<RuntimeStatus> {
    Json(RuntimeStatus {
        version: env!("GIT_TAG").to_string(),
        commit: env!("GIT_HASH").to_string(),
        protocol: bridgeup_proto::PROTOCOL_VERSION,
        pid: std::process::id(),
        uptime_secs: state.started.elapsed().as_secs(),
    })
}

pub fn router() -> Router {
    let state = Arc::new(DiagnosticsState {
        started: Instant::now(),
    });
    Router::new()
        .route("/debug/health", get(health))
        .route("/debug/status", get(status))
        .with_state(state)
}

/// Bind `addr` and serve the debug routes in the background
///
/// Returns the bound address (useful with port 0) and the server task.
pub async fn spawn(addr: &str) -> Result<(SocketAddr, JoinHandle<()>), DiagnosticsError> {
    let socket_addr: SocketAddr = addr
        .trim()
        .parse()
        .map_err(|_| DiagnosticsError::InvalidAddress(addr.to_string()))?;
    let listener = TcpListener::bind(socket_addr)
        .await
        .map_err(|source| DiagnosticsError::Bind {
            address: addr.to_string(),
            source,
        })?;
    let bound = listener.local_addr().map_err(|source| DiagnosticsError::Bind {
        address: addr.to_string(),
        source,
    })?;

    info!("Diagnostics endpoint listening on http://{}", bound);
    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router()).await {
            warn!("Diagnostics endpoint stopped: {}", e);
        }
    });
    Ok((bound, handle))
}
