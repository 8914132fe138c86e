//! Admin API response bodies

use serde::{Deserialize, Serialize};

/// Status value signalling success
pub const STATUS_OK: i64 = 1;

/// Generic `{status, msg}` response
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StatusResponse {
    pub status: Option<i64>,
    #[serde(default)]
    pub msg: Option<String>,
}

/// A client record owned by the remote control plane
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct AdminClientRecord {
    #[serde(rename = "Id")]
    pub id: i64,
    #[serde(rename = "VerifyKey")]
    pub verify_key: String,
}

/// Response of `/client/list`
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClientList {
    #[serde(default)]
    pub status: Option<i64>,
    #[serde(default)]
    pub msg: Option<String>,
    #[serde(rename = "bridgePort", default)]
    pub bridge_port: Option<u16>,
    #[serde(default)]
    pub rows: Vec<AdminClientRecord>,
}

impl ClientList {
    /// Id of the row whose verify key equals `verify_key` exactly
    pub fn find_id(&self, verify_key: &str) -> Option<i64> {
        self.rows
            .iter()
            .find(|row| row.verify_key == verify_key)
            .map(|row| row.id)
    }
}
