//! Authenticated client for the bridge admin API

use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

use crate::error::AdminError;
use crate::models::{ClientList, StatusResponse, STATUS_OK};

/// Operations against the remote control plane that owns client records
#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// Register a client with default options (connections allowed,
    /// compression on, encryption off)
    async fn add_client(&self, verify_key: &str) -> Result<(), AdminError>;

    /// List client records matching `search`; an empty search returns the
    /// first page and the shared bridge port
    async fn list_clients(&self, search: &str) -> Result<ClientList, AdminError>;

    async fn delete_client(&self, id: i64) -> Result<(), AdminError>;

    /// Resolve the numeric id of the client registered with `verify_key`
    async fn client_id_by_verify_key(&self, verify_key: &str) -> Result<i64, AdminError> {
        let list = self.list_clients(verify_key).await?;
        list.find_id(verify_key)
            .ok_or_else(|| AdminError::NotFound(verify_key.to_string()))
    }

    /// Port the bridge server accepts agent connections on
    async fn bridge_port(&self) -> Result<u16, AdminError> {
        let list = self.list_clients("").await?;
        list.bridge_port
            .ok_or_else(|| AdminError::InvalidResponse("missing bridgePort".to_string()))
    }
}

/// `auth_key` form value for a unix timestamp
pub fn auth_key(timestamp: i64) -> String {
    format!("{:x}", md5::compute(timestamp.to_string()))
}

/// HTTP client for `http://{addr}/client/*`
#[derive(Debug, Clone)]
pub struct AdminClient {
    addr: String,
    http: reqwest::Client,
}

impl AdminClient {
    /// Default request timeout
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

    /// Create a client for the admin API at `addr` (host:port)
    pub fn new(addr: impl Into<String>) -> Result<Self, AdminError> {
        Self::with_timeout(addr, Self::DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(addr: impl Into<String>, timeout: Duration) -> Result<Self, AdminError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            addr: addr.into(),
            http,
        })
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    fn endpoint(&self, op: &str) -> String {
        format!("http://{}/client/{}", self.addr, op)
    }

    /// POST a form to `/client/{op}` with the auth fields appended
    async fn post_form(
        &self,
        op: &str,
        mut fields: Vec<(&'static str, String)>,
    ) -> Result<String, AdminError> {
        let timestamp = chrono::Utc::now().timestamp();
        fields.push(("auth_key", auth_key(timestamp)));
        fields.push(("timestamp", timestamp.to_string()));

        let url = self.endpoint(op);
        debug!("POST {}", url);

        let response = self.http.post(&url).form(&fields).send().await?;
        let status = response.status();
        let body = response.text().await?;

        debug!("POST {} -> {} ({} bytes)", url, status, body.len());
        Ok(body)
    }
}

fn check_status(body: &str) -> Result<(), AdminError> {
    let response: StatusResponse =
        serde_json::from_str(body).map_err(|e| AdminError::InvalidResponse(e.to_string()))?;

    if response.status == Some(STATUS_OK) {
        return Ok(());
    }

    Err(AdminError::from_message(response.msg.unwrap_or_else(
        || format!("request failed with status {:?}", response.status),
    )))
}

#[async_trait]
impl ControlPlane for AdminClient {
    async fn add_client(&self, verify_key: &str) -> Result<(), AdminError> {
        let body = self
            .post_form(
                "add",
                vec![
                    ("remark", String::new()),
                    ("u", String::new()),
                    ("p", String::new()),
                    ("vkey", verify_key.to_string()),
                    ("config_conn_allow", "1".to_string()),
                    ("compress", "1".to_string()),
                    ("crypt", "0".to_string()),
                ],
            )
            .await?;

        check_status(&body)
    }

    async fn list_clients(&self, search: &str) -> Result<ClientList, AdminError> {
        let body = self
            .post_form(
                "list",
                vec![
                    ("search", search.to_string()),
                    ("order", "asc".to_string()),
                    ("offset", "0".to_string()),
                    ("limit", "10".to_string()),
                ],
            )
            .await?;

        let list: ClientList =
            serde_json::from_str(&body).map_err(|e| AdminError::InvalidResponse(e.to_string()))?;

        match list.status {
            None | Some(STATUS_OK) => Ok(list),
            Some(status) => Err(AdminError::from_message(
                list.msg
                    .unwrap_or_else(|| format!("request failed with status {}", status)),
            )),
        }
    }

    async fn delete_client(&self, id: i64) -> Result<(), AdminError> {
        let body = self.post_form("del", vec![("id", id.to_string())]).await?;
        check_status(&body)
    }
}
