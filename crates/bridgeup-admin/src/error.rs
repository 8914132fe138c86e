use thiserror::Error;

/// Message the admin API returns when a verify key is already registered
pub const DUPLICATE_KEY_MESSAGE: &str = "Vkey duplicate, please reset";

/// Admin control-plane errors
#[derive(Debug, Error)]
pub enum AdminError {
    /// The verify key is already registered; callers may continue
    #[error("Client already registered: {0}")]
    DuplicateKey(String),

    #[error("Admin API error: {msg}")]
    Rpc { msg: String },

    #[error("No client found for verify key '{0}'")]
    NotFound(String),

    #[error("Admin API request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid response from admin API: {0}")]
    InvalidResponse(String),
}

impl AdminError {
    /// Map a non-success admin message to its error kind
    pub fn from_message(msg: String) -> Self {
        if msg.contains(DUPLICATE_KEY_MESSAGE) {
            AdminError::DuplicateKey(msg)
        } else {
            AdminError::Rpc { msg }
        }
    }

    pub fn is_duplicate_key(&self) -> bool {
        matches!(self, AdminError::DuplicateKey(_))
    }
}
