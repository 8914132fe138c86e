//! Tunnel descriptor parsing
//!
//! A tunnel descriptor is the compact command-line encoding of one or more
//! `server_port->target` mappings, e.g. `8000->127.0.0.1:80, 8001->127.0.0.1:22`.
//! Fields are separated by `,` or the full-width comma `，`.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

/// Separator between the server port and the local target of one field
pub const MAPPING_ARROW: &str = "->";

/// Tunnel descriptor errors
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TunnelSpecError {
    #[error("Malformed tunnel field '{field}': expected 'server_port->target'")]
    Malformed { field: String },
}

/// One `server_port -> target` mapping
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TunnelEntry {
    pub server_port: String,
    pub target: String,
}

impl TunnelEntry {
    pub fn new(server_port: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            server_port: server_port.into(),
            target: target.into(),
        }
    }
}

/// Ordered set of tunnel entries, unique by server port
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TunnelSpec {
    entries: Vec<TunnelEntry>,
}

impl TunnelSpec {
    /// Parse a descriptor string.
    ///
    /// An empty descriptor yields an empty spec. A field without `->`, or with
    /// an empty side, rejects the whole descriptor. When a server port repeats,
    /// the later target replaces the earlier one and a warning is logged.
    pub fn parse(descriptor: &str) -> Result<Self, TunnelSpecError> {
        let mut spec = Self::default();

        for field in descriptor.split([',', '，']) {
            if field.trim().is_empty() {
                continue;
            }

            let (server_port, target) =
                field
                    .split_once(MAPPING_ARROW)
                    .ok_or_else(|| TunnelSpecError::Malformed {
                        field: field.to_string(),
                    })?;

            let server_port = server_port.trim();
            let target = target.trim();
            if server_port.is_empty() || target.is_empty() {
                return Err(TunnelSpecError::Malformed {
                    field: field.to_string(),
                });
            }

            spec.insert(TunnelEntry::new(server_port, target));
        }

        Ok(spec)
    }

    fn insert(&mut self, entry: TunnelEntry) {
        match self
            .entries
            .iter_mut()
            .find(|existing| existing.server_port == entry.server_port)
        {
            Some(existing) => {
                warn!(
                    "Duplicate tunnel server port {}: '{}' replaces '{}'",
                    entry.server_port, entry.target, existing.target
                );
                existing.target = entry.target;
            }
            None => self.entries.push(entry),
        }
    }

    pub fn entries(&self) -> &[TunnelEntry] {
        &self.entries
    }

    /// Target mapped to a server port, if any
    pub fn target_for(&self, server_port: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|e| e.server_port == server_port)
            .map(|e| e.target.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl IntoIterator for TunnelSpec {
    type Item = TunnelEntry;
    type IntoIter = std::vec::IntoIter<TunnelEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}
