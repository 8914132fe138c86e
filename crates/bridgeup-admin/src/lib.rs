//! Admin control-plane client
//!
//! Registers, lists and deletes agent client records on the bridge's admin
//! API. Every request is a form-encoded POST carrying `auth_key`/`timestamp`.

pub mod client;
pub mod error;
pub mod models;

pub use client::{auth_key, AdminClient, ControlPlane};
pub use error::{AdminError, DUPLICATE_KEY_MESSAGE};
pub use models::{AdminClientRecord, ClientList};
