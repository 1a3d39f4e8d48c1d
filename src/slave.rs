//! Backend ("slave") contract.
//!
//! The gateway never touches the backend process directly; an injected
//! factory creates one slave per admitted session and the bridge owns
//! the byte stream between it and the transport.

use std::collections::HashMap;

use axum::http::HeaderMap;
use serde_json::{Map, Value};
use thiserror::Error;

/// Multi-valued request parameters passed to the slave factory, merged
/// from the init message arguments and the HTTP query string.
pub type Params = HashMap<String, Vec<String>>;

/// A backend could not be created.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct FactoryError(pub String);

/// A running backend a session's terminal is bridged to.
///
/// Dropping the slave releases the backend.
pub trait Slave: Send {
    /// Variables this backend contributes to the window title, highest
    /// precedence in the merge.
    fn window_title_variables(&self) -> Map<String, Value>;
}

/// Creates one backend per admitted session.
pub trait SlaveFactory: Send + Sync {
    /// Display name used in close-reason logging when the backend ends
    /// the session.
    fn name(&self) -> &str;

    /// Create a backend for one session. `headers` carries the original
    /// HTTP request headers only when header passing is enabled.
    fn create(
        &self,
        params: &Params,
        headers: Option<&HeaderMap>,
    ) -> Result<Box<dyn Slave>, FactoryError>;
}
