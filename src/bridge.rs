//! Bridge contract: the component that streams bytes between the
//! WebSocket transport and the slave once a session is admitted.
//!
//! The gateway only cares about *why* a bridge run ended, so the
//! termination causes are a closed variant set rather than opaque error
//! identities compared across abstraction boundaries.

use std::time::Duration;

use axum::extract::ws::WebSocket;
use futures::future::BoxFuture;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::slave::Slave;

/// Terminal cause of a bridge run.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// The process-wide cancellation context fired.
    #[error("bridge canceled")]
    Canceled,
    /// The client side closed the transport.
    #[error("master closed")]
    MasterClosed,
    /// The backend process ended.
    #[error("slave closed")]
    SlaveClosed,
    /// Transport or internal failure.
    #[error("{0}")]
    Other(String),
}

/// Per-session bridge options derived from server configuration.
#[derive(Debug, Clone, Default)]
pub struct BridgeOptions {
    /// Rendered window title pushed to the client terminal.
    pub window_title: String,
    /// Whether client input is forwarded to the slave.
    pub permit_write: bool,
    /// Reconnect interval advertised to the client, when enabled.
    pub reconnect: Option<Duration>,
    /// Fixed terminal columns, when the server dictates the size.
    pub fixed_columns: Option<u16>,
    /// Fixed terminal rows, when the server dictates the size.
    pub fixed_rows: Option<u16>,
}

/// A live bridge between one transport and one slave.
pub trait Bridge: Send {
    /// Stream until either side closes, an error occurs, or `cancel`
    /// fires. Cancellation must unwind promptly and is reported as
    /// [`BridgeError::Canceled`], equivalent to a forced disconnect.
    fn run<'a>(
        &'a mut self,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<(), BridgeError>>;
}

/// Builds one bridge per admitted session.
pub trait BridgeFactory: Send + Sync {
    fn create(
        &self,
        transport: WebSocket,
        slave: Box<dyn Slave>,
        options: BridgeOptions,
    ) -> Result<Box<dyn Bridge>, BridgeError>;
}
