//! ttygate - admission-controlled WebSocket terminal gateway.
//!
//! Bridges a single backend process (the "slave") to browser-side
//! terminals over a WebSocket transport. The crate owns session
//! admission (at-most-one active session in prod, unlimited in dev),
//! connection counting with idle shutdown, the handshake protocol, and
//! the HTTP middleware pipeline. The byte-level terminal bridge and the
//! backend factory are injected behind the [`bridge`] and [`slave`]
//! traits; embedders own `main` and pass an [`config::Options`] plus
//! both factories to [`server::Server`].
//!
//! Lifecycle in one paragraph: a request passes the middleware pipeline
//! (logging, server header, optional basic auth, optional
//! query-to-environment injection, health gate), the WebSocket handler
//! resolves the session environment and asks the session gate for a
//! ticket, the counter is incremented, the client authenticates with a
//! single init frame, a slave is created and the bridge runs until it
//! returns. The close reason is then classified: a clean prod
//! termination permanently decommissions the server, on the assumption
//! that its backend is single-use.

pub mod bridge;
pub mod config;
pub mod counter;
pub mod server;
pub mod slave;
pub mod title;

pub use config::Options;
pub use server::Server;
