//! Server assembly: shared state, the middleware-wrapped router, and
//! the serve loop.

mod env;
mod gate;
mod handlers;
mod middleware;
mod ws;

pub use env::{Env, ResolvedEnv, ENV_COOKIE_NAME, ENV_QUERY_PARAM};
pub use gate::{AdmissionError, SessionGate, SessionGuard};
pub use ws::{InitMessage, SessionError, CLOSE_MAX_CONNECTIONS};

use std::net::SocketAddr;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{ConnectInfo, FromRequestParts},
    http::{header, request::Parts, HeaderValue},
    middleware::from_fn,
    routing::get,
    Router,
};
use serde_json::{Map, Value};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::set_header::SetResponseHeaderLayer;

use crate::bridge::BridgeFactory;
use crate::config::Options;
use crate::counter::ConnectionCounter;
use crate::slave::SlaveFactory;
use crate::title::{self, TitleError};

/// Value of the `Server` response header.
const SERVER_HEADER: &str = concat!("ttygate/", env!("CARGO_PKG_VERSION"));

/// Shared state handed to every handler and middleware layer.
///
/// An explicit, injectable object rather than ambient globals; the
/// compound admission flags live behind the gate's mutex, single-word
/// state (health, counter, once flag) is atomic.
#[derive(Clone)]
pub struct AppState {
    pub options: Arc<Options>,
    pub factory: Arc<dyn SlaveFactory>,
    pub bridges: Arc<dyn BridgeFactory>,
    pub gate: SessionGate,
    pub counter: ConnectionCounter,
    pub cancel: CancellationToken,
    pub(crate) once_claimed: Arc<AtomicBool>,
}

impl AppState {
    /// Render the window title from the merged `server`, `master`,
    /// `slave` variable namespaces, in that order.
    pub(crate) fn window_title(
        &self,
        remote: &str,
        slave: Option<&Map<String, Value>>,
    ) -> Result<String, TitleError> {
        let server_vars: Map<String, Value> = self
            .options
            .title_variables
            .iter()
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        let mut master = Map::new();
        master.insert(
            "remote_addr".to_string(),
            Value::String(remote.to_string()),
        );

        let mut units = vec![("server", server_vars), ("master", master)];
        if let Some(vars) = slave {
            units.push(("slave", vars.clone()));
        }
        let merged = title::merge_variables(&units);
        title::render(&self.options.title_format, &merged)
    }
}

/// Remote peer address, taken from the connect-info extension when the
/// router is served through [`Server::run`]; `-` otherwise.
pub(crate) struct RemoteAddr(pub String);

impl<S> FromRequestParts<S> for RemoteAddr
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(RemoteAddr(
            parts
                .extensions
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| addr.to_string())
                .unwrap_or_else(|| "-".to_string()),
        ))
    }
}

/// The assembled gateway: options plus the injected slave and bridge
/// factories.
pub struct Server {
    state: AppState,
}

impl Server {
    pub fn new(
        options: Options,
        factory: Arc<dyn SlaveFactory>,
        bridges: Arc<dyn BridgeFactory>,
    ) -> Self {
        let counter = ConnectionCounter::new(Duration::from_secs(options.timeout_secs));
        let state = AppState {
            options: Arc::new(options),
            factory,
            bridges,
            gate: SessionGate::new(),
            counter,
            cancel: CancellationToken::new(),
            once_claimed: Arc::new(AtomicBool::new(false)),
        };
        Self { state }
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Token cancelled by idle timeout, once-mode completion, or an
    /// embedder-triggered shutdown.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.state.cancel.clone()
    }

    /// Build the middleware-wrapped router.
    pub fn router(&self) -> Router {
        router(self.state.clone())
    }

    /// Serve until the cancellation token fires, with the idle watcher
    /// running in the background.
    pub async fn run(self, listener: TcpListener) -> std::io::Result<()> {
        let state = self.state;
        tokio::spawn(state.counter.clone().watch_idle(state.cancel.clone()));

        if let Ok(addr) = listener.local_addr() {
            tracing::info!(%addr, "server listening");
        }

        let cancel = state.cancel.clone();
        let app = router(state);
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(cancel.cancelled_owned())
        .await
    }
}

/// Compose routes and the middleware pipeline.
///
/// Layer order matters: the first layer added wraps only the handlers
/// (health gate), the last wraps everything (logger), so every concern
/// still observes requests that are rejected for health.
pub fn router(state: AppState) -> Router {
    let options = state.options.clone();
    let gate = state.gate.clone();

    let mut app = Router::new()
        .route("/", get(handlers::index))
        .route("/auth_token.js", get(handlers::auth_token_js))
        .route("/config.js", get(handlers::config_js))
        .route("/ws", get(ws::handle_ws))
        .with_state(state)
        .layer(from_fn(move |req, next| {
            let gate = gate.clone();
            async move { middleware::health_gate(gate, req, next).await }
        }));

    if options.query_args_to_env {
        app = app.layer(from_fn(middleware::query_params_to_env));
    }

    if options.enable_basic_auth {
        let credential = options.credential.clone();
        app = app.layer(from_fn(move |req, next| {
            let credential = credential.clone();
            async move { middleware::basic_auth(credential, req, next).await }
        }));
    }

    app.layer(SetResponseHeaderLayer::overriding(
        header::SERVER,
        HeaderValue::from_static(SERVER_HEADER),
    ))
    .layer(from_fn(middleware::log_requests))
}
