//! WebSocket handshake and per-session protocol.
//!
//! Admission runs before the upgrade so rejections are plain HTTP; the
//! max-connection check runs after the upgrade so its rejection can be
//! a proper close frame instead of a bare HTTP error.

use std::sync::atomic::Ordering;
use std::time::Duration;

use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::{header, HeaderMap, StatusCode, Uri},
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use subtle::ConstantTimeEq;
use thiserror::Error;

use crate::bridge::{BridgeError, BridgeOptions};
use crate::slave::{FactoryError, Params};
use crate::title::TitleError;

use super::env::{resolve_env, Env};
use super::gate::{AdmissionError, SessionGuard};
use super::{AppState, RemoteAddr};

/// Application close code sent when the connection limit is exceeded.
pub const CLOSE_MAX_CONNECTIONS: u16 = 4000;

/// First frame sent by the client after the upgrade.
#[derive(Debug, Default, Deserialize)]
pub struct InitMessage {
    #[serde(rename = "AuthToken", default)]
    pub auth_token: String,
    #[serde(rename = "Arguments", default)]
    pub arguments: String,
}

/// Why one session ended. Terminates only that session; the classifier
/// below decides whether the whole server is decommissioned.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("failed to authenticate websocket connection")]
    AuthFailed,
    #[error("failed to read init message: {0}")]
    Handshake(String),
    #[error("failed to create backend: {0}")]
    Backend(#[from] FactoryError),
    #[error("failed to render window title: {0}")]
    Title(#[from] TitleError),
    #[error(transparent)]
    Bridge(#[from] BridgeError),
}

pub(super) async fn handle_ws(
    State(state): State<AppState>,
    RemoteAddr(remote): RemoteAddr,
    uri: Uri,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let resolved = resolve_env(&uri, &headers);

    if state.options.once
        && state
            .once_claimed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
    {
        return (StatusCode::SERVICE_UNAVAILABLE, "Server is shutting down").into_response();
    }

    let guard = match state.gate.begin(resolved.env) {
        Ok(guard) => guard,
        Err(err) => {
            let message = match err {
                AdmissionError::ServerDestroyed => "Server is unavailable",
                AdmissionError::SessionActive => "Another session is active",
            };
            return (StatusCode::SERVICE_UNAVAILABLE, message).into_response();
        }
    };

    let query = uri.query().unwrap_or_default().to_string();
    let pass_headers = state.options.pass_headers.then(|| headers.clone());

    let mut response = ws.on_upgrade(move |socket| {
        run_session(state, socket, guard, remote, query, pass_headers)
    });
    if let Some(cookie) = resolved.set_cookie {
        response.headers_mut().append(header::SET_COOKIE, cookie);
    }
    response
}

/// Decrements the counter and logs the close on every exit path,
/// including a panic inside the session task, then triggers shutdown in
/// once mode.
struct ConnectionScope {
    state: AppState,
    remote: String,
    reason: String,
}

impl ConnectionScope {
    fn set_reason(&mut self, reason: impl Into<String>) {
        self.reason = reason.into();
    }
}

impl Drop for ConnectionScope {
    fn drop(&mut self) {
        let connections = self.state.counter.done();
        tracing::info!(
            reason = %self.reason,
            remote = %self.remote,
            connections,
            max = self.state.options.max_connection,
            "connection closed"
        );
        if self.state.options.once {
            self.state.cancel.cancel();
        }
    }
}

async fn run_session(
    state: AppState,
    mut socket: WebSocket,
    mut guard: SessionGuard,
    remote: String,
    query: String,
    headers: Option<HeaderMap>,
) {
    let connections = state.counter.add(1);
    tracing::info!(
        remote = %remote,
        connections,
        max = state.options.max_connection,
        "new client connected"
    );
    let mut scope = ConnectionScope {
        state: state.clone(),
        remote: remote.clone(),
        reason: "unknown reason".to_string(),
    };

    let max = state.options.max_connection;
    if max > 0 && connections > max {
        scope.set_reason("exceeding max number of connections");
        let frame = CloseFrame {
            code: CLOSE_MAX_CONNECTIONS,
            reason: "Another session is active".into(),
        };
        let _ = socket.send(Message::Close(Some(frame))).await;
        return;
    }

    let result = drive_session(&state, socket, &remote, &query, headers).await;

    let decommission = guard.env() != Env::Dev && is_clean_termination(&result);
    scope.set_reason(close_reason(&result, state.factory.name()));

    // Counter release and close logging come before the ticket release.
    drop(scope);
    if guard.finish(decommission) {
        tracing::info!(remote = %remote, "server decommissioned after connection");
    }
}

/// The post-admission protocol: authenticate, merge arguments, create
/// the backend, render the title, run the bridge.
async fn drive_session(
    state: &AppState,
    mut socket: WebSocket,
    remote: &str,
    http_query: &str,
    headers: Option<HeaderMap>,
) -> Result<(), SessionError> {
    let init = read_init_message(&mut socket).await?;

    let credential = state.options.credential.as_bytes();
    if !bool::from(init.auth_token.as_bytes().ct_eq(credential)) {
        return Err(SessionError::AuthFailed);
    }

    let mut params = if state.options.permit_arguments && !init.arguments.is_empty() {
        parse_query(query_part(&init.arguments))
    } else {
        Params::new()
    };
    // HTTP query parameters take precedence per key, so a
    // pre-authenticated link can override defaults baked into the
    // client payload.
    for (key, values) in parse_query(http_query) {
        params.insert(key, values);
    }
    tracing::debug!(?params, "merged session parameters");

    let slave = state.factory.create(&params, headers.as_ref())?;

    let window_title = state.window_title(remote, Some(&slave.window_title_variables()))?;

    let options = BridgeOptions {
        window_title,
        permit_write: state.options.permit_write,
        reconnect: state
            .options
            .enable_reconnect
            .then(|| Duration::from_secs(state.options.reconnect_time_secs)),
        fixed_columns: (state.options.width > 0).then_some(state.options.width),
        fixed_rows: (state.options.height > 0).then_some(state.options.height),
    };

    let mut bridge = state.bridges.create(socket, slave, options)?;
    bridge.run(&state.cancel).await?;
    Ok(())
}

async fn read_init_message(socket: &mut WebSocket) -> Result<InitMessage, SessionError> {
    match socket.recv().await {
        Some(Ok(Message::Text(text))) => serde_json::from_str(text.as_str())
            .map_err(|err| SessionError::Handshake(format!("malformed init message: {err}"))),
        Some(Ok(_)) => Err(SessionError::Handshake("invalid message type".to_string())),
        Some(Err(err)) => Err(SessionError::Handshake(err.to_string())),
        None => Err(SessionError::Handshake(
            "connection closed before init".to_string(),
        )),
    }
}

/// Arguments arrive as a query string, with or without a leading path
/// and `?`.
fn query_part(arguments: &str) -> &str {
    match arguments.split_once('?') {
        Some((_, query)) => query,
        None => arguments,
    }
}

fn parse_query(query: &str) -> Params {
    let mut params = Params::new();
    for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
        params
            .entry(key.into_owned())
            .or_default()
            .push(value.into_owned());
    }
    params
}

/// A clean termination decommissions a prod session's server: the
/// backend is single-use and must not be silently reused for a next
/// client once it has ended, clean or not.
fn is_clean_termination(result: &Result<(), SessionError>) -> bool {
    matches!(
        result,
        Ok(()) | Err(SessionError::Bridge(
            BridgeError::Canceled | BridgeError::MasterClosed | BridgeError::SlaveClosed
        ))
    )
}

fn close_reason(result: &Result<(), SessionError>, backend: &str) -> String {
    match result {
        Ok(()) | Err(SessionError::Bridge(BridgeError::Canceled)) => "cancelation".to_string(),
        Err(SessionError::Bridge(BridgeError::SlaveClosed)) => backend.to_string(),
        Err(SessionError::Bridge(BridgeError::MasterClosed)) => "client".to_string(),
        Err(err) => format!("an error: {err}"),
    }
}
