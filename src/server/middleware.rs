//! Cross-cutting request filters, composed in `super::router`.
//!
//! Layer order matters: the logger wraps everything so it observes the
//! final status, and the health gate wraps the innermost handlers so
//! auth and the other concerns still run for requests that end up
//! rejected for health.

use axum::{
    extract::{ConnectInfo, Request},
    http::{header, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use base64::Engine;
use subtle::ConstantTimeEq;

use std::net::SocketAddr;

use super::gate::SessionGate;

/// Remote address for logging; `-` when the request did not come
/// through a connect-info listener (router unit tests).
pub(super) fn remote_addr(req: &Request) -> String {
    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.to_string())
        .unwrap_or_else(|| "-".to_string())
}

/// One info line per request, emitted after the inner handler ran.
pub(super) async fn log_requests(req: Request, next: Next) -> Response {
    let remote = remote_addr(&req);
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let response = next.run(req).await;
    tracing::info!(
        remote = %remote,
        status = response.status().as_u16(),
        %method,
        %path,
        "request"
    );
    response
}

/// HTTP basic auth against the single configured `user:pass` credential
/// string, compared in constant time.
pub(super) async fn basic_auth(credential: String, req: Request, next: Next) -> Response {
    const CHALLENGE: (header::HeaderName, &str) =
        (header::WWW_AUTHENTICATE, "Basic realm=\"ttygate\"");

    let auth = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok());
    let Some((scheme, payload)) = auth.and_then(|value| value.split_once(' ')) else {
        return (StatusCode::UNAUTHORIZED, [CHALLENGE], "Bad Request").into_response();
    };
    if !scheme.eq_ignore_ascii_case("basic") {
        return (StatusCode::UNAUTHORIZED, [CHALLENGE], "Bad Request").into_response();
    }

    let decoded = match base64::engine::general_purpose::STANDARD.decode(payload.trim()) {
        Ok(bytes) => bytes,
        Err(_) => {
            return (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error")
                .into_response();
        }
    };

    if !bool::from(decoded.ct_eq(credential.as_bytes())) {
        return (StatusCode::UNAUTHORIZED, [CHALLENGE], "authorization failed")
            .into_response();
    }

    tracing::info!(remote = %remote_addr(&req), "basic authentication succeeded");
    next.run(req).await
}

/// Copy every query parameter into a process environment variable,
/// uppercased key, first value winning for multi-valued keys.
///
/// Process-global and irreversible within the process lifetime; gated
/// behind the `query_args_to_env` option.
pub(super) async fn query_params_to_env(req: Request, next: Next) -> Response {
    if let Some(query) = req.uri().query() {
        let mut seen = std::collections::HashSet::new();
        for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
            let env_key = key.to_uppercase();
            if !seen.insert(env_key.clone()) {
                continue;
            }
            std::env::set_var(&env_key, value.as_ref());
            tracing::info!(key = %env_key, value = %value, "set env var from query param");
        }
    }
    next.run(req).await
}

/// Refuse everything once the server is unhealthy.
pub(super) async fn health_gate(gate: SessionGate, req: Request, next: Next) -> Response {
    if gate.is_unhealthy() {
        return (StatusCode::INTERNAL_SERVER_ERROR, "session closed").into_response();
    }
    next.run(req).await
}
