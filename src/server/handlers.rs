use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{Html, IntoResponse},
};

use super::{AppState, RemoteAddr};

/// Minimal index shell. Full landing-page rendering belongs to the web
/// client; the server only contributes the computed window title.
pub(super) async fn index(
    State(state): State<AppState>,
    RemoteAddr(remote): RemoteAddr,
) -> Result<Html<String>, StatusCode> {
    let title = state.window_title(&remote, None).map_err(|err| {
        tracing::error!(error = %err, "failed to render index title");
        StatusCode::INTERNAL_SERVER_ERROR
    })?;
    Ok(Html(format!(
        "<!DOCTYPE html>\n<html>\n<head><meta charset=\"utf-8\"><title>{title}</title></head>\n<body data-app=\"ttygate\"></body>\n</html>\n"
    )))
}

pub(super) async fn auth_token_js(State(state): State<AppState>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "application/javascript")],
        format!("var ttygate_auth_token = '{}';", state.options.credential),
    )
}

pub(super) async fn config_js(State(state): State<AppState>) -> impl IntoResponse {
    let lines = [
        "var ttygate_term = 'xterm';".to_string(),
        format!("var ttygate_ws_query_args = '{}';", state.options.ws_query_args),
    ];
    (
        [(header::CONTENT_TYPE, "application/javascript")],
        lines.join("\n"),
    )
}
