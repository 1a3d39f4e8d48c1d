use axum::http::{header, HeaderMap, HeaderValue, Uri};

/// Query parameter selecting the session environment.
pub const ENV_QUERY_PARAM: &str = "ENV";
/// Cookie carrying the environment across reconnects on one browser.
pub const ENV_COOKIE_NAME: &str = "gotty.env";

/// Per-session exclusivity mode.
///
/// Prod enforces at-most-one active session; dev allows unlimited
/// concurrency. Any value other than `dev` behaves as prod.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Env {
    Dev,
    Prod,
}

impl Env {
    fn from_value(value: &str) -> Self {
        if value.eq_ignore_ascii_case("dev") {
            Env::Dev
        } else {
            Env::Prod
        }
    }
}

/// Environment resolved from one request.
pub struct ResolvedEnv {
    pub env: Env,
    /// Cookie to attach to the handshake response when the query
    /// parameter supplied the value.
    pub set_cookie: Option<HeaderValue>,
}

/// Resolve the session environment: `ENV` query parameter first (and
/// persist it in the cookie), then the cookie, then prod. Absence of
/// signal always resolves to prod; there is no error path.
pub fn resolve_env(uri: &Uri, headers: &HeaderMap) -> ResolvedEnv {
    let from_query = uri
        .query()
        .and_then(|query| {
            url::form_urlencoded::parse(query.as_bytes())
                .find(|(key, _)| key == ENV_QUERY_PARAM)
                .map(|(_, value)| value.trim().to_string())
        })
        .filter(|value| !value.is_empty());

    if let Some(value) = from_query {
        let cookie = format!("{}={}; Path=/", ENV_COOKIE_NAME, value);
        return ResolvedEnv {
            env: Env::from_value(&value),
            set_cookie: HeaderValue::from_str(&cookie).ok(),
        };
    }

    let from_cookie = headers
        .get(header::COOKIE)
        .and_then(|value| value.to_str().ok())
        .and_then(cookie_value)
        .filter(|value| !value.is_empty());

    ResolvedEnv {
        env: from_cookie
            .map(|value| Env::from_value(&value))
            .unwrap_or(Env::Prod),
        set_cookie: None,
    }
}

fn cookie_value(header: &str) -> Option<String> {
    header.split(';').find_map(|pair| {
        let (name, value) = pair.trim().split_once('=')?;
        (name == ENV_COOKIE_NAME).then(|| value.to_string())
    })
}
