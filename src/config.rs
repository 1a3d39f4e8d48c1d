use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

/// Immutable server configuration.
///
/// Built in code by embedders or loaded from a TOML file (see
/// [`Options::load`]). Every field has a default so a partial file
/// works.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Options {
    /// Credential checked against both HTTP basic auth and the
    /// `AuthToken` of the WebSocket init message.
    pub credential: String,
    /// Require HTTP basic auth on every route.
    pub enable_basic_auth: bool,
    /// Maximum concurrent connections; 0 means unlimited.
    pub max_connection: usize,
    /// Allow clients to write to the backend.
    pub permit_write: bool,
    /// Allow clients to pass arguments in the init message.
    pub permit_arguments: bool,
    /// Forward the original HTTP headers to the slave factory.
    pub pass_headers: bool,
    /// Let clients reconnect after a disconnect.
    pub enable_reconnect: bool,
    /// Reconnect interval advertised to the bridge, in seconds.
    pub reconnect_time_secs: u64,
    /// Fixed terminal width; 0 lets the client decide.
    pub width: u16,
    /// Fixed terminal height; 0 lets the client decide.
    pub height: u16,
    /// Accept a single session, then shut the process down.
    pub once: bool,
    /// Idle shutdown window in seconds; 0 disables the idle timer.
    pub timeout_secs: u64,
    /// Copy HTTP query parameters into process environment variables.
    ///
    /// Process-global and irreversible within the process lifetime.
    /// Only safe on trusted, single-tenant deployments.
    pub query_args_to_env: bool,
    /// Window title template. `{name}` placeholders are filled from the
    /// merged title variables; an unknown name fails the render.
    pub title_format: String,
    /// Server-level title variables, lowest precedence in the merge.
    pub title_variables: HashMap<String, serde_json::Value>,
    /// Query argument allowlist advertised to the web client.
    pub ws_query_args: String,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            credential: String::new(),
            enable_basic_auth: false,
            max_connection: 0,
            permit_write: false,
            permit_arguments: false,
            pass_headers: false,
            enable_reconnect: false,
            reconnect_time_secs: 10,
            width: 0,
            height: 0,
            once: false,
            timeout_secs: 0,
            query_args_to_env: false,
            // `remote_addr` is the one variable present on every render,
            // session or index, regardless of what the slave contributes.
            title_format: "ttygate - {remote_addr}".to_string(),
            title_variables: HashMap::new(),
            ws_query_args: String::new(),
        }
    }
}

impl Options {
    /// Load options from a TOML file path. Returns None if the file
    /// doesn't exist.
    ///
    /// Checks file permissions and warns if world-readable, because the
    /// file carries the credential.
    pub fn load(path: &Path) -> Result<Option<Self>, ConfigError> {
        if !path.exists() {
            return Ok(None);
        }

        check_config_permissions(path);

        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFailed(path.to_path_buf(), e))?;
        let options: Self = toml::from_str(&contents)
            .map_err(|e| ConfigError::ParseFailed(path.to_path_buf(), e))?;
        Ok(Some(options))
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {0}: {1}")]
    ReadFailed(std::path::PathBuf, #[source] std::io::Error),
    #[error("failed to parse config {0}: {1}")]
    ParseFailed(std::path::PathBuf, #[source] toml::de::Error),
}

/// Check file permissions on a config file and warn if world-readable.
#[cfg(unix)]
fn check_config_permissions(path: &Path) {
    use std::os::unix::fs::PermissionsExt;

    let metadata = match std::fs::metadata(path) {
        Ok(m) => m,
        Err(_) => return,
    };

    let mode = metadata.permissions().mode();
    if mode & 0o004 != 0 {
        tracing::warn!(
            "config file {} is world-readable (mode {:o}); it carries the \
             credential -- consider restricting permissions to 600",
            path.display(),
            mode & 0o7777,
        );
    }
}

#[cfg(not(unix))]
fn check_config_permissions(_path: &Path) {}
