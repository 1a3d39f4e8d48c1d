//! Window-title variable merging and rendering.
//!
//! Titles are rendered from a flattened map built by merging named
//! variable units (`server`, `master`, `slave`) in a fixed order, later
//! units winning on key conflicts.

use serde_json::{Map, Value};
use thiserror::Error;

/// A title template failed to render.
#[derive(Debug, Error)]
pub enum TitleError {
    #[error("unknown title variable: {0}")]
    UnknownVariable(String),
    #[error("unterminated placeholder in title format")]
    Unterminated,
}

/// Merge variable units in slice order into one flat map.
///
/// Each unit's name is also inserted as a key mapping to the whole unit
/// so templates can disambiguate conflicting keys.
pub fn merge_variables(units: &[(&str, Map<String, Value>)]) -> Map<String, Value> {
    let mut merged = Map::new();
    for (_, vars) in units {
        for (key, value) in vars {
            merged.insert(key.clone(), value.clone());
        }
    }
    for (name, vars) in units {
        merged.insert((*name).to_string(), Value::Object(vars.clone()));
    }
    merged
}

/// Render a `{name}` placeholder template against merged variables.
///
/// String values are inserted verbatim; other values render as JSON.
/// An unknown placeholder name is an error, not an empty substitution.
pub fn render(format: &str, vars: &Map<String, Value>) -> Result<String, TitleError> {
    let mut out = String::with_capacity(format.len());
    let mut rest = format;
    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        let Some(end) = after.find('}') else {
            return Err(TitleError::Unterminated);
        };
        let key = after[..end].trim();
        match vars.get(key) {
            Some(Value::String(s)) => out.push_str(s),
            Some(other) => out.push_str(&other.to_string()),
            None => return Err(TitleError::UnknownVariable(key.to_string())),
        }
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    Ok(out)
}
