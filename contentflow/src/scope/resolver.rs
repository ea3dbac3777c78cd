//! Step input resolution against a [`VariableScope`].
//!
//! Three forms are recognised:
//!
//! - `"$name"`: the whole string is a reference, replaced by the bound value
//!   with its JSON type preserved.
//! - `"text ${path} text"`: each `${path}` is replaced by the string form of
//!   the bound value.
//! - `{"$ref": "path"}`: a single-key object replaced by the bound value.
//!
//! Anything unresolved is left exactly as written.

use super::VariableScope;
use regex::Regex;
use serde_json::{Map, Value};
use std::sync::LazyLock;
use tracing::debug;

#[allow(clippy::expect_used)]
static TEMPLATE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([^}]+)\}").expect("template pattern is valid"));

/// Resolves a single input value.
#[must_use]
pub fn resolve(value: &Value, scope: &VariableScope) -> Value {
    match value {
        Value::String(s) => resolve_string(s, scope),
        Value::Object(map) => match reference_path(map) {
            Some(path) => match scope.get(path) {
                Some(bound) => bound.clone(),
                None => {
                    debug!(path, "Unresolved $ref left as written");
                    value.clone()
                }
            },
            None => value.clone(),
        },
        other => other.clone(),
    }
}

/// Resolves every value of an input map.
#[must_use]
pub fn resolve_inputs(inputs: &Map<String, Value>, scope: &VariableScope) -> Map<String, Value> {
    inputs
        .iter()
        .map(|(name, value)| (name.clone(), resolve(value, scope)))
        .collect()
}

/// Renders a value the way templates embed it: strings unquoted, everything
/// else as compact JSON.
#[must_use]
pub fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn resolve_string(s: &str, scope: &VariableScope) -> Value {
    if let Some(name) = bare_reference(s) {
        return match scope.get(name) {
            Some(bound) => bound.clone(),
            None => {
                debug!(reference = s, "Unresolved reference left as written");
                Value::String(s.to_string())
            }
        };
    }

    if !s.contains("${") {
        return Value::String(s.to_string());
    }

    let rendered = TEMPLATE.replace_all(s, |caps: &regex::Captures<'_>| {
        let path = caps[1].trim();
        match scope.get(path) {
            Some(bound) => value_to_string(bound),
            None => {
                debug!(path, "Unresolved template left as written");
                caps[0].to_string()
            }
        }
    });
    Value::String(rendered.into_owned())
}

/// Returns the name of a whole-string `$name` reference.
fn bare_reference(s: &str) -> Option<&str> {
    let name = s.strip_prefix('$')?;
    let valid = !name.is_empty()
        && !name.starts_with('{')
        && name
            .chars()
            .all(|c| c.is_alphanumeric() || matches!(c, '_' | '-' | '.'));
    valid.then_some(name)
}

fn reference_path(map: &Map<String, Value>) -> Option<&str> {
    if map.len() != 1 {
        return None;
    }
    map.get("$ref").and_then(Value::as_str)
}
