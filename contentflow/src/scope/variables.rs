//! Per-run variable table.

use crate::errors::DataConflictError;
use serde_json::Value;
use std::collections::HashMap;

/// A key→value table used to resolve step inputs and evaluate conditions.
///
/// Keys are either dotted paths (`inputs.text`) or bare output names
/// (`first_result`). A bound key is only replaced through
/// [`VariableScope::bind_output`], which models a later step declaring the
/// same output name.
#[derive(Debug, Clone, Default)]
pub struct VariableScope {
    values: HashMap<String, Value>,
}

impl VariableScope {
    /// Creates an empty scope.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds a new key.
    ///
    /// # Errors
    ///
    /// Returns [`DataConflictError`] if the key is already bound.
    pub fn insert(&mut self, key: impl Into<String>, value: Value) -> Result<(), DataConflictError> {
        let key = key.into();
        if self.values.contains_key(&key) {
            return Err(DataConflictError::new(key));
        }
        self.values.insert(key, value);
        Ok(())
    }

    /// Binds a step output, shadowing any earlier binding of the same name.
    ///
    /// Returns the shadowed value.
    pub fn bind_output(&mut self, name: impl Into<String>, value: Value) -> Option<Value> {
        self.values.insert(name.into(), value)
    }

    /// Looks up a dotted path.
    ///
    /// An exact key match wins. Otherwise the longest bound prefix is used
    /// and the remaining segments navigate into its JSON value (object keys
    /// or array indices).
    #[must_use]
    pub fn get(&self, path: &str) -> Option<&Value> {
        if let Some(value) = self.values.get(path) {
            return Some(value);
        }
        let segments: Vec<&str> = path.split('.').collect();
        self.lookup_segments(&segments)
    }

    /// Looks up a pre-split path.
    ///
    /// Tries every prefix, longest first, as a flat key and navigates the
    /// rest. Segments may themselves contain dots (bracket access).
    #[must_use]
    pub fn lookup_segments<S: AsRef<str>>(&self, segments: &[S]) -> Option<&Value> {
        for split in (1..=segments.len()).rev() {
            let key = segments[..split]
                .iter()
                .map(AsRef::as_ref)
                .collect::<Vec<_>>()
                .join(".");
            let Some(root) = self.values.get(&key) else {
                continue;
            };
            if let Some(found) = navigate(root, &segments[split..]) {
                return Some(found);
            }
        }
        None
    }

    /// Returns true if the exact key is bound.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Returns the number of bound keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns true if nothing is bound.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Iterates over bound keys and values.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.values.iter()
    }
}

/// Walks object keys and array indices below a root value.
pub(crate) fn navigate<'a, S: AsRef<str>>(root: &'a Value, segments: &[S]) -> Option<&'a Value> {
    let mut current = root;
    for segment in segments {
        let segment = segment.as_ref();
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}
