//! Pipeline definition registry with hot reload.

use super::loader::{self, LoadEvent, LoadedDefinition};
use super::PipelineDefinition;
use crate::errors::DefinitionError;
use parking_lot::RwLock;
use regex::{Regex, RegexBuilder};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

/// Result of a reload request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReloadOutcome {
    /// The file content did not change.
    Unchanged,
    /// The definition was replaced.
    Updated,
}

/// A definition paired with its compiled trigger.
#[derive(Debug, Clone)]
pub struct RegisteredPipeline {
    /// The definition.
    pub definition: Arc<PipelineDefinition>,
    /// Case-insensitive trigger regex; `None` when absent or invalid.
    pub trigger: Option<Regex>,
    /// File the definition was loaded from.
    pub source: Option<PathBuf>,
    /// SHA-256 of the source content.
    pub checksum: String,
}

#[derive(Debug, Default)]
struct Inner {
    order: Vec<String>,
    entries: HashMap<String, RegisteredPipeline>,
}

/// Registry of pipeline definitions, preserving registration order.
#[derive(Debug, Default)]
pub struct PipelineRegistry {
    inner: RwLock<Inner>,
}

fn checksum(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

fn compile_trigger(definition: &PipelineDefinition) -> Option<Regex> {
    let pattern = definition.trigger.pattern.as_deref()?;
    match RegexBuilder::new(pattern).case_insensitive(true).build() {
        Ok(regex) => Some(regex),
        Err(e) => {
            warn!(pipeline = %definition.id, error = %e, "Ignoring invalid trigger pattern");
            None
        }
    }
}

impl PipelineRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a definition built in code.
    ///
    /// Re-registering an id replaces the definition and keeps its position.
    ///
    /// # Errors
    ///
    /// Returns [`DefinitionError::Invalid`] if validation fails.
    pub fn register(&self, definition: PipelineDefinition) -> Result<(), DefinitionError> {
        definition.validate()?;
        let bytes = serde_json::to_vec(&definition).unwrap_or_default();
        self.insert(definition, None, checksum(&bytes));
        Ok(())
    }

    /// Registers a definition loaded from a file.
    pub fn register_loaded(&self, loaded: LoadedDefinition) {
        let sum = checksum(&loaded.source);
        self.insert(loaded.definition, Some(loaded.path), sum);
    }

    fn insert(&self, definition: PipelineDefinition, source: Option<PathBuf>, checksum: String) {
        let id = definition.id.clone();
        let entry = RegisteredPipeline {
            trigger: compile_trigger(&definition),
            definition: Arc::new(definition),
            source,
            checksum,
        };
        let mut inner = self.inner.write();
        if inner.entries.insert(id.clone(), entry).is_none() {
            inner.order.push(id);
        }
    }

    /// Loads every definition file in `dir` and registers the valid ones.
    #[must_use]
    pub fn load_dir(&self, dir: &Path) -> Vec<LoadEvent> {
        let (loaded, events) = loader::load_dir(dir);
        for definition in loaded {
            self.register_loaded(definition);
        }
        events
    }

    /// Re-reads a file-backed definition.
    ///
    /// # Errors
    ///
    /// Returns [`DefinitionError::NotFound`] for unknown ids,
    /// [`DefinitionError::NotReloadable`] for definitions registered in code,
    /// and load errors when the file is no longer valid or declares another id.
    /// On error the registered definition is left in place.
    pub fn reload(&self, id: &str) -> Result<ReloadOutcome, DefinitionError> {
        let (path, previous) = {
            let inner = self.inner.read();
            let entry = inner
                .entries
                .get(id)
                .ok_or_else(|| DefinitionError::NotFound(id.to_string()))?;
            let path = entry
                .source
                .clone()
                .ok_or_else(|| DefinitionError::NotReloadable(id.to_string()))?;
            (path, entry.checksum.clone())
        };

        let loaded = loader::load_file(&path)?;
        if loaded.definition.id != id {
            return Err(DefinitionError::invalid(
                id,
                format!("{} now declares id '{}'", path.display(), loaded.definition.id),
            ));
        }
        if checksum(&loaded.source) == previous {
            return Ok(ReloadOutcome::Unchanged);
        }

        self.register_loaded(loaded);
        info!(pipeline = %id, path = %path.display(), "Reloaded pipeline definition");
        Ok(ReloadOutcome::Updated)
    }

    /// Returns a definition by id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<Arc<PipelineDefinition>> {
        self.inner.read().entries.get(id).map(|e| e.definition.clone())
    }

    /// Returns all definitions in registration order.
    #[must_use]
    pub fn list(&self) -> Vec<Arc<PipelineDefinition>> {
        let inner = self.inner.read();
        inner
            .order
            .iter()
            .filter_map(|id| inner.entries.get(id).map(|e| e.definition.clone()))
            .collect()
    }

    /// Returns all entries with their compiled triggers, in registration order.
    #[must_use]
    pub fn entries(&self) -> Vec<RegisteredPipeline> {
        let inner = self.inner.read();
        inner
            .order
            .iter()
            .filter_map(|id| inner.entries.get(id).cloned())
            .collect()
    }

    /// Removes a definition.
    pub fn remove(&self, id: &str) -> Option<Arc<PipelineDefinition>> {
        let mut inner = self.inner.write();
        let removed = inner.entries.remove(id)?;
        inner.order.retain(|existing| existing != id);
        Some(removed.definition)
    }

    /// Returns true if the id is registered.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.inner.read().entries.contains_key(id)
    }

    /// Returns the number of registered definitions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().order.len()
    }

    /// Returns true if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.read().order.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::PipelineStep;
    use std::fs;
    use tempfile::TempDir;

    fn def(id: &str) -> PipelineDefinition {
        PipelineDefinition::new(id, id).with_step(PipelineStep::new("one", "echo"))
    }

    #[test]
    fn test_registration_order_preserved() {
        let registry = PipelineRegistry::new();
        registry.register(def("b")).unwrap();
        registry.register(def("a")).unwrap();
        registry.register(def("b").with_description("updated")).unwrap();

        let ids: Vec<_> = registry.list().iter().map(|d| d.id.clone()).collect();
        assert_eq!(ids, vec!["b", "a"]);
        assert_eq!(registry.get("b").unwrap().description, "updated");
    }

    #[test]
    fn test_register_rejects_invalid() {
        let registry = PipelineRegistry::new();
        assert!(registry.register(PipelineDefinition::new("empty", "Empty")).is_err());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_invalid_trigger_ignored() {
        let registry = PipelineRegistry::new();
        registry.register(def("p").with_trigger_pattern("(unclosed")).unwrap();
        assert!(registry.entries()[0].trigger.is_none());
        registry.register(def("q").with_trigger_pattern("Blog")).unwrap();
        assert!(registry.entries()[1].trigger.as_ref().unwrap().is_match("a BLOG post"));
    }

    #[test]
    fn test_remove() {
        let registry = PipelineRegistry::new();
        registry.register(def("p")).unwrap();
        assert!(registry.remove("p").is_some());
        assert!(registry.remove("p").is_none());
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn test_reload_from_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("p.yaml");
        fs::write(&path, "id: p\nname: First\nsteps:\n  - id: one\n    skill: echo\n").unwrap();

        let registry = PipelineRegistry::new();
        let events = registry.load_dir(dir.path());
        assert!(matches!(&events[0], LoadEvent::Loaded { id, .. } if id == "p"));

        assert_eq!(registry.reload("p").unwrap(), ReloadOutcome::Unchanged);

        fs::write(&path, "id: p\nname: Second\nsteps:\n  - id: one\n    skill: echo\n").unwrap();
        assert_eq!(registry.reload("p").unwrap(), ReloadOutcome::Updated);
        assert_eq!(registry.get("p").unwrap().name, "Second");

        fs::write(&path, "id: p\nsteps: []\n").unwrap();
        assert!(registry.reload("p").is_err());
        assert_eq!(registry.get("p").unwrap().name, "Second");
    }

    #[test]
    fn test_reload_errors() {
        let registry = PipelineRegistry::new();
        registry.register(def("code")).unwrap();
        assert!(matches!(
            registry.reload("code"),
            Err(DefinitionError::NotReloadable(_))
        ));
        assert!(matches!(
            registry.reload("missing"),
            Err(DefinitionError::NotFound(_))
        ));
    }
}
