//! Skill registry.

use super::Skill;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Lookup table from skill id to skill implementation.
///
/// Read-mostly after startup; registration replaces any skill with the same id.
#[derive(Default)]
pub struct SkillRegistry {
    skills: RwLock<HashMap<String, Arc<dyn Skill>>>,
}

impl std::fmt::Debug for SkillRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SkillRegistry")
            .field("skills", &self.list())
            .finish()
    }
}

impl SkillRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a skill under its own id.
    ///
    /// Returns the skill previously registered with that id.
    pub fn register(&self, skill: Arc<dyn Skill>) -> Option<Arc<dyn Skill>> {
        let id = skill.id().to_string();
        debug!(skill = %id, "Registering skill");
        self.skills.write().insert(id, skill)
    }

    /// Registers a skill and returns the registry, for chained setup.
    #[must_use]
    pub fn with(self, skill: impl Skill + 'static) -> Self {
        self.register(Arc::new(skill));
        self
    }

    /// Returns the skill with this id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<Arc<dyn Skill>> {
        self.skills.read().get(id).cloned()
    }

    /// Returns true if a skill with this id is registered.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.skills.read().contains_key(id)
    }

    /// Returns all registered skill ids, sorted.
    #[must_use]
    pub fn list(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.skills.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Removes a skill.
    pub fn unregister(&self, id: &str) -> Option<Arc<dyn Skill>> {
        self.skills.write().remove(id)
    }

    /// Returns the number of registered skills.
    #[must_use]
    pub fn len(&self) -> usize {
        self.skills.read().len()
    }

    /// Returns true if no skills are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.skills.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::EchoSkill;

    #[test]
    fn test_register_and_get() {
        let registry = SkillRegistry::new().with(EchoSkill::new("echo"));
        assert!(registry.contains("echo"));
        assert_eq!(registry.get("echo").unwrap().id(), "echo");
        assert!(registry.get("missing").is_none());
    }

    #[test]
    fn test_list_is_sorted() {
        let registry = SkillRegistry::new()
            .with(EchoSkill::new("zeta"))
            .with(EchoSkill::new("alpha"));
        assert_eq!(registry.list(), vec!["alpha", "zeta"]);
    }

    #[test]
    fn test_register_replaces() {
        let registry = SkillRegistry::new();
        assert!(registry.register(Arc::new(EchoSkill::new("echo"))).is_none());
        assert!(registry.register(Arc::new(EchoSkill::new("echo"))).is_some());
        assert_eq!(registry.len(), 1);
        assert!(registry.unregister("echo").is_some());
        assert!(registry.is_empty());
    }
}
