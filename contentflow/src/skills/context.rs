//! Execution context handed to skills.

use crate::errors::SkillError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Brand profile bound into every skill invocation of a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrandProfile {
    /// Brand identifier.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Tone-of-voice guidance.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voice: Option<String>,
    /// Target audience description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audience: Option<String>,
    /// Free-form profile attributes.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub attributes: Map<String, Value>,
}

impl BrandProfile {
    /// Creates a profile with an id and name.
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            ..Self::default()
        }
    }

    /// Sets the voice.
    #[must_use]
    pub fn with_voice(mut self, voice: impl Into<String>) -> Self {
        self.voice = Some(voice.into());
        self
    }

    /// Sets the audience.
    #[must_use]
    pub fn with_audience(mut self, audience: impl Into<String>) -> Self {
        self.audience = Some(audience.into());
        self
    }

    /// Adds a free-form attribute.
    #[must_use]
    pub fn with_attribute(mut self, key: impl Into<String>, value: Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }
}

/// Opaque collaborator handles (LLM client, asset store, memory) keyed by type.
///
/// The engine passes these through to skills without looking inside.
#[derive(Clone, Default)]
pub struct Services {
    entries: HashMap<TypeId, Arc<dyn Any + Send + Sync>>,
}

impl fmt::Debug for Services {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Services")
            .field("count", &self.entries.len())
            .finish()
    }
}

impl Services {
    /// Creates an empty service bag.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a service, replacing any of the same type.
    #[must_use]
    pub fn with<T: Any + Send + Sync>(mut self, service: T) -> Self {
        self.insert(service);
        self
    }

    /// Inserts a service, replacing any of the same type.
    pub fn insert<T: Any + Send + Sync>(&mut self, service: T) {
        self.entries.insert(TypeId::of::<T>(), Arc::new(service));
    }

    /// Returns the service of type `T`, if provided.
    #[must_use]
    pub fn get<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.entries
            .get(&TypeId::of::<T>())
            .cloned()
            .and_then(|service| service.downcast::<T>().ok())
    }

    /// Returns the service of type `T`.
    ///
    /// # Errors
    ///
    /// Returns [`SkillError::MissingService`] if it was not provided.
    pub fn require<T: Any + Send + Sync>(&self) -> Result<Arc<T>, SkillError> {
        self.get::<T>()
            .ok_or_else(|| SkillError::MissingService(std::any::type_name::<T>().to_string()))
    }

    /// Returns true if a service of type `T` is present.
    #[must_use]
    pub fn contains<T: Any + Send + Sync>(&self) -> bool {
        self.entries.contains_key(&TypeId::of::<T>())
    }
}

/// Everything a skill receives for one invocation.
#[derive(Debug, Clone)]
pub struct SkillContext {
    /// The run being executed.
    pub run_id: String,
    /// The step id (without fan-out suffix).
    pub step_id: String,
    /// Fan-out index, `0` for non-parallel steps.
    pub invocation: usize,
    /// Attempt number starting at 1.
    pub attempt: u32,
    /// Resolved step inputs.
    pub inputs: Map<String, Value>,
    /// Skill-specific step options (`parallel` and `count` removed).
    pub config: Map<String, Value>,
    /// Brand profile of the run, when supplied.
    pub brand: Option<Arc<BrandProfile>>,
    /// Collaborator services.
    pub services: Arc<Services>,
}

impl SkillContext {
    /// Creates a context with inputs and empty everything else.
    #[must_use]
    pub fn new(step_id: impl Into<String>, inputs: Map<String, Value>) -> Self {
        Self {
            run_id: String::new(),
            step_id: step_id.into(),
            invocation: 0,
            attempt: 1,
            inputs,
            config: Map::new(),
            brand: None,
            services: Arc::new(Services::new()),
        }
    }

    /// Returns an input value.
    #[must_use]
    pub fn input(&self, name: &str) -> Option<&Value> {
        self.inputs.get(name)
    }

    /// Returns a string input.
    ///
    /// # Errors
    ///
    /// Returns [`SkillError::InvalidInput`] if it is missing or not a string.
    pub fn require_str(&self, name: &str) -> Result<&str, SkillError> {
        self.inputs
            .get(name)
            .and_then(Value::as_str)
            .ok_or_else(|| SkillError::invalid_input(name, "expected a string"))
    }

    /// Returns the service of type `T`, if provided.
    #[must_use]
    pub fn service<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.services.get::<T>()
    }
}
