use crate::error::ConfigurationError;
use crate::forward::Forward;
use crate::message::Message;
use crate::stage::{EchoStage, FixedResultStage, Stage};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Declarative description of one stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageDefinition {
    #[serde(rename = "type")]
    pub stage_type: String,
    pub name: String,
    #[serde(default)]
    pub max_threads: usize,
    /// Stage-local forwards, name to path
    #[serde(default)]
    pub forwards: BTreeMap<String, String>,
    #[serde(default)]
    pub params: serde_json::Value,
}

impl StageDefinition {
    pub fn new(stage_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            stage_type: stage_type.into(),
            name: name.into(),
            max_threads: 0,
            forwards: BTreeMap::new(),
            params: serde_json::Value::Null,
        }
    }

    pub fn with_forward(mut self, name: impl Into<String>, path: impl Into<String>) -> Self {
        self.forwards.insert(name.into(), path.into());
        self
    }

    pub fn with_param(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        if !self.params.is_object() {
            self.params = serde_json::Value::Object(serde_json::Map::new());
        }
        if let Some(params) = self.params.as_object_mut() {
            params.insert(key.to_string(), value.into());
        }
        self
    }

    pub fn with_max_threads(mut self, max_threads: usize) -> Self {
        self.max_threads = max_threads;
        self
    }

    fn local_forwards(&self) -> impl Iterator<Item = Forward> + '_ {
        self.forwards.iter().map(|(name, path)| Forward::new(name, path))
    }
}

/// Builds a stage from its definition
pub type StageFactory = Box<dyn Fn(&StageDefinition) -> Result<Box<dyn Stage>, ConfigurationError> + Send + Sync>;

/// Maps stage type identifiers to factories
pub struct StageRegistry {
    factories: HashMap<String, StageFactory>,
}

impl StageRegistry {
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Registry with the `echo` and `fixed` stage types
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.factories.insert("echo".into(), Box::new(echo_factory));
        registry.factories.insert("fixed".into(), Box::new(fixed_factory));
        registry
    }

    /// Register a factory for a stage type; each type may be registered once
    pub fn register<F>(&mut self, stage_type: impl Into<String>, factory: F) -> Result<(), ConfigurationError>
    where
        F: Fn(&StageDefinition) -> Result<Box<dyn Stage>, ConfigurationError> + Send + Sync + 'static,
    {
        let stage_type = stage_type.into();
        if self.factories.contains_key(&stage_type) {
            return Err(ConfigurationError::DuplicateStageType(stage_type));
        }
        self.factories.insert(stage_type, Box::new(factory));
        Ok(())
    }

    pub fn create(&self, definition: &StageDefinition) -> Result<Box<dyn Stage>, ConfigurationError> {
        let factory = self
            .factories
            .get(&definition.stage_type)
            .ok_or_else(|| ConfigurationError::UnknownStageType(definition.stage_type.clone()))?;
        let stage = factory(definition)?;
        tracing::debug!(stage = %definition.name, stage_type = %definition.stage_type, "created stage");
        Ok(stage)
    }

    pub fn contains(&self, stage_type: &str) -> bool {
        self.factories.contains_key(stage_type)
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}

impl Default for StageRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

fn echo_factory(definition: &StageDefinition) -> Result<Box<dyn Stage>, ConfigurationError> {
    let stage = definition
        .local_forwards()
        .fold(EchoStage::new(&definition.name).with_max_threads(definition.max_threads), |stage, f| {
            stage.with_forward(f)
        });
    Ok(Box::new(stage))
}

fn fixed_factory(definition: &StageDefinition) -> Result<Box<dyn Stage>, ConfigurationError> {
    let result = match definition.params.get("result") {
        Some(serde_json::Value::String(text)) => Message::Text(text.clone()),
        Some(serde_json::Value::Null) | None => {
            return Err(ConfigurationError::Stage {
                stage: definition.name.clone(),
                reason: "parameter [result] is required".into(),
            })
        }
        Some(other) => Message::Json(other.clone()),
    };
    let stage = definition.local_forwards().fold(
        FixedResultStage::new(&definition.name, result).with_max_threads(definition.max_threads),
        |stage, f| stage.with_forward(f),
    );
    Ok(Box::new(stage))
}
