use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Named edge from a stage to another stage or to an exit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Forward {
    pub name: String,
    pub path: String,
}

impl Forward {
    pub fn new(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
        }
    }
}

impl fmt::Display for Forward {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "forward [{}] -> [{}]", self.name, self.path)
    }
}

/// Terminal node of a pipeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineExit {
    pub path: String,
    pub state: String,
}

impl PipelineExit {
    pub fn new(path: impl Into<String>, state: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            state: state.into(),
        }
    }
}

/// Forwards known to a single stage.
///
/// The first forward registered under a name wins; stage-local forwards are
/// registered before the pipeline applies its globals, so globals never
/// override them.
#[derive(Debug, Clone, Default)]
pub struct ForwardTable {
    forwards: HashMap<String, Forward>,
}

impl ForwardTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `forward` unless one with the same name exists.
    ///
    /// Returns `false` when the forward was ignored.
    pub fn register(&mut self, forward: Forward) -> bool {
        if let Some(current) = self.forwards.get(&forward.name) {
            if current.path != forward.path {
                tracing::debug!(
                    forward = %forward.name,
                    kept = %current.path,
                    ignored = %forward.path,
                    "forward already registered, ignoring new one"
                );
            }
            return false;
        }
        self.forwards.insert(forward.name.clone(), forward);
        true
    }

    pub fn find(&self, name: &str) -> Option<&Forward> {
        self.forwards.get(name)
    }

    pub fn len(&self) -> usize {
        self.forwards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.forwards.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Forward> {
        self.forwards.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_registration_wins() {
        let mut table = ForwardTable::new();
        assert!(table.register(Forward::new("success", "local")));
        assert!(!table.register(Forward::new("success", "global")));
        assert_eq!(table.find("success").map(|f| f.path.as_str()), Some("local"));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_missing_forward() {
        assert!(ForwardTable::new().find("nope").is_none());
    }
}
