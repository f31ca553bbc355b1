use std::error::Error as StdError;
use std::fmt;

use thiserror::Error;

use crate::run_state::RunState;

/// Result type for stage executions
pub type Result<T, E = StageError> = std::result::Result<T, E>;

/// Boxed error used as the cause of a [`StageError`]
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Errors raised while configuring a pipeline, stage, receiver or adapter
#[derive(Error, Debug)]
pub enum ConfigurationError {
    /// A stage with this name is already registered
    #[error("stage [{0}] is already registered")]
    DuplicateStage(String),

    /// The pipeline has no exits
    #[error("no pipeline exits specified")]
    NoExits,

    /// No first stage was designated
    #[error("no first stage defined")]
    NoFirstStage,

    /// The designated first stage is not registered
    #[error("no stage found for first stage [{0}]")]
    FirstStageNotFound(String),

    /// A stage rejected its configuration
    #[error("stage [{stage}]: {reason}")]
    Stage { stage: String, reason: String },

    /// A receiver rejected its configuration
    #[error("receiver [{receiver}]: {reason}")]
    Receiver { receiver: String, reason: String },

    /// No factory is registered for a stage type
    #[error("no stage factory registered for type [{0}]")]
    UnknownStageType(String),

    /// A factory is already registered for a stage type
    #[error("duplicate stage factory for type [{0}]")]
    DuplicateStageType(String),

    /// Invalid configuration value
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Errors raised while starting a pipeline or adapter
#[derive(Error, Debug)]
pub enum StartError {
    /// A stage failed to start
    #[error("stage [{stage}] failed to start: {reason}")]
    Stage { stage: String, reason: String },

    /// The adapter was started without a successful configuration
    #[error("adapter [{0}] is not configured")]
    NotConfigured(String),

    /// The lifecycle loop was interrupted while waiting
    #[error("adapter [{0}] interrupted while running")]
    Interrupted(String),
}

/// Raised by a blocking wait that was interrupted
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("interrupted while waiting")]
pub struct Interrupted;

/// Failure of a single message traversal, optionally tied to the stage that caused it
#[derive(Debug)]
pub struct StageError {
    stage: Option<String>,
    message: String,
    source: Option<BoxError>,
}

impl StageError {
    /// Error attributed to `stage`
    pub fn new(stage: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            stage: Some(stage.into()),
            message: message.into(),
            source: None,
        }
    }

    /// Error without stage attribution
    pub fn unattributed(message: impl Into<String>) -> Self {
        Self {
            stage: None,
            message: message.into(),
            source: None,
        }
    }

    /// Attach the underlying cause
    pub fn with_source(mut self, source: impl Into<BoxError>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Attribute to `stage` when no stage is set yet
    pub fn in_stage(mut self, stage: &str) -> Self {
        if self.stage.is_none() {
            self.stage = Some(stage.to_string());
        }
        self
    }

    /// Name of the offending stage, when known
    pub fn stage(&self) -> Option<&str> {
        self.stage.as_deref()
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for StageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.stage {
            Some(stage) => write!(f, "stage [{}] {}", stage, self.message)?,
            None => f.write_str(&self.message)?,
        }
        if let Some(source) = &self.source {
            write!(f, ": {}", source)?;
        }
        Ok(())
    }
}

impl StdError for StageError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn StdError + 'static))
    }
}

/// Errors raised by receivers while stopping
#[derive(Error, Debug)]
pub enum ReceiverError {
    /// The receiver could not be stopped cleanly
    #[error("receiver [{receiver}] failed to stop: {reason}")]
    Stop { receiver: String, reason: String },

    /// The receiver is not bound to an adapter
    #[error("receiver [{0}] is not bound to an adapter")]
    Unbound(String),

    /// The receiver's inbox no longer accepts messages
    #[error("receiver [{0}] is closed")]
    Closed(String),
}

/// Failures surfaced at the adapter boundary
#[derive(Error, Debug)]
pub enum AdapterError {
    /// The adapter is not accepting messages in its current state
    #[error("adapter [{adapter}] in state [{state}], cannot process message")]
    IllegalState { adapter: String, state: RunState },

    /// Error during pipeline processing
    #[error("error during pipeline processing: {0}")]
    Pipeline(#[from] StageError),

    /// Anything else, including panics raised while processing
    #[error("unexpected failure: {0}")]
    Unexpected(String),
}

impl AdapterError {
    /// Stage that caused the failure, when known
    pub fn stage(&self) -> Option<&str> {
        match self {
            AdapterError::Pipeline(e) => e.stage(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_error_display_includes_stage_and_cause() {
        let err = StageError::new("transform", "failed to parse")
            .with_source(std::io::Error::new(std::io::ErrorKind::Other, "bad input"));
        let text = err.to_string();
        assert!(text.contains("[transform]"));
        assert!(text.contains("bad input"));
        assert!(err.source().is_some());
    }

    #[test]
    fn test_in_stage_keeps_existing_attribution() {
        let err = StageError::new("first", "boom").in_stage("second");
        assert_eq!(err.stage(), Some("first"));
        let err = StageError::unattributed("boom").in_stage("second");
        assert_eq!(err.stage(), Some("second"));
    }

    #[test]
    fn test_adapter_error_stage() {
        let err: AdapterError = StageError::new("s1", "x").into();
        assert_eq!(err.stage(), Some("s1"));
        assert_eq!(AdapterError::Unexpected("x".into()).stage(), None);
    }
}
