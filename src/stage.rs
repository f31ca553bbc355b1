use crate::error::{ConfigurationError, Result, StartError};
use crate::forward::{Forward, ForwardTable};
use crate::message::Message;
use crate::session::Session;

/// Forward name returned by stages that completed normally
pub const SUCCESS_FORWARD: &str = "success";

/// Outcome of one stage invocation: the output payload and the forward to follow
#[derive(Debug, Clone, PartialEq)]
pub struct PipeRunResult {
    pub result: Message,
    pub forward: String,
}

impl PipeRunResult {
    pub fn new(result: impl Into<Message>, forward: impl Into<String>) -> Self {
        Self {
            result: result.into(),
            forward: forward.into(),
        }
    }

    /// Result following the `success` forward
    pub fn success(result: impl Into<Message>) -> Self {
        Self::new(result, SUCCESS_FORWARD)
    }
}

/// Identity, concurrency bound and forwards shared by every stage
#[derive(Debug, Clone)]
pub struct StageCore {
    name: String,
    max_threads: usize,
    forwards: ForwardTable,
}

impl StageCore {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            max_threads: 0,
            forwards: ForwardTable::new(),
        }
    }

    /// Limit concurrent invocations; 0 means unbounded
    pub fn with_max_threads(mut self, max_threads: usize) -> Self {
        self.max_threads = max_threads;
        self
    }

    /// Add a stage-local forward
    pub fn with_forward(mut self, forward: Forward) -> Self {
        self.forwards.register(forward);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn max_threads(&self) -> usize {
        self.max_threads
    }

    pub fn forwards(&self) -> &ForwardTable {
        &self.forwards
    }

    pub fn forwards_mut(&mut self) -> &mut ForwardTable {
        &mut self.forwards
    }
}

/// A named unit of work in a pipeline.
///
/// `execute` is called concurrently from many threads; stages that keep
/// mutable state must synchronize it themselves. Lifecycle methods are
/// called once each from the owning pipeline.
pub trait Stage: Send + Sync {
    fn core(&self) -> &StageCore;

    fn core_mut(&mut self) -> &mut StageCore;

    /// Process `input` and name the forward to follow
    fn execute(&self, input: Message, session: &mut Session) -> Result<PipeRunResult>;

    fn name(&self) -> &str {
        self.core().name()
    }

    /// Maximum number of concurrent `execute` calls; 0 means unbounded
    fn max_threads(&self) -> usize {
        self.core().max_threads()
    }

    /// Register a forward; an existing forward of the same name is kept
    fn register_forward(&mut self, forward: Forward) {
        self.core_mut().forwards_mut().register(forward);
    }

    fn find_forward(&self, name: &str) -> Option<&Forward> {
        self.core().forwards().find(name)
    }

    fn configure(&mut self) -> std::result::Result<(), ConfigurationError> {
        Ok(())
    }

    fn start(&self) -> std::result::Result<(), StartError> {
        Ok(())
    }

    fn stop(&self) {}
}

/// Passes its input through on the `success` forward
#[derive(Debug, Clone)]
pub struct EchoStage {
    core: StageCore,
}

impl EchoStage {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            core: StageCore::new(name),
        }
    }

    pub fn with_max_threads(mut self, max_threads: usize) -> Self {
        self.core = self.core.with_max_threads(max_threads);
        self
    }

    pub fn with_forward(mut self, forward: Forward) -> Self {
        self.core = self.core.with_forward(forward);
        self
    }
}

impl Stage for EchoStage {
    fn core(&self) -> &StageCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut StageCore {
        &mut self.core
    }

    fn execute(&self, input: Message, _session: &mut Session) -> Result<PipeRunResult> {
        Ok(PipeRunResult::success(input))
    }
}

/// Replies with a fixed result regardless of its input
#[derive(Debug, Clone)]
pub struct FixedResultStage {
    core: StageCore,
    result: Message,
}

impl FixedResultStage {
    pub fn new(name: impl Into<String>, result: impl Into<Message>) -> Self {
        Self {
            core: StageCore::new(name),
            result: result.into(),
        }
    }

    pub fn with_max_threads(mut self, max_threads: usize) -> Self {
        self.core = self.core.with_max_threads(max_threads);
        self
    }

    pub fn with_forward(mut self, forward: Forward) -> Self {
        self.core = self.core.with_forward(forward);
        self
    }
}

impl Stage for FixedResultStage {
    fn core(&self) -> &StageCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut StageCore {
        &mut self.core
    }

    fn configure(&mut self) -> std::result::Result<(), ConfigurationError> {
        if self.result.is_null() {
            return Err(ConfigurationError::Stage {
                stage: self.core.name().to_string(),
                reason: "no result configured".into(),
            });
        }
        Ok(())
    }

    fn execute(&self, _input: Message, _session: &mut Session) -> Result<PipeRunResult> {
        Ok(PipeRunResult::success(self.result.clone()))
    }
}

/// A mapping stage that transforms each message
pub struct MapStage<F>
where
    F: Fn(Message, &mut Session) -> Result<Message> + Send + Sync,
{
    core: StageCore,
    mapper: F,
}

impl<F> MapStage<F>
where
    F: Fn(Message, &mut Session) -> Result<Message> + Send + Sync,
{
    /// Create a new map stage
    pub fn new(name: impl Into<String>, mapper: F) -> Self {
        Self {
            core: StageCore::new(name),
            mapper,
        }
    }

    pub fn with_max_threads(mut self, max_threads: usize) -> Self {
        self.core = self.core.with_max_threads(max_threads);
        self
    }

    pub fn with_forward(mut self, forward: Forward) -> Self {
        self.core = self.core.with_forward(forward);
        self
    }
}

impl<F> Stage for MapStage<F>
where
    F: Fn(Message, &mut Session) -> Result<Message> + Send + Sync,
{
    fn core(&self) -> &StageCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut StageCore {
        &mut self.core
    }

    fn execute(&self, input: Message, session: &mut Session) -> Result<PipeRunResult> {
        let output = (self.mapper)(input, session).map_err(|e| e.in_stage(self.core.name()))?;
        Ok(PipeRunResult::success(output))
    }
}

/// Passes its input through on the forward chosen by a selector
pub struct SwitchStage<F>
where
    F: Fn(&Message, &Session) -> String + Send + Sync,
{
    core: StageCore,
    selector: F,
}

impl<F> SwitchStage<F>
where
    F: Fn(&Message, &Session) -> String + Send + Sync,
{
    /// Create a new switch stage
    pub fn new(name: impl Into<String>, selector: F) -> Self {
        Self {
            core: StageCore::new(name),
            selector,
        }
    }

    pub fn with_max_threads(mut self, max_threads: usize) -> Self {
        self.core = self.core.with_max_threads(max_threads);
        self
    }

    pub fn with_forward(mut self, forward: Forward) -> Self {
        self.core = self.core.with_forward(forward);
        self
    }
}

impl<F> Stage for SwitchStage<F>
where
    F: Fn(&Message, &Session) -> String + Send + Sync,
{
    fn core(&self) -> &StageCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut StageCore {
        &mut self.core
    }

    fn execute(&self, input: Message, session: &mut Session) -> Result<PipeRunResult> {
        let forward = (self.selector)(&input, session);
        Ok(PipeRunResult::new(input, forward))
    }
}
