use crate::error::{ConfigurationError, StageError, StartError};
use crate::forward::{Forward, PipelineExit};
use crate::message::Message;
use crate::session::Session;
use crate::stage::Stage;
use crate::statistics::{StatisticsKeeper, StatisticsSnapshot};
use crate::throttle::{Semaphore, Throttle};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use ulid::Ulid;

/// Final outcome of one traversal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineResult {
    /// String form of the last stage's output
    pub result: String,
    /// State of the exit that ended the traversal
    pub state: String,
}

impl PipelineResult {
    pub fn new(result: impl Into<String>, state: impl Into<String>) -> Self {
        Self {
            result: result.into(),
            state: state.into(),
        }
    }
}

/// Builder for constructing pipelines
pub struct PipelineBuilder {
    owner: String,
    stages: Vec<Box<dyn Stage>>,
    forwards: Vec<Forward>,
    exits: Vec<PipelineExit>,
    first_stage: Option<String>,
    log_intermediary_results: bool,
}

impl PipelineBuilder {
    /// Create a new pipeline builder
    pub fn new() -> Self {
        Self {
            owner: String::from("-none-"),
            stages: Vec::new(),
            forwards: Vec::new(),
            exits: Vec::new(),
            first_stage: None,
            log_intermediary_results: false,
        }
    }

    /// Name used in log lines; adapters overwrite it with their own name
    pub fn owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = owner.into();
        self
    }

    /// Add a stage to the pipeline
    pub fn add_stage(mut self, stage: impl Stage + 'static) -> Self {
        self.stages.push(Box::new(stage));
        self
    }

    pub fn add_boxed_stage(mut self, stage: Box<dyn Stage>) -> Self {
        self.stages.push(stage);
        self
    }

    /// Add a forward that applies to every stage
    pub fn global_forward(mut self, name: impl Into<String>, path: impl Into<String>) -> Self {
        self.forwards.push(Forward::new(name, path));
        self
    }

    pub fn exit(mut self, path: impl Into<String>, state: impl Into<String>) -> Self {
        self.exits.push(PipelineExit::new(path, state));
        self
    }

    pub fn first_stage(mut self, name: impl Into<String>) -> Self {
        self.first_stage = Some(name.into());
        self
    }

    /// Log the payload before each stage call (debug level)
    pub fn log_intermediary_results(mut self, enable: bool) -> Self {
        self.log_intermediary_results = enable;
        self
    }

    /// Build the pipeline. The result still has to be configured.
    pub fn build(self) -> Result<Pipeline, ConfigurationError> {
        let mut pipeline = Pipeline::new(self.owner);
        pipeline.set_log_intermediary_results(self.log_intermediary_results);
        // globals first, so they take precedence over implicit stage-name forwards
        for forward in self.forwards {
            pipeline.register_forward(forward);
        }
        for stage in self.stages {
            pipeline.add_boxed_stage(stage)?;
        }
        for exit in self.exits {
            pipeline.register_exit(exit);
        }
        if let Some(first) = self.first_stage {
            pipeline.set_first_stage(first);
        }
        Ok(pipeline)
    }
}

impl Default for PipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Processor and keeper of a line of stages.
///
/// Stages, forwards and exits are registered during configuration and are
/// read-only afterwards; [`process`](Self::process) may then be called from
/// any number of threads at once.
pub struct Pipeline {
    owner: String,
    stages: Vec<Box<dyn Stage>>,
    index: HashMap<String, usize>,
    global_forwards: BTreeMap<String, Forward>,
    exits: HashMap<String, PipelineExit>,
    first_stage: Option<String>,
    statistics: HashMap<String, StatisticsKeeper>,
    waiting_statistics: HashMap<String, StatisticsKeeper>,
    throttle: Throttle,
    log_intermediary_results: bool,
}

impl Pipeline {
    pub fn new(owner: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            stages: Vec::new(),
            index: HashMap::new(),
            global_forwards: BTreeMap::new(),
            exits: HashMap::new(),
            first_stage: None,
            statistics: HashMap::new(),
            waiting_statistics: HashMap::new(),
            throttle: Throttle::new(),
            log_intermediary_results: false,
        }
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn set_owner(&mut self, owner: impl Into<String>) {
        self.owner = owner.into();
    }

    pub fn set_log_intermediary_results(&mut self, enable: bool) {
        self.log_intermediary_results = enable;
    }

    /// Register a stage.
    ///
    /// Also registers a global forward named after the stage, pointing at
    /// it, unless a global forward of that name exists already.
    pub fn add_stage(&mut self, stage: impl Stage + 'static) -> Result<(), ConfigurationError> {
        self.add_boxed_stage(Box::new(stage))
    }

    pub fn add_boxed_stage(&mut self, stage: Box<dyn Stage>) -> Result<(), ConfigurationError> {
        let name = stage.name().to_string();
        if name.is_empty() {
            return Err(ConfigurationError::Invalid(format!(
                "pipeline of [{}] got a stage without a name",
                self.owner
            )));
        }
        if self.index.contains_key(&name) {
            return Err(ConfigurationError::DuplicateStage(name));
        }

        self.statistics
            .insert(name.clone(), StatisticsKeeper::new(name.clone()));
        if stage.max_threads() > 0 {
            self.waiting_statistics
                .insert(name.clone(), StatisticsKeeper::new(name.clone()));
        }
        self.throttle.register(&name, stage.max_threads());
        tracing::debug!(owner = %self.owner, stage = %name, max_threads = stage.max_threads(), "added stage");

        if self.global_forwards.contains_key(&name) {
            tracing::info!(
                owner = %self.owner,
                stage = %name,
                "already had a global forward with this name, skipping implicit stage forward"
            );
        } else {
            self.register_forward(Forward::new(name.clone(), name.clone()));
        }

        self.index.insert(name, self.stages.len());
        self.stages.push(stage);
        Ok(())
    }

    /// Register a global forward; a later one with the same name replaces it
    pub fn register_forward(&mut self, forward: Forward) {
        tracing::debug!(owner = %self.owner, "registered global {}", forward);
        self.global_forwards.insert(forward.name.clone(), forward);
    }

    pub fn register_exit(&mut self, exit: PipelineExit) {
        self.exits.insert(exit.path.clone(), exit);
    }

    pub fn set_first_stage(&mut self, name: impl Into<String>) {
        self.first_stage = Some(name.into());
    }

    pub fn first_stage(&self) -> Option<&str> {
        self.first_stage.as_deref()
    }

    /// Validate the pipeline, hand the global forwards to every stage and
    /// configure the stages.
    pub fn configure(&mut self) -> Result<(), ConfigurationError> {
        if self.exits.is_empty() {
            return Err(ConfigurationError::NoExits);
        }
        let first = self
            .first_stage
            .as_deref()
            .ok_or(ConfigurationError::NoFirstStage)?;
        if !self.index.contains_key(first) {
            return Err(ConfigurationError::FirstStageNotFound(first.to_string()));
        }

        for stage in &mut self.stages {
            tracing::debug!(owner = %self.owner, stage = %stage.name(), "configuring stage");
            // stages keep their own forwards of the same name
            for forward in self.global_forwards.values() {
                stage.register_forward(forward.clone());
            }
            stage.configure()?;
            tracing::debug!(owner = %self.owner, stage = %stage.name(), "stage successfully configured");
        }
        tracing::debug!(owner = %self.owner, "pipeline successfully configured");
        Ok(())
    }

    /// Process a message with a fresh session
    pub fn process(&self, message_id: Option<&str>, message: Message) -> Result<PipelineResult, StageError> {
        let mut session = Session::new();
        self.process_with_session(message_id, message, &mut session)
    }

    /// Route `message` from the first stage until an exit is reached.
    ///
    /// The session is reset and seeded with the message and its id; a
    /// missing id is replaced by a generated one.
    pub fn process_with_session(
        &self,
        message_id: Option<&str>,
        message: Message,
        session: &mut Session,
    ) -> Result<PipelineResult, StageError> {
        let message_id = match message_id {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => {
                let id = Ulid::new().to_string();
                tracing::warn!(owner = %self.owner, "no value for messageId, setting to [{}]", id);
                id
            }
        };
        if message.is_null() {
            return Err(StageError::unattributed(format!(
                "pipeline of [{}] received null message",
                self.owner
            )));
        }
        session.reset(&message, &message_id);

        let mut current = self
            .first_stage
            .as_deref()
            .and_then(|name| self.index.get(name))
            .map(|&i| self.stages[i].as_ref())
            .ok_or_else(|| {
                StageError::unattributed(format!("pipeline of [{}] is not configured", self.owner))
            })?;
        let mut payload = message;

        loop {
            let name = current.name();
            if self.log_intermediary_results {
                tracing::debug!(owner = %self.owner, message_id = %message_id, stage = %name, current_result = %payload, "about to call stage");
            } else {
                tracing::debug!(owner = %self.owner, message_id = %message_id, stage = %name, "about to call stage");
            }

            let stage_start = Instant::now();
            let (outcome, waited) = self
                .throttle
                .guard(name, self.waiting_statistics.get(name), || {
                    current.execute(payload, session)
                })
                .map_err(|e| StageError::new(name, "interrupted waiting for stage").with_source(e))?;
            if let Some(keeper) = self.statistics.get(name) {
                keeper.record(stage_start.elapsed().saturating_sub(waited));
            }

            let run = outcome.map_err(|e| e.in_stage(name))?;
            if run.forward.is_empty() {
                return Err(StageError::new(
                    name,
                    format!("pipeline of [{}] received result without a forward", self.owner),
                ));
            }

            let path = current
                .find_forward(&run.forward)
                .map(|f| f.path.as_str())
                .unwrap_or(run.forward.as_str());
            if path.is_empty() {
                return Err(StageError::new(
                    name,
                    format!(
                        "pipeline of [{}] got an empty path for forward [{}]; check the configuration, probably forwards are not defined for this stage",
                        self.owner, run.forward
                    ),
                ));
            }

            if let Some(exit) = self.exits.get(path) {
                let result = run.result.to_string();
                tracing::debug!(
                    owner = %self.owner,
                    message_id = %message_id,
                    exit_state = %exit.state,
                    "finished processing message"
                );
                return Ok(PipelineResult::new(result, exit.state.clone()));
            }

            let next = match self.index.get(path) {
                Some(&i) => self.stages[i].as_ref(),
                None => {
                    return Err(StageError::new(
                        name,
                        format!(
                            "pipeline of [{}] got an erroneous definition: forward [{}] points to [{}], which is neither a stage nor an exit",
                            self.owner, run.forward, path
                        ),
                    ))
                }
            };
            current = next;
            payload = run.result;
        }
    }

    /// Start every stage, in registration order
    pub fn start(&self) -> Result<(), StartError> {
        tracing::info!(owner = %self.owner, "starting pipeline");
        for stage in &self.stages {
            tracing::debug!(owner = %self.owner, stage = %stage.name(), "starting stage");
            stage.start()?;
            tracing::debug!(owner = %self.owner, stage = %stage.name(), "successfully started stage");
        }
        tracing::info!(owner = %self.owner, "pipeline successfully started");
        Ok(())
    }

    /// Stop every stage, in registration order (not reversed)
    pub fn stop(&self) {
        tracing::info!(owner = %self.owner, "closing pipeline");
        for stage in &self.stages {
            tracing::debug!(owner = %self.owner, stage = %stage.name(), "stopping stage");
            stage.stop();
        }
        tracing::debug!(owner = %self.owner, "pipeline successfully closed");
    }

    /// Fail every message currently waiting for a throttled stage
    pub fn interrupt_waiting(&self) {
        self.throttle.interrupt_waiting();
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Stage names in registration order
    pub fn stage_names(&self) -> impl Iterator<Item = &str> {
        self.stages.iter().map(|s| s.name())
    }

    pub fn exits(&self) -> impl Iterator<Item = &PipelineExit> {
        self.exits.values()
    }

    /// Processing-time statistics of a stage
    pub fn stage_statistics(&self, stage: &str) -> Option<&StatisticsKeeper> {
        self.statistics.get(stage)
    }

    /// Waiting-time statistics of a bounded stage
    pub fn waiting_statistics(&self, stage: &str) -> Option<&StatisticsKeeper> {
        self.waiting_statistics.get(stage)
    }

    /// Concurrency guard of a bounded stage
    pub fn stage_semaphore(&self, stage: &str) -> Option<&Arc<Semaphore>> {
        self.throttle.semaphore(stage)
    }

    /// Snapshots of every stage's statistics, in registration order
    pub fn statistics_snapshot(&self) -> Vec<(StatisticsSnapshot, Option<StatisticsSnapshot>)> {
        self.stages
            .iter()
            .filter_map(|s| {
                let processing = self.statistics.get(s.name())?.snapshot();
                let waiting = self.waiting_statistics.get(s.name()).map(|k| k.snapshot());
                Some((processing, waiting))
            })
            .collect()
    }

    /// Get a summary of all statistics
    pub fn metrics_summary(&self) -> String {
        let mut summary = format!("Pipeline of [{}] Statistics Summary:\n", self.owner);
        for (processing, waiting) in self.statistics_snapshot() {
            summary.push_str(&format!("  {}\n", processing.format()));
            if let Some(waiting) = waiting {
                summary.push_str(&format!("    waiting {}\n", waiting.format()));
            }
        }
        summary
    }
}

impl fmt::Display for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[owner={}]", self.owner)?;
        write!(f, "[firstStage={}]", self.first_stage.as_deref().unwrap_or("-none-"))?;
        for stage in &self.stages {
            write!(f, "[{}]", stage.name())?;
        }
        let mut exits: Vec<_> = self.exits.values().collect();
        exits.sort_by(|a, b| a.path.cmp(&b.path));
        for exit in exits {
            write!(f, "[path:{} state:{}]", exit.path, exit.state)?;
        }
        Ok(())
    }
}
