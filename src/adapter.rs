use crate::config::AdapterConfig;
use crate::error::{AdapterError, ConfigurationError, Interrupted, ReceiverError, StartError};
use crate::formatter::{DefaultErrorMessageFormatter, ErrorContext, ErrorLocation, ErrorMessageFormatter};
use crate::message::Message;
use crate::message_keeper::{KeptMessage, MessageKeeper, MessageLevel};
use crate::pipeline::{Pipeline, PipelineResult};
use crate::receiver::Receiver;
use crate::run_state::{RunState, RunStateManager};
use crate::session::Session;
use crate::statistics::{StatisticsKeeper, StatisticsSnapshot};
use chrono::{DateTime, Timelike, Utc};
use parking_lot::{Condvar, Mutex, RwLock, RwLockReadGuard};
use std::any::Any;
use std::fmt::Display;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use ulid::Ulid;

/// Builder for constructing adapters
pub struct AdapterBuilder {
    config: AdapterConfig,
    pipeline: Option<Pipeline>,
    receivers: Vec<Arc<dyn Receiver>>,
    formatter: Option<Box<dyn ErrorMessageFormatter>>,
}

impl AdapterBuilder {
    pub fn new(config: AdapterConfig) -> Self {
        Self {
            config,
            pipeline: None,
            receivers: Vec::new(),
            formatter: None,
        }
    }

    pub fn pipeline(mut self, pipeline: Pipeline) -> Self {
        self.pipeline = Some(pipeline);
        self
    }

    /// Register a receiver; inactive receivers are skipped
    pub fn receiver(mut self, receiver: Arc<dyn Receiver>) -> Self {
        if receiver.is_active() {
            tracing::debug!(adapter = %self.config.name, receiver = %receiver.name(), "registered receiver");
            self.receivers.push(receiver);
        } else {
            tracing::debug!(adapter = %self.config.name, receiver = %receiver.name(), "did not register inactive receiver");
        }
        self
    }

    pub fn error_formatter(mut self, formatter: impl ErrorMessageFormatter + 'static) -> Self {
        self.formatter = Some(Box::new(formatter));
        self
    }

    pub fn build(self) -> Result<Arc<Adapter>, ConfigurationError> {
        self.config.validate()?;
        let pipeline = self.pipeline.ok_or_else(|| {
            ConfigurationError::Invalid(format!("no pipeline configured for adapter [{}]", self.config.name))
        })?;
        let formatter = self
            .formatter
            .unwrap_or_else(|| Box::new(DefaultErrorMessageFormatter::new()));

        Ok(Arc::new(Adapter {
            message_keeper: MessageKeeper::new(self.config.message_keeper_size),
            processing_duration: StatisticsKeeper::new(self.config.name.clone()),
            config: self.config,
            pipeline: RwLock::new(pipeline),
            receivers: self.receivers,
            run_state: RunStateManager::new(),
            configuration_succeeded: AtomicBool::new(false),
            in_process: Mutex::new(0),
            drained: Condvar::new(),
            processed: AtomicU64::new(0),
            in_error: AtomicU64::new(0),
            last_message: Mutex::new(None),
            started_by_hour: std::array::from_fn(|_| AtomicU64::new(0)),
            up_since: Utc::now(),
            formatter,
        }))
    }
}

/// Decrements the in-process count when dropped, on every exit path
struct InProcessGuard<'a> {
    adapter: &'a Adapter,
    start: Instant,
}

impl Drop for InProcessGuard<'_> {
    fn drop(&mut self) {
        self.adapter.leave_in_process(self.start.elapsed());
    }
}

/// Binds one pipeline to its receivers and supervises their lifecycle.
///
/// `process_message` is safe to call from many threads at once; the
/// lifecycle loop ([`start`](Self::start)) runs on a thread of its own.
pub struct Adapter {
    config: AdapterConfig,
    pipeline: RwLock<Pipeline>,
    receivers: Vec<Arc<dyn Receiver>>,
    run_state: RunStateManager,
    configuration_succeeded: AtomicBool,
    in_process: Mutex<usize>,
    drained: Condvar,
    processed: AtomicU64,
    in_error: AtomicU64,
    last_message: Mutex<Option<DateTime<Utc>>>,
    started_by_hour: [AtomicU64; 24],
    processing_duration: StatisticsKeeper,
    up_since: DateTime<Utc>,
    formatter: Box<dyn ErrorMessageFormatter>,
    message_keeper: MessageKeeper,
}

impl Adapter {
    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn description(&self) -> Option<&str> {
        self.config.description.as_deref()
    }

    pub fn config(&self) -> &AdapterConfig {
        &self.config
    }

    pub fn error_state(&self) -> &str {
        &self.config.error_state
    }

    pub fn configuration_succeeded(&self) -> bool {
        self.configuration_succeeded.load(Ordering::SeqCst)
    }

    /// Configure the pipeline, then every receiver.
    ///
    /// Pipeline failures are returned. Receiver failures are recorded as
    /// warnings and do not stop the others from being configured.
    pub fn configure(self: &Arc<Self>) -> Result<(), ConfigurationError> {
        self.configuration_succeeded.store(false, Ordering::SeqCst);
        tracing::debug!(adapter = %self.name(), "configuring adapter");

        {
            let mut pipeline = self.pipeline.write();
            pipeline.set_owner(self.config.name.clone());
            pipeline.set_log_intermediary_results(self.config.log_intermediary_results);
            if let Err(e) = pipeline.configure() {
                self.error("error initializing pipeline", &e);
                return Err(e);
            }
        }
        self.message_keeper.info("pipeline successfully configured");

        for receiver in &self.receivers {
            tracing::info!(adapter = %self.name(), receiver = %receiver.name(), "initializing receiver");
            receiver.bind_adapter(Arc::downgrade(self));
            match receiver.configure() {
                Ok(()) => self
                    .message_keeper
                    .info(format!("receiver [{}] successfully configured", receiver.name())),
                Err(e) => self.warn(format!("error initializing receiver [{}]: {}", receiver.name(), e)),
            }
        }

        self.configuration_succeeded.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Process a message with a fresh session.
    ///
    /// Never fails: every failure is turned into a result carrying the
    /// configured error state and a formatted error message.
    pub fn process_message(&self, message_id: Option<&str>, message: impl Into<Message>) -> PipelineResult {
        let mut session = Session::new();
        self.process_message_with_session(message_id, message.into(), &mut session)
    }

    pub fn process_message_with_session(
        &self,
        message_id: Option<&str>,
        message: Message,
        session: &mut Session,
    ) -> PipelineResult {
        let received = Utc::now();
        let message_id = resolve_message_id(self.name(), message_id);
        let original = message.clone();

        match self.process_message_with_errors(Some(&message_id), message, session) {
            Ok(result) => result,
            Err(e) => {
                let (text, location) = match &e {
                    AdapterError::IllegalState { .. } => ("illegal state", Some(ErrorLocation::Adapter(self.name()))),
                    AdapterError::Pipeline(se) => (
                        "error during pipeline processing",
                        se.stage().map(ErrorLocation::Stage),
                    ),
                    AdapterError::Unexpected(_) => (
                        "unexpected failure",
                        Some(ErrorLocation::Adapter(self.name())),
                    ),
                };
                let context = ErrorContext {
                    message: text,
                    cause: Some(&e),
                    location,
                    original_message: &original,
                    message_id: &message_id,
                    received,
                };
                let result = PipelineResult::new(self.format_error_message(&context), self.error_state());
                tracing::debug!(
                    adapter = %self.name(),
                    message_id = %message_id,
                    exit_state = %result.state,
                    "got error result from pipeline"
                );
                result
            }
        }
    }

    /// Process a message, returning failures as errors.
    ///
    /// Stage errors and panics raised while processing are counted and
    /// logged here; a panic is reported as [`AdapterError::Unexpected`].
    pub fn process_message_with_errors(
        &self,
        message_id: Option<&str>,
        message: Message,
        session: &mut Session,
    ) -> Result<PipelineResult, AdapterError> {
        let state = self.run_state.get();
        if state != RunState::Started && state != RunState::Stopping {
            tracing::warn!(adapter = %self.name(), state = %state, "cannot process message");
            return Err(AdapterError::IllegalState {
                adapter: self.name().to_string(),
                state,
            });
        }

        let message_id = resolve_message_id(self.name(), message_id);
        let _guard = self.enter_in_process();
        tracing::info!(adapter = %self.name(), message_id = %message_id, "received message");

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            self.pipeline
                .read()
                .process_with_session(Some(&message_id), message, session)
        }));

        match outcome {
            Ok(Ok(result)) => {
                tracing::info!(
                    adapter = %self.name(),
                    message_id = %message_id,
                    exit_state = %result.state,
                    "completed message"
                );
                Ok(result)
            }
            Ok(Err(e)) => {
                self.in_error.fetch_add(1, Ordering::SeqCst);
                self.error(format!("error processing message with messageId [{}]", message_id), &e);
                Err(AdapterError::Pipeline(e))
            }
            Err(payload) => {
                self.in_error.fetch_add(1, Ordering::SeqCst);
                let reason = panic_reason(payload.as_ref());
                self.error(
                    format!("unexpected failure processing message with messageId [{}]", message_id),
                    &reason,
                );
                Err(AdapterError::Unexpected(reason))
            }
        }
    }

    /// Lifecycle loop.
    ///
    /// Starts the pipeline and the receivers, blocks until [`stop`](Self::stop)
    /// is called, then stops the receivers, waits for in-process messages,
    /// stops the pipeline and ends in [`RunState::Stopped`].
    pub fn start(&self) -> Result<(), StartError> {
        if !self.configuration_succeeded() {
            tracing::error!(adapter = %self.name(), "configuration did not succeed, cannot start adapter");
            self.warn("configuration did not succeed. Starting the adapter is not possible");
            self.run_state.set(RunState::Error);
            return Err(StartError::NotConfigured(self.name().to_string()));
        }
        if let Err(current) = self
            .run_state
            .transition_from(&[RunState::Stopped], RunState::Starting)
        {
            self.warn(format!("currently in state [{}], ignoring start() command", current));
            return Ok(());
        }

        tracing::debug!(adapter = %self.name(), "starting pipeline");
        if let Err(e) = self.pipeline.read().start() {
            self.error("got error starting pipeline", &e);
            self.run_state.set(RunState::Error);
            return Err(e);
        }

        self.run_state.set(RunState::Started);
        self.message_keeper.info("Adapter up and running");
        tracing::info!(adapter = %self.name(), "up and running");

        for receiver in &self.receivers {
            if receiver.run_state() == RunState::Error {
                tracing::warn!(adapter = %self.name(), receiver = %receiver.name(), "will not start receiver as it is in state ERROR");
                continue;
            }
            tracing::info!(adapter = %self.name(), receiver = %receiver.name(), "starting receiver");
            receiver.start_running();
        }

        if self.run_state.wait_for_state(RunState::Stopping).is_err() {
            self.error("interrupted while running", &Interrupted);
            self.stop_receivers();
            self.pipeline.read().stop();
            self.run_state.set(RunState::Error);
            return Err(StartError::Interrupted(self.name().to_string()));
        }

        self.shutdown();
        Ok(())
    }

    /// Run [`start`](Self::start) on a dedicated thread
    pub fn spawn(self: &Arc<Self>) -> std::io::Result<JoinHandle<Result<(), StartError>>> {
        let adapter = Arc::clone(self);
        thread::Builder::new()
            .name(format!("adapter {}", self.name()))
            .spawn(move || adapter.start())
    }

    fn shutdown(&self) {
        // a stop() racing the receiver start loop may have found them still stopped
        self.stop_receivers();
        for receiver in &self.receivers {
            if receiver.run_state() == RunState::Error {
                continue;
            }
            match receiver.wait_for_state(RunState::Stopped) {
                Ok(()) => tracing::info!(adapter = %self.name(), receiver = %receiver.name(), "stopped receiver"),
                Err(e) => self.error(format!("gave up waiting for receiver [{}] to stop", receiver.name()), &e),
            }
        }

        let in_process = self.in_flight_count();
        if in_process > 0 {
            self.warn(format!(
                "is being stopped while still processing {} messages, waiting for them to finish",
                in_process
            ));
        }
        if !self.wait_for_no_messages_in_process(self.config.drain_timeout()) {
            self.warn(format!(
                "drain timeout expired with {} messages in process, interrupting stages waiting for a permit",
                self.in_flight_count()
            ));
            self.pipeline.read().interrupt_waiting();
        }

        tracing::debug!(adapter = %self.name(), "stopping pipeline");
        self.pipeline.read().stop();
        self.run_state.set(RunState::Stopped);
        self.message_keeper.info("Adapter stopped");
        tracing::info!(adapter = %self.name(), "stopped");
    }

    /// Ask the lifecycle loop to stop.
    ///
    /// From [`RunState::Started`] this moves to [`RunState::Stopping`] and
    /// asks each receiver to stop; from [`RunState::Error`] it moves straight
    /// to [`RunState::Stopped`]. Other states ignore the command. Receiver
    /// failures are collected and returned, never raised.
    pub fn stop(&self) -> Vec<ReceiverError> {
        match self
            .run_state
            .transition_from(&[RunState::Started, RunState::Error], RunState::Stopping)
        {
            Ok(RunState::Error) => {
                self.run_state.set(RunState::Stopped);
                self.message_keeper.info("Adapter stopped");
                return Vec::new();
            }
            Ok(_) => {}
            Err(current) => {
                self.warn(format!("in state [{}] while stop command is issued, ignoring command", current));
                return Vec::new();
            }
        }

        self.stop_receivers()
    }

    /// Ask every receiver to stop, collecting failures
    fn stop_receivers(&self) -> Vec<ReceiverError> {
        tracing::debug!(adapter = %self.name(), "stopping receivers");
        let mut failures = Vec::new();
        for receiver in &self.receivers {
            match receiver.stop_running() {
                Ok(()) => tracing::info!(adapter = %self.name(), receiver = %receiver.name(), "asked receiver to stop"),
                Err(e) => {
                    self.error(
                        format!("received error while stopping receiver [{}], ignoring this", receiver.name()),
                        &e,
                    );
                    failures.push(e);
                }
            }
        }
        failures
    }

    /// Wake the lifecycle loop and any other state waiter with [`Interrupted`]
    pub fn interrupt(&self) {
        self.run_state.interrupt();
    }

    pub fn run_state(&self) -> RunState {
        self.run_state.get()
    }

    pub fn wait_for_state(&self, state: RunState) -> Result<(), Interrupted> {
        self.run_state.wait_for_state(state)
    }

    pub fn wait_for_state_timeout(&self, state: RunState, timeout: Duration) -> Result<bool, Interrupted> {
        self.run_state.wait_for_state_timeout(state, timeout)
    }

    /// Block until no message is in process.
    ///
    /// Returns `false` when `timeout` expires first; `None` waits without limit.
    pub fn wait_for_no_messages_in_process(&self, timeout: Option<Duration>) -> bool {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut in_process = self.in_process.lock();
        while *in_process > 0 {
            match deadline {
                Some(deadline) => {
                    if self.drained.wait_until(&mut in_process, deadline).timed_out() {
                        return *in_process == 0;
                    }
                }
                None => self.drained.wait(&mut in_process),
            }
        }
        true
    }

    pub fn in_flight_count(&self) -> usize {
        *self.in_process.lock()
    }

    pub fn processed_count(&self) -> u64 {
        self.processed.load(Ordering::SeqCst)
    }

    pub fn error_count(&self) -> u64 {
        self.in_error.load(Ordering::SeqCst)
    }

    pub fn last_message_date(&self) -> Option<DateTime<Utc>> {
        *self.last_message.lock()
    }

    pub fn up_since(&self) -> DateTime<Utc> {
        self.up_since
    }

    /// Number of messages started per UTC hour of the day
    pub fn messages_started_by_hour(&self) -> [u64; 24] {
        std::array::from_fn(|hour| self.started_by_hour[hour].load(Ordering::Relaxed))
    }

    /// End-to-end processing time of accepted messages
    pub fn processing_statistics(&self) -> StatisticsSnapshot {
        self.processing_duration.snapshot()
    }

    /// Recent operational notices, oldest first
    pub fn operational_log(&self) -> Vec<KeptMessage> {
        self.message_keeper.snapshot()
    }

    pub fn pipeline(&self) -> RwLockReadGuard<'_, Pipeline> {
        self.pipeline.read()
    }

    pub fn receivers(&self) -> &[Arc<dyn Receiver>] {
        &self.receivers
    }

    pub fn receiver_by_name(&self, name: &str) -> Option<&Arc<dyn Receiver>> {
        self.receivers
            .iter()
            .find(|r| r.name().eq_ignore_ascii_case(name))
    }

    fn enter_in_process(&self) -> InProcessGuard<'_> {
        let now = Utc::now();
        *self.in_process.lock() += 1;
        *self.last_message.lock() = Some(now);
        self.started_by_hour[now.hour() as usize].fetch_add(1, Ordering::Relaxed);
        InProcessGuard {
            adapter: self,
            start: Instant::now(),
        }
    }

    fn leave_in_process(&self, duration: Duration) {
        let mut in_process = self.in_process.lock();
        *in_process = in_process.saturating_sub(1);
        self.processed.fetch_add(1, Ordering::SeqCst);
        self.processing_duration.record(duration);
        self.drained.notify_all();
    }

    fn format_error_message(&self, context: &ErrorContext<'_>) -> String {
        match panic::catch_unwind(AssertUnwindSafe(|| self.formatter.format(context))) {
            Ok(Ok(formatted)) => {
                tracing::debug!(adapter = %self.name(), message_id = %context.message_id, "formatted error message");
                formatted
            }
            Ok(Err(e)) => {
                self.error("got error while formatting error message", &e);
                context.message.to_string()
            }
            Err(payload) => {
                self.error("got error while formatting error message", &panic_reason(payload.as_ref()));
                context.message.to_string()
            }
        }
    }

    fn warn(&self, msg: impl Display) {
        tracing::warn!(adapter = %self.name(), "{}", msg);
        self.message_keeper
            .add(format!("WARNING: {}", msg), MessageLevel::Warn);
    }

    fn error(&self, msg: impl Display, cause: &dyn Display) {
        tracing::error!(adapter = %self.name(), "{}: {}", msg, cause);
        self.message_keeper
            .add(format!("ERROR: {}: {}", msg, cause), MessageLevel::Error);
    }
}

fn resolve_message_id(adapter: &str, message_id: Option<&str>) -> String {
    match message_id {
        Some(id) if !id.is_empty() => id.to_string(),
        _ => {
            let id = Ulid::new().to_string();
            tracing::debug!(adapter = %adapter, "no messageId, setting to [{}]", id);
            id
        }
    }
}

fn panic_reason(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic with a non-string payload".to_string()
    }
}
