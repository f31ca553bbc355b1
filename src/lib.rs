//! A message-processing adapter built around forward-routed stage pipelines.
//!
//! A [`Pipeline`] walks one message through a set of named stages. Each stage
//! returns a result and the name of a forward; the forward resolves to the
//! next stage or to an exit, which ends the traversal with an exit state.
//! An [`Adapter`] binds one pipeline to its [`Receiver`]s, supervises their
//! lifecycle and turns every failure into an error result.
//!
//! # Features
//!
//! - Per-stage concurrency limits with waiting-time statistics
//! - Global and stage-local forwards, with implicit stage-name forwards
//! - Graceful shutdown that drains in-flight messages
//! - Processing statistics and a capped operational log
//! - Builder pattern for pipelines and adapters
//!
//! # Example
//!
//! ```no_run
//! use pipe_adapter::{AdapterBuilder, AdapterConfig, EchoStage, Forward, PipelineBuilder};
//!
//! let pipeline = PipelineBuilder::new()
//!     .add_stage(EchoStage::new("echo").with_forward(Forward::new("success", "done")))
//!     .exit("done", "success")
//!     .first_stage("echo")
//!     .build()?;
//!
//! let adapter = AdapterBuilder::new(AdapterConfig::new("echo-adapter"))
//!     .pipeline(pipeline)
//!     .build()?;
//! adapter.configure()?;
//! let lifecycle = adapter.spawn()?;
//!
//! let result = adapter.process_message(Some("msg-1"), "hello");
//! adapter.stop();
//! # let _ = (result, lifecycle);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod adapter;
pub mod config;
pub mod error;
pub mod formatter;
pub mod forward;
pub mod logging;
pub mod message;
pub mod message_keeper;
pub mod pipeline;
pub mod receiver;
pub mod registry;
pub mod run_state;
pub mod session;
pub mod stage;
pub mod statistics;
pub mod throttle;

// Re-exports for convenience
pub use adapter::{Adapter, AdapterBuilder};
pub use config::AdapterConfig;
pub use error::{
    AdapterError, ConfigurationError, Interrupted, ReceiverError, Result, StageError, StartError,
};
pub use formatter::{DefaultErrorMessageFormatter, ErrorContext, ErrorLocation, ErrorMessageFormatter};
pub use forward::{Forward, ForwardTable, PipelineExit};
pub use message::Message;
pub use message_keeper::{KeptMessage, MessageKeeper, MessageLevel};
pub use pipeline::{Pipeline, PipelineBuilder, PipelineResult};
pub use receiver::{ChannelReceiver, MessageSender, Receiver, ThreadCountControllable};
pub use registry::{StageDefinition, StageRegistry};
pub use run_state::{RunState, RunStateManager};
pub use session::Session;
pub use stage::{EchoStage, FixedResultStage, MapStage, PipeRunResult, Stage, StageCore, SwitchStage};
pub use statistics::{StatisticsKeeper, StatisticsSnapshot};
pub use throttle::{Semaphore, Throttle};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
