use crate::adapter::Adapter;
use crate::error::{ConfigurationError, Interrupted, ReceiverError};
use crate::message::Message;
use crate::pipeline::PipelineResult;
use crate::run_state::{RunState, RunStateManager};
use crossbeam::channel::{self, RecvTimeoutError};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::Duration;

/// How long an idle worker blocks before re-checking for shutdown
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// A source of messages that feeds an [`Adapter`].
///
/// The adapter binds itself during configuration, starts the receiver when
/// it comes up and asks it to stop on shutdown. `stop_running` only asks;
/// the adapter then waits for the receiver to report [`RunState::Stopped`].
pub trait Receiver: Send + Sync {
    fn name(&self) -> &str;

    /// Inactive receivers are not registered with an adapter
    fn is_active(&self) -> bool {
        true
    }

    fn bind_adapter(&self, adapter: Weak<Adapter>);

    fn configure(&self) -> Result<(), ConfigurationError>;

    fn start_running(&self);

    fn stop_running(&self) -> Result<(), ReceiverError>;

    fn run_state(&self) -> RunState;

    fn wait_for_state(&self, state: RunState) -> Result<(), Interrupted>;

    fn as_thread_count_controllable(&self) -> Option<&dyn ThreadCountControllable> {
        None
    }
}

/// Receivers whose number of worker threads can be changed while running
pub trait ThreadCountControllable {
    fn current_thread_count(&self) -> usize;

    fn max_thread_count(&self) -> usize;

    fn increase_thread_count(&self);

    /// Never goes below one worker
    fn decrease_thread_count(&self);
}

struct Envelope {
    message_id: Option<String>,
    message: Message,
    reply: Option<channel::Sender<PipelineResult>>,
}

/// Handle used to push messages into a [`ChannelReceiver`]
#[derive(Clone)]
pub struct MessageSender {
    receiver: String,
    tx: channel::Sender<Envelope>,
}

impl MessageSender {
    /// Queue a message without waiting for its result.
    ///
    /// Blocks while the inbox is full.
    pub fn send(&self, message_id: Option<&str>, message: impl Into<Message>) -> Result<(), ReceiverError> {
        self.push(Envelope {
            message_id: message_id.map(str::to_string),
            message: message.into(),
            reply: None,
        })
    }

    /// Queue a message; its result is delivered on the returned channel
    pub fn request(
        &self,
        message_id: Option<&str>,
        message: impl Into<Message>,
    ) -> Result<channel::Receiver<PipelineResult>, ReceiverError> {
        let (reply_tx, reply_rx) = channel::bounded(1);
        self.push(Envelope {
            message_id: message_id.map(str::to_string),
            message: message.into(),
            reply: Some(reply_tx),
        })?;
        Ok(reply_rx)
    }

    fn push(&self, envelope: Envelope) -> Result<(), ReceiverError> {
        self.tx
            .send(envelope)
            .map_err(|_| ReceiverError::Closed(self.receiver.clone()))
    }
}

struct Inner {
    name: String,
    max_threads: usize,
    rx: channel::Receiver<Envelope>,
    adapter: Mutex<Weak<Adapter>>,
    run_state: RunStateManager,
    active: AtomicBool,
    target_threads: AtomicUsize,
    running_threads: AtomicUsize,
    next_worker_id: AtomicUsize,
    shutdown: AtomicBool,
    received: AtomicU64,
}

/// In-process receiver: a bounded channel drained by a pool of worker
/// threads, each handing messages to the bound adapter.
pub struct ChannelReceiver {
    inner: Arc<Inner>,
}

impl ChannelReceiver {
    /// Create a receiver with `threads` workers and an inbox of `capacity` messages
    pub fn new(name: impl Into<String>, threads: usize, capacity: usize) -> (Arc<Self>, MessageSender) {
        let name = name.into();
        let (tx, rx) = channel::bounded(capacity.max(1));
        let receiver = Arc::new(Self {
            inner: Arc::new(Inner {
                name: name.clone(),
                max_threads: threads,
                rx,
                adapter: Mutex::new(Weak::new()),
                run_state: RunStateManager::new(),
                active: AtomicBool::new(true),
                target_threads: AtomicUsize::new(threads),
                running_threads: AtomicUsize::new(0),
                next_worker_id: AtomicUsize::new(0),
                shutdown: AtomicBool::new(false),
                received: AtomicU64::new(0),
            }),
        });
        (receiver, MessageSender { receiver: name, tx })
    }

    pub fn set_active(&self, active: bool) {
        self.inner.active.store(active, Ordering::SeqCst);
    }

    /// Messages taken from the inbox so far
    pub fn messages_received(&self) -> u64 {
        self.inner.received.load(Ordering::SeqCst)
    }

    /// Messages waiting in the inbox
    pub fn pending(&self) -> usize {
        self.inner.rx.len()
    }

    fn spawn_worker(&self) {
        let inner = Arc::clone(&self.inner);
        let id = inner.next_worker_id.fetch_add(1, Ordering::SeqCst);
        inner.running_threads.fetch_add(1, Ordering::SeqCst);
        let spawned = thread::Builder::new()
            .name(format!("{}-worker-{}", inner.name, id))
            .spawn(move || inner.run_worker());
        if let Err(e) = spawned {
            self.inner.running_threads.fetch_sub(1, Ordering::SeqCst);
            tracing::error!(receiver = %self.inner.name, error = %e, "failed to spawn worker thread");
        }
    }
}

impl Inner {
    fn run_worker(self: Arc<Self>) {
        tracing::debug!(receiver = %self.name, "worker started");
        while !self.shutdown.load(Ordering::SeqCst) {
            let running = self.running_threads.load(Ordering::SeqCst);
            if running > self.target_threads.load(Ordering::SeqCst) {
                if self
                    .running_threads
                    .compare_exchange(running, running - 1, Ordering::SeqCst, Ordering::SeqCst)
                    .is_ok()
                {
                    tracing::debug!(receiver = %self.name, "worker retired");
                    return;
                }
                continue;
            }

            match self.rx.recv_timeout(POLL_INTERVAL) {
                Ok(envelope) => self.handle(envelope),
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        // the last worker out reports the receiver stopped
        if self.running_threads.fetch_sub(1, Ordering::SeqCst) == 1 && self.shutdown.load(Ordering::SeqCst) {
            self.run_state.set(RunState::Stopped);
            tracing::info!(receiver = %self.name, "stopped");
        }
    }

    fn handle(&self, envelope: Envelope) {
        self.received.fetch_add(1, Ordering::SeqCst);
        let Some(adapter) = self.adapter.lock().upgrade() else {
            tracing::error!(receiver = %self.name, "adapter is gone, dropping message");
            return;
        };
        let result = adapter.process_message(envelope.message_id.as_deref(), envelope.message);
        if let Some(reply) = envelope.reply {
            if reply.send(result).is_err() {
                tracing::debug!(receiver = %self.name, "requester went away before the result was ready");
            }
        }
    }
}

impl Receiver for ChannelReceiver {
    fn name(&self) -> &str {
        &self.inner.name
    }

    fn is_active(&self) -> bool {
        self.inner.active.load(Ordering::SeqCst)
    }

    fn bind_adapter(&self, adapter: Weak<Adapter>) {
        *self.inner.adapter.lock() = adapter;
    }

    fn configure(&self) -> Result<(), ConfigurationError> {
        if self.inner.max_threads == 0 {
            self.inner.run_state.set(RunState::Error);
            return Err(ConfigurationError::Receiver {
                receiver: self.inner.name.clone(),
                reason: "number of threads must be at least 1".into(),
            });
        }
        if self.inner.adapter.lock().upgrade().is_none() {
            self.inner.run_state.set(RunState::Error);
            return Err(ConfigurationError::Receiver {
                receiver: self.inner.name.clone(),
                reason: "not bound to an adapter".into(),
            });
        }
        // a receiver that is already STOPPED stays there
        self.inner
            .run_state
            .transition_from(&[RunState::Error], RunState::Stopped)
            .ok();
        Ok(())
    }

    fn start_running(&self) {
        if let Err(current) = self
            .inner
            .run_state
            .transition_from(&[RunState::Stopped], RunState::Starting)
        {
            tracing::warn!(receiver = %self.inner.name, state = %current, "ignoring start command");
            return;
        }

        self.inner.shutdown.store(false, Ordering::SeqCst);
        let threads = self.inner.target_threads.load(Ordering::SeqCst).max(1);
        self.inner.target_threads.store(threads, Ordering::SeqCst);
        self.inner.run_state.set(RunState::Started);
        for _ in 0..threads {
            self.spawn_worker();
        }
        tracing::info!(receiver = %self.inner.name, threads, "started");
    }

    fn stop_running(&self) -> Result<(), ReceiverError> {
        match self
            .inner
            .run_state
            .transition_from(&[RunState::Started], RunState::Stopping)
        {
            Ok(_) => {}
            Err(RunState::Stopped) | Err(RunState::Stopping) => return Ok(()),
            Err(RunState::Error) => {
                self.inner.run_state.set(RunState::Stopped);
                return Ok(());
            }
            Err(current) => {
                return Err(ReceiverError::Stop {
                    receiver: self.inner.name.clone(),
                    reason: format!("cannot stop while in state [{}]", current),
                })
            }
        }

        self.inner.shutdown.store(true, Ordering::SeqCst);
        if self.inner.running_threads.load(Ordering::SeqCst) == 0 {
            self.inner.run_state.set(RunState::Stopped);
        }
        Ok(())
    }

    fn run_state(&self) -> RunState {
        self.inner.run_state.get()
    }

    fn wait_for_state(&self, state: RunState) -> Result<(), Interrupted> {
        self.inner.run_state.wait_for_state(state)
    }

    fn as_thread_count_controllable(&self) -> Option<&dyn ThreadCountControllable> {
        Some(self)
    }
}

impl ThreadCountControllable for ChannelReceiver {
    fn current_thread_count(&self) -> usize {
        self.inner.running_threads.load(Ordering::SeqCst)
    }

    fn max_thread_count(&self) -> usize {
        self.inner.target_threads.load(Ordering::SeqCst)
    }

    fn increase_thread_count(&self) {
        self.inner.target_threads.fetch_add(1, Ordering::SeqCst);
        if self.inner.run_state.get() == RunState::Started {
            self.spawn_worker();
        }
    }

    fn decrease_thread_count(&self) {
        // already at one worker
        self.inner
            .target_threads
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| (n > 1).then(|| n - 1))
            .ok();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_threads_fails_configuration() {
        let (receiver, _sender) = ChannelReceiver::new("inbox", 0, 4);
        let err = receiver.configure().unwrap_err();
        assert!(matches!(err, ConfigurationError::Receiver { .. }));
        assert_eq!(receiver.run_state(), RunState::Error);
    }

    #[test]
    fn test_unbound_receiver_fails_configuration() {
        let (receiver, _sender) = ChannelReceiver::new("inbox", 1, 4);
        assert!(receiver.configure().is_err());
    }

    #[test]
    fn test_configure_recovers_from_error_once_bound() {
        let (receiver, _sender) = ChannelReceiver::new("inbox", 1, 4);
        assert!(receiver.configure().is_err());
        assert_eq!(receiver.run_state(), RunState::Error);

        let adapter = crate::AdapterBuilder::new(crate::AdapterConfig::new("owner"))
            .pipeline(crate::PipelineBuilder::new().build().unwrap())
            .build()
            .unwrap();
        receiver.bind_adapter(Arc::downgrade(&adapter));
        assert!(receiver.configure().is_ok());
        assert_eq!(receiver.run_state(), RunState::Stopped);
        // configuring again from STOPPED leaves the state alone
        assert!(receiver.configure().is_ok());
        assert_eq!(receiver.run_state(), RunState::Stopped);
    }

    #[test]
    fn test_stop_when_stopped_is_noop() {
        let (receiver, _sender) = ChannelReceiver::new("inbox", 1, 4);
        assert!(receiver.stop_running().is_ok());
        assert_eq!(receiver.run_state(), RunState::Stopped);
    }

    #[test]
    fn test_decrease_keeps_one_thread() {
        let (receiver, _sender) = ChannelReceiver::new("inbox", 2, 4);
        let control = receiver.as_thread_count_controllable().unwrap();
        control.decrease_thread_count();
        control.decrease_thread_count();
        assert_eq!(control.max_thread_count(), 1);
        control.increase_thread_count();
        assert_eq!(control.max_thread_count(), 2);
        assert_eq!(control.current_thread_count(), 0);
    }

    #[test]
    fn test_messages_queue_while_stopped() {
        let (receiver, sender) = ChannelReceiver::new("inbox", 1, 4);
        sender.send(Some("m1"), "a").unwrap();
        sender.send(None, "b").unwrap();
        assert_eq!(receiver.pending(), 2);
        assert_eq!(receiver.messages_received(), 0);
    }
}
