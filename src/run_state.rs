use crate::error::Interrupted;
use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, Instant};

/// Lifecycle status of an adapter or receiver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunState {
    Stopped,
    Starting,
    Started,
    Stopping,
    Error,
}

impl RunState {
    const ALL: [RunState; 5] = [
        RunState::Stopped,
        RunState::Starting,
        RunState::Started,
        RunState::Stopping,
        RunState::Error,
    ];

    fn index(self) -> usize {
        match self {
            RunState::Stopped => 0,
            RunState::Starting => 1,
            RunState::Started => 2,
            RunState::Stopping => 3,
            RunState::Error => 4,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RunState::Stopped => "STOPPED",
            RunState::Starting => "STARTING",
            RunState::Started => "STARTED",
            RunState::Stopping => "STOPPING",
            RunState::Error => "ERROR",
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

struct Inner {
    state: RunState,
    /// Bumped on every transition
    generation: u64,
    /// Generation at which each state was last entered
    entered: [u64; RunState::ALL.len()],
    interrupts: u64,
}

impl Inner {
    fn reached(&self, target: RunState, since: u64) -> bool {
        self.state == target || self.entered[target.index()] > since
    }

    fn enter(&mut self, state: RunState) {
        self.generation += 1;
        self.state = state;
        self.entered[state.index()] = self.generation;
    }
}

/// Run-state holder with blocking waits.
///
/// A waiter is released when the state equals its target, or when the target
/// was entered at any point after the wait began, so short-lived states are
/// never missed. Transitions are not validated here.
pub struct RunStateManager {
    inner: Mutex<Inner>,
    changed: Condvar,
}

impl RunStateManager {
    /// Create a manager in [`RunState::Stopped`]
    pub fn new() -> Self {
        Self::with_state(RunState::Stopped)
    }

    pub fn with_state(state: RunState) -> Self {
        Self {
            inner: Mutex::new(Inner {
                state,
                generation: 0,
                entered: [0; RunState::ALL.len()],
                interrupts: 0,
            }),
            changed: Condvar::new(),
        }
    }

    pub fn get(&self) -> RunState {
        self.inner.lock().state
    }

    /// Set the state and wake every waiter
    pub fn set(&self, state: RunState) {
        let mut inner = self.inner.lock();
        inner.enter(state);
        self.changed.notify_all();
    }

    /// Move to `new` only when the current state is one of `expected`.
    ///
    /// Returns the previous state on success and the current state otherwise.
    pub fn transition_from(&self, expected: &[RunState], new: RunState) -> Result<RunState, RunState> {
        let mut inner = self.inner.lock();
        let current = inner.state;
        if !expected.contains(&current) {
            return Err(current);
        }
        inner.enter(new);
        self.changed.notify_all();
        Ok(current)
    }

    /// Block until `target` is reached or the manager is interrupted
    pub fn wait_for_state(&self, target: RunState) -> Result<(), Interrupted> {
        let mut inner = self.inner.lock();
        let since = inner.generation;
        let interrupts = inner.interrupts;
        loop {
            if inner.reached(target, since) {
                return Ok(());
            }
            if inner.interrupts != interrupts {
                return Err(Interrupted);
            }
            self.changed.wait(&mut inner);
        }
    }

    /// Like [`wait_for_state`](Self::wait_for_state), giving up after `timeout`.
    ///
    /// Returns `Ok(false)` on timeout.
    pub fn wait_for_state_timeout(&self, target: RunState, timeout: Duration) -> Result<bool, Interrupted> {
        let deadline = Instant::now() + timeout;
        let mut inner = self.inner.lock();
        let since = inner.generation;
        let interrupts = inner.interrupts;
        loop {
            if inner.reached(target, since) {
                return Ok(true);
            }
            if inner.interrupts != interrupts {
                return Err(Interrupted);
            }
            if self.changed.wait_until(&mut inner, deadline).timed_out() {
                return Ok(inner.reached(target, since));
            }
        }
    }

    /// Wake every current waiter with [`Interrupted`]
    pub fn interrupt(&self) {
        let mut inner = self.inner.lock();
        inner.interrupts += 1;
        self.changed.notify_all();
    }
}

impl Default for RunStateManager {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for RunStateManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunStateManager").field("state", &self.get()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_initial_state_is_stopped() {
        assert_eq!(RunStateManager::new().get(), RunState::Stopped);
    }

    #[test]
    fn test_wait_returns_immediately_when_in_state() {
        let manager = RunStateManager::with_state(RunState::Started);
        assert!(manager.wait_for_state(RunState::Started).is_ok());
    }

    #[test]
    fn test_wait_is_released_by_transition() {
        let manager = Arc::new(RunStateManager::new());
        let waiter = {
            let manager = Arc::clone(&manager);
            thread::spawn(move || manager.wait_for_state(RunState::Started))
        };
        thread::sleep(Duration::from_millis(20));
        manager.set(RunState::Starting);
        manager.set(RunState::Started);
        assert!(waiter.join().unwrap().is_ok());
    }

    #[test]
    fn test_wait_observes_passed_state() {
        let manager = Arc::new(RunStateManager::with_state(RunState::Started));
        let waiter = {
            let manager = Arc::clone(&manager);
            thread::spawn(move || manager.wait_for_state(RunState::Stopping))
        };
        thread::sleep(Duration::from_millis(20));
        // STOPPING is only held for an instant
        manager.set(RunState::Stopping);
        manager.set(RunState::Stopped);
        assert!(waiter.join().unwrap().is_ok());
    }

    #[test]
    fn test_interrupt_surfaces_to_waiter() {
        let manager = Arc::new(RunStateManager::new());
        let waiter = {
            let manager = Arc::clone(&manager);
            thread::spawn(move || manager.wait_for_state(RunState::Started))
        };
        thread::sleep(Duration::from_millis(20));
        manager.interrupt();
        assert_eq!(waiter.join().unwrap(), Err(Interrupted));
        // later waits are unaffected
        manager.set(RunState::Started);
        assert!(manager.wait_for_state(RunState::Started).is_ok());
    }

    #[test]
    fn test_wait_timeout() {
        let manager = RunStateManager::new();
        let reached = manager
            .wait_for_state_timeout(RunState::Started, Duration::from_millis(30))
            .unwrap();
        assert!(!reached);
    }

    #[test]
    fn test_transition_from() {
        let manager = RunStateManager::new();
        assert_eq!(
            manager.transition_from(&[RunState::Stopped], RunState::Starting),
            Ok(RunState::Stopped)
        );
        assert_eq!(
            manager.transition_from(&[RunState::Stopped], RunState::Starting),
            Err(RunState::Starting)
        );
        assert_eq!(manager.get(), RunState::Starting);
    }

    #[test]
    fn test_display() {
        assert_eq!(RunState::Stopping.to_string(), "STOPPING");
        assert_eq!(RunState::Error.as_str(), "ERROR");
    }
}
