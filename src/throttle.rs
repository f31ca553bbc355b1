use crate::error::Interrupted;
use crate::statistics::StatisticsKeeper;
use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

struct Permits {
    available: usize,
    interrupts: u64,
}

/// Counting semaphore with blocking acquire
pub struct Semaphore {
    permits: Mutex<Permits>,
    released: Condvar,
    capacity: usize,
}

impl Semaphore {
    pub fn new(capacity: usize) -> Self {
        Self {
            permits: Mutex::new(Permits {
                available: capacity,
                interrupts: 0,
            }),
            released: Condvar::new(),
            capacity,
        }
    }

    /// Block until a permit is available.
    ///
    /// Fails with [`Interrupted`] when [`interrupt_waiters`](Self::interrupt_waiters)
    /// is called while this caller is waiting.
    pub fn acquire(&self) -> Result<Permit<'_>, Interrupted> {
        let mut permits = self.permits.lock();
        let interrupts = permits.interrupts;
        while permits.available == 0 {
            self.released.wait(&mut permits);
            if permits.interrupts != interrupts {
                return Err(Interrupted);
            }
        }
        permits.available -= 1;
        Ok(Permit { semaphore: self })
    }

    pub fn try_acquire(&self) -> Option<Permit<'_>> {
        let mut permits = self.permits.lock();
        if permits.available == 0 {
            return None;
        }
        permits.available -= 1;
        Some(Permit { semaphore: self })
    }

    pub fn available_permits(&self) -> usize {
        self.permits.lock().available
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Fail every caller currently blocked in [`acquire`](Self::acquire)
    pub fn interrupt_waiters(&self) {
        let mut permits = self.permits.lock();
        permits.interrupts += 1;
        self.released.notify_all();
    }

    fn release(&self) {
        let mut permits = self.permits.lock();
        permits.available += 1;
        self.released.notify_one();
    }
}

/// Held permit; released on drop, including during unwinding
pub struct Permit<'a> {
    semaphore: &'a Semaphore,
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        self.semaphore.release();
    }
}

/// Per-stage concurrency guard.
///
/// Semaphores are created when a bounded stage is registered and only read
/// afterwards. Stages with `max_threads == 0` bypass the guard entirely.
#[derive(Default)]
pub struct Throttle {
    semaphores: HashMap<String, Arc<Semaphore>>,
}

impl Throttle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the semaphore for a bounded stage; unbounded stages get none
    pub fn register(&mut self, stage: &str, max_threads: usize) {
        if max_threads == 0 {
            self.semaphores.remove(stage);
            return;
        }
        self.semaphores
            .insert(stage.to_string(), Arc::new(Semaphore::new(max_threads)));
    }

    /// Semaphore guarding `stage`, or `None` when the stage is unbounded
    pub fn semaphore(&self, stage: &str) -> Option<&Arc<Semaphore>> {
        self.semaphores.get(stage)
    }

    /// Run `work` under the stage's guard.
    ///
    /// Returns the work's output and the time spent waiting for a permit.
    /// The wait is recorded in `waiting` for bounded stages.
    pub fn guard<T>(
        &self,
        stage: &str,
        waiting: Option<&StatisticsKeeper>,
        work: impl FnOnce() -> T,
    ) -> Result<(T, Duration), Interrupted> {
        let Some(semaphore) = self.semaphore(stage) else {
            return Ok((work(), Duration::ZERO));
        };

        let start_waiting = Instant::now();
        let _permit = semaphore.acquire()?;
        let waited = start_waiting.elapsed();
        if let Some(keeper) = waiting {
            keeper.record(waited);
        }

        Ok((work(), waited))
    }

    /// Interrupt every caller waiting on any stage's semaphore
    pub fn interrupt_waiting(&self) {
        for semaphore in self.semaphores.values() {
            semaphore.interrupt_waiters();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    fn bounded(stage: &str, max_threads: usize) -> Arc<Throttle> {
        let mut throttle = Throttle::new();
        throttle.register(stage, max_threads);
        Arc::new(throttle)
    }

    #[test]
    fn test_unbounded_stage_bypasses_semaphore() {
        let mut throttle = Throttle::new();
        throttle.register("free", 0);
        assert!(throttle.semaphore("free").is_none());
        let (value, waited) = throttle.guard("free", None, || 42).unwrap();
        assert_eq!(value, 42);
        assert_eq!(waited, Duration::ZERO);
    }

    #[test]
    fn test_semaphore_exists_from_registration() {
        let mut throttle = Throttle::new();
        assert!(throttle.semaphore("bounded").is_none());
        throttle.register("bounded", 2);

        let a = Arc::clone(throttle.semaphore("bounded").unwrap());
        throttle.guard("bounded", None, || ()).unwrap();
        let b = throttle.semaphore("bounded").unwrap();
        assert!(Arc::ptr_eq(&a, b));
        assert_eq!(a.capacity(), 2);
        assert_eq!(a.available_permits(), 2);
    }

    #[test]
    fn test_permit_released_on_drop() {
        let semaphore = Semaphore::new(1);
        {
            let _permit = semaphore.acquire().unwrap();
            assert!(semaphore.try_acquire().is_none());
        }
        assert_eq!(semaphore.available_permits(), 1);
    }

    #[test]
    fn test_permit_released_on_panic() {
        let throttle = bounded("panicky", 1);
        let t = Arc::clone(&throttle);
        let result = thread::spawn(move || {
            t.guard("panicky", None, || panic!("stage blew up")).ok();
        })
        .join();
        assert!(result.is_err());
        assert_eq!(throttle.semaphore("panicky").unwrap().available_permits(), 1);
    }

    #[test]
    fn test_guard_limits_concurrency() {
        let throttle = bounded("limited", 2);
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..6)
            .map(|_| {
                let throttle = Arc::clone(&throttle);
                let active = Arc::clone(&active);
                let peak = Arc::clone(&peak);
                thread::spawn(move || {
                    throttle
                        .guard("limited", None, || {
                            let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                            peak.fetch_max(now, Ordering::SeqCst);
                            thread::sleep(Duration::from_millis(20));
                            active.fetch_sub(1, Ordering::SeqCst);
                        })
                        .unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[test]
    fn test_waiting_time_is_recorded() {
        let throttle = bounded("single", 1);
        let waiting = StatisticsKeeper::new("single");
        let semaphore = Arc::clone(throttle.semaphore("single").unwrap());
        let held = semaphore.acquire().unwrap();

        let waiter = {
            let throttle = Arc::clone(&throttle);
            let waiting = waiting.clone();
            thread::spawn(move || throttle.guard("single", Some(&waiting), || ()).unwrap().1)
        };
        thread::sleep(Duration::from_millis(30));
        drop(held);

        let waited = waiter.join().unwrap();
        assert!(waited >= Duration::from_millis(20));
        assert_eq!(waiting.count(), 1);
    }

    #[test]
    fn test_interrupt_fails_waiters() {
        let throttle = bounded("stuck", 1);
        let semaphore = Arc::clone(throttle.semaphore("stuck").unwrap());
        let _held = semaphore.acquire().unwrap();

        let waiter = {
            let throttle = Arc::clone(&throttle);
            thread::spawn(move || throttle.guard("stuck", None, || ()).map(|_| ()))
        };
        thread::sleep(Duration::from_millis(20));
        throttle.interrupt_waiting();
        assert_eq!(waiter.join().unwrap(), Err(Interrupted));
    }
}
