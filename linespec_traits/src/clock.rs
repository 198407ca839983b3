use std::time::{Duration, Instant};

/// Time source for settle delays and recovery backoff.
///
/// The driver never reads wall time for protocol decisions; it only waits.
/// Routing those waits through this trait lets tests replay the exact delay
/// sequence of a recovery ladder without sleeping.
pub trait Clock {
    fn now(&self) -> Instant;

    /// Block for `d`. A zero duration returns immediately.
    fn sleep(&self, d: Duration);
}

/// Real clock backed by `std::time::Instant` and `thread::sleep`.
#[derive(Debug, Default, Clone, Copy)]
pub struct MonotonicClock;

impl MonotonicClock {
    #[inline]
    pub fn new() -> Self {
        Self
    }
}

impl Clock for MonotonicClock {
    #[inline]
    fn now(&self) -> Instant {
        Instant::now()
    }

    #[inline]
    fn sleep(&self, d: Duration) {
        if !d.is_zero() {
            std::thread::sleep(d);
        }
    }
}

/// Virtual clock for tests. Enabled by the `test-util` feature.
#[cfg(any(test, feature = "test-util"))]
pub mod test_clock {
    use super::{Clock, Duration, Instant};
    use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

    #[derive(Debug, Default)]
    struct Log {
        elapsed: Duration,
        sleeps: Vec<Duration>,
    }

    /// Virtual clock: `sleep` returns at once, moves virtual time forward and
    /// logs the requested duration. Clones share one log.
    #[derive(Debug, Clone)]
    pub struct TestClock {
        origin: Instant,
        log: Arc<Mutex<Log>>,
    }

    impl Default for TestClock {
        fn default() -> Self {
            Self::new()
        }
    }

    impl TestClock {
        pub fn new() -> Self {
            Self {
                origin: Instant::now(),
                log: Arc::new(Mutex::new(Log::default())),
            }
        }

        fn log(&self) -> MutexGuard<'_, Log> {
            self.log.lock().unwrap_or_else(PoisonError::into_inner)
        }

        /// Every duration passed to `sleep`, in call order.
        pub fn sleeps(&self) -> Vec<Duration> {
            self.log().sleeps.clone()
        }

        /// Sum of all recorded sleeps, including cleared ones.
        pub fn total_slept(&self) -> Duration {
            self.log().elapsed
        }

        /// Forget the recorded sequence; virtual time keeps its value.
        pub fn clear_sleeps(&self) {
            self.log().sleeps.clear();
        }
    }

    impl Clock for TestClock {
        fn now(&self) -> Instant {
            self.origin + self.log().elapsed
        }

        fn sleep(&self, d: Duration) {
            let mut log = self.log();
            log.elapsed = log.elapsed.saturating_add(d);
            log.sleeps.push(d);
        }
    }

}
