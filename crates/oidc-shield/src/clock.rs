//! Time source for TTLs, windows and block deadlines

use std::fmt::Debug;

use chrono::{DateTime, Utc};

/// Source of the current wall-clock time
pub trait Clock: Send + Sync + Debug {
    /// Current time
    fn now(&self) -> DateTime<Utc>;
}

/// Clock backed by the system time
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[cfg(any(test, feature = "test-utils"))]
pub use manual::ManualClock;

#[cfg(any(test, feature = "test-utils"))]
mod manual {
    use std::sync::Arc;

    use chrono::{DateTime, Duration, Utc};
    use parking_lot::Mutex;

    use super::Clock;

    /// Clock that only moves when told to
    #[derive(Debug, Clone)]
    pub struct ManualClock {
        now: Arc<Mutex<DateTime<Utc>>>,
    }

    impl ManualClock {
        /// Start at a fixed, arbitrary instant (2025-01-01T12:00:00Z)
        pub fn new() -> Self {
            Self::starting_at(DateTime::from_timestamp(1_735_732_800, 0).unwrap_or_default())
        }

        /// Start at the given instant
        pub fn starting_at(start: DateTime<Utc>) -> Self {
            Self {
                now: Arc::new(Mutex::new(start)),
            }
        }

        /// Move time forward
        pub fn advance(&self, by: Duration) {
            let mut now = self.now.lock();
            *now += by;
        }

        /// Move time forward by whole seconds
        pub fn advance_secs(&self, secs: i64) {
            self.advance(Duration::seconds(secs));
        }
    }

    impl Default for ManualClock {
        fn default() -> Self {
            Self::new()
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            *self.now.lock()
        }
    }
}
