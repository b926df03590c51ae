use std::fmt::Debug;

use chrono::{DateTime, Utc};

/// Source of the current wall-clock time.
///
/// The executor captures `now()` at three phase boundaries: before cache
/// lookup, before calling upstream, and after upstream responds. Policy
/// functions never read time on their own; they receive the captured
/// instant as an argument.
pub trait Clock: Send + Sync + Debug {
    /// Returns the current wall-clock time.
    fn now(&self) -> DateTime<Utc>;
}

/// The system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
