use std::sync::Mutex;

/// High-water mark of serialization retries observed across every
/// transaction run through one pool.
///
/// Concurrent transactions on different handles all record into the same
/// instance; the mutex guards against lost updates. Owned by [`Database`]
/// rather than living in a process-wide static so independent pools stay
/// independently observable.
///
/// [`Database`]: crate::pool::Database
#[derive(Debug, Default)]
pub struct RetryStats {
    max_retries: Mutex<u32>,
}

impl RetryStats {
    /// Record the retry count of one transaction attempt sequence, keeping
    /// the maximum seen so far.
    pub fn record(&self, retries: u32) {
        let mut guard = match self.max_retries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if retries > *guard {
            *guard = retries;
        }
    }

    /// The highest number of retries any single transaction has needed.
    #[must_use]
    pub fn max_observed(&self) -> u32 {
        match self.max_retries.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}
