use std::time::Duration;

use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;

/// The initial backoff interval after the first failed attempt.
const INITIAL_INTERVAL: Duration = Duration::from_millis(1000);

/// A retry interval generator with exponentially increasing backoff.
///
/// The first call to [`next_backoff`](Self::next_backoff) returns a zero
/// duration so the first retry happens immediately. Subsequent calls return
/// exponentially growing intervals with randomization, capped at the maximum
/// interval passed to [`new`](Self::new).
pub struct RetryBackoff {
    backoff: ExponentialBackoff,
    attempt: usize,
}

impl RetryBackoff {
    /// Creates a new retry backoff with the given maximum interval.
    pub fn new(max_interval: Duration) -> Self {
        let backoff = ExponentialBackoff {
            current_interval: INITIAL_INTERVAL,
            initial_interval: INITIAL_INTERVAL,
            max_interval,
            max_elapsed_time: None,
            ..ExponentialBackoff::default()
        };

        RetryBackoff {
            backoff,
            attempt: 0,
        }
    }

    /// Returns whether a backoff attempt has started.
    pub fn started(&self) -> bool {
        self.attempt > 0
    }

    /// Returns the number of backoff attempts so far.
    pub fn attempt(&self) -> usize {
        self.attempt
    }

    /// Returns the duration until the next retry attempt.
    pub fn next_backoff(&mut self) -> Duration {
        let duration = match self.attempt {
            0 => Duration::ZERO,
            _ => self
                .backoff
                .next_backoff()
                .unwrap_or(self.backoff.max_interval),
        };

        self.attempt += 1;
        duration
    }

    /// Resets this backoff to its initial state.
    pub fn reset(&mut self) {
        self.backoff.reset();
        self.attempt = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_attempt_immediate() {
        let mut backoff = RetryBackoff::new(Duration::from_secs(30));
        assert!(!backoff.started());
        assert_eq!(backoff.next_backoff(), Duration::ZERO);
        assert!(backoff.started());
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let max = Duration::from_secs(5);
        let mut backoff = RetryBackoff::new(max);
        backoff.next_backoff();

        // The randomized interval never exceeds max_interval multiplied by
        // the randomization factor bound of 1.5.
        for _ in 0..20 {
            let duration = backoff.next_backoff();
            assert!(duration <= max.mul_f64(1.5));
            assert!(duration > Duration::ZERO);
        }
    }

    #[test]
    fn test_reset() {
        let mut backoff = RetryBackoff::new(Duration::from_secs(30));
        backoff.next_backoff();
        backoff.next_backoff();
        assert_eq!(backoff.attempt(), 2);

        backoff.reset();
        assert!(!backoff.started());
        assert_eq!(backoff.next_backoff(), Duration::ZERO);
    }
}
