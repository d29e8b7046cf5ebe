//! Retry Policy
//!
//! Named wait policy for the election loop, so the interval and jitter are
//! configured and tested in one place instead of inline sleeps.

use std::time::Duration;

use rand::Rng;

/// Wait policy between election re-evaluations
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Base interval between attempts
    pub interval: Duration,
    /// Optional random jitter added on top of the interval
    pub jitter: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            jitter: None,
        }
    }
}

impl RetryPolicy {
    pub fn new(interval: Duration, jitter: Option<Duration>) -> Self {
        let jitter = jitter.filter(|j| !j.is_zero());
        Self { interval, jitter }
    }

    /// Delay to wait before the next attempt
    pub fn delay(&self) -> Duration {
        match self.jitter {
            Some(jitter) => {
                let mut rng = rand::thread_rng();
                self.interval + rng.gen_range(Duration::ZERO..=jitter)
            }
            None => self.interval,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_delay() {
        let policy = RetryPolicy::new(Duration::from_secs(5), None);
        assert_eq!(policy.delay(), Duration::from_secs(5));
    }

    #[test]
    fn test_jittered_delay_stays_in_window() {
        let policy = RetryPolicy::new(
            Duration::from_millis(100),
            Some(Duration::from_millis(50)),
        );
        for _ in 0..100 {
            let delay = policy.delay();
            assert!(delay >= Duration::from_millis(100));
            assert!(delay <= Duration::from_millis(150));
        }
    }

    #[test]
    fn test_zero_jitter_collapses_to_fixed() {
        let policy = RetryPolicy::new(Duration::from_secs(2), Some(Duration::ZERO));
        assert!(policy.jitter.is_none());
        assert_eq!(policy.delay(), Duration::from_secs(2));
    }
}
