//! # Retry
//!
//! Backoff between redeliveries of a message whose handler failed transiently.
use std::time;

#[derive(Clone, Debug)]
pub struct RetryPolicy {
    /// Multiplies `initial_interval` once per past attempt.
    pub backoff_coefficient: u32,
    /// Delay before the second delivery.
    pub initial_interval: time::Duration,
    /// Upper bound for any delay.
    pub maximum_interval: Option<time::Duration>,
}

impl RetryPolicy {
    pub fn build(backoff_coefficient: u32, initial_interval: time::Duration) -> RetryPolicyBuilder {
        RetryPolicyBuilder::new(backoff_coefficient, initial_interval)
    }

    /// Delay before redelivering a message that just failed its `attempt`-th delivery.
    pub fn retry_interval(&self, attempt: u32) -> time::Duration {
        let exponent = attempt.saturating_sub(1);
        let candidate = self
            .backoff_coefficient
            .checked_pow(exponent)
            .and_then(|factor| self.initial_interval.checked_mul(factor));

        match (candidate, self.maximum_interval) {
            (Some(interval), Some(max)) => interval.min(max),
            (Some(interval), None) => interval,
            (None, Some(max)) => max,
            (None, None) => time::Duration::MAX,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicyBuilder::default().provide()
    }
}

pub struct RetryPolicyBuilder {
    backoff_coefficient: u32,
    initial_interval: time::Duration,
    maximum_interval: Option<time::Duration>,
}

impl Default for RetryPolicyBuilder {
    fn default() -> Self {
        Self {
            backoff_coefficient: 2,
            initial_interval: time::Duration::from_secs(1),
            maximum_interval: None,
        }
    }
}

impl RetryPolicyBuilder {
    pub fn new(backoff_coefficient: u32, initial_interval: time::Duration) -> Self {
        Self {
            backoff_coefficient,
            initial_interval,
            ..RetryPolicyBuilder::default()
        }
    }

    pub fn maximum_interval(mut self, interval: time::Duration) -> RetryPolicyBuilder {
        self.maximum_interval = Some(interval);
        self
    }

    pub fn provide(&self) -> RetryPolicy {
        RetryPolicy {
            backoff_coefficient: self.backoff_coefficient,
            initial_interval: self.initial_interval,
            maximum_interval: self.maximum_interval,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_interval() {
        let policy = RetryPolicy::build(1, time::Duration::from_secs(2)).provide();

        assert_eq!(policy.retry_interval(1), time::Duration::from_secs(2));
        assert_eq!(policy.retry_interval(5), time::Duration::from_secs(2));
    }

    #[test]
    fn exponential_interval() {
        let policy = RetryPolicy::build(2, time::Duration::from_secs(1)).provide();

        assert_eq!(policy.retry_interval(1), time::Duration::from_secs(1));
        assert_eq!(policy.retry_interval(2), time::Duration::from_secs(2));
        assert_eq!(policy.retry_interval(4), time::Duration::from_secs(8));
    }

    #[test]
    fn never_exceeds_maximum() {
        let policy = RetryPolicy::build(2, time::Duration::from_secs(1))
            .maximum_interval(time::Duration::from_secs(60))
            .provide();

        assert_eq!(policy.retry_interval(7), time::Duration::from_secs(60));
        assert_eq!(policy.retry_interval(200), time::Duration::from_secs(60));
    }
}
