//! # Retry
//!
//! Module providing a `StoreRetryPolicy` to configure how store primitives
//! retry transient backend errors.

use std::time::Duration;

/// Backoff parameters for retrying a transient store error. The policy bounds
/// both the number of attempts and the total time spent on one operation.
#[derive(Clone, Debug)]
pub struct StoreRetryPolicy {
    /// Coefficient to multiply initial_interval with for every past attempt.
    pub backoff_coefficient: u32,
    /// The backoff interval for the first retry.
    pub initial_interval: Duration,
    /// The maximum possible backoff between retries.
    pub maximum_interval: Option<Duration>,
    /// Attempts (including the first) before the error is escalated.
    pub max_attempts: u32,
    /// Total budget across all retries of one operation.
    pub max_total: Duration,
}

impl StoreRetryPolicy {
    /// Initialize a `StoreRetryPolicyBuilder`.
    pub fn build(backoff_coefficient: u32, initial_interval: Duration) -> StoreRetryPolicyBuilder {
        StoreRetryPolicyBuilder::new(backoff_coefficient, initial_interval)
    }

    /// Determine the backoff interval after a given failed attempt number.
    pub fn interval(&self, attempt: u32) -> Duration {
        let candidate_interval =
            self.initial_interval * self.backoff_coefficient.pow(attempt.saturating_sub(1));

        if let Some(maximum_interval) = self.maximum_interval {
            std::cmp::min(candidate_interval, maximum_interval)
        } else {
            candidate_interval
        }
    }
}

impl Default for StoreRetryPolicy {
    fn default() -> Self {
        StoreRetryPolicyBuilder::default().provide()
    }
}

/// Builder pattern struct to provide a `StoreRetryPolicy`.
pub struct StoreRetryPolicyBuilder {
    pub backoff_coefficient: u32,
    pub initial_interval: Duration,
    pub maximum_interval: Option<Duration>,
    pub max_attempts: u32,
    pub max_total: Duration,
}

impl Default for StoreRetryPolicyBuilder {
    fn default() -> Self {
        Self {
            backoff_coefficient: 2,
            initial_interval: Duration::from_secs(1),
            maximum_interval: Some(Duration::from_secs(10)),
            max_attempts: 5,
            max_total: Duration::from_secs(30),
        }
    }
}

impl StoreRetryPolicyBuilder {
    pub fn new(backoff_coefficient: u32, initial_interval: Duration) -> Self {
        Self {
            backoff_coefficient,
            initial_interval,
            ..StoreRetryPolicyBuilder::default()
        }
    }

    pub fn maximum_interval(mut self, interval: Duration) -> StoreRetryPolicyBuilder {
        self.maximum_interval = Some(interval);
        self
    }

    pub fn max_attempts(mut self, attempts: u32) -> StoreRetryPolicyBuilder {
        self.max_attempts = attempts;
        self
    }

    pub fn max_total(mut self, total: Duration) -> StoreRetryPolicyBuilder {
        self.max_total = total;
        self
    }

    /// Provide a `StoreRetryPolicy` according to build parameters provided thus far.
    pub fn provide(&self) -> StoreRetryPolicy {
        StoreRetryPolicy {
            backoff_coefficient: self.backoff_coefficient,
            initial_interval: self.initial_interval,
            maximum_interval: self.maximum_interval,
            max_attempts: self.max_attempts,
            max_total: self.max_total,
        }
    }
}
