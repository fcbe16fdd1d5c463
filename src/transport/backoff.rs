//! Reconnect policy and linear backoff.
//!
//! The delay before retry `n` (counting consecutive failures since the last
//! successful open) is `min(step * n, max)`: with the defaults that is
//! 250ms, 500ms, 750ms, ... capped at 10s.

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use crate::error::{Error, Result};

// ============================================================================
// Constants
// ============================================================================

/// Default delay increment per consecutive failure.
pub const DEFAULT_BACKOFF_STEP: Duration = Duration::from_millis(250);

/// Default upper bound for a single delay.
pub const DEFAULT_BACKOFF_MAX: Duration = Duration::from_millis(10_000);

// ============================================================================
// RetryPolicy
// ============================================================================

/// How many times a connect call may retry after failures.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RetryPolicy {
    /// Fail on the first failure.
    #[default]
    Never,
    /// Retry up to `n` times per run of consecutive failures.
    Limited(u32),
    /// Retry until torn down.
    Forever,
}

impl RetryPolicy {
    /// Returns `true` if another retry is allowed after `retries` retries.
    #[inline]
    #[must_use]
    pub const fn allows(&self, retries: u32) -> bool {
        match self {
            Self::Never => false,
            Self::Limited(max) => retries < *max,
            Self::Forever => true,
        }
    }
}

impl From<bool> for RetryPolicy {
    fn from(retry: bool) -> Self {
        if retry { Self::Forever } else { Self::Never }
    }
}

impl From<u32> for RetryPolicy {
    fn from(count: u32) -> Self {
        Self::Limited(count)
    }
}

// ============================================================================
// BackoffPolicy
// ============================================================================

/// Linear backoff parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Increment per consecutive failure.
    pub step: Duration,
    /// Upper bound for one delay.
    pub max: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            step: DEFAULT_BACKOFF_STEP,
            max: DEFAULT_BACKOFF_MAX,
        }
    }
}

impl BackoffPolicy {
    /// Creates a policy.
    #[inline]
    #[must_use]
    pub const fn new(step: Duration, max: Duration) -> Self {
        Self { step, max }
    }

    /// Checks the policy for unusable values.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for a zero step, a zero max, or `max < step`.
    pub fn validate(&self) -> Result<()> {
        if self.step.is_zero() {
            return Err(Error::config("Backoff step must be > 0"));
        }
        if self.max.is_zero() {
            return Err(Error::config("Max backoff delay must be > 0"));
        }
        if self.max < self.step {
            return Err(Error::config("Max backoff delay must be >= backoff step"));
        }
        Ok(())
    }

    /// Returns the delay after `failures` consecutive failures.
    #[must_use]
    pub fn delay_for(&self, failures: u32) -> Duration {
        self.step.saturating_mul(failures).min(self.max)
    }
}

// ============================================================================
// Backoff
// ============================================================================

/// Backoff state for one connect chain.
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: BackoffPolicy,
    failures: u32,
}

impl Backoff {
    /// Creates backoff state with no recorded failures.
    #[inline]
    #[must_use]
    pub const fn new(policy: BackoffPolicy) -> Self {
        Self {
            policy,
            failures: 0,
        }
    }

    /// Records a failure and returns the delay to wait before retrying.
    pub fn next_delay(&mut self) -> Duration {
        self.failures = self.failures.saturating_add(1);
        self.policy.delay_for(self.failures)
    }

    /// Forgets recorded failures. Called when a connection opens.
    #[inline]
    pub fn reset(&mut self) {
        self.failures = 0;
    }

    /// Returns the number of consecutive failures recorded.
    #[inline]
    #[must_use]
    pub const fn failures(&self) -> u32 {
        self.failures
    }
}

// ============================================================================
// Tests
// ============================================================================
