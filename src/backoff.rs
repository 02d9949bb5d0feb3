//! Exponential backoff for rate-limited remote calls.
//!
//! An [`ExponentialBackoff`] is an immutable policy; [`ExponentialBackoff::start`]
//! hands out a fresh [`BackoffExecution`] per retried operation. The execution
//! accounts elapsed time as the sum of the intervals it has handed out, not
//! wall-clock time, so a test can walk the whole sequence without sleeping.
//!
//! ```rust
//! use std::time::Duration;
//! use kb_sync::backoff::{BackoffStep, ExponentialBackoff};
//!
//! let policy = ExponentialBackoff::new(Duration::from_millis(100), 2.0)
//!     .with_max_interval(Duration::from_millis(1_000))
//!     .with_max_elapsed_time(Duration::from_millis(500));
//!
//! let mut execution = policy.start();
//! assert_eq!(execution.next_backoff(), BackoffStep::Wait(Duration::from_millis(100)));
//! assert_eq!(execution.next_backoff(), BackoffStep::Wait(Duration::from_millis(200)));
//! assert_eq!(execution.next_backoff(), BackoffStep::Wait(Duration::from_millis(400)));
//! assert_eq!(execution.next_backoff(), BackoffStep::Stop);
//! ```

use std::time::Duration;

const DEFAULT_MAX_INTERVAL: Duration = Duration::from_secs(30);

/// Result of asking a [`BackoffExecution`] for the next wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffStep {
    /// Wait this long, then retry.
    Wait(Duration),
    /// The elapsed-time budget is spent; give up.
    Stop,
}

/// Exponential backoff policy with an interval cap and an elapsed-time budget.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    initial_interval: Duration,
    multiplier: f64,
    max_interval: Duration,
    max_elapsed_time: Duration,
}

impl ExponentialBackoff {
    /// Creates a policy with a 30s interval cap and no elapsed-time budget.
    pub fn new(initial_interval: Duration, multiplier: f64) -> Self {
        Self {
            initial_interval,
            multiplier,
            max_interval: DEFAULT_MAX_INTERVAL.max(initial_interval),
            max_elapsed_time: Duration::MAX,
        }
    }

    /// Sets the cap applied to every interval.
    pub fn with_max_interval(mut self, max_interval: Duration) -> Self {
        self.max_interval = max_interval;
        self
    }

    /// Sets the elapsed-time budget after which executions return [`BackoffStep::Stop`].
    pub fn with_max_elapsed_time(mut self, max_elapsed_time: Duration) -> Self {
        self.max_elapsed_time = max_elapsed_time;
        self
    }

    pub fn initial_interval(&self) -> Duration {
        self.initial_interval
    }

    pub fn multiplier(&self) -> f64 {
        self.multiplier
    }

    pub fn max_interval(&self) -> Duration {
        self.max_interval
    }

    pub fn max_elapsed_time(&self) -> Duration {
        self.max_elapsed_time
    }

    /// Starts a new execution with zero elapsed time.
    pub fn start(&self) -> BackoffExecution {
        BackoffExecution {
            policy: self.clone(),
            current_interval: self.initial_interval,
            elapsed: Duration::ZERO,
        }
    }
}

/// Stateful cursor over an [`ExponentialBackoff`] policy.
#[derive(Debug, Clone)]
pub struct BackoffExecution {
    policy: ExponentialBackoff,
    current_interval: Duration,
    elapsed: Duration,
}

impl BackoffExecution {
    /// Returns the next wait, or [`BackoffStep::Stop`] once elapsed time exceeds the budget.
    pub fn next_backoff(&mut self) -> BackoffStep {
        if self.elapsed > self.policy.max_elapsed_time {
            return BackoffStep::Stop;
        }

        let interval = self.current_interval.min(self.policy.max_interval);
        self.elapsed = self.elapsed.saturating_add(interval);
        self.current_interval = self.multiply(interval);

        BackoffStep::Wait(interval)
    }

    /// Sum of all intervals handed out so far.
    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    fn multiply(&self, interval: Duration) -> Duration {
        let max = self.policy.max_interval;
        let next = interval.as_nanos() as f64 * self.policy.multiplier;
        if !next.is_finite() || next >= max.as_nanos() as f64 {
            max
        } else {
            Duration::from_nanos(next.round() as u64)
        }
    }
}
