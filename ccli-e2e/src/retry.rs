//! Bounded re-evaluation of a predicate.
//!
//! Attempts are spaced from the start of one attempt to the start of the
//! next. A policy is bounded by a deadline, an attempt count, or both; with
//! neither it makes exactly one attempt.

use std::future::Future;
use std::time::Duration;

use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::cmd::CommandResult;
use crate::errors::{HarnessError, HarnessResult};

/// Interval used when a policy does not name one.
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(1);

/// Whether an attempt may start after the deadline has passed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Boundary {
    /// No attempt starts after the deadline.
    #[default]
    Strict,
    /// One final attempt may start within one interval past the deadline.
    Grace,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub interval: Duration,
    pub deadline: Option<Duration>,
    pub max_attempts: Option<u32>,
    pub boundary: Boundary,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            interval: DEFAULT_RETRY_INTERVAL,
            deadline: None,
            max_attempts: None,
            boundary: Boundary::Strict,
        }
    }
}

impl RetryPolicy {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            ..Self::default()
        }
    }

    /// Poll every `interval` until `deadline` has elapsed.
    pub fn until(interval: Duration, deadline: Duration) -> Self {
        Self::new(interval).with_deadline(deadline)
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts.max(1));
        self
    }

    pub fn with_boundary(mut self, boundary: Boundary) -> Self {
        self.boundary = boundary;
        self
    }

    pub fn is_single_attempt(&self) -> bool {
        match (self.deadline, self.max_attempts) {
            (None, None) => true,
            (_, Some(max)) => max <= 1,
            _ => false,
        }
    }

    /// Whether another attempt may start `offset` after the first one, once
    /// `attempts` have already run.
    fn allows(&self, attempts: u32, offset: Duration) -> bool {
        if let Some(max) = self.max_attempts {
            if attempts >= max {
                return false;
            }
        }
        match self.deadline {
            None => self.max_attempts.is_some(),
            Some(deadline) => match self.boundary {
                Boundary::Strict => offset <= deadline,
                Boundary::Grace => offset < deadline.saturating_add(self.interval),
            },
        }
    }

    /// Evaluate `predicate` until it reports [`Probe::Ready`], the policy is
    /// exhausted, or `cancel` fires.
    ///
    /// The predicate receives the 1-based attempt number. An `Err` from the
    /// predicate aborts the wait at once.
    pub async fn eval<T, F, Fut>(
        &self,
        description: &str,
        cancel: &CancellationToken,
        mut predicate: F,
    ) -> HarnessResult<RetryOutcome<T>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = HarnessResult<Probe<T>>>,
    {
        let cancelled = || HarnessError::Cancelled {
            command: description.to_string(),
        };
        let start = Instant::now();
        let mut attempts = 0u32;
        let mut last = None;

        loop {
            if cancel.is_cancelled() {
                return Err(cancelled());
            }
            attempts += 1;
            let attempt_started = Instant::now();

            let probe = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(cancelled()),
                probe = predicate(attempts) => probe?,
            };

            match probe {
                Probe::Ready(value) => {
                    debug!(description, attempts, "Condition met");
                    return Ok(RetryOutcome {
                        value,
                        attempts,
                        elapsed: start.elapsed(),
                    });
                }
                Probe::Pending(observed) => {
                    if observed.is_some() {
                        last = observed;
                    }
                }
            }

            let next = attempt_started + self.interval;
            if !self.allows(attempts, next.duration_since(start)) {
                let elapsed = start.elapsed();
                warn!(description, attempts, ?elapsed, "Retries exhausted");
                return Err(HarnessError::RetryExhausted {
                    description: description.to_string(),
                    attempts,
                    elapsed,
                    last,
                });
            }

            debug!(description, attempt = attempts, interval = ?self.interval, "Condition not met, retrying");
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(cancelled()),
                _ = sleep_until(next) => {}
            }
        }
    }
}

/// One evaluation of a retried predicate.
#[derive(Debug)]
pub enum Probe<T> {
    Ready(T),
    /// Not yet; optionally carrying what the attempt observed.
    Pending(Option<CommandResult>),
}

impl<T> Probe<T> {
    pub fn pending() -> Self {
        Self::Pending(None)
    }

    pub fn observed(result: CommandResult) -> Self {
        Self::Pending(Some(result))
    }
}

#[derive(Debug)]
pub struct RetryOutcome<T> {
    pub value: T,
    pub attempts: u32,
    pub elapsed: Duration,
}

/// Poll a synchronous condition every `interval` until it holds or
/// `deadline` has elapsed.
pub async fn wait_for<F>(
    description: &str,
    interval: Duration,
    deadline: Duration,
    cancel: &CancellationToken,
    mut condition: F,
) -> HarnessResult<()>
where
    F: FnMut() -> bool,
{
    RetryPolicy::until(interval, deadline)
        .eval(description, cancel, |_| {
            let met = condition();
            async move {
                Ok(if met {
                    Probe::Ready(())
                } else {
                    Probe::pending()
                })
            }
        })
        .await
        .map(|_| ())
}
