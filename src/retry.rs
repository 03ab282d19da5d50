//! Retrying single calls until they stop failing in known-transient ways.
//!
//! Not every wait is a status poll. Right after a role is created, a call that
//! uses it may fail with an error that only means "not propagated yet"; a
//! freshly created object may not be readable for a few seconds; a deleted
//! object may keep answering for a while. These helpers retry such calls on
//! the poller's tick schedule until they succeed, fail for real, or time out.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::finder::FindError;
use crate::poller::{call_within, deadline_after, wait_for_tick, Schedule, Wake};

const DEFAULT_MIN_TIMEOUT: Duration = Duration::from_millis(500);

/// Timing of a retry loop.
#[derive(Debug, Clone)]
pub struct RetryOptions {
    timeout: Duration,
    delay: Duration,
    min_timeout: Duration,
    poll_interval: Option<Duration>,
    cancel: CancellationToken,
}

impl RetryOptions {
    /// Retry for up to `timeout`.
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            delay: Duration::ZERO,
            min_timeout: DEFAULT_MIN_TIMEOUT,
            poll_interval: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Wait before the first attempt.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Smallest wait between attempts.
    pub fn with_min_timeout(mut self, min_timeout: Duration) -> Self {
        self.min_timeout = min_timeout;
        self
    }

    /// Fixed wait between attempts.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = Some(interval);
        self
    }

    /// Stop retrying once `cancel` fires.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Maximum time to retry.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

/// Why a retry loop gave up.
#[derive(Debug)]
pub enum RetryError<E> {
    /// Still failing with a retryable error when time ran out.
    TimedOut {
        /// The configured timeout.
        timeout: Duration,
        /// The last retryable error; `None` if no attempt finished in time.
        last: Option<E>,
    },
    /// The object was still found when time ran out.
    StillExists {
        /// The configured timeout.
        timeout: Duration,
    },
    /// The retry loop was cancelled.
    Cancelled,
    /// The call failed with an error that is not retried.
    Failed(E),
}

impl<E> RetryError<E> {
    /// Returns `true` if the loop ran out of time.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            RetryError::TimedOut { .. } | RetryError::StillExists { .. }
        )
    }

    /// The error of the final attempt, if there was one.
    pub fn into_last_error(self) -> Option<E> {
        match self {
            RetryError::TimedOut { last, .. } => last,
            RetryError::Failed(err) => Some(err),
            RetryError::StillExists { .. } | RetryError::Cancelled => None,
        }
    }
}

impl<E: fmt::Display> fmt::Display for RetryError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetryError::TimedOut { timeout, last } => {
                write!(f, "timeout while retrying (timeout: {:?})", timeout)?;
                if let Some(last) = last {
                    write!(f, ": {}", last)?;
                }
                Ok(())
            }
            RetryError::StillExists { timeout } => {
                write!(f, "resource still exists (timeout: {:?})", timeout)
            }
            RetryError::Cancelled => f.write_str("retry cancelled"),
            RetryError::Failed(err) => write!(f, "{}", err),
        }
    }
}

impl<E> std::error::Error for RetryError<E>
where
    E: std::error::Error + 'static,
{
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RetryError::TimedOut { last: Some(last), .. } => Some(last),
            RetryError::Failed(err) => Some(err),
            _ => None,
        }
    }
}

/// Re-run `op` while it fails with an error `is_retryable` accepts.
///
/// After the deadline one final attempt is made; if that still fails with a
/// retryable error the result is [`RetryError::TimedOut`]. An attempt still
/// running [`REFRESH_GRACE_PERIOD`](crate::poller::REFRESH_GRACE_PERIOD) past
/// the deadline is abandoned.
pub async fn retry_when<T, E, F, Fut, P>(
    opts: &RetryOptions,
    mut op: F,
    is_retryable: P,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
{
    let deadline = deadline_after(opts.timeout);
    let mut schedule = Schedule::new(opts.min_timeout, opts.poll_interval);
    let mut wait = opts.delay;
    let mut attempts: u32 = 0;
    let mut last = None;

    loop {
        let expired = match wait_for_tick(wait, deadline, &opts.cancel).await {
            Wake::Tick => false,
            Wake::Expired => true,
            Wake::Cancelled => {
                debug!(attempts, "retry cancelled");
                return Err(RetryError::Cancelled);
            }
        };

        attempts += 1;
        let Some(result) = call_within(op(), deadline).await else {
            debug!(attempts, "attempt still running after the deadline");
            return Err(RetryError::TimedOut {
                timeout: opts.timeout,
                last,
            });
        };
        match result {
            Ok(value) => return Ok(value),
            Err(err) if !is_retryable(&err) => return Err(RetryError::Failed(err)),
            Err(err) if expired => {
                debug!(attempts, "still failing at deadline");
                return Err(RetryError::TimedOut {
                    timeout: opts.timeout,
                    last: Some(err),
                });
            }
            Err(err) => {
                trace!(attempts, "retryable error");
                last = Some(err);
            }
        }

        wait = schedule.next_wait(true);
    }
}

/// Retry `op` while it reports the object as not found.
pub async fn retry_when_not_found<T, E, F, Fut>(
    opts: &RetryOptions,
    op: F,
) -> Result<T, RetryError<FindError<E>>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, FindError<E>>>,
{
    retry_when(opts, op, |err: &FindError<E>| err.is_not_found()).await
}

/// [`retry_when_not_found`] for a resource that was just created; a single
/// attempt otherwise.
///
/// Read handlers use this so that a resource missing right after creation is
/// retried, while a resource missing on a later refresh is reported at once.
pub async fn retry_when_new_resource_not_found<T, E, F, Fut>(
    opts: &RetryOptions,
    is_new_resource: bool,
    mut op: F,
) -> Result<T, RetryError<FindError<E>>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, FindError<E>>>,
{
    if is_new_resource {
        retry_when_not_found(opts, op).await
    } else {
        op().await.map_err(RetryError::Failed)
    }
}

/// Retry `op` until it reports the object as not found.
///
/// Returns [`RetryError::StillExists`] if the object is still found once the
/// timeout passes.
pub async fn retry_until_not_found<T, E, F, Fut>(
    opts: &RetryOptions,
    mut op: F,
) -> Result<(), RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, FindError<E>>>,
{
    let deadline = deadline_after(opts.timeout);
    let mut schedule = Schedule::new(opts.min_timeout, opts.poll_interval);
    let mut wait = opts.delay;
    let still_exists = RetryError::StillExists {
        timeout: opts.timeout,
    };

    loop {
        match wait_for_tick(wait, deadline, &opts.cancel).await {
            Wake::Tick => {}
            Wake::Expired => return Err(still_exists),
            Wake::Cancelled => return Err(RetryError::Cancelled),
        }

        let Some(result) = call_within(op(), deadline).await else {
            return Err(still_exists);
        };
        match result {
            Err(FindError::NotFound(_)) => return Ok(()),
            Err(FindError::Remote(err)) => return Err(RetryError::Failed(err)),
            Ok(_) => trace!("object still present"),
        }

        wait = schedule.next_wait(true);
    }
}
