//! Waiting for a remote object to reach a target status.
//!
//! Every create, update and delete ends by polling the remote object until it
//! settles. [`poll`] does that for any resource: the caller describes the
//! pending and target statuses in a [`PollSpec`] and supplies a status function
//! (see [`crate::status`]); the poller ticks until a target status is seen,
//! an unexpected status shows up, the object stays missing for too long, the
//! timeout passes, or the wait is cancelled.
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//! use hemmer_provider_waiter::poller::{poll, PollSpec};
//! use hemmer_provider_waiter::status::refresh_from;
//!
//! let spec = PollSpec::new(
//!     [DevEnvironmentStatus::Pending, DevEnvironmentStatus::Starting],
//!     [DevEnvironmentStatus::Running],
//!     Duration::from_secs(20 * 60),
//! )
//! .with_delay(Duration::from_secs(10));
//!
//! let env = poll(&spec, refresh_from(&finder, "env-1")).await?;
//! ```
//!
//! # Tick schedule
//!
//! Without a poll interval, the wait between ticks starts at 100ms and doubles
//! after every tick, bounded below by the minimum timeout and above by 10s.
//! While a target status is waiting to reoccur the wait does not grow. A poll
//! interval replaces this with a fixed spacing. No sleep ever runs past the
//! deadline, and a status call still running at the deadline is abandoned
//! after [`REFRESH_GRACE_PERIOD`].

use std::fmt;
use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, trace};

use crate::status::{Observation, RefreshResult};

/// Consecutive not-found observations tolerated by default.
pub const DEFAULT_NOT_FOUND_CHECKS: u32 = 20;

/// How long a status call still in flight at the deadline may keep running.
pub const REFRESH_GRACE_PERIOD: Duration = Duration::from_secs(30);

const INITIAL_WAIT: Duration = Duration::from_millis(100);
const MAX_BACKOFF_WAIT: Duration = Duration::from_secs(10);

// Stand-in deadline for timeouts too large to add to the clock.
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

/// A [`PollSpec`] that cannot be polled.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidPollSpec {
    /// A status is listed as both pending and target.
    #[error("status {0} is both pending and target")]
    OverlappingStatus(String),

    /// No target status was given.
    #[error("at least one target status is required")]
    EmptyTarget,

    /// The timeout is zero.
    #[error("timeout must be greater than zero")]
    ZeroTimeout,

    /// The continuous target occurrence is zero.
    #[error("continuous target occurrence must be at least 1")]
    ZeroTargetOccurrence,

    /// A fixed poll interval of zero was given.
    #[error("poll interval must be greater than zero")]
    ZeroPollInterval,
}

/// Configuration of one wait.
///
/// Built fresh for each operation and never changed while polling.
#[derive(Debug, Clone, PartialEq)]
pub struct PollSpec<S> {
    pending: Vec<S>,
    target: Vec<S>,
    timeout: Duration,
    not_found_checks: u32,
    continuous_target_occurrence: u32,
    delay: Duration,
    min_timeout: Duration,
    poll_interval: Option<Duration>,
}

impl<S: PartialEq + fmt::Debug> PollSpec<S> {
    /// Wait up to `timeout` for a status in `target`, continuing while the
    /// status is in `pending`.
    pub fn new(
        pending: impl IntoIterator<Item = S>,
        target: impl IntoIterator<Item = S>,
        timeout: Duration,
    ) -> Self {
        Self {
            pending: pending.into_iter().collect(),
            target: target.into_iter().collect(),
            timeout,
            not_found_checks: DEFAULT_NOT_FOUND_CHECKS,
            continuous_target_occurrence: 1,
            delay: Duration::ZERO,
            min_timeout: Duration::ZERO,
            poll_interval: None,
        }
    }

    /// Number of consecutive not-found observations tolerated.
    pub fn with_not_found_checks(mut self, checks: u32) -> Self {
        self.not_found_checks = checks;
        self
    }

    /// Number of consecutive target observations required for success.
    pub fn with_continuous_target_occurrence(mut self, occurrences: u32) -> Self {
        self.continuous_target_occurrence = occurrences;
        self
    }

    /// Wait before the first tick.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Smallest wait between ticks.
    pub fn with_min_timeout(mut self, min_timeout: Duration) -> Self {
        self.min_timeout = min_timeout;
        self
    }

    /// Fixed wait between ticks.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = Some(interval);
        self
    }

    /// Statuses that keep the poll going.
    pub fn pending(&self) -> &[S] {
        &self.pending
    }

    /// Statuses that end the poll successfully.
    pub fn target(&self) -> &[S] {
        &self.target
    }

    /// Maximum time to poll.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Consecutive not-found observations tolerated.
    pub fn not_found_checks(&self) -> u32 {
        self.not_found_checks
    }

    /// Consecutive target observations required.
    pub fn continuous_target_occurrence(&self) -> u32 {
        self.continuous_target_occurrence
    }

    /// Check the invariants the poller relies on.
    pub fn validate(&self) -> Result<(), InvalidPollSpec> {
        if self.target.is_empty() {
            return Err(InvalidPollSpec::EmptyTarget);
        }
        if let Some(status) = self.pending.iter().find(|s| self.target.contains(s)) {
            return Err(InvalidPollSpec::OverlappingStatus(format!("{:?}", status)));
        }
        if self.timeout.is_zero() {
            return Err(InvalidPollSpec::ZeroTimeout);
        }
        if self.continuous_target_occurrence == 0 {
            return Err(InvalidPollSpec::ZeroTargetOccurrence);
        }
        if self.poll_interval.is_some_and(|interval| interval.is_zero()) {
            return Err(InvalidPollSpec::ZeroPollInterval);
        }
        Ok(())
    }
}

/// Why a wait did not succeed.
#[derive(Debug)]
pub enum WaitError<S, E> {
    /// The timeout passed while the object was still pending.
    TimedOut {
        /// The configured timeout.
        timeout: Duration,
        /// The last status observed, if any object was seen.
        last_status: Option<S>,
        /// The status message observed with the last status.
        last_reason: Option<String>,
        /// The target statuses.
        expected: Vec<S>,
    },
    /// The object reached a status that is neither pending nor target.
    UnexpectedState {
        /// The status observed.
        status: S,
        /// The status message observed with it.
        reason: Option<String>,
        /// The target statuses.
        expected: Vec<S>,
    },
    /// The object stayed missing for more ticks than tolerated.
    NotFound {
        /// Consecutive not-found observations.
        checks: u32,
    },
    /// The wait was cancelled.
    Cancelled,
    /// The status function failed.
    Remote(E),
    /// The poll configuration is invalid.
    InvalidSpec(InvalidPollSpec),
}

impl<S, E> WaitError<S, E> {
    /// Returns `true` if the wait ran out of time.
    pub fn is_timeout(&self) -> bool {
        matches!(self, WaitError::TimedOut { .. })
    }

    /// Returns `true` if the wait was cancelled.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, WaitError::Cancelled)
    }

    /// Returns `true` if the object stayed missing.
    pub fn is_not_found(&self) -> bool {
        matches!(self, WaitError::NotFound { .. })
    }
}

fn join_statuses<S: fmt::Debug>(statuses: &[S]) -> String {
    statuses
        .iter()
        .map(|s| format!("{:?}", s))
        .collect::<Vec<_>>()
        .join(", ")
}

impl<S: fmt::Debug, E: fmt::Display> fmt::Display for WaitError<S, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WaitError::TimedOut {
                timeout,
                last_status,
                last_reason,
                expected,
            } => {
                let last = match last_status {
                    Some(status) => format!("{:?}", status),
                    None => "none".to_string(),
                };
                write!(
                    f,
                    "timeout while waiting for state to become '{}' (last state: '{}', timeout: {:?})",
                    join_statuses(expected),
                    last,
                    timeout
                )?;
                if let Some(reason) = last_reason {
                    write!(f, ": {}", reason)?;
                }
                Ok(())
            }
            WaitError::UnexpectedState {
                status,
                reason,
                expected,
            } => {
                write!(
                    f,
                    "unexpected state '{:?}', wanted target '{}'",
                    status,
                    join_statuses(expected)
                )?;
                if let Some(reason) = reason {
                    write!(f, ": {}", reason)?;
                }
                Ok(())
            }
            WaitError::NotFound { checks } => {
                write!(f, "couldn't find resource ({} retries)", checks)
            }
            WaitError::Cancelled => f.write_str("wait cancelled"),
            WaitError::Remote(err) => write!(f, "{}", err),
            WaitError::InvalidSpec(err) => write!(f, "invalid poll configuration: {}", err),
        }
    }
}

impl<S, E> std::error::Error for WaitError<S, E>
where
    S: fmt::Debug,
    E: std::error::Error + 'static,
{
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            WaitError::Remote(err) => Some(err),
            WaitError::InvalidSpec(err) => Some(err),
            _ => None,
        }
    }
}

/// How a poll ended.
#[derive(Debug)]
pub enum PollOutcome<T, S, E> {
    /// A target status was observed often enough; carries the last object read.
    Succeeded(T),
    /// The deadline passed while polling.
    TimedOut {
        /// The last object observed, for diagnostics.
        last: Option<Observation<T, S>>,
        /// The configured timeout.
        timeout: Duration,
        /// The target statuses.
        expected: Vec<S>,
    },
    /// The poll stopped on an error.
    Failed(WaitError<S, E>),
}

impl<T, S, E> PollOutcome<T, S, E> {
    /// Returns `true` for [`PollOutcome::Succeeded`].
    pub fn is_success(&self) -> bool {
        matches!(self, PollOutcome::Succeeded(_))
    }

    /// Fold into a `Result`, keeping only the last status of a timeout.
    pub fn into_result(self) -> Result<T, WaitError<S, E>> {
        match self {
            PollOutcome::Succeeded(object) => Ok(object),
            PollOutcome::TimedOut {
                last,
                timeout,
                expected,
            } => {
                let (last_status, last_reason) = match last {
                    Some(observation) => (Some(observation.status), observation.reason),
                    None => (None, None),
                };
                Err(WaitError::TimedOut {
                    timeout,
                    last_status,
                    last_reason,
                    expected,
                })
            }
            PollOutcome::Failed(err) => Err(err),
        }
    }
}

/// Wait spacing between ticks, shared with [`crate::retry`].
#[derive(Debug, Clone)]
pub(crate) struct Schedule {
    wait: Duration,
    min_timeout: Duration,
    poll_interval: Option<Duration>,
}

impl Schedule {
    pub(crate) fn new(min_timeout: Duration, poll_interval: Option<Duration>) -> Self {
        Self {
            wait: INITIAL_WAIT,
            min_timeout,
            poll_interval,
        }
    }

    /// The wait before the next tick. With `grow` unset the backoff holds.
    pub(crate) fn next_wait(&mut self, grow: bool) -> Duration {
        if let Some(interval) = self.poll_interval {
            return interval;
        }
        if grow {
            self.wait = self.wait.saturating_mul(2);
        }
        if self.wait < self.min_timeout {
            self.wait = self.min_timeout;
        } else if self.wait > MAX_BACKOFF_WAIT {
            self.wait = MAX_BACKOFF_WAIT;
        }
        self.wait
    }
}

/// What happened while waiting for the next tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Wake {
    Tick,
    Expired,
    Cancelled,
}

/// The instant `timeout` from now, saturating for timeouts the clock cannot hold.
pub(crate) fn deadline_after(timeout: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(timeout.min(FAR_FUTURE)).unwrap_or(now)
}

/// Sleep for `wait`, cut short by the deadline or by cancellation.
pub(crate) async fn wait_for_tick(
    wait: Duration,
    deadline: Instant,
    cancel: &CancellationToken,
) -> Wake {
    let now = Instant::now();
    if now >= deadline {
        return Wake::Expired;
    }
    let until = now.checked_add(wait).map_or(deadline, |t| t.min(deadline));
    tokio::select! {
        biased;
        _ = cancel.cancelled() => return Wake::Cancelled,
        _ = tokio::time::sleep_until(until) => {}
    }
    if Instant::now() >= deadline {
        Wake::Expired
    } else {
        Wake::Tick
    }
}

/// Run one status call, giving up once the deadline plus
/// [`REFRESH_GRACE_PERIOD`] has passed. `None` means the call was abandoned.
pub(crate) async fn call_within<Fut: Future>(call: Fut, deadline: Instant) -> Option<Fut::Output> {
    let limit = deadline.checked_add(REFRESH_GRACE_PERIOD).unwrap_or(deadline);
    tokio::select! {
        biased;
        output = call => Some(output),
        _ = tokio::time::sleep_until(limit) => None,
    }
}

/// Poll until the object reaches a target status.
///
/// Returns the object from the final tick, or a [`WaitError`] describing why
/// the wait stopped. Use [`poll_with_cancel`] to make the wait cancellable.
pub async fn poll<T, S, E, F, Fut>(spec: &PollSpec<S>, refresh: F) -> Result<T, WaitError<S, E>>
where
    S: PartialEq + Clone + fmt::Debug,
    F: FnMut() -> Fut,
    Fut: Future<Output = RefreshResult<T, S, E>>,
{
    run(spec, &CancellationToken::new(), refresh)
        .await
        .into_result()
}

/// [`poll`] that stops with [`WaitError::Cancelled`] once `cancel` fires.
///
/// A status call already in flight is allowed to finish; no further tick is
/// scheduled after cancellation.
pub async fn poll_with_cancel<T, S, E, F, Fut>(
    spec: &PollSpec<S>,
    cancel: &CancellationToken,
    refresh: F,
) -> Result<T, WaitError<S, E>>
where
    S: PartialEq + Clone + fmt::Debug,
    F: FnMut() -> Fut,
    Fut: Future<Output = RefreshResult<T, S, E>>,
{
    run(spec, cancel, refresh).await.into_result()
}

/// Run the poll loop and report the full outcome.
#[instrument(skip_all, name = "poll", fields(timeout = ?spec.timeout()))]
pub async fn run<T, S, E, F, Fut>(
    spec: &PollSpec<S>,
    cancel: &CancellationToken,
    mut refresh: F,
) -> PollOutcome<T, S, E>
where
    S: PartialEq + Clone + fmt::Debug,
    F: FnMut() -> Fut,
    Fut: Future<Output = RefreshResult<T, S, E>>,
{
    if let Err(err) = spec.validate() {
        return PollOutcome::Failed(WaitError::InvalidSpec(err));
    }

    let deadline = deadline_after(spec.timeout);
    let mut schedule = Schedule::new(spec.min_timeout, spec.poll_interval);
    let mut wait = spec.delay;
    let mut ticks: u32 = 0;
    let mut not_found: u32 = 0;
    let mut target_seen: u32 = 0;
    let mut last: Option<Observation<T, S>> = None;

    loop {
        match wait_for_tick(wait, deadline, cancel).await {
            Wake::Tick => {}
            Wake::Expired => {
                debug!(ticks, last_status = ?last.as_ref().map(|o| &o.status), "wait timed out");
                return PollOutcome::TimedOut {
                    last,
                    timeout: spec.timeout,
                    expected: spec.target.clone(),
                };
            }
            Wake::Cancelled => {
                debug!(ticks, "wait cancelled");
                return PollOutcome::Failed(WaitError::Cancelled);
            }
        }

        ticks += 1;
        let Some(result) = call_within(refresh(), deadline).await else {
            debug!(ticks, "status refresh still running after the deadline");
            return PollOutcome::TimedOut {
                last,
                timeout: spec.timeout,
                expected: spec.target.clone(),
            };
        };
        match result {
            Err(err) => {
                debug!(ticks, "status refresh failed");
                return PollOutcome::Failed(WaitError::Remote(err));
            }
            Ok(None) => {
                target_seen = 0;
                not_found += 1;
                if not_found > spec.not_found_checks {
                    debug!(ticks, not_found, "object still not found, giving up");
                    return PollOutcome::Failed(WaitError::NotFound { checks: not_found });
                }
                trace!(ticks, not_found, "object not found");
            }
            Ok(Some(observation)) => {
                not_found = 0;
                if spec.target.contains(&observation.status) {
                    target_seen += 1;
                    if target_seen >= spec.continuous_target_occurrence {
                        debug!(ticks, status = ?observation.status, "target state reached");
                        return PollOutcome::Succeeded(observation.object);
                    }
                    trace!(ticks, target_seen, status = ?observation.status, "target state seen");
                } else if spec.pending.contains(&observation.status) {
                    target_seen = 0;
                    trace!(ticks, status = ?observation.status, "still pending");
                } else {
                    debug!(ticks, status = ?observation.status, "unexpected state");
                    return PollOutcome::Failed(WaitError::UnexpectedState {
                        status: observation.status,
                        reason: observation.reason,
                        expected: spec.target.clone(),
                    });
                }
                last = Some(observation);
            }
        }

        wait = schedule.next_wait(target_seen == 0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ApiError;
    use crate::testing::{assert_cancelled, assert_timed_out, ScriptedRefresh, Step};
    use std::sync::atomic::{AtomicUsize, Ordering};

    const TICK: Duration = Duration::from_secs(1);

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum EnvStatus {
        Pending,
        Starting,
        Running,
        Failed,
    }

    use EnvStatus::*;

    fn spec(timeout: Duration) -> PollSpec<EnvStatus> {
        PollSpec::new([Pending, Starting], [Running], timeout).with_poll_interval(TICK)
    }

    #[test]
    fn test_validate_rejects_overlap() {
        let spec = PollSpec::new([Pending, Running], [Running], TICK);
        assert_eq!(
            spec.validate(),
            Err(InvalidPollSpec::OverlappingStatus("Running".to_string()))
        );
    }

    #[test]
    fn test_validate_rejects_degenerate_values() {
        let empty: [EnvStatus; 0] = [];
        assert_eq!(
            PollSpec::new([Pending], empty, TICK).validate(),
            Err(InvalidPollSpec::EmptyTarget)
        );
        assert_eq!(
            PollSpec::new([Pending], [Running], Duration::ZERO).validate(),
            Err(InvalidPollSpec::ZeroTimeout)
        );
        assert_eq!(
            spec(TICK).with_continuous_target_occurrence(0).validate(),
            Err(InvalidPollSpec::ZeroTargetOccurrence)
        );
        assert_eq!(
            spec(TICK).with_poll_interval(Duration::ZERO).validate(),
            Err(InvalidPollSpec::ZeroPollInterval)
        );
        assert!(spec(TICK).validate().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_spec_never_ticks() {
        let script = ScriptedRefresh::new(vec![Step::found(Running)]);
        let spec = PollSpec::new([Running], [Running], TICK);
        let err = poll(&spec, script.refresh()).await.unwrap_err();
        assert!(matches!(err, WaitError::InvalidSpec(_)));
        assert_eq!(script.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_after_pending_ticks() {
        let script = ScriptedRefresh::new(vec![
            Step::found(Pending),
            Step::found(Pending),
            Step::found(Starting),
            Step::found(Running),
        ]);
        let object = poll(&spec(Duration::from_secs(60)), script.refresh())
            .await
            .unwrap();
        assert_eq!(object, 4);
        assert_eq!(script.calls(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_continuous_target_occurrence_scenario() {
        let script = ScriptedRefresh::new(vec![
            Step::found(Pending),
            Step::found(Starting),
            Step::found(Running),
            Step::found(Running),
        ]);
        let spec = spec(5 * TICK).with_continuous_target_occurrence(2);
        let object = poll(&spec, script.refresh()).await.unwrap();
        assert_eq!(object, 4);
        assert_eq!(script.calls(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_flapping_target_resets_occurrence() {
        let script = ScriptedRefresh::new(vec![
            Step::found(Running),
            Step::found(Starting),
            Step::found(Running),
            Step::found(Running),
        ]);
        let spec = spec(Duration::from_secs(60)).with_continuous_target_occurrence(2);
        assert_eq!(poll(&spec, script.refresh()).await.unwrap(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_scenario() {
        let script = ScriptedRefresh::new(vec![Step::found(Pending)]);
        let started = Instant::now();
        let err = poll(&spec(5 * TICK), script.refresh()).await.unwrap_err();

        assert_timed_out(&err);
        assert_eq!(script.calls(), 5);
        let elapsed = started.elapsed();
        assert!(elapsed >= 5 * TICK);
        assert!(elapsed <= 6 * TICK);
        assert_eq!(
            err.to_string(),
            "timeout while waiting for state to become 'Running' (last state: 'Pending', timeout: 5s)"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_keeps_last_observation() {
        let script = ScriptedRefresh::new(vec![
            Step::found(Pending),
            Step::found_with_reason(Starting, "pulling image"),
        ]);
        let outcome = run(&spec(3 * TICK), &CancellationToken::new(), script.refresh()).await;
        match outcome {
            PollOutcome::TimedOut { last, .. } => {
                let last = last.expect("an object was observed");
                assert_eq!(last.status, Starting);
                assert_eq!(last.object, 3);
            }
            other => panic!("expected timeout, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_with_backoff_stays_bounded() {
        let script = ScriptedRefresh::new(vec![Step::found(Pending)]);
        let spec = PollSpec::new([Pending], [Running], Duration::from_secs(30));
        let started = Instant::now();
        let err = poll(&spec, script.refresh()).await.unwrap_err();
        assert_timed_out(&err);
        assert!(started.elapsed() <= Duration::from_secs(30) + MAX_BACKOFF_WAIT);
    }

    #[tokio::test(start_paused = true)]
    async fn test_not_found_tolerated_then_success() {
        let script = ScriptedRefresh::new(vec![
            Step::missing(),
            Step::missing(),
            Step::missing(),
            Step::found(Running),
        ]);
        let spec = spec(Duration::from_secs(60)).with_not_found_checks(5);
        assert_eq!(poll(&spec, script.refresh()).await.unwrap(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_not_found_exhausted() {
        let script = ScriptedRefresh::new(vec![Step::missing()]);
        let spec = spec(Duration::from_secs(60)).with_not_found_checks(3);
        let err = poll(&spec, script.refresh()).await.unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(script.calls(), 4);
        assert_eq!(err.to_string(), "couldn't find resource (4 retries)");
    }

    #[tokio::test(start_paused = true)]
    async fn test_not_found_counter_resets_when_found() {
        let script = ScriptedRefresh::new(vec![
            Step::missing(),
            Step::missing(),
            Step::found(Pending),
            Step::missing(),
            Step::missing(),
            Step::found(Running),
        ]);
        let spec = spec(Duration::from_secs(60)).with_not_found_checks(2);
        assert_eq!(poll(&spec, script.refresh()).await.unwrap(), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unexpected_state_fails_immediately() {
        let script = ScriptedRefresh::new(vec![
            Step::found(Pending),
            Step::found_with_reason(Failed, "image not found"),
            Step::found(Running),
        ]);
        let err = poll(&spec(Duration::from_secs(60)), script.refresh())
            .await
            .unwrap_err();
        assert_eq!(script.calls(), 2);
        assert_eq!(
            err.to_string(),
            "unexpected state 'Failed', wanted target 'Running': image not found"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_remote_error_fails_immediately() {
        let script = ScriptedRefresh::new(vec![
            Step::found(Pending),
            Step::error(ApiError::new("InternalFailure", "boom")),
        ]);
        let err = poll(&spec(Duration::from_secs(60)), script.refresh())
            .await
            .unwrap_err();
        assert!(matches!(err, WaitError::Remote(ref e) if e.code == "InternalFailure"));
        assert_eq!(script.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_is_prompt() {
        let script = ScriptedRefresh::new(vec![Step::found(Pending)]);
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(TICK * 5 / 2).await;
            trigger.cancel();
        });

        let started = Instant::now();
        let err = poll_with_cancel(&spec(Duration::from_secs(60)), &cancel, script.refresh())
            .await
            .unwrap_err();

        assert_cancelled(&err);
        assert!(!err.is_timeout());
        assert!(started.elapsed() < TICK * 5 / 2 + TICK);
        assert_eq!(script.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_before_first_tick() {
        let script = ScriptedRefresh::new(vec![Step::found(Running)]);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = poll_with_cancel(&spec(TICK * 10), &cancel, script.refresh())
            .await
            .unwrap_err();
        assert_cancelled(&err);
        assert_eq!(script.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delay_postpones_first_tick() {
        let script = ScriptedRefresh::new(vec![Step::found(Running)]);
        let spec = spec(Duration::from_secs(60)).with_delay(Duration::from_secs(10));
        let started = Instant::now();
        poll(&spec, script.refresh()).await.unwrap();
        assert_eq!(started.elapsed(), Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unbounded_timeout_does_not_overflow() {
        let script = ScriptedRefresh::new(vec![Step::found(Pending), Step::found(Running)]);
        let spec = spec(Duration::MAX);
        assert!(spec.validate().is_ok());
        assert_eq!(poll(&spec, script.refresh()).await.unwrap(), 2);

        let script = ScriptedRefresh::new(vec![Step::found(Running)]);
        let spec =
            PollSpec::new([Pending], [Running], Duration::MAX).with_poll_interval(Duration::MAX);
        assert_eq!(poll(&spec, script.refresh()).await.unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_refresh_is_abandoned_after_grace_period() {
        let calls = AtomicUsize::new(0);
        let started = Instant::now();
        let outcome = run(&spec(5 * TICK), &CancellationToken::new(), || {
            let call = calls.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if call > 1 {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                }
                Ok::<_, ApiError>(Some(Observation::new(call, Pending)))
            }
        })
        .await;

        assert!(!outcome.is_success());
        assert_eq!(started.elapsed(), 5 * TICK + REFRESH_GRACE_PERIOD);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        match outcome.into_result() {
            Err(WaitError::TimedOut { last_status, .. }) => {
                assert_eq!(last_status, Some(Pending))
            }
            other => panic!("expected timeout, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_waits_for_in_flight_refresh() {
        let calls = AtomicUsize::new(0);
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(TICK).await;
            trigger.cancel();
        });

        let started = Instant::now();
        let err = poll_with_cancel(&spec(Duration::from_secs(60)), &cancel, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                tokio::time::sleep(3 * TICK).await;
                Ok::<_, ApiError>(Some(Observation::new((), Pending)))
            }
        })
        .await
        .unwrap_err();

        assert_cancelled(&err);
        assert_eq!(started.elapsed(), 3 * TICK);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_min_timeout_floors_backoff() {
        let script = ScriptedRefresh::new(vec![
            Step::found(Pending),
            Step::found(Pending),
            Step::found(Pending),
            Step::found(Running),
        ]);
        let spec = PollSpec::new([Pending], [Running], Duration::from_secs(60))
            .with_min_timeout(Duration::from_secs(2));
        let started = Instant::now();
        let outcome = run(&spec, &CancellationToken::new(), script.refresh()).await;

        assert!(outcome.is_success());
        // 2s floor, then doubling: 2s + 4s + 8s.
        assert_eq!(started.elapsed(), Duration::from_secs(14));
        assert_eq!(script.calls(), 4);
    }

    #[test]
    fn test_backoff_schedule() {
        let mut schedule = Schedule::new(Duration::ZERO, None);
        assert_eq!(schedule.next_wait(true), Duration::from_millis(200));
        assert_eq!(schedule.next_wait(true), Duration::from_millis(400));
        assert_eq!(schedule.next_wait(false), Duration::from_millis(400));
        for _ in 0..10 {
            schedule.next_wait(true);
        }
        assert_eq!(schedule.next_wait(true), MAX_BACKOFF_WAIT);

        let mut schedule = Schedule::new(Duration::from_secs(3), None);
        assert_eq!(schedule.next_wait(true), Duration::from_secs(3));

        let mut schedule = Schedule::new(Duration::from_secs(3), Some(Duration::from_secs(30)));
        assert_eq!(schedule.next_wait(true), Duration::from_secs(30));
    }
}
