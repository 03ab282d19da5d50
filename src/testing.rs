//! Testing utilities for waiters and resource handlers.
//!
//! This module lets provider authors exercise their wait logic without a
//! remote API: [`ScriptedRefresh`] replays a fixed sequence of status
//! observations, and [`FakeApi`] is an in-memory remote service whose objects
//! step through scripted statuses as they are described.
//!
//! Pair these with `#[tokio::test(start_paused = true)]` so the poller's
//! sleeps complete instantly and elapsed time is deterministic.
//!
//! # Example
//!
//! ```ignore
//! use hemmer_provider_waiter::poller::{poll, PollSpec};
//! use hemmer_provider_waiter::testing::{ScriptedRefresh, Step};
//!
//! #[tokio::test(start_paused = true)]
//! async fn waits_for_running() {
//!     let script = ScriptedRefresh::new(vec![
//!         Step::found("PENDING"),
//!         Step::found("RUNNING"),
//!     ]);
//!     let spec = PollSpec::new(["PENDING"], ["RUNNING"], Duration::from_secs(60));
//!
//!     assert_eq!(poll(&spec, script.refresh()).await.unwrap(), 2);
//!     assert_eq!(script.calls(), 2);
//! }
//! ```

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::future::{ready, Ready};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::classify::{classify, AbsenceRule};
use crate::error::ApiError;
use crate::finder::{FindError, Finder};
use crate::poller::WaitError;
use crate::status::{Observation, RefreshResult, RemoteObject};

/// Error code the fake API uses for missing objects.
pub const NOT_FOUND_CODE: &str = "ResourceNotFoundException";

/// One scripted answer of a [`ScriptedRefresh`].
#[derive(Debug, Clone, PartialEq)]
pub enum Step<S> {
    /// The object exists with this status.
    Found {
        /// Observed status.
        status: S,
        /// Observed status message.
        reason: Option<String>,
    },
    /// The object is not visible.
    Missing,
    /// The status call fails.
    Error(ApiError),
}

impl<S> Step<S> {
    /// The object exists with `status`.
    pub fn found(status: S) -> Self {
        Step::Found {
            status,
            reason: None,
        }
    }

    /// The object exists with `status` and a status message.
    pub fn found_with_reason(status: S, reason: impl Into<String>) -> Self {
        Step::Found {
            status,
            reason: Some(reason.into()),
        }
    }

    /// The object is not visible.
    pub fn missing() -> Self {
        Step::Missing
    }

    /// The status call fails with `err`.
    pub fn error(err: ApiError) -> Self {
        Step::Error(err)
    }
}

/// A status function that replays scripted steps.
///
/// The object of every observation is the 1-based call number, so tests can
/// tell which tick a result came from. Once the script runs out, the last step
/// repeats forever.
#[derive(Debug)]
pub struct ScriptedRefresh<S> {
    steps: Vec<Step<S>>,
    calls: AtomicUsize,
}

impl<S: Clone> ScriptedRefresh<S> {
    /// Create a script from its steps.
    pub fn new(steps: Vec<Step<S>>) -> Self {
        Self {
            steps,
            calls: AtomicUsize::new(0),
        }
    }

    /// Number of status calls made so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// A status function for the poller.
    pub fn refresh(&self) -> impl FnMut() -> Ready<RefreshResult<usize, S, ApiError>> + '_ {
        move || ready(self.next())
    }

    fn next(&self) -> RefreshResult<usize, S, ApiError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        match self.steps.get(call - 1).or(self.steps.last()) {
            Some(Step::Found { status, reason }) => Ok(Some(Observation {
                object: call,
                status: status.clone(),
                reason: reason.clone(),
            })),
            Some(Step::Missing) | None => Ok(None),
            Some(Step::Error(err)) => Err(err.clone()),
        }
    }
}

/// An object held by [`FakeApi`].
#[derive(Debug, Clone, PartialEq)]
pub struct FakeResource<S> {
    /// Identifier of the object.
    pub id: String,
    /// Status at the time of the describe call.
    pub status: S,
}

impl<S: Clone> RemoteObject for FakeResource<S> {
    type Status = S;

    fn status(&self) -> S {
        self.status.clone()
    }

    fn identifier(&self) -> String {
        self.id.clone()
    }
}

#[derive(Debug)]
struct Entry<S> {
    script: VecDeque<S>,
    current: Option<S>,
    hidden_reads: u32,
    deleting: bool,
}

#[derive(Debug)]
struct FakeState<S> {
    entries: HashMap<String, Entry<S>>,
    injected: VecDeque<ApiError>,
}

/// In-memory remote API for resource handler tests.
///
/// Each describe call moves an object one step along its status script; the
/// last status sticks. An object being deleted disappears once its script is
/// exhausted. Missing objects are reported with [`NOT_FOUND_CODE`] and
/// classified like a real finder would.
#[derive(Debug)]
pub struct FakeApi<S> {
    state: Mutex<FakeState<S>>,
    describes: AtomicUsize,
    absence: AbsenceRule,
}

impl<S> Default for FakeApi<S> {
    fn default() -> Self {
        Self {
            state: Mutex::new(FakeState {
                entries: HashMap::new(),
                injected: VecDeque::new(),
            }),
            describes: AtomicUsize::new(0),
            absence: AbsenceRule::new().code(NOT_FOUND_CODE),
        }
    }
}

impl<S: Clone> FakeApi<S> {
    /// Create an empty fake API.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FakeState<S>> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Create an object that reports `statuses` on successive describes.
    pub fn create(&self, id: impl Into<String>, statuses: Vec<S>) {
        self.lock().entries.insert(
            id.into(),
            Entry {
                script: statuses.into(),
                current: None,
                hidden_reads: 0,
                deleting: false,
            },
        );
    }

    /// Hide a fresh object from the next `reads` describes.
    pub fn with_propagation_delay(&self, id: &str, reads: u32) {
        if let Some(entry) = self.lock().entries.get_mut(id) {
            entry.hidden_reads = reads;
        }
    }

    /// Replace the status script of an existing object.
    pub fn update(&self, id: &str, statuses: Vec<S>) -> Result<(), ApiError> {
        let mut state = self.lock();
        let entry = state
            .entries
            .get_mut(id)
            .ok_or_else(|| missing_error(id))?;
        entry.script = statuses.into();
        Ok(())
    }

    /// Start deleting an object; it reports `statuses` and then disappears.
    pub fn delete(&self, id: &str, statuses: Vec<S>) -> Result<(), ApiError> {
        let mut state = self.lock();
        let entry = state
            .entries
            .get_mut(id)
            .ok_or_else(|| missing_error(id))?;
        entry.script = statuses.into();
        entry.deleting = true;
        Ok(())
    }

    /// Make the next describe call fail with `err`.
    pub fn inject_error(&self, err: ApiError) {
        self.lock().injected.push_back(err);
    }

    /// Number of describe calls made so far.
    pub fn describes(&self) -> usize {
        self.describes.load(Ordering::SeqCst)
    }

    /// Whether the API still holds `id`.
    pub fn contains(&self, id: &str) -> bool {
        self.lock().entries.contains_key(id)
    }

    fn describe(&self, id: &str) -> Result<FakeResource<S>, ApiError> {
        self.describes.fetch_add(1, Ordering::SeqCst);
        let mut guard = self.lock();
        let state = &mut *guard;
        if let Some(err) = state.injected.pop_front() {
            return Err(err);
        }

        let entry = state
            .entries
            .get_mut(id)
            .ok_or_else(|| missing_error(id))?;
        if entry.hidden_reads > 0 {
            entry.hidden_reads -= 1;
            return Err(missing_error(id));
        }

        match entry.script.pop_front() {
            Some(status) => entry.current = Some(status),
            None if entry.deleting => {
                state.entries.remove(id);
                return Err(missing_error(id));
            }
            None => {}
        }

        match &entry.current {
            Some(status) => Ok(FakeResource {
                id: id.to_string(),
                status: status.clone(),
            }),
            None => Err(missing_error(id)),
        }
    }
}

fn missing_error(id: &str) -> ApiError {
    ApiError::new(NOT_FOUND_CODE, format!("{} does not exist", id))
}

#[async_trait]
impl<S> Finder for FakeApi<S>
where
    S: Clone + Send + Sync + 'static,
{
    type Key = str;
    type Object = FakeResource<S>;
    type Error = ApiError;

    async fn find(&self, id: &str) -> Result<FakeResource<S>, FindError<ApiError>> {
        self.describe(id)
            .map_err(|err| classify(err, &("Describe", id), &self.absence))
    }
}

// =========================================================================
// Assertion Helpers
// =========================================================================

/// Assert that a wait ended in a timeout.
///
/// # Panics
///
/// Panics if the error is of any other kind.
pub fn assert_timed_out<S: fmt::Debug, E: fmt::Debug>(err: &WaitError<S, E>) {
    assert!(
        err.is_timeout(),
        "Expected the wait to time out, but got {:?}",
        err
    );
}

/// Assert that a wait was cancelled.
///
/// # Panics
///
/// Panics if the error is of any other kind.
pub fn assert_cancelled<S: fmt::Debug, E: fmt::Debug>(err: &WaitError<S, E>) {
    assert!(
        err.is_cancelled(),
        "Expected the wait to be cancelled, but got {:?}",
        err
    );
}

/// Assert that a wait stopped on an unexpected status equal to `status`.
///
/// # Panics
///
/// Panics if the error is not an unexpected-state error for `status`.
pub fn assert_unexpected_state<S, E>(err: &WaitError<S, E>, status: &S)
where
    S: fmt::Debug + PartialEq,
    E: fmt::Debug,
{
    match err {
        WaitError::UnexpectedState { status: seen, .. } => assert_eq!(
            seen, status,
            "Expected unexpected state {:?}, but got {:?}",
            status, seen
        ),
        other => panic!("Expected an unexpected-state error, but got {:?}", other),
    }
}

/// Assert that a lookup reported absence.
///
/// # Panics
///
/// Panics if the lookup succeeded or failed with a remote error.
pub fn assert_not_found<T: fmt::Debug, E: fmt::Debug>(result: &Result<T, FindError<E>>) {
    match result {
        Err(FindError::NotFound(_)) => {}
        other => panic!("Expected a not-found result, but got {:?}", other),
    }
}
