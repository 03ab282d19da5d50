//! Status functions: what the poller calls on every tick.
//!
//! A status function returns a [`RefreshResult`]: `Ok(Some(observation))` for
//! an object and its status, `Ok(None)` when the object is not (yet) visible,
//! or `Err` for a hard failure. The adapters here build status functions from
//! a [`Finder`], so resource code only supplies the finder and a status type.
//!
//! Status types are plain enums, one per remote API:
//!
//! ```
//! #[derive(Debug, Clone, PartialEq, Eq, Hash)]
//! enum DevEnvironmentStatus {
//!     Pending,
//!     Starting,
//!     Running,
//!     Failed,
//!     Deleted,
//! }
//! ```

use std::future::Future;
use std::pin::Pin;

use tracing::trace;

use crate::finder::{FindError, Finder};

/// Owned, boxed, `Send` future returned by the refresh adapters.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A remote object that reports a lifecycle status.
pub trait RemoteObject {
    /// The status enum of the remote API.
    type Status;

    /// The current status.
    fn status(&self) -> Self::Status;

    /// The identifier of the object.
    fn identifier(&self) -> String;

    /// A human-readable reason for the status, typically set on failure.
    fn status_reason(&self) -> Option<String> {
        None
    }
}

/// One observation of a remote object.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation<T, S> {
    /// The object as returned by the remote API.
    pub object: T,
    /// Its status at the time of the read.
    pub status: S,
    /// Status message reported alongside the status.
    pub reason: Option<String>,
}

impl<T, S> Observation<T, S> {
    /// Create an observation without a reason.
    pub fn new(object: T, status: S) -> Self {
        Self {
            object,
            status,
            reason: None,
        }
    }

    /// Attach a status reason.
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

impl<T: RemoteObject> Observation<T, T::Status> {
    /// Observe a remote object, taking its status and reason from the object.
    pub fn of(object: T) -> Self {
        let status = object.status();
        let reason = object.status_reason();
        Self {
            object,
            status,
            reason,
        }
    }
}

/// Result of one status-function call. `Ok(None)` means "not found".
pub type RefreshResult<T, S, E> = Result<Option<Observation<T, S>>, E>;

/// Status function over a finder; absence is reported as `Ok(None)`.
pub fn refresh_from<'a, F>(
    finder: &'a F,
    key: &'a F::Key,
) -> impl FnMut() -> BoxFuture<'a, RefreshResult<F::Object, <F::Object as RemoteObject>::Status, F::Error>>
       + 'a
where
    F: Finder,
    F::Object: RemoteObject + 'a,
    <F::Object as RemoteObject>::Status: Send + 'a,
    F::Error: 'a,
{
    move || {
        let refresh: BoxFuture<'a, _> = Box::pin(async move {
            match finder.find(key).await {
                Ok(object) => Ok(Some(Observation::of(object))),
                Err(FindError::NotFound(err)) => {
                    trace!(reason = %err, "object not found");
                    Ok(None)
                }
                Err(FindError::Remote(err)) => Err(err),
            }
        });
        refresh
    }
}

/// Status function for delete waiters.
///
/// Absence is reported as an observation of `gone` with no object, so a
/// poll targeting `gone` succeeds once the object disappears.
pub fn refresh_until_gone<'a, F, S>(
    finder: &'a F,
    key: &'a F::Key,
    gone: S,
) -> impl FnMut() -> BoxFuture<'a, RefreshResult<Option<F::Object>, S, F::Error>> + 'a
where
    F: Finder,
    F::Object: RemoteObject<Status = S> + 'a,
    F::Error: 'a,
    S: Clone + Send + 'a,
{
    move || {
        let gone = gone.clone();
        let refresh: BoxFuture<'a, _> = Box::pin(async move {
            match finder.find(key).await {
                Ok(object) => {
                    let observation = Observation::of(object);
                    Ok(Some(Observation {
                        object: Some(observation.object),
                        status: observation.status,
                        reason: observation.reason,
                    }))
                }
                Err(FindError::NotFound(err)) => {
                    trace!(reason = %err, "object gone");
                    Ok(Some(Observation::new(None, gone)))
                }
                Err(FindError::Remote(err)) => Err(err),
            }
        });
        refresh
    }
}
