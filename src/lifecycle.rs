//! Glue between waiters and CRUD handlers.
//!
//! Handlers report failures as [`ProviderError`]s that name the operation and
//! the resource, e.g. `creating Dev Environment (env-1): timeout while
//! waiting for state to become 'Running'`. This module maps wait, lookup and
//! retry failures onto provider error kinds and implements the two absence
//! policies every resource shares:
//!
//! - a read that finds nothing removes the resource from state, unless the
//!   resource was just created ([`read_outcome`]);
//! - a delete that finds nothing has already succeeded ([`delete_outcome`]).

use std::fmt;

use tracing::warn;

use crate::classify::RemoteError;
use crate::error::ProviderError;
use crate::finder::FindError;
use crate::poller::WaitError;
use crate::retry::RetryError;

/// A CRUD operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// Create a resource.
    Create,
    /// Read a resource.
    Read,
    /// Update a resource.
    Update,
    /// Delete a resource.
    Delete,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let gerund = match self {
            Operation::Create => "creating",
            Operation::Read => "reading",
            Operation::Update => "updating",
            Operation::Delete => "deleting",
        };
        f.write_str(gerund)
    }
}

/// The resource a handler is working on, for error context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceRef {
    /// Human-readable resource type, e.g. `Dev Environment`.
    pub resource_type: String,
    /// Remote identifier.
    pub id: String,
}

impl ResourceRef {
    /// Create a new resource reference.
    pub fn new(resource_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            id: id.into(),
        }
    }

    /// Wrap `err` with the operation and this resource.
    pub fn error(&self, op: Operation, err: impl Into<ProviderError>) -> ProviderError {
        err.into().with_context(format!("{} {}", op, self))
    }

    /// Wrap the error of `result` with the operation and this resource.
    pub fn context<T, E>(&self, op: Operation, result: Result<T, E>) -> Result<T, ProviderError>
    where
        E: Into<ProviderError>,
    {
        result.map_err(|err| self.error(op, err))
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.resource_type, self.id)
    }
}

/// Errors that may mean "the object does not exist".
pub trait MaybeAbsent {
    /// Returns `true` if the error reports absence.
    fn is_absent(&self) -> bool;
}

impl<E> MaybeAbsent for FindError<E> {
    fn is_absent(&self) -> bool {
        self.is_not_found()
    }
}

impl<S, E> MaybeAbsent for WaitError<S, E> {
    fn is_absent(&self) -> bool {
        self.is_not_found()
    }
}

impl<E> MaybeAbsent for RetryError<FindError<E>> {
    fn is_absent(&self) -> bool {
        match self {
            RetryError::TimedOut { last, .. } => {
                last.as_ref().is_some_and(|err| err.is_not_found())
            }
            RetryError::Failed(err) => err.is_not_found(),
            RetryError::StillExists { .. } | RetryError::Cancelled => false,
        }
    }
}

impl<E: RemoteError> From<FindError<E>> for ProviderError {
    fn from(err: FindError<E>) -> Self {
        match err {
            FindError::NotFound(err) => err.into(),
            FindError::Remote(err) => ProviderError::from_remote(&err),
        }
    }
}

impl<S, E> From<WaitError<S, E>> for ProviderError
where
    S: fmt::Debug,
    E: RemoteError,
{
    fn from(err: WaitError<S, E>) -> Self {
        let msg = err.to_string();
        match err {
            WaitError::TimedOut { .. } => ProviderError::DeadlineExceeded(msg),
            WaitError::UnexpectedState { .. } => ProviderError::FailedPrecondition(msg),
            WaitError::NotFound { .. } => ProviderError::NotFound(msg),
            WaitError::Cancelled => ProviderError::Cancelled(msg),
            WaitError::Remote(err) => ProviderError::from_remote(&err),
            WaitError::InvalidSpec(_) => ProviderError::Validation(msg),
        }
    }
}

impl<E> From<RetryError<E>> for ProviderError
where
    E: fmt::Display,
    ProviderError: From<E>,
{
    fn from(err: RetryError<E>) -> Self {
        match err {
            RetryError::Failed(err) => err.into(),
            RetryError::Cancelled => ProviderError::Cancelled(err.to_string()),
            RetryError::TimedOut { .. } | RetryError::StillExists { .. } => {
                ProviderError::DeadlineExceeded(err.to_string())
            }
        }
    }
}

/// Apply the read-handler absence policy to a lookup result.
///
/// Returns `Ok(None)` when an existing resource is gone; the handler should
/// then remove it from state. Absence of a resource created in this run is an
/// error, since it can only mean the create did not stick.
pub fn read_outcome<T, E>(
    result: Result<T, E>,
    is_new_resource: bool,
    resource: &ResourceRef,
) -> Result<Option<T>, ProviderError>
where
    E: MaybeAbsent + Into<ProviderError>,
{
    match result {
        Ok(object) => Ok(Some(object)),
        Err(err) if err.is_absent() && !is_new_resource => {
            warn!(
                resource_type = %resource.resource_type,
                id = %resource.id,
                "{} not found, removing from state",
                resource
            );
            Ok(None)
        }
        Err(err) => Err(resource.error(Operation::Read, err)),
    }
}

/// Apply the delete-handler absence policy: an object that is already gone
/// counts as deleted.
pub fn delete_outcome<T, E>(
    result: Result<T, E>,
    resource: &ResourceRef,
) -> Result<(), ProviderError>
where
    E: MaybeAbsent + Into<ProviderError>,
{
    match result {
        Ok(_) => Ok(()),
        Err(err) if err.is_absent() => Ok(()),
        Err(err) => Err(resource.error(Operation::Delete, err)),
    }
}
