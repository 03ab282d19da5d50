//! Single-shot lookups of one remote object.
//!
//! A [`Finder`] wraps one describe/get call so that every caller sees the same
//! contract: a populated object, a [`NotFoundError`], or a remote error. Finders
//! never retry and never cache; timing belongs to the poller.
//!
//! The free functions in this module normalize awkward response shapes into
//! that contract:
//!
//! - [`require_payload`]: a successful response with no payload
//! - [`single_value`]: a list response that should hold exactly one item
//! - [`ensure_identifier`]: a response for a different object than requested
//! - [`reject_when`]: an object in a state that means it is already gone

use std::fmt;

use async_trait::async_trait;

use crate::error::NotFoundError;

/// Lookup failure: absence or a remote error.
#[derive(Debug)]
pub enum FindError<E> {
    /// The addressed object does not exist.
    NotFound(NotFoundError),
    /// The remote call failed for a reason unrelated to absence.
    Remote(E),
}

impl<E> FindError<E> {
    /// Returns `true` for [`FindError::NotFound`].
    pub fn is_not_found(&self) -> bool {
        matches!(self, FindError::NotFound(_))
    }

    /// The remote error, if this is not an absence.
    pub fn into_remote(self) -> Option<E> {
        match self {
            FindError::Remote(err) => Some(err),
            FindError::NotFound(_) => None,
        }
    }
}

impl<E> From<NotFoundError> for FindError<E> {
    fn from(err: NotFoundError) -> Self {
        FindError::NotFound(err)
    }
}

impl<E: fmt::Display> fmt::Display for FindError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FindError::NotFound(err) => write!(f, "{}", err),
            FindError::Remote(err) => write!(f, "{}", err),
        }
    }
}

impl<E> std::error::Error for FindError<E>
where
    E: std::error::Error + 'static,
{
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            FindError::NotFound(err) => std::error::Error::source(err),
            FindError::Remote(err) => std::error::Error::source(err),
        }
    }
}

/// Looks up exactly one remote object by key.
///
/// # Example
///
/// ```ignore
/// use hemmer_provider_waiter::classify::{classify_result, AbsenceRule};
/// use hemmer_provider_waiter::finder::{require_payload, FindError, Finder};
///
/// struct ProjectFinder<'a> {
///     client: &'a ProjectClient,
///     absence: AbsenceRule,
/// }
///
/// #[async_trait::async_trait]
/// impl Finder for ProjectFinder<'_> {
///     type Key = str;
///     type Object = Project;
///     type Error = ApiError;
///
///     async fn find(&self, name: &str) -> Result<Project, FindError<ApiError>> {
///         let request = GetProjectRequest::new(name);
///         let output = classify_result(self.client.get_project(&request).await, &request, &self.absence)?;
///         Ok(require_payload(output.project)?)
///     }
/// }
/// ```
#[async_trait]
pub trait Finder: Send + Sync {
    /// Identifier or composite key addressing one object.
    type Key: Send + Sync + ?Sized;
    /// The object returned by the remote API.
    type Object: Send;
    /// Remote error type.
    type Error: Send;

    /// Fetch the current remote object for `key`.
    async fn find(&self, key: &Self::Key) -> Result<Self::Object, FindError<Self::Error>>;
}

/// Treat a missing payload in a successful response as absence.
pub fn require_payload<T>(payload: Option<T>) -> Result<T, NotFoundError> {
    payload.ok_or_else(NotFoundError::empty_result)
}

/// Return the only element of `items`.
///
/// Zero items is an empty result; more than one is a too-many-results error.
pub fn single_value<T>(items: Vec<T>) -> Result<T, NotFoundError> {
    let count = items.len();
    let mut items = items.into_iter();
    match (items.next(), count) {
        (Some(item), 1) => Ok(item),
        (None, _) => Err(NotFoundError::empty_result()),
        (Some(_), count) => Err(NotFoundError::too_many_results(count)),
    }
}

/// Fail with absence when the remote returned a different object than requested.
///
/// Right after a mutating call some APIs briefly answer with stale data for a
/// neighbouring key.
pub fn ensure_identifier(expected: &str, actual: &str) -> Result<(), NotFoundError> {
    if expected == actual {
        Ok(())
    } else {
        Err(NotFoundError::new().with_message(format!(
            "identifier mismatch: requested {}, received {}",
            expected, actual
        )))
    }
}

/// Treat `object` as absent when `is_gone` holds for it.
pub fn reject_when<T>(
    object: T,
    is_gone: impl FnOnce(&T) -> bool,
    message: impl Into<String>,
) -> Result<T, NotFoundError> {
    if is_gone(&object) {
        Err(NotFoundError::new().with_message(message))
    } else {
        Ok(object)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::{classify_result, AbsenceRule};
    use crate::error::{ApiError, NotFoundKind};

    #[test]
    fn test_require_payload() {
        assert_eq!(require_payload(Some(3)).unwrap(), 3);
        let err = require_payload::<u32>(None).unwrap_err();
        assert_eq!(err.kind(), NotFoundKind::EmptyResult);
    }

    #[test]
    fn test_single_value() {
        assert_eq!(single_value(vec!["a"]).unwrap(), "a");
        assert_eq!(
            single_value::<u8>(vec![]).unwrap_err().kind(),
            NotFoundKind::EmptyResult
        );
        assert_eq!(
            single_value(vec![1, 2, 3]).unwrap_err().kind(),
            NotFoundKind::TooManyResults(3)
        );
    }

    #[test]
    fn test_ensure_identifier() {
        assert!(ensure_identifier("cr-1", "cr-1").is_ok());
        let err = ensure_identifier("cr-1", "cr-2").unwrap_err();
        assert_eq!(
            err.to_string(),
            "identifier mismatch: requested cr-1, received cr-2"
        );
    }

    #[test]
    fn test_into_remote() {
        let err: FindError<ApiError> = FindError::Remote(ApiError::new("InternalError", "boom"));
        assert_eq!(err.into_remote().map(|e| e.code), Some("InternalError".to_string()));
    }

    #[test]
    fn test_reject_when() {
        let gone = |state: &&str| *state == "cancelled" || *state == "expired";
        assert_eq!(reject_when("active", gone, "gone").unwrap(), "active");
        assert_eq!(
            reject_when("expired", gone, "expired").unwrap_err().to_string(),
            "expired"
        );
    }

    #[derive(Debug)]
    struct Table {
        name: String,
        rows: Option<u64>,
    }

    struct TableFinder {
        tables: Vec<(String, Option<u64>)>,
        absence: AbsenceRule,
    }

    #[async_trait]
    impl Finder for TableFinder {
        type Key = str;
        type Object = Table;
        type Error = ApiError;

        async fn find(&self, name: &str) -> Result<Table, FindError<ApiError>> {
            let response = self
                .tables
                .iter()
                .find(|(n, _)| n == name)
                .cloned()
                .ok_or_else(|| ApiError::new("ResourceNotFoundException", name));
            let (name, rows) = classify_result(response, &("GetTable", name), &self.absence)?;
            let rows = require_payload(rows)?;
            Ok(Table { name, rows: Some(rows) })
        }
    }

    #[tokio::test]
    async fn test_finder_contract() {
        let finder = TableFinder {
            tables: vec![("orders".into(), Some(10)), ("draft".into(), None)],
            absence: AbsenceRule::common(),
        };

        let table = finder.find("orders").await.unwrap();
        assert_eq!(table.name, "orders");
        assert_eq!(table.rows, Some(10));

        let err = finder.find("draft").await.unwrap_err();
        assert!(err.is_not_found());

        let err = finder.find("missing").await.unwrap_err();
        match err {
            FindError::NotFound(nf) => {
                assert_eq!(nf.last_request(), Some("(\"GetTable\", \"missing\")"))
            }
            FindError::Remote(e) => panic!("expected not found, got {}", e),
        }

        let err = finder.find("missing").await.unwrap_err();
        assert!(err.into_remote().is_none());
    }
}
