//! Classification of remote errors into "absent" and "everything else".
//!
//! Every remote API family has its own way of saying an object does not exist:
//! a `ResourceNotFoundException`, a `ValidationException` whose message says
//! "does not exist", and occasionally an access-denied error that hides an
//! object owned by another account. Absence detection is written once per API
//! family as an [`AbsenceRule`], registered in an [`AbsenceRegistry`], and
//! applied by [`classify`] at the boundary of every lookup.
//!
//! # Example
//!
//! ```
//! use hemmer_provider_waiter::classify::{classify, AbsenceRule};
//! use hemmer_provider_waiter::error::ApiError;
//!
//! let rule = AbsenceRule::new().code("ResourceNotFoundException");
//!
//! let err = classify(
//!     ApiError::new("ResourceNotFoundException", "no such project"),
//!     &"GetProject(p-1)",
//!     &rule,
//! );
//! assert!(err.is_not_found());
//! ```

use std::collections::HashMap;
use std::fmt;

use tracing::trace;

use crate::error::NotFoundError;
use crate::finder::FindError;

/// A remote error that exposes a service error code.
pub trait RemoteError: std::error::Error + Send + Sync + 'static {
    /// The service error code, e.g. `ResourceNotFoundException`.
    fn code(&self) -> Option<&str>;

    /// The service error message, when it is separate from the code.
    fn message(&self) -> Option<&str> {
        None
    }
}

/// Decides whether a remote error means "the resource does not exist".
pub trait AbsencePredicate<E: ?Sized>: Send + Sync {
    /// Return `true` if `err` reports the absence of the addressed object.
    fn is_absent(&self, err: &E) -> bool;
}

impl<E: ?Sized, F> AbsencePredicate<E> for F
where
    F: Fn(&E) -> bool + Send + Sync,
{
    fn is_absent(&self, err: &E) -> bool {
        self(err)
    }
}

/// Map a remote error to a not-found signal or pass it through unchanged.
///
/// When `predicate` recognizes `err` as an absence, the result is
/// [`FindError::NotFound`] carrying `err` as its source and a rendering of
/// `request`. Otherwise `err` is returned untouched as [`FindError::Remote`].
pub fn classify<E, R, P>(err: E, request: &R, predicate: &P) -> FindError<E>
where
    E: std::error::Error + Send + Sync + 'static,
    R: fmt::Debug + ?Sized,
    P: AbsencePredicate<E> + ?Sized,
{
    if predicate.is_absent(&err) {
        trace!(error = %err, "remote error classified as absence");
        FindError::NotFound(NotFoundError::from_cause(err).with_request(request))
    } else {
        FindError::Remote(err)
    }
}

/// [`classify`] lifted over a `Result`; `Ok` values pass through.
pub fn classify_result<T, E, R, P>(
    result: Result<T, E>,
    request: &R,
    predicate: &P,
) -> Result<T, FindError<E>>
where
    E: std::error::Error + Send + Sync + 'static,
    R: fmt::Debug + ?Sized,
    P: AbsencePredicate<E> + ?Sized,
{
    result.map_err(|err| classify(err, request, predicate))
}

/// Returns `true` if the error code of `err` is any of `codes`.
pub fn error_code_equals<E: RemoteError + ?Sized>(err: &E, codes: &[&str]) -> bool {
    err.code().is_some_and(|code| codes.contains(&code))
}

/// Returns `true` if `err` has code `code` and its message contains `needle`.
pub fn error_message_contains<E: RemoteError + ?Sized>(err: &E, code: &str, needle: &str) -> bool {
    if err.code() != Some(code) {
        return false;
    }
    match err.message() {
        Some(message) => message.contains(needle),
        None => err.to_string().contains(needle),
    }
}

/// Data-driven absence predicate for one remote API family.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AbsenceRule {
    codes: Vec<String>,
    code_messages: Vec<(String, String)>,
    access_denied_codes: Vec<String>,
}

impl AbsenceRule {
    /// A rule that matches nothing.
    pub fn new() -> Self {
        Self::default()
    }

    /// The codes most remote APIs use for a missing object.
    pub fn common() -> Self {
        Self::new()
            .code("ResourceNotFoundException")
            .code("NotFoundException")
    }

    /// Treat `code` as absence.
    pub fn code(mut self, code: impl Into<String>) -> Self {
        self.codes.push(code.into());
        self
    }

    /// Treat `code` as absence only when its message contains `needle`.
    pub fn code_with_message(mut self, code: impl Into<String>, needle: impl Into<String>) -> Self {
        self.code_messages.push((code.into(), needle.into()));
        self
    }

    /// Treat the access-denied `code` as absence.
    ///
    /// Only for APIs that answer access-denied for objects owned by another
    /// account that no longer exist. Use it where that ambiguity is documented.
    pub fn masked_by_access_denied(mut self, code: impl Into<String>) -> Self {
        self.access_denied_codes.push(code.into());
        self
    }

    /// Whether access-denied errors are ever read as absence under this rule.
    pub fn masks_access_denied(&self) -> bool {
        !self.access_denied_codes.is_empty()
    }
}

impl<E: RemoteError + ?Sized> AbsencePredicate<E> for AbsenceRule {
    fn is_absent(&self, err: &E) -> bool {
        let Some(code) = err.code() else {
            return false;
        };
        self.codes.iter().any(|c| c == code)
            || self.access_denied_codes.iter().any(|c| c == code)
            || self
                .code_messages
                .iter()
                .any(|(c, needle)| error_message_contains(err, c, needle))
    }
}

/// Absence rules keyed by remote API family.
#[derive(Debug, Clone, Default)]
pub struct AbsenceRegistry {
    rules: HashMap<String, AbsenceRule>,
}

impl AbsenceRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the rule for an API family, replacing any previous one.
    pub fn with_rule(mut self, api: impl Into<String>, rule: AbsenceRule) -> Self {
        self.register(api, rule);
        self
    }

    /// Register the rule for an API family, replacing any previous one.
    pub fn register(&mut self, api: impl Into<String>, rule: AbsenceRule) {
        self.rules.insert(api.into(), rule);
    }

    /// The rule registered for an API family.
    pub fn rule(&self, api: &str) -> Option<&AbsenceRule> {
        self.rules.get(api)
    }

    /// Classify `err` with the rule registered for `api`.
    ///
    /// Errors from an unregistered family are passed through as remote errors.
    pub fn classify<E, R>(&self, api: &str, err: E, request: &R) -> FindError<E>
    where
        E: RemoteError,
        R: fmt::Debug + ?Sized,
    {
        match self.rules.get(api) {
            Some(rule) => classify(err, request, rule),
            None => FindError::Remote(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ApiError;

    fn not_found() -> ApiError {
        ApiError::new("ResourceNotFoundException", "Project p-1 not found")
    }

    #[test]
    fn test_classify_ok_passes_through() {
        let result: Result<u32, ApiError> = Ok(7);
        let always = |_: &ApiError| true;
        let never = |_: &ApiError| false;
        assert_eq!(classify_result(result.clone(), &"req", &always).unwrap(), 7);
        assert_eq!(classify_result(result, &"req", &never).unwrap(), 7);
    }

    #[test]
    fn test_classify_never_is_identity() {
        let never = |_: &ApiError| false;
        match classify(not_found(), &"req", &never) {
            FindError::Remote(err) => assert_eq!(err, not_found()),
            other => panic!("expected passthrough, got {:?}", other),
        }
    }

    #[test]
    fn test_classify_always_wraps_cause() {
        let always = |_: &ApiError| true;
        let err = ApiError::new("Anything", "boom");
        match classify(err.clone(), &"GetProject(p-1)", &always) {
            FindError::NotFound(nf) => {
                assert_eq!(nf.last_request(), Some("\"GetProject(p-1)\""));
                let cause = nf.cause().expect("cause recorded");
                assert_eq!(cause.to_string(), err.to_string());
            }
            other => panic!("expected not found, got {:?}", other),
        }
    }

    #[test]
    fn test_rule_matches_codes() {
        let rule = AbsenceRule::common();
        assert!(rule.is_absent(&not_found()));
        assert!(rule.is_absent(&ApiError::new("NotFoundException", "")));
        assert!(!rule.is_absent(&ApiError::new("ValidationException", "bad")));
    }

    #[test]
    fn test_rule_matches_code_with_message() {
        let rule = AbsenceRule::new().code_with_message("ValidationException", "does not exist");
        assert!(rule.is_absent(&ApiError::new(
            "ValidationException",
            "Collaboration c-1 does not exist"
        )));
        assert!(!rule.is_absent(&ApiError::new("ValidationException", "name too long")));
    }

    #[test]
    fn test_access_denied_is_not_absence_by_default() {
        let denied = ApiError::new("AccessDeniedException", "not authorized");
        let rule = AbsenceRule::common();
        assert!(!rule.masks_access_denied());
        assert!(!rule.is_absent(&denied));

        let rule = AbsenceRule::common().masked_by_access_denied("AccessDeniedException");
        assert!(rule.masks_access_denied());
        assert!(rule.is_absent(&denied));
    }

    #[test]
    fn test_registry_classifies_per_api() {
        let registry = AbsenceRegistry::new()
            .with_rule("cleanrooms", AbsenceRule::common())
            .with_rule("iam", AbsenceRule::new().code("NoSuchEntity"));

        assert!(registry
            .classify("iam", ApiError::new("NoSuchEntity", "role"), &"GetRole")
            .is_not_found());
        assert!(!registry
            .classify("cleanrooms", ApiError::new("NoSuchEntity", "role"), &"GetRole")
            .is_not_found());
        assert!(!registry
            .classify("unknown", not_found(), &"Get")
            .is_not_found());
        assert!(registry.rule("iam").is_some());
    }

    #[test]
    fn test_error_code_helpers() {
        let err = ApiError::new("InvalidParameterValue", "subnet is in use");
        assert!(error_code_equals(&err, &["Throttling", "InvalidParameterValue"]));
        assert!(!error_code_equals(&err, &["Throttling"]));
        assert!(error_message_contains(&err, "InvalidParameterValue", "in use"));
        assert!(!error_message_contains(&err, "Throttling", "in use"));
    }
}
