//! Error types for Shipper
//!
//! Errors are structured with fields to aid debugging in production.
//! Each variant carries contextual information such as the resource name
//! and the operation that failed.

use std::fmt;

use thiserror::Error;

/// Main error type for Shipper operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// An object cannot be processed as written
    #[error("validation error for {resource}: {message}")]
    Validation {
        /// Name of the offending resource
        resource: String,
        /// Description of what's invalid
        message: String,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred (e.g., "apply_patches", "create_client")
        context: String,
    },
}

impl Error {
    /// Create a validation error with resource context
    pub fn validation_for(resource: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Validation {
            resource: resource.into(),
            message: msg.into(),
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// Check if this error is retryable
    ///
    /// Validation errors are not retryable (require config fix). Kubernetes
    /// errors are retried unless they are 4xx responses, with the exception
    /// of 409 Conflict which only means our snapshot was stale.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube { source } => match source {
                kube::Error::Api(ae) => ae.code == 409 || !(400..500).contains(&ae.code),
                _ => true,
            },
            Error::Validation { .. } => false,
            Error::Internal { .. } => true,
        }
    }

    /// True when the API server rejected a write because the expected
    /// resourceVersion no longer matches
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Kube { source: kube::Error::Api(ae) } if ae.code == 409)
    }
}

/// An ordered collection of errors gathered while processing many independent
/// items.
///
/// Empty is a valid state: an empty list means nothing went wrong, and
/// [`ErrorList::into_result`] turns it into `Ok(())`.
#[derive(Debug)]
pub struct ErrorList<E> {
    errors: Vec<E>,
}

impl<E> Default for ErrorList<E> {
    fn default() -> Self {
        Self { errors: Vec::new() }
    }
}

impl<E> ErrorList<E> {
    /// Create an empty list
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an error
    pub fn push(&mut self, error: E) {
        self.errors.push(error);
    }

    /// Record the error of a result, passing the success value through
    pub fn collect<T>(&mut self, result: std::result::Result<T, E>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(e) => {
                self.push(e);
                None
            }
        }
    }

    /// Append every error of another list
    pub fn extend(&mut self, other: ErrorList<E>) {
        self.errors.extend(other.errors);
    }

    /// Number of recorded errors
    pub fn len(&self) -> usize {
        self.errors.len()
    }

    /// True when no error was recorded
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// Iterate over recorded errors in insertion order
    pub fn iter(&self) -> impl Iterator<Item = &E> {
        self.errors.iter()
    }

    /// `Ok(())` when empty, otherwise the list itself as the error
    pub fn into_result(self) -> std::result::Result<(), Self> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl<E: fmt::Display> fmt::Display for ErrorList<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.errors.as_slice() {
            [] => write!(f, "no errors"),
            [only] => write!(f, "{only}"),
            many => {
                write!(f, "{} errors occurred:", many.len())?;
                for e in many {
                    write!(f, "\n  * {e}")?;
                }
                Ok(())
            }
        }
    }
}

impl<E: fmt::Debug + fmt::Display> std::error::Error for ErrorList<E> {}

#[cfg(test)]
mod tests {
    use super::*;

    fn api_error(code: u16) -> Error {
        Error::Kube {
            source: kube::Error::Api(kube::core::ErrorResponse {
                status: "Failure".to_string(),
                message: "boom".to_string(),
                reason: "Test".to_string(),
                code,
            }),
        }
    }

    // ==========================================================================
    // Story Tests: Error classification in the reconcile loop
    // ==========================================================================

    /// Story: a release in a cluster-scoped view must not be retried in a hot loop
    #[test]
    fn story_validation_errors_are_not_retried() {
        let err = Error::validation_for("web-1", "Release has no namespace");
        assert!(!err.is_retryable());
        assert!(!err.is_conflict());
        assert_eq!(
            err.to_string(),
            "validation error for web-1: Release has no namespace"
        );
    }

    /// Story: a stale snapshot surfaces as a retryable conflict
    #[test]
    fn story_conflicts_are_retryable() {
        let err = api_error(409);
        assert!(err.is_conflict());
        assert!(err.is_retryable());
    }

    #[test]
    fn client_errors_are_not_retryable() {
        for code in [404, 422] {
            let err = api_error(code);
            assert!(!err.is_retryable());
            assert!(!err.is_conflict());
        }
    }

    #[test]
    fn server_errors_are_retryable() {
        assert!(api_error(503).is_retryable());
    }

    #[test]
    fn internal_error_with_context() {
        let err = Error::internal_with_context("apply_patches", "unexpected state");
        assert!(err.is_retryable());
        assert!(err.to_string().contains("[apply_patches]"));
    }

    mod error_list {
        use super::*;

        #[test]
        fn empty_list_is_no_error() {
            let list: ErrorList<Error> = ErrorList::new();
            assert!(list.is_empty());
            assert_eq!(list.to_string(), "no errors");
            assert!(list.into_result().is_ok());
        }

        #[test]
        fn single_error_displays_as_itself() {
            let mut list = ErrorList::new();
            list.push(Error::validation_for("web-1", "bad"));
            assert_eq!(list.to_string(), Error::validation_for("web-1", "bad").to_string());
            assert!(list.into_result().is_err());
        }

        #[test]
        fn many_errors_are_listed_in_order() {
            let mut list = ErrorList::new();
            list.push(Error::internal_with_context("test", "first"));
            list.push(Error::internal_with_context("test", "second"));

            let rendered = list.to_string();
            assert!(rendered.starts_with("2 errors occurred:"));
            let first = rendered.find("first").unwrap();
            let second = rendered.find("second").unwrap();
            assert!(first < second);
        }

        #[test]
        fn collect_passes_values_and_records_errors() {
            let mut list: ErrorList<Error> = ErrorList::new();
            assert_eq!(list.collect(Ok(3)), Some(3));
            assert_eq!(list.collect::<u32>(Err(Error::internal_with_context("test", "nope"))), None);
            assert_eq!(list.len(), 1);
        }

        #[test]
        fn extend_merges_lists() {
            let mut a: ErrorList<Error> = ErrorList::new();
            a.push(Error::internal_with_context("test", "a"));
            let mut b = ErrorList::new();
            b.push(Error::internal_with_context("test", "b"));
            a.extend(b);
            assert_eq!(a.len(), 2);
            assert_eq!(a.iter().count(), 2);
        }
    }
}
