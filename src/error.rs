//! Error types for benchmark runs.
//!
//! The taxonomy splits into two classes. Configuration-class errors abort a
//! run before (or instead of) any backend work. Backend-level errors are
//! caught by the runner and recorded as a [`BenchmarkStatus`] on that
//! backend's result.
//!
//! [`BenchmarkStatus`]: crate::leaderboard::BenchmarkStatus

use std::time::Duration;
use thiserror::Error;

use crate::config::BackendKind;

/// The main error type for harness operations.
#[derive(Error, Debug)]
pub enum HarnessError {
    /// Malformed generation or ground-truth parameters (e.g. `k > N`)
    #[error("Invalid parameter: {reason}")]
    InvalidParameter {
        /// Why the parameter was rejected
        reason: String,
    },

    /// The backend cannot index vectors of the requested dimension
    #[error("Backend '{backend}' supports at most {max_dimension} dimensions, got {dimension}")]
    DimensionExceeded {
        /// Comparison name
        backend: String,
        /// Requested dimension
        dimension: usize,
        /// Backend limit
        max_dimension: usize,
    },

    /// Provisioning the backend's index or table failed
    #[error("Setup failed for '{backend}': {reason}")]
    Setup {
        /// Comparison name
        backend: String,
        /// Failure description
        reason: String,
    },

    /// Bulk insertion failed
    #[error("Store failed for '{backend}': {reason}")]
    Store {
        /// Comparison name
        backend: String,
        /// Failure description
        reason: String,
    },

    /// A query exceeded its time bound
    #[error("Query {query_index} on '{backend}' exceeded timeout of {timeout:?}")]
    QueryTimeout {
        /// Comparison name
        backend: String,
        /// Position of the query in the query set
        query_index: usize,
        /// The bound that was exceeded
        timeout: Duration,
    },

    /// The backend reported an error while answering a query
    #[error("Query {query_index} on '{backend}' failed: {reason}")]
    Query {
        /// Comparison name
        backend: String,
        /// Position of the query in the query set
        query_index: usize,
        /// Failure description
        reason: String,
    },

    /// No adapter is registered for the configured backend family
    #[error("No adapter registered for backend '{backend}' of kind {kind}")]
    UnrecognizedBackend {
        /// Comparison name
        backend: String,
        /// The family nobody handles
        kind: BackendKind,
    },

    /// The run list names a comparison that is not defined
    #[error("Comparison '{name}' is not defined in the configuration")]
    UnknownComparison {
        /// The undefined name
        name: String,
    },

    /// Structurally invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Reading or writing a configuration/report file failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding or decoding failed
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl HarnessError {
    /// Shorthand for [`HarnessError::InvalidParameter`].
    pub fn invalid(reason: impl Into<String>) -> Self {
        HarnessError::InvalidParameter {
            reason: reason.into(),
        }
    }

    /// Attach the query position to a query-phase error.
    pub fn at_query(self, index: usize) -> Self {
        match self {
            HarnessError::Query {
                backend, reason, ..
            } => HarnessError::Query {
                backend,
                query_index: index,
                reason,
            },
            HarnessError::QueryTimeout {
                backend, timeout, ..
            } => HarnessError::QueryTimeout {
                backend,
                query_index: index,
                timeout,
            },
            other => other,
        }
    }

    /// Whether this error aborts the whole run.
    ///
    /// Backend-level faults (`DimensionExceeded`, `Setup`, `Store`,
    /// `QueryTimeout`, `Query`) only affect the backend that raised them.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            HarnessError::DimensionExceeded { .. }
                | HarnessError::Setup { .. }
                | HarnessError::Store { .. }
                | HarnessError::QueryTimeout { .. }
                | HarnessError::Query { .. }
        )
    }
}

/// Result type alias for harness operations.
pub type HarnessResult<T> = Result<T, HarnessError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(HarnessError::invalid("k > N").is_fatal());
        assert!(
            HarnessError::UnrecognizedBackend {
                backend: "pg".into(),
                kind: BackendKind::Pgvector,
            }
            .is_fatal()
        );
        assert!(
            !HarnessError::Setup {
                backend: "x".into(),
                reason: "refused".into(),
            }
            .is_fatal()
        );
        assert!(
            !HarnessError::QueryTimeout {
                backend: "x".into(),
                query_index: 3,
                timeout: Duration::from_secs(1),
            }
            .is_fatal()
        );
    }

    #[test]
    fn test_at_query_sets_index() {
        let err = HarnessError::Query {
            backend: "x".into(),
            query_index: 0,
            reason: "boom".into(),
        }
        .at_query(17);
        assert!(matches!(err, HarnessError::Query { query_index: 17, .. }));

        let untouched = HarnessError::invalid("k").at_query(3);
        assert!(matches!(untouched, HarnessError::InvalidParameter { .. }));
    }

    #[test]
    fn test_messages_name_the_backend() {
        let err = HarnessError::DimensionExceeded {
            backend: "pg_hnsw".into(),
            dimension: 4096,
            max_dimension: 2000,
        };
        let msg = err.to_string();
        assert!(msg.contains("pg_hnsw"));
        assert!(msg.contains("4096"));
    }
}
