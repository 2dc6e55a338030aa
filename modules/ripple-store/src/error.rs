//! Typed errors for dispatch and store usage.

use thiserror::Error;

/// Errors that can surface from a dispatch call.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Continuation loop kept producing actions past the configured limit
    #[error(
        "reducer iterations exceed {max_iterations} iterations; \
         set max_iterations in the config to change this limit"
    )]
    Runaway { max_iterations: usize },

    /// Programmer error at a call site
    #[error("usage error: {0}")]
    Usage(#[from] UsageError),

    /// A user reducer reported a failure
    #[error("reducer failed: {0}")]
    Reducer(#[source] anyhow::Error),

    /// A proc failed before its first suspension point
    #[error("proc failed: {0}")]
    Proc(#[source] anyhow::Error),

    /// Typed domain state could not round-trip through JSON
    #[error("state serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The store behind a hook or handle has been dropped
    #[error("store has been dropped")]
    Closed,
}

impl StoreError {
    /// Recover a `StoreError` that travelled through user code as `anyhow::Error`.
    pub(crate) fn from_proc(err: anyhow::Error) -> Self {
        match err.downcast::<StoreError>() {
            Ok(store_err) => store_err,
            Err(err) => StoreError::Proc(err),
        }
    }
}

/// Misuse of the public API. Always fatal for the call that triggered it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UsageError {
    #[error("domain '{0}' is not connected to a store")]
    NotConnected(String),

    #[error("unknown domain '{0}'")]
    UnknownDomain(String),

    #[error("'{reducer}' is not a reducer name in domain '{domain}'")]
    UnknownReducer { domain: String, reducer: String },

    #[error("effect owner has no method '{0}'")]
    UnknownMethod(String),
}

/// Result type alias for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runaway_message_names_threshold() {
        let err = StoreError::Runaway { max_iterations: 7 };
        assert!(err.to_string().contains("exceed 7 iterations"));
    }

    #[test]
    fn store_error_survives_anyhow_round_trip() {
        let wrapped = anyhow::Error::new(StoreError::Runaway { max_iterations: 3 });
        assert!(matches!(
            StoreError::from_proc(wrapped),
            StoreError::Runaway { max_iterations: 3 }
        ));

        let foreign = anyhow::anyhow!("network down");
        assert!(matches!(StoreError::from_proc(foreign), StoreError::Proc(_)));
    }
}
