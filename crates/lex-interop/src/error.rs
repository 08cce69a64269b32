//! Error types for the lex-interop crate.
//!
//! Every failure the bridge can observe is surfaced as a typed result; nothing
//! is retried and nothing is silently coerced. The taxonomy is split into one
//! enum per concern, all of which convert into [`BridgeError`] with `?`:
//!
//! | Family | Raised by |
//! |--------|-----------|
//! | [`LookupError`] | path resolution against a runtime namespace |
//! | [`ConversionError`] | the marshalling engine |
//! | [`AssignmentError`] | a runtime rejecting a write |
//! | [`ExecutionError`] | snippet evaluation inside a runtime |
//! | [`EnvironmentError`] | environment creation and activation |
//! | [`SessionError`] | session start-up |
//!
//! # Example
//!
//! ```no_run
//! use lex_interop::{BridgeError, LookupError, RuntimeId, Session};
//!
//! fn read_greeting(session: &Session) -> Result<String, BridgeError> {
//!     match session.read_other(RuntimeId::Host, "greeting") {
//!         Ok(value) => Ok(value.to_string()),
//!         Err(BridgeError::Lookup(LookupError::NotFound { .. })) => Ok("hello".into()),
//!         Err(e) => Err(e),
//!     }
//! }
//! ```

use thiserror::Error;

use crate::types::RuntimeId;

/// A name or path segment could not be resolved.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LookupError {
    /// The accessed name is absent from the target namespace or container.
    #[error("'{name}' not found in {runtime} namespace")]
    NotFound {
        /// Runtime whose namespace was searched.
        runtime: RuntimeId,
        /// The missing segment.
        name: String,
    },

    /// An attribute access was attempted through a value that cannot be
    /// navigated (a sequence or a scalar). Aborts the whole chain.
    #[error("cannot access '{name}' on a {kind} value in {runtime}")]
    NotIndexable {
        /// Runtime that owns the non-navigable value.
        runtime: RuntimeId,
        /// The segment that was requested.
        name: String,
        /// Shape of the value that was hit (e.g. `sequence`, `integer`).
        kind: String,
    },

    /// A chain of proxies led back to a location it had already visited.
    #[error("proxy chain revisits {runtime} path '{path}'")]
    Cyclic {
        /// Runtime of the revisited location.
        runtime: RuntimeId,
        /// The revisited path, dot-joined.
        path: String,
    },
}

/// The marshalling engine could not convert a value.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new variants
/// in future versions without breaking downstream code.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConversionError {
    /// No rule covers this value's shape for the requested direction.
    #[error("unsupported value of type '{0}' for this conversion")]
    Unsupported(String),

    /// A table was rebuilt from columns of different lengths.
    #[error("ragged table: column '{column}' has {found} rows, expected {expected}")]
    RaggedTable {
        /// First column whose length disagrees with the first column.
        column: String,
        /// Row count of the first column.
        expected: usize,
        /// Row count of the offending column.
        found: usize,
    },

    /// Failed to move a table across the boundary via Arrow IPC.
    #[error("arrow transfer failed: {0}")]
    Arrow(String),
}

/// A runtime rejected a write to its namespace.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AssignmentError {
    /// The binding has been locked read-only.
    #[error("binding '{name}' is locked in {runtime}")]
    Locked {
        /// Runtime owning the binding.
        runtime: RuntimeId,
        /// The locked name.
        name: String,
    },

    /// The runtime refused the assignment for its own reasons.
    #[error("{runtime} rejected assignment to '{name}': {message}")]
    Rejected {
        /// Runtime that refused the write.
        runtime: RuntimeId,
        /// The segment being assigned.
        name: String,
        /// The runtime's explanation.
        message: String,
    },
}

/// Snippet evaluation failed inside a runtime.
///
/// The message and originating runtime are preserved verbatim; the bridge
/// never reinterprets guest exceptions.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{runtime} execution failed ({kind}): {message}")]
pub struct ExecutionError {
    /// Runtime that raised the error.
    pub runtime: RuntimeId,
    /// Exception or error class name (e.g. `ZeroDivisionError`).
    pub kind: String,
    /// Message as reported by the runtime.
    pub message: String,
}

/// Environment creation or activation failed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EnvironmentError {
    /// No environment with this name has been created.
    #[error("environment '{0}' not found")]
    NotFound(String),

    /// A different environment is already active for this session.
    #[error("cannot activate '{requested}': environment '{active}' is already active")]
    AlreadyActive {
        /// Environment currently active.
        active: String,
        /// Environment that was requested.
        requested: String,
    },

    /// An environment with this name was already created.
    #[error("environment '{0}' already exists")]
    AlreadyExists(String),

    /// The environment description could not be parsed or is malformed.
    #[error("invalid environment description: {0}")]
    InvalidSpec(String),
}

/// Session start-up failed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// `start_session` was already called on this manager.
    #[error("session already started")]
    AlreadyStarted,

    /// A required environment activation failed; the session may not start.
    #[error("required environment activation failed: {0}")]
    ActivationRequired(EnvironmentError),

    /// A root proxy name is already bound in the runtime it would be installed in.
    #[error("root proxy name '{name}' is already bound in {runtime}")]
    ReservedName {
        /// Runtime whose namespace holds the colliding binding.
        runtime: RuntimeId,
        /// The colliding name.
        name: String,
    },

    /// The guest runtime could not be brought up.
    #[error("runtime initialization failed: {0}")]
    RuntimeInit(String),

    /// Installing a root proxy into a runtime namespace failed.
    #[error("failed to install root proxy: {0}")]
    Install(String),

    /// The bridge configuration is invalid.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// The main error type for bridge operations.
///
/// Each family keeps its own enum so callers can match precisely; this type
/// only unifies them for `?` propagation.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new variants
/// in future versions without breaking downstream code.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum BridgeError {
    /// See [`LookupError`].
    #[error(transparent)]
    Lookup(#[from] LookupError),

    /// See [`ConversionError`].
    #[error(transparent)]
    Conversion(#[from] ConversionError),

    /// See [`AssignmentError`].
    #[error(transparent)]
    Assignment(#[from] AssignmentError),

    /// See [`ExecutionError`].
    #[error(transparent)]
    Execution(#[from] ExecutionError),

    /// See [`EnvironmentError`].
    #[error(transparent)]
    Environment(#[from] EnvironmentError),

    /// See [`SessionError`].
    #[error(transparent)]
    Session(#[from] SessionError),

    /// A proxy targets a runtime the session does not have (e.g. the guest
    /// was skipped after a non-required activation failure).
    #[error("{0} runtime is not available in this session")]
    RuntimeUnavailable(RuntimeId),

    /// The session owning a proxy has been dropped.
    #[error("session closed")]
    SessionClosed,

    /// A Python error that does not belong to any family above.
    #[error("Python error: {message}")]
    Python {
        /// The Python exception message.
        message: String,
    },
}

impl From<pyo3::PyErr> for BridgeError {
    fn from(err: pyo3::PyErr) -> Self {
        BridgeError::Python {
            message: err.to_string(),
        }
    }
}

impl From<polars::error::PolarsError> for ConversionError {
    fn from(err: polars::error::PolarsError) -> Self {
        ConversionError::Arrow(err.to_string())
    }
}

impl From<polars::error::PolarsError> for BridgeError {
    fn from(err: polars::error::PolarsError) -> Self {
        BridgeError::Conversion(err.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_families_convert_into_bridge_error() {
        let err: BridgeError = LookupError::NotFound {
            runtime: RuntimeId::Guest,
            name: "x".into(),
        }
        .into();
        assert!(matches!(err, BridgeError::Lookup(LookupError::NotFound { .. })));

        let err: BridgeError = ConversionError::Unsupported("module".into()).into();
        assert_eq!(
            err.to_string(),
            "unsupported value of type 'module' for this conversion"
        );
    }

    #[test]
    fn test_execution_error_preserves_origin() {
        let err = ExecutionError {
            runtime: RuntimeId::Guest,
            kind: "ZeroDivisionError".into(),
            message: "division by zero".into(),
        };
        assert_eq!(
            err.to_string(),
            "guest execution failed (ZeroDivisionError): division by zero"
        );
    }
}
