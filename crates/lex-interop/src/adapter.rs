//! The runtime adapter contract.
//!
//! An adapter is the only component allowed to call into an embedded
//! runtime. Everything else talks to a runtime through [`RuntimeAdapter`]
//! and [`Value`].
//!
//! Besides the three user-facing operations (`get`, `set`, `execute`), an
//! adapter exposes path primitives that the proxy layer walks one hop at a
//! time. When a walk reaches a binding that is itself a proxy, the adapter
//! does not follow it: it hands back a [`Resolved::Redirect`] /
//! [`Located::Redirect`] and the proxy layer continues on the other runtime.

use std::fmt;
use std::sync::Weak;

use crate::error::{BridgeError, LookupError};
use crate::marshal::table::column_to_values;
use crate::proxy::ProxyResolver;
use crate::types::{ProxyObject, RuntimeId};
use crate::value::{NativeHandle, Value};

/// Outcome of reading a path inside one runtime.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolved {
    /// The path ended on a plain value.
    Value(Value),
    /// A segment of the path is a proxy; `rest` are the segments after it.
    Redirect {
        /// The proxy that was reached.
        proxy: ProxyObject,
        /// Remaining segments to resolve relative to `proxy`.
        rest: Vec<String>,
    },
}

/// Outcome of locating the container for an assignment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Located {
    /// Every parent segment lives in this runtime; the write can happen here.
    Local,
    /// A parent segment is a proxy; `rest` includes the final segment.
    Redirect {
        /// The proxy that was reached.
        proxy: ProxyObject,
        /// Remaining segments relative to `proxy`.
        rest: Vec<String>,
    },
}

/// Capability wrapper over one embedded runtime.
///
/// Implementations must be side-effect free on reads and must leave the
/// namespace untouched when an assignment fails.
pub trait RuntimeAdapter: Send + Sync + fmt::Debug {
    /// Which runtime this adapter embeds.
    fn id(&self) -> RuntimeId;

    /// Walks `path` from the global namespace.
    ///
    /// # Errors
    ///
    /// - [`LookupError::NotFound`] if a segment is missing
    /// - [`LookupError::NotIndexable`] if a segment is accessed on a sequence
    ///   or scalar
    fn resolve(&self, path: &[String]) -> Result<Resolved, BridgeError>;

    /// Checks that every segment of `path` but the last exists and is a
    /// navigable container, without converting anything.
    fn locate(&self, path: &[String]) -> Result<Located, BridgeError>;

    /// Writes `value` at `path`. The caller has already checked the path with
    /// [`locate`](Self::locate); intermediate segments are never created.
    ///
    /// # Errors
    ///
    /// - [`LookupError`] if a parent segment is missing or not navigable
    /// - [`AssignmentError`](crate::AssignmentError) if the runtime rejects the write
    /// - [`ConversionError`](crate::ConversionError) if the value has no native form
    fn assign(&self, path: &[String], value: Value) -> Result<(), BridgeError>;

    /// Evaluates `code` and returns the value of its last expression.
    ///
    /// # Errors
    ///
    /// Returns [`ExecutionError`](crate::ExecutionError) with the runtime's own
    /// message when evaluation fails.
    fn execute(&self, code: &str) -> Result<Value, BridgeError>;

    /// Names currently bound in the global namespace.
    fn names(&self) -> Vec<String>;

    /// Returns `true` if `name` is bound in the global namespace.
    fn contains(&self, name: &str) -> bool;

    /// Whether the runtime can provide `package`. Consulted once per session.
    fn provides(&self, _package: &str) -> bool {
        true
    }

    /// Gives the adapter a handle on the session's proxy layer, so that it
    /// can materialise proxies and follow them from its own evaluator.
    fn attach(&self, _resolver: Weak<ProxyResolver>) {}

    /// Reads a top-level binding.
    ///
    /// A binding holding a proxy yields [`Value::Proxy`].
    ///
    /// # Errors
    ///
    /// Returns [`LookupError::NotFound`] if `name` is unbound.
    fn get(&self, name: &str) -> Result<Value, BridgeError> {
        match self.resolve(&[name.to_string()])? {
            Resolved::Value(value) => Ok(value),
            Resolved::Redirect { proxy, rest } => Ok(Value::Proxy(ProxyObject::new(
                proxy.target(),
                proxy.joined(&rest),
            ))),
        }
    }

    /// Creates or overwrites a top-level binding, whatever it held before.
    fn set(&self, name: &str, value: Value) -> Result<(), BridgeError> {
        self.assign(&[name.to_string()], value)
    }
}

/// Reads member `name` of a bridge-level value.
///
/// Mappings yield entries, tables yield columns as sequences and host
/// objects yield their members. Proxies must be handled by the caller.
pub(crate) fn member(runtime: RuntimeId, container: &Value, name: &str) -> Result<Value, LookupError> {
    let not_found = || LookupError::NotFound {
        runtime,
        name: name.to_string(),
    };

    match container {
        Value::Mapping(map) => map.get(name).cloned().ok_or_else(not_found),
        Value::Table(df) => {
            let column = df.column(name).map_err(|_| not_found())?;
            let values = column_to_values(column).map_err(|_| LookupError::NotIndexable {
                runtime,
                name: name.to_string(),
                kind: column.dtype().to_string(),
            })?;
            Ok(Value::Sequence(values))
        }
        Value::Opaque(opaque) => match opaque.handle() {
            NativeHandle::Host(object) => object.member(name).ok_or_else(not_found),
            NativeHandle::Python(_) => Err(LookupError::NotIndexable {
                runtime,
                name: name.to_string(),
                kind: opaque.type_tag().to_string(),
            }),
        },
        other => Err(LookupError::NotIndexable {
            runtime,
            name: name.to_string(),
            kind: other.kind().to_string(),
        }),
    }
}
