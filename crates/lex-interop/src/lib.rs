//! lex-interop: a variable bridge between a Rust host and an embedded Python
//! guest.
//!
//! Two runtimes share one process. Each sees the other's global namespace
//! through a single root binding (`guest` in the host, `host` in the guest)
//! and reads or writes through it as if the other side's variables were its
//! own. Every access is live: nothing is copied ahead of time and nothing is
//! cached.
//!
//! # Features
//!
//! - **Live proxies**: `guest.df.id` re-resolves on every access
//! - **Recursive chaining**: `guest.host.guest.x` resolves hop by hop, at any
//!   depth
//! - **Type marshalling**: scalars, sequences, mappings and tables convert
//!   between representations, with explicit precision-loss reporting
//! - **Tables**: polars `DataFrame`s on the host, pandas `DataFrame`s on the
//!   guest (through Arrow IPC) when the environment provides them
//! - **Environments**: declared package sets with a required-activation gate
//!
//! # Quick Start
//!
//! ```no_run
//! use lex_interop::{RuntimeId, SessionManager, Value};
//!
//! let mut manager = SessionManager::default();
//! let session = manager.start_session()?;
//!
//! // Host → guest
//! session.set(RuntimeId::Host, "greeting", Value::from("hello"))?;
//! let shout = session.execute(RuntimeId::Guest, "host.greeting.upper()")?;
//! assert_eq!(shout, Value::from("HELLO"));
//!
//! // Guest → host
//! session.execute(RuntimeId::Guest, "answer = 6 * 7")?;
//! assert_eq!(session.read_other(RuntimeId::Host, "answer")?, Value::from(42));
//! # Ok::<(), lex_interop::BridgeError>(())
//! ```
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────┐                      ┌──────────────────────┐
//! │     HostRuntime      │                      │    PythonRuntime     │
//! │  guest ─► <proxy>    │                      │  host ─► BridgeProxy │
//! └──────────┬───────────┘                      └───────────┬──────────┘
//!            │ resolve / locate / assign                    │
//!            ▼                                              ▼
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │ ProxyResolver: walks redirects hop by hop, converts via Marshaller   │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Only adapters ([`HostRuntime`], [`PythonRuntime`]) touch a runtime. The
//! [`Marshaller`] is pure. The [`SessionManager`] wires everything together
//! and owns environment activation.
//!
//! # Error Handling
//!
//! All fallible operations return [`Result<T, BridgeError>`], which wraps one
//! enum per failure family:
//!
//! - [`LookupError`] - a name or path segment could not be resolved
//! - [`ConversionError`] - a value has no representation on the other side
//! - [`AssignmentError`] - a runtime refused a write
//! - [`ExecutionError`] - a snippet failed, with the runtime's own message
//! - [`EnvironmentError`] / [`SessionError`] - activation and start-up
//!
//! # Logging
//!
//! The crate logs through `tracing`. Precision loss is reported at `warn`,
//! session start-up at `info`, and redirects at `debug`.
//!
//! # Modules
//!
//! - [`marshal`] - value conversion and table helpers
//! - [`python`] - embedded interpreter, conversions and the `BridgeProxy` class

mod adapter;
mod config;
mod environment;
mod error;
mod host;
pub mod marshal;
mod proxy;
pub mod python;
mod session;
mod types;
mod value;

// Re-export public API
//
// Configuration types
pub use config::{BridgeConfig, BridgeConfigBuilder, PYTHONPATH_ENV, RuntimeProfile};
// Error types
pub use error::{
    AssignmentError, BridgeError, ConversionError, EnvironmentError, ExecutionError, LookupError,
    SessionError,
};
// Values and addressing
pub use types::{ProxyObject, RuntimeId};
pub use value::{HostObject, Mapping, NativeHandle, OpaqueValue, Value};
// Marshalling
pub use marshal::{Capabilities, Converted, Marshaller};
// Runtime adapters
pub use adapter::{Located, Resolved, RuntimeAdapter};
pub use host::HostRuntime;
pub use python::{BridgeProxy, PythonRuntime};
// Proxies
pub use proxy::ProxyResolver;
// Environments and sessions
pub use environment::{ActivationState, Environment, EnvironmentRegistry, EnvironmentSpec};
pub use session::{GuestFactory, Session, SessionManager, python_guest_factory};

/// Starts the embedded Python interpreter.
///
/// [`SessionManager::start_session`] does this on demand; calling it earlier
/// surfaces interpreter problems at application start-up.
///
/// # Errors
///
/// Returns [`SessionError::RuntimeInit`] if the interpreter cannot be started.
#[must_use = "initialization errors should be handled"]
pub fn initialize() -> Result<(), SessionError> {
    python::runtime::initialize()
}

/// Returns `true` once the embedded interpreter has been started.
#[must_use = "the initialization status should be checked"]
pub fn is_initialized() -> bool {
    python::runtime::is_initialized()
}
