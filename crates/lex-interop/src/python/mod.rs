//! Python guest runtime.
//!
//! Everything that touches the embedded interpreter lives here: start-up
//! ([`runtime`]), value conversion ([`conversion`]), the guest adapter
//! ([`adapter`]) and the Python-visible proxy class ([`proxy`]).

pub mod adapter;
pub mod conversion;
pub mod proxy;
pub mod runtime;

pub use adapter::PythonRuntime;
pub use proxy::BridgeProxy;
