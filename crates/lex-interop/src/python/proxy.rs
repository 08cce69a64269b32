//! The Python face of a proxy.
//!
//! Guest code sees the host through [`BridgeProxy`] objects. Attribute access
//! on a `BridgeProxy` goes straight to the session's [`ProxyResolver`], so
//! every read observes the live value and every write lands in the runtime
//! that holds the binding:
//!
//! ```python
//! host.greeting            # read from the host namespace
//! host.greeting = "hi"     # write to the host namespace
//! host.guest.host.greeting # chains resolve one hop at a time
//! dir(host)                # names bound in the host namespace
//! ```
//!
//! # Errors
//!
//! | Bridge error | Python exception |
//! |--------------|------------------|
//! | [`LookupError::NotFound`] | `AttributeError` (`KeyError` for `proxy[key]`) |
//! | anything else | `RuntimeError` with the bridge message |
//!
//! A `BridgeProxy` holds only a weak reference to the resolver. Once the
//! session is dropped, every use raises `RuntimeError: session closed`.

use pyo3::exceptions::{PyAttributeError, PyKeyError, PyRuntimeError};
use pyo3::prelude::*;
use std::sync::{Arc, Weak};

use crate::error::{BridgeError, LookupError};
use crate::proxy::ProxyResolver;
use crate::python::conversion::{python_to_value, value_to_python};
use crate::types::{ProxyObject, RuntimeId};

/// A live view onto a namespace, usable from Python.
#[pyclass(name = "BridgeProxy", module = "lex_interop", frozen)]
pub struct BridgeProxy {
    resolver: Weak<ProxyResolver>,
    proxy: ProxyObject,
}

impl BridgeProxy {
    /// Wraps `proxy` for Python, resolving through `resolver`.
    #[must_use]
    pub fn new(resolver: Weak<ProxyResolver>, proxy: ProxyObject) -> Self {
        Self { resolver, proxy }
    }

    /// The address this object looks at.
    #[must_use]
    pub fn proxy(&self) -> &ProxyObject {
        &self.proxy
    }

    fn resolver(&self) -> PyResult<Arc<ProxyResolver>> {
        self.resolver
            .upgrade()
            .ok_or_else(|| to_py_err(BridgeError::SessionClosed, false))
    }

    fn get(&self, py: Python<'_>, name: &str, as_key: bool) -> PyResult<Py<PyAny>> {
        let resolver = self.resolver()?;
        let value = resolver
            .resolve_get(&self.proxy, name, RuntimeId::Guest)
            .map_err(|e| to_py_err(e, as_key))?;
        value_to_python(py, &value, &self.resolver, resolver.marshaller().capabilities())
            .map(Bound::unbind)
            .map_err(|e| to_py_err(e, as_key))
    }
}

#[pymethods]
impl BridgeProxy {
    fn __getattr__(&self, py: Python<'_>, name: &str) -> PyResult<Py<PyAny>> {
        // Dunder probes (copy, pickle, numpy) must not reach the other runtime.
        if name.starts_with("__") && name.ends_with("__") {
            return Err(PyAttributeError::new_err(name.to_string()));
        }
        self.get(py, name, false)
    }

    fn __getitem__(&self, py: Python<'_>, key: &str) -> PyResult<Py<PyAny>> {
        self.get(py, key, true)
    }

    fn __setattr__(&self, py: Python<'_>, name: &str, value: &Bound<'_, PyAny>) -> PyResult<()> {
        let resolver = self.resolver()?;
        let value = python_to_value(py, value, resolver.marshaller().capabilities())
            .map_err(|e| to_py_err(e, false))?;
        resolver
            .resolve_set(&self.proxy, name, value, RuntimeId::Guest)
            .map_err(|e| to_py_err(e, false))
    }

    fn __setitem__(&self, py: Python<'_>, key: &str, value: &Bound<'_, PyAny>) -> PyResult<()> {
        self.__setattr__(py, key, value)
    }

    fn __dir__(&self) -> PyResult<Vec<String>> {
        self.resolver()?
            .names(&self.proxy)
            .map_err(|e| to_py_err(e, false))
    }

    fn __repr__(&self) -> String {
        self.proxy.to_string()
    }
}

fn to_py_err(err: BridgeError, as_key: bool) -> PyErr {
    match err {
        BridgeError::Lookup(LookupError::NotFound { .. }) if as_key => {
            PyKeyError::new_err(err.to_string())
        }
        BridgeError::Lookup(LookupError::NotFound { .. }) => {
            PyAttributeError::new_err(err.to_string())
        }
        other => PyRuntimeError::new_err(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::python::runtime::initialize;

    #[test]
    fn test_closed_session_raises_runtime_error() {
        initialize().unwrap();
        Python::attach(|py| {
            let proxy = Bound::new(
                py,
                BridgeProxy::new(Weak::new(), ProxyObject::root(RuntimeId::Host)),
            )
            .unwrap();
            let err = proxy.getattr("anything").unwrap_err();
            assert!(err.is_instance_of::<PyRuntimeError>(py));
            assert!(err.value(py).to_string().contains("session closed"));
            assert_eq!(
                proxy.repr().unwrap().to_string(),
                "<host proxy>"
            );
        });
    }

    #[test]
    fn test_dunder_lookups_stay_local() {
        initialize().unwrap();
        Python::attach(|py| {
            let proxy = Bound::new(
                py,
                BridgeProxy::new(Weak::new(), ProxyObject::root(RuntimeId::Host)),
            )
            .unwrap();
            let err = proxy.getattr("__array__").unwrap_err();
            assert!(err.is_instance_of::<PyAttributeError>(py));
        });
    }
}
