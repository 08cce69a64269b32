//! The guest runtime: an embedded CPython interpreter.

use pyo3::prelude::*;
use pyo3::types::{PyBool, PyDict, PyFloat, PyInt, PyList, PyModule, PyString, PyTuple};
use std::fmt;
use std::path::PathBuf;
use std::sync::{OnceLock, Weak};
use tracing::debug;

use crate::adapter::{Located, Resolved, RuntimeAdapter};
use crate::environment::Environment;
use crate::error::{AssignmentError, BridgeError, LookupError, SessionError};
use crate::marshal::Capabilities;
use crate::proxy::ProxyResolver;
use crate::python::conversion::{
    is_pandas_dataframe, map_lookup_error, map_python_error, python_to_value, type_name,
    value_to_python,
};
use crate::python::proxy::BridgeProxy;
use crate::python::runtime;
use crate::types::{ProxyObject, RuntimeId};
use crate::value::Value;

/// Runs a snippet and returns the value of its trailing expression.
const RUNNER: &std::ffi::CStr = c"
import ast

def run(source, namespace):
    tree = ast.parse(source, mode='exec')
    tail = None
    if tree.body and isinstance(tree.body[-1], ast.Expr):
        tail = ast.Expression(tree.body.pop().value)
    exec(compile(tree, '<lex-interop>', 'exec'), namespace)
    if tail is None:
        return None
    return eval(compile(tail, '<lex-interop>', 'eval'), namespace)
";

/// The guest side of the bridge, backed by a private globals dict.
///
/// Each `PythonRuntime` has its own namespace; the interpreter itself is
/// shared by the whole process.
pub struct PythonRuntime {
    globals: Py<PyDict>,
    runner: Py<PyAny>,
    resolver: OnceLock<Weak<ProxyResolver>>,
}

impl fmt::Debug for PythonRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PythonRuntime")
            .field("names", &self.names())
            .field("attached", &self.resolver.get().is_some())
            .finish()
    }
}

impl PythonRuntime {
    /// Creates a guest with an empty namespace.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::RuntimeInit`] if the interpreter cannot be
    /// started.
    pub fn new() -> Result<Self, SessionError> {
        runtime::initialize()?;

        Python::attach(|py| -> PyResult<Self> {
            let globals = PyDict::new(py);
            globals.set_item("__builtins__", py.import("builtins")?)?;
            let runner = PyModule::from_code(
                py,
                RUNNER,
                c"lex_interop_runner.py",
                c"lex_interop_runner",
            )?
            .getattr("run")?;

            Ok(Self {
                globals: globals.unbind(),
                runner: runner.unbind(),
                resolver: OnceLock::new(),
            })
        })
        .map_err(|e| SessionError::RuntimeInit(e.to_string()))
    }

    /// Creates a guest whose module path includes `python_path` and the
    /// environment's site-packages directory.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::RuntimeInit`] if the interpreter cannot be
    /// started or `sys.path` cannot be updated.
    pub fn for_environment(
        environment: Option<&Environment>,
        python_path: &[PathBuf],
    ) -> Result<Self, SessionError> {
        let mut dirs: Vec<PathBuf> = environment
            .and_then(Environment::site_packages)
            .map(PathBuf::from)
            .into_iter()
            .collect();
        dirs.extend_from_slice(python_path);
        runtime::extend_sys_path(&dirs)?;
        Self::new()
    }

    fn weak_resolver(&self) -> Weak<ProxyResolver> {
        self.resolver.get().cloned().unwrap_or_default()
    }

    /// Capabilities of the attached session; none before attachment.
    fn capabilities(&self) -> Capabilities {
        self.resolver
            .get()
            .and_then(Weak::upgrade)
            .map(|resolver| resolver.marshaller().capabilities())
            .unwrap_or_default()
    }

    fn root<'py>(&self, py: Python<'py>, name: &str) -> Result<Bound<'py, PyAny>, BridgeError> {
        self.globals
            .bind(py)
            .get_item(name)?
            .ok_or_else(|| not_found(name))
    }
}

/// What a Python object allows when a path continues through it.
enum Navigable<'py> {
    Proxy(ProxyObject),
    Object(Bound<'py, PyAny>),
}

fn classify<'py>(obj: Bound<'py, PyAny>) -> Navigable<'py> {
    let proxy = obj
        .cast::<BridgeProxy>()
        .ok()
        .map(|proxy| proxy.get().proxy().clone());
    match proxy {
        Some(proxy) => Navigable::Proxy(proxy),
        None => Navigable::Object(obj),
    }
}

/// Values whose members are not reachable through the bridge.
fn is_leaf(obj: &Bound<'_, PyAny>) -> bool {
    obj.is_none()
        || obj.is_instance_of::<PyBool>()
        || obj.is_instance_of::<PyInt>()
        || obj.is_instance_of::<PyFloat>()
        || obj.is_instance_of::<PyString>()
        || obj.is_instance_of::<PyList>()
        || obj.is_instance_of::<PyTuple>()
}

fn not_found(name: &str) -> BridgeError {
    LookupError::NotFound {
        runtime: RuntimeId::Guest,
        name: name.to_string(),
    }
    .into()
}

fn not_indexable(obj: &Bound<'_, PyAny>, name: &str) -> BridgeError {
    LookupError::NotIndexable {
        runtime: RuntimeId::Guest,
        name: name.to_string(),
        kind: type_name(obj),
    }
    .into()
}

/// Reads member `name` of a Python object.
fn child<'py>(
    py: Python<'py>,
    obj: &Bound<'py, PyAny>,
    name: &str,
) -> Result<Bound<'py, PyAny>, BridgeError> {
    if is_leaf(obj) {
        return Err(not_indexable(obj, name));
    }
    if let Ok(dict) = obj.cast::<PyDict>() {
        return dict.get_item(name)?.ok_or_else(|| not_found(name));
    }
    if is_pandas_dataframe(obj) {
        let columns = obj.getattr("columns")?;
        if !columns.contains(name)? {
            return Err(not_found(name));
        }
        return Ok(obj.get_item(name)?.call_method0("tolist")?);
    }
    obj.getattr(name).map_err(|e| map_lookup_error(py, e, name))
}

impl RuntimeAdapter for PythonRuntime {
    fn id(&self) -> RuntimeId {
        RuntimeId::Guest
    }

    fn resolve(&self, path: &[String]) -> Result<Resolved, BridgeError> {
        let (first, rest) = path.split_first().ok_or_else(|| not_found(""))?;

        Python::attach(|py| {
            let mut current = self.root(py, first)?;
            for (i, segment) in rest.iter().enumerate() {
                current = match classify(current) {
                    Navigable::Proxy(proxy) => {
                        return Ok(Resolved::Redirect {
                            proxy,
                            rest: rest[i..].to_vec(),
                        });
                    }
                    Navigable::Object(obj) => child(py, &obj, segment)?,
                };
            }
            match classify(current) {
                Navigable::Proxy(proxy) => Ok(Resolved::Redirect {
                    proxy,
                    rest: Vec::new(),
                }),
                Navigable::Object(obj) => Ok(Resolved::Value(python_to_value(
                    py,
                    &obj,
                    self.capabilities(),
                )?)),
            }
        })
    }

    fn locate(&self, path: &[String]) -> Result<Located, BridgeError> {
        let (last, parents) = path.split_last().ok_or_else(|| not_found(""))?;
        let Some((first, middle)) = parents.split_first() else {
            return Ok(Located::Local);
        };

        Python::attach(|py| {
            let mut current = self.root(py, first)?;
            for (i, segment) in middle.iter().enumerate() {
                current = match classify(current) {
                    Navigable::Proxy(proxy) => {
                        return Ok(Located::Redirect {
                            proxy,
                            rest: path[i + 1..].to_vec(),
                        });
                    }
                    Navigable::Object(obj) => child(py, &obj, segment)?,
                };
            }
            match classify(current) {
                Navigable::Proxy(proxy) => Ok(Located::Redirect {
                    proxy,
                    rest: vec![last.clone()],
                }),
                Navigable::Object(obj) if is_leaf(&obj) => Err(not_indexable(&obj, last)),
                Navigable::Object(_) => Ok(Located::Local),
            }
        })
    }

    fn assign(&self, path: &[String], value: Value) -> Result<(), BridgeError> {
        let (last, parents) = path.split_last().ok_or_else(|| not_found(""))?;
        let resolver = self.weak_resolver();

        Python::attach(|py| {
            let obj = value_to_python(py, &value, &resolver, self.capabilities())?;
            let rejected = |e: PyErr| -> BridgeError {
                AssignmentError::Rejected {
                    runtime: RuntimeId::Guest,
                    name: last.clone(),
                    message: map_python_error(py, &e).to_string(),
                }
                .into()
            };

            let Some((first, middle)) = parents.split_first() else {
                return self.globals.bind(py).set_item(last, obj).map_err(rejected);
            };

            let mut container = self.root(py, first)?;
            for segment in middle {
                container = child(py, &container, segment)?;
            }
            if is_leaf(&container) {
                return Err(not_indexable(&container, last));
            }

            debug!("Assigning guest {}", path.join("."));
            if container.is_instance_of::<PyDict>() || is_pandas_dataframe(&container) {
                container.set_item(last, obj).map_err(rejected)
            } else {
                container.setattr(last.as_str(), obj).map_err(rejected)
            }
        })
    }

    fn execute(&self, code: &str) -> Result<Value, BridgeError> {
        debug!("Executing guest snippet ({} bytes)", code.len());
        Python::attach(|py| {
            let result = self
                .runner
                .bind(py)
                .call1((code, self.globals.bind(py)))
                .map_err(|e| map_python_error(py, &e))?;
            python_to_value(py, &result, self.capabilities())
        })
    }

    fn names(&self) -> Vec<String> {
        Python::attach(|py| {
            self.globals
                .bind(py)
                .keys()
                .iter()
                .filter_map(|key| key.extract::<String>().ok())
                .filter(|key| key != "__builtins__")
                .collect()
        })
    }

    fn contains(&self, name: &str) -> bool {
        Python::attach(|py| self.globals.bind(py).contains(name).unwrap_or(false))
    }

    fn provides(&self, package: &str) -> bool {
        runtime::has_module(package)
    }

    fn attach(&self, resolver: Weak<ProxyResolver>) {
        if self.resolver.set(resolver).is_err() {
            debug!("Python runtime already attached to a session");
        }
    }
}

static_assertions::assert_impl_all!(PythonRuntime: Send, Sync);
