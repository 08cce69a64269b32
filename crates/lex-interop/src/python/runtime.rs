//! Embedded CPython initialization.
//!
//! The guest is the system Python interpreter, linked through PyO3's
//! `auto-initialize` feature. This module makes sure the interpreter is
//! started exactly once per process and manages the module search path.
//!
//! # Module Search Path
//!
//! Directories are put at the front of `sys.path`, in this order:
//!
//! 1. The active environment's site-packages directory, if it has one
//! 2. [`BridgeConfig::python_path`](crate::BridgeConfig::python_path), which
//!    defaults to the entries of `LEX_INTEROP_PYTHONPATH`
//!
//! A directory already on `sys.path` is not added twice.
//!
//! # Thread Safety
//!
//! [`initialize()`] is safe to call from multiple threads; only the first call
//! performs initialization, later calls return the cached result.

use pyo3::prelude::*;
use pyo3::types::PyList;
use std::path::PathBuf;
use std::sync::OnceLock;
use tracing::{debug, info};

use crate::error::SessionError;

/// Result of the one-time interpreter start-up, with the error message if
/// it failed.
static INIT_RESULT: OnceLock<Result<(), String>> = OnceLock::new();

/// Starts the embedded interpreter if it is not running yet.
///
/// # Errors
///
/// Returns [`SessionError::RuntimeInit`] if the interpreter cannot be started
/// or its standard library is unusable (`sys`, `ast` and `importlib` must
/// import).
#[must_use = "initialization may fail; check the Result"]
pub fn initialize() -> Result<(), SessionError> {
    match INIT_RESULT.get_or_init(do_initialize) {
        Ok(()) => Ok(()),
        Err(msg) => Err(SessionError::RuntimeInit(msg.clone())),
    }
}

/// Returns `true` once [`initialize()`] has succeeded.
#[must_use]
pub fn is_initialized() -> bool {
    INIT_RESULT.get().is_some_and(Result::is_ok)
}

fn do_initialize() -> Result<(), String> {
    Python::initialize();

    Python::attach(|py| -> PyResult<()> {
        let sys = py.import("sys")?;
        py.import("ast")?;
        py.import("importlib.util")?;
        let version: String = sys.getattr("version")?.extract()?;
        info!("Embedded Python {} initialized", version.lines().next().unwrap_or_default());
        Ok(())
    })
    .map_err(|e| format!("failed to initialize Python: {e}"))
}

/// Prepends `dirs` to `sys.path`, keeping their relative order.
///
/// # Errors
///
/// Returns [`SessionError::RuntimeInit`] if the interpreter is unavailable or
/// `sys.path` cannot be modified.
pub fn extend_sys_path(dirs: &[PathBuf]) -> Result<(), SessionError> {
    initialize()?;
    if dirs.is_empty() {
        return Ok(());
    }

    Python::attach(|py| -> PyResult<()> {
        let path = py.import("sys")?.getattr("path")?.cast_into::<PyList>()?;
        for dir in dirs.iter().rev() {
            let entry = dir.to_string_lossy();
            if path.contains(entry.as_ref())? {
                continue;
            }
            debug!("Adding {} to sys.path", entry);
            path.insert(0, entry.as_ref())?;
        }
        Ok(())
    })
    .map_err(|e| SessionError::RuntimeInit(format!("failed to update sys.path: {e}")))
}

/// Returns `true` if `module` can be imported, without importing it.
#[must_use]
pub fn has_module(module: &str) -> bool {
    if initialize().is_err() {
        return false;
    }
    Python::attach(|py| -> PyResult<bool> {
        let spec = py
            .import("importlib.util")?
            .call_method1("find_spec", (module,))?;
        Ok(!spec.is_none())
    })
    .unwrap_or(false)
}
