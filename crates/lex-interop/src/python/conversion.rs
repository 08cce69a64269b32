//! Conversion between bridge [`Value`]s and Python objects.
//!
//! # Type Mapping
//!
//! | Value | Python |
//! |-------|--------|
//! | `Null` | `None` |
//! | `Boolean` | `bool` |
//! | `Integer` | `int` |
//! | `Float` | `float` |
//! | `String` | `str` |
//! | `Sequence` | `list` (a `tuple` also reads as a Sequence) |
//! | `Mapping` | `dict` with `str` keys |
//! | `Table` | `pandas.DataFrame` with rich tables, else a `dict` of lists |
//! | `Opaque` (Python-owned) | the original object |
//! | `Proxy` | [`BridgeProxy`] |
//!
//! Any other Python object reads as an opaque value tagged with its type's
//! qualified name. A Python `int` outside the 64-bit range reads as a float.
//!
//! # Tables
//!
//! Tables cross the boundary through the Arrow IPC file format, exactly as
//! they are written by polars' `IpcWriter` and read by `pyarrow.ipc`:
//!
//! ```text
//! polars DataFrame ─IpcWriter─▶ bytes ─pyarrow.ipc.open_file─▶ Table ─to_pandas─▶ pandas
//! pandas ─pyarrow.Table.from_pandas─▶ RecordBatchFileWriter ─▶ bytes ─IpcReader─▶ polars
//! ```

use polars::prelude::*;
use pyo3::exceptions::PyKeyError;
use pyo3::IntoPyObjectExt;
use pyo3::prelude::*;
use pyo3::types::{
    PyBool, PyBytes, PyBytesMethods, PyDict, PyFloat, PyInt, PyList, PyString, PyTuple,
};
use std::io::Cursor;
use std::sync::Weak;
use tracing::{debug, warn};

use crate::error::{BridgeError, ConversionError, ExecutionError, LookupError};
use crate::marshal::{Capabilities, table_to_mapping};
use crate::proxy::ProxyResolver;
use crate::python::proxy::BridgeProxy;
use crate::types::RuntimeId;
use crate::value::{Mapping, NativeHandle, OpaqueValue, Value};

/// Converts a bridge value into a Python object.
///
/// Proxies become [`BridgeProxy`] objects bound to `resolver`. Tables become
/// pandas DataFrames when `capabilities` allows rich tables, and dicts of
/// column lists otherwise.
///
/// # Errors
///
/// - [`ConversionError::Unsupported`] for host-owned opaque values, which
///   have no Python form
/// - [`ConversionError::Arrow`] or [`BridgeError::Python`] if a table cannot
///   be handed to pandas
pub fn value_to_python<'py>(
    py: Python<'py>,
    value: &Value,
    resolver: &Weak<ProxyResolver>,
    capabilities: Capabilities,
) -> Result<Bound<'py, PyAny>, BridgeError> {
    Ok(match value {
        Value::Null => py.None().into_bound(py),
        Value::Boolean(b) => (*b).into_bound_py_any(py)?,
        Value::Integer(i) => (*i).into_bound_py_any(py)?,
        Value::Float(f) => (*f).into_bound_py_any(py)?,
        Value::String(s) => s.as_str().into_bound_py_any(py)?,
        Value::Sequence(items) => {
            let list = PyList::empty(py);
            for item in items {
                list.append(value_to_python(py, item, resolver, capabilities)?)?;
            }
            list.into_any()
        }
        Value::Mapping(map) => mapping_to_dict(py, map, resolver, capabilities)?.into_any(),
        Value::Table(df) if capabilities.rich_tables => dataframe_to_python(py, df)?,
        Value::Table(df) => {
            debug!("Guest lacks rich tables; table becomes a dict of lists");
            mapping_to_dict(py, &table_to_mapping(df)?, resolver, capabilities)?.into_any()
        }
        Value::Opaque(opaque) => match opaque.handle() {
            NativeHandle::Python(object) => object.bind(py).clone(),
            NativeHandle::Host(_) => {
                return Err(ConversionError::Unsupported(opaque.type_tag().to_string()).into());
            }
        },
        Value::Proxy(proxy) => {
            Bound::new(py, BridgeProxy::new(resolver.clone(), proxy.clone()))?.into_any()
        }
    })
}

fn mapping_to_dict<'py>(
    py: Python<'py>,
    map: &Mapping,
    resolver: &Weak<ProxyResolver>,
    capabilities: Capabilities,
) -> Result<Bound<'py, PyDict>, BridgeError> {
    let dict = PyDict::new(py);
    for (key, value) in map {
        dict.set_item(key, value_to_python(py, value, resolver, capabilities)?)?;
    }
    Ok(dict)
}

/// Converts a Python object into a bridge value.
///
/// `bool` is checked before `int`, since `bool` is a subclass of `int`. A
/// pandas DataFrame becomes a Table when `capabilities` allows rich tables,
/// and a Mapping of column sequences otherwise.
///
/// # Errors
///
/// - [`ConversionError::Unsupported`] for a list or dict that contains itself
/// - a [`ConversionError`] if a pandas DataFrame cannot be transferred
///   through Arrow
pub fn python_to_value(
    py: Python<'_>,
    obj: &Bound<'_, PyAny>,
    capabilities: Capabilities,
) -> Result<Value, BridgeError> {
    Reader {
        capabilities,
        active: Vec::new(),
    }
    .read(py, obj)
}

/// Walks a Python object graph, remembering the containers on the current
/// path so that self-referencing values fail instead of recursing forever.
struct Reader {
    capabilities: Capabilities,
    active: Vec<usize>,
}

impl Reader {
    fn read(&mut self, py: Python<'_>, obj: &Bound<'_, PyAny>) -> Result<Value, BridgeError> {
        if obj.is_none() {
            return Ok(Value::Null);
        }
        if let Ok(proxy) = obj.cast::<BridgeProxy>() {
            return Ok(Value::Proxy(proxy.get().proxy().clone()));
        }
        if obj.is_instance_of::<PyBool>() {
            return Ok(Value::Boolean(obj.extract()?));
        }
        if obj.is_instance_of::<PyInt>() {
            return Ok(match obj.extract::<i64>() {
                Ok(i) => Value::Integer(i),
                Err(_) => {
                    warn!("Python int exceeds 64 bits and was converted to float");
                    Value::Float(obj.extract()?)
                }
            });
        }
        if obj.is_instance_of::<PyFloat>() {
            return Ok(Value::Float(obj.extract()?));
        }
        if obj.is_instance_of::<PyString>() {
            return Ok(Value::String(obj.extract()?));
        }
        if obj.is_instance_of::<PyList>() || obj.is_instance_of::<PyTuple>() {
            self.enter(obj, "list")?;
            let items = self.read_items(py, obj);
            self.active.pop();
            return Ok(Value::Sequence(items?));
        }
        if let Ok(dict) = obj.cast::<PyDict>() {
            self.enter(obj, "dict")?;
            let map = self.read_dict(py, dict);
            self.active.pop();
            return Ok(match map? {
                Some(map) => Value::Mapping(map),
                None => opaque(obj),
            });
        }
        if is_pandas_dataframe(obj) {
            if self.capabilities.rich_tables {
                return Ok(Value::Table(python_to_dataframe(py, obj)?));
            }
            debug!("Guest lacks rich tables; DataFrame read as a mapping of columns");
            let columns = obj.call_method1("to_dict", ("list",))?;
            return self.read(py, &columns);
        }

        Ok(opaque(obj))
    }

    fn enter(&mut self, obj: &Bound<'_, PyAny>, kind: &str) -> Result<(), ConversionError> {
        let address = obj.as_ptr() as usize;
        if self.active.contains(&address) {
            return Err(ConversionError::Unsupported(format!("recursive {kind}")));
        }
        self.active.push(address);
        Ok(())
    }

    fn read_items(
        &mut self,
        py: Python<'_>,
        obj: &Bound<'_, PyAny>,
    ) -> Result<Vec<Value>, BridgeError> {
        let mut items = Vec::new();
        for item in obj.try_iter()? {
            items.push(self.read(py, &item?)?);
        }
        Ok(items)
    }

    /// `None` if a key is not a string.
    fn read_dict(
        &mut self,
        py: Python<'_>,
        dict: &Bound<'_, PyDict>,
    ) -> Result<Option<Mapping>, BridgeError> {
        let mut map = Mapping::with_capacity(dict.len());
        for (key, value) in dict.iter() {
            let Ok(key) = key.extract::<String>() else {
                return Ok(None);
            };
            map.insert(key, self.read(py, &value)?);
        }
        Ok(Some(map))
    }
}

fn opaque(obj: &Bound<'_, PyAny>) -> Value {
    Value::Opaque(OpaqueValue::python(type_name(obj), obj.clone().unbind()))
}

/// Qualified name of `obj`'s type, e.g. `module` or `DataFrame`.
pub(crate) fn type_name(obj: &Bound<'_, PyAny>) -> String {
    obj.get_type()
        .qualname()
        .map(|name| name.to_string())
        .unwrap_or_else(|_| "object".to_string())
}

/// Returns `true` if `obj` is a `pandas.DataFrame`.
pub(crate) fn is_pandas_dataframe(obj: &Bound<'_, PyAny>) -> bool {
    let ty = obj.get_type();
    let name_matches = ty.name().is_ok_and(|name| name.to_string() == "DataFrame");
    name_matches
        && ty
            .module()
            .is_ok_and(|module| module.to_string().starts_with("pandas"))
}

/// Converts a polars DataFrame to a pandas DataFrame via Arrow IPC.
///
/// # Errors
///
/// - [`ConversionError::Arrow`] if IPC serialization fails
/// - [`BridgeError::Python`] if `pyarrow` or `pandas` cannot be used
#[must_use = "the converted pandas DataFrame should be used"]
pub fn dataframe_to_python<'py>(
    py: Python<'py>,
    df: &DataFrame,
) -> Result<Bound<'py, PyAny>, BridgeError> {
    // IpcWriter::finish needs &mut DataFrame
    let mut df = df.clone();
    let mut cursor = Cursor::new(Vec::new());
    IpcWriter::new(&mut cursor)
        .finish(&mut df)
        .map_err(|e| ConversionError::Arrow(format!("serialize: {e}")))?;

    let io = py.import("io")?;
    let pyarrow_ipc = py.import("pyarrow.ipc")?;

    let buffer = io.call_method1("BytesIO", (PyBytes::new(py, &cursor.into_inner()),))?;
    let table = pyarrow_ipc
        .call_method1("open_file", (buffer,))?
        .call_method0("read_all")?;
    Ok(table.call_method0("to_pandas")?)
}

/// Converts a pandas DataFrame to a polars DataFrame via Arrow IPC.
///
/// # Errors
///
/// - [`BridgeError::Python`] if `pyarrow` is missing or rejects the frame
/// - [`ConversionError::Arrow`] if the IPC bytes cannot be read by polars
#[must_use = "the converted polars DataFrame should be used"]
pub fn python_to_dataframe(
    py: Python<'_>,
    py_df: &Bound<'_, PyAny>,
) -> Result<DataFrame, BridgeError> {
    let io = py.import("io")?;
    let pyarrow = py.import("pyarrow")?;
    let pyarrow_ipc = py.import("pyarrow.ipc")?;

    // preserve_index=False keeps the frame's columns and nothing else
    let kwargs = PyDict::new(py);
    kwargs.set_item("preserve_index", false)?;
    let table = pyarrow
        .getattr("Table")?
        .call_method("from_pandas", (py_df,), Some(&kwargs))?;

    let sink = io.call_method0("BytesIO")?;
    let writer =
        pyarrow_ipc.call_method1("RecordBatchFileWriter", (&sink, table.getattr("schema")?))?;
    writer.call_method1("write_table", (&table,))?;
    writer.call_method0("close")?;

    let py_bytes = sink.call_method0("getvalue")?;
    let py_bytes: &Bound<'_, PyBytes> = py_bytes
        .cast()
        .map_err(|e| ConversionError::Arrow(format!("expected bytes: {e}")))?;

    IpcReader::new(Cursor::new(py_bytes.as_bytes().to_vec()))
        .finish()
        .map_err(|e| ConversionError::Arrow(format!("deserialize: {e}")).into())
}

/// Wraps a Python exception raised while evaluating guest code.
///
/// The exception's class name and message are kept verbatim.
#[must_use = "the mapped error should be returned or handled"]
pub fn map_python_error(py: Python<'_>, err: &PyErr) -> ExecutionError {
    let kind = err
        .get_type(py)
        .qualname()
        .map(|s| s.to_string())
        .unwrap_or_else(|_| "Exception".to_string());

    ExecutionError {
        runtime: RuntimeId::Guest,
        kind,
        message: err.value(py).to_string(),
    }
}

/// Classifies a Python exception raised while navigating to `name`.
///
/// `KeyError`, `AttributeError` and `NameError` mean the segment is missing;
/// anything else is reported as a Python error.
pub(crate) fn map_lookup_error(py: Python<'_>, err: PyErr, name: &str) -> BridgeError {
    let missing = err.is_instance_of::<PyKeyError>(py)
        || err.is_instance_of::<pyo3::exceptions::PyAttributeError>(py)
        || err.is_instance_of::<pyo3::exceptions::PyNameError>(py);
    if missing {
        LookupError::NotFound {
            runtime: RuntimeId::Guest,
            name: name.to_string(),
        }
        .into()
    } else {
        BridgeError::from(err)
    }
}
