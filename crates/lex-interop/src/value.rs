//! The bridge's value model.
//!
//! [`Value`] is the common currency between the two runtimes. Each adapter
//! turns its native objects into a `Value` when reading and back into native
//! objects when writing; the marshalling engine only ever sees `Value`s.
//!
//! Tables are first-class: a [`Value::Table`] wraps a polars [`DataFrame`],
//! which carries the ordered column names, the per-column scalar dtype and
//! the column data. Mappings keep insertion order so that a table degraded
//! to a mapping of columns still lists its columns in the original order.

use indexmap::IndexMap;
use polars::prelude::DataFrame;
use pyo3::{Py, PyAny};
use std::fmt;
use std::sync::Arc;

use crate::error::ConversionError;
use crate::marshal::table::table_to_mapping;
use crate::types::{ProxyObject, RuntimeId};

/// Insertion-ordered string-keyed mapping.
pub type Mapping = IndexMap<String, Value>;

/// A value as seen by the bridge.
#[derive(Debug, Clone)]
pub enum Value {
    /// Absence of a value (`None` in the guest).
    Null,
    /// A boolean.
    Boolean(bool),
    /// A signed integer. Runtimes with narrower integers receive a `Float`
    /// instead when the value does not fit.
    Integer(i64),
    /// A double-precision float.
    Float(f64),
    /// A UTF-8 string.
    String(String),
    /// An ordered sequence of values.
    Sequence(Vec<Value>),
    /// An insertion-ordered mapping from names to values.
    Mapping(Mapping),
    /// A table with schema and column data.
    Table(DataFrame),
    /// A native object the bridge does not understand.
    Opaque(OpaqueValue),
    /// A live view onto a runtime namespace.
    Proxy(ProxyObject),
}

impl Value {
    /// Short name of this value's shape, used in error messages.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Boolean(_) => "boolean",
            Value::Integer(_) => "integer",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::Sequence(_) => "sequence",
            Value::Mapping(_) => "mapping",
            Value::Table(_) => "table",
            Value::Opaque(_) => "opaque",
            Value::Proxy(_) => "proxy",
        }
    }

    /// Type tag reported in [`ConversionError::Unsupported`].
    ///
    /// For opaque values this is the native type name (e.g. `module`),
    /// otherwise the shape name from [`kind()`](Self::kind).
    #[must_use]
    pub fn type_tag(&self) -> &str {
        match self {
            Value::Opaque(opaque) => opaque.type_tag(),
            other => other.kind(),
        }
    }

    /// Returns `true` for null, booleans, numbers and strings.
    #[must_use]
    pub fn is_scalar(&self) -> bool {
        matches!(
            self,
            Value::Null | Value::Boolean(_) | Value::Integer(_) | Value::Float(_) | Value::String(_)
        )
    }

    /// Returns `true` if a further `.name` access on this value can succeed.
    #[must_use]
    pub fn is_navigable(&self) -> bool {
        matches!(
            self,
            Value::Mapping(_) | Value::Table(_) | Value::Opaque(_) | Value::Proxy(_)
        )
    }

    /// Builds a string value.
    #[must_use]
    pub fn string(s: impl Into<String>) -> Self {
        Value::String(s.into())
    }

    /// Builds a mapping from `(name, value)` pairs, keeping their order.
    #[must_use]
    pub fn mapping<K, I>(entries: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Value)>,
    {
        Value::Mapping(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Converts this value to JSON.
    ///
    /// Tables become objects of column arrays. Non-finite floats become
    /// `null`, matching how JSON cannot represent them.
    ///
    /// # Errors
    ///
    /// Returns [`ConversionError::Unsupported`] for opaque values and proxies,
    /// which have no data representation.
    pub fn to_json(&self) -> Result<serde_json::Value, ConversionError> {
        use serde_json::Value as Json;

        Ok(match self {
            Value::Null => Json::Null,
            Value::Boolean(b) => Json::Bool(*b),
            Value::Integer(i) => Json::Number((*i).into()),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(Json::Number)
                .unwrap_or(Json::Null),
            Value::String(s) => Json::String(s.clone()),
            Value::Sequence(items) => {
                Json::Array(items.iter().map(Value::to_json).collect::<Result<_, _>>()?)
            }
            Value::Mapping(map) => Json::Object(
                map.iter()
                    .map(|(k, v)| Ok((k.clone(), v.to_json()?)))
                    .collect::<Result<_, ConversionError>>()?,
            ),
            Value::Table(df) => Value::Mapping(table_to_mapping(df)?).to_json()?,
            Value::Opaque(_) | Value::Proxy(_) => {
                return Err(ConversionError::Unsupported(self.type_tag().to_string()));
            }
        })
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Integer(a), Value::Integer(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Sequence(a), Value::Sequence(b)) => a == b,
            (Value::Mapping(a), Value::Mapping(b)) => {
                a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| x == y)
            }
            (Value::Table(a), Value::Table(b)) => {
                a.get_column_names() == b.get_column_names() && a.equals_missing(b)
            }
            (Value::Opaque(a), Value::Opaque(b)) => a == b,
            (Value::Proxy(a), Value::Proxy(b)) => a == b,
            _ => false,
        }
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        use serde_json::Value as Json;

        match json {
            Json::Null => Value::Null,
            Json::Bool(b) => Value::Boolean(b),
            Json::Number(n) => match n.as_i64() {
                Some(i) => Value::Integer(i),
                None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            Json::String(s) => Value::String(s),
            Json::Array(items) => Value::Sequence(items.into_iter().map(Value::from).collect()),
            Json::Object(map) => {
                Value::Mapping(map.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Integer(i.into())
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::Sequence(items)
    }
}

impl From<DataFrame> for Value {
    fn from(df: DataFrame) -> Self {
        Value::Table(df)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Boolean(b) => write!(f, "{b}"),
            Value::Integer(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::String(s) => f.write_str(s),
            Value::Sequence(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
            Value::Mapping(map) => {
                f.write_str("{")?;
                for (i, (k, v)) in map.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{k}: {v}")?;
                }
                f.write_str("}")
            }
            Value::Table(df) => {
                let names: Vec<&str> = df.get_column_names().iter().map(|n| n.as_str()).collect();
                write!(f, "<table {}x{} [{}]>", df.height(), df.width(), names.join(", "))
            }
            Value::Opaque(opaque) => write!(f, "<{} {}>", opaque.owner(), opaque.type_tag()),
            Value::Proxy(proxy) => write!(f, "{proxy}"),
        }
    }
}

/// A native object the bridge carries but does not understand.
///
/// Opaque values can only be handed back to the runtime that owns them;
/// crossing to the other runtime fails with
/// [`ConversionError::Unsupported`] carrying [`type_tag()`](Self::type_tag).
#[derive(Debug, Clone)]
pub struct OpaqueValue {
    owner: RuntimeId,
    type_tag: String,
    handle: NativeHandle,
}

impl OpaqueValue {
    /// Wraps a host-side object.
    #[must_use]
    pub fn host(object: Arc<dyn HostObject>) -> Self {
        Self {
            owner: RuntimeId::Host,
            type_tag: object.type_tag().to_string(),
            handle: NativeHandle::Host(object),
        }
    }

    /// Wraps a guest (Python) object.
    #[must_use]
    pub fn python(type_tag: impl Into<String>, object: Py<PyAny>) -> Self {
        Self {
            owner: RuntimeId::Guest,
            type_tag: type_tag.into(),
            handle: NativeHandle::Python(Arc::new(object)),
        }
    }

    /// Runtime the handle belongs to.
    #[must_use]
    pub fn owner(&self) -> RuntimeId {
        self.owner
    }

    /// Native type name of the wrapped object.
    #[must_use]
    pub fn type_tag(&self) -> &str {
        &self.type_tag
    }

    /// The wrapped native handle.
    #[must_use]
    pub fn handle(&self) -> &NativeHandle {
        &self.handle
    }
}

impl PartialEq for OpaqueValue {
    fn eq(&self, other: &Self) -> bool {
        self.owner == other.owner
            && match (&self.handle, &other.handle) {
                (NativeHandle::Host(a), NativeHandle::Host(b)) => Arc::ptr_eq(a, b),
                (NativeHandle::Python(a), NativeHandle::Python(b)) => a.as_ptr() == b.as_ptr(),
                _ => false,
            }
    }
}

/// The runtime-specific handle inside an [`OpaqueValue`].
#[derive(Clone)]
pub enum NativeHandle {
    /// A host object.
    Host(Arc<dyn HostObject>),
    /// A Python object; dropping the last clone releases the reference.
    Python(Arc<Py<PyAny>>),
}

impl fmt::Debug for NativeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NativeHandle::Host(object) => f.debug_tuple("Host").field(object).finish(),
            NativeHandle::Python(object) => {
                f.debug_tuple("Python").field(&object.as_ptr()).finish()
            }
        }
    }
}

/// A host-side object that can live in the host namespace as an opaque value.
///
/// Implementors may expose named members so that proxy paths can navigate
/// through them (`guest.host.config.name` where `config` is a host object).
pub trait HostObject: Send + Sync + fmt::Debug {
    /// Type name reported in conversion errors.
    fn type_tag(&self) -> &str;

    /// Looks up a named member. `None` means the member does not exist.
    fn member(&self, _name: &str) -> Option<Value> {
        None
    }

    /// Names of the members this object exposes.
    fn member_names(&self) -> Vec<String> {
        Vec::new()
    }
}
