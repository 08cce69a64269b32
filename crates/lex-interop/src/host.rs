//! The host runtime: an in-process namespace of bridge values.
//!
//! The host is the Rust program that owns the session. Its global namespace
//! is an ordered map from names to [`Value`]s, guarded by a
//! `parking_lot::RwLock` that is only ever held for the duration of a single
//! read or write, never across a call into the guest.
//!
//! # Snippets
//!
//! [`execute`](RuntimeAdapter::execute) accepts a small statement language so
//! that the host can be driven the same way as the guest:
//!
//! ```text
//! greeting = "hello"          # assignment of a JSON literal
//! guest.count = 3             # assignment through the guest proxy
//! guest.df.id                 # dotted path, followed across proxies
//! [1, 2, {"a": null}]         # any JSON literal
//! ```
//!
//! Statements are separated by newlines or `;`. Lines starting with `#` are
//! ignored. The value of the last statement is returned; assignments yield
//! `null`.

use parking_lot::RwLock;
use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, OnceLock, Weak};
use tracing::debug;

use crate::adapter::{Located, Resolved, RuntimeAdapter, member};
use crate::error::{AssignmentError, BridgeError, ExecutionError, LookupError};
use crate::marshal::table::mapping_to_table;
use crate::proxy::ProxyResolver;
use crate::types::{ProxyObject, RuntimeId, is_identifier};
use crate::value::{Mapping, NativeHandle, Value};
use polars::prelude::DataFrame;

/// The host side of the bridge.
pub struct HostRuntime {
    runtime: RuntimeId,
    namespace: RwLock<Mapping>,
    locked: RwLock<HashSet<String>>,
    resolver: OnceLock<Weak<ProxyResolver>>,
}

impl fmt::Debug for HostRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostRuntime")
            .field("runtime", &self.runtime)
            .field("names", &self.names())
            .field("locked", &self.locked.read().len())
            .field("attached", &self.resolver.get().is_some())
            .finish()
    }
}

impl Default for HostRuntime {
    fn default() -> Self {
        Self::with_id(RuntimeId::Host)
    }
}

impl HostRuntime {
    /// Creates an empty host namespace.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty in-memory namespace that reports itself as `runtime`.
    ///
    /// With [`RuntimeId::Guest`] this stands in for an embedded interpreter,
    /// which lets a session run without one.
    #[must_use]
    pub fn with_id(runtime: RuntimeId) -> Self {
        Self {
            runtime,
            namespace: RwLock::default(),
            locked: RwLock::default(),
            resolver: OnceLock::new(),
        }
    }

    /// Makes `name` read-only. Writes to it, or to anything nested under it,
    /// fail with [`AssignmentError::Locked`] until it is unlocked.
    pub fn lock_binding(&self, name: impl Into<String>) {
        self.locked.write().insert(name.into());
    }

    /// Makes `name` writable again. Returns `false` if it was not locked.
    pub fn unlock_binding(&self, name: &str) -> bool {
        self.locked.write().remove(name)
    }

    /// Returns `true` if `name` is locked.
    #[must_use]
    pub fn is_locked(&self, name: &str) -> bool {
        self.locked.read().contains(name)
    }

    /// Removes a binding, returning its value.
    ///
    /// # Errors
    ///
    /// Returns [`AssignmentError::Locked`] if the binding is locked.
    pub fn remove(&self, name: &str) -> Result<Option<Value>, BridgeError> {
        self.check_unlocked(name)?;
        Ok(self.namespace.write().shift_remove(name))
    }

    fn check_unlocked(&self, name: &str) -> Result<(), AssignmentError> {
        if self.is_locked(name) {
            return Err(AssignmentError::Locked {
                runtime: self.runtime,
                name: name.to_string(),
            });
        }
        Ok(())
    }

    fn resolver(&self) -> Option<Arc<ProxyResolver>> {
        self.resolver.get().and_then(Weak::upgrade)
    }

    fn eval_statement(&self, statement: &str) -> Result<Value, BridgeError> {
        let target = split_assignment(statement)
            .and_then(|(lhs, rhs)| parse_path(lhs).map(|path| (path, rhs)));
        if let Some((mut path, rhs)) = target {
            let value = self.eval_expression(rhs)?;
            let last = path.pop().unwrap_or_default();
            if path.is_empty() {
                self.set(&last, value)?;
            } else if let Some(resolver) = self.resolver() {
                resolver.resolve_set(
                    &ProxyObject::new(self.runtime, path),
                    &last,
                    value,
                    self.runtime,
                )?;
            } else {
                path.push(last);
                match self.locate(&path)? {
                    Located::Local => self.assign(&path, value)?,
                    Located::Redirect { proxy, .. } => {
                        return Err(BridgeError::RuntimeUnavailable(proxy.target()));
                    }
                }
            }
            return Ok(Value::Null);
        }

        self.eval_expression(statement)
    }

    fn eval_expression(&self, expr: &str) -> Result<Value, BridgeError> {
        let expr = expr.trim();
        if !matches!(expr, "true" | "false" | "null") {
            if let Some(path) = parse_path(expr) {
                return self.read_path(path);
            }
        }

        serde_json::from_str::<serde_json::Value>(expr)
            .map(Value::from)
            .map_err(|e| {
                ExecutionError {
                    runtime: self.runtime,
                    kind: "SyntaxError".to_string(),
                    message: format!("cannot evaluate `{expr}`: {e}"),
                }
                .into()
            })
    }

    fn read_path(&self, path: Vec<String>) -> Result<Value, BridgeError> {
        if let Some(resolver) = self.resolver() {
            return resolver.read(&ProxyObject::new(self.runtime, path), self.runtime);
        }
        match self.resolve(&path)? {
            Resolved::Value(value) => Ok(value),
            Resolved::Redirect { proxy, rest } if rest.is_empty() => Ok(Value::Proxy(proxy)),
            Resolved::Redirect { proxy, .. } => {
                Err(BridgeError::RuntimeUnavailable(proxy.target()))
            }
        }
    }
}

impl RuntimeAdapter for HostRuntime {
    fn id(&self) -> RuntimeId {
        self.runtime
    }

    fn resolve(&self, path: &[String]) -> Result<Resolved, BridgeError> {
        let (first, rest) = path.split_first().ok_or_else(|| not_found(self.runtime, ""))?;
        let mut current = self
            .namespace
            .read()
            .get(first)
            .cloned()
            .ok_or_else(|| not_found(self.runtime, first))?;

        for (i, segment) in rest.iter().enumerate() {
            if let Value::Proxy(proxy) = &current {
                return Ok(Resolved::Redirect {
                    proxy: proxy.clone(),
                    rest: rest[i..].to_vec(),
                });
            }
            current = member(self.runtime, &current, segment)?;
        }

        Ok(match current {
            Value::Proxy(proxy) => Resolved::Redirect {
                proxy,
                rest: Vec::new(),
            },
            value => Resolved::Value(value),
        })
    }

    fn locate(&self, path: &[String]) -> Result<Located, BridgeError> {
        let (last, parents) = path.split_last().ok_or_else(|| not_found(self.runtime, ""))?;
        let Some((first, _)) = parents.split_first() else {
            return Ok(Located::Local);
        };

        let namespace = self.namespace.read();
        let mut current = namespace.get(first).ok_or_else(|| not_found(self.runtime, first))?;
        for i in 1..=parents.len() {
            if let Value::Proxy(proxy) = current {
                return Ok(Located::Redirect {
                    proxy: proxy.clone(),
                    rest: path[i..].to_vec(),
                });
            }
            let segment = path.get(i).unwrap_or(last);
            if i == parents.len() {
                return match current {
                    Value::Mapping(_) | Value::Table(_) => Ok(Located::Local),
                    other => Err(not_writable(self.runtime, other, segment)),
                };
            }
            current = match current {
                Value::Mapping(map) => map.get(segment).ok_or_else(|| not_found(self.runtime, segment))?,
                other => return Err(not_writable(self.runtime, other, segment)),
            };
        }
        Ok(Located::Local)
    }

    fn assign(&self, path: &[String], value: Value) -> Result<(), BridgeError> {
        let (last, parents) = path.split_last().ok_or_else(|| not_found(self.runtime, ""))?;
        self.check_unlocked(parents.first().unwrap_or(last))?;

        let mut namespace = self.namespace.write();
        let Some((first, middle)) = parents.split_first() else {
            namespace.insert(last.clone(), value);
            return Ok(());
        };

        let mut current = namespace.get_mut(first).ok_or_else(|| not_found(self.runtime, first))?;
        for segment in middle {
            current = match current {
                Value::Mapping(map) => map.get_mut(segment).ok_or_else(|| not_found(self.runtime, segment))?,
                other => return Err(not_writable(self.runtime, other, segment)),
            };
        }

        match current {
            Value::Mapping(map) => {
                map.insert(last.clone(), value);
                Ok(())
            }
            Value::Table(df) => set_column(self.runtime, df, last, value),
            other => Err(not_writable(self.runtime, other, last)),
        }
    }

    fn execute(&self, code: &str) -> Result<Value, BridgeError> {
        debug!("Executing host snippet ({} bytes)", code.len());
        let mut last = Value::Null;
        for statement in split_statements(code) {
            last = self.eval_statement(statement).map_err(|e| match e {
                BridgeError::Execution(_) => e,
                other => ExecutionError {
                    runtime: self.runtime,
                    kind: error_kind(&other).to_string(),
                    message: other.to_string(),
                }
                .into(),
            })?;
        }
        Ok(last)
    }

    fn names(&self) -> Vec<String> {
        self.namespace.read().keys().cloned().collect()
    }

    fn contains(&self, name: &str) -> bool {
        self.namespace.read().contains_key(name)
    }

    fn attach(&self, resolver: Weak<ProxyResolver>) {
        if self.resolver.set(resolver).is_err() {
            debug!("Host runtime already attached to a session");
        }
    }
}

static_assertions::assert_impl_all!(HostRuntime: Send, Sync);

fn not_found(runtime: RuntimeId, name: &str) -> BridgeError {
    LookupError::NotFound {
        runtime,
        name: name.to_string(),
    }
    .into()
}

/// Error for writing `name` inside a value that cannot hold it.
fn not_writable(runtime: RuntimeId, container: &Value, name: &str) -> BridgeError {
    match container {
        Value::Opaque(opaque) if matches!(opaque.handle(), NativeHandle::Host(_)) => {
            AssignmentError::Rejected {
                runtime,
                name: name.to_string(),
                message: format!("{} objects are read-only", opaque.type_tag()),
            }
            .into()
        }
        Value::Table(_) => AssignmentError::Rejected {
            runtime,
            name: name.to_string(),
            message: "table columns cannot be assigned into".to_string(),
        }
        .into(),
        other => LookupError::NotIndexable {
            runtime,
            name: name.to_string(),
            kind: other.kind().to_string(),
        }
        .into(),
    }
}

fn set_column(
    runtime: RuntimeId,
    df: &mut DataFrame,
    name: &str,
    value: Value,
) -> Result<(), BridgeError> {
    let rejected = |message: String| AssignmentError::Rejected {
        runtime,
        name: name.to_string(),
        message,
    };

    let values = match value {
        Value::Sequence(values) => values,
        other => {
            return Err(
                rejected(format!("a table column needs a sequence, got {}", other.kind())).into(),
            );
        }
    };
    if df.width() > 0 && values.len() != df.height() {
        return Err(rejected(format!(
            "column has {} rows, table has {}",
            values.len(),
            df.height()
        ))
        .into());
    }

    let single: Mapping = [(name.to_string(), Value::Sequence(values))].into_iter().collect();
    let column = mapping_to_table(&single)?
        .take_columns()
        .pop()
        .ok_or_else(|| rejected("empty column".to_string()))?;
    df.with_column(column).map_err(|e| rejected(e.to_string()))?;
    Ok(())
}

fn error_kind(err: &BridgeError) -> &'static str {
    match err {
        BridgeError::Lookup(_) => "LookupError",
        BridgeError::Conversion(_) => "ConversionError",
        BridgeError::Assignment(_) => "AssignmentError",
        BridgeError::Execution(_) => "ExecutionError",
        BridgeError::Environment(_) => "EnvironmentError",
        BridgeError::Session(_) => "SessionError",
        BridgeError::RuntimeUnavailable(_) | BridgeError::SessionClosed => "RuntimeError",
        BridgeError::Python { .. } => "PythonError",
    }
}

/// Splits host code into statements on newlines and `;` outside strings.
fn split_statements(code: &str) -> Vec<&str> {
    let mut statements = Vec::new();
    let mut start = 0;
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in code.char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '\n' | ';' => {
                statements.push(&code[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    statements.push(&code[start..]);

    statements
        .into_iter()
        .map(str::trim)
        .filter(|s| !s.is_empty() && !s.starts_with('#'))
        .collect()
}

/// Splits `lhs = rhs` at the first `=` outside a string literal.
fn split_assignment(statement: &str) -> Option<(&str, &str)> {
    let mut in_string = false;
    let mut escaped = false;
    let mut prev = None;
    for (i, c) in statement.char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            prev = Some(c);
            continue;
        }
        match c {
            '"' => in_string = true,
            '=' if prev != Some('=') && !statement[i + 1..].starts_with('=') => {
                return Some((statement[..i].trim(), statement[i + 1..].trim()));
            }
            _ => {}
        }
        prev = Some(c);
    }
    None
}

/// Parses `a.b.c` into its segments.
fn parse_path(expr: &str) -> Option<Vec<String>> {
    let segments: Vec<String> = expr.trim().split('.').map(|s| s.trim().to_string()).collect();
    segments
        .iter()
        .all(|s| is_identifier(s))
        .then_some(segments)
}
