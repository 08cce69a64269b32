//! Proxy resolution across the two runtimes.
//!
//! A [`ProxyObject`] is only an address. [`ProxyResolver`] turns an address
//! plus a requesting runtime into a value, or writes a value at an address,
//! by walking adapter namespaces one hop at a time:
//!
//! 1. Ask the target adapter to resolve (or locate) the path.
//! 2. If it answers with a redirect, switch to the redirect's runtime with
//!    `proxy.path + rest` and go back to 1.
//! 3. Convert the final value between the final runtime and the requester.
//!
//! The walk is a loop over hops, so a chain such as
//! `guest.host.guest.host.x` costs one adapter call per hop and never grows
//! the stack. Nothing is cached between accesses.

use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

use crate::adapter::{Located, Resolved, RuntimeAdapter};
use crate::error::{BridgeError, LookupError};
use crate::marshal::Marshaller;
use crate::types::{ProxyObject, RuntimeId};
use crate::value::{NativeHandle, Value};

/// Resolves proxies against the adapters of one session.
#[derive(Debug)]
pub struct ProxyResolver {
    host: Arc<dyn RuntimeAdapter>,
    guest: Option<Arc<dyn RuntimeAdapter>>,
    marshaller: Marshaller,
}

static_assertions::assert_impl_all!(ProxyResolver: Send, Sync);

impl ProxyResolver {
    pub(crate) fn new(
        host: Arc<dyn RuntimeAdapter>,
        guest: Option<Arc<dyn RuntimeAdapter>>,
        marshaller: Marshaller,
    ) -> Self {
        Self {
            host,
            guest,
            marshaller,
        }
    }

    /// The adapter for `runtime`.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::RuntimeUnavailable`] for the guest when the
    /// session runs without one.
    pub fn adapter(&self, runtime: RuntimeId) -> Result<&Arc<dyn RuntimeAdapter>, BridgeError> {
        match runtime {
            RuntimeId::Host => Ok(&self.host),
            RuntimeId::Guest => self
                .guest
                .as_ref()
                .ok_or(BridgeError::RuntimeUnavailable(RuntimeId::Guest)),
        }
    }

    /// The marshaller, with the capabilities cached at session start.
    #[must_use]
    pub fn marshaller(&self) -> &Marshaller {
        &self.marshaller
    }

    /// Reads attribute `name` of `proxy` on behalf of `requester`.
    ///
    /// The result is in `requester`'s representation. A binding that is
    /// itself a proxy comes back as [`Value::Proxy`].
    ///
    /// # Errors
    ///
    /// - [`LookupError::NotFound`] if any segment is missing
    /// - [`LookupError::NotIndexable`] if a segment is accessed on a
    ///   sequence or scalar
    /// - [`LookupError::Cyclic`] if the chain returns to a location it has
    ///   already visited
    /// - [`ConversionError`](crate::ConversionError) if the final value cannot
    ///   be presented to `requester`
    ///
    /// # Example
    ///
    /// ```no_run
    /// use lex_interop::{RuntimeId, SessionManager, Value};
    ///
    /// let session = SessionManager::default().start_session()?;
    /// session.set(RuntimeId::Guest, "answer", Value::from(42))?;
    ///
    /// let root = session.root_proxy(RuntimeId::Host)?;
    /// let answer = session.resolver().resolve_get(&root, "answer", RuntimeId::Host)?;
    /// assert_eq!(answer, Value::from(42));
    /// # Ok::<(), lex_interop::BridgeError>(())
    /// ```
    pub fn resolve_get(
        &self,
        proxy: &ProxyObject,
        name: &str,
        requester: RuntimeId,
    ) -> Result<Value, BridgeError> {
        self.read(&proxy.child(name), requester)
    }

    /// Reads the value `proxy` points at on behalf of `requester`.
    ///
    /// A root proxy reads as itself.
    ///
    /// # Errors
    ///
    /// Same as [`resolve_get`](Self::resolve_get).
    pub fn read(&self, proxy: &ProxyObject, requester: RuntimeId) -> Result<Value, BridgeError> {
        if proxy.is_root() {
            return Ok(Value::Proxy(proxy.clone()));
        }
        let (owner, value) = self.read_raw(proxy)?;
        Ok(self.marshaller.convert(&value, owner, requester)?)
    }

    /// Writes `value`, given in `requester`'s representation, to attribute
    /// `name` of `proxy`.
    ///
    /// Parents are checked before anything is converted or written. The value
    /// is converted once, into the representation of the runtime that finally
    /// holds it. No intermediate structure is created.
    ///
    /// # Errors
    ///
    /// - [`LookupError`] if a parent segment is missing or not navigable
    /// - [`ConversionError`](crate::ConversionError) if the value cannot be
    ///   represented in the final runtime
    /// - [`AssignmentError`](crate::AssignmentError) if that runtime rejects
    ///   the write
    pub fn resolve_set(
        &self,
        proxy: &ProxyObject,
        name: &str,
        value: Value,
        requester: RuntimeId,
    ) -> Result<(), BridgeError> {
        let mut target = proxy.target();
        let mut path = proxy.joined(&[name.to_string()]);
        let mut visited = HashSet::new();

        loop {
            check_unvisited(&mut visited, target, &path)?;
            let adapter = self.adapter(target)?;
            match adapter.locate(&path)? {
                Located::Local => {
                    let value = self.marshaller.convert(&value, requester, target)?;
                    debug!("Assigning {}.{} for {}", target, path.join("."), requester);
                    return adapter.assign(&path, value);
                }
                Located::Redirect { proxy, rest } => {
                    debug!("Assignment redirected from {} to {}", target, proxy);
                    target = proxy.target();
                    path = proxy.joined(&rest);
                }
            }
        }
    }

    /// Names visible through `proxy`: the bindings of a root, the keys of a
    /// mapping, the columns of a table or the members of a host object.
    ///
    /// # Errors
    ///
    /// Same lookup errors as [`read`](Self::read).
    pub fn names(&self, proxy: &ProxyObject) -> Result<Vec<String>, BridgeError> {
        let mut current = proxy.clone();
        let mut visited = HashSet::new();

        loop {
            check_unvisited(&mut visited, current.target(), current.path())?;
            if current.is_root() {
                return Ok(self.adapter(current.target())?.names());
            }
            let (_, value) = self.read_raw(&current)?;
            return Ok(match value {
                Value::Mapping(map) => map.keys().cloned().collect(),
                Value::Table(df) => df
                    .get_column_names()
                    .into_iter()
                    .map(ToString::to_string)
                    .collect(),
                Value::Opaque(opaque) => match opaque.handle() {
                    NativeHandle::Host(object) => object.member_names(),
                    NativeHandle::Python(_) => Vec::new(),
                },
                Value::Proxy(next) => {
                    current = next;
                    continue;
                }
                _ => Vec::new(),
            });
        }
    }

    /// Walks `proxy`'s path across redirects and returns the raw value
    /// together with the runtime that holds it.
    fn read_raw(&self, proxy: &ProxyObject) -> Result<(RuntimeId, Value), BridgeError> {
        let mut target = proxy.target();
        let mut path = proxy.path().to_vec();
        let mut visited = HashSet::new();

        loop {
            check_unvisited(&mut visited, target, &path)?;
            match self.adapter(target)?.resolve(&path)? {
                Resolved::Value(value) => return Ok((target, value)),
                Resolved::Redirect { proxy, rest } if rest.is_empty() => {
                    return Ok((target, Value::Proxy(proxy)));
                }
                Resolved::Redirect { proxy, rest } => {
                    debug!("Read redirected from {} to {}", target, proxy);
                    target = proxy.target();
                    path = proxy.joined(&rest);
                }
            }
        }
    }
}

fn check_unvisited(
    visited: &mut HashSet<(RuntimeId, Vec<String>)>,
    target: RuntimeId,
    path: &[String],
) -> Result<(), LookupError> {
    if visited.insert((target, path.to_vec())) {
        Ok(())
    } else {
        Err(LookupError::Cyclic {
            runtime: target,
            path: path.join("."),
        })
    }
}
