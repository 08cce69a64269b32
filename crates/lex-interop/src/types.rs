//! Identifiers and addressing types shared by every layer of the bridge.
//!
//! - [`RuntimeId`]: which of the two runtimes a value or namespace belongs to
//! - [`ProxyObject`]: a live, path-addressed view into a runtime namespace

use serde::{Deserialize, Serialize};
use std::fmt;

/// One of the two runtimes sharing the process.
///
/// The set is fixed: the bridge connects exactly one host and one guest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeId {
    /// The runtime that owns session start-up and embeds the guest.
    Host,
    /// The embedded, subordinate runtime.
    Guest,
}

impl RuntimeId {
    /// Returns the runtime on the other side of the bridge.
    ///
    /// ```
    /// use lex_interop::RuntimeId;
    ///
    /// assert_eq!(RuntimeId::Host.other(), RuntimeId::Guest);
    /// assert_eq!(RuntimeId::Guest.other(), RuntimeId::Host);
    /// ```
    #[must_use]
    pub fn other(self) -> RuntimeId {
        match self {
            RuntimeId::Host => RuntimeId::Guest,
            RuntimeId::Guest => RuntimeId::Host,
        }
    }

    /// Returns the lowercase name used in messages and logs.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            RuntimeId::Host => "host",
            RuntimeId::Guest => "guest",
        }
    }
}

impl fmt::Display for RuntimeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A view onto a runtime namespace, addressed by path.
///
/// A proxy owns no data. Every access through it re-resolves the path
/// against the live runtime, so two reads may observe different values.
/// Proxies are cheap to clone and carry no cleanup obligation.
///
/// User code never builds one directly; the session installs the two root
/// proxies and every deeper proxy is produced by traversal.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProxyObject {
    target: RuntimeId,
    path: Vec<String>,
}

impl ProxyObject {
    /// The proxy for the whole global namespace of `target`.
    #[must_use]
    pub(crate) fn root(target: RuntimeId) -> Self {
        Self {
            target,
            path: Vec::new(),
        }
    }

    pub(crate) fn new(target: RuntimeId, path: Vec<String>) -> Self {
        Self { target, path }
    }

    /// Runtime whose namespace this proxy looks into.
    #[must_use]
    pub fn target(&self) -> RuntimeId {
        self.target
    }

    /// Name segments from the target's global namespace.
    #[must_use]
    pub fn path(&self) -> &[String] {
        &self.path
    }

    /// Returns `true` for a proxy over the whole namespace.
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.path.is_empty()
    }

    /// A new proxy one segment deeper.
    #[must_use]
    pub fn child(&self, segment: impl Into<String>) -> Self {
        let mut path = self.path.clone();
        path.push(segment.into());
        Self {
            target: self.target,
            path,
        }
    }

    /// This proxy's path followed by `rest`.
    pub(crate) fn joined(&self, rest: &[String]) -> Vec<String> {
        let mut path = self.path.clone();
        path.extend_from_slice(rest);
        path
    }
}

impl fmt::Display for ProxyObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{} proxy", self.target)?;
        if !self.path.is_empty() {
            write!(f, " {}", self.path.join("."))?;
        }
        f.write_str(">")
    }
}

/// Returns `true` if `name` can be used as a bare binding name.
pub(crate) fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_alphabetic() || c == '_')
        && chars.all(|c| c.is_alphanumeric() || c == '_')
}
