//! Session lifecycle: environment activation, runtime start-up and the two
//! root proxies.
//!
//! # Lifecycle
//!
//! ```text
//! SessionManager::new(config)
//!       │
//!       ├─ create_environment(spec)          (any number of times)
//!       ├─ activate_environment(name, required)
//!       │        └─ failure with required = true closes the gate
//!       ▼
//! start_session()  ──▶  Session
//!       ├─ host adapter
//!       ├─ guest adapter (via the guest factory, unless skipped)
//!       ├─ capabilities, computed once
//!       └─ root proxies: `guest` in the host, `host` in the guest
//! ```
//!
//! # Example
//!
//! ```no_run
//! use lex_interop::{EnvironmentSpec, RuntimeId, SessionManager, Value};
//!
//! let mut manager = SessionManager::default();
//! manager.create_environment(EnvironmentSpec::new("analysis").with_packages(["pandas", "pyarrow"]))?;
//! manager.activate_environment("analysis", true)?;
//!
//! let session = manager.start_session()?;
//! session.execute(RuntimeId::Guest, "total = sum(range(10))")?;
//! assert_eq!(session.read_other(RuntimeId::Host, "total")?, Value::from(45));
//! # Ok::<(), lex_interop::BridgeError>(())
//! ```

use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::adapter::RuntimeAdapter;
use crate::config::BridgeConfig;
use crate::environment::{Environment, EnvironmentRegistry, EnvironmentSpec};
use crate::error::{BridgeError, EnvironmentError, SessionError};
use crate::host::HostRuntime;
use crate::marshal::{Capabilities, Marshaller};
use crate::proxy::ProxyResolver;
use crate::python::PythonRuntime;
use crate::types::{ProxyObject, RuntimeId};
use crate::value::Value;

/// Builds the guest adapter for a session.
///
/// Receives the active environment, if any, and the session configuration.
/// The returned adapter must report [`RuntimeId::Guest`].
pub type GuestFactory = Arc<
    dyn Fn(Option<&Environment>, &BridgeConfig) -> Result<Arc<dyn RuntimeAdapter>, SessionError>
        + Send
        + Sync,
>;

/// The default guest: embedded CPython with the environment's site-packages
/// on its module path.
#[must_use]
pub fn python_guest_factory() -> GuestFactory {
    Arc::new(|environment: Option<&Environment>, config: &BridgeConfig| {
        let guest = PythonRuntime::for_environment(environment, &config.python_path)?;
        Ok::<_, SessionError>(Arc::new(guest) as Arc<dyn RuntimeAdapter>)
    })
}

/// What the last activation outcome means for session start.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Gate {
    Open,
    /// A required activation failed; the session may not start.
    Closed(EnvironmentError),
    /// A best-effort activation failed with nothing active; start without
    /// a guest.
    NoGuest(EnvironmentError),
}

/// Prepares and starts a [`Session`].
pub struct SessionManager {
    config: BridgeConfig,
    environments: EnvironmentRegistry,
    guest_factory: GuestFactory,
    gate: Gate,
    started: bool,
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new(BridgeConfig::default())
    }
}

impl fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionManager")
            .field("config", &self.config)
            .field("environments", &self.environments)
            .field("gate", &self.gate)
            .field("started", &self.started)
            .finish_non_exhaustive()
    }
}

impl SessionManager {
    /// Creates a manager that will start the embedded Python guest.
    #[must_use]
    pub fn new(config: BridgeConfig) -> Self {
        Self {
            config,
            environments: EnvironmentRegistry::new(),
            guest_factory: python_guest_factory(),
            gate: Gate::Open,
            started: false,
        }
    }

    /// Replaces the guest factory.
    #[must_use]
    pub fn with_guest_factory(mut self, factory: GuestFactory) -> Self {
        self.guest_factory = factory;
        self
    }

    /// Replaces the environment registry, e.g. one loaded with
    /// [`EnvironmentRegistry::from_json`].
    #[must_use]
    pub fn with_environments(mut self, environments: EnvironmentRegistry) -> Self {
        self.environments = environments;
        self
    }

    #[must_use]
    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    #[must_use]
    pub fn environments(&self) -> &EnvironmentRegistry {
        &self.environments
    }

    /// Registers an environment. Environments are never created implicitly.
    ///
    /// # Errors
    ///
    /// Returns [`EnvironmentError::AlreadyExists`] if the name is taken.
    pub fn create_environment(&mut self, spec: EnvironmentSpec) -> Result<(), EnvironmentError> {
        self.environments.create(spec).map(|_| ())
    }

    /// Activates a previously created environment.
    ///
    /// With `required = true` a failure is a hard precondition: the manager
    /// will refuse to start a session. With `required = false` the failure is
    /// logged and returned; if no environment is active, the session starts
    /// without a guest runtime.
    ///
    /// # Errors
    ///
    /// - [`EnvironmentError::NotFound`] if `name` was never created
    /// - [`EnvironmentError::AlreadyActive`] if another environment is active
    pub fn activate_environment(
        &mut self,
        name: &str,
        required: bool,
    ) -> Result<(), EnvironmentError> {
        let err = match self.environments.activate(name) {
            Ok(environment) => {
                info!(
                    "Activated environment '{}' ({} packages)",
                    environment.name(),
                    environment.packages().len()
                );
                if matches!(self.gate, Gate::NoGuest(_)) {
                    self.gate = Gate::Open;
                }
                return Ok(());
            }
            Err(err) => err,
        };

        if required {
            warn!("Required activation of '{}' failed: {}", name, err);
            self.gate = Gate::Closed(err.clone());
        } else if self.environments.active().is_none() {
            warn!("Activation of '{}' failed, continuing without a guest: {}", name, err);
            if self.gate == Gate::Open {
                self.gate = Gate::NoGuest(err.clone());
            }
        } else {
            warn!("Activation of '{}' failed, keeping the active environment: {}", name, err);
        }
        Err(err)
    }

    /// Deactivates the active environment so another can be activated.
    /// Returns the name of the environment that was active.
    pub fn deactivate_environment(&mut self) -> Option<String> {
        let name = self.environments.deactivate()?;
        info!("Deactivated environment '{}'", name);
        Some(name)
    }

    /// Starts the session: builds the adapters, caches capabilities and
    /// installs the root proxies.
    ///
    /// A manager starts at most one session. The once-only guard belongs to
    /// the manager, not the process: an application that needs a single
    /// session per process keeps a single `SessionManager`. Separate managers
    /// get separate namespaces but share the one embedded interpreter.
    ///
    /// # Errors
    ///
    /// - [`SessionError::AlreadyStarted`] on a second call
    /// - [`SessionError::ActivationRequired`] if a required activation failed
    /// - [`SessionError::InvalidConfig`] if the configuration is invalid
    /// - [`SessionError::RuntimeInit`] if the guest cannot be started
    /// - [`SessionError::ReservedName`] if a root name is already bound
    pub fn start_session(&mut self) -> Result<Session, SessionError> {
        if self.started {
            return Err(SessionError::AlreadyStarted);
        }
        if let Gate::Closed(err) = &self.gate {
            return Err(SessionError::ActivationRequired(err.clone()));
        }
        self.config.validate()?;

        let environment = self.environments.active();
        let host = Arc::new(HostRuntime::new());
        let guest = match &self.gate {
            _ if !self.config.enable_guest => None,
            Gate::NoGuest(err) => {
                info!("Starting without a guest runtime ({})", err);
                None
            }
            _ => Some((self.guest_factory)(environment, &self.config)?),
        };
        if let Some(guest) = &guest {
            if guest.id() != RuntimeId::Guest {
                return Err(SessionError::RuntimeInit(format!(
                    "guest factory returned a {} adapter",
                    guest.id()
                )));
            }
        }

        let capabilities = Capabilities {
            rich_tables: guest.as_ref().is_some_and(|guest| {
                environment.is_some_and(|environment| {
                    self.config.tabular_packages.iter().all(|package| {
                        environment.declares(package) && guest.provides(package)
                    })
                })
            }),
        };
        info!("Guest capabilities: rich tables = {}", capabilities.rich_tables);

        let marshaller = Marshaller::new(self.config.host, self.config.guest, capabilities);
        let host_adapter: Arc<dyn RuntimeAdapter> = host.clone();
        let resolver = Arc::new(ProxyResolver::new(host_adapter, guest.clone(), marshaller));
        host.attach(Arc::downgrade(&resolver));
        if let Some(guest) = &guest {
            guest.attach(Arc::downgrade(&resolver));
        }

        if guest.is_some() {
            install_root(host.as_ref(), &self.config.host_root_name, RuntimeId::Guest)?;
        }
        if let Some(guest) = &guest {
            install_root(guest.as_ref(), &self.config.guest_root_name, RuntimeId::Host)?;
        }

        self.started = true;
        info!(
            "Session started (environment: {}, guest: {})",
            environment.map_or("none", Environment::name),
            if guest.is_some() { "yes" } else { "no" }
        );

        Ok(Session {
            host,
            resolver,
            capabilities,
            environment: environment.map(|e| e.name().to_string()),
        })
    }
}

/// Binds a root proxy to `target` under `name` in `adapter`'s namespace.
fn install_root(
    adapter: &dyn RuntimeAdapter,
    name: &str,
    target: RuntimeId,
) -> Result<(), SessionError> {
    if adapter.contains(name) {
        return Err(SessionError::ReservedName {
            runtime: adapter.id(),
            name: name.to_string(),
        });
    }
    adapter
        .set(name, Value::Proxy(ProxyObject::root(target)))
        .map_err(|e| SessionError::Install(e.to_string()))?;
    debug!("Installed {} root proxy as '{}' in {}", target, name, adapter.id());
    Ok(())
}

/// A running bridge between the host and (optionally) the guest.
///
/// Dropping the session invalidates every Python-side proxy.
pub struct Session {
    host: Arc<HostRuntime>,
    resolver: Arc<ProxyResolver>,
    capabilities: Capabilities,
    environment: Option<String>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("host", &self.host)
            .field("guest", &self.guest())
            .field("capabilities", &self.capabilities)
            .field("environment", &self.environment)
            .finish()
    }
}

impl Session {
    /// The host runtime.
    #[must_use]
    pub fn host(&self) -> &HostRuntime {
        &self.host
    }

    /// The guest runtime, if the session has one.
    #[must_use]
    pub fn guest(&self) -> Option<&Arc<dyn RuntimeAdapter>> {
        self.resolver.adapter(RuntimeId::Guest).ok()
    }

    #[must_use]
    pub fn resolver(&self) -> &ProxyResolver {
        &self.resolver
    }

    /// Capabilities computed when the session started.
    #[must_use]
    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    /// Name of the environment that was active at start, if any.
    #[must_use]
    pub fn environment(&self) -> Option<&str> {
        self.environment.as_deref()
    }

    /// The root proxy through which `requester` reaches the other runtime.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::RuntimeUnavailable`] if the other runtime is
    /// the guest and the session has none.
    pub fn root_proxy(&self, requester: RuntimeId) -> Result<ProxyObject, BridgeError> {
        let target = requester.other();
        self.resolver.adapter(target)?;
        Ok(ProxyObject::root(target))
    }

    /// Evaluates `code` in `runtime`.
    ///
    /// # Errors
    ///
    /// Returns [`ExecutionError`](crate::ExecutionError) if evaluation fails,
    /// or [`BridgeError::RuntimeUnavailable`] without a guest.
    pub fn execute(&self, runtime: RuntimeId, code: &str) -> Result<Value, BridgeError> {
        self.resolver.adapter(runtime)?.execute(code)
    }

    /// Reads a top-level binding of `runtime`, in that runtime's own
    /// representation.
    pub fn get(&self, runtime: RuntimeId, name: &str) -> Result<Value, BridgeError> {
        self.resolver.adapter(runtime)?.get(name)
    }

    /// Binds `name` in `runtime`. The value is taken as already being in that
    /// runtime's representation.
    pub fn set(&self, runtime: RuntimeId, name: &str, value: Value) -> Result<(), BridgeError> {
        self.resolver.adapter(runtime)?.set(name, value)
    }

    /// Reads `name` from the other runtime, as `requester` would through its
    /// root proxy.
    pub fn read_other(&self, requester: RuntimeId, name: &str) -> Result<Value, BridgeError> {
        self.resolver
            .resolve_get(&self.root_proxy(requester)?, name, requester)
    }

    /// Writes `name` in the other runtime, as `requester` would through its
    /// root proxy.
    pub fn write_other(
        &self,
        requester: RuntimeId,
        name: &str,
        value: Value,
    ) -> Result<(), BridgeError> {
        self.resolver
            .resolve_set(&self.root_proxy(requester)?, name, value, requester)
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        debug!("Session closed");
    }
}

static_assertions::assert_impl_all!(Session: Send, Sync);
static_assertions::assert_impl_all!(SessionManager: Send, Sync);
