//! Named package environments for the guest runtime.
//!
//! An environment is a declared set of packages, optionally backed by a
//! `site-packages` directory that is put on the guest's module path when the
//! session starts. At most one environment is active per
//! [`SessionManager`](crate::SessionManager).
//!
//! Environments can be described in JSON:
//!
//! ```
//! use lex_interop::EnvironmentRegistry;
//!
//! let registry = EnvironmentRegistry::from_json(
//!     r#"[
//!         {"name": "analysis", "packages": ["pandas", "pyarrow"]},
//!         {"name": "bare"}
//!     ]"#,
//! )?;
//! assert!(registry.get("analysis").unwrap().declares("pandas"));
//! assert!(registry.active().is_none());
//! # Ok::<(), lex_interop::EnvironmentError>(())
//! ```

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::error::EnvironmentError;

/// Description of an environment, as created by the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentSpec {
    /// Unique environment name.
    pub name: String,

    /// Packages the environment declares.
    #[serde(default)]
    pub packages: BTreeSet<String>,

    /// Directory holding the environment's installed packages, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub site_packages: Option<PathBuf>,
}

impl EnvironmentSpec {
    /// An environment with no packages.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            packages: BTreeSet::new(),
            site_packages: None,
        }
    }

    /// Adds declared packages.
    #[must_use]
    pub fn with_packages<I, S>(mut self, packages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.packages.extend(packages.into_iter().map(Into::into));
        self
    }

    /// Sets the site-packages directory.
    #[must_use]
    pub fn with_site_packages(mut self, dir: impl Into<PathBuf>) -> Self {
        self.site_packages = Some(dir.into());
        self
    }

    fn validate(&self) -> Result<(), EnvironmentError> {
        if self.name.trim().is_empty() {
            return Err(EnvironmentError::InvalidSpec(
                "environment name must not be empty".to_string(),
            ));
        }
        if let Some(pkg) = self.packages.iter().find(|p| p.trim().is_empty()) {
            return Err(EnvironmentError::InvalidSpec(format!(
                "environment '{}' declares an empty package name '{pkg}'",
                self.name
            )));
        }
        Ok(())
    }
}

/// Whether an environment is currently in use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivationState {
    /// Created but not in use.
    Inactive,
    /// In use by the session being prepared.
    Active,
}

/// A created environment and its activation state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Environment {
    spec: EnvironmentSpec,
    state: ActivationState,
}

impl Environment {
    /// The environment's name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.spec.name
    }

    /// Declared packages, sorted.
    #[must_use]
    pub fn packages(&self) -> &BTreeSet<String> {
        &self.spec.packages
    }

    /// Returns `true` if `package` is declared.
    #[must_use]
    pub fn declares(&self, package: &str) -> bool {
        self.spec.packages.contains(package)
    }

    /// The site-packages directory, if the environment has one.
    #[must_use]
    pub fn site_packages(&self) -> Option<&Path> {
        self.spec.site_packages.as_deref()
    }

    #[must_use]
    pub fn state(&self) -> ActivationState {
        self.state
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state == ActivationState::Active
    }
}

/// The environments known to one session manager.
#[derive(Debug, Default, Clone)]
pub struct EnvironmentRegistry {
    environments: IndexMap<String, Environment>,
    active: Option<String>,
}

impl EnvironmentRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads environment descriptions from a JSON array.
    ///
    /// # Errors
    ///
    /// - [`EnvironmentError::InvalidSpec`] if the JSON does not parse or an
    ///   entry is malformed
    /// - [`EnvironmentError::AlreadyExists`] if two entries share a name
    pub fn from_json(json: &str) -> Result<Self, EnvironmentError> {
        let specs: Vec<EnvironmentSpec> =
            serde_json::from_str(json).map_err(|e| EnvironmentError::InvalidSpec(e.to_string()))?;
        let mut registry = Self::new();
        for spec in specs {
            registry.create(spec)?;
        }
        Ok(registry)
    }

    /// Registers a new, inactive environment.
    ///
    /// # Errors
    ///
    /// - [`EnvironmentError::AlreadyExists`] if the name is taken
    /// - [`EnvironmentError::InvalidSpec`] if the name is empty
    pub fn create(&mut self, spec: EnvironmentSpec) -> Result<&Environment, EnvironmentError> {
        spec.validate()?;
        if self.environments.contains_key(&spec.name) {
            return Err(EnvironmentError::AlreadyExists(spec.name));
        }
        info!(
            "Created environment '{}' with {} declared packages",
            spec.name,
            spec.packages.len()
        );
        let name = spec.name.clone();
        let entry = self.environments.entry(name).or_insert(Environment {
            spec,
            state: ActivationState::Inactive,
        });
        Ok(entry)
    }

    /// Looks up an environment by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Environment> {
        self.environments.get(name)
    }

    /// Names of all created environments, in creation order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.environments.keys().map(String::as_str)
    }

    /// The active environment, if any.
    #[must_use]
    pub fn active(&self) -> Option<&Environment> {
        self.active.as_deref().and_then(|name| self.environments.get(name))
    }

    /// Marks `name` active. Activating the already-active environment is a
    /// no-op.
    ///
    /// # Errors
    ///
    /// - [`EnvironmentError::NotFound`] if `name` was never created
    /// - [`EnvironmentError::AlreadyActive`] if a different environment is
    ///   active; nothing changes
    pub fn activate(&mut self, name: &str) -> Result<&Environment, EnvironmentError> {
        if !self.environments.contains_key(name) {
            return Err(EnvironmentError::NotFound(name.to_string()));
        }
        if let Some(active) = self.active.as_deref().filter(|active| *active != name) {
            return Err(EnvironmentError::AlreadyActive {
                active: active.to_string(),
                requested: name.to_string(),
            });
        }
        self.active = Some(name.to_string());

        let environment = self
            .environments
            .get_mut(name)
            .ok_or_else(|| EnvironmentError::NotFound(name.to_string()))?;
        environment.state = ActivationState::Active;
        Ok(environment)
    }

    /// Deactivates the active environment, returning its name.
    pub fn deactivate(&mut self) -> Option<String> {
        let name = self.active.take()?;
        if let Some(environment) = self.environments.get_mut(&name) {
            environment.state = ActivationState::Inactive;
        }
        Some(name)
    }
}
