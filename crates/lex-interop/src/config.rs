//! Configuration types for a bridge session.
//!
//! This module provides [`BridgeConfig`] and its builder, as well as the
//! per-runtime [`RuntimeProfile`].
//!
//! # Example
//!
//! ```
//! use lex_interop::{BridgeConfig, RuntimeProfile};
//!
//! let config = BridgeConfig::builder()
//!     .host_root_name("py")
//!     .guest_root_name("r")
//!     .host_profile(RuntimeProfile::with_integer_bits(32))
//!     .build()
//!     .expect("valid config");
//! assert_eq!(config.host_root_name, "py");
//! ```

use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;

use crate::error::SessionError;
use crate::types::{RuntimeId, is_identifier};

/// Environment variable holding extra guest module directories, separated by
/// the platform path separator.
pub const PYTHONPATH_ENV: &str = "LEX_INTEROP_PYTHONPATH";

/// Static facts about one runtime's type system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeProfile {
    /// Width of the runtime's native integer type in bits (8 to 64).
    ///
    /// Integers outside this width arrive as floats.
    pub integer_bits: u32,
}

impl RuntimeProfile {
    /// Profile with the given integer width.
    #[must_use]
    pub fn with_integer_bits(integer_bits: u32) -> Self {
        Self { integer_bits }
    }

    /// Default host profile: 64-bit integers, the width of
    /// [`Value::Integer`](crate::Value::Integer).
    ///
    /// Narrower widths are opt-in through [`with_integer_bits`](Self::with_integer_bits).
    #[must_use]
    pub fn host_default() -> Self {
        Self::with_integer_bits(64)
    }

    /// Default guest profile: 64-bit integers.
    #[must_use]
    pub fn guest_default() -> Self {
        Self::with_integer_bits(64)
    }

    /// Returns `true` if `value` is representable as a native integer.
    ///
    /// ```
    /// use lex_interop::RuntimeProfile;
    ///
    /// let host = RuntimeProfile::with_integer_bits(32);
    /// assert!(host.fits(i32::MIN as i64));
    /// assert!(!host.fits(i32::MAX as i64 + 1));
    /// ```
    #[must_use]
    pub fn fits(&self, value: i64) -> bool {
        if self.integer_bits >= 64 {
            return true;
        }
        let bound = 1i64 << (self.integer_bits - 1);
        (-bound..bound).contains(&value)
    }
}

/// Configuration for a bridge session.
///
/// Use [`BridgeConfig::builder()`] to construct one.
///
/// # Validation
///
/// [`build()`](BridgeConfigBuilder::build) checks that:
/// - both root names are non-empty identifiers and differ from each other
/// - integer widths are between 8 and 64 bits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Name of the binding, in the host namespace, through which the guest
    /// is reached (default: `guest`).
    pub host_root_name: String,

    /// Name of the binding, in the guest namespace, through which the host
    /// is reached (default: `host`).
    pub guest_root_name: String,

    /// Host type-system profile (default: 64-bit integers).
    pub host: RuntimeProfile,

    /// Guest type-system profile (default: 64-bit integers).
    pub guest: RuntimeProfile,

    /// Packages an environment must declare, and the guest must provide, for
    /// tables to travel as native rich tables (default: `pandas`, `pyarrow`).
    pub tabular_packages: Vec<String>,

    /// Whether to bring up the guest runtime at all (default: true).
    pub enable_guest: bool,

    /// Extra directories to put on the guest module path.
    ///
    /// Defaults to the entries of `LEX_INTEROP_PYTHONPATH`.
    pub python_path: Vec<PathBuf>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            host_root_name: "guest".to_string(),
            guest_root_name: "host".to_string(),
            host: RuntimeProfile::host_default(),
            guest: RuntimeProfile::guest_default(),
            tabular_packages: vec!["pandas".to_string(), "pyarrow".to_string()],
            enable_guest: true,
            python_path: python_path_from_env(),
        }
    }
}

impl BridgeConfig {
    /// Create a new builder for `BridgeConfig`.
    #[must_use]
    pub fn builder() -> BridgeConfigBuilder {
        BridgeConfigBuilder::default()
    }

    /// Root binding name installed in `runtime`'s namespace.
    #[must_use]
    pub fn root_name(&self, runtime: RuntimeId) -> &str {
        match runtime {
            RuntimeId::Host => &self.host_root_name,
            RuntimeId::Guest => &self.guest_root_name,
        }
    }

    pub(crate) fn validate(&self) -> Result<(), SessionError> {
        for name in [&self.host_root_name, &self.guest_root_name] {
            if !is_identifier(name) {
                return Err(SessionError::InvalidConfig(format!(
                    "root name '{name}' is not an identifier"
                )));
            }
        }
        if self.host_root_name == self.guest_root_name {
            return Err(SessionError::InvalidConfig(
                "root names must differ".to_string(),
            ));
        }
        for profile in [&self.host, &self.guest] {
            if !(8..=64).contains(&profile.integer_bits) {
                return Err(SessionError::InvalidConfig(format!(
                    "integer_bits must be between 8 and 64, got {}",
                    profile.integer_bits
                )));
            }
        }
        Ok(())
    }
}

/// Builder for [`BridgeConfig`].
#[derive(Debug, Clone, Default)]
pub struct BridgeConfigBuilder {
    config: BridgeConfig,
}

impl BridgeConfigBuilder {
    /// Set the host-side name of the root proxy to the guest.
    #[must_use]
    pub fn host_root_name(mut self, name: impl Into<String>) -> Self {
        self.config.host_root_name = name.into();
        self
    }

    /// Set the guest-side name of the root proxy to the host.
    #[must_use]
    pub fn guest_root_name(mut self, name: impl Into<String>) -> Self {
        self.config.guest_root_name = name.into();
        self
    }

    /// Set the host type-system profile.
    #[must_use]
    pub fn host_profile(mut self, profile: RuntimeProfile) -> Self {
        self.config.host = profile;
        self
    }

    /// Set the guest type-system profile.
    #[must_use]
    pub fn guest_profile(mut self, profile: RuntimeProfile) -> Self {
        self.config.guest = profile;
        self
    }

    /// Replace the packages that enable rich tables.
    #[must_use]
    pub fn tabular_packages<I, S>(mut self, packages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.tabular_packages = packages.into_iter().map(Into::into).collect();
        self
    }

    /// Enable or disable the guest runtime (default: true).
    #[must_use]
    pub fn enable_guest(mut self, enable: bool) -> Self {
        self.config.enable_guest = enable;
        self
    }

    /// Add a directory to the guest module path.
    #[must_use]
    pub fn python_path(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.python_path.push(dir.into());
        self
    }

    /// Build the configuration, validating all values.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::InvalidConfig`] if any value is invalid.
    pub fn build(self) -> Result<BridgeConfig, SessionError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

fn python_path_from_env() -> Vec<PathBuf> {
    env::var_os(PYTHONPATH_ENV)
        .map(|paths| env::split_paths(&paths).collect())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = BridgeConfig::builder().build().unwrap();
        assert_eq!(config.host_root_name, "guest");
        assert_eq!(config.guest_root_name, "host");
        assert_eq!(config.host.integer_bits, 64);
        assert_eq!(config.guest.integer_bits, 64);
        assert!(config.enable_guest);
    }

    #[test]
    fn test_root_names_must_be_identifiers() {
        let err = BridgeConfig::builder().host_root_name("my proxy").build();
        assert!(matches!(err, Err(SessionError::InvalidConfig(_))));

        let err = BridgeConfig::builder()
            .host_root_name("x")
            .guest_root_name("x")
            .build();
        assert!(matches!(err, Err(SessionError::InvalidConfig(_))));
    }

    #[test]
    fn test_integer_bits_range() {
        let err = BridgeConfig::builder()
            .guest_profile(RuntimeProfile::with_integer_bits(128))
            .build();
        assert!(err.is_err());
    }

    #[test]
    fn test_fits_boundaries() {
        let p = RuntimeProfile::with_integer_bits(8);
        assert!(p.fits(127));
        assert!(p.fits(-128));
        assert!(!p.fits(128));
        assert!(RuntimeProfile::guest_default().fits(i64::MIN));
        assert!(RuntimeProfile::host_default().fits(3_000_000_000));
    }
}
