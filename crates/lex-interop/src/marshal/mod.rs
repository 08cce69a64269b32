//! Type marshalling between the host and guest value representations.
//!
//! The [`Marshaller`] is pure: it holds the per-runtime profiles and the
//! capabilities cached at session start, and converts [`Value`]s without
//! touching either runtime.
//!
//! # Conversion Rules
//!
//! | Shape | Rule |
//! |-------|------|
//! | Null, Boolean, Float, String | unchanged |
//! | Integer | unchanged if it fits the target width, else Float with `precision_loss` |
//! | Sequence | element-wise |
//! | Mapping | value-wise, key order kept |
//! | Table, host → guest | Table if the guest has rich tables, else Mapping of columns |
//! | Table, guest → host | Table |
//! | Opaque | only back to its owning runtime, else `Unsupported(type_tag)` |
//! | Proxy | unchanged (it is an address, not data) |
//!
//! Converting a value to the runtime it already belongs to is the identity.
//!
//! Column dtypes inside a Table are carried by polars on both sides and are
//! not narrowed to a runtime's integer width.

pub mod table;

use tracing::{debug, warn};

use crate::config::RuntimeProfile;
use crate::error::ConversionError;
use crate::types::RuntimeId;
use crate::value::Value;

pub use table::{is_rectangular, mapping_to_table, table_to_mapping};

/// Capabilities of the guest, computed once when a session starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Capabilities {
    /// The guest can hold native rich tables (e.g. pandas DataFrames).
    pub rich_tables: bool,
}

/// A converted value plus the loss it incurred.
#[derive(Debug, Clone, PartialEq)]
pub struct Converted {
    /// The value in the target representation.
    pub value: Value,
    /// `true` if at least one integer was widened to a float because it did
    /// not fit the target's native integer width.
    pub precision_loss: bool,
}

/// Converts values between the two runtimes' representations.
#[derive(Debug, Clone)]
pub struct Marshaller {
    host: RuntimeProfile,
    guest: RuntimeProfile,
    capabilities: Capabilities,
}

impl Marshaller {
    /// Creates a marshaller for the given runtime profiles and capabilities.
    #[must_use]
    pub fn new(host: RuntimeProfile, guest: RuntimeProfile, capabilities: Capabilities) -> Self {
        Self {
            host,
            guest,
            capabilities,
        }
    }

    /// The capabilities this marshaller was built with.
    #[must_use]
    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    /// The profile of `runtime`.
    #[must_use]
    pub fn profile(&self, runtime: RuntimeId) -> &RuntimeProfile {
        match runtime {
            RuntimeId::Host => &self.host,
            RuntimeId::Guest => &self.guest,
        }
    }

    /// Converts `value` from `from`'s representation into `to`'s.
    ///
    /// Precision loss is logged at `warn` level and otherwise invisible; use
    /// [`convert_reporting`](Self::convert_reporting) to observe it.
    ///
    /// # Errors
    ///
    /// Returns [`ConversionError::Unsupported`] if the value (or anything
    /// nested in it) is an opaque handle that does not belong to `to`, or a
    /// table column holds non-scalar data.
    ///
    /// # Example
    ///
    /// ```
    /// use lex_interop::{Capabilities, Marshaller, RuntimeId, RuntimeProfile, Value};
    ///
    /// let m = Marshaller::new(
    ///     RuntimeProfile::host_default(),
    ///     RuntimeProfile::guest_default(),
    ///     Capabilities::default(),
    /// );
    /// let v = m.convert(&Value::from("hi"), RuntimeId::Host, RuntimeId::Guest).unwrap();
    /// assert_eq!(v, Value::from("hi"));
    /// ```
    pub fn convert(
        &self,
        value: &Value,
        from: RuntimeId,
        to: RuntimeId,
    ) -> Result<Value, ConversionError> {
        self.convert_reporting(value, from, to).map(|c| c.value)
    }

    /// Like [`convert`](Self::convert) but also reports precision loss.
    pub fn convert_reporting(
        &self,
        value: &Value,
        from: RuntimeId,
        to: RuntimeId,
    ) -> Result<Converted, ConversionError> {
        if from == to {
            return Ok(Converted {
                value: value.clone(),
                precision_loss: false,
            });
        }

        let mut precision_loss = false;
        let value = self.convert_inner(value, from, to, &mut precision_loss)?;
        if precision_loss {
            warn!(
                "Integer exceeded {}-bit {} width and was converted to float",
                self.profile(to).integer_bits,
                to
            );
        }
        Ok(Converted {
            value,
            precision_loss,
        })
    }

    /// Converts a value that must arrive as a table.
    ///
    /// Accepts a [`Value::Table`] or a [`Value::Mapping`] of equal-length
    /// sequences. The result is a Table, except when the target is the guest
    /// and it lacks rich tables, in which case it is the Mapping-of-columns
    /// form of the same table.
    ///
    /// # Errors
    ///
    /// - [`ConversionError::RaggedTable`] for a mapping with unequal columns
    /// - [`ConversionError::Unsupported`] for any other shape
    pub fn convert_table(
        &self,
        value: &Value,
        from: RuntimeId,
        to: RuntimeId,
    ) -> Result<Value, ConversionError> {
        let df = match value {
            Value::Table(df) => df.clone(),
            Value::Mapping(columns) => table::mapping_to_table(columns)?,
            other => return Err(ConversionError::Unsupported(other.type_tag().to_string())),
        };
        debug!(
            "Table {}x{} presented from {} to {}",
            df.height(),
            df.width(),
            from,
            to
        );

        if to == RuntimeId::Guest && !self.capabilities.rich_tables {
            Ok(Value::Mapping(table::table_to_mapping(&df)?))
        } else {
            Ok(Value::Table(df))
        }
    }

    fn convert_inner(
        &self,
        value: &Value,
        from: RuntimeId,
        to: RuntimeId,
        precision_loss: &mut bool,
    ) -> Result<Value, ConversionError> {
        Ok(match value {
            Value::Null | Value::Boolean(_) | Value::Float(_) | Value::String(_) => value.clone(),
            Value::Integer(i) => {
                if self.profile(to).fits(*i) {
                    Value::Integer(*i)
                } else {
                    *precision_loss = true;
                    Value::Float(*i as f64)
                }
            }
            Value::Sequence(items) => Value::Sequence(
                items
                    .iter()
                    .map(|item| self.convert_inner(item, from, to, precision_loss))
                    .collect::<Result<_, _>>()?,
            ),
            Value::Mapping(map) => Value::Mapping(
                map.iter()
                    .map(|(k, v)| Ok((k.clone(), self.convert_inner(v, from, to, precision_loss)?)))
                    .collect::<Result<_, ConversionError>>()?,
            ),
            Value::Table(df) => {
                if to == RuntimeId::Guest && !self.capabilities.rich_tables {
                    debug!("Guest lacks rich tables; sending table as mapping of columns");
                    Value::Mapping(table::table_to_mapping(df)?)
                } else {
                    Value::Table(df.clone())
                }
            }
            Value::Opaque(opaque) => {
                if opaque.owner() == to {
                    value.clone()
                } else {
                    return Err(ConversionError::Unsupported(opaque.type_tag().to_string()));
                }
            }
            Value::Proxy(_) => value.clone(),
        })
    }
}
