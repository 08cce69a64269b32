//! Table ↔ mapping-of-columns conversion.
//!
//! When the guest cannot hold a rich table, a table travels as a mapping from
//! column name to a sequence of that column's values. These helpers perform
//! that degradation and its inverse without dropping rows or columns.

use polars::prelude::*;

use crate::error::ConversionError;
use crate::value::{Mapping, Value};

/// Converts a table into a mapping of column name → sequence of values.
///
/// Column order and row order are preserved.
///
/// # Errors
///
/// Returns [`ConversionError::Unsupported`] if a column holds values that are
/// not scalars (nested lists, structs, temporal types).
pub fn table_to_mapping(df: &DataFrame) -> Result<Mapping, ConversionError> {
    let mut columns = Mapping::with_capacity(df.width());
    for column in df.get_columns() {
        columns.insert(
            column.name().to_string(),
            Value::Sequence(column_to_values(column)?),
        );
    }
    Ok(columns)
}

/// Reads every cell of `column`, top to bottom.
pub(crate) fn column_to_values(column: &Column) -> Result<Vec<Value>, ConversionError> {
    let series = column.as_materialized_series();
    let mut values = Vec::with_capacity(series.len());
    for row in 0..series.len() {
        values.push(any_value_to_value(series.get(row)?)?);
    }
    Ok(values)
}

/// Rebuilds a table from a mapping of column name → sequence of values.
///
/// Every entry must be a sequence of scalars and every sequence must have the
/// same length. Integer and float values may be mixed within a column, in
/// which case the column becomes `Float64`.
///
/// # Errors
///
/// - [`ConversionError::RaggedTable`] if sequence lengths differ
/// - [`ConversionError::Unsupported`] if an entry is not a sequence, or a
///   column mixes incompatible scalar kinds
pub fn mapping_to_table(columns: &Mapping) -> Result<DataFrame, ConversionError> {
    let mut expected: Option<usize> = None;
    let mut built = Vec::with_capacity(columns.len());

    for (name, value) in columns {
        let Value::Sequence(values) = value else {
            return Err(ConversionError::Unsupported(format!(
                "column '{name}' is a {}, not a sequence",
                value.kind()
            )));
        };

        match expected {
            None => expected = Some(values.len()),
            Some(rows) if rows != values.len() => {
                return Err(ConversionError::RaggedTable {
                    column: name.clone(),
                    expected: rows,
                    found: values.len(),
                });
            }
            Some(_) => {}
        }

        built.push(build_column(name, values)?);
    }

    DataFrame::new(built).map_err(|e| ConversionError::Unsupported(format!("table: {e}")))
}

/// Returns `true` if `columns` is a non-empty mapping whose entries are all
/// sequences of equal length.
#[must_use]
pub fn is_rectangular(columns: &Mapping) -> bool {
    let mut lengths = columns.values().map(|v| match v {
        Value::Sequence(items) => Some(items.len()),
        _ => None,
    });
    match lengths.next() {
        Some(Some(first)) => lengths.all(|len| len == Some(first)),
        _ => false,
    }
}

/// The scalar kind a column settles on while its values are scanned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColumnKind {
    Empty,
    Boolean,
    Integer,
    Float,
    String,
}

fn build_column(name: &str, values: &[Value]) -> Result<Column, ConversionError> {
    let mixed = || ConversionError::Unsupported(format!("mixed column '{name}'"));

    let mut kind = ColumnKind::Empty;
    for value in values {
        let next = match value {
            Value::Null => continue,
            Value::Boolean(_) => ColumnKind::Boolean,
            Value::Integer(_) => ColumnKind::Integer,
            Value::Float(_) => ColumnKind::Float,
            Value::String(_) => ColumnKind::String,
            other => return Err(ConversionError::Unsupported(other.type_tag().to_string())),
        };
        kind = match (kind, next) {
            (ColumnKind::Empty, k) => k,
            (a, b) if a == b => a,
            (ColumnKind::Integer, ColumnKind::Float) | (ColumnKind::Float, ColumnKind::Integer) => {
                ColumnKind::Float
            }
            _ => return Err(mixed()),
        };
    }

    let name = PlSmallStr::from(name);
    let series = match kind {
        ColumnKind::Empty => Series::full_null(name, values.len(), &DataType::Null),
        ColumnKind::Boolean => {
            let data: Vec<Option<bool>> = values
                .iter()
                .map(|v| match v {
                    Value::Boolean(b) => Some(*b),
                    _ => None,
                })
                .collect();
            Series::new(name, data)
        }
        ColumnKind::Integer => {
            let data: Vec<Option<i64>> = values
                .iter()
                .map(|v| match v {
                    Value::Integer(i) => Some(*i),
                    _ => None,
                })
                .collect();
            Series::new(name, data)
        }
        ColumnKind::Float => {
            let data: Vec<Option<f64>> = values
                .iter()
                .map(|v| match v {
                    Value::Integer(i) => Some(*i as f64),
                    Value::Float(f) => Some(*f),
                    _ => None,
                })
                .collect();
            Series::new(name, data)
        }
        ColumnKind::String => {
            let data: Vec<Option<String>> = values
                .iter()
                .map(|v| match v {
                    Value::String(s) => Some(s.clone()),
                    _ => None,
                })
                .collect();
            Series::new(name, data)
        }
    };

    Ok(Column::from(series))
}

fn any_value_to_value(value: AnyValue<'_>) -> Result<Value, ConversionError> {
    Ok(match value {
        AnyValue::Null => Value::Null,
        AnyValue::Boolean(b) => Value::Boolean(b),
        AnyValue::Int8(i) => Value::Integer(i.into()),
        AnyValue::Int16(i) => Value::Integer(i.into()),
        AnyValue::Int32(i) => Value::Integer(i.into()),
        AnyValue::Int64(i) => Value::Integer(i),
        AnyValue::UInt8(i) => Value::Integer(i.into()),
        AnyValue::UInt16(i) => Value::Integer(i.into()),
        AnyValue::UInt32(i) => Value::Integer(i.into()),
        AnyValue::UInt64(i) => match i64::try_from(i) {
            Ok(i) => Value::Integer(i),
            Err(_) => Value::Float(i as f64),
        },
        AnyValue::Float32(f) => Value::Float(f.into()),
        AnyValue::Float64(f) => Value::Float(f),
        AnyValue::String(s) => Value::String(s.to_string()),
        AnyValue::StringOwned(s) => Value::String(s.to_string()),
        other => return Err(ConversionError::Unsupported(other.dtype().to_string())),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn id_label() -> DataFrame {
        df! {
            "id" => &[1i64, 2],
            "label" => &["a", "b"],
        }
        .unwrap()
    }

    #[test]
    fn test_table_to_mapping_preserves_order() {
        let columns = table_to_mapping(&id_label()).unwrap();
        let names: Vec<&str> = columns.keys().map(String::as_str).collect();
        assert_eq!(names, ["id", "label"]);
        assert_eq!(
            columns["label"],
            Value::Sequence(vec![Value::from("a"), Value::from("b")])
        );
    }

    #[test]
    fn test_mapping_to_table_inverts() {
        let df = id_label();
        let back = mapping_to_table(&table_to_mapping(&df).unwrap()).unwrap();
        assert_eq!(Value::Table(back), Value::Table(df));
    }

    #[test]
    fn test_ragged_mapping_is_rejected() {
        let Value::Mapping(columns) = Value::mapping([
            ("a", Value::Sequence(vec![Value::from(1), Value::from(2)])),
            ("b", Value::Sequence(vec![Value::from(1)])),
        ]) else {
            unreachable!()
        };
        assert!(!is_rectangular(&columns));
        assert_eq!(
            mapping_to_table(&columns).unwrap_err(),
            ConversionError::RaggedTable {
                column: "b".into(),
                expected: 2,
                found: 1
            }
        );
    }

    #[test]
    fn test_integer_float_mix_promotes() {
        let Value::Mapping(columns) = Value::mapping([(
            "x",
            Value::Sequence(vec![Value::from(1), Value::from(2.5), Value::Null]),
        )]) else {
            unreachable!()
        };
        let df = mapping_to_table(&columns).unwrap();
        assert_eq!(df.column("x").unwrap().dtype(), &DataType::Float64);
        assert_eq!(df.column("x").unwrap().null_count(), 1);
    }

    #[test]
    fn test_mixed_column_is_unsupported() {
        let Value::Mapping(columns) = Value::mapping([(
            "x",
            Value::Sequence(vec![Value::from(1), Value::from("one")]),
        )]) else {
            unreachable!()
        };
        assert!(matches!(
            mapping_to_table(&columns),
            Err(ConversionError::Unsupported(_))
        ));
    }
}
