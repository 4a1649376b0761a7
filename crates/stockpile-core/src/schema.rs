//! Per-batch Arrow schema inference for schema-less records
//!
//! Columns appear in first-seen order and are always nullable. How type
//! disagreements between records are resolved is governed by [`ConflictPolicy`].

use std::sync::Arc;

use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use serde::Deserialize;
use serde_json::Value;

use crate::record::Record;

/// What to do when two records disagree on a column's type
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictPolicy {
    /// Any disagreement fails the batch
    Reject,
    /// Integer + float widen to float; anything else fails the batch
    #[default]
    Widen,
    /// Integer + float widen to float; anything else falls back to text
    Coerce,
}

impl std::fmt::Display for ConflictPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Reject => "reject",
            Self::Widen => "widen",
            Self::Coerce => "coerce",
        })
    }
}

impl std::str::FromStr for ConflictPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "reject" => Ok(Self::Reject),
            "widen" => Ok(Self::Widen),
            "coerce" => Ok(Self::Coerce),
            other => Err(format!(
                "unknown conflict policy '{other}' (expected reject, widen or coerce)"
            )),
        }
    }
}

/// Storage type of an inferred column
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Boolean,
    Int64,
    Float64,
    Utf8,
}

impl ColumnKind {
    pub fn data_type(self) -> DataType {
        match self {
            Self::Boolean => DataType::Boolean,
            Self::Int64 => DataType::Int64,
            Self::Float64 => DataType::Float64,
            Self::Utf8 => DataType::Utf8,
        }
    }
}

/// A column with its resolved storage kind
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InferredColumn {
    pub name: String,
    pub kind: ColumnKind,
}

/// Result of inference over one batch
#[derive(Debug, Clone)]
pub struct InferredSchema {
    pub columns: Vec<InferredColumn>,
}

impl InferredSchema {
    pub fn arrow_schema(&self) -> SchemaRef {
        let fields: Vec<Field> = self
            .columns
            .iter()
            .map(|c| Field::new(&c.name, c.kind.data_type(), true))
            .collect();
        Arc::new(Schema::new(fields))
    }
}

/// Kind of a single value; `None` for JSON null (says nothing about the column)
fn value_kind(value: &Value, policy: ConflictPolicy) -> Result<Option<ColumnKind>, String> {
    Ok(match value {
        Value::Null => None,
        Value::Bool(_) => Some(ColumnKind::Boolean),
        // u64 beyond i64::MAX has no lossless integer column
        Value::Number(n) if n.is_i64() => Some(ColumnKind::Int64),
        Value::Number(_) => Some(ColumnKind::Float64),
        Value::String(_) => Some(ColumnKind::Utf8),
        Value::Array(_) | Value::Object(_) => match policy {
            ConflictPolicy::Coerce => Some(ColumnKind::Utf8),
            _ => return Err("nested value".to_string()),
        },
    })
}

fn merge(current: ColumnKind, seen: ColumnKind, policy: ConflictPolicy) -> Option<ColumnKind> {
    use ColumnKind::*;
    match (current, seen, policy) {
        (a, b, _) if a == b => Some(a),
        (Int64, Float64, ConflictPolicy::Widen | ConflictPolicy::Coerce)
        | (Float64, Int64, ConflictPolicy::Widen | ConflictPolicy::Coerce) => Some(Float64),
        (_, _, ConflictPolicy::Coerce) => Some(Utf8),
        _ => None,
    }
}

/// Infer a schema for `records` under `policy`.
///
/// Returns a description of the first conflict on failure.
pub fn infer_schema(records: &[Record], policy: ConflictPolicy) -> Result<InferredSchema, String> {
    // (name, kind-so-far); kind stays None while only nulls were seen
    let mut columns: Vec<(String, Option<ColumnKind>)> = Vec::new();

    for (row, record) in records.iter().enumerate() {
        for (name, value) in record {
            let kind = value_kind(value, policy)
                .map_err(|what| format!("row {row}, field '{name}': {what}"))?;

            let idx = match columns.iter().position(|(n, _)| n == name) {
                Some(idx) => idx,
                None => {
                    columns.push((name.clone(), None));
                    columns.len() - 1
                }
            };
            let slot = &mut columns[idx].1;

            *slot = match (*slot, kind) {
                (current, None) => current,
                (None, Some(k)) => Some(k),
                (Some(current), Some(k)) => Some(merge(current, k, policy).ok_or_else(|| {
                    format!("row {row}, field '{name}': {current:?} conflicts with {k:?} under '{policy}'")
                })?),
            };
        }
    }

    Ok(InferredSchema {
        columns: columns
            .into_iter()
            .map(|(name, kind)| InferredColumn {
                name,
                kind: kind.unwrap_or(ColumnKind::Utf8),
            })
            .collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rec(v: Value) -> Record {
        match v {
            Value::Object(m) => m,
            _ => panic!("not an object"),
        }
    }

    fn kinds(schema: &InferredSchema) -> Vec<(&str, ColumnKind)> {
        schema
            .columns
            .iter()
            .map(|c| (c.name.as_str(), c.kind))
            .collect()
    }

    #[test]
    fn infers_scalar_kinds_in_first_seen_order() {
        let records = vec![rec(
            json!({"symbol": "AAPL", "price": 187.25, "volume": 1200, "halted": false}),
        )];
        let schema = infer_schema(&records, ConflictPolicy::Reject).unwrap();
        assert_eq!(
            kinds(&schema),
            vec![
                ("symbol", ColumnKind::Utf8),
                ("price", ColumnKind::Float64),
                ("volume", ColumnKind::Int64),
                ("halted", ColumnKind::Boolean),
            ]
        );
    }

    #[test]
    fn late_fields_are_appended() {
        let records = vec![rec(json!({"a": 1})), rec(json!({"b": "x", "a": 2}))];
        let schema = infer_schema(&records, ConflictPolicy::Reject).unwrap();
        assert_eq!(
            kinds(&schema),
            vec![("a", ColumnKind::Int64), ("b", ColumnKind::Utf8)]
        );
    }

    #[test]
    fn all_null_column_is_utf8() {
        let records = vec![rec(json!({"note": null})), rec(json!({"note": null}))];
        let schema = infer_schema(&records, ConflictPolicy::Reject).unwrap();
        assert_eq!(kinds(&schema), vec![("note", ColumnKind::Utf8)]);
    }

    #[test]
    fn null_does_not_conflict() {
        let records = vec![rec(json!({"price": null})), rec(json!({"price": 1.5}))];
        let schema = infer_schema(&records, ConflictPolicy::Reject).unwrap();
        assert_eq!(kinds(&schema), vec![("price", ColumnKind::Float64)]);
    }

    #[test]
    fn reject_fails_on_int_float() {
        let records = vec![rec(json!({"price": 1})), rec(json!({"price": 1.5}))];
        let err = infer_schema(&records, ConflictPolicy::Reject).unwrap_err();
        assert!(err.contains("row 1, field 'price'"), "{err}");
    }

    #[test]
    fn widen_int_to_float() {
        let records = vec![rec(json!({"price": 1})), rec(json!({"price": 1.5}))];
        let schema = infer_schema(&records, ConflictPolicy::Widen).unwrap();
        assert_eq!(kinds(&schema), vec![("price", ColumnKind::Float64)]);
    }

    #[test]
    fn widen_fails_on_string_number() {
        let records = vec![rec(json!({"price": 1.5})), rec(json!({"price": "n/a"}))];
        assert!(infer_schema(&records, ConflictPolicy::Widen).is_err());
    }

    #[test]
    fn coerce_falls_back_to_utf8() {
        let records = vec![rec(json!({"price": 1.5})), rec(json!({"price": "n/a"}))];
        let schema = infer_schema(&records, ConflictPolicy::Coerce).unwrap();
        assert_eq!(kinds(&schema), vec![("price", ColumnKind::Utf8)]);
    }

    #[test]
    fn nested_rejected_unless_coerce() {
        let records = vec![rec(json!({"tags": ["a", "b"]}))];
        assert!(infer_schema(&records, ConflictPolicy::Widen).is_err());
        let schema = infer_schema(&records, ConflictPolicy::Coerce).unwrap();
        assert_eq!(kinds(&schema), vec![("tags", ColumnKind::Utf8)]);
    }

    #[test]
    fn huge_unsigned_is_float() {
        let records = vec![rec(json!({"n": u64::MAX}))];
        let schema = infer_schema(&records, ConflictPolicy::Reject).unwrap();
        assert_eq!(kinds(&schema), vec![("n", ColumnKind::Float64)]);
    }

    #[test]
    fn policy_parses_case_insensitively() {
        assert_eq!("COERCE".parse::<ConflictPolicy>(), Ok(ConflictPolicy::Coerce));
        assert!("lenient".parse::<ConflictPolicy>().is_err());
    }
}
