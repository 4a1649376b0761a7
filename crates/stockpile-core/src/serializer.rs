//! Tabular serializer: records → self-describing Parquet bytes

use std::sync::Arc;

use arrow::array::{
    Array, ArrayRef, BooleanArray, Float64Array, Int64Array, RecordBatch, StringArray,
};
use arrow::datatypes::{DataType, SchemaRef};
use arrow::error::ArrowError;
use arrow::record_batch::RecordBatchOptions;
use bytes::Bytes;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use parquet::basic::{Compression, ZstdLevel};
use parquet::errors::ParquetError;
use parquet::file::properties::WriterProperties;
use serde_json::Value;

use crate::record::Record;
use crate::schema::{infer_schema, ColumnKind, ConflictPolicy, InferredColumn};

/// Default zstd level for Parquet output
pub const DEFAULT_ZSTD_LEVEL: i32 = 3;

/// All-null column written for a batch whose records carry no fields.
///
/// A Parquet row group takes its row count from its columns, so rows
/// without any column would read back as nothing. [`decode_parquet`]
/// drops this column again.
pub const EMPTY_RECORD_COLUMN: &str = "__empty";

#[derive(Debug)]
pub struct SerializeError(String);

impl std::fmt::Display for SerializeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for SerializeError {}

impl From<String> for SerializeError {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<ArrowError> for SerializeError {
    fn from(e: ArrowError) -> Self {
        Self(format!("arrow: {e}"))
    }
}

impl From<ParquetError> for SerializeError {
    fn from(e: ParquetError) -> Self {
        Self(format!("parquet: {e}"))
    }
}

/// Turns a batch of records into an encoded file
pub trait TabularSerializer {
    fn serialize(&self, records: &[Record]) -> Result<Bytes, SerializeError>;
}

/// Parquet encoder with per-batch schema inference
#[derive(Debug, Clone)]
pub struct ParquetSerializer {
    policy: ConflictPolicy,
    zstd_level: i32,
}

impl Default for ParquetSerializer {
    fn default() -> Self {
        Self {
            policy: ConflictPolicy::default(),
            zstd_level: DEFAULT_ZSTD_LEVEL,
        }
    }
}

impl ParquetSerializer {
    /// Fails if `zstd_level` is outside the range zstd accepts.
    pub fn new(policy: ConflictPolicy, zstd_level: i32) -> Result<Self, SerializeError> {
        ZstdLevel::try_new(zstd_level)?;
        Ok(Self { policy, zstd_level })
    }

    fn writer_properties(&self) -> Result<WriterProperties, SerializeError> {
        let level = ZstdLevel::try_new(self.zstd_level)?;
        Ok(WriterProperties::builder()
            .set_compression(Compression::ZSTD(level))
            .build())
    }
}

impl TabularSerializer for ParquetSerializer {
    fn serialize(&self, records: &[Record]) -> Result<Bytes, SerializeError> {
        let mut inferred = infer_schema(records, self.policy)?;
        if inferred.columns.is_empty() {
            inferred.columns.push(InferredColumn {
                name: EMPTY_RECORD_COLUMN.to_string(),
                kind: ColumnKind::Utf8,
            });
        }
        let schema = inferred.arrow_schema();
        let batch = build_record_batch(records, &inferred.columns, schema.clone())?;

        let mut writer = ArrowWriter::try_new(Vec::new(), schema, Some(self.writer_properties()?))?;
        writer.write(&batch)?;
        let buf = writer.into_inner()?;
        Ok(Bytes::from(buf))
    }
}

/// Render a value for a text column; strings verbatim, everything else as JSON
fn text_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn build_column(records: &[Record], column: &InferredColumn) -> ArrayRef {
    let values = records
        .iter()
        .map(|r| r.get(&column.name).filter(|v| !v.is_null()));

    match column.kind {
        ColumnKind::Boolean => Arc::new(
            values
                .map(|v| v.and_then(Value::as_bool))
                .collect::<BooleanArray>(),
        ),
        ColumnKind::Int64 => Arc::new(
            values
                .map(|v| v.and_then(Value::as_i64))
                .collect::<Int64Array>(),
        ),
        ColumnKind::Float64 => Arc::new(
            values
                .map(|v| v.and_then(Value::as_f64))
                .collect::<Float64Array>(),
        ),
        ColumnKind::Utf8 => Arc::new(values.map(|v| v.map(text_value)).collect::<StringArray>()),
    }
}

/// Build a single `RecordBatch` holding every record, in arrival order
pub fn build_record_batch(
    records: &[Record],
    columns: &[InferredColumn],
    schema: SchemaRef,
) -> Result<RecordBatch, ArrowError> {
    let arrays: Vec<ArrayRef> = columns.iter().map(|c| build_column(records, c)).collect();
    let options = RecordBatchOptions::new().with_row_count(Some(records.len()));
    RecordBatch::try_new_with_options(schema, arrays, &options)
}

fn cell_value(array: &dyn Array, row: usize) -> Result<Value, ArrowError> {
    if array.is_null(row) {
        return Ok(Value::Null);
    }
    let any = array.as_any();
    Ok(match array.data_type() {
        DataType::Boolean => any
            .downcast_ref::<BooleanArray>()
            .map(|a| Value::from(a.value(row)))
            .unwrap_or(Value::Null),
        DataType::Int64 => any
            .downcast_ref::<Int64Array>()
            .map(|a| Value::from(a.value(row)))
            .unwrap_or(Value::Null),
        DataType::Float64 => any
            .downcast_ref::<Float64Array>()
            .map(|a| Value::from(a.value(row)))
            .unwrap_or(Value::Null),
        DataType::Utf8 => any
            .downcast_ref::<StringArray>()
            .map(|a| Value::from(a.value(row)))
            .unwrap_or(Value::Null),
        _ => Value::from(arrow::util::display::array_value_to_string(array, row)?),
    })
}

/// Read Parquet bytes back into records.
///
/// Nulls come back as explicit `null` fields. Column types outside the
/// ones this crate writes are rendered as display strings. A file holding
/// only [`EMPTY_RECORD_COLUMN`] reads back as field-less records.
pub fn decode_parquet(bytes: Bytes) -> Result<(SchemaRef, Vec<Record>), SerializeError> {
    let builder = ParquetRecordBatchReaderBuilder::try_new(bytes)?;
    let schema = builder.schema().clone();
    let reader = builder.build()?;
    let field_less = schema.fields().len() == 1 && schema.field(0).name() == EMPTY_RECORD_COLUMN;

    let mut records = Vec::new();
    for batch in reader {
        let batch = batch?;
        if field_less {
            records.extend((0..batch.num_rows()).map(|_| Record::new()));
            continue;
        }
        let schema = batch.schema();
        for row in 0..batch.num_rows() {
            let mut record = Record::new();
            for (field, column) in schema.fields().iter().zip(batch.columns()) {
                record.insert(field.name().clone(), cell_value(column.as_ref(), row)?);
            }
            records.push(record);
        }
    }
    Ok((schema, records))
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

    #[test]
    fn serializes_to_parquet_magic() {
        let ser = ParquetSerializer::default();
        let bytes = ser
            .serialize(&[rec(json!({"symbol": "AAPL", "price": 187.25}))])
            .unwrap();
        assert_eq!(&bytes[..4], b"PAR1");
        assert_eq!(&bytes[bytes.len() - 4..], b"PAR1");
    }

    #[test]
    fn missing_fields_read_back_as_null() {
        let ser = ParquetSerializer::default();
        let records = vec![
            rec(json!({"symbol": "AAPL", "price": 187.25})),
            rec(json!({"symbol": "MSFT"})),
        ];
        let (_, back) = decode_parquet(ser.serialize(&records).unwrap()).unwrap();
        assert_eq!(back[1].get("price"), Some(&Value::Null));
        assert_eq!(back[1].get("symbol"), Some(&json!("MSFT")));
    }

    #[test]
    fn widened_ints_read_back_as_float() {
        let ser = ParquetSerializer::new(ConflictPolicy::Widen, 1).unwrap();
        let records = vec![rec(json!({"price": 10})), rec(json!({"price": 10.5}))];
        let (schema, back) = decode_parquet(ser.serialize(&records).unwrap()).unwrap();
        assert_eq!(schema.field(0).data_type(), &DataType::Float64);
        assert_eq!(back[0].get("price"), Some(&json!(10.0)));
    }

    #[test]
    fn coerced_values_render_as_text() {
        let ser = ParquetSerializer::new(ConflictPolicy::Coerce, 3).unwrap();
        let records = vec![
            rec(json!({"v": true, "tags": ["x"]})),
            rec(json!({"v": "maybe", "tags": null})),
        ];
        let (_, back) = decode_parquet(ser.serialize(&records).unwrap()).unwrap();
        assert_eq!(back[0].get("v"), Some(&json!("true")));
        assert_eq!(back[0].get("tags"), Some(&json!("[\"x\"]")));
        assert_eq!(back[1].get("tags"), Some(&Value::Null));
    }

    #[test]
    fn conflict_is_serialize_error() {
        let ser = ParquetSerializer::new(ConflictPolicy::Reject, 3).unwrap();
        let records = vec![rec(json!({"price": 1})), rec(json!({"price": "1"}))];
        let err = ser.serialize(&records).unwrap_err();
        assert!(format!("{err}").contains("price"));
    }

    #[test]
    fn field_less_records_keep_their_row_count() {
        let ser = ParquetSerializer::default();
        let records = vec![Record::new(), Record::new(), Record::new()];
        let (schema, back) = decode_parquet(ser.serialize(&records).unwrap()).unwrap();
        assert_eq!(schema.field(0).name(), EMPTY_RECORD_COLUMN);
        assert_eq!(back, records);
    }

    #[test]
    fn record_batch_carries_row_count_without_columns() {
        let records = vec![Record::new(), Record::new()];
        let batch =
            build_record_batch(&records, &[], Arc::new(arrow::datatypes::Schema::empty())).unwrap();
        assert_eq!(batch.num_rows(), 2);
        assert_eq!(batch.num_columns(), 0);
    }

    #[test]
    fn invalid_zstd_level_rejected() {
        assert!(ParquetSerializer::new(ConflictPolicy::Widen, 99).is_err());
    }
}
