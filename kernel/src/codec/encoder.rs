// Columnar Encoder
//
// Builds one Arrow column per schema field from a validated record batch,
// then serializes the whole batch into a single in-memory Parquet file.
// Nothing is handed to storage until the file is complete.

use std::sync::Arc;

use arrow::array::{
    ArrayRef, BooleanArray, Float64Array, Int64Array, ListArray, StringArray, StructArray,
    TimestampMillisecondArray,
};
use arrow::buffer::{NullBuffer, OffsetBuffer, ScalarBuffer};
use arrow::datatypes::Field as ArrowField;
use arrow::error::ArrowError;
use arrow::record_batch::RecordBatch;
use bytes::Bytes;
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::errors::ParquetError;
use parquet::file::properties::WriterProperties;

use crate::schema::{struct_fields_to_arrow, DataType, Schema, LIST_ITEM_NAME, TIMESTAMP_TZ};
use crate::value::{
    format_timestamp_millis, parse_timestamp_millis, whole_float_to_i64, Record, Value,
};

/// Errors raised while encoding a batch.
#[derive(Debug, thiserror::Error)]
pub enum EncodeError {
    #[error("column `{column}` row {row}: cannot store {actual} value as {expected}")]
    Coercion {
        column: String,
        row: usize,
        expected: String,
        actual: String,
    },

    #[error("column `{column}` row {row}: field `{field}` is not part of the column type")]
    UnexpectedField {
        column: String,
        row: usize,
        field: String,
    },

    #[error("schema has no columns to encode")]
    NoColumns,

    #[error("struct column `{0}` has no fields")]
    EmptyStruct(String),

    #[error("list column `{0}` exceeds the maximum number of elements")]
    ListOverflow(String),

    #[error("arrow error: {0}")]
    Arrow(#[from] ArrowError),

    #[error("parquet error: {0}")]
    Parquet(#[from] ParquetError),
}

/// Encoder settings.
#[derive(Debug, Clone)]
pub struct EncoderConfig {
    pub compression: Compression,
    pub max_row_group_size: usize,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            compression: Compression::SNAPPY,
            max_row_group_size: 1024 * 1024,
        }
    }
}

/// One finished, immutable data file.
#[derive(Debug, Clone)]
pub struct EncodedFile {
    pub bytes: Bytes,
    pub row_count: usize,
    /// Null count per top-level column, in schema order.
    pub null_counts: Vec<(String, usize)>,
}

impl EncodedFile {
    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }
}

/// Encodes record batches into Parquet bytes.
#[derive(Debug, Clone, Default)]
pub struct ColumnarEncoder {
    config: EncoderConfig,
}

impl ColumnarEncoder {
    pub fn new(config: EncoderConfig) -> Self {
        Self { config }
    }

    /// Encodes `batch` under `schema`. Records missing a schema field store
    /// null for it.
    pub fn encode(&self, batch: &[Record], schema: &Schema) -> Result<EncodedFile, EncodeError> {
        if schema.is_empty() {
            return Err(EncodeError::NoColumns);
        }

        let mut columns = Vec::with_capacity(schema.len());
        let mut null_counts = Vec::with_capacity(schema.len());
        for field in &schema.fields {
            let values: Vec<Option<&Value>> = batch.iter().map(|r| r.get(&field.name)).collect();
            let column = build_column(&field.name, &field.data_type, &values)?;
            null_counts.push((field.name.clone(), column.null_count()));
            columns.push(column);
        }

        let arrow_schema = Arc::new(schema.to_arrow());
        let record_batch = RecordBatch::try_new(arrow_schema.clone(), columns)?;

        let props = WriterProperties::builder()
            .set_compression(self.config.compression)
            .set_max_row_group_size(self.config.max_row_group_size)
            .build();

        let mut buf = Vec::new();
        let mut writer = ArrowWriter::try_new(&mut buf, arrow_schema, Some(props))?;
        writer.write(&record_batch)?;
        writer.close()?;

        tracing::debug!(
            rows = batch.len(),
            bytes = buf.len(),
            columns = schema.len(),
            "encoded columnar file"
        );

        Ok(EncodedFile {
            bytes: Bytes::from(buf),
            row_count: batch.len(),
            null_counts,
        })
    }
}

/// Builds one Arrow column. `None` entries are missing keys and encode as
/// null, same as an explicit `Value::Null`.
fn build_column(path: &str, ty: &DataType, values: &[Option<&Value>]) -> Result<ArrayRef, EncodeError> {
    let array: ArrayRef = match ty {
        DataType::Long => Arc::new(Int64Array::from(scalars(path, ty, values, as_long)?)),
        DataType::Double => Arc::new(Float64Array::from(scalars(path, ty, values, as_double)?)),
        DataType::Boolean => Arc::new(BooleanArray::from(scalars(path, ty, values, as_bool)?)),
        DataType::String => Arc::new(StringArray::from(scalars(path, ty, values, as_string)?)),
        DataType::Timestamp => Arc::new(
            TimestampMillisecondArray::from(scalars(path, ty, values, as_timestamp)?)
                .with_timezone(TIMESTAMP_TZ),
        ),
        DataType::List(element) => build_list(path, ty, element, values)?,
        DataType::Struct(fields) => {
            if fields.is_empty() {
                return Err(EncodeError::EmptyStruct(path.to_owned()));
            }

            let mut validity = Vec::with_capacity(values.len());
            let mut records: Vec<Option<&Record>> = Vec::with_capacity(values.len());
            for (row, value) in values.iter().enumerate() {
                match value {
                    None | Some(Value::Null) => {
                        validity.push(false);
                        records.push(None);
                    }
                    Some(Value::Struct(record)) => {
                        if let Some(extra) = record
                            .names()
                            .find(|name| !fields.iter().any(|f| f.name == *name))
                        {
                            return Err(EncodeError::UnexpectedField {
                                column: path.to_owned(),
                                row,
                                field: extra.to_owned(),
                            });
                        }
                        validity.push(true);
                        records.push(Some(record));
                    }
                    Some(other) => return Err(coercion(path, row, ty, other)),
                }
            }

            let mut children = Vec::with_capacity(fields.len());
            for field in fields {
                let child_values: Vec<Option<&Value>> = records
                    .iter()
                    .map(|r| r.and_then(|r| r.get(&field.name)))
                    .collect();
                let child_path = format!("{path}.{}", field.name);
                children.push(build_column(&child_path, &field.data_type, &child_values)?);
            }

            Arc::new(StructArray::try_new(
                struct_fields_to_arrow(fields),
                children,
                Some(NullBuffer::from(validity)),
            )?)
        }
    };
    Ok(array)
}

/// Lists are a run of offsets over one flattened child column.
fn build_list(
    path: &str,
    ty: &DataType,
    element: &DataType,
    values: &[Option<&Value>],
) -> Result<ArrayRef, EncodeError> {
    let mut offsets: Vec<i32> = Vec::with_capacity(values.len() + 1);
    let mut validity = Vec::with_capacity(values.len());
    let mut items: Vec<Option<&Value>> = Vec::new();
    offsets.push(0);

    for (row, value) in values.iter().enumerate() {
        match value {
            None | Some(Value::Null) => validity.push(false),
            Some(Value::List(list)) => {
                items.extend(list.iter().map(Some));
                validity.push(true);
            }
            Some(other) => return Err(coercion(path, row, ty, other)),
        }
        let end = i32::try_from(items.len()).map_err(|_| EncodeError::ListOverflow(path.to_owned()))?;
        offsets.push(end);
    }

    let child = build_column(&format!("{path}[]"), element, &items)?;
    let item_field = Arc::new(ArrowField::new(LIST_ITEM_NAME, element.to_arrow(), true));

    Ok(Arc::new(ListArray::try_new(
        item_field,
        OffsetBuffer::new(ScalarBuffer::from(offsets)),
        child,
        Some(NullBuffer::from(validity)),
    )?))
}

fn scalars<T>(
    path: &str,
    ty: &DataType,
    values: &[Option<&Value>],
    coerce: impl Fn(&Value) -> Option<T>,
) -> Result<Vec<Option<T>>, EncodeError> {
    values
        .iter()
        .enumerate()
        .map(|(row, value)| match value {
            None | Some(Value::Null) => Ok(None),
            Some(v) => coerce(v).map(Some).ok_or_else(|| coercion(path, row, ty, v)),
        })
        .collect()
}

fn coercion(path: &str, row: usize, ty: &DataType, value: &Value) -> EncodeError {
    EncodeError::Coercion {
        column: path.to_owned(),
        row,
        expected: ty.describe(),
        actual: value.kind().to_owned(),
    }
}

fn as_long(value: &Value) -> Option<i64> {
    match value {
        Value::Int(i) => Some(*i),
        Value::Float(f) => whole_float_to_i64(*f),
        _ => None,
    }
}

fn as_double(value: &Value) -> Option<f64> {
    match value {
        Value::Float(f) => Some(*f),
        Value::Int(i) => Some(*i as f64),
        _ => None,
    }
}

fn as_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        _ => None,
    }
}

// String columns take any value; composites are stored as JSON text.
fn as_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Int(i) => Some(i.to_string()),
        Value::Float(f) => Some(f.to_string()),
        Value::Timestamp(ms) => format_timestamp_millis(*ms),
        Value::List(_) | Value::Struct(_) => Some(value.to_json().to_string()),
        Value::Null => None,
    }
}

fn as_timestamp(value: &Value) -> Option<i64> {
    match value {
        Value::Timestamp(ms) | Value::Int(ms) => Some(*ms),
        Value::String(s) => parse_timestamp_millis(s),
        _ => None,
    }
}
