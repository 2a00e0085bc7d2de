// Columnar Decoder
//
// Reads a Parquet data file back into records, zipping each row's column
// values into one `Record`. Only columns present in the file produce
// keys, so files written before a column existed decode without it.

use arrow::array::{Array, AsArray};
use arrow::datatypes::{
    DataType as ArrowType, Float32Type, Float64Type, Int16Type, Int32Type, Int64Type, Int8Type,
    TimeUnit, TimestampMicrosecondType, TimestampMillisecondType, TimestampNanosecondType,
    TimestampSecondType, UInt16Type, UInt32Type, UInt64Type, UInt8Type,
};
use arrow::error::ArrowError;
use arrow::record_batch::RecordBatch;
use bytes::Bytes;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::errors::ParquetError;

use crate::value::{Record, Value};

const MILLIS_PER_DAY: i64 = 86_400_000;

/// Errors raised while decoding a data file.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("unsupported column type {data_type} in column `{column}`")]
    UnsupportedType { column: String, data_type: String },

    #[error("value out of range in column `{0}`")]
    OutOfRange(String),

    #[error("arrow error: {0}")]
    Arrow(#[from] ArrowError),

    #[error("parquet error: {0}")]
    Parquet(#[from] ParquetError),
}

/// Decodes a complete Parquet file into records, in file order.
pub fn decode(bytes: Bytes) -> Result<Vec<Record>, DecodeError> {
    let reader = ParquetRecordBatchReaderBuilder::try_new(bytes)?.build()?;

    let mut records = Vec::new();
    for batch in reader {
        records.extend(decode_batch(&batch?)?);
    }
    Ok(records)
}

/// Decodes one Arrow batch into records.
pub fn decode_batch(batch: &RecordBatch) -> Result<Vec<Record>, DecodeError> {
    let schema = batch.schema();
    let mut records = Vec::with_capacity(batch.num_rows());

    for row in 0..batch.num_rows() {
        let mut record = Record::new();
        for (field, column) in schema.fields().iter().zip(batch.columns()) {
            let value = value_at(field.name(), column.as_ref(), row)?;
            record.insert(field.name().clone(), value);
        }
        records.push(record);
    }
    Ok(records)
}

fn value_at(path: &str, array: &dyn Array, row: usize) -> Result<Value, DecodeError> {
    if array.is_null(row) {
        return Ok(Value::Null);
    }

    let value = match array.data_type() {
        ArrowType::Boolean => Value::Bool(array.as_boolean().value(row)),
        ArrowType::Int8 => Value::Int(array.as_primitive::<Int8Type>().value(row).into()),
        ArrowType::Int16 => Value::Int(array.as_primitive::<Int16Type>().value(row).into()),
        ArrowType::Int32 => Value::Int(array.as_primitive::<Int32Type>().value(row).into()),
        ArrowType::Int64 => Value::Int(array.as_primitive::<Int64Type>().value(row)),
        ArrowType::UInt8 => Value::Int(array.as_primitive::<UInt8Type>().value(row).into()),
        ArrowType::UInt16 => Value::Int(array.as_primitive::<UInt16Type>().value(row).into()),
        ArrowType::UInt32 => Value::Int(array.as_primitive::<UInt32Type>().value(row).into()),
        ArrowType::UInt64 => {
            let v = array.as_primitive::<UInt64Type>().value(row);
            Value::Int(i64::try_from(v).map_err(|_| DecodeError::OutOfRange(path.to_owned()))?)
        }
        ArrowType::Float32 => Value::Float(array.as_primitive::<Float32Type>().value(row).into()),
        ArrowType::Float64 => Value::Float(array.as_primitive::<Float64Type>().value(row)),
        ArrowType::Utf8 => Value::String(array.as_string::<i32>().value(row).to_owned()),
        ArrowType::LargeUtf8 => Value::String(array.as_string::<i64>().value(row).to_owned()),
        ArrowType::Timestamp(unit, _) => Value::Timestamp(timestamp_millis(array, *unit, row)),
        ArrowType::Date32 => {
            let days = i64::from(array.as_primitive::<arrow::datatypes::Date32Type>().value(row));
            Value::Timestamp(days * MILLIS_PER_DAY)
        }
        ArrowType::Date64 => {
            Value::Timestamp(array.as_primitive::<arrow::datatypes::Date64Type>().value(row))
        }
        ArrowType::List(_) => {
            let items = array.as_list::<i32>().value(row);
            list_values(path, items.as_ref())?
        }
        ArrowType::LargeList(_) => {
            let items = array.as_list::<i64>().value(row);
            list_values(path, items.as_ref())?
        }
        ArrowType::Struct(_) => {
            let struct_array = array.as_struct();
            let mut record = Record::new();
            for (field, column) in struct_array.fields().iter().zip(struct_array.columns()) {
                let child_path = format!("{path}.{}", field.name());
                record.insert(field.name().clone(), value_at(&child_path, column.as_ref(), row)?);
            }
            Value::Struct(record)
        }
        other => {
            return Err(DecodeError::UnsupportedType {
                column: path.to_owned(),
                data_type: other.to_string(),
            })
        }
    };
    Ok(value)
}

fn list_values(path: &str, items: &dyn Array) -> Result<Value, DecodeError> {
    let child_path = format!("{path}[]");
    (0..items.len())
        .map(|i| value_at(&child_path, items, i))
        .collect::<Result<Vec<_>, _>>()
        .map(Value::List)
}

fn timestamp_millis(array: &dyn Array, unit: TimeUnit, row: usize) -> i64 {
    match unit {
        TimeUnit::Second => array
            .as_primitive::<TimestampSecondType>()
            .value(row)
            .saturating_mul(1000),
        TimeUnit::Millisecond => array.as_primitive::<TimestampMillisecondType>().value(row),
        TimeUnit::Microsecond => array
            .as_primitive::<TimestampMicrosecondType>()
            .value(row)
            .div_euclid(1000),
        TimeUnit::Nanosecond => array
            .as_primitive::<TimestampNanosecondType>()
            .value(row)
            .div_euclid(1_000_000),
    }
}
