// Schema Inference
//
// Derives a column schema from a single sample record. Pure function of
// its input: no I/O, no state.

use crate::value::{parse_timestamp_millis, whole_float_to_i64, Record, Value};

use super::{DataType, Field, Schema};

/// Infers a schema from one sample record, conventionally the first
/// record of a batch. Every field is nullable.
pub fn infer_schema(sample: &Record) -> Schema {
    Schema::new(infer_fields(sample))
}

fn infer_fields(record: &Record) -> Vec<Field> {
    record
        .iter()
        .map(|(name, value)| Field::new(name, infer_type(value)))
        .collect()
}

/// Classifies a single value.
///
/// Nulls and empty objects carry no shape information and fall back to
/// `string`. Lists take the type of their first element.
pub fn infer_type(value: &Value) -> DataType {
    match value {
        Value::Null => DataType::String,
        Value::Bool(_) => DataType::Boolean,
        Value::Int(_) => DataType::Long,
        Value::Float(f) if whole_float_to_i64(*f).is_some() => DataType::Long,
        Value::Float(_) => DataType::Double,
        Value::Timestamp(_) => DataType::Timestamp,
        Value::String(s) if parse_timestamp_millis(s).is_some() => DataType::Timestamp,
        Value::String(_) => DataType::String,
        Value::List(items) => {
            let element = items.first().map(infer_type).unwrap_or(DataType::String);
            DataType::List(Box::new(element))
        }
        Value::Struct(record) if record.is_empty() => DataType::String,
        Value::Struct(record) => DataType::Struct(infer_fields(record)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(json: serde_json::Value) -> Record {
        Record::from_json(&json).unwrap()
    }

    #[test]
    fn primitives_are_classified() {
        let schema = infer_schema(&record(json!({
            "id": 1,
            "score": 2.5,
            "whole": 4.0,
            "name": "Alice",
            "active": true,
            "joined": "2024-01-15T08:00:00Z",
            "missing": null
        })));

        let types: Vec<_> = schema
            .fields
            .iter()
            .map(|f| (f.name.as_str(), f.data_type.clone()))
            .collect();

        assert_eq!(
            types,
            vec![
                ("id", DataType::Long),
                ("score", DataType::Double),
                ("whole", DataType::Long),
                ("name", DataType::String),
                ("active", DataType::Boolean),
                ("joined", DataType::Timestamp),
                ("missing", DataType::String),
            ]
        );
        assert!(schema.fields.iter().all(|f| f.nullable));
    }

    #[test]
    fn lists_use_first_element() {
        assert_eq!(
            infer_type(&Value::from(json!([1, "two"]))),
            DataType::List(Box::new(DataType::Long))
        );
        assert_eq!(
            infer_type(&Value::from(json!([]))),
            DataType::List(Box::new(DataType::String))
        );
        assert_eq!(
            infer_type(&Value::from(json!([["a"]]))),
            DataType::List(Box::new(DataType::List(Box::new(DataType::String))))
        );
    }

    #[test]
    fn nested_objects_become_structs() {
        let ty = infer_type(&Value::from(json!({
            "city": "A",
            "geo": {"lat": 1.5, "lon": 2.5}
        })));

        assert_eq!(
            ty,
            DataType::Struct(vec![
                Field::new("city", DataType::String),
                Field::new(
                    "geo",
                    DataType::Struct(vec![
                        Field::new("lat", DataType::Double),
                        Field::new("lon", DataType::Double),
                    ])
                ),
            ])
        );
    }

    #[test]
    fn floats_beyond_long_range_stay_double() {
        assert_eq!(infer_type(&Value::Float(1e20)), DataType::Double);
        assert_eq!(infer_type(&Value::Float(-1e19)), DataType::Double);
        assert_eq!(infer_type(&Value::Float(f64::INFINITY)), DataType::Double);
        assert_eq!(infer_type(&Value::Float(4096.0)), DataType::Long);
    }

    #[test]
    fn empty_object_falls_back_to_string() {
        assert_eq!(infer_type(&Value::from(json!({}))), DataType::String);
    }

    #[test]
    fn date_only_strings_stay_strings() {
        assert_eq!(infer_type(&Value::from("2024-01-15")), DataType::String);
    }
}
