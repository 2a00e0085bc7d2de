// Column Schema
//
// Logical column types for a table, their Delta-style JSON text form
// (stored in the `metaData.schemaString` action field), and the mapping
// onto Arrow types used by the columnar codec.

use std::sync::Arc;

use arrow::datatypes::{DataType as ArrowType, Field as ArrowField, Fields, Schema as ArrowSchema, TimeUnit};
use serde::{Deserialize, Serialize};

pub mod infer;

pub use infer::infer_schema;

/// Timezone attached to every Arrow timestamp column.
pub const TIMESTAMP_TZ: &str = "UTC";

/// Name of the Arrow child field inside a list column.
pub const LIST_ITEM_NAME: &str = "element";

/// Errors raised while parsing schema text.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SchemaError {
    #[error("unknown column type `{0}`")]
    UnknownType(String),

    #[error("expected a struct schema, got type `{0}`")]
    NotAStruct(String),

    #[error("duplicate field name `{0}`")]
    DuplicateField(String),
}

/// Type of a single column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "TypeRepr", into = "TypeRepr")]
pub enum DataType {
    String,
    Long,
    Double,
    Boolean,
    Timestamp,
    List(Box<DataType>),
    Struct(Vec<Field>),
}

/// A named, typed column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: DataType,
    #[serde(default = "default_nullable")]
    pub nullable: bool,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

fn default_nullable() -> bool {
    true
}

/// Ordered sequence of fields describing one table or one batch.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "TypeRepr", into = "TypeRepr")]
pub struct Schema {
    pub fields: Vec<Field>,
}

impl Field {
    /// A nullable field with empty metadata.
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            nullable: true,
            metadata: serde_json::Map::new(),
        }
    }

    pub fn to_arrow(&self) -> ArrowField {
        ArrowField::new(&self.name, self.data_type.to_arrow(), self.nullable)
    }
}

impl DataType {
    /// Delta type name for primitives; `array` / `struct` for composites.
    pub fn type_name(&self) -> &'static str {
        match self {
            DataType::String => "string",
            DataType::Long => "long",
            DataType::Double => "double",
            DataType::Boolean => "boolean",
            DataType::Timestamp => "timestamp",
            DataType::List(_) => "array",
            DataType::Struct(_) => "struct",
        }
    }

    /// Parses a primitive type name, including common aliases.
    pub fn from_primitive_name(name: &str) -> Option<Self> {
        let ty = match name.to_ascii_lowercase().as_str() {
            "string" | "str" | "utf8" => DataType::String,
            "long" | "integer" | "int" | "bigint" | "int64" => DataType::Long,
            "double" | "float" | "float64" | "number" => DataType::Double,
            "boolean" | "bool" => DataType::Boolean,
            "timestamp" | "datetime" => DataType::Timestamp,
            _ => return None,
        };
        Some(ty)
    }

    pub fn to_arrow(&self) -> ArrowType {
        match self {
            DataType::String => ArrowType::Utf8,
            DataType::Long => ArrowType::Int64,
            DataType::Double => ArrowType::Float64,
            DataType::Boolean => ArrowType::Boolean,
            DataType::Timestamp => {
                ArrowType::Timestamp(TimeUnit::Millisecond, Some(TIMESTAMP_TZ.into()))
            }
            DataType::List(element) => ArrowType::List(Arc::new(ArrowField::new(
                LIST_ITEM_NAME,
                element.to_arrow(),
                true,
            ))),
            DataType::Struct(fields) => ArrowType::Struct(struct_fields_to_arrow(fields)),
        }
    }

    /// Human-readable form, e.g. `list<struct<city: string>>`.
    pub fn describe(&self) -> String {
        match self {
            DataType::List(element) => format!("list<{}>", element.describe()),
            DataType::Struct(fields) => {
                let inner: Vec<String> = fields
                    .iter()
                    .map(|f| format!("{}: {}", f.name, f.data_type.describe()))
                    .collect();
                format!("struct<{}>", inner.join(", "))
            }
            other => other.type_name().to_owned(),
        }
    }
}

pub(crate) fn struct_fields_to_arrow(fields: &[Field]) -> Fields {
    fields.iter().map(Field::to_arrow).collect()
}

impl Schema {
    pub fn new(fields: Vec<Field>) -> Self {
        Self { fields }
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn field_names(&self) -> Vec<&str> {
        self.fields.iter().map(|f| f.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn to_arrow(&self) -> ArrowSchema {
        ArrowSchema::new(struct_fields_to_arrow(&self.fields))
    }

    /// Delta `schemaString` text.
    pub fn to_schema_string(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_schema_string(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

// Wire form shared by `DataType` and `Schema`. Primitives are bare strings,
// composites are objects discriminated by `type`.
#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum TypeRepr {
    Primitive(String),
    Array {
        #[serde(rename = "type")]
        kind: String,
        #[serde(rename = "elementType")]
        element_type: Box<DataType>,
        #[serde(rename = "containsNull", default = "default_nullable")]
        contains_null: bool,
    },
    Struct {
        #[serde(rename = "type")]
        kind: String,
        fields: Vec<Field>,
    },
}

impl TryFrom<TypeRepr> for DataType {
    type Error = SchemaError;

    fn try_from(repr: TypeRepr) -> Result<Self, Self::Error> {
        match repr {
            TypeRepr::Primitive(name) => {
                DataType::from_primitive_name(&name).ok_or(SchemaError::UnknownType(name))
            }
            TypeRepr::Array { kind, element_type, .. } if kind == "array" || kind == "list" => {
                Ok(DataType::List(element_type))
            }
            TypeRepr::Struct { kind, fields } if kind == "struct" => {
                check_unique(&fields)?;
                Ok(DataType::Struct(fields))
            }
            TypeRepr::Array { kind, .. } | TypeRepr::Struct { kind, .. } => {
                Err(SchemaError::UnknownType(kind))
            }
        }
    }
}

impl From<DataType> for TypeRepr {
    fn from(ty: DataType) -> Self {
        match ty {
            DataType::List(element) => TypeRepr::Array {
                kind: "array".into(),
                element_type: element,
                contains_null: true,
            },
            DataType::Struct(fields) => TypeRepr::Struct {
                kind: "struct".into(),
                fields,
            },
            primitive => TypeRepr::Primitive(primitive.type_name().into()),
        }
    }
}

impl TryFrom<TypeRepr> for Schema {
    type Error = SchemaError;

    fn try_from(repr: TypeRepr) -> Result<Self, Self::Error> {
        match DataType::try_from(repr)? {
            DataType::Struct(fields) => Ok(Schema { fields }),
            other => Err(SchemaError::NotAStruct(other.describe())),
        }
    }
}

impl From<Schema> for TypeRepr {
    fn from(schema: Schema) -> Self {
        TypeRepr::from(DataType::Struct(schema.fields))
    }
}

fn check_unique(fields: &[Field]) -> Result<(), SchemaError> {
    for (i, field) in fields.iter().enumerate() {
        if fields[..i].iter().any(|f| f.name == field.name) {
            return Err(SchemaError::DuplicateField(field.name.clone()));
        }
    }
    Ok(())
}
