// Batch Invariant Framework
//
// Invariants are pure rules that a record batch must satisfy before any
// encoding or I/O begins. Violations are detected *before* a data file
// is produced, so a rejected batch never reaches the blob store.

use crate::schema::infer::infer_type;
use crate::value::Record;

/// Why a batch was rejected.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum BatchError {
    #[error("record batch is empty")]
    Empty,

    #[error(
        "schema mismatch at record {index}: expected fields [{}], found [{}]",
        .expected.join(", "),
        .actual.join(", ")
    )]
    SchemaMismatch {
        index: usize,
        expected: Vec<String>,
        actual: Vec<String>,
    },

    #[error(
        "type mismatch at record {index}, field `{field}`: expected {expected}, found {actual}"
    )]
    FieldTypeMismatch {
        index: usize,
        field: String,
        expected: String,
        actual: String,
    },
}

/// Trait implemented by all batch invariants.
///
/// Invariants must be:
/// - Pure
/// - Deterministic
/// - Side-effect free
pub trait BatchInvariant: Send + Sync {
    fn name(&self) -> &'static str;

    fn validate(&self, batch: &[Record]) -> Result<(), BatchError>;
}

/// Rejects an empty batch.
pub struct NonEmptyBatch;

impl BatchInvariant for NonEmptyBatch {
    fn name(&self) -> &'static str {
        "non-empty-batch"
    }

    fn validate(&self, batch: &[Record]) -> Result<(), BatchError> {
        if batch.is_empty() {
            Err(BatchError::Empty)
        } else {
            Ok(())
        }
    }
}

/// Every record must carry exactly the field names of record 0.
///
/// Only names are compared; per-field types may still disagree.
pub struct UniformFieldNames;

impl BatchInvariant for UniformFieldNames {
    fn name(&self) -> &'static str {
        "uniform-field-names"
    }

    fn validate(&self, batch: &[Record]) -> Result<(), BatchError> {
        let Some(first) = batch.first() else {
            return Err(BatchError::Empty);
        };
        let expected = first.sorted_names();

        for (index, record) in batch.iter().enumerate().skip(1) {
            let actual = record.sorted_names();
            if actual != expected {
                return Err(BatchError::SchemaMismatch {
                    index,
                    expected,
                    actual,
                });
            }
        }
        Ok(())
    }
}

/// Opt-in: every non-null value must infer to the same type as the first
/// non-null value seen for that field.
pub struct UniformFieldTypes;

impl BatchInvariant for UniformFieldTypes {
    fn name(&self) -> &'static str {
        "uniform-field-types"
    }

    fn validate(&self, batch: &[Record]) -> Result<(), BatchError> {
        let mut seen: Vec<(&str, crate::schema::DataType)> = Vec::new();

        for (index, record) in batch.iter().enumerate() {
            for (field, value) in record.iter() {
                if value.is_null() {
                    continue;
                }
                let ty = infer_type(value);
                match seen.iter().find(|(name, _)| *name == field) {
                    Some((_, expected)) if *expected != ty => {
                        return Err(BatchError::FieldTypeMismatch {
                            index,
                            field: field.to_owned(),
                            expected: expected.describe(),
                            actual: ty.describe(),
                        });
                    }
                    Some(_) => {}
                    None => seen.push((field, ty)),
                }
            }
        }
        Ok(())
    }
}

/// Invariant engine that evaluates a set of invariants.
#[derive(Default)]
pub struct InvariantEngine {
    invariants: Vec<Box<dyn BatchInvariant>>,
}

impl InvariantEngine {
    /// Create an empty invariant engine.
    pub fn new() -> Self {
        Self {
            invariants: Vec::new(),
        }
    }

    /// The standard write-path checks: non-empty, uniform field names,
    /// and optionally uniform field types.
    pub fn for_writes(strict_field_types: bool) -> Self {
        let mut engine = Self::new();
        engine.register(NonEmptyBatch);
        engine.register(UniformFieldNames);
        if strict_field_types {
            engine.register(UniformFieldTypes);
        }
        engine
    }

    /// Register an invariant.
    pub fn register<I: BatchInvariant + 'static>(&mut self, invariant: I) {
        self.invariants.push(Box::new(invariant));
    }

    /// Evaluate all invariants.
    ///
    /// Stops at the first failure.
    pub fn evaluate(&self, batch: &[Record]) -> Result<(), BatchError> {
        for invariant in &self.invariants {
            if let Err(err) = invariant.validate(batch) {
                tracing::debug!(invariant = invariant.name(), %err, "batch rejected");
                return Err(err);
            }
        }
        Ok(())
    }
}
