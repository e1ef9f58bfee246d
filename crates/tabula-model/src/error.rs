use crate::schema::SimpleType;
use crate::value::Value;

pub type ModelResult<T> = Result<T, ModelError>;

#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum ModelError {
    #[error("schema conflict on column {column}: stored as {existing}, cannot change to {requested}")]
    SchemaConflict {
        column: String,
        existing: SimpleType,
        requested: SimpleType,
    },

    #[error("unknown column: {0}")]
    UnknownColumn(String),

    #[error("ambiguous identifier {identifier}: matches columns {candidates:?}")]
    AmbiguousIdentifier {
        identifier: String,
        candidates: Vec<String>,
    },

    #[error("duplicate column: {0}")]
    DuplicateColumn(String),

    #[error("duplicate column label: {0}")]
    DuplicateLabel(String),

    #[error("row width mismatch: expected {expected} values, got {actual}")]
    RowWidthMismatch { expected: usize, actual: usize },

    #[error("column length mismatch for {column}: expected {expected} values, got {actual}")]
    ColumnLengthMismatch {
        column: String,
        expected: usize,
        actual: usize,
    },

    #[error("value {value:?} in column {column} is not a valid {expected}")]
    TypeMismatch {
        column: String,
        value: Value,
        expected: SimpleType,
    },

    #[error("unsupported JSON value: {0}")]
    UnsupportedJson(String),
}
