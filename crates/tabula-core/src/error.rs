use tabula_formula::{CycleError, FormulaError};
use tabula_model::{ModelError, SimpleType};
use tabula_storage::StorageError;
use thiserror::Error;

pub type CalcResult<T> = Result<T, CalcError>;

/// Flat classification of [`CalcError`] for callers that map failures to responses.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Parse,
    Cycle,
    Dependency,
    Group,
    SchemaConflict,
    QueryDecode,
    IoUnavailable,
    NotFound,
    DuplicateName,
    Storage,
}

#[derive(Debug, Error)]
pub enum CalcError {
    /// The formula is malformed, names an unknown column or is not well typed.
    #[error(transparent)]
    Parse(FormulaError),

    #[error(transparent)]
    Cycle(#[from] CycleError),

    #[error("cannot delete {name}: still referenced by {}", .dependents.join(", "))]
    Dependency {
        name: String,
        dependents: Vec<String>,
    },

    #[error("group error: {0}")]
    Group(String),

    #[error("schema conflict on column {column}: stored as {existing}, cannot change to {requested}")]
    SchemaConflict {
        column: String,
        existing: SimpleType,
        requested: SimpleType,
    },

    #[error("cannot decode {param}: {message}")]
    QueryDecode {
        param: &'static str,
        message: String,
    },

    #[error("source unavailable: {0}")]
    IoUnavailable(String),

    #[error("{0}")]
    NotFound(String),

    #[error("calculation {name} already exists")]
    DuplicateName { name: String },

    #[error(transparent)]
    Storage(StorageError),
}

impl CalcError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CalcError::Parse(_) => ErrorKind::Parse,
            CalcError::Cycle(_) => ErrorKind::Cycle,
            CalcError::Dependency { .. } => ErrorKind::Dependency,
            CalcError::Group(_) => ErrorKind::Group,
            CalcError::SchemaConflict { .. } => ErrorKind::SchemaConflict,
            CalcError::QueryDecode { .. } => ErrorKind::QueryDecode,
            CalcError::IoUnavailable(_) => ErrorKind::IoUnavailable,
            CalcError::NotFound(_) => ErrorKind::NotFound,
            CalcError::DuplicateName { .. } => ErrorKind::DuplicateName,
            CalcError::Storage(_) => ErrorKind::Storage,
        }
    }
}

impl From<FormulaError> for CalcError {
    fn from(err: FormulaError) -> Self {
        match err {
            FormulaError::Cycle(cycle) => CalcError::Cycle(cycle),
            FormulaError::Group(message) => CalcError::Group(message),
            FormulaError::Dependents { column, dependents } => CalcError::Dependency {
                name: column,
                dependents,
            },
            other => CalcError::Parse(other),
        }
    }
}

impl From<ModelError> for CalcError {
    fn from(err: ModelError) -> Self {
        match err {
            ModelError::SchemaConflict {
                column,
                existing,
                requested,
            } => CalcError::SchemaConflict {
                column,
                existing,
                requested,
            },
            other => CalcError::Storage(StorageError::Model(other)),
        }
    }
}

impl From<StorageError> for CalcError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Model(model) => model.into(),
            StorageError::QueryDecode { param, message } => {
                CalcError::QueryDecode { param, message }
            }
            StorageError::DatasetNotFound(id) => {
                CalcError::NotFound(format!("dataset not found: {id}"))
            }
            StorageError::CalculationNotFound { dataset_id, name } => CalcError::NotFound(
                format!("calculation {name} not found in dataset {dataset_id}"),
            ),
            StorageError::DuplicateCalculation { name, .. } => CalcError::DuplicateName { name },
            other => CalcError::Storage(other),
        }
    }
}
