use tabula_model::{DatasetId, ModelError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error("dataset not found: {0}")]
    DatasetNotFound(DatasetId),
    #[error("calculation not found: {name} in dataset {dataset_id}")]
    CalculationNotFound { dataset_id: DatasetId, name: String },
    #[error("calculation already exists: {name} in dataset {dataset_id}")]
    DuplicateCalculation { dataset_id: DatasetId, name: String },
    /// `param` names the request parameter that failed to decode (`query`, `select`, `order_by`).
    #[error("cannot decode {param}: {message}")]
    QueryDecode {
        param: &'static str,
        message: String,
    },
    #[error("corrupt stored document: {0}")]
    Corrupt(String),
}

impl StorageError {
    pub(crate) fn decode(param: &'static str, message: impl Into<String>) -> Self {
        StorageError::QueryDecode {
            param,
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, StorageError>;
