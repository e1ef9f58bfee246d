use tabula_model::ModelError;

use crate::dependencies::CycleError;

pub type FormulaResult<T> = Result<T, FormulaError>;

#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum FormulaError {
    #[error("parse error: {0}")]
    Parse(String),

    #[error("unknown identifier: {0}")]
    UnknownIdentifier(String),

    #[error("ambiguous identifier {identifier}: matches columns {candidates:?}")]
    AmbiguousIdentifier {
        identifier: String,
        candidates: Vec<String>,
    },

    #[error("unknown function: {0}")]
    UnknownFunction(String),

    #[error("{function} expects {expected} arguments, got {actual}")]
    Arity {
        function: &'static str,
        expected: &'static str,
        actual: usize,
    },

    #[error("type error: {0}")]
    Type(String),

    #[error("group error: {0}")]
    Group(String),

    #[error("evaluation error: {0}")]
    Eval(String),

    #[error(transparent)]
    Cycle(#[from] CycleError),

    #[error("{column} is referenced by {dependents:?}")]
    Dependents {
        column: String,
        dependents: Vec<String>,
    },
}

impl From<ModelError> for FormulaError {
    fn from(err: ModelError) -> Self {
        match err {
            ModelError::UnknownColumn(identifier) => FormulaError::UnknownIdentifier(identifier),
            ModelError::AmbiguousIdentifier {
                identifier,
                candidates,
            } => FormulaError::AmbiguousIdentifier {
                identifier,
                candidates,
            },
            other => FormulaError::Eval(other.to_string()),
        }
    }
}
