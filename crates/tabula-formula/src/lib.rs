//! Formula language for tabula calculated columns.
//!
//! A formula is parsed ([`parse`]), resolved and type-checked against a dataset [`Schema`]
//! ([`FormulaEvaluator::validate`]) and then evaluated over a [`Frame`] of rows, optionally
//! partitioned by a dimension column ([`FormulaEvaluator::evaluate`]). [`DependencyTracker`] keeps
//! the reference graph between calculated columns.
//!
//! [`Schema`]: tabula_model::Schema
//! [`Frame`]: tabula_model::Frame

mod dependencies;
mod error;
mod evaluator;
mod functions;
mod parser;
mod typecheck;

pub use crate::dependencies::{CycleError, DependencyTracker};
pub use crate::error::{FormulaError, FormulaResult};
pub use crate::evaluator::{Formula, FormulaEvaluator};
pub use crate::functions::Function;
pub use crate::parser::{parse, BinaryOp, Expr, UnaryOp};
