//! `tabula-model` defines the in-memory data model shared by every tabula crate.
//!
//! It covers:
//! - cell [`Value`]s and their extended JSON encoding
//! - dataset [`Schema`]s with storage-safe slug keys
//! - row-major [`Frame`]s validated against a schema
//! - [`Dataset`] and [`Calculation`] records
//! - heuristic and schema-driven date recognition

mod calculation;
mod dataset;
pub mod dates;
mod error;
mod frame;
mod schema;
pub mod slug;
mod value;

pub use calculation::{Calculation, CalculationState};
pub use dataset::{Dataset, DatasetId, DatasetState, GenerationId};
pub use dates::{
    recognize_dates, recognize_dates_from_schema, translate_timestamp_filter, ColumnConversion,
    DateParseError, TimestampFilterError,
};
pub use error::{ModelError, ModelResult};
pub use frame::{Frame, Record};
pub use schema::{infer_simpletype, ColumnSchema, OlapRole, Schema, SimpleType};
pub use slug::{assign_slugs, slugify};
pub use value::{
    datetime_from_millis, datetime_from_seconds, is_extended_literal, Value, DATE_KEY, OID_KEY,
};
