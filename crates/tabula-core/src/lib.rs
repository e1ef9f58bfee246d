//! Calculated columns over stored datasets.
//!
//! [`Tabula`] wires the pieces together:
//! - [`CalculationRegistry`] validates, materializes and deletes calculated columns
//! - [`DatasetService`] saves and replaces rows, recomputing calculations after an update
//! - [`Ingestor`] creates datasets from CSV sources and schema documents
//! - [`api`] exposes JSON handlers on top
//!
//! All mutations of one dataset are serialized through [`DatasetLocks`].

pub mod api;
mod config;
mod datasets;
mod engine;
mod error;
pub mod ingest;
mod locks;
mod registry;

pub use config::Config;
pub use datasets::DatasetService;
pub use engine::Tabula;
pub use error::{CalcError, CalcResult, ErrorKind};
pub use ingest::{CsvOptions, Ingestor, LocalFileFetcher, UrlFetcher};
pub use locks::DatasetLocks;
pub use registry::CalculationRegistry;
