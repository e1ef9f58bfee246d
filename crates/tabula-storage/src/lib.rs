//! Row persistence for tabula datasets.
//!
//! [`ObservationStore`] implements batched, generation-aware writes and structured reads on top
//! of a [`Store`] backend. Two backends ship with the crate:
//! - [`Storage`]: SQLite via `rusqlite`, one JSON document per row
//! - [`MemoryStore`]: in-process, for tests and embedding
//!
//! Summaries are recomputed on a [`JobQueue`] after every write.

mod config;
mod error;
mod jobs;
mod memory;
mod observation;
pub mod query;
mod schema;
mod storage;
mod store;
pub mod summary;

pub use config::StoreConfig;
pub use error::{Result, StorageError};
pub use jobs::{InlineJobQueue, Job, JobQueue, TokioJobQueue};
pub use memory::MemoryStore;
pub use observation::ObservationStore;
pub use query::FindQuery;
pub use storage::Storage;
pub use store::{Store, StoredRow};
pub use summary::{summarize, ColumnSummary, DatasetSummary};
