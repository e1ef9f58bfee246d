use serde::{Deserialize, Serialize};
use std::fmt;

use crate::schema::Schema;

macro_rules! opaque_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// A fresh random identifier.
            pub fn generate() -> Self {
                Self(uuid::Uuid::new_v4().simple().to_string())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

opaque_id!(
    /// Opaque dataset identity.
    DatasetId
);

opaque_id!(
    /// Marker identifying the active set of physical rows of a dataset.
    ///
    /// Rows stamped with any other generation are logically deleted.
    GenerationId
);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatasetState {
    Pending,
    Ready,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    pub id: DatasetId,
    pub schema: Schema,
    pub row_count: usize,
    pub column_count: usize,
    pub state: DatasetState,
    pub generation_id: GenerationId,
}

impl Dataset {
    /// A pending dataset with an empty schema and a fresh generation.
    pub fn new() -> Self {
        Self::with_id(DatasetId::generate())
    }

    pub fn with_id(id: DatasetId) -> Self {
        Self {
            id,
            schema: Schema::new(),
            row_count: 0,
            column_count: 0,
            state: DatasetState::Pending,
            generation_id: GenerationId::generate(),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.state == DatasetState::Ready
    }

    /// Switch to a new generation, returning the one it replaces.
    pub fn next_generation(&mut self) -> GenerationId {
        std::mem::replace(&mut self.generation_id, GenerationId::generate())
    }

    /// Record the persisted shape and mark the dataset readable.
    pub fn mark_ready(&mut self, row_count: usize) {
        self.row_count = row_count;
        self.column_count = self.schema.len();
        self.state = DatasetState::Ready;
    }
}

impl Default for Dataset {
    fn default() -> Self {
        Self::new()
    }
}
