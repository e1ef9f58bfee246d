use std::sync::Arc;

use tabula_model::{Dataset, DatasetId, Frame, Record, Schema};
use tabula_storage::{FindQuery, ObservationStore};

use crate::error::CalcResult;
use crate::locks::DatasetLocks;
use crate::registry::CalculationRegistry;

/// Dataset lifecycle and row access.
#[derive(Clone, Debug)]
pub struct DatasetService {
    observations: ObservationStore,
    calculations: CalculationRegistry,
    locks: Arc<DatasetLocks>,
}

impl DatasetService {
    pub fn new(
        observations: ObservationStore,
        calculations: CalculationRegistry,
        locks: Arc<DatasetLocks>,
    ) -> Self {
        Self {
            observations,
            calculations,
            locks,
        }
    }

    /// Persist a new, empty, pending dataset.
    pub fn create(&self) -> CalcResult<Dataset> {
        self.create_with_schema(Schema::new())
    }

    pub fn create_with_schema(&self, schema: Schema) -> CalcResult<Dataset> {
        let mut dataset = Dataset::new();
        dataset.schema = schema;
        self.observations.store().put_dataset(&dataset)?;
        log::info!("created dataset {}", dataset.id);
        Ok(dataset)
    }

    pub fn get(&self, id: &DatasetId) -> CalcResult<Dataset> {
        Ok(self.observations.store().get_dataset(id)?)
    }

    /// Append rows, extending the schema with any new columns, then recompute the dataset's
    /// calculated columns over the enlarged row set.
    pub fn save(&self, id: &DatasetId, frame: Frame) -> CalcResult<Dataset> {
        self.locks.run_exclusive(id, || {
            let mut dataset = self.get(id)?;
            self.observations.save(&mut dataset, frame)?;
            self.calculations.recompute_all(&dataset)?;
            Ok(dataset)
        })
    }

    /// Replace every row, then recompute the dataset's calculated columns.
    pub fn update(&self, id: &DatasetId, frame: Frame) -> CalcResult<Dataset> {
        self.locks.run_exclusive(id, || {
            let mut dataset = self.get(id)?;
            self.observations.update(&mut dataset, frame)?;
            self.calculations.recompute_all(&dataset)?;
            Ok(dataset)
        })
    }

    pub fn find(&self, id: &DatasetId, query: &FindQuery) -> CalcResult<Vec<Record>> {
        let dataset = self.get(id)?;
        Ok(self.observations.find(&dataset, query)?)
    }

    /// Delete rows matching `filter`, or every row when `filter` is `None`.
    pub fn delete_rows(&self, id: &DatasetId, filter: Option<&str>) -> CalcResult<usize> {
        self.locks.run_exclusive(id, || {
            let mut dataset = self.get(id)?;
            Ok(self.observations.delete_all(&mut dataset, filter)?)
        })
    }

    /// Physically drop rows of replaced generations.
    pub fn purge(&self, id: &DatasetId) -> CalcResult<usize> {
        self.locks.run_exclusive(id, || {
            let dataset = self.get(id)?;
            Ok(self.observations.purge_stale(&dataset)?)
        })
    }

    pub fn summary(&self, id: &DatasetId) -> CalcResult<Option<serde_json::Value>> {
        let dataset = self.get(id)?;
        Ok(self.observations.summary(&dataset)?)
    }
}
