use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use tabula_model::{Calculation, Dataset, DatasetId, GenerationId, Record};

use crate::error::{Result, StorageError};
use crate::store::{Store, StoredRow};

#[derive(Debug)]
struct RowEntry {
    dataset_id: DatasetId,
    generation: GenerationId,
    record: Record,
}

#[derive(Debug, Default)]
struct State {
    datasets: HashMap<DatasetId, Dataset>,
    rows: BTreeMap<i64, RowEntry>,
    next_row_id: i64,
    calculations: Vec<Calculation>,
    summaries: HashMap<(DatasetId, GenerationId), serde_json::Value>,
}

/// In-process [`Store`] for tests and embedding.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total physical rows of a dataset, stale generations included.
    pub fn physical_row_count(&self, dataset_id: &DatasetId) -> usize {
        let state = self.state.lock().expect("memory store mutex poisoned");
        state
            .rows
            .values()
            .filter(|r| &r.dataset_id == dataset_id)
            .count()
    }
}

impl Store for MemoryStore {
    fn put_dataset(&self, dataset: &Dataset) -> Result<()> {
        let mut state = self.state.lock().expect("memory store mutex poisoned");
        state.datasets.insert(dataset.id.clone(), dataset.clone());
        Ok(())
    }

    fn get_dataset(&self, id: &DatasetId) -> Result<Dataset> {
        let state = self.state.lock().expect("memory store mutex poisoned");
        state
            .datasets
            .get(id)
            .cloned()
            .ok_or_else(|| StorageError::DatasetNotFound(id.clone()))
    }

    fn insert_rows(
        &self,
        dataset_id: &DatasetId,
        generation: &GenerationId,
        rows: &[Record],
    ) -> Result<()> {
        let mut state = self.state.lock().expect("memory store mutex poisoned");
        if !state.datasets.contains_key(dataset_id) {
            return Err(StorageError::DatasetNotFound(dataset_id.clone()));
        }
        for record in rows {
            state.next_row_id += 1;
            let id = state.next_row_id;
            state.rows.insert(
                id,
                RowEntry {
                    dataset_id: dataset_id.clone(),
                    generation: generation.clone(),
                    record: record.clone(),
                },
            );
        }
        Ok(())
    }

    fn load_rows(
        &self,
        dataset_id: &DatasetId,
        generation: &GenerationId,
    ) -> Result<Vec<StoredRow>> {
        let state = self.state.lock().expect("memory store mutex poisoned");
        Ok(state
            .rows
            .iter()
            .filter(|(_, r)| &r.dataset_id == dataset_id && &r.generation == generation)
            .map(|(id, r)| StoredRow {
                id: *id,
                record: r.record.clone(),
            })
            .collect())
    }

    fn count_rows(&self, dataset_id: &DatasetId, generation: &GenerationId) -> Result<usize> {
        let state = self.state.lock().expect("memory store mutex poisoned");
        Ok(state
            .rows
            .values()
            .filter(|r| &r.dataset_id == dataset_id && &r.generation == generation)
            .count())
    }

    fn update_rows(&self, dataset_id: &DatasetId, rows: &[StoredRow]) -> Result<()> {
        let mut state = self.state.lock().expect("memory store mutex poisoned");
        for row in rows {
            if let Some(entry) = state.rows.get_mut(&row.id) {
                if &entry.dataset_id == dataset_id {
                    entry.record = row.record.clone();
                }
            }
        }
        Ok(())
    }

    fn delete_rows(&self, dataset_id: &DatasetId, ids: &[i64]) -> Result<usize> {
        let mut state = self.state.lock().expect("memory store mutex poisoned");
        let mut removed = 0;
        for id in ids {
            if state
                .rows
                .get(id)
                .is_some_and(|r| &r.dataset_id == dataset_id)
            {
                state.rows.remove(id);
                removed += 1;
            }
        }
        Ok(removed)
    }

    fn delete_generation(
        &self,
        dataset_id: &DatasetId,
        generation: &GenerationId,
    ) -> Result<usize> {
        let mut state = self.state.lock().expect("memory store mutex poisoned");
        let before = state.rows.len();
        state
            .rows
            .retain(|_, r| !(&r.dataset_id == dataset_id && &r.generation == generation));
        Ok(before - state.rows.len())
    }

    fn delete_stale_rows(&self, dataset_id: &DatasetId, active: &GenerationId) -> Result<usize> {
        let mut state = self.state.lock().expect("memory store mutex poisoned");
        let before = state.rows.len();
        state
            .rows
            .retain(|_, r| &r.dataset_id != dataset_id || &r.generation == active);
        Ok(before - state.rows.len())
    }

    fn delete_stale_summaries(&self, dataset_id: &DatasetId, active: &GenerationId) -> Result<usize> {
        let mut state = self.state.lock().expect("memory store mutex poisoned");
        let before = state.summaries.len();
        state
            .summaries
            .retain(|(id, generation), _| id != dataset_id || generation == active);
        Ok(before - state.summaries.len())
    }

    fn insert_calculation(&self, calculation: &Calculation) -> Result<()> {
        let mut state = self.state.lock().expect("memory store mutex poisoned");
        let exists = state.calculations.iter().any(|c| {
            c.dataset_id == calculation.dataset_id
                && c.matches(&calculation.name, calculation.group.as_deref())
        });
        if exists {
            return Err(StorageError::DuplicateCalculation {
                dataset_id: calculation.dataset_id.clone(),
                name: calculation.name.clone(),
            });
        }
        state.calculations.push(calculation.clone());
        Ok(())
    }

    fn update_calculation(&self, calculation: &Calculation) -> Result<()> {
        let mut state = self.state.lock().expect("memory store mutex poisoned");
        let existing = state.calculations.iter_mut().find(|c| {
            c.dataset_id == calculation.dataset_id
                && c.matches(&calculation.name, calculation.group.as_deref())
        });
        match existing {
            Some(existing) => {
                *existing = calculation.clone();
                Ok(())
            }
            None => Err(StorageError::CalculationNotFound {
                dataset_id: calculation.dataset_id.clone(),
                name: calculation.name.clone(),
            }),
        }
    }

    fn delete_calculation(
        &self,
        dataset_id: &DatasetId,
        name: &str,
        group: Option<&str>,
    ) -> Result<()> {
        let mut state = self.state.lock().expect("memory store mutex poisoned");
        let before = state.calculations.len();
        state
            .calculations
            .retain(|c| !(&c.dataset_id == dataset_id && c.matches(name, group)));
        if state.calculations.len() == before {
            return Err(StorageError::CalculationNotFound {
                dataset_id: dataset_id.clone(),
                name: name.to_string(),
            });
        }
        Ok(())
    }

    fn list_calculations(&self, dataset_id: &DatasetId) -> Result<Vec<Calculation>> {
        let state = self.state.lock().expect("memory store mutex poisoned");
        Ok(state
            .calculations
            .iter()
            .filter(|c| &c.dataset_id == dataset_id)
            .cloned()
            .collect())
    }

    fn put_summary(
        &self,
        dataset_id: &DatasetId,
        generation: &GenerationId,
        summary: &serde_json::Value,
    ) -> Result<()> {
        let mut state = self.state.lock().expect("memory store mutex poisoned");
        state
            .summaries
            .insert((dataset_id.clone(), generation.clone()), summary.clone());
        Ok(())
    }

    fn get_summary(
        &self,
        dataset_id: &DatasetId,
        generation: &GenerationId,
    ) -> Result<Option<serde_json::Value>> {
        let state = self.state.lock().expect("memory store mutex poisoned");
        Ok(state
            .summaries
            .get(&(dataset_id.clone(), generation.clone()))
            .cloned())
    }
}
