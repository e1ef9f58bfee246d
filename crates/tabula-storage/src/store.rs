use tabula_model::{Calculation, Dataset, DatasetId, GenerationId, Record, Value};

use crate::error::{Result, StorageError};

/// A persisted row together with its physical id.
///
/// Ids grow with insertion order, so sorting by id reproduces the order rows were saved in.
#[derive(Clone, Debug, PartialEq)]
pub struct StoredRow {
    pub id: i64,
    pub record: Record,
}

/// Persistence backend for datasets, their rows, calculations and summaries.
///
/// Implementations only store and retrieve; generation semantics, batching and schema
/// reconciliation live in [`crate::ObservationStore`].
pub trait Store: Send + Sync {
    /// Insert or replace the dataset record.
    fn put_dataset(&self, dataset: &Dataset) -> Result<()>;
    fn get_dataset(&self, id: &DatasetId) -> Result<Dataset>;

    /// Insert one batch of rows stamped with `generation`.
    fn insert_rows(
        &self,
        dataset_id: &DatasetId,
        generation: &GenerationId,
        rows: &[Record],
    ) -> Result<()>;
    /// Rows of one generation, ordered by id.
    fn load_rows(&self, dataset_id: &DatasetId, generation: &GenerationId)
        -> Result<Vec<StoredRow>>;
    fn count_rows(&self, dataset_id: &DatasetId, generation: &GenerationId) -> Result<usize>;
    /// Overwrite the records of existing rows, matched by id.
    fn update_rows(&self, dataset_id: &DatasetId, rows: &[StoredRow]) -> Result<()>;
    fn delete_rows(&self, dataset_id: &DatasetId, ids: &[i64]) -> Result<usize>;
    fn delete_generation(&self, dataset_id: &DatasetId, generation: &GenerationId)
        -> Result<usize>;
    /// Physically remove rows of every generation except `active`.
    fn delete_stale_rows(&self, dataset_id: &DatasetId, active: &GenerationId) -> Result<usize>;

    fn insert_calculation(&self, calculation: &Calculation) -> Result<()>;
    /// Persist a state change of an existing calculation.
    fn update_calculation(&self, calculation: &Calculation) -> Result<()>;
    fn delete_calculation(
        &self,
        dataset_id: &DatasetId,
        name: &str,
        group: Option<&str>,
    ) -> Result<()>;
    /// Calculations of a dataset in creation order.
    fn list_calculations(&self, dataset_id: &DatasetId) -> Result<Vec<Calculation>>;

    fn put_summary(
        &self,
        dataset_id: &DatasetId,
        generation: &GenerationId,
        summary: &serde_json::Value,
    ) -> Result<()>;
    fn get_summary(
        &self,
        dataset_id: &DatasetId,
        generation: &GenerationId,
    ) -> Result<Option<serde_json::Value>>;
    /// Remove summaries of every generation except `active`.
    fn delete_stale_summaries(&self, dataset_id: &DatasetId, active: &GenerationId)
        -> Result<usize>;
}

pub(crate) fn record_to_json(record: &Record) -> serde_json::Value {
    serde_json::Value::Object(
        record
            .iter()
            .map(|(k, v)| (k.clone(), v.to_json()))
            .collect(),
    )
}

pub(crate) fn record_from_json(value: &serde_json::Value) -> Result<Record> {
    let serde_json::Value::Object(map) = value else {
        return Err(StorageError::Corrupt(format!(
            "expected a JSON object row, found {value}"
        )));
    };
    map.iter()
        .map(|(k, v)| Ok((k.clone(), Value::from_json(v)?)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn records_use_extended_json() {
        let mut record = Record::new();
        record.insert("price".into(), 10.into());
        record.insert(
            "when".into(),
            Value::DateTime(tabula_model::datetime_from_millis(0).unwrap()),
        );
        let encoded = record_to_json(&record);
        assert_eq!(encoded, json!({"price": 10, "when": {"$date": 0}}));
        assert_eq!(record_from_json(&encoded).unwrap(), record);
        assert!(record_from_json(&json!([1])).is_err());
    }
}
