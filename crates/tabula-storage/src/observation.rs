use std::collections::HashMap;
use std::sync::Arc;

use tabula_model::{
    infer_simpletype, ColumnSchema, Dataset, Frame, ModelError, Record, Schema, SimpleType, Value,
};

use crate::config::StoreConfig;
use crate::error::Result;
use crate::jobs::JobQueue;
use crate::query::FindQuery;
use crate::store::{Store, StoredRow};
use crate::summary::submit_summary;

/// Generation-aware row persistence for datasets.
///
/// Every row is stamped with the generation marker the dataset had when the row was written.
/// Reads only ever see the dataset's current generation, so rows of a replaced generation stay
/// invisible until [`ObservationStore::purge_stale`] removes them.
#[derive(Clone)]
pub struct ObservationStore {
    store: Arc<dyn Store>,
    jobs: Arc<dyn JobQueue>,
    config: StoreConfig,
}

impl std::fmt::Debug for ObservationStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObservationStore")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ObservationStore {
    pub fn new(store: Arc<dyn Store>, jobs: Arc<dyn JobQueue>, config: StoreConfig) -> Self {
        Self {
            store,
            jobs,
            config,
        }
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Append `frame` (columns named by label or key) to the dataset's current generation.
    ///
    /// The first save infers the schema; later ones extend it with unseen columns. On return the
    /// dataset is `ready` and persisted with its new row and column counts.
    pub fn save(&self, dataset: &mut Dataset, frame: Frame) -> Result<usize> {
        let frame = self.prepare(dataset, frame)?;
        self.store.put_dataset(dataset)?;

        let records = frame.to_records();
        self.insert_batches(dataset, &records)?;

        let row_count = self
            .store
            .count_rows(&dataset.id, &dataset.generation_id)?;
        dataset.mark_ready(row_count);
        self.store.put_dataset(dataset)?;
        self.after_write(dataset);
        Ok(records.len())
    }

    /// Replace every row of the dataset with `frame` under a fresh generation.
    ///
    /// Not atomic: between the delete of the old generation and the insert of the new one a
    /// reader observes an empty dataset.
    pub fn update(&self, dataset: &mut Dataset, frame: Frame) -> Result<usize> {
        let frame = self.prepare(dataset, frame)?;

        let previous = dataset.next_generation();
        let removed = self.store.delete_generation(&dataset.id, &previous)?;
        let records = frame.to_records();
        self.insert_batches(dataset, &records)?;

        dataset.mark_ready(records.len());
        self.store.put_dataset(dataset)?;
        log::info!(
            "dataset {} moved from generation {previous} to {} ({removed} rows replaced by {})",
            dataset.id,
            dataset.generation_id,
            records.len()
        );
        self.after_write(dataset);
        Ok(records.len())
    }

    /// Rows of the current generation matching `query`.
    pub fn find(&self, dataset: &Dataset, query: &FindQuery) -> Result<Vec<Record>> {
        let compiled = query.compile(&dataset.schema)?;
        let rows = self.store.load_rows(&dataset.id, &dataset.generation_id)?;
        Ok(compiled.apply(rows.into_iter().map(|r| r.record)))
    }

    /// The current generation as a schema-ordered frame, with the physical id of every row.
    pub fn load_frame(&self, dataset: &Dataset) -> Result<(Vec<i64>, Frame)> {
        let rows = self.store.load_rows(&dataset.id, &dataset.generation_id)?;
        let (ids, records): (Vec<i64>, Vec<Record>) =
            rows.into_iter().map(|r| (r.id, r.record)).unzip();
        let frame = Frame::from_records(&dataset.schema, &records)?;
        Ok((ids, frame))
    }

    /// Remove rows of the current generation matching `filter` (all rows when `None`).
    pub fn delete_all(&self, dataset: &mut Dataset, filter: Option<&str>) -> Result<usize> {
        let compiled = FindQuery {
            query: filter.map(str::to_string),
            ..FindQuery::default()
        }
        .compile(&dataset.schema)?;

        let ids: Vec<i64> = self
            .store
            .load_rows(&dataset.id, &dataset.generation_id)?
            .into_iter()
            .filter(|row| compiled.filter.matches(&row.record))
            .map(|row| row.id)
            .collect();

        let mut removed = 0;
        for chunk in ids.chunks(self.config.effective_batch_size()) {
            removed += self.store.delete_rows(&dataset.id, chunk)?;
        }

        dataset.row_count = self
            .store
            .count_rows(&dataset.id, &dataset.generation_id)?;
        self.store.put_dataset(dataset)?;
        log::debug!("deleted {removed} rows from dataset {}", dataset.id);
        if removed > 0 {
            self.after_write(dataset);
        }
        Ok(removed)
    }

    /// Physically remove rows and summaries left behind by earlier generations.
    ///
    /// Returns the number of rows removed.
    pub fn purge_stale(&self, dataset: &Dataset) -> Result<usize> {
        let purged = self
            .store
            .delete_stale_rows(&dataset.id, &dataset.generation_id)?;
        let summaries = self
            .store
            .delete_stale_summaries(&dataset.id, &dataset.generation_id)?;
        if purged > 0 || summaries > 0 {
            log::debug!(
                "purged {purged} stale rows and {summaries} stale summaries from dataset {}",
                dataset.id
            );
        }
        Ok(purged)
    }

    /// Materialize `values` as column `key`, one value per current row in load order.
    pub fn write_column(&self, dataset: &Dataset, key: &str, values: Vec<Value>) -> Result<()> {
        let rows = self.store.load_rows(&dataset.id, &dataset.generation_id)?;
        if rows.len() != values.len() {
            return Err(ModelError::ColumnLengthMismatch {
                column: key.to_string(),
                expected: rows.len(),
                actual: values.len(),
            }
            .into());
        }

        let updated: Vec<StoredRow> = rows
            .into_iter()
            .zip(values)
            .map(|(mut row, value)| {
                row.record.insert(key.to_string(), value);
                row
            })
            .collect();
        for chunk in updated.chunks(self.config.effective_batch_size()) {
            self.store.update_rows(&dataset.id, chunk)?;
        }
        log::debug!(
            "wrote column {key} to {} rows of dataset {}",
            updated.len(),
            dataset.id
        );
        Ok(())
    }

    /// Remove column `key` from every current row.
    pub fn drop_column(&self, dataset: &Dataset, key: &str) -> Result<()> {
        let updated: Vec<StoredRow> = self
            .store
            .load_rows(&dataset.id, &dataset.generation_id)?
            .into_iter()
            .filter_map(|mut row| row.record.remove(key).map(|_| row))
            .collect();
        for chunk in updated.chunks(self.config.effective_batch_size()) {
            self.store.update_rows(&dataset.id, chunk)?;
        }
        Ok(())
    }

    /// Queue a summary recomputation regardless of [`StoreConfig::summarize_on_save`].
    pub fn request_summary(&self, dataset: &Dataset) {
        submit_summary(Arc::clone(&self.store), self.jobs.as_ref(), dataset.clone());
    }

    /// The cached summary of the dataset's current generation, if one has been computed.
    pub fn summary(&self, dataset: &Dataset) -> Result<Option<serde_json::Value>> {
        self.store.get_summary(&dataset.id, &dataset.generation_id)
    }

    fn after_write(&self, dataset: &Dataset) {
        if self.config.summarize_on_save {
            self.request_summary(dataset);
        }
    }

    fn insert_batches(&self, dataset: &Dataset, records: &[Record]) -> Result<()> {
        for batch in records.chunks(self.config.effective_batch_size()) {
            self.store
                .insert_rows(&dataset.id, &dataset.generation_id, batch)?;
            log::debug!("inserted {} rows into dataset {}", batch.len(), dataset.id);
        }
        Ok(())
    }

    /// Reconcile the dataset schema with `frame` and rename its columns to schema keys.
    fn prepare(&self, dataset: &mut Dataset, mut frame: Frame) -> Result<Frame> {
        if dataset.schema.is_empty() {
            dataset.schema = Schema::build(&frame, self.config.sample_rows);
        } else {
            let incoming = self.incoming_columns(&dataset.schema, &frame)?;
            dataset.schema.extend(incoming)?;
        }

        let by_label = dataset.schema.labels_to_slugs();
        let renames: HashMap<String, String> = frame
            .columns()
            .iter()
            .filter_map(|c| Some((c.clone(), existing_key(&dataset.schema, &by_label, c)?)))
            .collect();
        frame.rename_columns(|c| renames.get(c).cloned().unwrap_or_else(|| c.to_string()))?;
        frame.conform(&dataset.schema)?;
        Ok(frame)
    }

    /// Every frame column as a `(key, column)` pair: existing columns under their key with the
    /// inferred type, unseen columns under a fresh slug.
    fn incoming_columns(&self, schema: &Schema, frame: &Frame) -> Result<Vec<(String, ColumnSchema)>> {
        let by_label = schema.labels_to_slugs();
        let mut keys_taken = schema.clone();
        let mut columns = Vec::with_capacity(frame.column_count());
        for (idx, name) in frame.columns().iter().enumerate() {
            let inferred = infer_simpletype(
                frame
                    .rows()
                    .iter()
                    .take(self.config.sample_rows)
                    .filter_map(|row| row.get(idx)),
            );
            match existing_key(schema, &by_label, name) {
                Some(key) => {
                    if let Some(simpletype) = inferred {
                        columns.push((key, ColumnSchema::new(name.clone(), simpletype)));
                    }
                }
                None => {
                    let column =
                        ColumnSchema::new(name.clone(), inferred.unwrap_or(SimpleType::String));
                    let key = keys_taken.new_column_key(name);
                    keys_taken.push(key.clone(), column.clone())?;
                    columns.push((key, column));
                }
            }
        }
        Ok(columns)
    }
}

/// Incoming column names are labels first, keys second.
fn existing_key(schema: &Schema, by_label: &HashMap<String, String>, name: &str) -> Option<String> {
    by_label
        .get(name)
        .cloned()
        .or_else(|| schema.contains(name).then(|| name.to_string()))
}
