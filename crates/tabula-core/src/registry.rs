use std::sync::Arc;

use tabula_formula::{parse, CycleError, DependencyTracker, FormulaEvaluator};
use tabula_model::{Calculation, CalculationState, ColumnSchema, Dataset, DatasetId, Frame, Schema};
use tabula_storage::ObservationStore;

use crate::error::{CalcError, CalcResult};
use crate::locks::DatasetLocks;

/// Creates, deletes and lists calculated columns.
///
/// Creation runs every check (formula, name, cycle, group, evaluation) before anything is written,
/// so a rejected calculation leaves the dataset untouched.
#[derive(Clone, Debug)]
pub struct CalculationRegistry {
    observations: ObservationStore,
    evaluator: FormulaEvaluator,
    locks: Arc<DatasetLocks>,
}

impl CalculationRegistry {
    pub fn new(observations: ObservationStore, locks: Arc<DatasetLocks>) -> Self {
        Self {
            observations,
            evaluator: FormulaEvaluator::new(),
            locks,
        }
    }

    /// Add the calculated column `name = formula`, optionally aggregated per `group`.
    pub fn create(
        &self,
        dataset_id: &DatasetId,
        formula: &str,
        name: &str,
        group: Option<&str>,
    ) -> CalcResult<Calculation> {
        self.locks.run_exclusive(dataset_id, || {
            let store = self.observations.store();
            let mut dataset = store.get_dataset(dataset_id)?;
            let group = group.map(|g| group_key(&dataset.schema, g));
            let existing = store.list_calculations(dataset_id)?;
            if existing.iter().any(|c| c.matches(name, group.as_deref())) {
                return Err(CalcError::DuplicateName {
                    name: name.to_string(),
                });
            }

            reject_self_reference(formula, name, &dataset.schema)?;
            let validated = self.evaluator.validate(formula, &dataset.schema)?;
            let key = dataset.schema.new_column_key(name);
            let label = column_label(&dataset.schema, &existing, name, &key)?;
            self.tracker(&dataset.schema, &existing)
                .check_cycle(&key, validated.references())?;

            let (_, frame) = self.observations.load_frame(&dataset)?;
            let values =
                self.evaluator
                    .evaluate(&validated, &frame, group.as_deref(), &dataset.schema)?;

            let mut calculation =
                Calculation::new(dataset_id.clone(), name, formula, group, key.clone());
            store.insert_calculation(&calculation)?;

            let materialized = self
                .observations
                .write_column(&dataset, &key, values)
                .and_then(|()| {
                    dataset
                        .schema
                        .push(key.clone(), ColumnSchema::new(label, validated.result_type()))?;
                    dataset.column_count = dataset.schema.len();
                    store.put_dataset(&dataset)
                });
            if let Err(err) = materialized {
                log::warn!("materializing {name} in dataset {dataset_id} failed: {err}");
                calculation.state = CalculationState::Failed;
                if let Err(cleanup) = self.observations.drop_column(&dataset, &key) {
                    log::warn!("dropping partial column {key} failed: {cleanup}");
                }
                store.update_calculation(&calculation)?;
                return Err(err.into());
            }

            calculation.state = CalculationState::Ready;
            store.update_calculation(&calculation)?;
            log::info!("created calculation {name} ({key}) in dataset {dataset_id}");
            self.observations.request_summary(&dataset);
            Ok(calculation)
        })
    }

    /// Remove a calculation together with its column. Fails while other calculations use it.
    pub fn delete(&self, dataset_id: &DatasetId, name: &str, group: Option<&str>) -> CalcResult<()> {
        self.locks.run_exclusive(dataset_id, || {
            let store = self.observations.store();
            let mut dataset = store.get_dataset(dataset_id)?;
            let group = group.map(|g| group_key(&dataset.schema, g));
            let calculations = store.list_calculations(dataset_id)?;
            let Some(calculation) = calculations
                .iter()
                .find(|c| c.matches(name, group.as_deref()))
            else {
                return Err(CalcError::NotFound(format!(
                    "calculation {name} not found in dataset {dataset_id}"
                )));
            };

            self.tracker(&dataset.schema, &calculations)
                .guard_delete(&calculation.column)
                .map_err(|err| match CalcError::from(err) {
                    CalcError::Dependency { dependents, .. } => CalcError::Dependency {
                        name: name.to_string(),
                        dependents: calculations
                            .iter()
                            .filter(|c| dependents.contains(&c.column))
                            .map(|c| c.name.clone())
                            .collect(),
                    },
                    other => other,
                })?;

            self.observations.drop_column(&dataset, &calculation.column)?;
            dataset.schema.remove_column(&calculation.column);
            dataset.column_count = dataset.schema.len();
            store.put_dataset(&dataset)?;
            store.delete_calculation(dataset_id, name, group.as_deref())?;
            log::info!("deleted calculation {name} from dataset {dataset_id}");
            self.observations.request_summary(&dataset);
            Ok(())
        })
    }

    /// Calculations of the dataset in creation order.
    pub fn show(&self, dataset_id: &DatasetId) -> CalcResult<Vec<Calculation>> {
        let store = self.observations.store();
        store.get_dataset(dataset_id)?;
        Ok(store.list_calculations(dataset_id)?)
    }

    pub fn find_one(
        &self,
        dataset_id: &DatasetId,
        name: &str,
        group: Option<&str>,
    ) -> CalcResult<Option<Calculation>> {
        let store = self.observations.store();
        let dataset = store.get_dataset(dataset_id)?;
        let group = group.map(|g| group_key(&dataset.schema, g));
        Ok(store
            .list_calculations(dataset_id)?
            .into_iter()
            .find(|c| c.matches(name, group.as_deref())))
    }

    /// Re-evaluate every calculation of `dataset` in dependency order.
    ///
    /// Used after the dataset's rows were replaced; the caller holds the dataset lock. A
    /// calculation that no longer evaluates is marked failed and the others still run.
    pub fn recompute_all(&self, dataset: &Dataset) -> CalcResult<()> {
        let store = self.observations.store();
        let calculations = store.list_calculations(&dataset.id)?;
        if calculations.is_empty() {
            return Ok(());
        }

        let order = self
            .tracker(&dataset.schema, &calculations)
            .evaluation_order()?;
        let (_, mut frame) = self.observations.load_frame(dataset)?;
        for column in order {
            let Some(calculation) = calculations.iter().find(|c| c.column == column) else {
                continue;
            };
            let state = match self.recompute(dataset, calculation, &mut frame) {
                Ok(()) => CalculationState::Ready,
                Err(err) => {
                    log::warn!(
                        "recomputing {} in dataset {} failed: {err}",
                        calculation.name,
                        dataset.id
                    );
                    CalculationState::Failed
                }
            };
            if state != calculation.state {
                let mut updated = calculation.clone();
                updated.state = state;
                store.update_calculation(&updated)?;
            }
        }
        self.observations.request_summary(dataset);
        Ok(())
    }

    fn recompute(&self, dataset: &Dataset, calculation: &Calculation, frame: &mut Frame) -> CalcResult<()> {
        let formula = self.evaluator.validate(&calculation.formula, &dataset.schema)?;
        let values = self.evaluator.evaluate(
            &formula,
            frame,
            calculation.group.as_deref(),
            &dataset.schema,
        )?;
        frame.set_column(&calculation.column, values.clone())?;
        self.observations
            .write_column(dataset, &calculation.column, values)?;
        Ok(())
    }

    /// Reference graph of the dataset's calculations. Formulas that no longer validate
    /// contribute a node without edges.
    fn tracker(&self, schema: &Schema, calculations: &[Calculation]) -> DependencyTracker {
        DependencyTracker::from_calculations(calculations.iter().map(|c| {
            let references = self
                .evaluator
                .validate(&c.formula, schema)
                .map(|f| f.references().to_vec())
                .unwrap_or_default();
            (c.column.clone(), references)
        }))
    }
}

/// Store group columns by key so `region` and its label `Region` name the same calculation.
fn group_key(schema: &Schema, group: &str) -> String {
    schema
        .resolve(group)
        .map(str::to_string)
        .unwrap_or_else(|_| group.to_string())
}

/// Display label for a new calculated column stored under `key`.
///
/// A name already used by a raw column is refused. A name shared with a calculation of another
/// group falls back to the column key so labels stay unique.
fn column_label(
    schema: &Schema,
    calculations: &[Calculation],
    name: &str,
    key: &str,
) -> CalcResult<String> {
    let taken: Vec<&str> = schema
        .iter()
        .filter(|(k, column)| *k == name || column.label == name)
        .map(|(k, _)| k)
        .collect();
    let duplicate = || CalcError::DuplicateName {
        name: name.to_string(),
    };
    if taken
        .iter()
        .any(|k| !calculations.iter().any(|c| c.column == *k))
    {
        return Err(duplicate());
    }
    let label = if taken.is_empty() { name } else { key };
    if schema.has_label(label) {
        return Err(duplicate());
    }
    Ok(label.to_string())
}

/// A formula naming the calculation it defines refers to itself.
fn reject_self_reference(formula: &str, name: &str, schema: &Schema) -> CalcResult<()> {
    let expr = parse(formula)?;
    let refers_to_itself = expr
        .identifiers()
        .into_iter()
        .any(|identifier| identifier == name && schema.resolve(identifier).is_err());
    if refers_to_itself {
        return Err(CycleError {
            path: vec![name.to_string(), name.to_string()],
        }
        .into());
    }
    Ok(())
}
