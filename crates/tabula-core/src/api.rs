//! JSON request handlers.
//!
//! Handlers never fail: errors become `{"error": message}` documents.

use serde_json::{json, Value as Json};
use tabula_model::{Calculation, DatasetId, Record};
use tabula_storage::FindQuery;

use crate::datasets::DatasetService;
use crate::error::{CalcError, ErrorKind};
use crate::registry::CalculationRegistry;

const CALCULATION_NOT_FOUND: &str = "name and dataset_id combination not found";

fn error(err: &CalcError) -> Json {
    json!({ "error": err.to_string() })
}

fn calculation_json(calculation: &Calculation) -> Json {
    json!({
        "name": calculation.name,
        "formula": calculation.formula,
        "group": calculation.group,
        "state": calculation.state.as_str(),
    })
}

fn record_json(record: &Record) -> Json {
    Json::Object(
        record
            .iter()
            .map(|(k, v)| (k.clone(), v.to_json()))
            .collect(),
    )
}

#[derive(Clone, Debug)]
pub struct CalculationsController {
    calculations: CalculationRegistry,
}

impl CalculationsController {
    pub fn new(calculations: CalculationRegistry) -> Self {
        Self { calculations }
    }

    pub fn create(&self, dataset_id: &str, formula: &str, name: &str, group: Option<&str>) -> Json {
        let id = DatasetId::from(dataset_id);
        match self.calculations.create(&id, formula, name, group) {
            Ok(_) => json!({ "status": "created", "name": name, "dataset_id": dataset_id }),
            Err(err) => error(&err),
        }
    }

    pub fn delete(&self, dataset_id: &str, name: &str, group: Option<&str>) -> Json {
        let id = DatasetId::from(dataset_id);
        match self.calculations.delete(&id, name, group) {
            Ok(()) => json!({ "status": "deleted" }),
            Err(err) if err.kind() == ErrorKind::NotFound => json!({ "error": CALCULATION_NOT_FOUND }),
            Err(err) => error(&err),
        }
    }

    pub fn show(&self, dataset_id: &str) -> Json {
        match self.calculations.show(&DatasetId::from(dataset_id)) {
            Ok(calculations) => Json::Array(calculations.iter().map(calculation_json).collect()),
            Err(err) => error(&err),
        }
    }
}

#[derive(Clone, Debug)]
pub struct ObservationsController {
    datasets: DatasetService,
}

impl ObservationsController {
    pub fn new(datasets: DatasetService) -> Self {
        Self { datasets }
    }

    /// Rows of the dataset as extended JSON documents.
    pub fn find(&self, dataset_id: &str, query: &FindQuery) -> Json {
        match self.datasets.find(&DatasetId::from(dataset_id), query) {
            Ok(rows) => Json::Array(rows.iter().map(record_json).collect()),
            Err(err) => error(&err),
        }
    }

    pub fn delete(&self, dataset_id: &str, query: Option<&str>) -> Json {
        match self.datasets.delete_rows(&DatasetId::from(dataset_id), query) {
            Ok(count) => json!({ "status": "deleted", "count": count }),
            Err(err) => error(&err),
        }
    }

    pub fn summary(&self, dataset_id: &str) -> Json {
        match self.datasets.summary(&DatasetId::from(dataset_id)) {
            Ok(Some(summary)) => summary,
            Ok(None) => json!({}),
            Err(err) => error(&err),
        }
    }
}
