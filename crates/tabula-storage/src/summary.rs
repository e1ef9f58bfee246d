//! Per-column statistics cached per dataset generation.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tabula_model::{Dataset, Frame, Schema, Value};

use crate::error::Result;
use crate::jobs::JobQueue;
use crate::store::Store;

/// Most frequent values kept for dimension columns.
const TOP_VALUES: usize = 10;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TopValue {
    pub value: serde_json::Value,
    pub count: usize,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ColumnSummary {
    Measure {
        count: usize,
        nulls: usize,
        sum: f64,
        mean: Option<f64>,
        min: Option<f64>,
        max: Option<f64>,
    },
    Dimension {
        count: usize,
        nulls: usize,
        distinct: usize,
        top: Vec<TopValue>,
    },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DatasetSummary {
    pub row_count: usize,
    pub columns: BTreeMap<String, ColumnSummary>,
}

pub fn summarize(schema: &Schema, frame: &Frame) -> DatasetSummary {
    let columns = schema
        .iter()
        .filter_map(|(key, column)| {
            let values = frame.column_values(key)?;
            let summary = if column.is_dimension() {
                summarize_dimension(&values)
            } else {
                summarize_measure(&values)
            };
            Some((key.to_string(), summary))
        })
        .collect();
    DatasetSummary {
        row_count: frame.row_count(),
        columns,
    }
}

fn summarize_measure(values: &[Value]) -> ColumnSummary {
    let numbers: Vec<f64> = values.iter().filter_map(Value::as_number).collect();
    let count = numbers.len();
    let sum: f64 = numbers.iter().sum();
    ColumnSummary::Measure {
        count,
        nulls: values.len() - count,
        sum,
        mean: (count > 0).then(|| sum / count as f64),
        min: numbers.iter().copied().reduce(f64::min),
        max: numbers.iter().copied().reduce(f64::max),
    }
}

fn summarize_dimension(values: &[Value]) -> ColumnSummary {
    let mut counts: HashMap<&Value, usize> = HashMap::new();
    let mut nulls = 0;
    for value in values {
        if value.is_null() {
            nulls += 1;
        } else {
            *counts.entry(value).or_default() += 1;
        }
    }

    let distinct = counts.len();
    let mut ranked: Vec<(&Value, usize)> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
    let top = ranked
        .into_iter()
        .take(TOP_VALUES)
        .map(|(value, count)| TopValue {
            value: value.to_json(),
            count,
        })
        .collect();

    ColumnSummary::Dimension {
        count: values.len() - nulls,
        nulls,
        distinct,
        top,
    }
}

fn refresh(store: &dyn Store, dataset: &Dataset) -> Result<()> {
    let rows = store.load_rows(&dataset.id, &dataset.generation_id)?;
    let records: Vec<_> = rows.into_iter().map(|r| r.record).collect();
    let frame = Frame::from_records(&dataset.schema, &records)?;
    let summary = summarize(&dataset.schema, &frame);
    store.put_summary(
        &dataset.id,
        &dataset.generation_id,
        &serde_json::to_value(summary)?,
    )
}

/// Queue a summary recomputation for the dataset's current generation.
pub(crate) fn submit_summary(store: Arc<dyn Store>, jobs: &dyn JobQueue, dataset: Dataset) {
    let name = format!("summarize {}", dataset.id);
    jobs.submit(
        &name,
        Box::new(move || {
            if let Err(err) = refresh(store.as_ref(), &dataset) {
                log::warn!("summary of dataset {} failed: {err}", dataset.id);
            }
        }),
    );
}
