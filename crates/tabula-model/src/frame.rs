use std::collections::{BTreeMap, HashMap};

use crate::dates::parse_datetime;
use crate::error::{ModelError, ModelResult};
use crate::schema::{Schema, SimpleType};
use crate::value::Value;

/// A loosely-typed row as it arrives from ingestion or leaves storage.
pub type Record = BTreeMap<String, Value>;

/// Row-major table with a fixed, ordered column layout.
///
/// Every row has exactly one value per column; [`Frame::conform`] additionally checks each value
/// against a [`Schema`].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Frame {
    columns: Vec<String>,
    column_index: HashMap<String, usize>,
    rows: Vec<Vec<Value>>,
}

impl Frame {
    pub fn new(columns: Vec<impl Into<String>>) -> ModelResult<Self> {
        let columns: Vec<String> = columns.into_iter().map(Into::into).collect();
        let mut column_index = HashMap::with_capacity(columns.len());
        for (idx, column) in columns.iter().enumerate() {
            if column_index.insert(column.clone(), idx).is_some() {
                return Err(ModelError::DuplicateColumn(column.clone()));
            }
        }
        Ok(Self {
            columns,
            column_index,
            rows: Vec::new(),
        })
    }

    /// Build a frame laid out in schema order. Keys missing from a record become null.
    pub fn from_records(schema: &Schema, records: &[Record]) -> ModelResult<Self> {
        let mut frame = Frame::new(schema.keys().collect())?;
        for record in records {
            if let Some(unknown) = record.keys().find(|k| !frame.column_index.contains_key(*k)) {
                return Err(ModelError::UnknownColumn(unknown.clone()));
            }
            let row = frame
                .columns
                .iter()
                .map(|c| record.get(c).cloned().unwrap_or(Value::Null))
                .collect();
            frame.rows.push(row);
        }
        Ok(frame)
    }

    pub fn to_records(&self) -> Vec<Record> {
        self.rows
            .iter()
            .map(|row| {
                self.columns
                    .iter()
                    .cloned()
                    .zip(row.iter().cloned())
                    .collect()
            })
            .collect()
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    pub fn row(&self, row: usize) -> Option<&[Value]> {
        self.rows.get(row).map(Vec::as_slice)
    }

    pub fn push_row(&mut self, row: Vec<Value>) -> ModelResult<()> {
        if row.len() != self.columns.len() {
            return Err(ModelError::RowWidthMismatch {
                expected: self.columns.len(),
                actual: row.len(),
            });
        }
        self.rows.push(row);
        Ok(())
    }

    pub fn column_idx(&self, column: &str) -> Option<usize> {
        self.column_index.get(column).copied()
    }

    pub fn value(&self, row: usize, column: &str) -> Option<&Value> {
        let idx = self.column_idx(column)?;
        self.value_by_idx(row, idx)
    }

    pub fn value_by_idx(&self, row: usize, idx: usize) -> Option<&Value> {
        self.rows.get(row)?.get(idx)
    }

    pub fn column_values(&self, column: &str) -> Option<Vec<Value>> {
        let idx = self.column_idx(column)?;
        Some(self.rows.iter().map(|row| row[idx].clone()).collect())
    }

    pub fn add_column(&mut self, name: impl Into<String>, values: Vec<Value>) -> ModelResult<()> {
        let name = name.into();
        if self.column_index.contains_key(&name) {
            return Err(ModelError::DuplicateColumn(name));
        }
        if values.len() != self.rows.len() {
            return Err(ModelError::ColumnLengthMismatch {
                column: name,
                expected: self.rows.len(),
                actual: values.len(),
            });
        }

        self.column_index.insert(name.clone(), self.columns.len());
        self.columns.push(name);
        for (row, value) in self.rows.iter_mut().zip(values) {
            row.push(value);
        }
        Ok(())
    }

    /// Replace the values of an existing column.
    pub fn set_column(&mut self, name: &str, values: Vec<Value>) -> ModelResult<()> {
        let idx = self
            .column_idx(name)
            .ok_or_else(|| ModelError::UnknownColumn(name.to_string()))?;
        if values.len() != self.rows.len() {
            return Err(ModelError::ColumnLengthMismatch {
                column: name.to_string(),
                expected: self.rows.len(),
                actual: values.len(),
            });
        }
        for (row, value) in self.rows.iter_mut().zip(values) {
            row[idx] = value;
        }
        Ok(())
    }

    pub fn drop_column(&mut self, name: &str) -> ModelResult<Vec<Value>> {
        let idx = self
            .column_idx(name)
            .ok_or_else(|| ModelError::UnknownColumn(name.to_string()))?;
        self.columns.remove(idx);
        let removed = self.rows.iter_mut().map(|row| row.remove(idx)).collect();
        self.reindex();
        Ok(removed)
    }

    /// A new frame containing only `columns`, in the order given. Unknown names are skipped.
    pub fn project(&self, columns: &[&str]) -> Frame {
        let indices: Vec<(usize, &str)> = columns
            .iter()
            .filter_map(|c| self.column_idx(c).map(|idx| (idx, *c)))
            .collect();
        let names: Vec<String> = indices.iter().map(|(_, c)| c.to_string()).collect();
        let column_index = names
            .iter()
            .enumerate()
            .map(|(idx, c)| (c.clone(), idx))
            .collect();
        let rows = self
            .rows
            .iter()
            .map(|row| indices.iter().map(|(idx, _)| row[*idx].clone()).collect())
            .collect();
        Frame {
            columns: names,
            column_index,
            rows,
        }
    }

    /// Rename every column through `rename`. Fails if two columns end up with the same name.
    pub fn rename_columns(&mut self, rename: impl Fn(&str) -> String) -> ModelResult<()> {
        let renamed: Vec<String> = self.columns.iter().map(|c| rename(c)).collect();
        let mut index = HashMap::with_capacity(renamed.len());
        for (idx, column) in renamed.iter().enumerate() {
            if index.insert(column.clone(), idx).is_some() {
                return Err(ModelError::DuplicateColumn(column.clone()));
            }
        }
        self.columns = renamed;
        self.column_index = index;
        Ok(())
    }

    /// Validate every value against `schema`, coercing text into the declared type where the
    /// conversion is lossless.
    pub fn conform(&mut self, schema: &Schema) -> ModelResult<()> {
        let mut targets = Vec::with_capacity(self.columns.len());
        for column in &self.columns {
            let declared = schema
                .get(column)
                .ok_or_else(|| ModelError::UnknownColumn(column.clone()))?;
            targets.push(declared.simpletype);
        }

        for row in &mut self.rows {
            for (idx, value) in row.iter_mut().enumerate() {
                let target = targets[idx];
                if let Some(coerced) = coerce(value, target) {
                    *value = coerced;
                } else {
                    return Err(ModelError::TypeMismatch {
                        column: self.columns[idx].clone(),
                        value: value.clone(),
                        expected: target,
                    });
                }
            }
        }
        Ok(())
    }

    fn reindex(&mut self) {
        self.column_index = self
            .columns
            .iter()
            .enumerate()
            .map(|(idx, c)| (c.clone(), idx))
            .collect();
    }
}

fn coerce(value: &Value, target: SimpleType) -> Option<Value> {
    match (value, target) {
        (Value::Null, _) => Some(Value::Null),
        (Value::Number(_), SimpleType::Numeric)
        | (Value::Boolean(_), SimpleType::Boolean)
        | (Value::DateTime(_), SimpleType::Datetime)
        | (Value::Text(_), SimpleType::String) => Some(value.clone()),
        (Value::Text(s), SimpleType::Numeric) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                return Some(Value::Null);
            }
            trimmed.parse::<f64>().ok().map(Value::finite)
        }
        (Value::Text(s), SimpleType::Boolean) => match s.trim().to_ascii_lowercase().as_str() {
            "true" => Some(Value::Boolean(true)),
            "false" => Some(Value::Boolean(false)),
            "" => Some(Value::Null),
            _ => None,
        },
        (Value::Text(s), SimpleType::Datetime) => {
            if s.trim().is_empty() {
                return Some(Value::Null);
            }
            parse_datetime(s).ok().map(Value::DateTime)
        }
        (Value::Number(_) | Value::Boolean(_) | Value::DateTime(_), SimpleType::String) => {
            Some(Value::Text(value.to_string()))
        }
        _ => None,
    }
}
