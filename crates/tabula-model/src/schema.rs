use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;

use crate::error::{ModelError, ModelResult};
use crate::frame::Frame;
use crate::slug::{assign_slugs, unique_slug};
use crate::value::Value;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SimpleType {
    Numeric,
    String,
    Boolean,
    Datetime,
}

impl SimpleType {
    pub fn as_str(self) -> &'static str {
        match self {
            SimpleType::Numeric => "numeric",
            SimpleType::String => "string",
            SimpleType::Boolean => "boolean",
            SimpleType::Datetime => "datetime",
        }
    }

    /// The type a single non-null value carries on its own.
    pub fn of(value: &Value) -> Option<SimpleType> {
        match value {
            Value::Null => None,
            Value::Boolean(_) => Some(SimpleType::Boolean),
            Value::Number(_) => Some(SimpleType::Numeric),
            Value::Text(_) => Some(SimpleType::String),
            Value::DateTime(_) => Some(SimpleType::Datetime),
        }
    }

    pub fn default_role(self) -> OlapRole {
        match self {
            SimpleType::Numeric => OlapRole::Measure,
            _ => OlapRole::Dimension,
        }
    }
}

impl fmt::Display for SimpleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OlapRole {
    Dimension,
    Measure,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSchema {
    pub label: String,
    pub simpletype: SimpleType,
    pub olap_role: OlapRole,
}

impl ColumnSchema {
    pub fn new(label: impl Into<String>, simpletype: SimpleType) -> Self {
        Self {
            label: label.into(),
            simpletype,
            olap_role: simpletype.default_role(),
        }
    }

    pub fn with_role(mut self, olap_role: OlapRole) -> Self {
        self.olap_role = olap_role;
        self
    }

    pub fn is_dimension(&self) -> bool {
        self.olap_role == OlapRole::Dimension
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct SchemaEntry {
    name: String,
    #[serde(flatten)]
    column: ColumnSchema,
}

/// Ordered mapping from column key (a slug) to its declared type, role and display label.
///
/// Once a key is present its `simpletype` never changes; see [`Schema::extend`].
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "Vec<SchemaEntry>", into = "Vec<SchemaEntry>")]
pub struct Schema {
    columns: Vec<(String, ColumnSchema)>,
    index: HashMap<String, usize>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Infer a schema from the first `sample_rows` rows of `frame`.
    ///
    /// Frame column names are treated as display labels; keys are freshly assigned slugs.
    pub fn build(frame: &Frame, sample_rows: usize) -> Schema {
        let labels: Vec<&str> = frame.columns().iter().map(String::as_str).collect();
        let slugs = assign_slugs(labels.iter().copied(), &HashSet::new());

        let mut schema = Schema::new();
        for (idx, (label, slug)) in labels.iter().zip(slugs).enumerate() {
            let sample = frame
                .rows()
                .iter()
                .take(sample_rows)
                .filter_map(|row| row.get(idx));
            let simpletype = infer_simpletype(sample).unwrap_or(SimpleType::String);
            schema.insert_unchecked(slug, ColumnSchema::new(*label, simpletype));
        }
        schema
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|(k, _)| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ColumnSchema)> {
        self.columns.iter().map(|(k, c)| (k.as_str(), c))
    }

    pub fn get(&self, key: &str) -> Option<&ColumnSchema> {
        self.index.get(key).map(|&idx| &self.columns[idx].1)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.index.contains_key(key)
    }

    /// Append a new column. Fails if `key` or its label is already taken.
    pub fn push(&mut self, key: impl Into<String>, column: ColumnSchema) -> ModelResult<()> {
        let key = key.into();
        if self.index.contains_key(&key) {
            return Err(ModelError::DuplicateColumn(key));
        }
        if self.has_label(&column.label) {
            return Err(ModelError::DuplicateLabel(column.label));
        }
        self.insert_unchecked(key, column);
        Ok(())
    }

    pub fn has_label(&self, label: &str) -> bool {
        self.columns.iter().any(|(_, c)| c.label == label)
    }

    /// Add the columns in `new_columns` that are not yet present.
    ///
    /// Re-declaring an existing column with the same simpletype is a no-op; declaring it with a
    /// different one fails with [`ModelError::SchemaConflict`] and leaves the schema untouched.
    /// A new column whose label is already used fails with [`ModelError::DuplicateLabel`].
    /// Returns the keys that were added.
    pub fn extend(
        &mut self,
        new_columns: impl IntoIterator<Item = (String, ColumnSchema)>,
    ) -> ModelResult<Vec<String>> {
        let new_columns: Vec<(String, ColumnSchema)> = new_columns.into_iter().collect();
        let mut new_labels = HashSet::new();
        for (key, column) in &new_columns {
            match self.get(key) {
                Some(existing) if existing.simpletype != column.simpletype => {
                    return Err(ModelError::SchemaConflict {
                        column: key.clone(),
                        existing: existing.simpletype,
                        requested: column.simpletype,
                    });
                }
                Some(_) => {}
                None => {
                    if self.has_label(&column.label) || !new_labels.insert(column.label.as_str()) {
                        return Err(ModelError::DuplicateLabel(column.label.clone()));
                    }
                }
            }
        }

        let mut added = Vec::new();
        for (key, column) in new_columns {
            if self.contains(&key) {
                continue;
            }
            added.push(key.clone());
            self.insert_unchecked(key, column);
        }
        Ok(added)
    }

    /// Remove a column. Only derived (calculated) columns are ever removed.
    pub fn remove_column(&mut self, key: &str) -> Option<ColumnSchema> {
        let idx = self.index.remove(key)?;
        let (_, column) = self.columns.remove(idx);
        self.reindex();
        Some(column)
    }

    /// Resolve a formula identifier to a column key: exact key first, then a unique label.
    pub fn resolve(&self, identifier: &str) -> ModelResult<&str> {
        if let Some(&idx) = self.index.get(identifier) {
            return Ok(self.columns[idx].0.as_str());
        }

        let candidates: Vec<&str> = self
            .columns
            .iter()
            .filter(|(_, c)| c.label == identifier)
            .map(|(k, _)| k.as_str())
            .collect();
        match candidates.as_slice() {
            [] => Err(ModelError::UnknownColumn(identifier.to_string())),
            [key] => Ok(key),
            _ => Err(ModelError::AmbiguousIdentifier {
                identifier: identifier.to_string(),
                candidates: candidates.iter().map(|s| s.to_string()).collect(),
            }),
        }
    }

    /// Map every display label to its storage key.
    ///
    /// Labels are unique within a schema, so the mapping is a bijection onto the keys.
    pub fn labels_to_slugs(&self) -> HashMap<String, String> {
        let mapping: HashMap<String, String> = self
            .columns
            .iter()
            .map(|(key, column)| (column.label.clone(), key.clone()))
            .collect();
        debug_assert_eq!(mapping.len(), self.columns.len(), "duplicate column labels");
        mapping
    }

    pub fn slug_to_label(&self, key: &str) -> Option<&str> {
        self.get(key).map(|c| c.label.as_str())
    }

    /// A slug for `label` that does not collide with any existing key.
    pub fn new_column_key(&self, label: &str) -> String {
        unique_slug(label, |candidate| self.contains(candidate))
    }

    /// Columns with [`SimpleType::Datetime`].
    pub fn datetime_columns(&self) -> impl Iterator<Item = (&str, &ColumnSchema)> {
        self.iter()
            .filter(|(_, c)| c.simpletype == SimpleType::Datetime)
    }

    fn insert_unchecked(&mut self, key: String, column: ColumnSchema) {
        self.index.insert(key.clone(), self.columns.len());
        self.columns.push((key, column));
    }

    fn reindex(&mut self) {
        self.index = self
            .columns
            .iter()
            .enumerate()
            .map(|(idx, (k, _))| (k.clone(), idx))
            .collect();
    }
}

/// Infer the simpletype shared by all non-null `values`.
///
/// Returns `None` when every value is null. Mixed types fall back to [`SimpleType::String`].
pub fn infer_simpletype<'a>(values: impl IntoIterator<Item = &'a Value>) -> Option<SimpleType> {
    let mut inferred: Option<SimpleType> = None;
    for value in values {
        let Some(ty) = SimpleType::of(value) else {
            continue;
        };
        match inferred {
            None => inferred = Some(ty),
            Some(prev) if prev == ty => {}
            Some(_) => return Some(SimpleType::String),
        }
    }
    inferred
}

impl From<Vec<SchemaEntry>> for Schema {
    fn from(entries: Vec<SchemaEntry>) -> Self {
        let mut schema = Schema::new();
        for entry in entries {
            // First declaration wins; later duplicates cannot retype or relabel a column.
            if !schema.contains(&entry.name) && !schema.has_label(&entry.column.label) {
                schema.insert_unchecked(entry.name, entry.column);
            }
        }
        schema
    }
}

impl From<Schema> for Vec<SchemaEntry> {
    fn from(schema: Schema) -> Self {
        schema
            .columns
            .into_iter()
            .map(|(name, column)| SchemaEntry { name, column })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sample_schema() -> Schema {
        let mut schema = Schema::new();
        schema
            .push("price", ColumnSchema::new("Price", SimpleType::Numeric))
            .unwrap();
        schema
            .push("region", ColumnSchema::new("Region", SimpleType::String))
            .unwrap();
        schema
    }

    #[test]
    fn build_infers_types_roles_and_slugs() {
        let mut frame = Frame::new(vec!["Net Income", "net-income", "Region", "Empty"]).unwrap();
        frame
            .push_row(vec![1.into(), 2.5.into(), "east".into(), Value::Null])
            .unwrap();
        frame
            .push_row(vec![3.into(), Value::Null, "west".into(), Value::Null])
            .unwrap();

        let schema = Schema::build(&frame, 100);
        let keys: Vec<&str> = schema.keys().collect();
        assert_eq!(keys, vec!["net_income", "net_income_1", "region", "empty"]);

        let net = schema.get("net_income").unwrap();
        assert_eq!(net.label, "Net Income");
        assert_eq!(net.simpletype, SimpleType::Numeric);
        assert_eq!(net.olap_role, OlapRole::Measure);

        let region = schema.get("region").unwrap();
        assert_eq!(region.simpletype, SimpleType::String);
        assert_eq!(region.olap_role, OlapRole::Dimension);

        assert_eq!(schema.get("empty").unwrap().simpletype, SimpleType::String);
    }

    #[test]
    fn extend_adds_only_new_columns() {
        let mut schema = sample_schema();
        let added = schema
            .extend(vec![
                ("price".to_string(), ColumnSchema::new("Price", SimpleType::Numeric)),
                ("qty".to_string(), ColumnSchema::new("Qty", SimpleType::Numeric)),
            ])
            .unwrap();
        assert_eq!(added, vec!["qty".to_string()]);
        assert_eq!(schema.len(), 3);
    }

    #[test]
    fn extend_refuses_to_retype_and_changes_nothing() {
        let mut schema = sample_schema();
        let err = schema
            .extend(vec![
                ("qty".to_string(), ColumnSchema::new("Qty", SimpleType::Numeric)),
                ("price".to_string(), ColumnSchema::new("Price", SimpleType::String)),
            ])
            .unwrap_err();
        assert_eq!(
            err,
            ModelError::SchemaConflict {
                column: "price".into(),
                existing: SimpleType::Numeric,
                requested: SimpleType::String,
            }
        );
        assert!(!schema.contains("qty"));
    }

    #[test]
    fn resolve_prefers_keys_then_unique_labels() {
        let mut schema = sample_schema();
        assert_eq!(schema.resolve("price").unwrap(), "price");
        assert_eq!(schema.resolve("Region").unwrap(), "region");
        assert!(matches!(
            schema.resolve("nope"),
            Err(ModelError::UnknownColumn(name)) if name == "nope"
        ));

        schema
            .push("region_1", ColumnSchema::new("Zone", SimpleType::String))
            .unwrap();
        assert_eq!(schema.resolve("Zone").unwrap(), "region_1");
    }

    #[test]
    fn labels_stay_unique() {
        let mut schema = sample_schema();
        assert_eq!(
            schema.push("price_1", ColumnSchema::new("Price", SimpleType::Numeric)),
            Err(ModelError::DuplicateLabel("Price".into()))
        );
        assert_eq!(
            schema.extend(vec![
                ("cost".to_string(), ColumnSchema::new("Cost", SimpleType::Numeric)),
                ("cost_1".to_string(), ColumnSchema::new("Cost", SimpleType::Numeric)),
            ]),
            Err(ModelError::DuplicateLabel("Cost".into()))
        );
        assert_eq!(schema.len(), 2);

        let document = serde_json::json!([
            {"name": "a", "label": "Same", "simpletype": "numeric", "olap_role": "measure"},
            {"name": "b", "label": "Same", "simpletype": "numeric", "olap_role": "measure"},
        ]);
        let schema: Schema = serde_json::from_value(document).unwrap();
        assert_eq!(schema.keys().collect::<Vec<_>>(), vec!["a"]);
        assert_eq!(schema.labels_to_slugs().len(), schema.len());
    }

    #[test]
    fn serde_preserves_column_order() {
        let schema = sample_schema();
        let json = serde_json::to_value(&schema).unwrap();
        assert_eq!(
            json,
            serde_json::json!([
                {"name": "price", "label": "Price", "simpletype": "numeric", "olap_role": "measure"},
                {"name": "region", "label": "Region", "simpletype": "string", "olap_role": "dimension"},
            ])
        );
        let back: Schema = serde_json::from_value(json).unwrap();
        assert_eq!(back, schema);
    }

    #[test]
    fn remove_column_reindexes() {
        let mut schema = sample_schema();
        schema.remove_column("price").unwrap();
        assert_eq!(schema.resolve("region").unwrap(), "region");
        assert!(schema.get("price").is_none());
        assert_eq!(schema.keys().collect::<Vec<_>>(), vec!["region"]);
    }
}
