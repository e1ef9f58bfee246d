//! Structured row queries: filter documents, projections and ordering.
//!
//! Filters use a document syntax with implicit equality (`{"region": "east"}`), per-field
//! operators (`$eq $ne $gt $gte $lt $lte $in $nin $exists`) and top-level `$and`, `$or` and
//! `$nor` lists. Values may use the extended encoding (`{"$date": millis}`, `{"$oid": hex}`).

use std::cmp::Ordering;
use tabula_model::{is_extended_literal, translate_timestamp_filter, Record, Schema, Value};

use crate::error::{Result, StorageError};

/// A find request as it arrives from a client: every part is optional text.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FindQuery {
    pub query: Option<String>,
    pub select: Option<String>,
    pub limit: Option<usize>,
    /// Comma-separated columns; a `-` prefix sorts descending.
    pub order_by: Option<String>,
}

impl FindQuery {
    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = Some(query.into());
        self
    }

    pub fn with_select(mut self, select: impl Into<String>) -> Self {
        self.select = Some(select.into());
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_order_by(mut self, order_by: impl Into<String>) -> Self {
        self.order_by = Some(order_by.into());
        self
    }

    /// Decode every part against `schema`, translating epoch-second filters on datetime columns.
    pub fn compile(&self, schema: &Schema) -> Result<CompiledQuery> {
        let filter = match non_empty(&self.query) {
            None => Filter::And(Vec::new()),
            Some(text) => {
                let doc: serde_json::Value = serde_json::from_str(text)
                    .map_err(|e| StorageError::decode("query", e.to_string()))?;
                let doc = translate_timestamp_filter(doc, schema)
                    .map_err(|e| StorageError::decode("query", e.to_string()))?;
                Filter::parse(&doc, schema).map_err(|e| StorageError::decode("query", e))?
            }
        };

        let projection = match non_empty(&self.select) {
            None => Projection::All,
            Some(text) => {
                let doc: serde_json::Value = serde_json::from_str(text)
                    .map_err(|e| StorageError::decode("select", e.to_string()))?;
                Projection::parse(&doc, schema).map_err(|e| StorageError::decode("select", e))?
            }
        };

        let order = match non_empty(&self.order_by) {
            None => Vec::new(),
            Some(text) => parse_order(text, schema),
        };

        Ok(CompiledQuery {
            filter,
            projection,
            order,
            limit: self.limit,
        })
    }
}

fn non_empty(text: &Option<String>) -> Option<&str> {
    text.as_deref().map(str::trim).filter(|t| !t.is_empty())
}

/// Map a client-supplied name to a schema key, keeping unknown names as they are.
fn column_key(name: &str, schema: &Schema) -> String {
    schema
        .resolve(name)
        .map(str::to_string)
        .unwrap_or_else(|_| name.to_string())
}

#[derive(Clone, Debug, PartialEq)]
pub struct CompiledQuery {
    pub filter: Filter,
    pub projection: Projection,
    pub order: Vec<SortKey>,
    pub limit: Option<usize>,
}

impl CompiledQuery {
    /// Filter, sort, limit and project `records`.
    pub fn apply(&self, records: impl IntoIterator<Item = Record>) -> Vec<Record> {
        let mut out: Vec<Record> = records
            .into_iter()
            .filter(|r| self.filter.matches(r))
            .collect();
        if !self.order.is_empty() {
            out.sort_by(|a, b| compare_records(&self.order, a, b));
        }
        if let Some(limit) = self.limit {
            out.truncate(limit);
        }
        out.into_iter().map(|r| self.projection.apply(r)).collect()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Predicate {
    Eq(Value),
    Ne(Value),
    Gt(Value),
    Gte(Value),
    Lt(Value),
    Lte(Value),
    In(Vec<Value>),
    Nin(Vec<Value>),
    Exists(bool),
}

#[derive(Clone, Debug, PartialEq)]
pub enum Filter {
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Nor(Vec<Filter>),
    Field { column: String, predicate: Predicate },
}

impl Filter {
    pub fn parse(doc: &serde_json::Value, schema: &Schema) -> std::result::Result<Filter, String> {
        let serde_json::Value::Object(map) = doc else {
            return Err(format!("expected a filter object, found {doc}"));
        };

        let mut clauses = Vec::with_capacity(map.len());
        for (key, cond) in map {
            match key.as_str() {
                "$and" | "$or" | "$nor" => {
                    let serde_json::Value::Array(items) = cond else {
                        return Err(format!("{key} expects an array of filters"));
                    };
                    let subs = items
                        .iter()
                        .map(|item| Filter::parse(item, schema))
                        .collect::<std::result::Result<Vec<_>, _>>()?;
                    clauses.push(match key.as_str() {
                        "$and" => Filter::And(subs),
                        "$or" => Filter::Or(subs),
                        _ => Filter::Nor(subs),
                    });
                }
                op if op.starts_with('$') => return Err(format!("unknown operator {op}")),
                field => parse_condition(column_key(field, schema), cond, &mut clauses)?,
            }
        }

        if clauses.len() == 1 {
            if let Some(only) = clauses.pop() {
                return Ok(only);
            }
        }
        Ok(Filter::And(clauses))
    }

    pub fn matches(&self, record: &Record) -> bool {
        match self {
            Filter::And(all) => all.iter().all(|f| f.matches(record)),
            Filter::Or(any) => any.iter().any(|f| f.matches(record)),
            Filter::Nor(none) => !none.iter().any(|f| f.matches(record)),
            Filter::Field { column, predicate } => {
                let value = record.get(column).unwrap_or(&Value::Null);
                match predicate {
                    Predicate::Eq(v) => value == v,
                    Predicate::Ne(v) => value != v,
                    Predicate::Gt(v) => compare(value, v) == Some(Ordering::Greater),
                    Predicate::Gte(v) => {
                        matches!(compare(value, v), Some(Ordering::Greater | Ordering::Equal))
                    }
                    Predicate::Lt(v) => compare(value, v) == Some(Ordering::Less),
                    Predicate::Lte(v) => {
                        matches!(compare(value, v), Some(Ordering::Less | Ordering::Equal))
                    }
                    Predicate::In(vs) => vs.contains(value),
                    Predicate::Nin(vs) => !vs.contains(value),
                    Predicate::Exists(expected) => !value.is_null() == *expected,
                }
            }
        }
    }
}

/// Ordering between two values of the same kind; mixed kinds and nulls never compare.
fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    if a.is_null() || b.is_null() || std::mem::discriminant(a) != std::mem::discriminant(b) {
        return None;
    }
    Some(a.cmp(b))
}

fn scalar(value: &serde_json::Value) -> std::result::Result<Value, String> {
    Value::from_json(value).map_err(|e| e.to_string())
}

fn parse_condition(
    column: String,
    cond: &serde_json::Value,
    out: &mut Vec<Filter>,
) -> std::result::Result<(), String> {
    let ops = match cond {
        serde_json::Value::Object(ops) if !is_extended_literal(cond) => ops,
        _ => {
            out.push(Filter::Field {
                column,
                predicate: Predicate::Eq(scalar(cond)?),
            });
            return Ok(());
        }
    };

    for (op, operand) in ops {
        let predicate = match op.as_str() {
            "$eq" => Predicate::Eq(scalar(operand)?),
            "$ne" => Predicate::Ne(scalar(operand)?),
            "$gt" => Predicate::Gt(scalar(operand)?),
            "$gte" => Predicate::Gte(scalar(operand)?),
            "$lt" => Predicate::Lt(scalar(operand)?),
            "$lte" => Predicate::Lte(scalar(operand)?),
            "$in" | "$nin" => {
                let serde_json::Value::Array(items) = operand else {
                    return Err(format!("{op} expects an array"));
                };
                let values = items
                    .iter()
                    .map(scalar)
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                if op == "$in" {
                    Predicate::In(values)
                } else {
                    Predicate::Nin(values)
                }
            }
            "$exists" => match operand {
                serde_json::Value::Bool(b) => Predicate::Exists(*b),
                other => return Err(format!("$exists expects a boolean, found {other}")),
            },
            other => return Err(format!("unknown operator {other} on {column}")),
        };
        out.push(Filter::Field {
            column: column.clone(),
            predicate,
        });
    }
    Ok(())
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Projection {
    All,
    Include(Vec<String>),
    Exclude(Vec<String>),
}

impl Projection {
    pub fn parse(doc: &serde_json::Value, schema: &Schema) -> std::result::Result<Self, String> {
        let serde_json::Value::Object(map) = doc else {
            return Err(format!("expected a projection object, found {doc}"));
        };
        if map.is_empty() {
            return Ok(Projection::All);
        }

        let mut include = Vec::new();
        let mut exclude = Vec::new();
        for (name, flag) in map {
            let keep = match flag {
                serde_json::Value::Bool(b) => *b,
                serde_json::Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
                other => return Err(format!("projection flag for {name} must be 0/1, found {other}")),
            };
            let key = column_key(name, schema);
            if keep {
                include.push(key);
            } else {
                exclude.push(key);
            }
        }
        match (include.is_empty(), exclude.is_empty()) {
            (false, true) => Ok(Projection::Include(include)),
            (true, false) => Ok(Projection::Exclude(exclude)),
            _ => Err("cannot mix inclusion and exclusion".to_string()),
        }
    }

    pub fn apply(&self, mut record: Record) -> Record {
        match self {
            Projection::All => record,
            Projection::Include(keep) => {
                record.retain(|k, _| keep.contains(k));
                record
            }
            Projection::Exclude(drop) => {
                record.retain(|k, _| !drop.contains(k));
                record
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SortKey {
    pub column: String,
    pub descending: bool,
}

fn parse_order(text: &str, schema: &Schema) -> Vec<SortKey> {
    text.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| match part.strip_prefix('-') {
            Some(column) => SortKey {
                column: column_key(column.trim(), schema),
                descending: true,
            },
            None => SortKey {
                column: column_key(part, schema),
                descending: false,
            },
        })
        .collect()
}

fn compare_records(order: &[SortKey], a: &Record, b: &Record) -> Ordering {
    for key in order {
        let av = a.get(&key.column).unwrap_or(&Value::Null);
        let bv = b.get(&key.column).unwrap_or(&Value::Null);
        let ord = if key.descending { bv.cmp(av) } else { av.cmp(bv) };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}
