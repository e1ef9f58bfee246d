//! Row-wise and grouped formula evaluation.
//!
//! Rows are evaluated inside a *partition*: the whole frame when ungrouped, or the rows sharing
//! one group key. Aggregates always range over the current partition and are computed once per
//! partition; scalar expressions are evaluated per row. A grouped evaluation produces one value per
//! partition which is then broadcast to every row of that partition, so the result is always
//! aligned 1:1 with the frame's rows.

use chrono::Datelike;
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use tabula_model::{Frame, Schema, SimpleType, Value};

use crate::error::{FormulaError, FormulaResult};
use crate::functions::Function;
use crate::parser::{parse, BinaryOp, Expr, UnaryOp};
use crate::typecheck::{check, Node};

/// A parsed, resolved and type-checked formula.
#[derive(Clone, Debug, PartialEq)]
pub struct Formula {
    text: String,
    expr: Expr,
    root: Node,
    result_type: SimpleType,
    references: Vec<String>,
    aggregate_slots: usize,
}

impl Formula {
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn expr(&self) -> &Expr {
        &self.expr
    }

    /// Simpletype of the derived column. Always-null formulas are typed as strings.
    pub fn result_type(&self) -> SimpleType {
        self.result_type
    }

    /// Schema keys of every referenced column, in first-reference order.
    pub fn references(&self) -> &[String] {
        &self.references
    }

    pub fn has_aggregates(&self) -> bool {
        self.aggregate_slots > 0
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct FormulaEvaluator;

impl FormulaEvaluator {
    pub fn new() -> Self {
        Self
    }

    /// Parse `text` and check it against `schema`.
    ///
    /// Every identifier must resolve to a schema column; the first one that does not is named in
    /// [`FormulaError::UnknownIdentifier`].
    pub fn validate(&self, text: &str, schema: &Schema) -> FormulaResult<Formula> {
        let expr = parse(text)?;
        let checked = check(&expr, schema)?;
        Ok(Formula {
            text: text.to_string(),
            expr,
            root: checked.root,
            result_type: checked.ty.unwrap_or(SimpleType::String),
            references: checked.references,
            aggregate_slots: checked.aggregate_slots,
        })
    }

    /// Evaluate `formula` over every row of `frame`, whose columns are schema keys.
    ///
    /// With a `group`, the group identifier must resolve to a dimension column; otherwise the
    /// evaluation fails with [`FormulaError::Group`].
    pub fn evaluate(
        &self,
        formula: &Formula,
        frame: &Frame,
        group: Option<&str>,
        schema: &Schema,
    ) -> FormulaResult<Vec<Value>> {
        let mut columns = HashMap::with_capacity(formula.references.len());
        for key in &formula.references {
            let idx = frame.column_idx(key).ok_or_else(|| {
                FormulaError::Eval(format!("column {key} is missing from the row data"))
            })?;
            columns.insert(key.as_str(), idx);
        }

        let Some(group) = group else {
            let rows: Vec<usize> = (0..frame.row_count()).collect();
            let mut partition = Partition::new(frame, &columns, &rows, formula.aggregate_slots);
            let mut out = Vec::with_capacity(rows.len());
            for &row in &rows {
                out.push(partition.eval(&formula.root, Some(row))?);
            }
            log::debug!("evaluated {:?} over {} rows", formula.text, out.len());
            return Ok(out);
        };

        let group_idx = group_column(group, frame, schema)?;
        let partitions = partition_rows(frame, group_idx);
        let mut out = vec![Value::Null; frame.row_count()];
        for rows in &partitions {
            let mut partition = Partition::new(frame, &columns, rows, formula.aggregate_slots);
            let value = partition.eval(&formula.root, None)?;
            for &row in rows {
                out[row] = value.clone();
            }
        }
        log::debug!(
            "evaluated {:?} over {} rows in {} groups of {group}",
            formula.text,
            out.len(),
            partitions.len()
        );
        Ok(out)
    }
}

fn group_column(group: &str, frame: &Frame, schema: &Schema) -> FormulaResult<usize> {
    let key = schema
        .resolve(group)
        .map_err(|_| FormulaError::Group(format!("group column {group} does not exist")))?;
    let is_dimension = schema.get(key).is_some_and(|c| c.is_dimension());
    if !is_dimension {
        return Err(FormulaError::Group(format!(
            "group column {group} is not a dimension"
        )));
    }
    frame
        .column_idx(key)
        .ok_or_else(|| FormulaError::Group(format!("group column {group} has no row data")))
}

/// Row indices per distinct group key, in order of first appearance.
fn partition_rows(frame: &Frame, group_idx: usize) -> Vec<Vec<usize>> {
    let mut index: HashMap<&Value, usize> = HashMap::new();
    let mut partitions: Vec<Vec<usize>> = Vec::new();
    for (row, values) in frame.rows().iter().enumerate() {
        let next = partitions.len();
        let slot = *index.entry(&values[group_idx]).or_insert(next);
        if slot == next {
            partitions.push(Vec::new());
        }
        partitions[slot].push(row);
    }
    partitions
}

struct Partition<'a> {
    frame: &'a Frame,
    columns: &'a HashMap<&'a str, usize>,
    rows: &'a [usize],
    cache: Vec<Option<Value>>,
}

impl<'a> Partition<'a> {
    fn new(
        frame: &'a Frame,
        columns: &'a HashMap<&'a str, usize>,
        rows: &'a [usize],
        aggregate_slots: usize,
    ) -> Self {
        Self {
            frame,
            columns,
            rows,
            cache: vec![None; aggregate_slots],
        }
    }

    /// Evaluate `node` for `current`, or once for the whole partition when `current` is `None`.
    fn eval(&mut self, node: &Node, current: Option<usize>) -> FormulaResult<Value> {
        match node {
            Node::Literal(v) => Ok(v.clone()),
            Node::Column(key) => self.column(key, current),
            Node::Unary { op, expr } => {
                let v = self.eval(expr, current)?;
                Ok(match (op, v) {
                    (UnaryOp::Negate, Value::Number(n)) => Value::finite(-n.0),
                    (UnaryOp::Not, Value::Boolean(b)) => Value::Boolean(!b),
                    _ => Value::Null,
                })
            }
            Node::Binary { op, left, right } => {
                let l = self.eval(left, current)?;
                let r = self.eval(right, current)?;
                Ok(binary(*op, l, r))
            }
            Node::Scalar { func, args } => self.scalar(*func, args, current),
            Node::Aggregate { slot, func, args } => {
                if let Some(cached) = &self.cache[*slot] {
                    return Ok(cached.clone());
                }
                let value = self.aggregate(*func, args)?;
                self.cache[*slot] = Some(value.clone());
                Ok(value)
            }
        }
    }

    fn column(&self, key: &str, current: Option<usize>) -> FormulaResult<Value> {
        let idx = self.columns.get(key).copied().ok_or_else(|| {
            FormulaError::Eval(format!("column {key} is missing from the row data"))
        })?;
        let at = |row: usize| self.frame.value_by_idx(row, idx).cloned().unwrap_or(Value::Null);

        if let Some(row) = current {
            return Ok(at(row));
        }

        // Outside an aggregate in a grouped evaluation: only a value shared by the whole group
        // is meaningful.
        let mut rows = self.rows.iter().copied();
        let first = rows.next().map(at).unwrap_or(Value::Null);
        if rows.any(|row| at(row) != first) {
            return Err(FormulaError::Group(format!(
                "column {key} varies within a group; wrap it in an aggregate"
            )));
        }
        Ok(first)
    }

    fn collect(&mut self, arg: &Node) -> FormulaResult<Vec<Value>> {
        let rows = self.rows;
        let mut values = Vec::with_capacity(rows.len());
        for &row in rows {
            let v = self.eval(arg, Some(row))?;
            if !v.is_null() {
                values.push(v);
            }
        }
        Ok(values)
    }

    fn aggregate(&mut self, func: Function, args: &[Node]) -> FormulaResult<Value> {
        let Some(first) = args.first() else {
            // `count()` counts rows.
            return Ok(Value::from(self.rows.len() as i64));
        };
        let values = self.collect(first)?;

        let value = match func {
            Function::Sum => Value::finite(numbers(&values).sum()),
            Function::Mean => {
                if values.is_empty() {
                    Value::Null
                } else {
                    Value::finite(numbers(&values).sum::<f64>() / values.len() as f64)
                }
            }
            Function::Median => median(numbers(&values).collect()),
            Function::Min => values.iter().min().cloned().unwrap_or(Value::Null),
            Function::Max => values.iter().max().cloned().unwrap_or(Value::Null),
            Function::Count => Value::from(values.len() as i64),
            Function::DistinctCount => {
                Value::from(values.iter().collect::<HashSet<_>>().len() as i64)
            }
            Function::Ratio => {
                let numerator: f64 = numbers(&values).sum();
                let denominator: f64 = match args.get(1) {
                    Some(arg) => numbers(&self.collect(arg)?).sum(),
                    None => return Ok(Value::Null),
                };
                Value::finite(numerator / denominator)
            }
            scalar => {
                return Err(FormulaError::Eval(format!(
                    "{} is not an aggregate",
                    scalar.name()
                )))
            }
        };
        Ok(value)
    }

    fn scalar(
        &mut self,
        func: Function,
        args: &[Node],
        current: Option<usize>,
    ) -> FormulaResult<Value> {
        let value = match func {
            Function::If => {
                let cond = self.eval(&args[0], current)?;
                if cond.as_bool() == Some(true) {
                    self.eval(&args[1], current)?
                } else if let Some(otherwise) = args.get(2) {
                    self.eval(otherwise, current)?
                } else {
                    Value::Null
                }
            }
            Function::Coalesce => {
                for arg in args {
                    let v = self.eval(arg, current)?;
                    if !v.is_null() {
                        return Ok(v);
                    }
                }
                Value::Null
            }
            Function::IsNull => Value::Boolean(self.eval(&args[0], current)?.is_null()),
            Function::Abs => match self.eval(&args[0], current)?.as_number() {
                Some(n) => Value::finite(n.abs()),
                None => Value::Null,
            },
            Function::Round => {
                let x = self.eval(&args[0], current)?.as_number();
                let digits = match args.get(1) {
                    Some(arg) => self.eval(arg, current)?.as_number(),
                    None => Some(0.0),
                };
                match (x, digits) {
                    (Some(x), Some(digits)) => {
                        let factor = 10f64.powi(digits.trunc() as i32);
                        Value::finite((x * factor).round() / factor)
                    }
                    _ => Value::Null,
                }
            }
            Function::Year | Function::Month | Function::Day => {
                match self.eval(&args[0], current)?.as_datetime() {
                    Some(dt) => Value::from(match func {
                        Function::Year => i64::from(dt.year()),
                        Function::Month => i64::from(dt.month()),
                        _ => i64::from(dt.day()),
                    }),
                    None => Value::Null,
                }
            }
            aggregate => {
                return Err(FormulaError::Eval(format!(
                    "{} is an aggregate",
                    aggregate.name()
                )))
            }
        };
        Ok(value)
    }
}

fn numbers(values: &[Value]) -> impl Iterator<Item = f64> + '_ {
    values.iter().filter_map(Value::as_number)
}

fn median(mut values: Vec<f64>) -> Value {
    if values.is_empty() {
        return Value::Null;
    }
    values.sort_by(f64::total_cmp);
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        Value::finite((values[mid - 1] + values[mid]) / 2.0)
    } else {
        Value::finite(values[mid])
    }
}

fn binary(op: BinaryOp, l: Value, r: Value) -> Value {
    match op {
        BinaryOp::And => match (l.as_bool(), r.as_bool()) {
            (Some(false), _) | (_, Some(false)) => Value::Boolean(false),
            (Some(true), Some(true)) => Value::Boolean(true),
            _ => Value::Null,
        },
        BinaryOp::Or => match (l.as_bool(), r.as_bool()) {
            (Some(true), _) | (_, Some(true)) => Value::Boolean(true),
            (Some(false), Some(false)) => Value::Boolean(false),
            _ => Value::Null,
        },
        BinaryOp::Concat => {
            let text = |v: &Value| if v.is_null() { String::new() } else { v.to_string() };
            Value::Text(text(&l) + &text(&r))
        }
        _ if l.is_null() || r.is_null() => Value::Null,
        BinaryOp::Equals => Value::Boolean(l == r),
        BinaryOp::NotEquals => Value::Boolean(l != r),
        BinaryOp::Less => Value::Boolean(l.cmp(&r) == Ordering::Less),
        BinaryOp::LessEquals => Value::Boolean(l.cmp(&r) != Ordering::Greater),
        BinaryOp::Greater => Value::Boolean(l.cmp(&r) == Ordering::Greater),
        BinaryOp::GreaterEquals => Value::Boolean(l.cmp(&r) != Ordering::Less),
        arithmetic => match (l.as_number(), r.as_number()) {
            (Some(a), Some(b)) => Value::finite(match arithmetic {
                BinaryOp::Add => a + b,
                BinaryOp::Subtract => a - b,
                BinaryOp::Multiply => a * b,
                BinaryOp::Divide => a / b,
                BinaryOp::Modulo => a % b,
                _ => a.powf(b),
            }),
            _ => Value::Null,
        },
    }
}
