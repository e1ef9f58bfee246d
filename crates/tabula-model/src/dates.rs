//! Heuristic and schema-driven date/time recognition.
//!
//! Recognition converts whole columns or nothing: a single value that fails to parse leaves its
//! column exactly as it was. Failure is a normal outcome and is reported as
//! [`ColumnConversion::Unchanged`], never as an error.

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde_json::json;

use crate::frame::Frame;
use crate::schema::Schema;
use crate::value::{is_extended_literal, Value, DATE_KEY};

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
    "%Y/%m/%d %H:%M:%S",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %H:%M",
];

const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%Y/%m/%d",
    "%m/%d/%Y",
    "%d %B %Y",
    "%d %b %Y",
    "%B %d, %Y",
    "%b %d, %Y",
    "%B %d %Y",
    "%b %d %Y",
];

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum DateParseError {
    #[error("{0:?} is not a recognized date format")]
    Format(String),
    #[error("{0} is out of range for a date")]
    Range(String),
}

/// Outcome of attempting to convert one column.
#[derive(Clone, Debug, PartialEq)]
pub enum ColumnConversion {
    Converted(Vec<Value>),
    Unchanged,
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("cannot interpret {value} in filter on {column} as epoch seconds")]
pub struct TimestampFilterError {
    pub column: String,
    pub value: String,
}

/// Parse a single text value as a date-time.
pub fn parse_datetime(text: &str) -> Result<NaiveDateTime, DateParseError> {
    let s = text.trim();
    if s.is_empty() {
        return Err(DateParseError::Format(text.to_string()));
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.naive_utc());
    }
    for format in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, format) {
            return Ok(dt);
        }
    }
    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(s, format) {
            return Ok(midnight(date));
        }
    }

    // Compact `YYYYMMDD`. Any other run of digits is a number, not a date.
    if s.bytes().all(|b| b.is_ascii_digit()) {
        if s.len() == 8 {
            if let Ok(date) = NaiveDate::parse_from_str(s, "%Y%m%d") {
                return Ok(midnight(date));
            }
        }
        return Err(DateParseError::Range(s.to_string()));
    }

    Err(DateParseError::Format(text.to_string()))
}

fn midnight(date: NaiveDate) -> NaiveDateTime {
    date.and_time(chrono::NaiveTime::MIN)
}

/// Attempt to convert every value of a column.
///
/// Nulls, booleans and values that are already date-times pass through. Text must parse;
/// numbers are treated as out of range.
pub fn convert_column(values: &[Value]) -> ColumnConversion {
    let mut converted = Vec::with_capacity(values.len());
    for value in values {
        let next = match value {
            Value::Null | Value::Boolean(_) | Value::DateTime(_) => value.clone(),
            Value::Text(s) => match parse_datetime(s) {
                Ok(dt) => Value::DateTime(dt),
                Err(_) => return ColumnConversion::Unchanged,
            },
            Value::Number(_) => return ColumnConversion::Unchanged,
        };
        converted.push(next);
    }
    ColumnConversion::Converted(converted)
}

/// Convert every column whose values are still generic text.
///
/// Columns without any text (numeric, boolean, or already converted) are left alone, which makes
/// recognition idempotent.
pub fn recognize_dates(frame: &Frame) -> Frame {
    let candidates: Vec<String> = frame
        .columns()
        .iter()
        .enumerate()
        .filter(|(idx, _)| {
            frame
                .rows()
                .iter()
                .any(|row| matches!(row[*idx], Value::Text(_)))
        })
        .map(|(_, c)| c.clone())
        .collect();
    convert_columns(frame, &candidates)
}

/// Convert the columns that `schema` declares as datetime, matching frame columns by key or
/// display label.
pub fn recognize_dates_from_schema(schema: &Schema, frame: &Frame) -> Frame {
    let candidates: Vec<String> = schema
        .datetime_columns()
        .flat_map(|(key, column)| [key.to_string(), column.label.clone()])
        .filter(|name| frame.column_idx(name).is_some())
        .collect();
    convert_columns(frame, &candidates)
}

fn convert_columns(frame: &Frame, columns: &[String]) -> Frame {
    let mut out = frame.clone();
    for column in columns {
        let Some(values) = out.column_values(column) else {
            continue;
        };
        match convert_column(&values) {
            ColumnConversion::Converted(converted) => {
                if converted != values {
                    log::debug!("recognized dates in column {column}");
                }
                // Lengths match by construction.
                let _ = out.set_column(column, converted);
            }
            ColumnConversion::Unchanged => {}
        }
    }
    out
}

/// Rewrite filter values on datetime columns from epoch seconds into date-time literals.
///
/// Operator documents (`{"$gte": 1325376000}`) have each operand rewritten; a bare scalar is
/// rewritten itself. Clauses nested under `$and`, `$or` and `$nor` are rewritten the same way.
/// Keys that do not name a datetime column pass through.
pub fn translate_timestamp_filter(
    query: serde_json::Value,
    schema: &Schema,
) -> Result<serde_json::Value, TimestampFilterError> {
    let serde_json::Value::Object(mut map) = query else {
        return Ok(query);
    };

    for combinator in LOGICAL_OPERATORS {
        let Some(serde_json::Value::Array(clauses)) = map.get_mut(combinator) else {
            continue;
        };
        for clause in clauses.iter_mut() {
            *clause = translate_timestamp_filter(std::mem::take(clause), schema)?;
        }
    }

    for (key, column) in schema.datetime_columns() {
        for name in [key, column.label.as_str()] {
            let Some(filter) = map.get_mut(name) else {
                continue;
            };
            *filter = translate_filter_value(name, filter)?;
        }
    }
    Ok(serde_json::Value::Object(map))
}

const LOGICAL_OPERATORS: [&str; 3] = ["$and", "$or", "$nor"];

fn translate_filter_value(
    column: &str,
    filter: &serde_json::Value,
) -> Result<serde_json::Value, TimestampFilterError> {
    match filter {
        serde_json::Value::Object(ops) if !is_extended_literal(filter) => {
            let mut out = serde_json::Map::with_capacity(ops.len());
            for (op, operand) in ops {
                let translated = match operand {
                    serde_json::Value::Array(items) => serde_json::Value::Array(
                        items
                            .iter()
                            .map(|item| epoch_to_literal(column, item))
                            .collect::<Result<_, _>>()?,
                    ),
                    other => epoch_to_literal(column, other)?,
                };
                out.insert(op.clone(), translated);
            }
            Ok(serde_json::Value::Object(out))
        }
        other => epoch_to_literal(column, other),
    }
}

fn epoch_to_literal(
    column: &str,
    value: &serde_json::Value,
) -> Result<serde_json::Value, TimestampFilterError> {
    if is_extended_literal(value) || value.is_null() || value.is_boolean() {
        return Ok(value.clone());
    }
    let seconds = match value {
        serde_json::Value::Number(n) => n.as_i64(),
        serde_json::Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    };
    let millis = seconds
        .and_then(|s| s.checked_mul(1000))
        .filter(|ms| crate::value::datetime_from_millis(*ms).is_some());
    match millis {
        Some(ms) => Ok(json!({ DATE_KEY: ms })),
        None => Err(TimestampFilterError {
            column: column.to_string(),
            value: value.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ColumnSchema, SimpleType};
    use pretty_assertions::assert_eq;

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDateTime {
        midnight(NaiveDate::from_ymd_opt(y, m, d).unwrap())
    }

    #[test]
    fn parses_common_formats() {
        assert_eq!(parse_datetime("2012-01-05").unwrap(), ymd(2012, 1, 5));
        assert_eq!(parse_datetime("01/05/2012").unwrap(), ymd(2012, 1, 5));
        assert_eq!(parse_datetime("5 January 2012").unwrap(), ymd(2012, 1, 5));
        assert_eq!(parse_datetime("Jan 5, 2012").unwrap(), ymd(2012, 1, 5));
        assert_eq!(parse_datetime("20120105").unwrap(), ymd(2012, 1, 5));
        assert_eq!(
            parse_datetime("2012-01-05T10:30:00Z").unwrap(),
            ymd(2012, 1, 5) + chrono::Duration::minutes(630)
        );
    }

    #[test]
    fn rejects_non_dates() {
        assert!(matches!(parse_datetime("east"), Err(DateParseError::Format(_))));
        assert!(matches!(parse_datetime("123456"), Err(DateParseError::Range(_))));
        assert!(matches!(parse_datetime("99999999"), Err(DateParseError::Range(_))));
    }

    #[test]
    fn one_bad_value_leaves_the_column_unchanged() {
        let values = vec![Value::from("2012-01-01"), Value::from("not a date")];
        assert_eq!(convert_column(&values), ColumnConversion::Unchanged);
    }

    #[test]
    fn nulls_and_booleans_pass_through() {
        let values = vec![Value::from("2012-01-01"), Value::Null, Value::from(true)];
        assert_eq!(
            convert_column(&values),
            ColumnConversion::Converted(vec![
                Value::DateTime(ymd(2012, 1, 1)),
                Value::Null,
                Value::from(true),
            ])
        );
    }

    #[test]
    fn recognize_dates_only_touches_text_columns() {
        let mut frame = Frame::new(vec!["when", "amount", "label"]).unwrap();
        frame
            .push_row(vec!["2012-02-01".into(), 20120201.into(), "a".into()])
            .unwrap();
        frame
            .push_row(vec!["2012-02-02".into(), 20120202.into(), "b".into()])
            .unwrap();

        let out = recognize_dates(&frame);
        assert_eq!(out.value(0, "when"), Some(&Value::DateTime(ymd(2012, 2, 1))));
        assert_eq!(out.value(0, "amount"), Some(&Value::from(20120201)));
        assert_eq!(out.value(1, "label"), Some(&Value::from("b")));
    }

    #[test]
    fn schema_driven_recognition_skips_undeclared_columns() {
        let mut schema = Schema::new();
        schema
            .push("when", ColumnSchema::new("When", SimpleType::Datetime))
            .unwrap();
        let mut frame = Frame::new(vec!["When", "other"]).unwrap();
        frame
            .push_row(vec!["2012-02-01".into(), "2012-02-01".into()])
            .unwrap();

        let out = recognize_dates_from_schema(&schema, &frame);
        assert_eq!(out.value(0, "When"), Some(&Value::DateTime(ymd(2012, 2, 1))));
        assert_eq!(out.value(0, "other"), Some(&Value::from("2012-02-01")));
    }

    #[test]
    fn timestamp_filters_become_date_literals() {
        let mut schema = Schema::new();
        schema
            .push("when", ColumnSchema::new("When", SimpleType::Datetime))
            .unwrap();
        schema
            .push("amount", ColumnSchema::new("Amount", SimpleType::Numeric))
            .unwrap();

        let query = json!({
            "when": {"$gte": 1325376000, "$lt": "1325462400"},
            "amount": {"$gt": 5},
        });
        let out = translate_timestamp_filter(query, &schema).unwrap();
        assert_eq!(
            out,
            json!({
                "when": {"$gte": {"$date": 1_325_376_000_000i64}, "$lt": {"$date": 1_325_462_400_000i64}},
                "amount": {"$gt": 5},
            })
        );

        let err = translate_timestamp_filter(json!({"when": {"$gte": "soon"}}), &schema)
            .unwrap_err();
        assert_eq!(err.column, "when");
    }

    #[test]
    fn timestamp_filters_are_translated_inside_logical_operators() {
        let mut schema = Schema::new();
        schema
            .push("when", ColumnSchema::new("When", SimpleType::Datetime))
            .unwrap();
        let literal = json!({"$date": 1_325_376_000_000i64});

        for op in ["$and", "$or", "$nor"] {
            let query = json!({ op: [{"when": {"$gte": 1325376000}}, {"other": 3}] });
            let out = translate_timestamp_filter(query, &schema).unwrap();
            assert_eq!(
                out,
                json!({ op: [{"when": {"$gte": literal.clone()}}, {"other": 3}] }),
                "{op}"
            );
        }

        let nested = json!({"$or": [{"$and": [{"When": 1325376000}]}]});
        assert_eq!(
            translate_timestamp_filter(nested, &schema).unwrap(),
            json!({"$or": [{"$and": [{"When": literal}]}]})
        );

        let err = translate_timestamp_filter(json!({"$and": [{"when": "soon"}]}), &schema)
            .unwrap_err();
        assert_eq!(err.column, "when");
    }
}
