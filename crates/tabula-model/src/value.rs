use chrono::{DateTime, NaiveDateTime, SecondsFormat};
use ordered_float::OrderedFloat;
use serde_json::json;
use std::fmt;

use crate::error::{ModelError, ModelResult};

/// Key used by the extended JSON encoding for date-time literals.
pub const DATE_KEY: &str = "$date";
/// Key used by the extended JSON encoding for opaque object identifiers.
pub const OID_KEY: &str = "$oid";

/// A scalar stored in a single dataset cell.
///
/// Variant order doubles as the cross-type sort order used when ordering query results:
/// `Null < Boolean < Number < Text < DateTime`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Value {
    Null,
    Boolean(bool),
    Number(OrderedFloat<f64>),
    Text(String),
    DateTime(NaiveDateTime),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(n.0),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_datetime(&self) -> Option<NaiveDateTime> {
        match self {
            Value::DateTime(dt) => Some(*dt),
            _ => None,
        }
    }

    /// Build a number, mapping NaN and infinities to [`Value::Null`].
    ///
    /// Rows are persisted as JSON, which cannot represent non-finite numbers.
    pub fn finite(n: f64) -> Value {
        if n.is_finite() {
            Value::Number(OrderedFloat(n))
        } else {
            Value::Null
        }
    }

    /// Encode into the extended JSON representation used for persisted rows.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Boolean(b) => serde_json::Value::Bool(*b),
            Value::Number(n) => number_to_json(n.0),
            Value::Text(s) => serde_json::Value::String(s.clone()),
            Value::DateTime(dt) => json!({ DATE_KEY: dt.and_utc().timestamp_millis() }),
        }
    }

    /// Decode a scalar from extended JSON.
    ///
    /// `{"$date": <millis | rfc3339>}` decodes to a date-time and `{"$oid": "<hex>"}` to its text
    /// form. Arrays and other objects are not scalars and are rejected.
    pub fn from_json(value: &serde_json::Value) -> ModelResult<Value> {
        match value {
            serde_json::Value::Null => Ok(Value::Null),
            serde_json::Value::Bool(b) => Ok(Value::Boolean(*b)),
            serde_json::Value::Number(n) => n
                .as_f64()
                .map(Value::finite)
                .ok_or_else(|| ModelError::UnsupportedJson(n.to_string())),
            serde_json::Value::String(s) => Ok(Value::Text(s.clone())),
            serde_json::Value::Object(map) if map.len() == 1 => {
                if let Some(date) = map.get(DATE_KEY) {
                    return decode_extended_date(date);
                }
                if let Some(serde_json::Value::String(oid)) = map.get(OID_KEY) {
                    return Ok(Value::Text(oid.clone()));
                }
                Err(ModelError::UnsupportedJson(value.to_string()))
            }
            other => Err(ModelError::UnsupportedJson(other.to_string())),
        }
    }
}

/// `true` when `value` is an extended JSON literal (`$date` / `$oid`) rather than a nested
/// document.
pub fn is_extended_literal(value: &serde_json::Value) -> bool {
    match value {
        serde_json::Value::Object(map) => {
            map.len() == 1 && (map.contains_key(DATE_KEY) || map.contains_key(OID_KEY))
        }
        _ => false,
    }
}

pub fn datetime_from_millis(millis: i64) -> Option<NaiveDateTime> {
    DateTime::from_timestamp_millis(millis).map(|dt| dt.naive_utc())
}

pub fn datetime_from_seconds(seconds: i64) -> Option<NaiveDateTime> {
    DateTime::from_timestamp(seconds, 0).map(|dt| dt.naive_utc())
}

fn decode_extended_date(date: &serde_json::Value) -> ModelResult<Value> {
    let decoded = match date {
        serde_json::Value::Number(n) => n.as_i64().and_then(datetime_from_millis),
        serde_json::Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| dt.naive_utc()),
        _ => None,
    };
    decoded
        .map(Value::DateTime)
        .ok_or_else(|| ModelError::UnsupportedJson(format!("invalid {DATE_KEY} literal {date}")))
}

fn number_to_json(n: f64) -> serde_json::Value {
    // Keep integral values as JSON integers so stored documents stay readable.
    if n.fract() == 0.0 && n.abs() < 9_007_199_254_740_992.0 {
        return json!(n as i64);
    }
    serde_json::Number::from_f64(n)
        .map(serde_json::Value::Number)
        .unwrap_or(serde_json::Value::Null)
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Boolean(b) => write!(f, "{b}"),
            Value::Number(n) => write!(f, "{}", n.0),
            Value::Text(s) => f.write_str(s),
            Value::DateTime(dt) => f.write_str(
                &dt.and_utc()
                    .to_rfc3339_opts(SecondsFormat::AutoSi, true),
            ),
        }
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::finite(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Number(OrderedFloat(value as f64))
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Number(OrderedFloat(f64::from(value)))
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Boolean(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl From<NaiveDateTime> for Value {
    fn from(value: NaiveDateTime) -> Self {
        Value::DateTime(value)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use pretty_assertions::assert_eq;

    #[test]
    fn extended_dates_round_trip_through_json() {
        let dt = NaiveDate::from_ymd_opt(2012, 3, 4)
            .unwrap()
            .and_hms_opt(5, 6, 7)
            .unwrap();
        let encoded = Value::DateTime(dt).to_json();
        assert_eq!(encoded, json!({ "$date": 1_330_837_567_000i64 }));
        assert_eq!(Value::from_json(&encoded).unwrap(), Value::DateTime(dt));
    }

    #[test]
    fn oid_literals_decode_to_text() {
        let v = Value::from_json(&json!({ "$oid": "4f3b2a" })).unwrap();
        assert_eq!(v, Value::from("4f3b2a"));
    }

    #[test]
    fn nested_documents_are_not_scalars() {
        assert!(Value::from_json(&json!({ "a": 1 })).is_err());
        assert!(Value::from_json(&json!([1, 2])).is_err());
    }

    #[test]
    fn integral_numbers_encode_as_integers() {
        assert_eq!(Value::from(3.0).to_json(), json!(3));
        assert_eq!(Value::from(2.5).to_json(), json!(2.5));
        assert_eq!(Value::from(f64::NAN), Value::Null);
    }

    #[test]
    fn cross_type_ordering_is_total() {
        let mut values = vec![
            Value::from("b"),
            Value::from(2),
            Value::Null,
            Value::from(true),
            Value::from(-1),
        ];
        values.sort();
        assert_eq!(
            values,
            vec![
                Value::Null,
                Value::from(true),
                Value::from(-1),
                Value::from(2),
                Value::from("b"),
            ]
        );
    }
}
