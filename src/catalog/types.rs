use crate::error::OrmError;
use compact_str::CompactString;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ColumnType {
    Text,
    Integer,
    Float,
    Boolean,
    Timestamp,
    Blob,
}

impl ColumnType {
    pub fn as_str(self) -> &'static str {
        match self {
            ColumnType::Text => "Text",
            ColumnType::Integer => "Integer",
            ColumnType::Float => "Float",
            ColumnType::Boolean => "Boolean",
            ColumnType::Timestamp => "Timestamp",
            ColumnType::Blob => "Blob",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub enum Value {
    #[default]
    Null,
    Text(CompactString),
    Integer(i64),
    Float(f64),
    Boolean(bool),
    Timestamp(i64),
    Blob(Vec<u8>),
}

pub type Row = Vec<Value>;

impl Value {
    fn kind_rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Boolean(_) => 1,
            Value::Integer(_) => 2,
            Value::Timestamp(_) => 3,
            Value::Float(_) => 4,
            Value::Text(_) => 5,
            Value::Blob(_) => 6,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "Null",
            Value::Text(_) => "Text",
            Value::Integer(_) => "Integer",
            Value::Float(_) => "Float",
            Value::Boolean(_) => "Boolean",
            Value::Timestamp(_) => "Timestamp",
            Value::Blob(_) => "Blob",
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Parses document text into a value of `col_type`. Empty text is NULL.
    pub fn parse(col_type: ColumnType, text: &str) -> Result<Value, OrmError> {
        if text.is_empty() {
            return Ok(Value::Null);
        }
        let trimmed = text.trim();
        let invalid = || {
            OrmError::Decode(format!(
                "cannot parse '{text}' as {}",
                col_type.as_str()
            ))
        };
        match col_type {
            ColumnType::Text => Ok(Value::Text(text.into())),
            ColumnType::Integer => trimmed.parse().map(Value::Integer).map_err(|_| invalid()),
            ColumnType::Timestamp => trimmed
                .parse()
                .map(Value::Timestamp)
                .map_err(|_| invalid()),
            ColumnType::Float => trimmed.parse().map(Value::Float).map_err(|_| invalid()),
            ColumnType::Boolean => match trimmed {
                "1" | "true" | "True" | "TRUE" => Ok(Value::Boolean(true)),
                "0" | "false" | "False" | "FALSE" => Ok(Value::Boolean(false)),
                _ => Err(invalid()),
            },
            ColumnType::Blob => decode_hex(trimmed).map(Value::Blob).ok_or_else(invalid),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Text(s) => serde_json::Value::String(s.to_string()),
            Value::Integer(v) | Value::Timestamp(v) => serde_json::Value::from(*v),
            Value::Float(v) => serde_json::Number::from_f64(*v)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::Boolean(v) => serde_json::Value::Bool(*v),
            Value::Blob(bytes) => serde_json::Value::String(encode_hex(bytes)),
        }
    }

    /// Converts a JSON scalar into a value. Arrays and objects are rejected.
    pub fn from_json(value: &serde_json::Value) -> Result<Value, OrmError> {
        match value {
            serde_json::Value::Null => Ok(Value::Null),
            serde_json::Value::Bool(b) => Ok(Value::Boolean(*b)),
            serde_json::Value::String(s) => Ok(Value::Text(s.as_str().into())),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Ok(Value::Integer(i))
                } else if let Some(f) = n.as_f64() {
                    Ok(Value::Float(f))
                } else {
                    Err(OrmError::Decode(format!("unsupported number {n}")))
                }
            }
            other => Err(OrmError::Decode(format!(
                "expected a scalar, got {other}"
            ))),
        }
    }
}

fn encode_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn decode_hex(text: &str) -> Option<Vec<u8>> {
    if text.len() % 2 != 0 {
        return None;
    }
    (0..text.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(text.get(i..i + 2)?, 16).ok())
        .collect()
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Value {}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        let rank_cmp = self.kind_rank().cmp(&other.kind_rank());
        if rank_cmp != Ordering::Equal {
            return rank_cmp;
        }

        match (self, other) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Boolean(a), Value::Boolean(b)) => a.cmp(b),
            (Value::Integer(a), Value::Integer(b)) => a.cmp(b),
            (Value::Timestamp(a), Value::Timestamp(b)) => a.cmp(b),
            (Value::Float(a), Value::Float(b)) => a.total_cmp(b),
            (Value::Text(a), Value::Text(b)) => a.cmp(b),
            (Value::Blob(a), Value::Blob(b)) => a.cmp(b),
            _ => Ordering::Equal,
        }
    }
}

impl std::hash::Hash for Value {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.kind_rank().hash(state);
        match self {
            Value::Null => {}
            Value::Boolean(v) => v.hash(state),
            Value::Integer(v) | Value::Timestamp(v) => v.hash(state),
            Value::Float(v) => v.to_bits().hash(state),
            Value::Text(v) => v.hash(state),
            Value::Blob(v) => v.hash(state),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{ColumnType, Value};
    use proptest::prelude::*;

    #[test]
    fn parse_follows_column_type() {
        assert_eq!(
            Value::parse(ColumnType::Integer, " 42 ").expect("int"),
            Value::Integer(42)
        );
        assert_eq!(
            Value::parse(ColumnType::Boolean, "1").expect("bool"),
            Value::Boolean(true)
        );
        assert_eq!(
            Value::parse(ColumnType::Blob, "00ff10").expect("blob"),
            Value::Blob(vec![0x00, 0xff, 0x10])
        );
        assert_eq!(Value::parse(ColumnType::Float, "").expect("empty"), Value::Null);
        assert!(Value::parse(ColumnType::Integer, "forty").is_err());
    }

    #[test]
    fn json_conversion_keeps_scalars() {
        assert_eq!(Value::Integer(7).to_json(), serde_json::json!(7));
        assert_eq!(Value::Blob(vec![1, 171]).to_json(), serde_json::json!("01ab"));
        assert_eq!(
            Value::from_json(&serde_json::json!("abc")).expect("text"),
            Value::Text("abc".into())
        );
        assert!(Value::from_json(&serde_json::json!([1])).is_err());
    }

    proptest! {
        #[test]
        fn integer_text_parses_back(v in any::<i64>()) {
            prop_assert_eq!(
                Value::parse(ColumnType::Integer, &v.to_string()).expect("parse"),
                Value::Integer(v)
            );
        }

        #[test]
        fn ordering_is_antisymmetric(a in any::<i64>(), b in "\\PC{0,8}") {
            let lhs = Value::Integer(a);
            let rhs = Value::Text(b.into());
            prop_assert_eq!(lhs.cmp(&rhs), rhs.cmp(&lhs).reverse());
        }
    }
}
