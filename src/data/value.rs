//! Cell values and column types.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// A single cell of an observation table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// Integer value.
    Int(i64),
    /// Floating-point value.
    Float(f64),
    /// Free text or a categorical level.
    Text(String),
    /// Missing value (`NA`).
    Missing,
}

impl Value {
    /// Check if this is a missing value.
    pub fn is_missing(&self) -> bool {
        matches!(self, Value::Missing)
    }

    /// Try to get as text.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Try to get as a number. Integers widen to `f64`.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(v) => Some(*v as f64),
            Value::Float(v) => Some(*v),
            _ => None,
        }
    }

    /// Try to get as an integer.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Build a float cell, mapping NaN to `Missing`.
    pub fn from_f64(v: f64) -> Self {
        if v.is_nan() {
            Value::Missing
        } else {
            Value::Float(v)
        }
    }

    /// Parse a raw CSV field according to a column type.
    ///
    /// Empty fields and `NA` become `Missing`, as do fields that fail to
    /// parse as the requested numeric type.
    pub fn parse(raw: &str, column_type: ColumnType) -> Self {
        let raw = raw.trim();
        if is_missing_marker(raw) {
            return Value::Missing;
        }
        match column_type {
            ColumnType::Int => raw.parse::<i64>().map(Value::Int).unwrap_or(Value::Missing),
            ColumnType::Float => raw
                .parse::<f64>()
                .map(Value::from_f64)
                .unwrap_or(Value::Missing),
            ColumnType::Text => Value::Text(raw.to_string()),
        }
    }

    /// Total order used for grouping and sorting.
    ///
    /// Numbers compare numerically, text lexically, numbers sort before
    /// text and `Missing` sorts last.
    pub fn total_cmp(&self, other: &Value) -> Ordering {
        match (self, other) {
            (Value::Missing, Value::Missing) => Ordering::Equal,
            (Value::Missing, _) => Ordering::Greater,
            (_, Value::Missing) => Ordering::Less,
            (Value::Text(a), Value::Text(b)) => a.cmp(b),
            (Value::Text(_), _) => Ordering::Greater,
            (_, Value::Text(_)) => Ordering::Less,
            (Value::Int(a), Value::Int(b)) => a.cmp(b),
            (a, b) => {
                let a = a.as_f64().unwrap_or(f64::NAN);
                let b = b.as_f64().unwrap_or(f64::NAN);
                a.total_cmp(&b)
            }
        }
    }

    /// The column type this value would belong to, if it is not missing.
    pub fn column_type(&self) -> Option<ColumnType> {
        match self {
            Value::Int(_) => Some(ColumnType::Int),
            Value::Float(_) => Some(ColumnType::Float),
            Value::Text(_) => Some(ColumnType::Text),
            Value::Missing => None,
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Int(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{}", v),
            Value::Text(s) => write!(f, "{}", s),
            Value::Missing => write!(f, "NA"),
        }
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::from_f64(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Missing)
    }
}

/// Storage type of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnType {
    Text,
    Int,
    Float,
}

impl ColumnType {
    /// Whether values of this type can enter a numeric computation.
    pub fn is_numeric(&self) -> bool {
        matches!(self, ColumnType::Int | ColumnType::Float)
    }

    /// Infer a column type from raw fields.
    ///
    /// A column is `Int` if every non-missing field parses as an integer,
    /// `Float` if every one parses as a number, and `Text` otherwise. A
    /// column with no observed values is `Float`, as in
    /// [`Table::from_columns`](crate::data::Table::from_columns).
    pub fn infer<'a, I>(fields: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut all_int = true;
        let mut all_numeric = true;
        let mut seen = false;

        for raw in fields {
            let raw = raw.trim();
            if is_missing_marker(raw) {
                continue;
            }
            seen = true;
            if raw.parse::<i64>().is_err() {
                all_int = false;
                if raw.parse::<f64>().is_err() {
                    all_numeric = false;
                    break;
                }
            }
        }

        if !seen {
            ColumnType::Float
        } else if !all_numeric {
            ColumnType::Text
        } else if all_int {
            ColumnType::Int
        } else {
            ColumnType::Float
        }
    }

    /// Whether a value of type `other` can be stored in a column of this type.
    pub fn accepts(&self, other: ColumnType) -> bool {
        matches!(
            (self, other),
            (ColumnType::Text, ColumnType::Text)
                | (ColumnType::Int, ColumnType::Int)
                | (ColumnType::Float, ColumnType::Int)
                | (ColumnType::Float, ColumnType::Float)
        )
    }

    /// Unify two column types when values of both appear in one column.
    pub fn unify(self, other: ColumnType) -> ColumnType {
        match (self, other) {
            (a, b) if a == b => a,
            (ColumnType::Int, ColumnType::Float) | (ColumnType::Float, ColumnType::Int) => {
                ColumnType::Float
            }
            _ => ColumnType::Text,
        }
    }
}

impl std::fmt::Display for ColumnType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ColumnType::Text => write!(f, "text"),
            ColumnType::Int => write!(f, "int"),
            ColumnType::Float => write!(f, "float"),
        }
    }
}

fn is_missing_marker(raw: &str) -> bool {
    raw.is_empty() || raw == "NA" || raw == "na"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_values() {
        assert_eq!(Value::parse("42", ColumnType::Int), Value::Int(42));
        assert_eq!(Value::parse("4.5", ColumnType::Float), Value::Float(4.5));
        assert_eq!(
            Value::parse(" Adelie ", ColumnType::Text),
            Value::Text("Adelie".into())
        );
        assert!(Value::parse("NA", ColumnType::Float).is_missing());
        assert!(Value::parse("", ColumnType::Text).is_missing());
        assert!(Value::parse("abc", ColumnType::Int).is_missing());
    }

    #[test]
    fn test_infer_column_type() {
        assert_eq!(ColumnType::infer(["1", "2", "NA"]), ColumnType::Int);
        assert_eq!(ColumnType::infer(["1", "2.5", ""]), ColumnType::Float);
        assert_eq!(ColumnType::infer(["1", "male"]), ColumnType::Text);
        assert_eq!(ColumnType::infer(["NA", "NA"]), ColumnType::Float);
    }

    #[test]
    fn test_total_order() {
        let mut values = vec![
            Value::Missing,
            Value::Text("b".into()),
            Value::Float(2.5),
            Value::Int(1),
            Value::Text("a".into()),
        ];
        values.sort_by(|a, b| a.total_cmp(b));
        assert_eq!(
            values,
            vec![
                Value::Int(1),
                Value::Float(2.5),
                Value::Text("a".into()),
                Value::Text("b".into()),
                Value::Missing,
            ]
        );
    }

    #[test]
    fn test_json_shape() {
        let row = vec![Value::Text("A".into()), Value::Float(3.0), Value::Missing];
        let json = serde_json::to_string(&row).unwrap();
        assert_eq!(json, r#"["A",3.0,null]"#);
    }

    #[test]
    fn test_nan_is_missing() {
        assert!(Value::from(f64::NAN).is_missing());
        assert_eq!(Value::from(None::<f64>), Value::Missing);
    }
}
