//! Row predicates for filtering tables.

use crate::data::{ColumnType, Table, Value};
use crate::error::{Result, TidyError};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// A boolean condition evaluated against each row of a table.
///
/// Comparisons against a missing cell are false, so rows with a missing
/// value never satisfy `Eq`, `Lt`, etc. Use `IsMissing` to select them.
/// Comparison values are coerced to the column's type, so `year == "2007"`
/// matches an integer column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Predicate {
    Eq { column: String, value: Value },
    Ne { column: String, value: Value },
    Lt { column: String, value: Value },
    Le { column: String, value: Value },
    Gt { column: String, value: Value },
    Ge { column: String, value: Value },
    In { column: String, values: Vec<Value> },
    IsMissing { column: String },
    NotMissing { column: String },
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Not { predicate: Box<Predicate> },
}

impl Predicate {
    /// `column == value`
    pub fn eq<S: Into<String>, V: Into<Value>>(column: S, value: V) -> Self {
        Self::Eq {
            column: column.into(),
            value: value.into(),
        }
    }

    /// `column != value`
    pub fn ne<S: Into<String>, V: Into<Value>>(column: S, value: V) -> Self {
        Self::Ne {
            column: column.into(),
            value: value.into(),
        }
    }

    /// `column < value`
    pub fn lt<S: Into<String>, V: Into<Value>>(column: S, value: V) -> Self {
        Self::Lt {
            column: column.into(),
            value: value.into(),
        }
    }

    /// `column > value`
    pub fn gt<S: Into<String>, V: Into<Value>>(column: S, value: V) -> Self {
        Self::Gt {
            column: column.into(),
            value: value.into(),
        }
    }

    /// `column %in% values`
    pub fn is_in<S: Into<String>, V: Into<Value>>(column: S, values: Vec<V>) -> Self {
        Self::In {
            column: column.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    /// `!is.na(column)`
    pub fn not_missing<S: Into<String>>(column: S) -> Self {
        Self::NotMissing {
            column: column.into(),
        }
    }

    /// Both conditions.
    pub fn and(self, other: Predicate) -> Self {
        match self {
            Self::And(mut preds) => {
                preds.push(other);
                Self::And(preds)
            }
            first => Self::And(vec![first, other]),
        }
    }

    /// Either condition.
    pub fn or(self, other: Predicate) -> Self {
        match self {
            Self::Or(mut preds) => {
                preds.push(other);
                Self::Or(preds)
            }
            first => Self::Or(vec![first, other]),
        }
    }

    /// Negation.
    pub fn negate(self) -> Self {
        Self::Not {
            predicate: Box::new(self),
        }
    }

    /// Parse a simple comparison such as `species == Adelie`, `year>=2008`
    /// or `sex = female`. A bare `=` means equality; values may be quoted.
    /// The expression splits at the leftmost operator, so the value itself
    /// may contain operator characters.
    pub fn parse(expr: &str) -> Result<Self> {
        const OPS: [&str; 7] = ["==", "!=", "<=", ">=", "=", "<", ">"];

        let expr = expr.trim();
        let invalid = || {
            TidyError::InvalidParameter(format!("Cannot parse filter expression '{}'", expr))
        };
        let (pos, op) = expr
            .char_indices()
            .find_map(|(i, _)| {
                OPS.iter()
                    .find(|op| expr[i..].starts_with(**op))
                    .map(|op| (i, *op))
            })
            .ok_or_else(invalid)?;

        let column = expr[..pos].trim();
        let raw = expr[pos + op.len()..].trim();
        let raw = raw.trim_matches(|c| c == '"' || c == '\'');
        if column.is_empty() || raw.is_empty() {
            return Err(invalid());
        }
        let column = column.to_string();
        let value = if raw == "NA" {
            Value::Missing
        } else {
            Value::Text(raw.to_string())
        };
        Ok(match (op, value) {
            ("==" | "=", Value::Missing) => Self::IsMissing { column },
            ("!=", Value::Missing) => Self::NotMissing { column },
            ("==" | "=", value) => Self::Eq { column, value },
            ("!=", value) => Self::Ne { column, value },
            ("<=", value) => Self::Le { column, value },
            (">=", value) => Self::Ge { column, value },
            ("<", value) => Self::Lt { column, value },
            (_, value) => Self::Gt { column, value },
        })
    }

    /// Column names referenced by this predicate.
    pub fn columns(&self) -> Vec<&str> {
        match self {
            Self::Eq { column, .. }
            | Self::Ne { column, .. }
            | Self::Lt { column, .. }
            | Self::Le { column, .. }
            | Self::Gt { column, .. }
            | Self::Ge { column, .. }
            | Self::In { column, .. }
            | Self::IsMissing { column }
            | Self::NotMissing { column } => vec![column.as_str()],
            Self::And(preds) | Self::Or(preds) => {
                preds.iter().flat_map(|p| p.columns()).collect()
            }
            Self::Not { predicate: pred } => pred.columns(),
        }
    }

    /// Evaluate against every row, returning one flag per row.
    pub fn mask(&self, table: &Table) -> Result<Vec<bool>> {
        match self {
            Self::Eq { column, value } => compare(table, column, value, |o| o == Ordering::Equal),
            Self::Ne { column, value } => compare(table, column, value, |o| o != Ordering::Equal),
            Self::Lt { column, value } => compare(table, column, value, |o| o == Ordering::Less),
            Self::Le { column, value } => compare(table, column, value, |o| o != Ordering::Greater),
            Self::Gt { column, value } => compare(table, column, value, |o| o == Ordering::Greater),
            Self::Ge { column, value } => compare(table, column, value, |o| o != Ordering::Less),
            Self::In { column, values } => {
                let column_type = table.column_type(column)?;
                let targets: Vec<Value> = values
                    .iter()
                    .map(|v| coerce(v, column_type, column))
                    .collect::<Result<_>>()?;
                Ok(table
                    .column(column)?
                    .iter()
                    .map(|cell| {
                        !cell.is_missing()
                            && targets
                                .iter()
                                .any(|t| !t.is_missing() && cell.total_cmp(t) == Ordering::Equal)
                    })
                    .collect())
            }
            Self::IsMissing { column } => {
                Ok(table.column(column)?.iter().map(Value::is_missing).collect())
            }
            Self::NotMissing { column } => {
                Ok(table.column(column)?.iter().map(|v| !v.is_missing()).collect())
            }
            Self::And(preds) => {
                let mut mask = vec![true; table.n_rows()];
                for pred in preds {
                    for (m, keep) in mask.iter_mut().zip(pred.mask(table)?) {
                        *m &= keep;
                    }
                }
                Ok(mask)
            }
            Self::Or(preds) => {
                let mut mask = vec![false; table.n_rows()];
                for pred in preds {
                    for (m, keep) in mask.iter_mut().zip(pred.mask(table)?) {
                        *m |= keep;
                    }
                }
                Ok(mask)
            }
            Self::Not { predicate: pred } => Ok(pred.mask(table)?.into_iter().map(|m| !m).collect()),
        }
    }

    /// Number of rows satisfying the predicate.
    pub fn count(&self, table: &Table) -> Result<usize> {
        Ok(self.mask(table)?.into_iter().filter(|&m| m).count())
    }
}

impl std::fmt::Display for Predicate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Eq { column, value } => write!(f, "{} == {}", column, value),
            Self::Ne { column, value } => write!(f, "{} != {}", column, value),
            Self::Lt { column, value } => write!(f, "{} < {}", column, value),
            Self::Le { column, value } => write!(f, "{} <= {}", column, value),
            Self::Gt { column, value } => write!(f, "{} > {}", column, value),
            Self::Ge { column, value } => write!(f, "{} >= {}", column, value),
            Self::In { column, values } => {
                let vs: Vec<String> = values.iter().map(|v| v.to_string()).collect();
                write!(f, "{} in [{}]", column, vs.join(", "))
            }
            Self::IsMissing { column } => write!(f, "is.na({})", column),
            Self::NotMissing { column } => write!(f, "!is.na({})", column),
            Self::And(preds) => {
                let ps: Vec<String> = preds.iter().map(|p| format!("({})", p)).collect();
                write!(f, "{}", ps.join(" & "))
            }
            Self::Or(preds) => {
                let ps: Vec<String> = preds.iter().map(|p| format!("({})", p)).collect();
                write!(f, "{}", ps.join(" | "))
            }
            Self::Not { predicate: pred } => write!(f, "!({})", pred),
        }
    }
}

fn compare<F>(table: &Table, column: &str, value: &Value, accept: F) -> Result<Vec<bool>>
where
    F: Fn(Ordering) -> bool,
{
    let target = coerce(value, table.column_type(column)?, column)?;
    Ok(table
        .column(column)?
        .iter()
        .map(|cell| !cell.is_missing() && !target.is_missing() && accept(cell.total_cmp(&target)))
        .collect())
}

/// Convert a comparison value to the column's type.
fn coerce(value: &Value, column_type: ColumnType, column: &str) -> Result<Value> {
    match (value, column_type) {
        (Value::Missing, _) => Ok(Value::Missing),
        (Value::Text(s), ColumnType::Int | ColumnType::Float) => {
            let parsed = Value::parse(s, ColumnType::Float);
            if parsed.is_missing() {
                Err(TidyError::TypeMismatch {
                    column: column.to_string(),
                    reason: format!("cannot compare numeric column with '{}'", s),
                })
            } else {
                Ok(parsed)
            }
        }
        (Value::Int(_) | Value::Float(_), ColumnType::Text) => Ok(Value::Text(value.to_string())),
        (v, _) => Ok(v.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_table() -> Table {
        Table::from_csv_str(
            "group,x,y\n\
             A,1,2\n\
             A,2,4\n\
             B,1,3\n\
             B,2,5\n\
             NA,3,NA\n",
        )
        .unwrap()
    }

    #[test]
    fn test_eq_text() {
        let table = create_test_table();
        let mask = Predicate::eq("group", "A").mask(&table).unwrap();
        assert_eq!(mask, vec![true, true, false, false, false]);
    }

    #[test]
    fn test_numeric_coercion() {
        let table = create_test_table();
        assert_eq!(Predicate::eq("x", "2").count(&table).unwrap(), 2);
        assert_eq!(Predicate::gt("x", 1.5).count(&table).unwrap(), 3);
        assert!(Predicate::eq("x", "two").mask(&table).is_err());
    }

    #[test]
    fn test_missing_never_compares() {
        let table = create_test_table();
        // The NA row satisfies neither y > 0 nor y <= 0
        let gt = Predicate::gt("y", 0).count(&table).unwrap();
        let le = Predicate::Le {
            column: "y".into(),
            value: Value::Int(0),
        }
        .count(&table)
        .unwrap();
        assert_eq!(gt + le, 4);
        assert_eq!(
            Predicate::IsMissing { column: "y".into() }
                .count(&table)
                .unwrap(),
            1
        );
    }

    #[test]
    fn test_combinators() {
        let table = create_test_table();
        let p = Predicate::eq("group", "A").and(Predicate::eq("x", 2));
        assert_eq!(p.count(&table).unwrap(), 1);

        let p = Predicate::eq("group", "A").or(Predicate::eq("group", "B"));
        assert_eq!(p.count(&table).unwrap(), 4);
        assert_eq!(p.clone().negate().count(&table).unwrap(), 1);

        let p = Predicate::is_in("group", vec!["B", "C"]);
        assert_eq!(p.count(&table).unwrap(), 2);
    }

    #[test]
    fn test_parse() {
        assert_eq!(
            Predicate::parse("species == Adelie").unwrap(),
            Predicate::eq("species", "Adelie")
        );
        assert_eq!(
            Predicate::parse("year>=2008").unwrap(),
            Predicate::Ge {
                column: "year".into(),
                value: Value::from("2008")
            }
        );
        assert_eq!(
            Predicate::parse("sex = 'female'").unwrap(),
            Predicate::eq("sex", "female")
        );
        assert_eq!(
            Predicate::parse("sex != NA").unwrap(),
            Predicate::not_missing("sex")
        );
        assert!(Predicate::parse("species").is_err());
        assert!(Predicate::parse("== 3").is_err());
    }

    #[test]
    fn test_parse_value_with_operator_characters() {
        assert_eq!(
            Predicate::parse("label = 'a==b'").unwrap(),
            Predicate::eq("label", "a==b")
        );
        assert_eq!(
            Predicate::parse("note == \"x<y\"").unwrap(),
            Predicate::eq("note", "x<y")
        );
        assert_eq!(
            Predicate::parse("range != 1-5>0").unwrap(),
            Predicate::Ne {
                column: "range".into(),
                value: Value::from("1-5>0")
            }
        );
    }

    #[test]
    fn test_unknown_column() {
        let table = create_test_table();
        assert!(matches!(
            Predicate::eq("species", "A").mask(&table),
            Err(TidyError::MissingColumn(_))
        ));
    }

    #[test]
    fn test_columns_and_display() {
        let p = Predicate::eq("group", "A").and(Predicate::gt("x", 1));
        assert_eq!(p.columns(), vec!["group", "x"]);
        assert_eq!(p.to_string(), "(group == A) & (x > 1)");
    }
}
