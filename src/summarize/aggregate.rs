//! Aggregate expressions reducing a group of rows to one value.

use crate::data::{ColumnType, Table, Value};
use crate::error::{Result, TidyError};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// How a numeric aggregate treats missing input values.
///
/// There is no default: every call site chooses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Missing {
    /// Drop missing values before reducing (`na.rm = TRUE`).
    Ignore,
    /// Any missing input makes the result missing.
    Propagate,
}

impl std::str::FromStr for Missing {
    type Err = TidyError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "ignore" | "rm" | "na.rm" => Ok(Self::Ignore),
            "propagate" | "keep" => Ok(Self::Propagate),
            other => Err(TidyError::InvalidParameter(format!(
                "Unknown missing policy '{}' (expected ignore or propagate)",
                other
            ))),
        }
    }
}

/// An aggregate expression.
///
/// Count-like aggregates produce integer columns; everything else
/// produces floats.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Aggregate {
    /// Number of rows in the group.
    Count,
    /// Number of non-missing values of a column.
    CountNonMissing { column: String },
    /// Number of distinct values, counting missing as one value.
    NDistinct { column: String },
    Mean { column: String, missing: Missing },
    /// Sum; zero for an empty group.
    Sum { column: String, missing: Missing },
    /// Sample standard deviation (n - 1 denominator).
    Sd { column: String, missing: Missing },
    /// Sample variance (n - 1 denominator).
    Var { column: String, missing: Missing },
    Min { column: String, missing: Missing },
    Max { column: String, missing: Missing },
    Median { column: String, missing: Missing },
    /// Quotient of two aggregates; missing when the denominator is zero.
    Ratio {
        numerator: Box<Aggregate>,
        denominator: Box<Aggregate>,
    },
    /// Square root of an aggregate.
    Sqrt { of: Box<Aggregate> },
}

impl Aggregate {
    pub fn count_non_missing<S: Into<String>>(column: S) -> Self {
        Self::CountNonMissing {
            column: column.into(),
        }
    }

    pub fn mean<S: Into<String>>(column: S, missing: Missing) -> Self {
        Self::Mean {
            column: column.into(),
            missing,
        }
    }

    pub fn sum<S: Into<String>>(column: S, missing: Missing) -> Self {
        Self::Sum {
            column: column.into(),
            missing,
        }
    }

    pub fn sd<S: Into<String>>(column: S, missing: Missing) -> Self {
        Self::Sd {
            column: column.into(),
            missing,
        }
    }

    pub fn ratio(numerator: Aggregate, denominator: Aggregate) -> Self {
        Self::Ratio {
            numerator: Box::new(numerator),
            denominator: Box::new(denominator),
        }
    }

    pub fn sqrt(inner: Aggregate) -> Self {
        Self::Sqrt {
            of: Box::new(inner),
        }
    }

    /// Standard error of the mean: `sd / sqrt(n)` over non-missing values.
    ///
    /// With `Missing::Propagate` any missing value makes the result missing.
    pub fn std_error<S: Into<String>>(column: S, missing: Missing) -> Self {
        let column = column.into();
        Self::ratio(
            Self::sd(column.clone(), missing),
            Self::sqrt(Self::count_non_missing(column)),
        )
    }

    /// Parse a command-line aggregate such as `mean:y:ignore` or `count`.
    ///
    /// Recognised functions: `count`, `count_non_missing`, `n_distinct`,
    /// `mean`, `sum`, `sd`, `var`, `min`, `max`, `median` and `se`. Numeric
    /// functions require a missing policy.
    pub fn parse(spec: &str) -> Result<Self> {
        let parts: Vec<&str> = spec.split(':').map(str::trim).collect();
        let func = parts[0].to_lowercase();
        let column = parts.get(1).map(|c| c.to_string());
        let missing = parts.get(2).map(|m| m.parse::<Missing>()).transpose()?;

        let need_column = || {
            column.clone().ok_or_else(|| {
                TidyError::InvalidParameter(format!("Aggregate '{}' needs a column", func))
            })
        };
        let need_missing = || {
            missing.ok_or_else(|| {
                TidyError::InvalidParameter(format!(
                    "Aggregate '{}' needs an explicit missing policy (':ignore' or ':propagate')",
                    spec
                ))
            })
        };

        let agg = match func.as_str() {
            "count" | "n" => Self::Count,
            "count_non_missing" => Self::CountNonMissing {
                column: need_column()?,
            },
            "n_distinct" => Self::NDistinct {
                column: need_column()?,
            },
            "mean" => Self::Mean {
                column: need_column()?,
                missing: need_missing()?,
            },
            "sum" => Self::Sum {
                column: need_column()?,
                missing: need_missing()?,
            },
            "sd" => Self::Sd {
                column: need_column()?,
                missing: need_missing()?,
            },
            "var" => Self::Var {
                column: need_column()?,
                missing: need_missing()?,
            },
            "min" => Self::Min {
                column: need_column()?,
                missing: need_missing()?,
            },
            "max" => Self::Max {
                column: need_column()?,
                missing: need_missing()?,
            },
            "median" => Self::Median {
                column: need_column()?,
                missing: need_missing()?,
            },
            "se" => Self::std_error(need_column()?, need_missing()?),
            other => {
                return Err(TidyError::InvalidParameter(format!(
                    "Unknown aggregate function '{}'",
                    other
                )))
            }
        };
        Ok(agg)
    }

    /// Type of the output column.
    pub fn output_type(&self) -> ColumnType {
        match self {
            Self::Count | Self::CountNonMissing { .. } | Self::NDistinct { .. } => ColumnType::Int,
            _ => ColumnType::Float,
        }
    }

    /// Check that every referenced column exists and numeric aggregates
    /// refer to numeric columns.
    pub fn validate(&self, table: &Table) -> Result<()> {
        match self {
            Self::Count => Ok(()),
            Self::CountNonMissing { column } | Self::NDistinct { column } => {
                table.column_type(column).map(|_| ())
            }
            Self::Mean { column, .. }
            | Self::Sum { column, .. }
            | Self::Sd { column, .. }
            | Self::Var { column, .. }
            | Self::Min { column, .. }
            | Self::Max { column, .. }
            | Self::Median { column, .. } => {
                let column_type = table.column_type(column)?;
                if column_type.is_numeric() {
                    Ok(())
                } else {
                    Err(TidyError::TypeMismatch {
                        column: column.clone(),
                        reason: format!("cannot aggregate a {} column numerically", column_type),
                    })
                }
            }
            Self::Ratio {
                numerator,
                denominator,
            } => {
                numerator.validate(table)?;
                denominator.validate(table)
            }
            Self::Sqrt { of: inner } => inner.validate(table),
        }
    }

    /// Reduce the given rows of `table` to one value.
    pub fn evaluate(&self, table: &Table, rows: &[usize]) -> Result<Value> {
        match self {
            Self::Count => Ok(Value::Int(rows.len() as i64)),
            Self::CountNonMissing { column } => {
                let values = table.column(column)?;
                let n = rows.iter().filter(|&&r| !values[r].is_missing()).count();
                Ok(Value::Int(n as i64))
            }
            Self::NDistinct { column } => {
                let values = table.column(column)?;
                let mut seen: Vec<&Value> = rows.iter().map(|&r| &values[r]).collect();
                seen.sort_by(|a, b| a.total_cmp(b));
                seen.dedup_by(|a, b| a.total_cmp(b) == Ordering::Equal);
                Ok(Value::Int(seen.len() as i64))
            }
            Self::Mean { column, missing } => reduce(table, column, rows, *missing, |xs| {
                (!xs.is_empty()).then(|| xs.iter().sum::<f64>() / xs.len() as f64)
            }),
            Self::Sum { column, missing } => {
                reduce(table, column, rows, *missing, |xs| Some(xs.iter().sum()))
            }
            Self::Sd { column, missing } => {
                reduce(table, column, rows, *missing, |xs| variance(xs).map(f64::sqrt))
            }
            Self::Var { column, missing } => reduce(table, column, rows, *missing, variance),
            Self::Min { column, missing } => reduce(table, column, rows, *missing, |xs| {
                xs.iter().copied().reduce(f64::min)
            }),
            Self::Max { column, missing } => reduce(table, column, rows, *missing, |xs| {
                xs.iter().copied().reduce(f64::max)
            }),
            Self::Median { column, missing } => reduce(table, column, rows, *missing, median),
            Self::Ratio {
                numerator,
                denominator,
            } => {
                let num = numerator.evaluate(table, rows)?.as_f64();
                let den = denominator.evaluate(table, rows)?.as_f64();
                Ok(match (num, den) {
                    (Some(n), Some(d)) if d != 0.0 => Value::from_f64(n / d),
                    _ => Value::Missing,
                })
            }
            Self::Sqrt { of: inner } => Ok(match inner.evaluate(table, rows)?.as_f64() {
                Some(v) if v >= 0.0 => Value::Float(v.sqrt()),
                _ => Value::Missing,
            }),
        }
    }
}

impl std::fmt::Display for Aggregate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Count => write!(f, "n()"),
            Self::CountNonMissing { column } => write!(f, "count_non_missing({})", column),
            Self::NDistinct { column } => write!(f, "n_distinct({})", column),
            Self::Mean { column, missing } => fmt_call(f, "mean", column, missing),
            Self::Sum { column, missing } => fmt_call(f, "sum", column, missing),
            Self::Sd { column, missing } => fmt_call(f, "sd", column, missing),
            Self::Var { column, missing } => fmt_call(f, "var", column, missing),
            Self::Min { column, missing } => fmt_call(f, "min", column, missing),
            Self::Max { column, missing } => fmt_call(f, "max", column, missing),
            Self::Median { column, missing } => fmt_call(f, "median", column, missing),
            Self::Ratio {
                numerator,
                denominator,
            } => write!(f, "{} / {}", numerator, denominator),
            Self::Sqrt { of: inner } => write!(f, "sqrt({})", inner),
        }
    }
}

fn fmt_call(
    f: &mut std::fmt::Formatter<'_>,
    name: &str,
    column: &str,
    missing: &Missing,
) -> std::fmt::Result {
    match missing {
        Missing::Ignore => write!(f, "{}({}, na.rm)", name, column),
        Missing::Propagate => write!(f, "{}({})", name, column),
    }
}

/// Apply a reduction to the numeric values of `column` over `rows`.
fn reduce<F>(table: &Table, column: &str, rows: &[usize], missing: Missing, f: F) -> Result<Value>
where
    F: Fn(&[f64]) -> Option<f64>,
{
    let values = table.numeric_column(column)?;
    let mut xs = Vec::with_capacity(rows.len());
    for &r in rows {
        match values[r] {
            Some(x) => xs.push(x),
            None if missing == Missing::Propagate => return Ok(Value::Missing),
            None => {}
        }
    }
    Ok(f(&xs).map_or(Value::Missing, Value::from_f64))
}

fn variance(xs: &[f64]) -> Option<f64> {
    if xs.len() < 2 {
        return None;
    }
    let n = xs.len() as f64;
    let mean = xs.iter().sum::<f64>() / n;
    Some(xs.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (n - 1.0))
}

fn median(xs: &[f64]) -> Option<f64> {
    if xs.is_empty() {
        return None;
    }
    let mut sorted = xs.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some((sorted[mid - 1] + sorted[mid]) / 2.0)
    } else {
        Some(sorted[mid])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn create_test_table() -> Table {
        Table::from_csv_str(
            "g,y,w\n\
             A,2,1\n\
             A,4,NA\n\
             A,9,3\n\
             B,3,0\n",
        )
        .unwrap()
    }

    fn eval(agg: &Aggregate, rows: &[usize]) -> Value {
        agg.evaluate(&create_test_table(), rows).unwrap()
    }

    #[test]
    fn test_counts() {
        assert_eq!(eval(&Aggregate::Count, &[0, 1, 2]), Value::Int(3));
        assert_eq!(
            eval(&Aggregate::count_non_missing("w"), &[0, 1, 2]),
            Value::Int(2)
        );
        assert_eq!(
            eval(&Aggregate::NDistinct { column: "g".into() }, &[0, 1, 3]),
            Value::Int(2)
        );
    }

    #[test]
    fn test_mean_sd_median() {
        let rows = [0, 1, 2];
        assert_eq!(eval(&Aggregate::mean("y", Missing::Propagate), &rows), Value::Float(5.0));
        let sd = eval(&Aggregate::sd("y", Missing::Propagate), &rows)
            .as_f64()
            .unwrap();
        assert_relative_eq!(sd, 13.0_f64.sqrt(), epsilon = 1e-12);
        let med = Aggregate::Median {
            column: "y".into(),
            missing: Missing::Ignore,
        };
        assert_eq!(eval(&med, &[0, 1, 2, 3]), Value::Float(3.5));
    }

    #[test]
    fn test_missing_policy() {
        let rows = [0, 1, 2];
        assert!(eval(&Aggregate::mean("w", Missing::Propagate), &rows).is_missing());
        assert_eq!(eval(&Aggregate::mean("w", Missing::Ignore), &rows), Value::Float(2.0));
        assert_eq!(eval(&Aggregate::sum("w", Missing::Ignore), &rows), Value::Float(4.0));
    }

    #[test]
    fn test_degenerate_groups() {
        assert!(eval(&Aggregate::sd("y", Missing::Ignore), &[3]).is_missing());
        assert!(eval(&Aggregate::mean("y", Missing::Ignore), &[]).is_missing());
        assert_eq!(eval(&Aggregate::sum("y", Missing::Ignore), &[]), Value::Float(0.0));
        assert_eq!(eval(&Aggregate::Count, &[]), Value::Int(0));
    }

    #[test]
    fn test_ratio_and_std_error() {
        let se = eval(&Aggregate::std_error("y", Missing::Ignore), &[0, 1, 2])
            .as_f64()
            .unwrap();
        assert_relative_eq!(se, 13.0_f64.sqrt() / 3.0_f64.sqrt(), epsilon = 1e-12);

        // Denominator of zero
        let r = Aggregate::ratio(
            Aggregate::sum("y", Missing::Ignore),
            Aggregate::sum("w", Missing::Ignore),
        );
        assert!(eval(&r, &[3]).is_missing());
    }

    #[test]
    fn test_validate_rejects_text() {
        let table = create_test_table();
        assert!(Aggregate::mean("g", Missing::Ignore).validate(&table).is_err());
        assert!(Aggregate::NDistinct { column: "g".into() }
            .validate(&table)
            .is_ok());
        assert!(Aggregate::count_non_missing("z").validate(&table).is_err());
    }

    #[test]
    fn test_parse() {
        assert_eq!(Aggregate::parse("count").unwrap(), Aggregate::Count);
        assert_eq!(
            Aggregate::parse("mean:y:ignore").unwrap(),
            Aggregate::mean("y", Missing::Ignore)
        );
        assert_eq!(
            Aggregate::parse("se:y:propagate").unwrap(),
            Aggregate::std_error("y", Missing::Propagate)
        );
        // A numeric aggregate without a policy is rejected
        assert!(Aggregate::parse("mean:y").is_err());
        assert!(Aggregate::parse("mode:y:ignore").is_err());
    }

    #[test]
    fn test_output_types_and_display() {
        assert_eq!(Aggregate::Count.output_type(), ColumnType::Int);
        assert_eq!(
            Aggregate::mean("y", Missing::Ignore).output_type(),
            ColumnType::Float
        );
        assert_eq!(
            Aggregate::std_error("y", Missing::Ignore).to_string(),
            "sd(y, na.rm) / sqrt(count_non_missing(y))"
        );
    }
}
