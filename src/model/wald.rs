//! Wald tests on fitted coefficients.
//!
//! Every coefficient is tested against H0: β = 0 with the statistic
//! β / SE(β). Least-squares fits compare it to a t-distribution with the
//! residual degrees of freedom; mixed fits use the standard normal.

use crate::data::{ColumnType, Table, Value};
use crate::error::{Result, TidyError};
use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, Normal, StudentsT};

/// Reference distribution of the Wald statistic.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Reference {
    /// Student t with the given degrees of freedom.
    T { df: f64 },
    /// Standard normal.
    Z,
}

impl Reference {
    fn column_name(&self) -> &'static str {
        match self {
            Reference::T { .. } => "t_value",
            Reference::Z => "z_value",
        }
    }
}

/// Wald test of one coefficient.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaldRow {
    pub term: String,
    pub estimate: f64,
    pub std_error: f64,
    pub statistic: f64,
    /// Two-sided p-value.
    pub p_value: f64,
}

/// Wald tests for every coefficient of a fit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoefficientTable {
    pub rows: Vec<WaldRow>,
    pub reference: Reference,
}

impl CoefficientTable {
    /// Test each estimate against zero.
    pub fn new(
        terms: &[String],
        estimates: &[f64],
        std_errors: &[f64],
        reference: Reference,
    ) -> Result<Self> {
        if terms.len() != estimates.len() || terms.len() != std_errors.len() {
            return Err(TidyError::DimensionMismatch {
                expected: terms.len(),
                actual: estimates.len().min(std_errors.len()),
            });
        }

        let cdf: Box<dyn Fn(f64) -> f64> = match reference {
            Reference::T { df } => {
                let t_dist = StudentsT::new(0.0, 1.0, df)
                    .map_err(|e| TidyError::Numerical(format!("t distribution: {}", e)))?;
                Box::new(move |x| t_dist.cdf(x))
            }
            Reference::Z => {
                let normal = Normal::new(0.0, 1.0)
                    .map_err(|e| TidyError::Numerical(format!("normal distribution: {}", e)))?;
                Box::new(move |x| normal.cdf(x))
            }
        };

        let rows = terms
            .iter()
            .zip(estimates.iter().zip(std_errors))
            .map(|(term, (&estimate, &std_error))| {
                let statistic = if std_error > 0.0 && std_error.is_finite() {
                    estimate / std_error
                } else {
                    f64::NAN
                };
                let p_value = if statistic.is_nan() {
                    f64::NAN
                } else {
                    2.0 * (1.0 - cdf(statistic.abs()))
                };
                WaldRow {
                    term: term.clone(),
                    estimate,
                    std_error,
                    statistic,
                    p_value,
                }
            })
            .collect();

        Ok(Self { rows, reference })
    }

    /// Look up a coefficient by name.
    pub fn get(&self, term: &str) -> Option<&WaldRow> {
        self.rows.iter().find(|r| r.term == term)
    }

    /// Number of coefficients.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// As a table with columns `term, estimate, std_error, t_value|z_value, p_value`.
    pub fn to_table(&self) -> Result<Table> {
        let n = self.rows.len();
        let float = |f: fn(&WaldRow) -> f64| -> Vec<Value> {
            self.rows.iter().map(|r| Value::from_f64(f(r))).collect()
        };
        Table::from_typed_columns(
            vec![
                (
                    "term",
                    ColumnType::Text,
                    self.rows.iter().map(|r| Value::from(r.term.as_str())).collect(),
                ),
                ("estimate", ColumnType::Float, float(|r| r.estimate)),
                ("std_error", ColumnType::Float, float(|r| r.std_error)),
                (
                    self.reference.column_name(),
                    ColumnType::Float,
                    float(|r| r.statistic),
                ),
                ("p_value", ColumnType::Float, float(|r| r.p_value)),
            ],
            n,
        )
    }
}

impl std::fmt::Display for CoefficientTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let width = self
            .rows
            .iter()
            .map(|r| r.term.len())
            .max()
            .unwrap_or(0)
            .max(4);
        let (stat, p) = match self.reference {
            Reference::T { .. } => ("t value", "Pr(>|t|)"),
            Reference::Z => ("z value", "Pr(>|z|)"),
        };
        writeln!(
            f,
            "{:<w$}  {:>10}  {:>10}  {:>8}  {:>10}",
            "",
            "Estimate",
            "Std. Error",
            stat,
            p,
            w = width
        )?;
        for r in &self.rows {
            writeln!(
                f,
                "{:<w$}  {:>10.4}  {:>10.4}  {:>8.3}  {:>10.4e}",
                r.term,
                r.estimate,
                r.std_error,
                r.statistic,
                r.p_value,
                w = width
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn names() -> Vec<String> {
        vec!["(Intercept)".to_string(), "x".to_string()]
    }

    #[test]
    fn test_z_reference() {
        let table = CoefficientTable::new(&names(), &[1.96, 0.0], &[1.0, 0.5], Reference::Z).unwrap();
        let row = table.get("(Intercept)").unwrap();
        assert_relative_eq!(row.statistic, 1.96);
        assert_relative_eq!(row.p_value, 0.05, epsilon = 1e-3);
        assert_relative_eq!(table.get("x").unwrap().p_value, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_t_reference_is_wider_than_z() {
        let t = CoefficientTable::new(&names(), &[2.0, 1.0], &[1.0, 1.0], Reference::T { df: 5.0 })
            .unwrap();
        let z = CoefficientTable::new(&names(), &[2.0, 1.0], &[1.0, 1.0], Reference::Z).unwrap();
        assert!(t.get("(Intercept)").unwrap().p_value > z.get("(Intercept)").unwrap().p_value);
    }

    #[test]
    fn test_zero_std_error_gives_nan() {
        let table = CoefficientTable::new(&names(), &[1.0, 1.0], &[0.0, 1.0], Reference::Z).unwrap();
        assert!(table.rows[0].statistic.is_nan());
        assert!(table.rows[0].p_value.is_nan());

        let out = table.to_table().unwrap();
        assert!(out.value(0, "p_value").unwrap().is_missing());
        assert_eq!(out.column_names()[3], "z_value");
    }

    #[test]
    fn test_length_mismatch() {
        assert!(CoefficientTable::new(&names(), &[1.0], &[1.0, 1.0], Reference::Z).is_err());
    }

    #[test]
    fn test_display() {
        let table = CoefficientTable::new(&names(), &[1.0, 2.0], &[0.5, 0.5], Reference::T { df: 10.0 })
            .unwrap();
        let text = table.to_string();
        assert!(text.contains("Pr(>|t|)"));
        assert!(text.contains("(Intercept)"));
    }
}
