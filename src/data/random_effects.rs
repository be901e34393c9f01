//! Random effects specification for mixed models.
//!
//! Supports lme4-style syntax for specifying random effects:
//! - `(1 | subject)` - random intercept per subject
//! - `(1 + time | subject)` - correlated random intercept and slope
//! - `(0 + time | subject)` - random slope only (no intercept)

use crate::data::formula::split_response;
use crate::data::{ColumnType, DesignMatrix, Formula, GroupKey, Table, Value};
use crate::error::{Result, TidyError};
use nalgebra::DMatrix;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A single random effect term.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RandomEffect {
    /// Terms in the random effect (e.g., ["1"] for intercept, ["1", "time"] for intercept + slope).
    pub terms: Vec<String>,
    /// Grouping variable (e.g., "subject_id").
    pub grouping: String,
    /// Whether to include a random intercept.
    pub has_intercept: bool,
}

impl RandomEffect {
    /// Parse a random effect specification string.
    ///
    /// - `(1 | subject)` -> intercept only
    /// - `(1 + time | subject)` -> intercept + slope
    /// - `(0 + time | subject)` -> slope only
    /// - `(time | subject)` -> intercept + slope (implicit intercept)
    pub fn parse(spec: &str) -> Result<Self> {
        let spec = spec.trim();
        let inner = spec
            .strip_prefix('(')
            .and_then(|s| s.strip_suffix(')'))
            .ok_or_else(|| {
                TidyError::FormulaParse(format!(
                    "Random effect must be wrapped in parentheses: {}",
                    spec
                ))
            })?;

        let (lhs, grouping) = match inner.split_once('|') {
            Some((lhs, rhs)) if !rhs.contains('|') => (lhs.trim(), rhs.trim()),
            _ => {
                return Err(TidyError::FormulaParse(format!(
                    "Random effect must have exactly one '|': {}",
                    spec
                )))
            }
        };
        if grouping.is_empty() {
            return Err(TidyError::FormulaParse(format!(
                "Random effect in {} has no grouping variable",
                spec
            )));
        }
        if lhs.is_empty() {
            return Err(TidyError::FormulaParse(format!(
                "Random effect has no terms: {}",
                spec
            )));
        }

        let has_intercept = !lhs.split('+').any(|t| matches!(t.trim(), "0" | "-1"));
        let mut terms: Vec<String> = has_intercept.then(|| "1".to_string()).into_iter().collect();
        for slope in lhs
            .split('+')
            .map(str::trim)
            .filter(|t| !matches!(*t, "" | "1" | "0" | "-1"))
        {
            if !terms.iter().any(|t| t == slope) {
                terms.push(slope.to_string());
            }
        }

        if terms.is_empty() {
            return Err(TidyError::FormulaParse(format!(
                "Random effect {} has no intercept and no slopes",
                spec
            )));
        }

        Ok(Self {
            terms,
            grouping: grouping.to_string(),
            has_intercept,
        })
    }

    /// Check if this is a random intercept only.
    pub fn is_intercept_only(&self) -> bool {
        self.terms.len() == 1 && self.terms[0] == "1"
    }

    /// Number of random effect terms per group.
    pub fn n_terms(&self) -> usize {
        self.terms.len()
    }

    /// Slope variables (every term except the intercept).
    pub fn slopes(&self) -> Vec<&str> {
        self.terms
            .iter()
            .filter(|t| t.as_str() != "1")
            .map(|t| t.as_str())
            .collect()
    }

    /// Coefficient-style names for the random terms.
    pub fn term_names(&self) -> Vec<String> {
        self.terms
            .iter()
            .map(|t| {
                if t == "1" {
                    "(Intercept)".to_string()
                } else {
                    t.clone()
                }
            })
            .collect()
    }
}

impl std::fmt::Display for RandomEffect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.has_intercept {
            write!(f, "({} | {})", self.terms.join(" + "), self.grouping)
        } else {
            write!(f, "(0 + {} | {})", self.terms.join(" + "), self.grouping)
        }
    }
}

/// A formula with both fixed and random effects.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MixedFormula {
    /// Fixed effects formula (carries the response).
    pub fixed: Formula,
    /// Random effects.
    pub random: Vec<RandomEffect>,
    /// Original formula string.
    pub formula_str: String,
}

impl MixedFormula {
    /// Parse a mixed model formula.
    ///
    /// - `rt ~ condition + (1 | subject)`
    /// - `rt ~ block + (1 + block | subject)`
    ///
    /// # Examples
    /// ```
    /// use tidy_lmm::data::MixedFormula;
    /// let f = MixedFormula::parse("rt ~ block + (1 | subject)").unwrap();
    /// assert_eq!(f.fixed.response.as_deref(), Some("rt"));
    /// assert_eq!(f.random.len(), 1);
    /// assert!(f.random[0].is_intercept_only());
    /// ```
    pub fn parse(formula: &str) -> Result<Self> {
        let formula_str = formula.to_string();
        let (response, rhs) = split_response(formula)?;

        let re = Regex::new(r"\([^()]+\|[^()]+\)")
            .map_err(|e| TidyError::FormulaParse(e.to_string()))?;
        let random_strs: Vec<&str> = re.find_iter(rhs).map(|m| m.as_str()).collect();

        let random: Vec<RandomEffect> = random_strs
            .iter()
            .map(|s| RandomEffect::parse(s))
            .collect::<Result<Vec<_>>>()?;

        let mut fixed_str = rhs.to_string();
        for re_str in &random_strs {
            fixed_str = fixed_str.replacen(re_str, "", 1);
        }
        if fixed_str.contains('|') {
            return Err(TidyError::FormulaParse(format!(
                "Malformed random effect in '{}'",
                formula.trim()
            )));
        }

        let fixed_str = fixed_str
            .split('+')
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(" + ");

        // No fixed terms left means intercept only; a bare "0" keeps the
        // no-intercept meaning and needs at least one term.
        let fixed_rhs = if fixed_str.is_empty() {
            "1".to_string()
        } else {
            fixed_str
        };
        let fixed_formula_str = match &response {
            Some(r) => format!("{} ~ {}", r, fixed_rhs),
            None => format!("~ {}", fixed_rhs),
        };
        let fixed = Formula::parse(&fixed_formula_str)?;

        Ok(Self {
            fixed,
            random,
            formula_str,
        })
    }
}

impl std::fmt::Display for MixedFormula {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.formula_str)
    }
}

/// Per-group slice of the random effects design.
#[derive(Debug, Clone)]
pub struct GroupBlock {
    /// Group level.
    pub key: Value,
    /// Design rows (indices into the fixed design) belonging to the group.
    pub rows: Vec<usize>,
    /// Random effects design for the group (n_i × q).
    pub z: DMatrix<f64>,
}

impl GroupBlock {
    /// Number of observations in the group.
    pub fn n_obs(&self) -> usize {
        self.rows.len()
    }
}

/// Random effects design, stored block-diagonally by group.
#[derive(Debug, Clone)]
pub struct RandomDesign {
    /// One block per group level, in ascending level order.
    pub groups: Vec<GroupBlock>,
    /// Names of the random terms ("(Intercept)", slope variables).
    pub term_names: Vec<String>,
    /// Grouping variable.
    pub grouping: String,
    /// Total observations covered.
    pub n_obs: usize,
}

impl RandomDesign {
    /// Build the random design for the rows kept by a fixed design matrix.
    ///
    /// The grouping variable and every slope variable must be non-missing
    /// in those rows; build the fixed design with
    /// [`DesignMatrix::from_formula_with`] to guarantee it.
    pub fn from_random_effect(
        table: &Table,
        design: &DesignMatrix,
        random_effect: &RandomEffect,
    ) -> Result<Self> {
        let grouping = table.column(&random_effect.grouping)?;

        let mut slope_columns = Vec::new();
        for slope in random_effect.slopes() {
            let column_type = table.column_type(slope)?;
            if column_type == ColumnType::Text {
                return Err(TidyError::NotImplemented(format!(
                    "Random slope '{}' must be numeric; categorical random slopes are not supported",
                    slope
                )));
            }
            slope_columns.push(table.numeric_column(slope)?);
        }

        let mut by_level: BTreeMap<GroupKey, Vec<usize>> = BTreeMap::new();
        for (design_row, &table_row) in design.rows().iter().enumerate() {
            let level = grouping[table_row].clone();
            if level.is_missing() {
                return Err(TidyError::InvalidParameter(format!(
                    "Missing value in grouping variable '{}' at row {}",
                    random_effect.grouping,
                    table_row + 1
                )));
            }
            by_level
                .entry(GroupKey(vec![level]))
                .or_default()
                .push(design_row);
        }

        let q = random_effect.n_terms();
        let mut groups = Vec::with_capacity(by_level.len());
        for (key, rows) in by_level {
            let mut z = DMatrix::zeros(rows.len(), q);
            for (i, &design_row) in rows.iter().enumerate() {
                let table_row = design.rows()[design_row];
                let mut col = 0;
                if random_effect.has_intercept {
                    z[(i, 0)] = 1.0;
                    col = 1;
                }
                for slope_values in &slope_columns {
                    z[(i, col)] = slope_values[table_row].ok_or_else(|| {
                        TidyError::InvalidParameter(format!(
                            "Missing random slope value at row {}",
                            table_row + 1
                        ))
                    })?;
                    col += 1;
                }
            }
            let level = key.0.into_iter().next().unwrap_or(Value::Missing);
            groups.push(GroupBlock { key: level, rows, z });
        }

        Ok(Self {
            groups,
            term_names: random_effect.term_names(),
            grouping: random_effect.grouping.clone(),
            n_obs: design.n_obs(),
        })
    }

    /// Number of groups.
    pub fn n_groups(&self) -> usize {
        self.groups.len()
    }

    /// Number of random effect terms per group.
    pub fn n_terms(&self) -> usize {
        self.term_names.len()
    }

    /// Get number of observations per group.
    pub fn observations_per_group(&self) -> Vec<usize> {
        self.groups.iter().map(|g| g.n_obs()).collect()
    }
}
