//! Design matrix construction from a table and formula.

use crate::data::{ColumnType, Formula, Table, Term, Value};
use crate::error::{Result, TidyError};
use nalgebra::{DMatrix, DVector};
use std::collections::HashMap;

/// A design matrix for linear modeling.
///
/// Rows with a missing value in the response or any predictor are dropped
/// (listwise deletion); [`DesignMatrix::rows`] maps each design row back to
/// its row in the source table.
#[derive(Debug, Clone)]
pub struct DesignMatrix {
    /// The design matrix (observations × coefficients).
    matrix: DMatrix<f64>,
    /// Names of the coefficients (columns).
    coefficient_names: Vec<String>,
    /// Source-table row for each design row.
    rows: Vec<usize>,
    /// Levels of each categorical predictor; the first is the reference.
    levels: HashMap<String, Vec<String>>,
    /// Column type of each predictor at build time.
    types: HashMap<String, ColumnType>,
}

impl DesignMatrix {
    /// Build a design matrix from a table and formula.
    ///
    /// Numeric columns enter as-is; text columns are dummy coded against
    /// their alphabetically first level.
    pub fn from_formula(table: &Table, formula: &Formula) -> Result<Self> {
        Self::from_formula_with(table, formula, &[])
    }

    /// Like [`from_formula`](Self::from_formula), also requiring the listed
    /// extra columns to be non-missing in every kept row.
    pub fn from_formula_with(table: &Table, formula: &Formula, extra: &[&str]) -> Result<Self> {
        let mut required: Vec<&str> = formula.variables();
        if let Some(response) = &formula.response {
            required.push(response);
        }
        required.extend_from_slice(extra);
        for var in &required {
            if !table.has_column(var) {
                return Err(TidyError::MissingColumn(var.to_string()));
            }
        }

        let complete = table.complete_rows(&required)?;

        let mut levels = HashMap::new();
        let mut types = HashMap::new();
        for var in formula.variables() {
            types.insert(var.to_string(), table.column_type(var)?);
            if table.column_type(var)? == ColumnType::Text {
                let column = table.column(var)?;
                let mut lv: Vec<String> = complete
                    .iter()
                    .filter_map(|&r| column[r].as_text().map(String::from))
                    .collect();
                lv.sort();
                lv.dedup();
                levels.insert(var.to_string(), lv);
            }
        }

        Self::build(table, formula, complete, levels, types)
    }

    /// Rebuild the design for new data using this matrix's categorical levels.
    ///
    /// Rows whose predictors are missing are dropped; the response is not
    /// required. A categorical value not seen at fit time, or a predictor
    /// whose observed values have a different kind (text versus number)
    /// than at fit time, is an error.
    pub fn for_new_data(&self, table: &Table, formula: &Formula) -> Result<Self> {
        let required = formula.variables();
        for var in &required {
            if !table.has_column(var) {
                return Err(TidyError::MissingColumn(var.to_string()));
            }
        }

        for var in &required {
            let Some(&fit_type) = self.types.get(*var) else {
                continue;
            };
            let observed = table
                .column(var)?
                .iter()
                .filter_map(Value::column_type)
                .reduce(ColumnType::unify);
            if let Some(new_type) = observed {
                if new_type.is_numeric() != fit_type.is_numeric() {
                    return Err(TidyError::TypeMismatch {
                        column: var.to_string(),
                        reason: format!(
                            "the model was fit with a {} column, new data has {} values",
                            fit_type, new_type
                        ),
                    });
                }
            }
        }

        let complete = table.complete_rows(&required)?;

        for (var, lv) in &self.levels {
            let column = table.column(var)?;
            for &r in &complete {
                if let Some(level) = column[r].as_text() {
                    if !lv.iter().any(|l| l == level) {
                        return Err(TidyError::InvalidParameter(format!(
                            "Level '{}' of '{}' was not present when the model was fit",
                            level, var
                        )));
                    }
                }
            }
        }

        let design = Self::build(
            table,
            formula,
            complete,
            self.levels.clone(),
            self.types.clone(),
        )?;
        if design.n_coefficients() != self.n_coefficients() {
            return Err(TidyError::DimensionMismatch {
                expected: self.n_coefficients(),
                actual: design.n_coefficients(),
            });
        }
        Ok(design)
    }

    fn build(
        table: &Table,
        formula: &Formula,
        rows: Vec<usize>,
        levels: HashMap<String, Vec<String>>,
        types: HashMap<String, ColumnType>,
    ) -> Result<Self> {
        let n = rows.len();
        let mut coefficient_names = Vec::new();
        let mut columns: Vec<Vec<f64>> = Vec::new();

        if formula.intercept {
            coefficient_names.push("(Intercept)".to_string());
            columns.push(vec![1.0; n]);
        }

        for term in &formula.terms {
            match term {
                Term::Intercept => {}
                Term::Main(var) => {
                    let drop_reference = formula.intercept;
                    for (name, col) in term_columns(table, var, &rows, &levels, &types, drop_reference)? {
                        coefficient_names.push(name);
                        columns.push(col);
                    }
                }
                Term::Interaction(var1, var2) => {
                    let cols1 = term_columns(table, var1, &rows, &levels, &types, true)?;
                    let cols2 = term_columns(table, var2, &rows, &levels, &types, true)?;
                    for (name1, col1) in &cols1 {
                        for (name2, col2) in &cols2 {
                            coefficient_names.push(format!("{}:{}", name1, name2));
                            columns.push(col1.iter().zip(col2).map(|(a, b)| a * b).collect());
                        }
                    }
                }
            }
        }

        let matrix = DMatrix::from_fn(n, columns.len(), |i, j| columns[j][i]);

        Ok(Self {
            matrix,
            coefficient_names,
            rows,
            levels,
            types,
        })
    }

    /// Extract a numeric column for the kept rows.
    pub fn column_vector(&self, table: &Table, column: &str) -> Result<DVector<f64>> {
        let values = table.numeric_column(column)?;
        let mut out = Vec::with_capacity(self.rows.len());
        for &r in &self.rows {
            out.push(values[r].ok_or_else(|| {
                TidyError::InvalidParameter(format!(
                    "Column '{}' is missing at row {}",
                    column,
                    r + 1
                ))
            })?);
        }
        Ok(DVector::from_vec(out))
    }

    /// Get the design matrix.
    pub fn matrix(&self) -> &DMatrix<f64> {
        &self.matrix
    }

    /// Get coefficient names.
    pub fn coefficient_names(&self) -> &[String] {
        &self.coefficient_names
    }

    /// Source-table row index for each design row.
    pub fn rows(&self) -> &[usize] {
        &self.rows
    }

    /// Number of observations (rows).
    pub fn n_obs(&self) -> usize {
        self.matrix.nrows()
    }

    /// Number of coefficients (columns).
    pub fn n_coefficients(&self) -> usize {
        self.matrix.ncols()
    }

    /// Get the index of a coefficient by name.
    pub fn coefficient_index(&self, name: &str) -> Option<usize> {
        self.coefficient_names.iter().position(|n| n == name)
    }

    /// Check if the matrix has an intercept.
    pub fn has_intercept(&self) -> bool {
        self.coefficient_names.first().map(|s| s.as_str()) == Some("(Intercept)")
    }
}

/// Columns contributed by one variable.
fn term_columns(
    table: &Table,
    var: &str,
    rows: &[usize],
    levels: &HashMap<String, Vec<String>>,
    types: &HashMap<String, ColumnType>,
    drop_reference: bool,
) -> Result<Vec<(String, Vec<f64>)>> {
    let values = table.column(var)?;
    let column_type = match types.get(var) {
        Some(&t) => t,
        None => table.column_type(var)?,
    };
    match column_type {
        ColumnType::Int | ColumnType::Float => {
            let col = rows
                .iter()
                .map(|&r| values[r].as_f64().unwrap_or(f64::NAN))
                .collect();
            Ok(vec![(var.to_string(), col)])
        }
        ColumnType::Text => {
            let lv = levels.get(var).cloned().unwrap_or_default();
            let skip = if drop_reference { 1 } else { 0 };
            Ok(lv
                .iter()
                .skip(skip)
                .map(|level| {
                    let col = rows
                        .iter()
                        .map(|&r| match &values[r] {
                            Value::Text(s) if s == level => 1.0,
                            _ => 0.0,
                        })
                        .collect();
                    (format!("{}{}", var, level), col)
                })
                .collect())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_table() -> Table {
        Table::from_csv_str(
            "group,age,score\n\
             control,25,1.0\n\
             treatment,30,2.0\n\
             control,35,NA\n\
             treatment,28,3.5\n\
             control,NA,2.2\n",
        )
        .unwrap()
    }

    #[test]
    fn test_intercept_only() {
        let table = create_test_table();
        let formula = Formula::parse("score ~ 1").unwrap();
        let dm = DesignMatrix::from_formula(&table, &formula).unwrap();

        assert_eq!(dm.n_obs(), 4);
        assert_eq!(dm.coefficient_names(), &["(Intercept)"]);
        assert!(dm.matrix().iter().all(|&v| v == 1.0));
    }

    #[test]
    fn test_listwise_deletion() {
        let table = create_test_table();
        let formula = Formula::parse("score ~ age").unwrap();
        let dm = DesignMatrix::from_formula(&table, &formula).unwrap();

        // Row 2 has missing score, row 4 missing age
        assert_eq!(dm.rows(), &[0, 1, 3]);
        let age_col: Vec<f64> = (0..3).map(|i| dm.matrix()[(i, 1)]).collect();
        assert_eq!(age_col, vec![25.0, 30.0, 28.0]);

        let y = dm.column_vector(&table, "score").unwrap();
        assert_eq!(y.as_slice(), &[1.0, 2.0, 3.5]);
    }

    #[test]
    fn test_categorical_variable() {
        let table = create_test_table();
        let formula = Formula::parse("score ~ group").unwrap();
        let dm = DesignMatrix::from_formula(&table, &formula).unwrap();

        assert_eq!(dm.coefficient_names(), &["(Intercept)", "grouptreatment"]);
        let group_col: Vec<f64> = (0..dm.n_obs()).map(|i| dm.matrix()[(i, 1)]).collect();
        assert_eq!(group_col, vec![0.0, 1.0, 1.0, 0.0]);
    }

    #[test]
    fn test_no_intercept_keeps_all_levels() {
        let table = create_test_table();
        let formula = Formula::parse("score ~ 0 + group").unwrap();
        let dm = DesignMatrix::from_formula(&table, &formula).unwrap();

        assert!(!dm.has_intercept());
        assert_eq!(dm.coefficient_names(), &["groupcontrol", "grouptreatment"]);
    }

    #[test]
    fn test_interaction() {
        let table = create_test_table();
        let formula = Formula::parse("score ~ group * age").unwrap();
        let dm = DesignMatrix::from_formula(&table, &formula).unwrap();

        assert_eq!(
            dm.coefficient_names(),
            &["(Intercept)", "grouptreatment", "age", "grouptreatment:age"]
        );
        let interaction: Vec<f64> = (0..3).map(|i| dm.matrix()[(i, 3)]).collect();
        assert_eq!(interaction, vec![0.0, 30.0, 28.0]);
    }

    #[test]
    fn test_missing_column() {
        let table = create_test_table();
        let formula = Formula::parse("score ~ height").unwrap();
        assert!(matches!(
            DesignMatrix::from_formula(&table, &formula),
            Err(TidyError::MissingColumn(_))
        ));
    }

    #[test]
    fn test_new_data_unknown_level() {
        let table = create_test_table();
        let formula = Formula::parse("score ~ group").unwrap();
        let dm = DesignMatrix::from_formula(&table, &formula).unwrap();

        let new = Table::from_csv_str("group\ncontrol\nplacebo\n").unwrap();
        assert!(dm.for_new_data(&new, &formula).is_err());

        let ok = Table::from_csv_str("group\ntreatment\ncontrol\n").unwrap();
        let nd = dm.for_new_data(&ok, &formula).unwrap();
        assert_eq!(nd.matrix()[(0, 1)], 1.0);
        assert_eq!(nd.matrix()[(1, 1)], 0.0);
    }

    #[test]
    fn test_new_data_all_missing_predictor() {
        let table = create_test_table();
        let formula = Formula::parse("score ~ age").unwrap();
        let dm = DesignMatrix::from_formula(&table, &formula).unwrap();

        let blank = Table::from_csv_str("age\nNA\nNA\n").unwrap();
        let nd = dm.for_new_data(&blank, &formula).unwrap();
        assert_eq!(nd.n_obs(), 0);
        assert_eq!(nd.n_coefficients(), dm.n_coefficients());

        let blank_text = Table::from_typed_columns(
            vec![("age", ColumnType::Text, vec![Value::Missing, Value::Missing])],
            2,
        )
        .unwrap();
        let nd = dm.for_new_data(&blank_text, &formula).unwrap();
        assert_eq!(nd.n_obs(), 0);
        assert_eq!(nd.n_coefficients(), 2);
    }

    #[test]
    fn test_new_data_wrong_kind_is_type_mismatch() {
        let table = create_test_table();
        let numeric = Formula::parse("score ~ age").unwrap();
        let dm = DesignMatrix::from_formula(&table, &numeric).unwrap();
        let text_ages = Table::from_csv_str("age\nyoung\nold\n").unwrap();
        assert!(matches!(
            dm.for_new_data(&text_ages, &numeric),
            Err(TidyError::TypeMismatch { .. })
        ));

        let categorical = Formula::parse("score ~ group").unwrap();
        let dm = DesignMatrix::from_formula(&table, &categorical).unwrap();
        let numeric_groups = Table::from_csv_str("group\n1\n2\n").unwrap();
        assert!(matches!(
            dm.for_new_data(&numeric_groups, &categorical),
            Err(TidyError::TypeMismatch { .. })
        ));
    }
}
