//! Per-observation model output for plotting.

use crate::data::{Table, Term, Value};
use crate::error::{Result, TidyError};
use crate::model::ModelFit;

/// The numeric predictor whose slope `augment` reports.
///
/// For a mixed fit this is the first random slope; otherwise the first
/// numeric main effect of the fixed formula.
pub fn slope_variable(fit: &ModelFit) -> Option<String> {
    let formula = match fit {
        ModelFit::Lm(lm) => &lm.formula,
        ModelFit::Lmm(lmm) => {
            if let Some(slope) = lmm.formula.random.first().and_then(|re| re.slopes().first().copied()) {
                return Some(slope.to_string());
            }
            &lmm.formula.fixed
        }
    };
    // Numeric predictors keep their own name as coefficient name
    formula.terms.iter().find_map(|term| match term {
        Term::Main(var) if fit.coefficient_names().iter().any(|c| c == var) => Some(var.clone()),
        _ => None,
    })
}

/// Add `.fitted`, `.resid`, `.intercept` and `.slope` columns to the table
/// a model was fit on.
///
/// `.slope` is the coefficient of [`slope_variable`]; for mixed fits it is
/// the row's group coefficient. `.intercept` is `.fitted - .slope * x`, so
/// it absorbs every other term of the row (group deviation, text dummies,
/// further covariates) and each row lies on its own reference line. With
/// no slope variable `.slope` is missing and `.intercept` is the fitted
/// value. Rows dropped from the fit get missing values in all four columns.
pub fn augment(table: &Table, fit: &ModelFit) -> Result<Table> {
    let n = table.n_rows();
    if let Some(&max) = fit.rows().iter().max() {
        if max >= n {
            return Err(TidyError::DimensionMismatch {
                expected: max + 1,
                actual: n,
            });
        }
    }

    let slope = slope_variable(fit);
    let x = slope
        .as_deref()
        .map(|s| table.numeric_column(s))
        .transpose()?;
    let row_slopes: Vec<Option<f64>> = match fit {
        ModelFit::Lm(lm) => {
            let value = slope.as_deref().and_then(|s| lm.coefficient(s));
            vec![value; lm.n_obs()]
        }
        ModelFit::Lmm(lmm) => {
            let slope_idx = slope
                .as_deref()
                .and_then(|s| lmm.coef_names().iter().position(|n| n == s));
            let per_group: Vec<Vec<f64>> = (0..lmm.n_groups())
                .map(|g| lmm.group_coefficients(g))
                .collect();
            lmm.row_groups()
                .into_iter()
                .map(|g| slope_idx.map(|k| per_group[g][k]))
                .collect()
        }
    };

    let mut fitted = vec![Value::Missing; n];
    let mut resid = vec![Value::Missing; n];
    let mut intercepts = vec![Value::Missing; n];
    let mut slopes = vec![Value::Missing; n];
    for (i, &row) in fit.rows().iter().enumerate() {
        let f = fit.fitted()[i];
        fitted[row] = Value::from_f64(f);
        resid[row] = Value::from_f64(fit.residuals()[i]);
        let x_row = x.as_ref().and_then(|col| col[row]);
        match (row_slopes[i], x_row) {
            (Some(b), Some(x_row)) => {
                slopes[row] = Value::from_f64(b);
                intercepts[row] = Value::from_f64(f - b * x_row);
            }
            _ => intercepts[row] = Value::from_f64(f),
        }
    }

    table
        .with_column(".fitted", fitted)?
        .with_column(".resid", resid)?
        .with_column(".intercept", intercepts)?
        .with_column(".slope", slopes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{model_lm, model_lmm, LmmConfig};
    use approx::assert_relative_eq;

    fn create_test_table() -> Table {
        Table::from_csv_str(
            "g,x,y\n\
             a,0,1.0\na,1,3.1\na,2,4.9\n\
             b,0,3.0\nb,1,5.2\nb,2,6.8\n\
             c,0,0.1\nc,1,1.9\nc,2,4.2\n\
             c,3,NA\n",
        )
        .unwrap()
    }

    #[test]
    fn test_augment_lm() {
        let table = create_test_table();
        let fit = ModelFit::from(model_lm(&table, "y ~ x").unwrap());
        let out = augment(&table, &fit).unwrap();

        assert_eq!(out.n_columns(), table.n_columns() + 4);
        for row in out.rows().take(9) {
            let expected = row.get_f64(".intercept").unwrap()
                + row.get_f64(".slope").unwrap() * row.get_f64("x").unwrap();
            assert_relative_eq!(row.get_f64(".fitted").unwrap(), expected, epsilon = 1e-9);
            assert_relative_eq!(
                row.get_f64(".resid").unwrap(),
                row.get_f64("y").unwrap() - expected,
                epsilon = 1e-9
            );
        }
        assert!(out.value(9, ".fitted").unwrap().is_missing());
        assert!(out.value(9, ".slope").unwrap().is_missing());
    }

    #[test]
    fn test_augment_lmm_replicates_group_lines() {
        let table = create_test_table();
        let fit = ModelFit::from(
            model_lmm(&table, "y ~ x + (1 | g)", &LmmConfig::default()).unwrap(),
        );
        let out = augment(&table, &fit).unwrap();

        let a = out.value(0, ".intercept").unwrap().clone();
        assert_eq!(out.value(1, ".intercept").unwrap(), &a);
        assert_ne!(out.value(3, ".intercept").unwrap(), &a);
        for row in out.rows().take(9) {
            let expected = row.get_f64(".intercept").unwrap()
                + row.get_f64(".slope").unwrap() * row.get_f64("x").unwrap();
            assert_relative_eq!(row.get_f64(".fitted").unwrap(), expected, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_augment_intercept_includes_dummies() {
        let table = Table::from_csv_str(
            "g,sex,x,y\n\
             a,f,0,1.0\na,m,1,3.6\na,f,2,4.9\na,m,3,7.4\n\
             b,f,0,3.0\nb,m,1,5.9\nb,f,2,6.8\nb,m,3,9.6\n\
             c,f,0,0.1\nc,m,1,2.5\nc,f,2,4.2\nc,m,3,6.9\n",
        )
        .unwrap();
        let fit = ModelFit::from(
            model_lmm(&table, "y ~ x + sex + (1 | g)", &LmmConfig::default()).unwrap(),
        );
        let out = augment(&table, &fit).unwrap();

        for row in out.rows() {
            let expected = row.get_f64(".intercept").unwrap()
                + row.get_f64(".slope").unwrap() * row.get_f64("x").unwrap();
            assert_relative_eq!(row.get_f64(".fitted").unwrap(), expected, epsilon = 1e-9);
        }
        // Same group, different sex: the male line sits higher
        let female = out.row(0).unwrap().get_f64(".intercept").unwrap();
        let male = out.row(1).unwrap().get_f64(".intercept").unwrap();
        assert_relative_eq!(
            male - female,
            fit.coefficient("sexm").unwrap(),
            epsilon = 1e-9
        );
    }

    #[test]
    fn test_augment_without_slope_variable() {
        let table = create_test_table();
        let fit = ModelFit::from(model_lm(&table, "y ~ g").unwrap());
        let out = augment(&table, &fit).unwrap();
        assert!(out.value(0, ".slope").unwrap().is_missing());
        assert_eq!(out.value(0, ".intercept").unwrap(), out.value(0, ".fitted").unwrap());
    }

    #[test]
    fn test_slope_variable() {
        let table = Table::from_csv_str("g,x,t,y\na,1,0,1\na,2,1,2\nb,1,0,2\nb,3,1,5\nc,2,1,3\n")
            .unwrap();
        let lm = ModelFit::from(model_lm(&table, "y ~ g + x").unwrap());
        assert_eq!(slope_variable(&lm).as_deref(), Some("x"));

        let lm = ModelFit::from(model_lm(&table, "y ~ g").unwrap());
        assert_eq!(slope_variable(&lm), None);
    }

    #[test]
    fn test_augment_wrong_table() {
        let table = create_test_table();
        let fit = ModelFit::from(model_lm(&table, "y ~ x").unwrap());
        let small = table.head(3);
        assert!(augment(&small, &fit).is_err());
    }
}
