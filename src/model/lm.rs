//! Linear model fitting via OLS.

use crate::data::{DesignMatrix, Formula, Table, Value};
use crate::error::{Result, TidyError};
use crate::model::wald::{CoefficientTable, Reference};
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Relative tolerance on the diagonal of R below which the design is
/// treated as rank deficient.
const RANK_TOL: f64 = 1e-10;

/// Summary statistics of a least-squares fit, suitable for serialisation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LmSummary {
    pub formula: String,
    pub n_obs: usize,
    pub n_dropped: usize,
    pub df_residual: usize,
    pub sigma: f64,
    pub r_squared: f64,
    pub adj_r_squared: f64,
    pub log_likelihood: f64,
    pub aic: f64,
    pub bic: f64,
    pub coefficients: CoefficientTable,
}

/// An ordinary least-squares fit of one response.
#[derive(Debug, Clone)]
pub struct LmFit {
    /// The formula that was fit.
    pub formula: Formula,
    /// Fixed design; rows map back to the source table.
    pub design: DesignMatrix,
    /// Estimated coefficients, in design column order.
    pub coefficients: Vec<f64>,
    /// Standard errors of coefficients.
    pub std_errors: Vec<f64>,
    /// Fitted values, one per used row.
    pub fitted: Vec<f64>,
    /// Residuals (observed minus fitted), one per used row.
    pub residuals: Vec<f64>,
    /// Residual standard error (sigma).
    pub sigma: f64,
    /// R-squared.
    pub r_squared: f64,
    /// Adjusted R-squared.
    pub adj_r_squared: f64,
    /// Degrees of freedom (residual).
    pub df_residual: usize,
    /// Rows removed by listwise deletion.
    pub n_dropped: usize,
}

impl LmFit {
    /// Coefficient names from the design matrix.
    pub fn coefficient_names(&self) -> &[String] {
        self.design.coefficient_names()
    }

    /// Get a coefficient by name.
    pub fn coefficient(&self, name: &str) -> Option<f64> {
        let idx = self.design.coefficient_index(name)?;
        self.coefficients.get(idx).copied()
    }

    /// Get the intercept, if the model has one.
    pub fn intercept(&self) -> Option<f64> {
        self.coefficient("(Intercept)")
    }

    /// Number of observations used.
    pub fn n_obs(&self) -> usize {
        self.fitted.len()
    }

    /// Source-table row of each fitted value.
    pub fn rows(&self) -> &[usize] {
        self.design.rows()
    }

    /// Gaussian log-likelihood at the least-squares estimate.
    pub fn log_likelihood(&self) -> f64 {
        let n = self.n_obs() as f64;
        let rss: f64 = self.residuals.iter().map(|e| e * e).sum();
        -0.5 * n * ((2.0 * PI).ln() + (rss / n).ln() + 1.0)
    }

    /// Number of estimated parameters, including the residual variance.
    pub fn n_parameters(&self) -> usize {
        self.coefficients.len() + 1
    }

    /// Akaike information criterion.
    pub fn aic(&self) -> f64 {
        -2.0 * self.log_likelihood() + 2.0 * self.n_parameters() as f64
    }

    /// Bayesian information criterion.
    pub fn bic(&self) -> f64 {
        -2.0 * self.log_likelihood() + (self.n_obs() as f64).ln() * self.n_parameters() as f64
    }

    /// Wald t-tests for every coefficient.
    pub fn coef_table(&self) -> Result<CoefficientTable> {
        CoefficientTable::new(
            self.coefficient_names(),
            &self.coefficients,
            &self.std_errors,
            Reference::T {
                df: self.df_residual as f64,
            },
        )
    }

    /// Predict the response for every row of `table`.
    ///
    /// Rows with a missing predictor get a missing prediction.
    pub fn predict(&self, table: &Table) -> Result<Vec<Value>> {
        let new_design = self.design.for_new_data(table, &self.formula)?;
        let beta = DVector::from_column_slice(&self.coefficients);
        let predicted = new_design.matrix() * beta;

        let mut out = vec![Value::Missing; table.n_rows()];
        for (i, &row) in new_design.rows().iter().enumerate() {
            out[row] = Value::from_f64(predicted[i]);
        }
        Ok(out)
    }

    /// Serialisable summary.
    pub fn summary(&self) -> Result<LmSummary> {
        Ok(LmSummary {
            formula: self.formula.to_string(),
            n_obs: self.n_obs(),
            n_dropped: self.n_dropped,
            df_residual: self.df_residual,
            sigma: self.sigma,
            r_squared: self.r_squared,
            adj_r_squared: self.adj_r_squared,
            log_likelihood: self.log_likelihood(),
            aic: self.aic(),
            bic: self.bic(),
            coefficients: self.coef_table()?,
        })
    }
}

impl std::fmt::Display for LmFit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Linear model fit by least squares")?;
        writeln!(f, "Formula: {}", self.formula)?;
        writeln!(
            f,
            "Observations: {} ({} dropped for missing values)",
            self.n_obs(),
            self.n_dropped
        )?;
        writeln!(f)?;
        match self.coef_table() {
            Ok(table) => write!(f, "{}", table)?,
            Err(_) => writeln!(f, "(coefficient tests unavailable)")?,
        }
        writeln!(f)?;
        writeln!(
            f,
            "Residual standard error: {:.4} on {} degrees of freedom",
            self.sigma, self.df_residual
        )?;
        writeln!(
            f,
            "R-squared: {:.4}, adjusted R-squared: {:.4}",
            self.r_squared, self.adj_r_squared
        )?;
        write!(f, "AIC: {:.2}, BIC: {:.2}", self.aic(), self.bic())
    }
}

/// Fit a linear model from a formula string such as `"body_mass_g ~ flipper_length_mm"`.
pub fn model_lm(table: &Table, formula: &str) -> Result<LmFit> {
    let formula = Formula::parse(formula)?;
    fit_lm(table, &formula)
}

/// Fit a linear model to a table.
///
/// Rows with a missing response or predictor are dropped. Uses QR
/// decomposition for numerical stability.
pub fn fit_lm(table: &Table, formula: &Formula) -> Result<LmFit> {
    let response = formula.require_response()?;
    let design = DesignMatrix::from_formula(table, formula)?;
    let n_dropped = table.n_rows() - design.n_obs();
    if n_dropped > 0 {
        tracing::warn!(
            dropped = n_dropped,
            formula = %formula,
            "dropped rows with missing values"
        );
    }

    let y = design.column_vector(table, response)?;
    let n = design.n_obs();
    let p = design.n_coefficients();

    // Check rank
    let df_residual = n.saturating_sub(p);
    if df_residual == 0 {
        return Err(TidyError::Numerical(format!(
            "Model is saturated ({} observations for {} coefficients)",
            n, p
        )));
    }

    let ols = least_squares(design.matrix(), &y)?;
    let fitted_vec = design.matrix() * &ols.beta;
    let residuals_vec = &y - &fitted_vec;

    // Residual sum of squares
    let rss: f64 = residuals_vec.iter().map(|e| e * e).sum();
    let sigma = (rss / df_residual as f64).sqrt();

    // Standard errors: SE = sigma * sqrt(diag((X'X)^-1))
    let std_errors: Vec<f64> = (0..p)
        .map(|j| sigma * ols.xtx_inv[(j, j)].max(0.0).sqrt())
        .collect();

    // R-squared, centred only when the model has an intercept
    let tss: f64 = if design.has_intercept() {
        let y_mean = y.mean();
        y.iter().map(|yi| (yi - y_mean).powi(2)).sum()
    } else {
        y.iter().map(|yi| yi * yi).sum()
    };
    let r_squared = if tss > 0.0 { 1.0 - rss / tss } else { 0.0 };
    let df_model = if design.has_intercept() { p - 1 } else { p };
    let adj_r_squared = if df_model > 0 {
        let n_eff = if design.has_intercept() { n - 1 } else { n };
        1.0 - (1.0 - r_squared) * n_eff as f64 / df_residual as f64
    } else {
        r_squared
    };

    tracing::debug!(n, p, sigma, r_squared, "fitted linear model");

    Ok(LmFit {
        formula: formula.clone(),
        coefficients: ols.beta.iter().copied().collect(),
        std_errors,
        fitted: fitted_vec.iter().copied().collect(),
        residuals: residuals_vec.iter().copied().collect(),
        sigma,
        r_squared,
        adj_r_squared,
        df_residual,
        n_dropped,
        design,
    })
}

/// Least-squares solution with the unscaled covariance `(X'X)^-1`.
pub(crate) struct LeastSquares {
    pub beta: DVector<f64>,
    pub xtx_inv: DMatrix<f64>,
}

/// Solve `min ||y - X b||` through the QR decomposition of `X`.
///
/// Fails when `X` is rank deficient.
pub(crate) fn least_squares(x: &DMatrix<f64>, y: &DVector<f64>) -> Result<LeastSquares> {
    let p = x.ncols();
    if x.nrows() < p {
        return Err(TidyError::Numerical(
            "More coefficients than observations".to_string(),
        ));
    }

    let qr = x.clone().qr();
    let r = qr.r();
    let scale = r.diagonal().iter().fold(0.0_f64, |m, d| m.max(d.abs()));
    if let Some(j) = (0..p).find(|&j| r[(j, j)].abs() <= RANK_TOL * scale.max(1.0)) {
        return Err(TidyError::Numerical(format!(
            "Design matrix is rank deficient (column {} is collinear with earlier columns)",
            j + 1
        )));
    }

    let qty = qr.q().transpose() * y;
    let beta = r.solve_upper_triangular(&qty).ok_or_else(|| {
        TidyError::Numerical("Failed to solve the triangular system".to_string())
    })?;
    let r_inv = r
        .try_inverse()
        .ok_or_else(|| TidyError::Numerical("R factor is singular".to_string()))?;
    let xtx_inv = &r_inv * r_inv.transpose();

    Ok(LeastSquares { beta, xtx_inv })
}
