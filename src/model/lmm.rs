//! Linear mixed models for grouped and repeated-measures data.
//!
//! Fits `y_i = X_i β + Z_i b_i + ε_i` for each group `i`, with
//! `b_i ~ N(0, D)` and `ε_i ~ N(0, σ²I)`, by the EM algorithm of Laird
//! and Ware (1982). REML (the default) or ML estimates of `D` and `σ²`
//! are found by alternating:
//!
//! - GLS fixed effects given the current variance components,
//! - BLUPs `b_i = D Z_i' V_i⁻¹ (y_i - X_i β)` with `V_i = Z_i D Z_i' + σ²I`,
//! - variance updates from the conditional moments of `b_i` and `ε_i`.
//!
//! Group-specific estimates are shrunk toward the population line by
//! construction. Convergence problems, singular covariance estimates and
//! sparse groups are reported as [`FitWarning`]s on the fit rather than
//! errors.
//!
//! # Example
//! ```no_run
//! use tidy_lmm::data::Table;
//! use tidy_lmm::model::{model_lmm, LmmConfig};
//!
//! let table = Table::from_csv("sleep.csv").unwrap();
//! let fit = model_lmm(&table, "reaction ~ days + (1 + days | subject)", &LmmConfig::default()).unwrap();
//! println!("{}", fit.coef().unwrap());
//! ```

use crate::data::{
    ColumnType, DesignMatrix, MixedFormula, RandomDesign, RandomEffect, Table, Value,
};
use crate::error::{Result, TidyError};
use crate::model::lm::least_squares;
use crate::model::wald::{CoefficientTable, Reference};
use nalgebra::{DMatrix, DVector, SymmetricEigen};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::f64::consts::PI;

/// Estimation criterion for the variance components.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LmmMethod {
    /// Restricted maximum likelihood.
    #[default]
    Reml,
    /// Maximum likelihood.
    Ml,
}

impl std::fmt::Display for LmmMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LmmMethod::Reml => write!(f, "REML"),
            LmmMethod::Ml => write!(f, "ML"),
        }
    }
}

/// Configuration for LMM fitting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LmmConfig {
    /// REML or ML.
    pub method: LmmMethod,
    /// Maximum EM iterations.
    pub max_iter: usize,
    /// Convergence tolerance on the relative change in log-likelihood.
    pub tol: f64,
    /// Starting variance of each random term, as a multiple of the OLS
    /// residual variance per unit-RMS random-effects column.
    pub init_variance_ratio: f64,
    /// An eigenvalue of the relative covariance (`D` in units of `σ²`,
    /// each random term scaled to unit RMS) below this value, or below
    /// this fraction of the largest one, marks the covariance as singular.
    /// Rescaling a predictor does not change the verdict.
    pub singular_tol: f64,
    /// Relative log-likelihood slack within which a boundary solution
    /// (one variance component removed) is preferred.
    pub boundary_tol: f64,
}

impl Default for LmmConfig {
    fn default() -> Self {
        Self {
            method: LmmMethod::Reml,
            max_iter: 10_000,
            tol: 1e-10,
            init_variance_ratio: 0.5,
            singular_tol: 1e-4,
            boundary_tol: 1e-6,
        }
    }
}

impl LmmConfig {
    /// Use maximum likelihood instead of REML.
    pub fn ml(mut self) -> Self {
        self.method = LmmMethod::Ml;
        self
    }

    fn validate(&self) -> Result<()> {
        if !(self.tol > 0.0) {
            return Err(TidyError::InvalidParameter(format!(
                "tol must be positive, got {}",
                self.tol
            )));
        }
        if !(self.init_variance_ratio > 0.0) {
            return Err(TidyError::InvalidParameter(format!(
                "init_variance_ratio must be positive, got {}",
                self.init_variance_ratio
            )));
        }
        if self.singular_tol < 0.0 || self.boundary_tol < 0.0 {
            return Err(TidyError::InvalidParameter(
                "singular_tol and boundary_tol must not be negative".to_string(),
            ));
        }
        Ok(())
    }
}

/// A condition that makes a mixed fit, or some of its group estimates,
/// unreliable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FitWarning {
    /// EM stopped at the iteration cap.
    NotConverged { iterations: usize, change: f64 },
    /// The random-effects covariance is (near) singular.
    SingularCovariance { detail: String },
    /// Groups with no more observations than random-effect terms.
    TooFewObservations { groups: Vec<String>, required: usize },
    /// No more groups than random-effect terms.
    TooFewGroups { groups: usize, required: usize },
}

impl std::fmt::Display for FitWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FitWarning::NotConverged { iterations, change } => write!(
                f,
                "EM did not converge in {} iterations (last log-likelihood change {:.3e})",
                iterations, change
            ),
            FitWarning::SingularCovariance { detail } => {
                write!(f, "singular random-effects covariance: {}", detail)
            }
            FitWarning::TooFewObservations { groups, required } => write!(
                f,
                "{} group(s) have fewer than {} observations: {}",
                groups.len(),
                required,
                groups.join(", ")
            ),
            FitWarning::TooFewGroups { groups, required } => write!(
                f,
                "only {} group(s); at least {} are needed to estimate the random-effects covariance",
                groups, required
            ),
        }
    }
}

/// Serialisable summary of a mixed fit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LmmSummary {
    pub formula: String,
    pub method: LmmMethod,
    pub n_obs: usize,
    pub n_groups: usize,
    pub n_dropped: usize,
    pub log_likelihood: f64,
    pub aic: f64,
    pub bic: f64,
    pub sigma: f64,
    pub random_sd: Vec<(String, f64)>,
    pub correlation: Option<f64>,
    pub icc: Option<f64>,
    pub iterations: usize,
    pub converged: bool,
    pub warnings: Vec<FitWarning>,
    pub coefficients: CoefficientTable,
}

/// A fitted linear mixed model with one grouping factor.
#[derive(Debug, Clone)]
pub struct LmmFit {
    pub formula: MixedFormula,
    pub method: LmmMethod,
    /// Fixed design; rows map back to the source table.
    pub design: DesignMatrix,
    /// Random design, one block per group level.
    pub random: RandomDesign,
    /// Fixed-effect estimates.
    pub coefficients: Vec<f64>,
    /// Standard errors of the fixed effects.
    pub std_errors: Vec<f64>,
    /// Covariance of the fixed-effect estimates, `(Σ X_i' V_i⁻¹ X_i)⁻¹`.
    pub cov_beta: DMatrix<f64>,
    /// Random-effects covariance `D` (q × q).
    pub d: DMatrix<f64>,
    /// Residual variance.
    pub sigma2: f64,
    /// BLUP of each group's random effects, in group order.
    pub ranef: Vec<DVector<f64>>,
    /// Conditional fitted values `X β + Z b`, one per design row.
    pub fitted: Vec<f64>,
    /// Observed minus conditional fitted, one per design row.
    pub residuals: Vec<f64>,
    /// REML criterion or ML log-likelihood at the estimate.
    pub log_likelihood: f64,
    pub iterations: usize,
    pub converged: bool,
    /// Rows removed by listwise deletion.
    pub n_dropped: usize,
    pub warnings: Vec<FitWarning>,
}

impl LmmFit {
    /// Fixed-effect coefficient names.
    pub fn coefficient_names(&self) -> &[String] {
        self.design.coefficient_names()
    }

    /// Get a fixed-effect coefficient by name.
    pub fn coefficient(&self, name: &str) -> Option<f64> {
        let idx = self.design.coefficient_index(name)?;
        self.coefficients.get(idx).copied()
    }

    /// Number of observations used.
    pub fn n_obs(&self) -> usize {
        self.fitted.len()
    }

    /// Number of groups.
    pub fn n_groups(&self) -> usize {
        self.random.n_groups()
    }

    /// Source-table row of each fitted value.
    pub fn rows(&self) -> &[usize] {
        self.design.rows()
    }

    /// Whether the fit produced no warnings.
    pub fn is_reliable(&self) -> bool {
        self.warnings.is_empty()
    }

    /// Whether the estimates for one group can be trusted.
    ///
    /// False when the whole fit is suspect, or when the group itself has
    /// too few observations for its random terms.
    pub fn group_reliable(&self, group: usize) -> bool {
        let fit_ok = !self.warnings.iter().any(|w| {
            matches!(
                w,
                FitWarning::NotConverged { .. }
                    | FitWarning::SingularCovariance { .. }
                    | FitWarning::TooFewGroups { .. }
            )
        });
        fit_ok
            && self
                .random
                .groups
                .get(group)
                .map_or(false, |g| g.n_obs() > self.random.n_terms())
    }

    /// Residual standard deviation.
    pub fn sigma(&self) -> f64 {
        self.sigma2.sqrt()
    }

    /// Standard deviation of each random term.
    pub fn random_sd(&self) -> Vec<f64> {
        self.d.diagonal().iter().map(|v| v.max(0.0).sqrt()).collect()
    }

    /// Correlation of random intercepts and slopes, for two-term models.
    pub fn random_correlation(&self) -> Option<f64> {
        if self.d.nrows() != 2 {
            return None;
        }
        let denom = (self.d[(0, 0)] * self.d[(1, 1)]).sqrt();
        (denom > 0.0).then(|| self.d[(0, 1)] / denom)
    }

    /// Intraclass correlation, for random-intercept models.
    pub fn icc(&self) -> Option<f64> {
        if !self.random_effect().ok()?.is_intercept_only() {
            return None;
        }
        let tau2 = self.d[(0, 0)];
        Some(tau2 / (tau2 + self.sigma2))
    }

    /// Fixed effects plus variance parameters.
    pub fn n_parameters(&self) -> usize {
        let q = self.d.nrows();
        self.coefficients.len() + q * (q + 1) / 2 + 1
    }

    /// Akaike information criterion.
    pub fn aic(&self) -> f64 {
        -2.0 * self.log_likelihood + 2.0 * self.n_parameters() as f64
    }

    /// Bayesian information criterion.
    pub fn bic(&self) -> f64 {
        -2.0 * self.log_likelihood + (self.n_obs() as f64).ln() * self.n_parameters() as f64
    }

    /// Wald z-tests for the fixed effects.
    pub fn coef_table(&self) -> Result<CoefficientTable> {
        CoefficientTable::new(
            self.coefficient_names(),
            &self.coefficients,
            &self.std_errors,
            Reference::Z,
        )
    }

    /// Names of the per-group coefficients: the fixed effects followed by
    /// any random term without a fixed counterpart.
    pub fn coef_names(&self) -> Vec<String> {
        let mut names = self.coefficient_names().to_vec();
        for term in &self.random.term_names {
            if !names.contains(term) {
                names.push(term.clone());
            }
        }
        names
    }

    /// One group's coefficients (fixed effect plus its deviation), aligned
    /// with [`coef_names`](Self::coef_names).
    pub fn group_coefficients(&self, group: usize) -> Vec<f64> {
        let names = self.coef_names();
        let mut values: Vec<f64> = names
            .iter()
            .map(|n| self.coefficient(n).unwrap_or(0.0))
            .collect();
        if let Some(b) = self.ranef.get(group) {
            for (k, term) in self.random.term_names.iter().enumerate() {
                if let Some(idx) = names.iter().position(|n| n == term) {
                    values[idx] += b[k];
                }
            }
        }
        values
    }

    /// Group index of each design row.
    pub fn row_groups(&self) -> Vec<usize> {
        let mut out = vec![0; self.n_obs()];
        for (g, block) in self.random.groups.iter().enumerate() {
            for &row in &block.rows {
                out[row] = g;
            }
        }
        out
    }

    /// Per-group deviations: grouping column, one column per random term,
    /// and a `reliable` flag (1 or 0).
    pub fn ranef_table(&self) -> Result<Table> {
        let mut columns = vec![self.group_column()];
        for (k, term) in self.random.term_names.iter().enumerate() {
            let values = self.ranef.iter().map(|b| Value::from_f64(b[k])).collect();
            columns.push((term.clone(), ColumnType::Float, values));
        }
        columns.push(self.reliable_column());
        Table::from_typed_columns(columns, self.n_groups())
    }

    /// Per-group coefficients: grouping column, one column per
    /// coefficient, and a `reliable` flag (1 or 0).
    pub fn coef(&self) -> Result<Table> {
        let names = self.coef_names();
        let per_group: Vec<Vec<f64>> = (0..self.n_groups())
            .map(|g| self.group_coefficients(g))
            .collect();
        let mut columns = vec![self.group_column()];
        for (k, name) in names.into_iter().enumerate() {
            let values = per_group.iter().map(|c| Value::from_f64(c[k])).collect();
            columns.push((name, ColumnType::Float, values));
        }
        columns.push(self.reliable_column());
        Table::from_typed_columns(columns, self.n_groups())
    }

    /// Variance components: one row per random term plus the residual.
    pub fn varcorr(&self) -> Result<Table> {
        let sds = self.random_sd();
        let mut group = Vec::new();
        let mut term = Vec::new();
        let mut variance = Vec::new();
        let mut sd = Vec::new();
        for (k, name) in self.random.term_names.iter().enumerate() {
            group.push(Value::from(self.random.grouping.as_str()));
            term.push(Value::from(name.as_str()));
            variance.push(Value::from_f64(self.d[(k, k)]));
            sd.push(Value::from_f64(sds[k]));
        }
        group.push(Value::from("Residual"));
        term.push(Value::Missing);
        variance.push(Value::from_f64(self.sigma2));
        sd.push(Value::from_f64(self.sigma()));
        let n = group.len();
        Table::from_typed_columns(
            vec![
                ("group", ColumnType::Text, group),
                ("term", ColumnType::Text, term),
                ("variance", ColumnType::Float, variance),
                ("std_dev", ColumnType::Float, sd),
            ],
            n,
        )
    }

    /// Predict the response for every row of `table`.
    ///
    /// Rows of a known group get that group's coefficients; rows of an
    /// unseen group get the population prediction. Rows with a missing
    /// predictor get a missing prediction.
    pub fn predict(&self, table: &Table) -> Result<Vec<Value>> {
        let random_effect = self.random_effect()?;
        let new_design = self.design.for_new_data(table, &self.formula.fixed)?;
        let beta = DVector::from_column_slice(&self.coefficients);
        let xb = new_design.matrix() * beta;

        let grouping = table.column(&random_effect.grouping)?;
        let slopes: Vec<Vec<Option<f64>>> = random_effect
            .slopes()
            .iter()
            .map(|s| table.numeric_column(s))
            .collect::<Result<_>>()?;

        let mut out = vec![Value::Missing; table.n_rows()];
        for (i, &row) in new_design.rows().iter().enumerate() {
            let mut value = xb[i];
            let group = self
                .random
                .groups
                .iter()
                .position(|g| g.key.total_cmp(&grouping[row]) == Ordering::Equal);
            if let Some(g) = group {
                let mut z = Vec::with_capacity(self.random.n_terms());
                if random_effect.has_intercept {
                    z.push(Some(1.0));
                }
                z.extend(slopes.iter().map(|s| s[row]));
                if let Some(z) = z.into_iter().collect::<Option<Vec<f64>>>() {
                    value += z.iter().zip(self.ranef[g].iter()).map(|(a, b)| a * b).sum::<f64>();
                }
            }
            out[row] = Value::from_f64(value);
        }
        Ok(out)
    }

    /// Serialisable summary.
    pub fn summary(&self) -> Result<LmmSummary> {
        Ok(LmmSummary {
            formula: self.formula.to_string(),
            method: self.method,
            n_obs: self.n_obs(),
            n_groups: self.n_groups(),
            n_dropped: self.n_dropped,
            log_likelihood: self.log_likelihood,
            aic: self.aic(),
            bic: self.bic(),
            sigma: self.sigma(),
            random_sd: self
                .random
                .term_names
                .iter()
                .cloned()
                .zip(self.random_sd())
                .collect(),
            correlation: self.random_correlation(),
            icc: self.icc(),
            iterations: self.iterations,
            converged: self.converged,
            warnings: self.warnings.clone(),
            coefficients: self.coef_table()?,
        })
    }

    fn random_effect(&self) -> Result<&RandomEffect> {
        self.formula.random.first().ok_or_else(|| {
            TidyError::InvalidParameter("Mixed fit has no random effect".to_string())
        })
    }

    fn group_column(&self) -> (String, ColumnType, Vec<Value>) {
        let keys: Vec<Value> = self.random.groups.iter().map(|g| g.key.clone()).collect();
        let column_type = keys
            .iter()
            .filter_map(Value::column_type)
            .reduce(ColumnType::unify)
            .unwrap_or(ColumnType::Text);
        (self.random.grouping.clone(), column_type, keys)
    }

    fn reliable_column(&self) -> (String, ColumnType, Vec<Value>) {
        let values = (0..self.n_groups())
            .map(|g| Value::Int(i64::from(self.group_reliable(g))))
            .collect();
        ("reliable".to_string(), ColumnType::Int, values)
    }
}

impl std::fmt::Display for LmmFit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Linear mixed model fit by {} (EM)", self.method)?;
        writeln!(f, "Formula: {}", self.formula)?;
        writeln!(
            f,
            "Observations: {} ({} dropped for missing values), groups: {} ({})",
            self.n_obs(),
            self.n_dropped,
            self.n_groups(),
            self.random.grouping
        )?;
        writeln!(
            f,
            "logLik: {:.3}, AIC: {:.2}, BIC: {:.2}, iterations: {}",
            self.log_likelihood,
            self.aic(),
            self.bic(),
            self.iterations
        )?;
        writeln!(f)?;
        writeln!(f, "Random effects:")?;
        for (name, sd) in self.random.term_names.iter().zip(self.random_sd()) {
            writeln!(f, "  {:<12} {:<14} sd = {:.4}", self.random.grouping, name, sd)?;
        }
        if let Some(corr) = self.random_correlation() {
            writeln!(f, "  correlation = {:.3}", corr)?;
        }
        writeln!(f, "  {:<12} {:<14} sd = {:.4}", "Residual", "", self.sigma())?;
        writeln!(f)?;
        writeln!(f, "Fixed effects:")?;
        match self.coef_table() {
            Ok(table) => write!(f, "{}", table)?,
            Err(_) => writeln!(f, "(coefficient tests unavailable)")?,
        }
        for warning in &self.warnings {
            writeln!(f, "Warning: {}", warning)?;
        }
        Ok(())
    }
}

/// Fit a mixed model from a formula string such as
/// `"rt ~ condition + (1 | subject)"`.
pub fn model_lmm(table: &Table, formula: &str, config: &LmmConfig) -> Result<LmmFit> {
    let formula = MixedFormula::parse(formula)?;
    fit_lmm(table, &formula, config)
}

/// Fit a linear mixed model with exactly one random-effect term.
///
/// Rows missing the response, a fixed predictor, the grouping variable or
/// a random slope are dropped.
pub fn fit_lmm(table: &Table, formula: &MixedFormula, config: &LmmConfig) -> Result<LmmFit> {
    config.validate()?;

    let random_effect = match formula.random.as_slice() {
        [] => {
            return Err(TidyError::InvalidParameter(
                "Formula must contain a random effect such as (1 | group). Use fit_lm for fixed effects only."
                    .to_string(),
            ))
        }
        [re] => re,
        _ => {
            return Err(TidyError::NotImplemented(
                "Multiple random effects not yet supported".to_string(),
            ))
        }
    };

    let response = formula.fixed.require_response()?;
    let mut extra = vec![random_effect.grouping.as_str()];
    extra.extend(random_effect.slopes());
    let design = DesignMatrix::from_formula_with(table, &formula.fixed, &extra)?;
    let n_dropped = table.n_rows() - design.n_obs();
    if n_dropped > 0 {
        tracing::warn!(
            dropped = n_dropped,
            formula = %formula,
            "dropped rows with missing values"
        );
    }

    let random = RandomDesign::from_random_effect(table, &design, random_effect)?;
    let n = design.n_obs();
    let p = design.n_coefficients();
    let q = random.n_terms();
    let m = random.n_groups();
    if m == 0 {
        return Err(TidyError::EmptyData(
            "No complete rows to fit the mixed model".to_string(),
        ));
    }
    if n <= p {
        return Err(TidyError::Numerical(format!(
            "Model is saturated ({} observations for {} fixed effects)",
            n, p
        )));
    }

    let y = design.column_vector(table, response)?;
    let x = design.matrix();
    let blocks: Vec<Block> = random
        .groups
        .iter()
        .map(|g| Block {
            x: DMatrix::from_fn(g.n_obs(), p, |i, j| x[(g.rows[i], j)]),
            y: DVector::from_fn(g.n_obs(), |i, _| y[g.rows[i]]),
            z: g.z.clone(),
        })
        .collect();

    // Starting values from OLS
    let ols = least_squares(x, &y)?;
    let resid = &y - x * &ols.beta;
    let s2_start = (resid.dot(&resid) / (n - p) as f64).max(f64::EPSILON);
    let scales = term_scales(&random);
    let d_start = DMatrix::from_diagonal(&scales.map(|s| config.init_variance_ratio * s2_start / (s * s)));

    let mut run = em(&blocks, d_start, s2_start, config)?;
    tracing::debug!(
        iterations = run.iterations,
        log_likelihood = run.log_likelihood,
        "EM finished"
    );

    // EM creeps toward a zero variance component; compare with the
    // boundary solution directly.
    let mut on_boundary = false;
    match em(&blocks, drop_smallest_component(&run.d, &scales), run.sigma2, config) {
        Ok(boundary)
            if boundary.log_likelihood
                >= run.log_likelihood - config.boundary_tol * (1.0 + run.log_likelihood.abs()) =>
        {
            tracing::debug!(
                interior = run.log_likelihood,
                boundary = boundary.log_likelihood,
                "boundary solution preferred"
            );
            run = boundary;
            on_boundary = true;
        }
        Ok(_) => {}
        Err(e) => tracing::debug!(error = %e, "boundary refit failed"),
    }

    let warnings = collect_warnings(&run, on_boundary, &random, &scales, config);
    for warning in &warnings {
        tracing::warn!(formula = %formula, "{}", warning);
    }

    let state = evaluate(&blocks, &run.d, run.sigma2, config.method)?;
    let mut fitted = vec![0.0; n];
    let mut ranef = Vec::with_capacity(m);
    for ((block, v_inv), group) in blocks.iter().zip(&state.v_inv).zip(&random.groups) {
        let r = &block.y - &block.x * &state.beta;
        let b = &run.d * block.z.transpose() * (v_inv * &r);
        let conditional = &block.x * &state.beta + &block.z * &b;
        for (i, &row) in group.rows.iter().enumerate() {
            fitted[row] = conditional[i];
        }
        ranef.push(b);
    }
    let residuals: Vec<f64> = y.iter().zip(&fitted).map(|(o, f)| o - f).collect();
    let std_errors = (0..p)
        .map(|j| state.a_inv[(j, j)].max(0.0).sqrt())
        .collect();

    tracing::info!(
        formula = %formula,
        method = %config.method,
        groups = m,
        iterations = run.iterations,
        log_likelihood = run.log_likelihood,
        "fitted mixed model"
    );

    Ok(LmmFit {
        formula: formula.clone(),
        method: config.method,
        design,
        random,
        coefficients: state.beta.iter().copied().collect(),
        std_errors,
        cov_beta: state.a_inv,
        d: run.d,
        sigma2: run.sigma2,
        ranef,
        fitted,
        residuals,
        log_likelihood: run.log_likelihood,
        iterations: run.iterations,
        converged: run.converged,
        n_dropped,
        warnings,
    })
}

/// One group's slice of the model.
struct Block {
    x: DMatrix<f64>,
    y: DVector<f64>,
    z: DMatrix<f64>,
}

/// Quantities of the marginal model at fixed variance components.
struct Evaluation {
    beta: DVector<f64>,
    a_inv: DMatrix<f64>,
    v_inv: Vec<DMatrix<f64>>,
    log_likelihood: f64,
}

/// Outcome of one EM run.
struct EmRun {
    d: DMatrix<f64>,
    sigma2: f64,
    log_likelihood: f64,
    iterations: usize,
    converged: bool,
    change: f64,
}

/// GLS fixed effects and the (restricted) log-likelihood at `(D, σ²)`.
fn evaluate(blocks: &[Block], d: &DMatrix<f64>, sigma2: f64, method: LmmMethod) -> Result<Evaluation> {
    let p = blocks.first().map_or(0, |b| b.x.ncols());
    let mut a = DMatrix::zeros(p, p);
    let mut c = DVector::zeros(p);
    let mut log_det_v = 0.0;
    let mut n_total = 0;
    let mut v_inv = Vec::with_capacity(blocks.len());

    for block in blocks {
        let n_i = block.y.len();
        let mut v = &block.z * d * block.z.transpose();
        for k in 0..n_i {
            v[(k, k)] += sigma2;
        }
        let chol = v.cholesky().ok_or_else(|| {
            TidyError::Numerical("Marginal covariance is not positive definite".to_string())
        })?;
        log_det_v += 2.0 * chol.l().diagonal().iter().map(|l| l.ln()).sum::<f64>();
        let inv = chol.inverse();
        let vx = &inv * &block.x;
        a += block.x.transpose() * &vx;
        c += vx.transpose() * &block.y;
        v_inv.push(inv);
        n_total += n_i;
    }

    let a_chol = a.cholesky().ok_or_else(|| {
        TidyError::Numerical("Fixed-effects information matrix is singular".to_string())
    })?;
    let beta = a_chol.solve(&c);
    let log_det_a = 2.0 * a_chol.l().diagonal().iter().map(|l| l.ln()).sum::<f64>();
    let a_inv = a_chol.inverse();

    let quad: f64 = blocks
        .iter()
        .zip(&v_inv)
        .map(|(block, vi)| {
            let r = &block.y - &block.x * &beta;
            r.dot(&(vi * &r))
        })
        .sum();

    let ln_2pi = (2.0 * PI).ln();
    let log_likelihood = match method {
        LmmMethod::Ml => -0.5 * (n_total as f64 * ln_2pi + log_det_v + quad),
        LmmMethod::Reml => {
            -0.5 * ((n_total - p) as f64 * ln_2pi + log_det_v + log_det_a + quad)
        }
    };

    Ok(Evaluation {
        beta,
        a_inv,
        v_inv,
        log_likelihood,
    })
}

/// `V_i⁻¹` for ML; the REML projection `V_i⁻¹ - V_i⁻¹ X_i A⁻¹ X_i' V_i⁻¹`.
fn working_inverse(
    block: &Block,
    v_inv: &DMatrix<f64>,
    a_inv: &DMatrix<f64>,
    method: LmmMethod,
) -> DMatrix<f64> {
    match method {
        LmmMethod::Ml => v_inv.clone(),
        LmmMethod::Reml => {
            let vx = v_inv * &block.x;
            v_inv - &vx * a_inv * vx.transpose()
        }
    }
}

/// One EM update of `(D, σ²)`.
fn em_step(
    blocks: &[Block],
    state: &Evaluation,
    d: &DMatrix<f64>,
    sigma2: f64,
    method: LmmMethod,
) -> (DMatrix<f64>, f64) {
    let q = d.nrows();
    let mut d_acc = DMatrix::zeros(q, q);
    let mut s2_acc = 0.0;
    let mut n_total = 0;

    for (block, v_inv) in blocks.iter().zip(&state.v_inv) {
        let n_i = block.y.len();
        let r = &block.y - &block.x * &state.beta;
        let w = working_inverse(block, v_inv, &state.a_inv, method);
        let dzt = d * block.z.transpose();
        let b = &dzt * (v_inv * &r);
        let e = &r - &block.z * &b;

        d_acc += &b * b.transpose() + d - &dzt * &w * dzt.transpose();
        s2_acc += e.dot(&e) + sigma2 * n_i as f64 - sigma2 * sigma2 * w.trace();
        n_total += n_i;
    }

    let d_new = d_acc / blocks.len() as f64;
    let d_new = (&d_new + d_new.transpose()) * 0.5;
    let s2_new = (s2_acc / n_total as f64).max(f64::MIN_POSITIVE);
    (d_new, s2_new)
}

fn em(blocks: &[Block], d0: DMatrix<f64>, s2_0: f64, config: &LmmConfig) -> Result<EmRun> {
    let mut d = d0;
    let mut sigma2 = s2_0;
    let mut ll_prev = f64::NEG_INFINITY;
    let mut change = f64::INFINITY;

    for iter in 1..=config.max_iter {
        let state = evaluate(blocks, &d, sigma2, config.method)?;
        change = (state.log_likelihood - ll_prev).abs();
        if change <= config.tol * (1.0 + state.log_likelihood.abs()) {
            return Ok(EmRun {
                d,
                sigma2,
                log_likelihood: state.log_likelihood,
                iterations: iter,
                converged: true,
                change,
            });
        }
        ll_prev = state.log_likelihood;
        if iter % 1000 == 0 {
            tracing::debug!(iter, log_likelihood = ll_prev, sigma2, "EM progress");
        }
        (d, sigma2) = em_step(blocks, &state, &d, sigma2, config.method);
    }

    let state = evaluate(blocks, &d, sigma2, config.method)?;
    Ok(EmRun {
        d,
        sigma2,
        log_likelihood: state.log_likelihood,
        iterations: config.max_iter,
        converged: false,
        change,
    })
}

/// Root-mean-square of each random-effects column over all observations.
///
/// The intercept column scales to 1; a slope scales with its predictor's units.
fn term_scales(random: &RandomDesign) -> DVector<f64> {
    let q = random.n_terms();
    let mut sums = DVector::zeros(q);
    for block in &random.groups {
        for k in 0..q {
            sums[k] += block.z.column(k).norm_squared();
        }
    }
    let n = random.n_obs.max(1) as f64;
    sums.map(|sum: f64| {
        let rms = (sum / n).sqrt();
        if rms.is_finite() && rms > 0.0 {
            rms
        } else {
            1.0
        }
    })
}

/// `D` in units of `σ²` with every random term scaled to unit RMS.
fn relative_covariance(d: &DMatrix<f64>, scales: &DVector<f64>, sigma2: f64) -> DMatrix<f64> {
    let sigma2 = sigma2.max(f64::MIN_POSITIVE);
    DMatrix::from_fn(d.nrows(), d.ncols(), |i, j| {
        d[(i, j)] * scales[i] * scales[j] / sigma2
    })
}

/// `D` with the smallest eigen-component of its unit-RMS form removed
/// (and any negative eigenvalue clipped to zero).
fn drop_smallest_component(d: &DMatrix<f64>, scales: &DVector<f64>) -> DMatrix<f64> {
    let q = d.nrows();
    let scaled = relative_covariance(d, scales, 1.0);
    let eigen = SymmetricEigen::new(scaled);
    let smallest = eigen.eigenvalues.imin();
    let mut out = DMatrix::zeros(q, q);
    for k in (0..q).filter(|&k| k != smallest) {
        let v = eigen.eigenvectors.column(k).into_owned();
        out += &v * v.transpose() * eigen.eigenvalues[k].max(0.0);
    }
    DMatrix::from_fn(q, q, |i, j| out[(i, j)] / (scales[i] * scales[j]))
}

fn collect_warnings(
    run: &EmRun,
    on_boundary: bool,
    random: &RandomDesign,
    scales: &DVector<f64>,
    config: &LmmConfig,
) -> Vec<FitWarning> {
    let q = random.n_terms();
    let mut warnings = Vec::new();

    if !run.converged {
        warnings.push(FitWarning::NotConverged {
            iterations: run.iterations,
            change: run.change,
        });
    }

    let relative = relative_covariance(&run.d, scales, run.sigma2);
    let eigenvalues = SymmetricEigen::new(relative).eigenvalues;
    let smallest = eigenvalues.min();
    let largest = eigenvalues.max();
    if on_boundary {
        warnings.push(FitWarning::SingularCovariance {
            detail: "a variance component was estimated at zero".to_string(),
        });
    } else if smallest <= config.singular_tol || smallest <= config.singular_tol * largest {
        warnings.push(FitWarning::SingularCovariance {
            detail: format!(
                "smallest relative variance {:.3e} (largest {:.3e})",
                smallest, largest
            ),
        });
    }

    if random.n_groups() <= q {
        warnings.push(FitWarning::TooFewGroups {
            groups: random.n_groups(),
            required: q + 1,
        });
    }

    let sparse: Vec<String> = random
        .groups
        .iter()
        .filter(|g| g.n_obs() <= q)
        .map(|g| g.key.to_string())
        .collect();
    if !sparse.is_empty() {
        warnings.push(FitWarning::TooFewObservations {
            groups: sparse,
            required: q + 1,
        });
    }

    warnings
}
