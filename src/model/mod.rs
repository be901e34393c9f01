//! Regression models: ordinary least squares and linear mixed models.

pub mod compare;
pub mod lm;
pub mod lmm;
pub mod wald;

pub use compare::{compare_lm, compare_lmm, EvidenceStrength, LrtComparison, ModelCriteria};
pub use lm::{fit_lm, model_lm, LmFit, LmSummary};
pub use lmm::{fit_lmm, model_lmm, FitWarning, LmmConfig, LmmFit, LmmMethod, LmmSummary};
pub use wald::{CoefficientTable, Reference, WaldRow};

use crate::data::{Table, Value};
use crate::error::Result;

/// Either kind of fit, for code that handles both.
#[derive(Debug, Clone)]
pub enum ModelFit {
    Lm(LmFit),
    Lmm(LmmFit),
}

impl ModelFit {
    pub fn coefficient_names(&self) -> &[String] {
        match self {
            ModelFit::Lm(fit) => fit.coefficient_names(),
            ModelFit::Lmm(fit) => fit.coefficient_names(),
        }
    }

    /// Fixed-effect estimate by name.
    pub fn coefficient(&self, name: &str) -> Option<f64> {
        match self {
            ModelFit::Lm(fit) => fit.coefficient(name),
            ModelFit::Lmm(fit) => fit.coefficient(name),
        }
    }

    /// Source-table row of each fitted value.
    pub fn rows(&self) -> &[usize] {
        match self {
            ModelFit::Lm(fit) => fit.rows(),
            ModelFit::Lmm(fit) => fit.rows(),
        }
    }

    /// Fitted values; group-specific for mixed fits.
    pub fn fitted(&self) -> &[f64] {
        match self {
            ModelFit::Lm(fit) => &fit.fitted,
            ModelFit::Lmm(fit) => &fit.fitted,
        }
    }

    pub fn residuals(&self) -> &[f64] {
        match self {
            ModelFit::Lm(fit) => &fit.residuals,
            ModelFit::Lmm(fit) => &fit.residuals,
        }
    }

    pub fn log_likelihood(&self) -> f64 {
        match self {
            ModelFit::Lm(fit) => fit.log_likelihood(),
            ModelFit::Lmm(fit) => fit.log_likelihood,
        }
    }

    pub fn aic(&self) -> f64 {
        match self {
            ModelFit::Lm(fit) => fit.aic(),
            ModelFit::Lmm(fit) => fit.aic(),
        }
    }

    pub fn bic(&self) -> f64 {
        match self {
            ModelFit::Lm(fit) => fit.bic(),
            ModelFit::Lmm(fit) => fit.bic(),
        }
    }

    /// Wald tests of the fixed effects.
    pub fn coef_table(&self) -> Result<CoefficientTable> {
        match self {
            ModelFit::Lm(fit) => fit.coef_table(),
            ModelFit::Lmm(fit) => fit.coef_table(),
        }
    }

    pub fn predict(&self, table: &Table) -> Result<Vec<Value>> {
        match self {
            ModelFit::Lm(fit) => fit.predict(table),
            ModelFit::Lmm(fit) => fit.predict(table),
        }
    }

    /// Serialisable summary as JSON.
    pub fn summary_json(&self) -> Result<serde_json::Value> {
        Ok(match self {
            ModelFit::Lm(fit) => serde_json::to_value(fit.summary()?)?,
            ModelFit::Lmm(fit) => serde_json::to_value(fit.summary()?)?,
        })
    }
}

impl From<LmFit> for ModelFit {
    fn from(fit: LmFit) -> Self {
        ModelFit::Lm(fit)
    }
}

impl From<LmmFit> for ModelFit {
    fn from(fit: LmmFit) -> Self {
        ModelFit::Lmm(fit)
    }
}

impl std::fmt::Display for ModelFit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModelFit::Lm(fit) => write!(f, "{}", fit),
            ModelFit::Lmm(fit) => write!(f, "{}", fit),
        }
    }
}
