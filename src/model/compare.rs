//! Comparison of nested model fits.
//!
//! Information criteria for each fit plus a likelihood ratio test of the
//! smaller model against the larger one:
//!
//! - AIC = -2 * log_likelihood + 2 * k
//! - BIC = -2 * log_likelihood + k * log(n)
//! - LR = 2 * (ll_full - ll_reduced) ~ χ²(k_full - k_reduced)
//!
//! REML likelihoods are only comparable between fits with the same fixed
//! effects, so REML comparisons are restricted to models that differ in
//! their random part. Refit with ML to compare fixed effects.

use crate::error::{Result, TidyError};
use crate::model::lm::LmFit;
use crate::model::lmm::{LmmFit, LmmMethod};
use serde::{Deserialize, Serialize};
use statrs::distribution::{ChiSquared, ContinuousCDF};
use std::fmt;

/// Information criteria of one fit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelCriteria {
    /// Model formula.
    pub formula: String,
    pub log_likelihood: f64,
    /// Number of estimated parameters.
    pub n_params: usize,
    pub n_obs: usize,
    pub aic: f64,
    pub bic: f64,
}

impl ModelCriteria {
    pub fn new(formula: &str, log_likelihood: f64, n_params: usize, n_obs: usize) -> Self {
        let k = n_params as f64;
        Self {
            formula: formula.to_string(),
            log_likelihood,
            n_params,
            n_obs,
            aic: -2.0 * log_likelihood + 2.0 * k,
            bic: -2.0 * log_likelihood + k * (n_obs as f64).ln(),
        }
    }

    pub fn from_lm(fit: &LmFit) -> Self {
        Self::new(
            &fit.formula.to_string(),
            fit.log_likelihood(),
            fit.n_parameters(),
            fit.n_obs(),
        )
    }

    pub fn from_lmm(fit: &LmmFit) -> Self {
        Self::new(
            &fit.formula.to_string(),
            fit.log_likelihood,
            fit.n_parameters(),
            fit.n_obs(),
        )
    }
}

/// Strength of evidence for model preference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EvidenceStrength {
    /// Little difference between models.
    Weak,
    /// Moderate preference for one model.
    Moderate,
    /// Strong preference for one model.
    Strong,
    /// Very strong preference for one model.
    VeryStrong,
}

impl EvidenceStrength {
    /// Burnham & Anderson bands on |ΔAIC|.
    pub fn from_delta_aic(delta: f64) -> Self {
        let delta = delta.abs();
        if delta < 2.0 {
            EvidenceStrength::Weak
        } else if delta < 4.0 {
            EvidenceStrength::Moderate
        } else if delta < 7.0 {
            EvidenceStrength::Strong
        } else {
            EvidenceStrength::VeryStrong
        }
    }
}

impl fmt::Display for EvidenceStrength {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EvidenceStrength::Weak => write!(f, "weak"),
            EvidenceStrength::Moderate => write!(f, "moderate"),
            EvidenceStrength::Strong => write!(f, "strong"),
            EvidenceStrength::VeryStrong => write!(f, "very strong"),
        }
    }
}

/// Likelihood ratio test of a reduced model against a full model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LrtComparison {
    pub reduced: ModelCriteria,
    pub full: ModelCriteria,
    /// 2 * (ll_full - ll_reduced), floored at zero.
    pub statistic: f64,
    /// Difference in parameter counts.
    pub df: usize,
    pub p_value: f64,
    /// AIC of the full model minus AIC of the reduced. Negative favours
    /// the full model.
    pub delta_aic: f64,
    pub delta_bic: f64,
}

impl LrtComparison {
    fn new(reduced: ModelCriteria, full: ModelCriteria) -> Result<Self> {
        if reduced.n_obs != full.n_obs {
            return Err(TidyError::InvalidParameter(format!(
                "Models were fit to different rows ({} vs {} observations)",
                reduced.n_obs, full.n_obs
            )));
        }
        if full.n_params <= reduced.n_params {
            return Err(TidyError::InvalidParameter(format!(
                "Full model must have more parameters than the reduced model ({} vs {})",
                full.n_params, reduced.n_params
            )));
        }

        let df = full.n_params - reduced.n_params;
        let statistic = (2.0 * (full.log_likelihood - reduced.log_likelihood)).max(0.0);
        let chi_sq = ChiSquared::new(df as f64)
            .map_err(|e| TidyError::Numerical(format!("chi-squared distribution: {}", e)))?;
        let p_value = 1.0 - chi_sq.cdf(statistic);

        Ok(Self {
            delta_aic: full.aic - reduced.aic,
            delta_bic: full.bic - reduced.bic,
            reduced,
            full,
            statistic,
            df,
            p_value,
        })
    }

    /// Strength of the AIC preference.
    pub fn evidence(&self) -> EvidenceStrength {
        EvidenceStrength::from_delta_aic(self.delta_aic)
    }

    /// Whether AIC prefers the full model.
    pub fn prefers_full(&self) -> bool {
        self.delta_aic < 0.0
    }
}

impl fmt::Display for LrtComparison {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{:<8} {:>4} {:>10} {:>10} {:>10}",
            "Model", "npar", "AIC", "BIC", "logLik"
        )?;
        for (label, c) in [("reduced", &self.reduced), ("full", &self.full)] {
            writeln!(
                f,
                "{:<8} {:>4} {:>10.2} {:>10.2} {:>10.3}",
                label, c.n_params, c.aic, c.bic, c.log_likelihood
            )?;
        }
        writeln!(
            f,
            "Chisq = {:.3}, Df = {}, Pr(>Chisq) = {:.4e} ({} evidence)",
            self.statistic,
            self.df,
            self.p_value,
            self.evidence()
        )
    }
}

/// Likelihood ratio test between two nested mixed fits.
///
/// Both fits must use the same method. Under REML they must also share
/// their fixed effects.
pub fn compare_lmm(reduced: &LmmFit, full: &LmmFit) -> Result<LrtComparison> {
    if reduced.method != full.method {
        return Err(TidyError::InvalidParameter(format!(
            "Cannot compare a {} fit with a {} fit",
            reduced.method, full.method
        )));
    }
    if full.method == LmmMethod::Reml && reduced.coefficient_names() != full.coefficient_names() {
        return Err(TidyError::InvalidParameter(
            "REML fits with different fixed effects are not comparable; refit with ML".to_string(),
        ));
    }
    let comparison = LrtComparison::new(ModelCriteria::from_lmm(reduced), ModelCriteria::from_lmm(full))?;
    tracing::debug!(
        statistic = comparison.statistic,
        df = comparison.df,
        p_value = comparison.p_value,
        "compared mixed fits"
    );
    Ok(comparison)
}

/// Likelihood ratio test between two nested least-squares fits.
pub fn compare_lm(reduced: &LmFit, full: &LmFit) -> Result<LrtComparison> {
    LrtComparison::new(ModelCriteria::from_lm(reduced), ModelCriteria::from_lm(full))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Table;
    use crate::model::lm::model_lm;
    use crate::model::lmm::{model_lmm, LmmConfig};
    use approx::assert_relative_eq;

    fn create_growth_table() -> Table {
        let offsets = [-2.0, 1.0, 0.5, 3.0, -1.5, -1.0];
        let slopes = [0.3, -0.4, 0.1, 0.5, -0.2, -0.3];
        let mut csv = String::from("subject,time,y\n");
        for (s, (a, c)) in offsets.iter().zip(slopes.iter()).enumerate() {
            for t in 0..5 {
                let noise = ((s + 3 * t) % 4) as f64 * 0.1 - 0.15;
                csv.push_str(&format!("s{},{},{}\n", s, t, 10.0 + a + (2.0 + c) * t as f64 + noise));
            }
        }
        Table::from_csv_str(&csv).unwrap()
    }

    #[test]
    fn test_model_criteria() {
        let c = ModelCriteria::new("y ~ x", -10.0, 3, 20);
        assert_relative_eq!(c.aic, 26.0);
        assert_relative_eq!(c.bic, 20.0 + 3.0 * 20f64.ln());
    }

    #[test]
    fn test_evidence_bands() {
        assert_eq!(EvidenceStrength::from_delta_aic(-1.0), EvidenceStrength::Weak);
        assert_eq!(EvidenceStrength::from_delta_aic(3.0), EvidenceStrength::Moderate);
        assert_eq!(EvidenceStrength::from_delta_aic(-5.0), EvidenceStrength::Strong);
        assert_eq!(EvidenceStrength::from_delta_aic(12.0), EvidenceStrength::VeryStrong);
    }

    #[test]
    fn test_random_slopes_improve_fit() {
        let table = create_growth_table();
        let config = LmmConfig::default();
        let reduced = model_lmm(&table, "y ~ time + (1 | subject)", &config).unwrap();
        let full = model_lmm(&table, "y ~ time + (1 + time | subject)", &config).unwrap();

        let lrt = compare_lmm(&reduced, &full).unwrap();
        assert_eq!(lrt.df, 2);
        assert!(lrt.statistic > 0.0);
        assert!(lrt.p_value < 0.01);
        assert!(lrt.prefers_full());
        assert!(lrt.to_string().contains("Chisq"));
    }

    #[test]
    fn test_reml_fixed_effects_must_match() {
        let table = create_growth_table();
        let config = LmmConfig::default();
        let reduced = model_lmm(&table, "y ~ 1 + (1 | subject)", &config).unwrap();
        let full = model_lmm(&table, "y ~ time + (1 | subject)", &config).unwrap();
        assert!(compare_lmm(&reduced, &full).is_err());

        let ml = LmmConfig::default().ml();
        let reduced = model_lmm(&table, "y ~ 1 + (1 | subject)", &ml).unwrap();
        let full = model_lmm(&table, "y ~ time + (1 | subject)", &ml).unwrap();
        let lrt = compare_lmm(&reduced, &full).unwrap();
        assert_eq!(lrt.df, 1);
        assert!(lrt.p_value < 1e-6);
    }

    #[test]
    fn test_mixed_methods_rejected() {
        let table = create_growth_table();
        let reml = model_lmm(&table, "y ~ time + (1 | subject)", &LmmConfig::default()).unwrap();
        let ml = model_lmm(&table, "y ~ time + (1 + time | subject)", &LmmConfig::default().ml())
            .unwrap();
        assert!(compare_lmm(&reml, &ml).is_err());
    }

    #[test]
    fn test_compare_lm() {
        let table = create_growth_table();
        let reduced = model_lm(&table, "y ~ 1").unwrap();
        let full = model_lm(&table, "y ~ time").unwrap();
        let lrt = compare_lm(&reduced, &full).unwrap();
        assert_eq!(lrt.df, 1);
        assert!(lrt.p_value < 1e-6);
        // Order matters
        assert!(compare_lm(&full, &reduced).is_err());
    }
}
