//! Tidy Tables and Linear Mixed Models
//!
//! A small library for teaching two things: summarising observation
//! tables (filter, group, aggregate), and the difference between an
//! ordinary least-squares line and a mixed model with random intercepts
//! or random slopes.
//!
//! # Overview
//!
//! - **data**: Observation tables, data sources, formulas and design matrices
//! - **summarize**: Predicates, aggregates and the `Summarize` builder
//! - **model**: OLS (`lm`), linear mixed models (`lmm`), Wald tests and
//!   likelihood ratio comparisons
//! - **plot**: Declarative plot descriptions and `augment`
//! - **pipeline**: Pipeline composition and execution, YAML configs
//!
//! # Example
//!
//! ```no_run
//! use tidy_lmm::prelude::*;
//!
//! let penguins = DataSource::parse("penguins").load(None).unwrap();
//!
//! let summary = Summarize::new()
//!     .filter(Predicate::not_missing("body_mass_g"))
//!     .group_by(&["species"])
//!     .agg("mean_mass", Aggregate::mean("body_mass_g", Missing::Ignore))
//!     .agg("se_mass", Aggregate::std_error("body_mass_g", Missing::Ignore))
//!     .run(&penguins)
//!     .unwrap();
//! println!("{}", summary);
//!
//! let fit = model_lmm(
//!     &penguins,
//!     "body_mass_g ~ flipper_length_mm + (1 + flipper_length_mm | species)",
//!     &LmmConfig::default(),
//! )
//! .unwrap();
//! println!("{}", fit.coef().unwrap());
//! ```

pub mod data;
pub mod error;
pub mod model;
pub mod pipeline;
pub mod plot;
pub mod summarize;

/// Convenient re-exports for common usage.
pub mod prelude {
    pub use crate::data::{
        ColumnType, DataSource, Dataset, DesignMatrix, Formula, MixedFormula, Table, Term, Value,
    };
    pub use crate::error::{Result, TidyError};
    pub use crate::model::{
        compare_lm, compare_lmm, fit_lm, fit_lmm, model_lm, model_lmm, CoefficientTable,
        FitWarning, LmFit, LmmConfig, LmmFit, LmmMethod, LrtComparison, ModelFit,
    };
    pub use crate::pipeline::{Pipeline, PipelineConfig, PipelineResult, PipelineStep};
    pub use crate::plot::{augment, Layer, PlotSpec};
    pub use crate::summarize::{Aggregate, Missing, Predicate, Summarize};
}
