//! Pipeline composition and execution for table summaries and model fits.

mod runner;

pub use runner::{
    random_slopes_workflow, Pipeline, PipelineConfig, PipelineOutput, PipelineResult,
    PipelineStep, WORKING_TABLE,
};
