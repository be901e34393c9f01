//! Pipeline runner for composing and executing analysis steps.

use crate::data::{DataSource, Table};
use crate::error::{Result, TidyError};
use crate::model::{model_lm, model_lmm, LmmConfig, ModelFit};
use crate::plot::{augment, PlotSpec};
use crate::summarize::{Predicate, Summarize};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Name under which plots and augment steps see the working table.
pub const WORKING_TABLE: &str = "data";

/// A step in the analysis pipeline.
///
/// `Filter` and `DropMissing` replace the working table; every other step
/// leaves it alone and records a named output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PipelineStep {
    // === Table verbs ===
    /// Keep rows satisfying a predicate.
    Filter { predicate: Predicate },
    /// Drop rows with a missing value in any of the columns (all columns
    /// when empty).
    DropMissing {
        #[serde(default)]
        columns: Vec<String>,
    },

    // === Outputs ===
    /// Summarise the working table into a new table.
    Summarize { name: String, summarize: Summarize },
    /// Fit ordinary least squares.
    FitLm { name: String, formula: String },
    /// Fit a linear mixed model.
    FitLmm {
        name: String,
        formula: String,
        #[serde(default)]
        config: LmmConfig,
    },
    /// Coefficient table of a fit: per-group coefficients for mixed fits,
    /// Wald tests for least squares.
    Coef { name: String, model: String },
    /// The table a model was fit on with fitted values, residuals and
    /// per-row intercept and slope.
    Augment { name: String, model: String },
    /// A plot description, validated against the tables it names.
    Plot { name: String, spec: PlotSpec },
}

impl PipelineStep {
    fn label(&self) -> &'static str {
        match self {
            PipelineStep::Filter { .. } => "filter",
            PipelineStep::DropMissing { .. } => "drop_missing",
            PipelineStep::Summarize { .. } => "summarize",
            PipelineStep::FitLm { .. } => "fit_lm",
            PipelineStep::FitLmm { .. } => "fit_lmm",
            PipelineStep::Coef { .. } => "coef",
            PipelineStep::Augment { .. } => "augment",
            PipelineStep::Plot { .. } => "plot",
        }
    }
}

/// Pipeline configuration for serialization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Name of the pipeline.
    pub name: String,
    /// Description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Where the input table comes from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<DataSource>,
    /// Steps to execute.
    pub steps: Vec<PipelineStep>,
}

impl PipelineConfig {
    /// Load from YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(TidyError::from)
    }

    /// Save to YAML string.
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).map_err(TidyError::from)
    }

    /// Load from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_yaml(&fs::read_to_string(path)?)
    }
}

/// One named result of a pipeline run.
#[derive(Debug, Clone)]
pub enum PipelineOutput {
    Table(Table),
    Fit(ModelFit),
    Plot(PlotSpec),
}

impl PipelineOutput {
    fn kind(&self) -> &'static str {
        match self {
            PipelineOutput::Table(_) => "table",
            PipelineOutput::Fit(_) => "fit",
            PipelineOutput::Plot(_) => "plot",
        }
    }
}

/// Everything a pipeline run produced, in step order.
#[derive(Debug, Clone)]
pub struct PipelineResult {
    pub name: String,
    /// The working table after the last step.
    pub data: Table,
    pub outputs: Vec<(String, PipelineOutput)>,
}

impl PipelineResult {
    /// Look up an output by name.
    pub fn get(&self, name: &str) -> Option<&PipelineOutput> {
        self.outputs.iter().find(|(n, _)| n == name).map(|(_, o)| o)
    }

    pub fn table(&self, name: &str) -> Option<&Table> {
        match self.get(name) {
            Some(PipelineOutput::Table(t)) => Some(t),
            _ if name == WORKING_TABLE => Some(&self.data),
            _ => None,
        }
    }

    pub fn fit(&self, name: &str) -> Option<&ModelFit> {
        match self.get(name) {
            Some(PipelineOutput::Fit(f)) => Some(f),
            _ => None,
        }
    }

    pub fn plot(&self, name: &str) -> Option<&PlotSpec> {
        match self.get(name) {
            Some(PipelineOutput::Plot(p)) => Some(p),
            _ => None,
        }
    }

    /// Write tables as `<name>.csv`, fit summaries as `<name>.json` and
    /// plots as `<name>.plot.json`. Returns the written paths.
    pub fn write_to_dir<P: AsRef<Path>>(&self, dir: P) -> Result<Vec<PathBuf>> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;
        let mut written = Vec::with_capacity(self.outputs.len());
        for (name, output) in &self.outputs {
            let path = match output {
                PipelineOutput::Table(table) => {
                    let path = dir.join(format!("{}.csv", name));
                    table.to_csv(&path)?;
                    path
                }
                PipelineOutput::Fit(fit) => {
                    let path = dir.join(format!("{}.json", name));
                    fs::write(&path, serde_json::to_string_pretty(&fit.summary_json()?)?)?;
                    path
                }
                PipelineOutput::Plot(spec) => {
                    let path = dir.join(format!("{}.plot.json", name));
                    fs::write(&path, spec.to_json()?)?;
                    path
                }
            };
            tracing::info!(path = %path.display(), "wrote {}", output.kind());
            written.push(path);
        }
        Ok(written)
    }
}

/// Builder for constructing and running analysis pipelines.
#[derive(Debug, Clone)]
pub struct Pipeline {
    steps: Vec<PipelineStep>,
    name: String,
    data: Option<DataSource>,
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl Pipeline {
    /// Create a new empty pipeline.
    pub fn new() -> Self {
        Self {
            steps: Vec::new(),
            name: "unnamed".to_string(),
            data: None,
        }
    }

    /// Create from a config.
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            steps: config.steps.clone(),
            name: config.name.clone(),
            data: config.data.clone(),
        }
    }

    /// Set the pipeline name.
    pub fn name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    /// Set the input source used by [`execute`](Self::execute).
    pub fn data(mut self, source: DataSource) -> Self {
        self.data = Some(source);
        self
    }

    /// Keep rows matching a predicate.
    pub fn filter(mut self, predicate: Predicate) -> Self {
        self.steps.push(PipelineStep::Filter { predicate });
        self
    }

    /// Drop rows with missing values in the given columns.
    pub fn drop_missing<S: AsRef<str>>(mut self, columns: &[S]) -> Self {
        self.steps.push(PipelineStep::DropMissing {
            columns: columns.iter().map(|c| c.as_ref().to_string()).collect(),
        });
        self
    }

    /// Record a summary table.
    pub fn summarize(mut self, name: &str, summarize: Summarize) -> Self {
        self.steps.push(PipelineStep::Summarize {
            name: name.to_string(),
            summarize,
        });
        self
    }

    /// Fit a linear model.
    pub fn fit_lm(mut self, name: &str, formula: &str) -> Self {
        self.steps.push(PipelineStep::FitLm {
            name: name.to_string(),
            formula: formula.to_string(),
        });
        self
    }

    /// Fit a mixed model.
    pub fn fit_lmm(mut self, name: &str, formula: &str, config: LmmConfig) -> Self {
        self.steps.push(PipelineStep::FitLmm {
            name: name.to_string(),
            formula: formula.to_string(),
            config,
        });
        self
    }

    /// Record the coefficient table of a fit.
    pub fn coef(mut self, name: &str, model: &str) -> Self {
        self.steps.push(PipelineStep::Coef {
            name: name.to_string(),
            model: model.to_string(),
        });
        self
    }

    /// Record the augmented table of a fit.
    pub fn augment(mut self, name: &str, model: &str) -> Self {
        self.steps.push(PipelineStep::Augment {
            name: name.to_string(),
            model: model.to_string(),
        });
        self
    }

    /// Record a plot description.
    pub fn plot(mut self, name: &str, spec: PlotSpec) -> Self {
        self.steps.push(PipelineStep::Plot {
            name: name.to_string(),
            spec,
        });
        self
    }

    /// Steps in order.
    pub fn steps(&self) -> &[PipelineStep] {
        &self.steps
    }

    /// Convert to config for serialization.
    pub fn to_config(&self, description: Option<&str>) -> PipelineConfig {
        PipelineConfig {
            name: self.name.clone(),
            description: description.map(String::from),
            data: self.data.clone(),
            steps: self.steps.clone(),
        }
    }

    /// Load the configured data source and run.
    pub fn execute(&self, cache_dir: Option<&Path>) -> Result<PipelineResult> {
        let source = self.data.as_ref().ok_or_else(|| {
            TidyError::Pipeline(format!("Pipeline '{}' has no data source", self.name))
        })?;
        let table = source.load(cache_dir)?;
        self.run(&table)
    }

    /// Run the pipeline on a table.
    pub fn run(&self, table: &Table) -> Result<PipelineResult> {
        let mut state = PipelineState::new(table.clone());
        for (i, step) in self.steps.iter().enumerate() {
            tracing::debug!(step = i + 1, kind = step.label(), "running pipeline step");
            state = state.apply(step).map_err(|e| {
                TidyError::Pipeline(format!("Step {} ({}) failed: {}", i + 1, step.label(), e))
            })?;
        }
        tracing::info!(
            pipeline = %self.name,
            steps = self.steps.len(),
            outputs = state.outputs.len(),
            "pipeline finished"
        );
        Ok(PipelineResult {
            name: self.name.clone(),
            data: state.table,
            outputs: state.outputs,
        })
    }
}

/// Internal state during pipeline execution.
struct PipelineState {
    table: Table,
    outputs: Vec<(String, PipelineOutput)>,
    /// The table each fit was made on, for augmenting.
    fit_tables: BTreeMap<String, Table>,
}

impl PipelineState {
    fn new(table: Table) -> Self {
        Self {
            table,
            outputs: Vec::new(),
            fit_tables: BTreeMap::new(),
        }
    }

    fn apply(mut self, step: &PipelineStep) -> Result<Self> {
        match step {
            PipelineStep::Filter { predicate } => {
                self.table = self.table.filter(predicate)?;
            }
            PipelineStep::DropMissing { columns } => {
                let columns = if columns.is_empty() {
                    self.table.column_names().to_vec()
                } else {
                    columns.clone()
                };
                self.table = self.table.drop_missing(&columns)?;
            }
            PipelineStep::Summarize { name, summarize } => {
                let out = summarize.run(&self.table)?;
                self.push(name, PipelineOutput::Table(out))?;
            }
            PipelineStep::FitLm { name, formula } => {
                let fit = model_lm(&self.table, formula)?;
                self.fit_tables.insert(name.clone(), self.table.clone());
                self.push(name, PipelineOutput::Fit(fit.into()))?;
            }
            PipelineStep::FitLmm {
                name,
                formula,
                config,
            } => {
                let fit = model_lmm(&self.table, formula, config)?;
                self.fit_tables.insert(name.clone(), self.table.clone());
                self.push(name, PipelineOutput::Fit(fit.into()))?;
            }
            PipelineStep::Coef { name, model } => {
                let table = match self.fit(model)? {
                    ModelFit::Lm(fit) => fit.coef_table()?.to_table()?,
                    ModelFit::Lmm(fit) => fit.coef()?,
                };
                self.push(name, PipelineOutput::Table(table))?;
            }
            PipelineStep::Augment { name, model } => {
                let fit = self.fit(model)?;
                let source = self.fit_tables.get(model).ok_or_else(|| {
                    TidyError::Pipeline(format!("No table recorded for model '{}'", model))
                })?;
                let table = augment(source, fit)?;
                self.push(name, PipelineOutput::Table(table))?;
            }
            PipelineStep::Plot { name, spec } => {
                let tables = self.tables();
                let table = tables.get(&spec.data).ok_or_else(|| {
                    TidyError::Pipeline(format!("Plot data '{}' is not a table", spec.data))
                })?;
                spec.validate_with(table, &tables)?;
                self.push(name, PipelineOutput::Plot(spec.clone()))?;
            }
        }
        Ok(self)
    }

    fn push(&mut self, name: &str, output: PipelineOutput) -> Result<()> {
        if name == WORKING_TABLE || self.outputs.iter().any(|(n, _)| n == name) {
            return Err(TidyError::Pipeline(format!(
                "Output name '{}' is already in use",
                name
            )));
        }
        tracing::debug!(name, kind = output.kind(), "recorded output");
        self.outputs.push((name.to_string(), output));
        Ok(())
    }

    fn fit(&self, name: &str) -> Result<&ModelFit> {
        self.outputs
            .iter()
            .find_map(|(n, o)| match o {
                PipelineOutput::Fit(fit) if n == name => Some(fit),
                _ => None,
            })
            .ok_or_else(|| TidyError::Pipeline(format!("No fitted model named '{}'", name)))
    }

    fn tables(&self) -> BTreeMap<String, Table> {
        let mut tables: BTreeMap<String, Table> = self
            .outputs
            .iter()
            .filter_map(|(n, o)| match o {
                PipelineOutput::Table(t) => Some((n.clone(), t.clone())),
                _ => None,
            })
            .collect();
        tables.insert(WORKING_TABLE.to_string(), self.table.clone());
        tables
    }
}

/// The mixed-model teaching workflow: fit OLS and a random-slope model of
/// `response` on `predictor` by `group`, and describe a plot of each
/// group's line over the observations.
pub fn random_slopes_workflow(
    response: &str,
    predictor: &str,
    group: &str,
    config: LmmConfig,
) -> Pipeline {
    let plot = PlotSpec::new("augmented", predictor, response)
        .color(group)
        .layer(crate::plot::Layer::Point)
        .layer(crate::plot::Layer::AbLine {
            data: Some("group_lines".to_string()),
            intercept: "(Intercept)".to_string(),
            slope: predictor.to_string(),
            color: Some(group.to_string()),
        });
    Pipeline::new()
        .name("random-slopes")
        .drop_missing(&[response, predictor, group])
        .fit_lm("ols", &format!("{} ~ {}", response, predictor))
        .fit_lmm(
            "lmm",
            &format!("{} ~ {} + (1 + {} | {})", response, predictor, predictor, group),
            config,
        )
        .coef("group_lines", "lmm")
        .augment("augmented", "lmm")
        .plot("lines", plot)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Value;
    use crate::plot::Layer;
    use crate::summarize::{Aggregate, Missing};
    use std::io::Write;
    use tempfile::{NamedTempFile, TempDir};

    fn create_test_table() -> Table {
        let mut csv = String::from("subject,days,reaction\n");
        let offsets = [0.0, 20.0, -15.0, 5.0];
        let slopes = [10.0, 12.0, 8.0, 11.0];
        for s in 0..4 {
            for d in 0..4 {
                let noise = ((s * 4 + d) % 3) as f64 - 1.0;
                let y = 250.0 + offsets[s] + slopes[s] * d as f64 + noise;
                csv.push_str(&format!("s{},{},{}\n", s + 1, d, y));
            }
        }
        csv.push_str("s5,0,NA\n");
        Table::from_csv_str(&csv).unwrap()
    }

    #[test]
    fn test_pipeline_builder() {
        let pipeline = Pipeline::new()
            .name("test")
            .drop_missing(&["reaction"])
            .fit_lm("ols", "reaction ~ days")
            .augment("aug", "ols");
        let config = pipeline.to_config(Some("Test pipeline"));
        assert_eq!(config.steps.len(), 3);
        assert_eq!(config.name, "test");
        assert_eq!(config.description.as_deref(), Some("Test pipeline"));
    }

    #[test]
    fn test_pipeline_run() {
        let table = create_test_table();
        let result = Pipeline::new()
            .drop_missing(&["reaction"])
            .summarize(
                "by_day",
                Summarize::new()
                    .group_by(&["days"])
                    .agg("mean", Aggregate::mean("reaction", Missing::Propagate)),
            )
            .fit_lm("ols", "reaction ~ days")
            .augment("aug", "ols")
            .plot(
                "scatter",
                PlotSpec::new("aug", "days", "reaction")
                    .layer(Layer::Point)
                    .layer(Layer::Smooth),
            )
            .run(&table)
            .unwrap();

        assert_eq!(result.data.n_rows(), 16);
        assert_eq!(result.table("by_day").unwrap().n_rows(), 4);
        assert!(result.fit("ols").is_some());
        assert!(result.table("aug").unwrap().has_column(".fitted"));
        assert!(result.plot("scatter").is_some());
        assert_eq!(result.table(WORKING_TABLE).unwrap().n_rows(), 16);
    }

    #[test]
    fn test_random_slopes_workflow() {
        let table = create_test_table();
        let result = random_slopes_workflow("reaction", "days", "subject", LmmConfig::default())
            .run(&table)
            .unwrap();

        let lines = result.table("group_lines").unwrap();
        assert_eq!(lines.n_rows(), 4);
        assert!(lines.has_column("days"));
        let augmented = result.table("augmented").unwrap();
        assert_eq!(augmented.n_rows(), 16);
        assert!(matches!(result.fit("lmm"), Some(ModelFit::Lmm(_))));
    }

    #[test]
    fn test_step_errors_name_the_step() {
        let table = create_test_table();
        let err = Pipeline::new()
            .augment("aug", "missing_model")
            .run(&table)
            .unwrap_err();
        assert!(err.to_string().contains("Step 1 (augment)"));

        let err = Pipeline::new()
            .fit_lm("m", "reaction ~ days")
            .fit_lm("m", "reaction ~ 1")
            .run(&table)
            .unwrap_err();
        assert!(err.to_string().contains("already in use"));
    }

    #[test]
    fn test_plot_against_unknown_table() {
        let table = create_test_table();
        let result = Pipeline::new()
            .plot("p", PlotSpec::new("nope", "days", "reaction").layer(Layer::Point))
            .run(&table);
        assert!(result.is_err());
    }

    #[test]
    fn test_filter_step() {
        let table = create_test_table();
        let result = Pipeline::new()
            .filter(Predicate::eq("subject", "s1"))
            .run(&table)
            .unwrap();
        assert_eq!(result.data.n_rows(), 4);
        for v in result.data.column("subject").unwrap() {
            assert_eq!(v, &Value::from("s1"));
        }
    }

    #[test]
    fn test_config_yaml_round_trip() {
        let pipeline = random_slopes_workflow("reaction", "days", "subject", LmmConfig::default())
            .data(DataSource::Path {
                path: PathBuf::from("sleep.csv"),
            });
        let config = pipeline.to_config(None);
        let yaml = config.to_yaml().unwrap();
        assert!(yaml.contains("FitLmm"));
        let back = PipelineConfig::from_yaml(&yaml).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn test_execute_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{}", create_test_table().to_csv_string().unwrap()).unwrap();
        file.flush().unwrap();

        let yaml = format!(
            "name: demo\n\
             data:\n  kind: path\n  path: {}\n\
             steps:\n\
             - !DropMissing\n  columns: [reaction]\n\
             - !FitLm\n  name: ols\n  formula: reaction ~ days\n\
             - !Coef\n  name: coefs\n  model: ols\n",
            file.path().display()
        );
        let config = PipelineConfig::from_yaml(&yaml).unwrap();
        let result = Pipeline::from_config(&config).execute(None).unwrap();
        assert_eq!(result.table("coefs").unwrap().n_rows(), 2);

        let dir = TempDir::new().unwrap();
        let written = result.write_to_dir(dir.path()).unwrap();
        assert_eq!(written.len(), 2);
        assert!(dir.path().join("coefs.csv").exists());
        assert!(dir.path().join("ols.json").exists());
    }
}
