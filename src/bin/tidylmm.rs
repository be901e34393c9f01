//! tidylmm - summarise tables and fit regression models from the command line.
//!
//! Tables go to stdout; progress and diagnostics go to stderr through
//! `tracing`, filtered by `RUST_LOG` (default `info`).

use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use tidy_lmm::data::source::{clear_cache, default_cache_dir, fetch_dataset, list_datasets};
use tidy_lmm::data::{DataSource, Dataset, Table};
use tidy_lmm::error::Result;
use tidy_lmm::model::{model_lm, model_lmm, LmmConfig, LmmMethod, ModelFit};
use tidy_lmm::pipeline::{random_slopes_workflow, Pipeline, PipelineConfig};
use tidy_lmm::plot::augment;
use tidy_lmm::summarize::{NamedAggregate, Predicate, Summarize};
use tracing_subscriber::EnvFilter;

/// Output format for tables.
#[derive(Debug, Clone, Copy, ValueEnum)]
enum Format {
    /// Aligned text
    Text,
    /// Comma-separated values
    Csv,
    /// Array of JSON records
    Json,
}

/// Tidy summaries and (mixed) linear models for teaching
#[derive(Parser)]
#[command(name = "tidylmm")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Directory for downloaded datasets
    #[arg(long, global = true)]
    cache_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Filter, group and summarise a table
    Summarize {
        /// CSV path, URL, or built-in dataset name
        #[arg(short, long)]
        data: String,

        /// Row filter such as `species == Adelie` (repeatable, combined with AND)
        #[arg(short, long)]
        filter: Vec<String>,

        /// Comma-separated grouping columns
        #[arg(short, long, value_delimiter = ',')]
        group_by: Vec<String>,

        /// Aggregate as name=fn:column:policy, e.g. mean_mass=mean:body_mass_g:ignore
        #[arg(short, long, required = true)]
        agg: Vec<String>,

        /// Output format
        #[arg(long, value_enum, default_value = "text")]
        format: Format,
    },

    /// Fit ordinary least squares
    Lm {
        /// CSV path, URL, or built-in dataset name
        #[arg(short, long)]
        data: String,

        /// Model formula, e.g. "y ~ x + group"
        #[arg(short, long)]
        formula: String,

        /// Write the augmented table (.fitted, .resid, ...) as CSV
        #[arg(long)]
        augment: Option<PathBuf>,

        /// Print the summary as JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Fit a linear mixed model
    Lmm {
        /// CSV path, URL, or built-in dataset name
        #[arg(short, long)]
        data: String,

        /// Model formula, e.g. "y ~ x + (1 + x | subject)"
        #[arg(short, long)]
        formula: String,

        /// Use maximum likelihood instead of REML
        #[arg(long)]
        ml: bool,

        /// Maximum EM iterations
        #[arg(long)]
        max_iter: Option<usize>,

        /// Convergence tolerance
        #[arg(long)]
        tol: Option<f64>,

        /// Write per-group coefficients as CSV
        #[arg(long)]
        coef: Option<PathBuf>,

        /// Write the augmented table as CSV
        #[arg(long)]
        augment: Option<PathBuf>,

        /// Print the summary as JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Run a pipeline from a YAML configuration file
    Run {
        /// Path to pipeline configuration YAML
        #[arg(short, long)]
        config: PathBuf,

        /// Override the configured data source
        #[arg(short, long)]
        data: Option<String>,

        /// Directory for the pipeline outputs
        #[arg(short, long, default_value = "tidylmm-out")]
        output: PathBuf,
    },

    /// Write an example pipeline configuration
    Example {
        /// Output path for the example YAML
        #[arg(short, long, default_value = "pipeline.yaml")]
        output: PathBuf,
    },

    /// Download a built-in dataset into the cache
    Fetch {
        /// Dataset name
        #[arg(short, long, default_value = "penguins")]
        dataset: String,
    },

    /// List built-in datasets
    Datasets,

    /// Remove downloaded datasets
    ClearCache,
}

fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cache_dir = cli.cache_dir.as_deref();

    let result = match cli.command {
        Commands::Summarize {
            data,
            filter,
            group_by,
            agg,
            format,
        } => cmd_summarize(&data, &filter, &group_by, &agg, format, cache_dir),

        Commands::Lm {
            data,
            formula,
            augment,
            json,
        } => cmd_lm(&data, &formula, augment.as_deref(), json, cache_dir),

        Commands::Lmm {
            data,
            formula,
            ml,
            max_iter,
            tol,
            coef,
            augment,
            json,
        } => {
            let mut config = LmmConfig::default();
            if ml {
                config.method = LmmMethod::Ml;
            }
            if let Some(max_iter) = max_iter {
                config.max_iter = max_iter;
            }
            if let Some(tol) = tol {
                config.tol = tol;
            }
            cmd_lmm(
                &data,
                &formula,
                &config,
                coef.as_deref(),
                augment.as_deref(),
                json,
                cache_dir,
            )
        }

        Commands::Run {
            config,
            data,
            output,
        } => cmd_run(&config, data.as_deref(), &output, cache_dir),

        Commands::Example { output } => cmd_example(&output),

        Commands::Fetch { dataset } => cmd_fetch(&dataset, cache_dir),

        Commands::Datasets => cmd_datasets(cache_dir),

        Commands::ClearCache => cmd_clear_cache(cache_dir),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn load(data: &str, cache_dir: Option<&Path>) -> Result<Table> {
    let source = DataSource::parse(data);
    let table = source.load(cache_dir)?;
    tracing::info!(
        source = %source,
        rows = table.n_rows(),
        columns = table.n_columns(),
        "loaded table"
    );
    Ok(table)
}

fn print_table(table: &Table, format: Format) -> Result<()> {
    match format {
        Format::Text => print!("{}", table),
        Format::Csv => print!("{}", table.to_csv_string()?),
        Format::Json => println!("{}", serde_json::to_string_pretty(&table.to_json_records())?),
    }
    Ok(())
}

/// Filter, group and summarise
fn cmd_summarize(
    data: &str,
    filters: &[String],
    group_by: &[String],
    aggs: &[String],
    format: Format,
    cache_dir: Option<&Path>,
) -> Result<()> {
    let table = load(data, cache_dir)?;

    let mut summarize = Summarize::new().group_by(group_by);
    for expr in filters {
        summarize = summarize.filter(Predicate::parse(expr)?);
    }
    for spec in aggs {
        let named = NamedAggregate::parse(spec)?;
        summarize = summarize.agg(named.name, named.aggregate);
    }

    let summary = summarize.run(&table)?;
    print_table(&summary, format)
}

/// Fit and report a least-squares model
fn cmd_lm(
    data: &str,
    formula: &str,
    augment_path: Option<&Path>,
    json: bool,
    cache_dir: Option<&Path>,
) -> Result<()> {
    let table = load(data, cache_dir)?;
    let fit = model_lm(&table, formula)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&fit.summary()?)?);
    } else {
        print!("{}", fit);
    }

    if let Some(path) = augment_path {
        augment(&table, &ModelFit::Lm(fit))?.to_csv(path)?;
        tracing::info!(path = %path.display(), "wrote augmented table");
    }
    Ok(())
}

/// Fit and report a mixed model
fn cmd_lmm(
    data: &str,
    formula: &str,
    config: &LmmConfig,
    coef_path: Option<&Path>,
    augment_path: Option<&Path>,
    json: bool,
    cache_dir: Option<&Path>,
) -> Result<()> {
    let table = load(data, cache_dir)?;
    let fit = model_lmm(&table, formula, config)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&fit.summary()?)?);
    } else {
        print!("{}", fit);
        println!();
        println!("Per-group coefficients:");
        print!("{}", fit.coef()?);
    }

    if let Some(path) = coef_path {
        fit.coef()?.to_csv(path)?;
        tracing::info!(path = %path.display(), "wrote group coefficients");
    }
    if let Some(path) = augment_path {
        augment(&table, &ModelFit::Lmm(fit))?.to_csv(path)?;
        tracing::info!(path = %path.display(), "wrote augmented table");
    }
    Ok(())
}

/// Run a pipeline from configuration
fn cmd_run(
    config_path: &Path,
    data: Option<&str>,
    output: &Path,
    cache_dir: Option<&Path>,
) -> Result<()> {
    tracing::info!(path = %config_path.display(), "loading pipeline configuration");
    let mut config = PipelineConfig::from_file(config_path)?;
    if let Some(data) = data {
        config.data = Some(DataSource::parse(data));
    }

    let pipeline = Pipeline::from_config(&config);
    let result = pipeline.execute(cache_dir)?;
    let written = result.write_to_dir(output)?;

    eprintln!(
        "Pipeline '{}' wrote {} output(s) to {}",
        result.name,
        written.len(),
        output.display()
    );
    Ok(())
}

/// Generate an example pipeline config
fn cmd_example(output_path: &Path) -> Result<()> {
    let pipeline = random_slopes_workflow(
        "body_mass_g",
        "flipper_length_mm",
        "species",
        LmmConfig::default(),
    )
    .name("penguins-random-slopes")
    .data(DataSource::Dataset {
        name: Dataset::Penguins,
    });

    let config = pipeline.to_config(Some(
        "Body mass against flipper length: one OLS line versus shrunken per-species lines",
    ));
    let yaml = config.to_yaml()?;

    std::fs::write(output_path, &yaml)?;
    eprintln!("Wrote example pipeline to {}", output_path.display());
    eprintln!();
    eprintln!("Contents:");
    println!("{}", yaml);

    Ok(())
}

/// Download a dataset
fn cmd_fetch(name: &str, cache_dir: Option<&Path>) -> Result<()> {
    let dataset: Dataset = name.parse()?;
    let fetched = fetch_dataset(dataset, cache_dir)?;
    eprintln!(
        "{}: {} rows x {} columns (cached in {})",
        dataset.name(),
        fetched.table.n_rows(),
        fetched.table.n_columns(),
        fetched.cache_dir.display()
    );
    Ok(())
}

/// List datasets
fn cmd_datasets(cache_dir: Option<&Path>) -> Result<()> {
    println!("{:<12} {:<8} DESCRIPTION", "NAME", "CACHED");
    for info in list_datasets(cache_dir) {
        println!(
            "{:<12} {:<8} {}",
            info.dataset.name(),
            if info.cached { "yes" } else { "no" },
            info.dataset.description()
        );
    }
    Ok(())
}

/// Clear the dataset cache
fn cmd_clear_cache(cache_dir: Option<&Path>) -> Result<()> {
    let dir = cache_dir.map(PathBuf::from).unwrap_or_else(default_cache_dir);
    clear_cache(Some(&dir))?;
    eprintln!("Cleared {}", dir.display());
    Ok(())
}
