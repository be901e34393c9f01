//! Penguins walkthrough: summaries, then OLS versus a mixed model.
//!
//! This example shows how to:
//! 1. Load the Palmer penguins dataset (downloaded once, then cached)
//! 2. Summarise body mass by species and sex
//! 3. Fit one regression line for all birds
//! 4. Fit per-species lines with a random-slopes model and compare
//!
//! Pass a CSV path as the first argument to work offline.

use tidy_lmm::prelude::*;

fn main() -> Result<()> {
    let source = std::env::args()
        .nth(1)
        .map(|arg| DataSource::parse(&arg))
        .unwrap_or(DataSource::Dataset {
            name: Dataset::Penguins,
        });

    println!("=== Loading {} ===\n", source);
    let penguins = source.load(None)?;
    println!(
        "{} rows x {} columns\n",
        penguins.n_rows(),
        penguins.n_columns()
    );

    println!("=== Body mass by species and sex ===\n");
    let summary = Summarize::new()
        .filter(Predicate::not_missing("sex"))
        .group_by(&["species", "sex"])
        .agg("n", Aggregate::count_non_missing("body_mass_g"))
        .agg("mean_mass", Aggregate::mean("body_mass_g", Missing::Ignore))
        .agg("se_mass", Aggregate::std_error("body_mass_g", Missing::Ignore))
        .run(&penguins)?;
    println!("{}", summary);

    println!("=== One line for all birds ===\n");
    let ols = model_lm(&penguins, "body_mass_g ~ flipper_length_mm")?;
    println!("{}", ols);

    println!("=== One line per species ===\n");
    let config = LmmConfig::default();
    let intercepts = model_lmm(
        &penguins,
        "body_mass_g ~ flipper_length_mm + (1 | species)",
        &config,
    )?;
    let slopes = model_lmm(
        &penguins,
        "body_mass_g ~ flipper_length_mm + (1 + flipper_length_mm | species)",
        &config,
    )?;
    println!("{}", slopes);
    println!("Per-species coefficients:");
    println!("{}", slopes.coef()?);

    println!("=== Do the slopes vary? ===\n");
    println!("{}", compare_lmm(&intercepts, &slopes)?);

    let spec = PlotSpec::new("augmented", "flipper_length_mm", "body_mass_g")
        .color("species")
        .layer(Layer::Point)
        .layer(Layer::AbLine {
            data: Some("coef".to_string()),
            intercept: "(Intercept)".to_string(),
            slope: "flipper_length_mm".to_string(),
            color: Some("species".to_string()),
        })
        .title("Body mass against flipper length");
    let augmented = augment(&penguins, &ModelFit::Lmm(slopes))?;
    spec.validate(&augmented)?;
    println!("Plot description:\n{}", spec.to_json()?);

    Ok(())
}
