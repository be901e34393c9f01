//! Integration tests for the two teaching workflows: summarising a table
//! and comparing least-squares with mixed-model fits.

use approx::assert_relative_eq;
use std::io::Write;
use tempfile::{NamedTempFile, TempDir};
use tidy_lmm::pipeline::random_slopes_workflow;
use tidy_lmm::prelude::*;

/// A small penguins-like table with missing values.
fn write_penguins_fixture() -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "species,island,flipper_length_mm,body_mass_g,sex").unwrap();
    let rows = [
        ("Adelie", "Torgersen", "181", "3750", "male"),
        ("Adelie", "Torgersen", "186", "3800", "female"),
        ("Adelie", "Dream", "195", "3250", "female"),
        ("Adelie", "Dream", "NA", "NA", "NA"),
        ("Adelie", "Biscoe", "193", "3450", "female"),
        ("Adelie", "Biscoe", "190", "3650", "male"),
        ("Chinstrap", "Dream", "192", "3500", "female"),
        ("Chinstrap", "Dream", "196", "3900", "male"),
        ("Chinstrap", "Dream", "193", "3650", "male"),
        ("Chinstrap", "Dream", "188", "3525", "female"),
        ("Gentoo", "Biscoe", "211", "4500", "female"),
        ("Gentoo", "Biscoe", "230", "5700", "male"),
        ("Gentoo", "Biscoe", "210", "4450", "female"),
        ("Gentoo", "Biscoe", "218", "5700", "male"),
        ("Gentoo", "Biscoe", "215", "5400", ""),
    ];
    for (species, island, flipper, mass, sex) in rows {
        writeln!(file, "{},{},{},{},{}", species, island, flipper, mass, sex).unwrap();
    }
    file.flush().unwrap();
    file
}

fn load_fixture(file: &NamedTempFile) -> Table {
    DataSource::Path {
        path: file.path().to_path_buf(),
    }
    .load(None)
    .unwrap()
}

#[test]
fn test_grouped_mean_scenario() {
    let table = Table::from_csv_str("group,x,y\nA,1,2\nA,2,4\nB,1,3\nB,2,5\n").unwrap();
    let summary = Summarize::new()
        .group_by(&["group"])
        .agg("mean_y", Aggregate::mean("y", Missing::Ignore))
        .run(&table)
        .unwrap();

    assert_eq!(summary.n_rows(), 2);
    assert_eq!(summary.value(0, "group").unwrap(), &Value::from("A"));
    assert_eq!(summary.value(0, "mean_y").unwrap(), &Value::Float(3.0));
    assert_eq!(summary.value(1, "group").unwrap(), &Value::from("B"));
    assert_eq!(summary.value(1, "mean_y").unwrap(), &Value::Float(4.0));

    let count = Summarize::new()
        .filter(Predicate::eq("group", "A"))
        .agg("n", Aggregate::Count)
        .run(&table)
        .unwrap();
    assert_eq!(count.value(0, "n").unwrap(), &Value::Int(2));
}

#[test]
fn test_penguin_summary_with_standard_errors() {
    let file = write_penguins_fixture();
    let penguins = load_fixture(&file);
    assert_eq!(penguins.n_rows(), 15);
    assert_eq!(penguins.column_type("body_mass_g").unwrap(), ColumnType::Int);

    let summary = Summarize::new()
        .filter(Predicate::not_missing("sex"))
        .group_by(&["species", "sex"])
        .agg("n", Aggregate::count_non_missing("body_mass_g"))
        .agg("mean_mass", Aggregate::mean("body_mass_g", Missing::Ignore))
        .agg("se_mass", Aggregate::std_error("body_mass_g", Missing::Ignore))
        .run(&penguins)
        .unwrap();

    // Adelie/Chinstrap/Gentoo x female/male
    assert_eq!(summary.n_rows(), 6);
    assert_eq!(summary.value(0, "species").unwrap(), &Value::from("Adelie"));
    assert_eq!(summary.value(0, "sex").unwrap(), &Value::from("female"));
    assert_eq!(summary.value(0, "n").unwrap(), &Value::Int(3));
    assert_relative_eq!(summary.row(0).unwrap().get_f64("mean_mass").unwrap(), 3500.0);

    // Gentoo males: 5700, 5700 -> sd 0
    let gentoo_male = summary
        .rows()
        .find(|r| {
            r.get("species") == Some(&Value::from("Gentoo")) && r.get("sex") == Some(&Value::from("male"))
        })
        .unwrap();
    assert_relative_eq!(gentoo_male.get_f64("se_mass").unwrap(), 0.0);

    let csv = summary.to_csv_string().unwrap();
    let back = Table::from_csv_str(&csv).unwrap();
    assert_eq!(back.n_rows(), 6);
    assert_eq!(back.column_names(), summary.column_names());
}

#[test]
fn test_ols_versus_mixed_model() {
    let file = write_penguins_fixture();
    let penguins = load_fixture(&file);

    let ols = model_lm(&penguins, "body_mass_g ~ flipper_length_mm").unwrap();
    assert_eq!(ols.n_dropped, 1);
    assert_eq!(ols.n_obs(), 14);
    assert!(ols.coefficient("flipper_length_mm").unwrap() > 0.0);

    let lmm = model_lmm(
        &penguins,
        "body_mass_g ~ flipper_length_mm + (1 | species)",
        &LmmConfig::default(),
    )
    .unwrap();
    assert_eq!(lmm.n_groups(), 3);
    assert_eq!(lmm.n_dropped, 1);

    let coef = lmm.coef().unwrap();
    assert_eq!(coef.n_rows(), 3);
    assert_eq!(
        coef.column_names(),
        &["species", "(Intercept)", "flipper_length_mm", "reliable"]
    );

    // Random intercepts share the fixed slope
    let slope = lmm.coefficient("flipper_length_mm").unwrap();
    for value in coef.numeric_column("flipper_length_mm").unwrap() {
        assert_relative_eq!(value.unwrap(), slope, epsilon = 1e-9);
    }

    let augmented = augment(&penguins, &ModelFit::Lmm(lmm)).unwrap();
    assert!(augmented.value(3, ".fitted").unwrap().is_missing());
    let row = augmented.row(0).unwrap();
    assert_relative_eq!(
        row.get_f64(".fitted").unwrap(),
        row.get_f64(".intercept").unwrap() + row.get_f64(".slope").unwrap() * 181.0,
        epsilon = 1e-6
    );
}

#[test]
fn test_weighted_group_intercepts_approximate_fixed_intercept() {
    // Balanced design, 5 subjects x 6 occasions
    let mut csv = String::from("subject,time,score\n");
    let offsets = [-3.0, -1.0, 0.0, 1.5, 2.5];
    for (s, offset) in offsets.iter().enumerate() {
        for t in 0..6 {
            let noise = [0.2, -0.1, 0.0, 0.15, -0.25, 0.05][(s + t) % 6];
            csv.push_str(&format!("p{},{},{}\n", s, t, 20.0 + offset + 0.8 * t as f64 + noise));
        }
    }
    let table = Table::from_csv_str(&csv).unwrap();
    let fit = model_lmm(&table, "score ~ time + (1 | subject)", &LmmConfig::default()).unwrap();

    let coef = fit.coef().unwrap();
    let sizes = fit.random.observations_per_group();
    let total: usize = sizes.iter().sum();
    let weighted: f64 = coef
        .numeric_column("(Intercept)")
        .unwrap()
        .iter()
        .zip(&sizes)
        .map(|(b, &n)| b.unwrap() * n as f64)
        .sum::<f64>()
        / total as f64;
    assert_relative_eq!(weighted, fit.coefficient("(Intercept)").unwrap(), epsilon = 1e-6);
    assert!(fit.is_reliable());
    assert!(fit.icc().unwrap() > 0.5);
}

#[test]
fn test_pipeline_from_yaml_file() {
    let data = write_penguins_fixture();
    let pipeline = random_slopes_workflow(
        "body_mass_g",
        "flipper_length_mm",
        "species",
        LmmConfig::default(),
    )
    .name("penguins")
    .data(DataSource::Path {
        path: data.path().to_path_buf(),
    });

    let mut config_file = NamedTempFile::new().unwrap();
    write!(config_file, "{}", pipeline.to_config(None).to_yaml().unwrap()).unwrap();
    config_file.flush().unwrap();

    let config = PipelineConfig::from_file(config_file.path()).unwrap();
    let result = Pipeline::from_config(&config).execute(None).unwrap();

    assert_eq!(result.data.n_rows(), 14);
    assert_eq!(result.table("group_lines").unwrap().n_rows(), 3);
    assert!(result.plot("lines").is_some());

    let out = TempDir::new().unwrap();
    let written = result.write_to_dir(out.path()).unwrap();
    assert_eq!(written.len(), result.outputs.len());
    let plot_json = std::fs::read_to_string(out.path().join("lines.plot.json")).unwrap();
    let spec = PlotSpec::from_json(&plot_json).unwrap();
    assert_eq!(spec.data, "augmented");
}

#[test]
fn test_missing_file_is_an_error() {
    let result = DataSource::Path {
        path: "/nonexistent/penguins.csv".into(),
    }
    .load(None);
    assert!(matches!(result, Err(TidyError::Io(_)) | Err(TidyError::Csv(_))));
}
