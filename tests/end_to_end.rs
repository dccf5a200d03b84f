use std::fs;
use std::path::Path;

use mestds::io::{create_timestamped_output_dir, write_run_outputs};
use mestds::{run, Metric, MestDs};

const DSL: &str = r#"
name: e2e
seed: 7
time_granularity: weekly
start: "2020-01-06"
n_time_points: 60
regions:
  - { name: highlands, population: 120000, offsets: { temperature: -3.0 } }
  - { name: lowlands, population: 300000 }
features:
  - name: temperature
    generator: { kind: seasonal, mean: 24.0, amplitude: 3.0, noise_std: 0.3 }
  - name: rainfall
    generator: { kind: autoregressive, mean: 80.0, phi: 0.6, noise_std: 10.0 }
    min: 0.0
target:
  intercept: 2.0
  seasonal_amplitude: 0.3
  autoregressive: 0.2
  effects:
    - { feature: temperature, coefficient: 0.08, lag: 2, center: 24.0 }
    - { feature: rainfall, coefficient: 0.004, lag: 1, center: 80.0 }
  distribution: { kind: negative_binomial, dispersion: 8.0 }
simulations:
  - { name: baseline }
  - { name: wet, features: [{ name: rainfall, generator: { kind: constant, value: 140.0 } }] }
models:
  - { name: naive, kind: naive }
  - { name: seasonal, kind: seasonal_naive, period: 4 }
  - { name: holt, kind: holt, alpha: 0.4, beta: 0.2 }
  - { name: glm, kind: linear_regression, features: [temperature, rainfall], lags: 2, autoregressive: true }
  - { name: ensemble, kind: trust_ensemble, members: [naive, holt, glm] }
evaluation:
  horizon: 4
  n_splits: 3
  stride: 4
  min_train: 30
  metrics: [mae, rmse, smape]
"#;

fn write_dsl(dir: &Path) -> std::path::PathBuf {
    let path = dir.join("dsl.yaml");
    fs::write(&path, DSL).unwrap();
    path
}

#[test]
fn full_run_produces_scores_for_every_model() {
    let dir = tempfile::tempdir().unwrap();
    let (mest, sims, report) = run(write_dsl(dir.path())).unwrap();

    assert_eq!(sims.len(), 2);
    assert_eq!(sims.datasets[0].periods[0], "2020-W02");
    assert_eq!(report.scores.len(), 2 * mest.dsl().models.len());
    assert_eq!(report.forecasts.len(), 2 * 5 * 2 * 3 * 4);

    for score in &report.scores {
        let mae = score.metrics[&Metric::Mae].unwrap();
        assert!(mae.is_finite() && mae >= 0.0, "{}: {mae}", score.model);
    }
    for ranking in &report.rankings {
        assert_eq!(ranking.models.len(), 5);
    }
}

#[test]
fn same_seed_gives_identical_results() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_dsl(dir.path());

    let (_, sims_a, report_a) = run(&path).unwrap();
    let (_, sims_b, report_b) = run(&path).unwrap();
    assert_eq!(sims_a, sims_b);
    assert_eq!(report_a, report_b);

    let other = MestDs::new(&path).unwrap().with_seed(8);
    assert_ne!(other.simulate().unwrap(), sims_a);
}

#[test]
fn outputs_are_written_to_a_fresh_directory() {
    let dir = tempfile::tempdir().unwrap();
    let (mest, sims, report) = run(write_dsl(dir.path())).unwrap();

    let outdir = create_timestamped_output_dir(&dir.path().join("out")).unwrap();
    let artifacts = write_run_outputs(&outdir, &mest, &sims, &report).unwrap();

    assert_eq!(artifacts.datasets.len(), 2);
    let baseline = fs::read_to_string(outdir.join("dataset_baseline.csv")).unwrap();
    assert_eq!(
        baseline.lines().next().unwrap(),
        "time_period,location,population,disease_cases,expected,temperature,rainfall"
    );
    assert_eq!(baseline.lines().count(), 1 + 2 * 60);

    let forecasts = fs::read_to_string(&artifacts.forecasts).unwrap();
    assert_eq!(forecasts.lines().count(), 1 + report.forecasts.len());

    let manifest: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&artifacts.manifest).unwrap()).unwrap();
    assert_eq!(manifest["name"], "e2e");
    assert_eq!(manifest["seed"], 7);
    assert_eq!(manifest["datasets"], serde_json::json!(["baseline", "wet"]));

    let report_json: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&artifacts.report).unwrap()).unwrap();
    assert_eq!(report_json["horizon"], 4);
    assert!(report_json["scores"][0]["metrics"]["mae"].is_number());
}
