//! CSV and JSON artefacts of a run.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{SecondsFormat, Utc};
use csv::WriterBuilder;
use serde::Serialize;

use crate::driver::MestDs;
use crate::evaluate::{EvaluationReport, ForecastRecord, ModelScore, Ranking};
use crate::metrics::Metric;
use crate::sim::{SimulatedDataset, Simulations};
use crate::Result;

pub const OUTPUT_SCHEMA_VERSION: &str = "1.0.0";

#[derive(Debug, Clone, Serialize)]
pub struct Manifest {
    pub schema_version: String,
    pub name: String,
    pub dsl_path: Option<String>,
    pub seed: u64,
    pub time_granularity: String,
    pub datasets: Vec<String>,
    pub models: Vec<String>,
    pub metrics: Vec<Metric>,
    pub created_at: String,
}

/// Paths written by [`write_run_outputs`].
#[derive(Debug, Clone, Default)]
pub struct RunArtifacts {
    pub datasets: Vec<PathBuf>,
    pub scores: PathBuf,
    pub forecasts: PathBuf,
    pub report: PathBuf,
    pub manifest: PathBuf,
}

fn fmt_f64(v: f64) -> String {
    format!("{v:.10}")
}

fn fmt_opt(v: Option<f64>) -> String {
    match v {
        Some(x) => fmt_f64(x),
        None => "NA".to_string(),
    }
}

/// Count columns are written as integers when they hold whole numbers.
fn fmt_count(v: f64) -> String {
    if v.fract() == 0.0 && v.abs() < 1e15 {
        format!("{v:.0}")
    } else {
        fmt_f64(v)
    }
}

/// `root/<UTC timestamp>`, suffixed with a counter if it already exists.
pub fn create_timestamped_output_dir(root: &Path) -> Result<PathBuf> {
    fs::create_dir_all(root)?;

    let timestamp = Utc::now().format("%Y-%m-%dT%H-%M-%SZ").to_string();
    let mut output_dir = root.join(&timestamp);
    let mut counter = 1_u32;

    while output_dir.exists() {
        output_dir = root.join(format!("{timestamp}-{counter:02}"));
        counter += 1;
    }

    fs::create_dir_all(&output_dir)?;
    Ok(output_dir)
}

/// One row per region and period.
pub fn write_dataset_csv(path: &Path, dataset: &SimulatedDataset) -> Result<()> {
    let mut wtr = WriterBuilder::new().has_headers(false).from_path(path)?;

    let mut header = vec![
        "time_period".to_string(),
        "location".to_string(),
        "population".to_string(),
        dataset.target_name.clone(),
        "expected".to_string(),
    ];
    header.extend(dataset.feature_names.iter().cloned());
    wtr.write_record(&header)?;

    for region in &dataset.regions {
        for (t, period) in dataset.periods.iter().enumerate() {
            let mut record = vec![
                period.clone(),
                region.region.clone(),
                fmt_count(region.population),
                fmt_count(region.cases[t]),
                fmt_f64(region.expected[t]),
            ];
            for feature in &dataset.feature_names {
                record.push(fmt_opt(
                    region.feature(feature).and_then(|values| values.get(t).copied()),
                ));
            }
            wtr.write_record(&record)?;
        }
    }

    wtr.flush()?;
    Ok(())
}

pub fn write_scores_csv(
    path: &Path,
    scores: &[ModelScore],
    metrics: &[Metric],
) -> Result<()> {
    let mut wtr = WriterBuilder::new().has_headers(false).from_path(path)?;

    let mut header: Vec<&str> = vec!["dataset", "model", "kind", "n_forecasts"];
    header.extend(metrics.iter().map(|m| m.as_str()));
    header.push("schema_version");
    wtr.write_record(&header)?;

    for score in scores {
        let mut record = vec![
            score.dataset.clone(),
            score.model.clone(),
            score.kind.clone(),
            score.n_forecasts.to_string(),
        ];
        for metric in metrics {
            record.push(fmt_opt(score.metrics.get(metric).copied().flatten()));
        }
        record.push(OUTPUT_SCHEMA_VERSION.to_string());
        wtr.write_record(&record)?;
    }

    wtr.flush()?;
    Ok(())
}

pub fn write_forecasts_csv(path: &Path, rows: &[ForecastRecord]) -> Result<()> {
    let mut wtr = WriterBuilder::new().has_headers(false).from_path(path)?;

    wtr.write_record([
        "dataset",
        "model",
        "location",
        "split",
        "origin",
        "time_period",
        "step",
        "actual",
        "predicted",
    ])?;

    for row in rows {
        wtr.write_record([
            row.dataset.as_str(),
            row.model.as_str(),
            row.region.as_str(),
            &row.split.to_string(),
            row.origin.as_str(),
            row.period.as_str(),
            &row.step.to_string(),
            &fmt_count(row.actual),
            &fmt_f64(row.predicted),
        ])?;
    }

    wtr.flush()?;
    Ok(())
}

/// Scores and rankings; per-step forecasts stay in the CSV.
pub fn write_report_json(path: &Path, report: &EvaluationReport) -> Result<()> {
    #[derive(Serialize)]
    struct ReportJson<'a> {
        schema_version: &'a str,
        horizon: usize,
        n_splits: usize,
        stride: usize,
        metrics: &'a [Metric],
        scores: &'a [ModelScore],
        rankings: &'a [Ranking],
    }

    let body = ReportJson {
        schema_version: OUTPUT_SCHEMA_VERSION,
        horizon: report.horizon,
        n_splits: report.n_splits,
        stride: report.stride,
        metrics: &report.metrics,
        scores: &report.scores,
        rankings: &report.rankings,
    };
    fs::write(path, serde_json::to_string_pretty(&body)?)?;
    Ok(())
}

pub fn build_manifest(mest: &MestDs, sims: &Simulations) -> Manifest {
    let dsl = mest.dsl();
    Manifest {
        schema_version: OUTPUT_SCHEMA_VERSION.to_string(),
        name: dsl.name.clone(),
        dsl_path: mest.source().map(|p| p.display().to_string()),
        seed: dsl.seed,
        time_granularity: dsl.time_granularity.as_str().to_string(),
        datasets: sims.datasets.iter().map(|d| d.name.clone()).collect(),
        models: dsl.model_names(),
        metrics: dsl.evaluation.metrics.clone(),
        created_at: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
    }
}

pub fn write_manifest_json(path: &Path, manifest: &Manifest) -> Result<()> {
    fs::write(path, serde_json::to_string_pretty(manifest)?)?;
    Ok(())
}

/// Write every artefact of a run into `outdir`, which must exist.
pub fn write_run_outputs(
    outdir: &Path,
    mest: &MestDs,
    sims: &Simulations,
    report: &EvaluationReport,
) -> Result<RunArtifacts> {
    let mut artifacts = RunArtifacts::default();

    if mest.dsl().output.write_simulations {
        for dataset in &sims.datasets {
            let path = outdir.join(format!("dataset_{}.csv", dataset.name));
            write_dataset_csv(&path, dataset)?;
            artifacts.datasets.push(path);
        }
    }

    artifacts.scores = outdir.join("scores.csv");
    write_scores_csv(&artifacts.scores, &report.scores, &report.metrics)?;

    artifacts.forecasts = outdir.join("forecasts.csv");
    write_forecasts_csv(&artifacts.forecasts, &report.forecasts)?;

    artifacts.report = outdir.join("report.json");
    write_report_json(&artifacts.report, report)?;

    artifacts.manifest = outdir.join("manifest.json");
    write_manifest_json(&artifacts.manifest, &build_manifest(mest, sims))?;

    Ok(artifacts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    use crate::dsl::TimeGranularity;
    use crate::sim::RegionSeries;

    fn dataset() -> SimulatedDataset {
        SimulatedDataset {
            name: "baseline".into(),
            seed: 1,
            granularity: TimeGranularity::Monthly,
            target_name: "disease_cases".into(),
            periods: vec!["2020-01".into(), "2020-02".into()],
            feature_names: vec!["rainfall".into()],
            regions: vec![RegionSeries {
                region: "north".into(),
                population: 1000.0,
                features: BTreeMap::from([("rainfall".to_string(), vec![1.5, 2.25])]),
                cases: vec![3.0, 0.0],
                expected: vec![2.5, 0.75],
            }],
        }
    }

    #[test]
    fn number_formats() {
        assert_eq!(fmt_f64(0.5), "0.5000000000");
        assert_eq!(fmt_opt(None), "NA");
        assert_eq!(fmt_count(12.0), "12");
        assert_eq!(fmt_count(1.5), "1.5000000000");
    }

    #[test]
    fn dataset_csv_has_one_row_per_region_and_period() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dataset.csv");
        write_dataset_csv(&path, &dataset()).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(
            lines[0],
            "time_period,location,population,disease_cases,expected,rainfall"
        );
        assert_eq!(lines[1], "2020-01,north,1000,3,2.5000000000,1.5000000000");
        assert_eq!(lines.len(), 3);
    }

    #[test]
    fn timestamped_dirs_do_not_collide() {
        let root = tempfile::tempdir().unwrap();
        let a = create_timestamped_output_dir(root.path()).unwrap();
        let b = create_timestamped_output_dir(root.path()).unwrap();
        assert_ne!(a, b);
        assert!(a.is_dir() && b.is_dir());
    }

    #[test]
    fn missing_metric_is_written_as_na() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scores.csv");
        let score = ModelScore {
            dataset: "baseline".into(),
            model: "naive".into(),
            kind: "naive".into(),
            n_forecasts: 4,
            metrics: BTreeMap::from([(Metric::Mae, Some(1.0)), (Metric::Mape, None)]),
            mae_by_step: vec![Some(1.0)],
        };
        write_scores_csv(&path, &[score], &[Metric::Mae, Metric::Mape]).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("dataset,model,kind,n_forecasts,mae,mape,schema_version\n"));
        assert!(text.contains("baseline,naive,naive,4,1.0000000000,NA,1.0.0"));
    }
}
