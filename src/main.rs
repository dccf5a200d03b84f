use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;

use mestds::dsl::DEFAULT_DSL_PATH;
use mestds::io::{create_timestamped_output_dir, write_run_outputs};
use mestds::metrics::Metric;
use mestds::{drive, EvaluationReport, MestDs, Simulations};

#[derive(Debug, Parser)]
#[command(name = "mestds")]
#[command(about = "Simulate climate-health datasets from a YAML DSL and backtest forecasting models")]
struct Cli {
    /// DSL file describing the simulation and evaluation
    #[arg(default_value = DEFAULT_DSL_PATH)]
    dsl: PathBuf,

    /// Output root; defaults to `output.dir` in the DSL
    #[arg(long)]
    outdir: Option<PathBuf>,

    #[arg(long)]
    seed: Option<u64>,

    /// Skip writing CSV/JSON artefacts
    #[arg(long, default_value_t = false)]
    no_write: bool,
}

fn fmt_metric(value: Option<f64>) -> String {
    match value {
        Some(v) => format!("{v:.3}"),
        None => "NA".to_string(),
    }
}

fn print_summary(sims: &Simulations, report: &EvaluationReport) {
    let metric = report.metrics.first().copied().unwrap_or(Metric::Mae);

    for dataset in &sims.datasets {
        let total_cases: f64 = dataset
            .regions
            .iter()
            .flat_map(|r| r.cases.iter())
            .sum();
        println!(
            "dataset {}: {} regions x {} periods, {} cases (seed {})",
            dataset.name,
            dataset.regions.len(),
            dataset.len(),
            total_cases,
            dataset.seed
        );

        if let Some(ranking) = report.rankings.iter().find(|r| r.dataset == dataset.name) {
            for (rank, model) in ranking.models.iter().enumerate() {
                let value = report
                    .score(&dataset.name, model)
                    .and_then(|s| s.metrics.get(&metric).copied().flatten());
                println!(
                    "  {}. {} {}={}",
                    rank + 1,
                    model,
                    metric.as_str(),
                    fmt_metric(value)
                );
            }
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut mest = MestDs::new(&cli.dsl)
        .with_context(|| format!("failed to load DSL {}", cli.dsl.display()))?;
    if let Some(seed) = cli.seed {
        mest = mest.with_seed(seed);
    }

    println!(
        "loaded {} ({} models) from {}",
        mest.dsl().name,
        mest.dsl().models.len(),
        cli.dsl.display()
    );

    let (sims, report) = drive(&mut mest).context("simulation or evaluation failed")?;
    println!(
        "simulated {} dataset(s), {} forecasts evaluated",
        sims.len(),
        report.forecasts.len()
    );
    print_summary(&sims, &report);

    if cli.no_write {
        return Ok(());
    }

    let root = cli
        .outdir
        .unwrap_or_else(|| PathBuf::from(&mest.dsl().output.dir));
    let run_outdir = create_timestamped_output_dir(&root)
        .with_context(|| format!("failed to create output directory under {}", root.display()))?;
    write_run_outputs(&run_outdir, &mest, &sims, &report)
        .with_context(|| format!("failed to write outputs to {}", run_outdir.display()))?;

    println!("wrote outputs to {}", run_outdir.display());
    Ok(())
}
