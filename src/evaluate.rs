//! Rolling-origin backtest of the DSL's models on simulated datasets.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde::Serialize;

use crate::dsl::{Dsl, ModelSpec};
use crate::metrics::{Metric, MetricsAccumulator};
use crate::models::{build_model, SeriesView};
use crate::sim::{SimulatedDataset, Simulations};
use crate::{MestError, Result};

/// One forecast step against its realised value.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ForecastRecord {
    pub dataset: String,
    pub model: String,
    pub region: String,
    pub split: usize,
    /// Label of the first forecast period
    pub origin: String,
    /// Label of the forecast period
    pub period: String,
    /// 1-based steps ahead of the origin
    pub step: usize,
    pub actual: f64,
    pub predicted: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelScore {
    pub dataset: String,
    pub model: String,
    pub kind: String,
    pub n_forecasts: usize,
    pub metrics: BTreeMap<Metric, Option<f64>>,
    pub mae_by_step: Vec<Option<f64>>,
}

/// Models of one dataset, best first.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Ranking {
    pub dataset: String,
    pub metric: Metric,
    pub models: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvaluationReport {
    pub horizon: usize,
    pub n_splits: usize,
    pub stride: usize,
    pub metrics: Vec<Metric>,
    pub scores: Vec<ModelScore>,
    pub rankings: Vec<Ranking>,
    pub forecasts: Vec<ForecastRecord>,
}

impl EvaluationReport {
    pub fn score(&self, dataset: &str, model: &str) -> Option<&ModelScore> {
        self.scores
            .iter()
            .find(|s| s.dataset == dataset && s.model == model)
    }

    pub fn best_model(&self, dataset: &str) -> Option<&str> {
        self.rankings
            .iter()
            .find(|r| r.dataset == dataset)
            .and_then(|r| r.models.first())
            .map(String::as_str)
    }
}

fn ensure_len(context: &'static str, expected: usize, actual: usize) -> Result<()> {
    if expected == actual {
        return Ok(());
    }

    Err(MestError::LengthMismatch {
        context,
        expected,
        got: actual,
    })
}

fn score_model(
    dsl: &Dsl,
    spec: &ModelSpec,
    dataset: &SimulatedDataset,
    cutoffs: &[usize],
    forecasts: &mut Vec<ForecastRecord>,
) -> Result<ModelScore> {
    let horizon = dsl.evaluation.horizon;
    let ppy = dataset.granularity.periods_per_year();
    let mut overall = MetricsAccumulator::new();
    let mut by_step = vec![MetricsAccumulator::new(); horizon];

    for region in &dataset.regions {
        ensure_len("region cases", dataset.len(), region.cases.len())?;

        for (split, &cutoff) in cutoffs.iter().enumerate() {
            // Fresh model per split so no state leaks across origins
            let mut model = build_model(spec, dsl)?;
            let view = SeriesView::from_region(region, cutoff, ppy);
            model.fit(&view)?;
            let predicted = model.predict(&view, horizon)?;
            ensure_len("forecast", horizon, predicted.len())?;

            for (offset, &value) in predicted.iter().enumerate() {
                let t = cutoff + offset;
                let actual = region.cases[t];
                overall.observe(actual, value);
                by_step[offset].observe(actual, value);
                forecasts.push(ForecastRecord {
                    dataset: dataset.name.clone(),
                    model: spec.name.clone(),
                    region: region.region.clone(),
                    split,
                    origin: dataset.periods[cutoff].clone(),
                    period: dataset.periods[t].clone(),
                    step: offset + 1,
                    actual,
                    predicted: value,
                });
            }
        }
    }

    Ok(ModelScore {
        dataset: dataset.name.clone(),
        model: spec.name.clone(),
        kind: spec.kind.kind_name().to_string(),
        n_forecasts: overall.count(),
        metrics: overall.finalize(&dsl.evaluation.metrics),
        mae_by_step: by_step.iter().map(|acc| acc.value(Metric::Mae)).collect(),
    })
}

/// Order models by `metric`, ascending; missing values go last.
pub fn rank_models(dataset: &str, metric: Metric, scores: &[ModelScore]) -> Ranking {
    let mut keyed: Vec<(&str, Option<f64>)> = scores
        .iter()
        .filter(|s| s.dataset == dataset)
        .map(|s| {
            let key = s
                .metrics
                .get(&metric)
                .copied()
                .flatten()
                .map(|v| metric.ranking_key(v));
            (s.model.as_str(), key)
        })
        .collect();

    keyed.sort_by(|a, b| match (a.1, b.1) {
        (Some(x), Some(y)) => x.total_cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    });

    Ranking {
        dataset: dataset.to_string(),
        metric,
        models: keyed.into_iter().map(|(name, _)| name.to_string()).collect(),
    }
}

pub fn evaluate(dsl: &Dsl, sims: &Simulations) -> Result<EvaluationReport> {
    let spec = &dsl.evaluation;
    let ranking_metric = spec.metrics.first().copied().unwrap_or(Metric::Mae);

    let mut scores = Vec::new();
    let mut rankings = Vec::new();
    let mut forecasts = Vec::new();

    for dataset in &sims.datasets {
        let needed = spec.required_length();
        if dataset.len() < needed {
            return Err(MestError::InsufficientData {
                context: format!("dataset '{}'", dataset.name),
                needed,
                got: dataset.len(),
            });
        }
        ensure_len("period labels", dataset.len(), dataset.periods.len())?;

        let cutoffs = spec.cutoffs(dataset.len());
        let first = scores.len();
        for model in &dsl.models {
            scores.push(score_model(dsl, model, dataset, &cutoffs, &mut forecasts)?);
        }
        rankings.push(rank_models(&dataset.name, ranking_metric, &scores[first..]));
    }

    Ok(EvaluationReport {
        horizon: spec.horizon,
        n_splits: spec.n_splits,
        stride: spec.stride,
        metrics: spec.metrics.clone(),
        scores,
        rankings,
        forecasts,
    })
}
