use std::collections::BTreeMap;

use nalgebra::{DMatrix, DVector};

use crate::dsl::{Dsl, ModelKind, ModelSpec};
use crate::sim::RegionSeries;
use crate::{MestError, Result};

pub mod ensemble;
pub mod holt;
pub mod naive;
pub mod regression;

use ensemble::TrustEnsembleModel;
use holt::HoltModel;
use naive::{HistoricalMeanModel, NaiveModel, SeasonalNaiveModel};
use regression::LinearRegressionModel;

/// What a model may see at a forecast origin: the case history strictly
/// before the origin, and the full covariate series.
#[derive(Debug, Clone, Copy)]
pub struct SeriesView<'a> {
    cases: &'a [f64],
    features: &'a BTreeMap<String, Vec<f64>>,
    periods_per_year: usize,
}

impl<'a> SeriesView<'a> {
    pub fn new(
        cases: &'a [f64],
        features: &'a BTreeMap<String, Vec<f64>>,
        periods_per_year: usize,
    ) -> Self {
        Self {
            cases,
            features,
            periods_per_year,
        }
    }

    /// View of `region` with the origin at `origin`.
    pub fn from_region(region: &'a RegionSeries, origin: usize, periods_per_year: usize) -> Self {
        let origin = origin.min(region.cases.len());
        Self::new(&region.cases[..origin], &region.features, periods_per_year)
    }

    /// Same covariates, history cut at `len`.
    pub fn truncated(&self, len: usize) -> Self {
        Self {
            cases: &self.cases[..len.min(self.cases.len())],
            ..*self
        }
    }

    pub fn history(&self) -> &'a [f64] {
        self.cases
    }

    /// Index of the first period to forecast.
    pub fn origin(&self) -> usize {
        self.cases.len()
    }

    pub fn last(&self) -> Option<f64> {
        self.cases.last().copied()
    }

    pub fn feature(&self, name: &str) -> Option<&'a [f64]> {
        self.features.get(name).map(Vec::as_slice)
    }

    pub fn periods_per_year(&self) -> usize {
        self.periods_per_year
    }
}

pub trait ForecastModel {
    fn name(&self) -> &str;
    fn fit(&mut self, view: &SeriesView<'_>) -> Result<()>;
    /// Forecast `horizon` periods from the origin of `view`.
    fn predict(&self, view: &SeriesView<'_>, horizon: usize) -> Result<Vec<f64>>;
}

/// Case counts cannot be negative or non-finite.
pub(crate) fn clean_forecast(value: f64) -> f64 {
    if value.is_finite() {
        value.max(0.0)
    } else {
        0.0
    }
}

pub(crate) fn require_history(
    name: &str,
    view: &SeriesView<'_>,
    needed: usize,
) -> Result<()> {
    if view.origin() >= needed {
        return Ok(());
    }
    Err(MestError::InsufficientData {
        context: format!("model '{name}'"),
        needed,
        got: view.origin(),
    })
}

pub(crate) fn not_fitted(name: &str) -> MestError {
    MestError::InsufficientData {
        context: format!("model '{name}' predicted before fit"),
        needed: 1,
        got: 0,
    }
}

pub(crate) fn solve_normal_equation(normal: DMatrix<f64>, rhs: DVector<f64>) -> DVector<f64> {
    if let Some(chol) = normal.clone().cholesky() {
        return chol.solve(&rhs);
    }
    if let Some(sol) = normal.lu().solve(&rhs) {
        return sol;
    }
    DVector::<f64>::zeros(rhs.nrows())
}

pub fn build_model(spec: &ModelSpec, dsl: &Dsl) -> Result<Box<dyn ForecastModel>> {
    let name = spec.name.clone();
    let model: Box<dyn ForecastModel> = match &spec.kind {
        ModelKind::Naive => Box::new(NaiveModel::new(name)),
        ModelKind::SeasonalNaive { period } => Box::new(SeasonalNaiveModel::new(name, *period)),
        ModelKind::HistoricalMean { window } => {
            Box::new(HistoricalMeanModel::new(name, *window))
        }
        ModelKind::Holt { alpha, beta } => Box::new(HoltModel::new(name, *alpha, *beta)),
        ModelKind::LinearRegression(regression) => {
            Box::new(LinearRegressionModel::new(name, regression.clone()))
        }
        ModelKind::TrustEnsemble(ensemble) => {
            let mut members = Vec::with_capacity(ensemble.members.len());
            for member in &ensemble.members {
                let member_spec = dsl.model(member).ok_or_else(|| {
                    MestError::InvalidDsl(format!(
                        "model '{}': unknown member model '{member}'",
                        spec.name
                    ))
                })?;
                if matches!(member_spec.kind, ModelKind::TrustEnsemble(_)) {
                    return Err(MestError::InvalidDsl(format!(
                        "model '{}': member '{member}' cannot be an ensemble",
                        spec.name
                    )));
                }
                members.push(build_model(member_spec, dsl)?);
            }
            Box::new(TrustEnsembleModel::new(name, ensemble.clone(), members))
        }
    };
    Ok(model)
}
