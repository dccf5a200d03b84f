//! Log-linear regression of cases on lagged climate features.

use std::f64::consts::TAU;

use nalgebra::{DMatrix, DVector};

use crate::dsl::RegressionSpec;
use crate::models::{
    clean_forecast, not_fitted, solve_normal_equation, ForecastModel, SeriesView,
};
use crate::{MestError, Result};

pub struct LinearRegressionModel {
    name: String,
    spec: RegressionSpec,
    coefficients: Option<DVector<f64>>,
}

impl LinearRegressionModel {
    pub fn new(name: String, spec: RegressionSpec) -> Self {
        Self {
            name,
            spec,
            coefficients: None,
        }
    }

    /// Fitted coefficients, intercept first.
    pub fn coefficients(&self) -> Option<&DVector<f64>> {
        self.coefficients.as_ref()
    }

    fn n_params(&self) -> usize {
        1 + self.spec.features.len() * (self.spec.lags + 1)
            + usize::from(self.spec.autoregressive)
            + if self.spec.seasonal { 2 } else { 0 }
    }

    fn first_row(&self) -> usize {
        self.spec.lags.max(usize::from(self.spec.autoregressive))
    }

    fn transform(&self, y: f64) -> f64 {
        if self.spec.log_transform {
            y.max(0.0).ln_1p()
        } else {
            y
        }
    }

    fn inverse(&self, z: f64) -> f64 {
        if self.spec.log_transform {
            z.exp_m1()
        } else {
            z
        }
    }

    fn feature_columns<'a>(&self, view: &SeriesView<'a>) -> Result<Vec<&'a [f64]>> {
        self.spec
            .features
            .iter()
            .map(|feature| {
                view.feature(feature).ok_or_else(|| {
                    MestError::InvalidDsl(format!(
                        "model '{}': unknown feature '{feature}'",
                        self.name
                    ))
                })
            })
            .collect()
    }

    /// Regressor row for period `t`; `previous` is the transformed count at `t - 1`.
    fn design_row(
        &self,
        t: usize,
        columns: &[&[f64]],
        previous: f64,
        periods_per_year: usize,
    ) -> Result<Vec<f64>> {
        let mut row = Vec::with_capacity(self.n_params());
        row.push(1.0);

        for column in columns {
            for lag in 0..=self.spec.lags {
                let value = column.get(t - lag).copied().ok_or_else(|| {
                    MestError::InsufficientData {
                        context: format!("model '{}': feature values", self.name),
                        needed: t - lag + 1,
                        got: column.len(),
                    }
                })?;
                row.push(value);
            }
        }

        if self.spec.autoregressive {
            row.push(previous);
        }

        if self.spec.seasonal {
            let angle = TAU * t as f64 / periods_per_year.max(1) as f64;
            row.push(angle.sin());
            row.push(angle.cos());
        }

        Ok(row)
    }
}

impl ForecastModel for LinearRegressionModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn fit(&mut self, view: &SeriesView<'_>) -> Result<()> {
        let columns = self.feature_columns(view)?;
        let history = view.history();
        let n = self.n_params();
        let first_row = self.first_row();

        if history.len() < first_row + n {
            return Err(MestError::InsufficientData {
                context: format!("model '{}': training rows", self.name),
                needed: first_row + n,
                got: history.len(),
            });
        }

        let target: Vec<f64> = history.iter().map(|&y| self.transform(y)).collect();

        let mut normal = DMatrix::<f64>::identity(n, n) * (self.spec.ridge + 1e-9);
        let mut rhs = DVector::<f64>::zeros(n);

        for t in first_row..history.len() {
            let previous = if t > 0 { target[t - 1] } else { 0.0 };
            let row = self.design_row(t, &columns, previous, view.periods_per_year())?;
            let yt = target[t];

            for a in 0..n {
                let ha = row[a];
                rhs[a] += ha * yt;
                for b in 0..n {
                    normal[(a, b)] += ha * row[b];
                }
            }
        }

        self.coefficients = Some(solve_normal_equation(normal, rhs));
        Ok(())
    }

    fn predict(&self, view: &SeriesView<'_>, horizon: usize) -> Result<Vec<f64>> {
        let beta = self
            .coefficients
            .as_ref()
            .ok_or_else(|| not_fitted(&self.name))?;
        let columns = self.feature_columns(view)?;
        let origin = view.origin();

        // AR term is fed back from the previous step's prediction
        let mut previous = view.last().map(|y| self.transform(y)).unwrap_or(0.0);
        let mut forecast = Vec::with_capacity(horizon);

        for t in origin..origin + horizon {
            let row = self.design_row(t, &columns, previous, view.periods_per_year())?;
            let z: f64 = row.iter().zip(beta.iter()).map(|(x, b)| x * b).sum();
            let value = clean_forecast(self.inverse(z));
            previous = self.transform(value);
            forecast.push(value);
        }

        Ok(forecast)
    }
}
