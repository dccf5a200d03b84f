//! Trust-weighted ensemble
//!
//! Members are scored on a held-out tail of the history. Each member keeps
//! an EMA of its absolute residuals, and its weight is inversely
//! proportional to `sigma0 + ema`.

use crate::dsl::EnsembleSpec;
use crate::models::{not_fitted, require_history, ForecastModel, SeriesView};
use crate::Result;

/// Trust statistics for one member
#[derive(Debug, Clone, PartialEq)]
pub struct MemberTrust {
    pub model: String,
    /// EMA of absolute validation residuals
    pub residual_ema: f64,
    /// Normalized weight
    pub weight: f64,
}

pub struct TrustEnsembleModel {
    name: String,
    spec: EnsembleSpec,
    members: Vec<Box<dyn ForecastModel>>,
    trust: Vec<MemberTrust>,
}

/// Normalize `1 / (sigma0 + s_k)`; uniform when nothing usable is left.
pub fn trust_weights(residual_emas: &[f64], sigma0: f64) -> Vec<f64> {
    let n = residual_emas.len();
    let raw: Vec<f64> = residual_emas
        .iter()
        .map(|&s| {
            let w = 1.0 / (sigma0 + s);
            if w.is_finite() && w > 0.0 {
                w
            } else {
                0.0
            }
        })
        .collect();

    let sum: f64 = raw.iter().sum();
    if sum > 0.0 && sum.is_finite() {
        raw.into_iter().map(|w| w / sum).collect()
    } else {
        vec![1.0 / n as f64; n]
    }
}

impl TrustEnsembleModel {
    pub fn new(name: String, spec: EnsembleSpec, members: Vec<Box<dyn ForecastModel>>) -> Self {
        Self {
            name,
            spec,
            members,
            trust: Vec::new(),
        }
    }

    pub fn trust(&self) -> &[MemberTrust] {
        &self.trust
    }

    /// EMA of one member's absolute residuals over the validation tail,
    /// infinite when the member cannot fit or forecast the cut history.
    fn validation_residual(
        &mut self,
        member: usize,
        view: &SeriesView<'_>,
        validation: usize,
    ) -> f64 {
        let cut = view.origin() - validation;
        let train = view.truncated(cut);
        let model = &mut self.members[member];

        let forecast = match model.fit(&train).and_then(|_| model.predict(&train, validation)) {
            Ok(forecast) if forecast.len() == validation => forecast,
            _ => return f64::INFINITY,
        };

        let rho = self.spec.rho;
        view.history()[cut..]
            .iter()
            .zip(&forecast)
            .fold(0.0, |ema, (&y, &pred)| rho * ema + (1.0 - rho) * (y - pred).abs())
    }
}

impl ForecastModel for TrustEnsembleModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn fit(&mut self, view: &SeriesView<'_>) -> Result<()> {
        require_history(&self.name, view, 1)?;
        let validation = self.spec.validation.min(view.origin() / 2);

        let emas: Vec<f64> = if validation == 0 {
            vec![0.0; self.members.len()]
        } else {
            (0..self.members.len())
                .map(|k| self.validation_residual(k, view, validation))
                .collect()
        };
        let weights = trust_weights(&emas, self.spec.sigma0);

        for member in &mut self.members {
            member.fit(view)?;
        }

        self.trust = self
            .members
            .iter()
            .zip(emas.iter().zip(&weights))
            .map(|(member, (&residual_ema, &weight))| MemberTrust {
                model: member.name().to_string(),
                residual_ema,
                weight,
            })
            .collect();
        Ok(())
    }

    fn predict(&self, view: &SeriesView<'_>, horizon: usize) -> Result<Vec<f64>> {
        if self.trust.len() != self.members.len() || self.members.is_empty() {
            return Err(not_fitted(&self.name));
        }

        let mut combined = vec![0.0; horizon];
        for (member, trust) in self.members.iter().zip(&self.trust) {
            if trust.weight <= 0.0 {
                continue;
            }
            let forecast = member.predict(view, horizon)?;
            for (total, value) in combined.iter_mut().zip(forecast) {
                *total += trust.weight * value;
            }
        }
        Ok(combined)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::naive::{HistoricalMeanModel, NaiveModel};
    use std::collections::BTreeMap;

    fn spec(validation: usize) -> EnsembleSpec {
        EnsembleSpec {
            members: vec!["naive".into(), "mean".into()],
            rho: 0.5,
            sigma0: 1.0,
            validation,
        }
    }

    fn members() -> Vec<Box<dyn ForecastModel>> {
        vec![
            Box::new(NaiveModel::new("naive".into())),
            Box::new(HistoricalMeanModel::new("mean".into(), None)),
        ]
    }

    #[test]
    fn test_weights_are_normalized_and_favor_small_residuals() {
        let weights = trust_weights(&[0.0, 1.0, 3.0], 1.0);
        assert!((weights.iter().sum::<f64>() - 1.0).abs() < 1e-12);
        assert!(weights[0] > weights[1] && weights[1] > weights[2]);
        assert!((weights[0] / weights[1] - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_failed_member_gets_zero_weight() {
        let weights = trust_weights(&[f64::INFINITY, 2.0], 1.0);
        assert_eq!(weights, vec![0.0, 1.0]);
        assert_eq!(trust_weights(&[f64::INFINITY; 2], 1.0), vec![0.5, 0.5]);
    }

    #[test]
    fn test_trending_series_trusts_naive_more() {
        let cases: Vec<f64> = (0..20).map(|t| t as f64).collect();
        let features = BTreeMap::new();
        let view = SeriesView::new(&cases, &features, 12);

        let mut model = TrustEnsembleModel::new("ens".into(), spec(4), members());
        model.fit(&view).unwrap();
        let trust = model.trust();
        assert_eq!(trust[0].model, "naive");
        assert!(trust[0].weight > trust[1].weight);

        // Combination lies between the member forecasts
        let forecast = model.predict(&view, 1).unwrap();
        assert!(forecast[0] > 9.5 && forecast[0] < 19.0);
    }

    #[test]
    fn test_short_history_falls_back_to_equal_weights() {
        let cases = vec![4.0];
        let features = BTreeMap::new();
        let view = SeriesView::new(&cases, &features, 12);

        let mut model = TrustEnsembleModel::new("ens".into(), spec(6), members());
        model.fit(&view).unwrap();
        assert!(model.trust().iter().all(|t| t.weight == 0.5));
        assert_eq!(model.predict(&view, 2).unwrap(), vec![4.0, 4.0]);
    }

    #[test]
    fn test_predict_before_fit_fails() {
        let features = BTreeMap::new();
        let view = SeriesView::new(&[1.0], &features, 12);
        let model = TrustEnsembleModel::new("ens".into(), spec(2), members());
        assert!(model.predict(&view, 1).is_err());
    }
}
