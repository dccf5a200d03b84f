use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    Mae,
    Rmse,
    Mape,
    Smape,
    Bias,
}

impl Metric {
    pub fn as_str(self) -> &'static str {
        match self {
            Metric::Mae => "mae",
            Metric::Rmse => "rmse",
            Metric::Mape => "mape",
            Metric::Smape => "smape",
            Metric::Bias => "bias",
        }
    }

    /// Value used to rank models, smaller is better.
    pub fn ranking_key(self, value: f64) -> f64 {
        match self {
            Metric::Bias => value.abs(),
            _ => value,
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct MetricsAccumulator {
    abs_sum: f64,
    sq_sum: f64,
    signed_sum: f64,
    count: usize,
    ape_sum: f64,
    ape_count: usize,
    sape_sum: f64,
}

impl MetricsAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, actual: f64, predicted: f64) {
        let err = predicted - actual;
        self.abs_sum += err.abs();
        self.sq_sum += err * err;
        self.signed_sum += err;
        self.count += 1;

        if actual != 0.0 {
            self.ape_sum += (err / actual).abs();
            self.ape_count += 1;
        }

        let denom = actual.abs() + predicted.abs();
        if denom > 0.0 {
            self.sape_sum += 2.0 * err.abs() / denom;
        }
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn value(&self, metric: Metric) -> Option<f64> {
        if self.count == 0 {
            return None;
        }
        let n = self.count as f64;
        match metric {
            Metric::Mae => Some(self.abs_sum / n),
            Metric::Rmse => Some((self.sq_sum / n).sqrt()),
            Metric::Mape => {
                if self.ape_count == 0 {
                    None
                } else {
                    Some(100.0 * self.ape_sum / self.ape_count as f64)
                }
            }
            Metric::Smape => Some(100.0 * self.sape_sum / n),
            Metric::Bias => Some(self.signed_sum / n),
        }
    }

    pub fn finalize(&self, metrics: &[Metric]) -> BTreeMap<Metric, Option<f64>> {
        metrics.iter().map(|&m| (m, self.value(m))).collect()
    }
}
