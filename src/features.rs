//! Climate covariate generators.

use std::f64::consts::TAU;

use rand::RngCore;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};

use crate::dsl::FeatureSpec;
use crate::{MestError, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case", deny_unknown_fields)]
pub enum FeatureKind {
    Constant {
        value: f64,
    },
    Seasonal {
        mean: f64,
        amplitude: f64,
        #[serde(default)]
        phase: f64,
        #[serde(default)]
        noise_std: f64,
        /// Periods per cycle; one year when left out
        #[serde(default)]
        period: Option<f64>,
    },
    Autoregressive {
        mean: f64,
        phi: f64,
        noise_std: f64,
        #[serde(default)]
        start: Option<f64>,
    },
    RandomWalk {
        start: f64,
        step_std: f64,
    },
    Trend {
        start: f64,
        slope: f64,
        #[serde(default)]
        noise_std: f64,
    },
}

impl FeatureKind {
    pub fn generator_type(&self) -> &'static str {
        match self {
            FeatureKind::Constant { .. } => "constant",
            FeatureKind::Seasonal { .. } => "seasonal",
            FeatureKind::Autoregressive { .. } => "autoregressive",
            FeatureKind::RandomWalk { .. } => "random_walk",
            FeatureKind::Trend { .. } => "trend",
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        let fail = |message: &str| Err(message.to_string());
        let finite = |values: &[f64]| values.iter().all(|v| v.is_finite());

        match self {
            FeatureKind::Constant { value } => {
                if !value.is_finite() {
                    return fail("value must be finite");
                }
            }
            FeatureKind::Seasonal {
                mean,
                amplitude,
                phase,
                noise_std,
                period,
            } => {
                if !finite(&[*mean, *amplitude, *phase, *noise_std]) {
                    return fail("seasonal parameters must be finite");
                }
                if *noise_std < 0.0 {
                    return fail("noise_std must be >= 0");
                }
                if let Some(period) = period {
                    if !period.is_finite() || *period <= 0.0 {
                        return fail("period must be > 0");
                    }
                }
            }
            FeatureKind::Autoregressive {
                mean,
                phi,
                noise_std,
                start,
            } => {
                if !finite(&[*mean, *phi, *noise_std, start.unwrap_or(*mean)]) {
                    return fail("autoregressive parameters must be finite");
                }
                if phi.abs() >= 1.0 {
                    return fail("phi must satisfy |phi| < 1");
                }
                if *noise_std < 0.0 {
                    return fail("noise_std must be >= 0");
                }
            }
            FeatureKind::RandomWalk { start, step_std } => {
                if !finite(&[*start, *step_std]) {
                    return fail("random walk parameters must be finite");
                }
                if *step_std < 0.0 {
                    return fail("step_std must be >= 0");
                }
            }
            FeatureKind::Trend {
                start,
                slope,
                noise_std,
            } => {
                if !finite(&[*start, *slope, *noise_std]) {
                    return fail("trend parameters must be finite");
                }
                if *noise_std < 0.0 {
                    return fail("noise_std must be >= 0");
                }
            }
        }
        Ok(())
    }
}

pub trait FeatureGenerator {
    fn reset(&mut self);
    fn next(&mut self, t: usize, rng: &mut dyn RngCore) -> f64;
}

/// Zero-mean gaussian noise; draws nothing when the deviation is zero.
#[derive(Clone, Debug)]
struct Noise(Option<Normal<f64>>);

impl Noise {
    fn new(std: f64) -> Result<Self> {
        if std == 0.0 {
            return Ok(Self(None));
        }
        Normal::new(0.0, std)
            .map(|normal| Self(Some(normal)))
            .map_err(|err| MestError::Distribution(format!("normal(0, {std}): {err}")))
    }

    fn sample(&self, rng: &mut dyn RngCore) -> f64 {
        match &self.0 {
            Some(normal) => normal.sample(rng),
            None => 0.0,
        }
    }
}

#[derive(Clone, Debug)]
pub struct ConstantGenerator {
    value: f64,
}

impl FeatureGenerator for ConstantGenerator {
    fn reset(&mut self) {}

    fn next(&mut self, _t: usize, _rng: &mut dyn RngCore) -> f64 {
        self.value
    }
}

#[derive(Clone, Debug)]
pub struct SeasonalGenerator {
    mean: f64,
    amplitude: f64,
    phase: f64,
    period: f64,
    noise: Noise,
}

impl FeatureGenerator for SeasonalGenerator {
    fn reset(&mut self) {}

    fn next(&mut self, t: usize, rng: &mut dyn RngCore) -> f64 {
        let angle = TAU * t as f64 / self.period + self.phase;
        self.mean + self.amplitude * angle.sin() + self.noise.sample(rng)
    }
}

#[derive(Clone, Debug)]
pub struct AutoregressiveGenerator {
    mean: f64,
    phi: f64,
    start: f64,
    value: Option<f64>,
    noise: Noise,
}

impl FeatureGenerator for AutoregressiveGenerator {
    fn reset(&mut self) {
        self.value = None;
    }

    fn next(&mut self, _t: usize, rng: &mut dyn RngCore) -> f64 {
        let value = match self.value {
            None => self.start,
            Some(prev) => self.mean + self.phi * (prev - self.mean) + self.noise.sample(rng),
        };
        self.value = Some(value);
        value
    }
}

#[derive(Clone, Debug)]
pub struct RandomWalkGenerator {
    start: f64,
    value: Option<f64>,
    step: Noise,
}

impl FeatureGenerator for RandomWalkGenerator {
    fn reset(&mut self) {
        self.value = None;
    }

    fn next(&mut self, _t: usize, rng: &mut dyn RngCore) -> f64 {
        let value = match self.value {
            None => self.start,
            Some(prev) => prev + self.step.sample(rng),
        };
        self.value = Some(value);
        value
    }
}

#[derive(Clone, Debug)]
pub struct TrendGenerator {
    start: f64,
    slope: f64,
    noise: Noise,
}

impl FeatureGenerator for TrendGenerator {
    fn reset(&mut self) {}

    fn next(&mut self, t: usize, rng: &mut dyn RngCore) -> f64 {
        self.start + self.slope * t as f64 + self.noise.sample(rng)
    }
}

pub fn build_generator(
    kind: &FeatureKind,
    periods_per_year: usize,
) -> Result<Box<dyn FeatureGenerator>> {
    let generator: Box<dyn FeatureGenerator> = match kind {
        FeatureKind::Constant { value } => Box::new(ConstantGenerator { value: *value }),
        FeatureKind::Seasonal {
            mean,
            amplitude,
            phase,
            noise_std,
            period,
        } => Box::new(SeasonalGenerator {
            mean: *mean,
            amplitude: *amplitude,
            phase: *phase,
            period: period.unwrap_or(periods_per_year as f64),
            noise: Noise::new(*noise_std)?,
        }),
        FeatureKind::Autoregressive {
            mean,
            phi,
            noise_std,
            start,
        } => Box::new(AutoregressiveGenerator {
            mean: *mean,
            phi: *phi,
            start: start.unwrap_or(*mean),
            value: None,
            noise: Noise::new(*noise_std)?,
        }),
        FeatureKind::RandomWalk { start, step_std } => Box::new(RandomWalkGenerator {
            start: *start,
            value: None,
            step: Noise::new(*step_std)?,
        }),
        FeatureKind::Trend {
            start,
            slope,
            noise_std,
        } => Box::new(TrendGenerator {
            start: *start,
            slope: *slope,
            noise: Noise::new(*noise_std)?,
        }),
    };
    Ok(generator)
}

/// Generate `n` values of one feature for one region: raw generator output,
/// plus the region offset, clipped to the feature bounds.
pub fn generate_feature(
    spec: &FeatureSpec,
    offset: f64,
    n: usize,
    periods_per_year: usize,
    rng: &mut dyn RngCore,
) -> Result<Vec<f64>> {
    let mut generator = build_generator(&spec.generator, periods_per_year)?;
    Ok(generate_series(spec, generator.as_mut(), offset, n, rng))
}

/// Run `generator` from its initial state for `n` periods, applying the
/// region offset and the feature's clipping bounds.
pub fn generate_series(
    spec: &FeatureSpec,
    generator: &mut dyn FeatureGenerator,
    offset: f64,
    n: usize,
    rng: &mut dyn RngCore,
) -> Vec<f64> {
    generator.reset();

    let lower = spec.min.unwrap_or(f64::NEG_INFINITY);
    let upper = spec.max.unwrap_or(f64::INFINITY);

    (0..n)
        .map(|t| (generator.next(t, rng) + offset).clamp(lower, upper))
        .collect()
}
