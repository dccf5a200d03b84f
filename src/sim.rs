//! Simulation engine for mestDS
//!
//! Generates climate features and disease cases per region for every
//! simulation the DSL resolves to.

use std::collections::BTreeMap;
use std::f64::consts::TAU;

use chrono::{Duration, Months, NaiveDate};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Gamma, Poisson};
use serde::Serialize;

use crate::dsl::{CaseDistribution, Dsl, SimulationSettings, TargetSpec, TimeGranularity};
use crate::features::{build_generator, generate_series};
use crate::{MestError, Result};

/// Incidence is expressed per this many people.
pub const INCIDENCE_SCALE: f64 = 100_000.0;

/// Bounds on the linear predictor, keeping rates finite.
const ETA_MIN: f64 = -30.0;
const ETA_MAX: f64 = 20.0;

/// Simulated series for one region
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegionSeries {
    pub region: String,
    pub population: f64,
    pub features: BTreeMap<String, Vec<f64>>,
    pub cases: Vec<f64>,
    /// Poisson mean behind each case count
    pub expected: Vec<f64>,
}

impl RegionSeries {
    pub fn feature(&self, name: &str) -> Option<&[f64]> {
        self.features.get(name).map(Vec::as_slice)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimulatedDataset {
    pub name: String,
    pub seed: u64,
    pub granularity: TimeGranularity,
    pub target_name: String,
    pub periods: Vec<String>,
    /// Feature names in declaration order
    pub feature_names: Vec<String>,
    pub regions: Vec<RegionSeries>,
}

impl SimulatedDataset {
    pub fn len(&self) -> usize {
        self.periods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.periods.is_empty()
    }

    pub fn region(&self, name: &str) -> Option<&RegionSeries> {
        self.regions.iter().find(|r| r.region == name)
    }
}

/// Output of one `simulate()` call: one dataset per resolved simulation.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Simulations {
    pub datasets: Vec<SimulatedDataset>,
}

impl Simulations {
    pub fn len(&self) -> usize {
        self.datasets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.datasets.is_empty()
    }

    pub fn dataset(&self, name: &str) -> Option<&SimulatedDataset> {
        self.datasets.iter().find(|d| d.name == name)
    }
}

/// Labels for `n` consecutive periods starting at `start`.
pub fn period_labels(start: NaiveDate, granularity: TimeGranularity, n: usize) -> Vec<String> {
    (0..n)
        .map(|i| {
            let date = match granularity {
                TimeGranularity::Monthly => start.checked_add_months(Months::new(i as u32)),
                TimeGranularity::Weekly => start.checked_add_signed(Duration::weeks(i as i64)),
            };
            let format = match granularity {
                TimeGranularity::Monthly => "%Y-%m",
                TimeGranularity::Weekly => "%G-W%V",
            };
            date.map(|d| d.format(format).to_string())
                .unwrap_or_else(|| format!("t{i}"))
        })
        .collect()
}

fn draw_cases(
    distribution: CaseDistribution,
    rate: f64,
    rng: &mut ChaCha8Rng,
) -> Result<f64> {
    if !rate.is_finite() || rate <= 0.0 {
        return Ok(0.0);
    }

    let mean = match distribution {
        CaseDistribution::Poisson => rate,
        CaseDistribution::NegativeBinomial { dispersion } => {
            // Gamma-Poisson mixture with E[g] = rate, Var[g] = rate^2 / dispersion
            let gamma = Gamma::new(dispersion, rate / dispersion).map_err(|err| {
                MestError::Distribution(format!("gamma({dispersion}, {}): {err}", rate / dispersion))
            })?;
            gamma.sample(rng)
        }
    };

    if !mean.is_finite() || mean <= 0.0 {
        return Ok(0.0);
    }

    let poisson = Poisson::new(mean)
        .map_err(|err| MestError::Distribution(format!("poisson({mean}): {err}")))?;
    Ok(poisson.sample(rng).max(0.0))
}

/// Simulate the case process for one region. Returns `(cases, expected)`.
pub fn simulate_cases(
    target: &TargetSpec,
    population: f64,
    features: &BTreeMap<String, Vec<f64>>,
    n: usize,
    periods_per_year: usize,
    rng: &mut ChaCha8Rng,
) -> Result<(Vec<f64>, Vec<f64>)> {
    let effects = target
        .effects
        .iter()
        .map(|effect| {
            features
                .get(&effect.feature)
                .map(|series| (series.as_slice(), effect))
                .ok_or_else(|| {
                    MestError::InvalidDsl(format!(
                        "target effect on unknown feature '{}'",
                        effect.feature
                    ))
                })
        })
        .collect::<Result<Vec<_>, _>>()?;

    let scale = population / INCIDENCE_SCALE;
    let mut cases = Vec::with_capacity(n);
    let mut expected = Vec::with_capacity(n);
    let mut prev_incidence = 0.0_f64;

    for t in 0..n {
        let season = (TAU * t as f64 / periods_per_year as f64 + target.seasonal_phase).sin();
        let mut eta = target.intercept
            + target.seasonal_amplitude * season
            + target.autoregressive * prev_incidence.ln_1p();

        for (series, effect) in &effects {
            // Lags reaching before the first period read the first value
            let x = series[t.saturating_sub(effect.lag)];
            eta += effect.coefficient * (x - effect.center);
        }

        let rate = scale * eta.clamp(ETA_MIN, ETA_MAX).exp();
        let count = draw_cases(target.distribution, rate, rng)?;

        prev_incidence = count / scale;
        expected.push(rate);
        cases.push(count);
    }

    Ok((cases, expected))
}

/// Run one resolved simulation.
pub fn simulate_dataset(settings: &SimulationSettings) -> Result<SimulatedDataset> {
    let n = settings.n_time_points;
    let ppy = settings.granularity.periods_per_year();
    let mut regions = Vec::with_capacity(settings.regions.len());

    // Built once and reset at the start of every region
    let mut generators = settings
        .features
        .iter()
        .map(|feature| build_generator(&feature.generator, ppy))
        .collect::<Result<Vec<_>>>()?;

    for (idx, region) in settings.regions.iter().enumerate() {
        // One stream per region: adding a region leaves the others unchanged
        let mut rng = ChaCha8Rng::seed_from_u64(settings.seed);
        rng.set_stream(idx as u64);

        let mut features = BTreeMap::new();
        for (feature, generator) in settings.features.iter().zip(generators.iter_mut()) {
            let offset = region.offsets.get(&feature.name).copied().unwrap_or(0.0);
            let values = generate_series(feature, generator.as_mut(), offset, n, &mut rng);
            features.insert(feature.name.clone(), values);
        }

        let (cases, expected) =
            simulate_cases(&settings.target, region.population, &features, n, ppy, &mut rng)?;

        regions.push(RegionSeries {
            region: region.name.clone(),
            population: region.population,
            features,
            cases,
            expected,
        });
    }

    Ok(SimulatedDataset {
        name: settings.name.clone(),
        seed: settings.seed,
        granularity: settings.granularity,
        target_name: settings.target.name.clone(),
        periods: period_labels(settings.start, settings.granularity, n),
        feature_names: settings.feature_names(),
        regions,
    })
}

/// Simulate every dataset the DSL describes, in declaration order.
pub fn simulate_all(dsl: &Dsl) -> Result<Simulations> {
    let datasets = dsl
        .resolved_simulations()?
        .iter()
        .map(simulate_dataset)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Simulations { datasets })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsl::{EffectSpec, FeatureSpec, RegionSpec};
    use crate::features::FeatureKind;

    fn region(name: &str, population: f64) -> RegionSpec {
        RegionSpec {
            name: name.to_string(),
            population,
            offsets: BTreeMap::new(),
        }
    }

    fn settings() -> SimulationSettings {
        SimulationSettings {
            name: "test".to_string(),
            seed: 11,
            granularity: TimeGranularity::Monthly,
            start: NaiveDate::from_ymd_opt(2015, 1, 1).unwrap(),
            n_time_points: 36,
            regions: vec![region("north", 200_000.0), region("south", 50_000.0)],
            features: vec![FeatureSpec {
                name: "rainfall".to_string(),
                generator: FeatureKind::Seasonal {
                    mean: 100.0,
                    amplitude: 60.0,
                    phase: 0.0,
                    noise_std: 5.0,
                    period: None,
                },
                min: Some(0.0),
                max: None,
            }],
            target: TargetSpec {
                intercept: 2.0,
                autoregressive: 0.2,
                effects: vec![EffectSpec {
                    feature: "rainfall".to_string(),
                    coefficient: 0.01,
                    lag: 2,
                    center: 100.0,
                }],
                ..TargetSpec::default()
            },
        }
    }

    #[test]
    fn every_series_has_one_value_per_period() {
        let dataset = simulate_dataset(&settings()).unwrap();
        assert_eq!(dataset.len(), 36);
        assert_eq!(dataset.regions.len(), 2);
        for region in &dataset.regions {
            assert_eq!(region.cases.len(), 36);
            assert_eq!(region.expected.len(), 36);
            assert_eq!(region.feature("rainfall").unwrap().len(), 36);
        }
    }

    #[test]
    fn cases_are_non_negative_counts() {
        let dataset = simulate_dataset(&settings()).unwrap();
        for region in &dataset.regions {
            assert!(region.cases.iter().all(|&c| c >= 0.0 && c.fract() == 0.0));
            assert!(region.expected.iter().all(|&e| e > 0.0 && e.is_finite()));
        }
    }

    #[test]
    fn same_seed_reproduces_the_dataset() {
        let a = simulate_dataset(&settings()).unwrap();
        let b = simulate_dataset(&settings()).unwrap();
        assert_eq!(a, b);

        let mut other = settings();
        other.seed = 12;
        let c = simulate_dataset(&other).unwrap();
        assert_ne!(a.regions[0].cases, c.regions[0].cases);
    }

    #[test]
    fn adding_a_region_leaves_existing_regions_unchanged() {
        let before = simulate_dataset(&settings()).unwrap();
        let mut extended = settings();
        extended.regions.push(region("east", 80_000.0));
        let after = simulate_dataset(&extended).unwrap();

        assert_eq!(before.regions[0], after.regions[0]);
        assert_eq!(before.regions[1], after.regions[1]);
    }

    #[test]
    fn stateful_features_restart_in_every_region() {
        let mut stateful = settings();
        stateful.features.push(FeatureSpec {
            name: "reservoir".to_string(),
            generator: FeatureKind::Autoregressive {
                mean: 0.0,
                phi: 0.5,
                noise_std: 0.0,
                start: Some(16.0),
            },
            min: None,
            max: None,
        });
        stateful.regions[1].offsets.insert("reservoir".to_string(), 1.0);

        let dataset = simulate_dataset(&stateful).unwrap();
        let north = dataset.regions[0].feature("reservoir").unwrap();
        let south = dataset.regions[1].feature("reservoir").unwrap();
        assert_eq!(&north[..4], &[16.0, 8.0, 4.0, 2.0]);
        assert_eq!(&south[..4], &[17.0, 9.0, 5.0, 3.0]);
    }

    #[test]
    fn expected_cases_scale_with_population() {
        let mut flat = settings();
        flat.features.clear();
        flat.target = TargetSpec {
            intercept: 3.0,
            ..TargetSpec::default()
        };
        let dataset = simulate_dataset(&flat).unwrap();
        let north = dataset.region("north").unwrap();
        let south = dataset.region("south").unwrap();
        let expected_north = 2.0 * 3.0_f64.exp();
        assert!((north.expected[0] - expected_north).abs() < 1e-9);
        assert!((north.expected[5] / south.expected[5] - 4.0).abs() < 1e-9);
    }

    #[test]
    fn negative_binomial_is_overdispersed() {
        let variance = |distribution: CaseDistribution| {
            let mut s = settings();
            s.n_time_points = 400;
            s.regions = vec![region("only", INCIDENCE_SCALE)];
            s.features.clear();
            s.target = TargetSpec {
                intercept: 100.0_f64.ln(),
                distribution,
                ..TargetSpec::default()
            };
            let cases = simulate_dataset(&s).unwrap().regions[0].cases.clone();
            let mean = cases.iter().sum::<f64>() / cases.len() as f64;
            cases.iter().map(|c| (c - mean).powi(2)).sum::<f64>() / (cases.len() - 1) as f64
        };

        let poisson = variance(CaseDistribution::Poisson);
        let negbin = variance(CaseDistribution::NegativeBinomial { dispersion: 1.0 });
        assert!(negbin > 5.0 * poisson, "poisson {poisson}, negbin {negbin}");
    }

    #[test]
    fn period_labels_follow_granularity() {
        let start = NaiveDate::from_ymd_opt(2015, 1, 1).unwrap();
        let monthly = period_labels(start, TimeGranularity::Monthly, 13);
        assert_eq!(monthly[0], "2015-01");
        assert_eq!(monthly[12], "2016-01");

        let weekly = period_labels(start, TimeGranularity::Weekly, 2);
        assert_eq!(weekly, vec!["2015-W01", "2015-W02"]);
    }
}
