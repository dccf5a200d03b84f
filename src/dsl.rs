//! The mestDS configuration language.
//!
//! A DSL document is YAML. It names the regions and climate features to
//! simulate, the disease case process driven by them, optional named
//! variants of that setup, the models to evaluate and the backtest settings.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::features::FeatureKind;
use crate::metrics::Metric;
use crate::{MestError, Result};

pub const DEFAULT_DSL_PATH: &str = "example-dsl.yaml";
pub const DEFAULT_OUTPUT_DIR: &str = "output-mestds";
pub const BASELINE_SIMULATION: &str = "baseline";

const SEED_MIX: u64 = 0x9E37_79B9_7F4A_7C15;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeGranularity {
    Weekly,
    #[default]
    Monthly,
}

impl TimeGranularity {
    pub fn periods_per_year(self) -> usize {
        match self {
            TimeGranularity::Weekly => 52,
            TimeGranularity::Monthly => 12,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TimeGranularity::Weekly => "weekly",
            TimeGranularity::Monthly => "monthly",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Dsl {
    #[serde(default = "default_name")]
    pub name: String,
    #[serde(default = "default_seed")]
    pub seed: u64,
    #[serde(default)]
    pub time_granularity: TimeGranularity,
    #[serde(default = "default_start")]
    pub start: String,
    #[serde(default = "default_n_time_points")]
    pub n_time_points: usize,
    pub regions: Vec<RegionSpec>,
    #[serde(default)]
    pub features: Vec<FeatureSpec>,
    #[serde(default)]
    pub target: TargetSpec,
    #[serde(default)]
    pub simulations: Vec<SimulationVariant>,
    pub models: Vec<ModelSpec>,
    #[serde(default)]
    pub evaluation: EvaluationSpec,
    #[serde(default)]
    pub output: OutputSpec,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegionSpec {
    pub name: String,
    pub population: f64,
    /// Additive per-feature offsets for this region
    #[serde(default)]
    pub offsets: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FeatureSpec {
    pub name: String,
    pub generator: FeatureKind,
    #[serde(default)]
    pub min: Option<f64>,
    #[serde(default)]
    pub max: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EffectSpec {
    pub feature: String,
    pub coefficient: f64,
    #[serde(default)]
    pub lag: usize,
    #[serde(default)]
    pub center: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case", deny_unknown_fields)]
pub enum CaseDistribution {
    #[default]
    Poisson,
    NegativeBinomial {
        dispersion: f64,
    },
}

/// Disease case process, on the log scale of incidence per 100 000.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TargetSpec {
    pub name: String,
    pub intercept: f64,
    pub seasonal_amplitude: f64,
    pub seasonal_phase: f64,
    pub autoregressive: f64,
    pub effects: Vec<EffectSpec>,
    pub distribution: CaseDistribution,
}

impl Default for TargetSpec {
    fn default() -> Self {
        Self {
            name: "disease_cases".to_string(),
            intercept: 1.0,
            seasonal_amplitude: 0.0,
            seasonal_phase: 0.0,
            autoregressive: 0.0,
            effects: Vec::new(),
            distribution: CaseDistribution::Poisson,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TargetOverride {
    pub intercept: Option<f64>,
    pub seasonal_amplitude: Option<f64>,
    pub seasonal_phase: Option<f64>,
    pub autoregressive: Option<f64>,
    pub effects: Option<Vec<EffectSpec>>,
    pub distribution: Option<CaseDistribution>,
}

impl TargetOverride {
    pub fn apply(&self, base: &TargetSpec) -> TargetSpec {
        TargetSpec {
            name: base.name.clone(),
            intercept: self.intercept.unwrap_or(base.intercept),
            seasonal_amplitude: self.seasonal_amplitude.unwrap_or(base.seasonal_amplitude),
            seasonal_phase: self.seasonal_phase.unwrap_or(base.seasonal_phase),
            autoregressive: self.autoregressive.unwrap_or(base.autoregressive),
            effects: self.effects.clone().unwrap_or_else(|| base.effects.clone()),
            distribution: self.distribution.unwrap_or(base.distribution),
        }
    }
}

/// A named variant of the base simulation. Every field left out inherits
/// the base value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SimulationVariant {
    pub name: String,
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default)]
    pub n_time_points: Option<usize>,
    #[serde(default)]
    pub regions: Option<Vec<RegionSpec>>,
    /// Merged by name into the base features
    #[serde(default)]
    pub features: Option<Vec<FeatureSpec>>,
    #[serde(default)]
    pub target: Option<TargetOverride>,
}

// serde cannot combine deny_unknown_fields with flatten, so unknown model
// keys are rejected by `ModelKind` and the spec payloads instead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSpec {
    pub name: String,
    #[serde(flatten)]
    pub kind: ModelKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case", deny_unknown_fields)]
pub enum ModelKind {
    Naive,
    SeasonalNaive {
        #[serde(default)]
        period: Option<usize>,
    },
    HistoricalMean {
        #[serde(default)]
        window: Option<usize>,
    },
    Holt {
        #[serde(default = "default_holt_alpha")]
        alpha: f64,
        #[serde(default = "default_holt_beta")]
        beta: f64,
    },
    LinearRegression(RegressionSpec),
    TrustEnsemble(EnsembleSpec),
}

impl ModelKind {
    pub fn kind_name(&self) -> &'static str {
        match self {
            ModelKind::Naive => "naive",
            ModelKind::SeasonalNaive { .. } => "seasonal_naive",
            ModelKind::HistoricalMean { .. } => "historical_mean",
            ModelKind::Holt { .. } => "holt",
            ModelKind::LinearRegression(_) => "linear_regression",
            ModelKind::TrustEnsemble(_) => "trust_ensemble",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegressionSpec {
    #[serde(default)]
    pub features: Vec<String>,
    /// Each feature enters at lags `0..=lags`
    #[serde(default)]
    pub lags: usize,
    #[serde(default)]
    pub autoregressive: bool,
    #[serde(default)]
    pub seasonal: bool,
    #[serde(default = "default_true")]
    pub log_transform: bool,
    #[serde(default = "default_ridge")]
    pub ridge: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EnsembleSpec {
    pub members: Vec<String>,
    #[serde(default = "default_rho")]
    pub rho: f64,
    #[serde(default = "default_sigma0")]
    pub sigma0: f64,
    /// Trailing periods held out to score the members
    #[serde(default = "default_validation")]
    pub validation: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EvaluationSpec {
    pub horizon: usize,
    pub n_splits: usize,
    pub stride: usize,
    pub min_train: usize,
    pub metrics: Vec<Metric>,
}

impl Default for EvaluationSpec {
    fn default() -> Self {
        Self {
            horizon: 3,
            n_splits: 4,
            stride: 1,
            min_train: 24,
            metrics: vec![Metric::Mae, Metric::Rmse],
        }
    }
}

impl EvaluationSpec {
    /// Shortest series the backtest can run on.
    pub fn required_length(&self) -> usize {
        self.min_train + self.horizon + self.n_splits.saturating_sub(1) * self.stride
    }

    /// Forecast origins for a series of `n` periods, oldest first.
    pub fn cutoffs(&self, n: usize) -> Vec<usize> {
        (0..self.n_splits)
            .map(|k| n - self.horizon - (self.n_splits - 1 - k) * self.stride)
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OutputSpec {
    pub dir: String,
    pub write_simulations: bool,
}

impl Default for OutputSpec {
    fn default() -> Self {
        Self {
            dir: DEFAULT_OUTPUT_DIR.to_string(),
            write_simulations: true,
        }
    }
}

/// A concrete simulation after variant overrides are applied.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulationSettings {
    pub name: String,
    pub seed: u64,
    pub granularity: TimeGranularity,
    pub start: NaiveDate,
    pub n_time_points: usize,
    pub regions: Vec<RegionSpec>,
    pub features: Vec<FeatureSpec>,
    pub target: TargetSpec,
}

impl SimulationSettings {
    pub fn feature_names(&self) -> Vec<String> {
        self.features.iter().map(|f| f.name.clone()).collect()
    }
}

fn default_name() -> String {
    "mestds".to_string()
}

fn default_seed() -> u64 {
    2024
}

fn default_start() -> String {
    "2015-01-01".to_string()
}

fn default_n_time_points() -> usize {
    120
}

fn default_holt_alpha() -> f64 {
    0.5
}

fn default_holt_beta() -> f64 {
    0.1
}

fn default_true() -> bool {
    true
}

fn default_ridge() -> f64 {
    1e-6
}

fn default_rho() -> f64 {
    0.9
}

fn default_sigma0() -> f64 {
    1.0
}

fn default_validation() -> usize {
    6
}

fn invalid(message: impl Into<String>) -> MestError {
    MestError::InvalidDsl(message.into())
}

fn ensure(condition: bool, message: impl Into<String>) -> Result<()> {
    if condition {
        Ok(())
    } else {
        Err(invalid(message))
    }
}

fn ensure_unique<'a>(
    names: impl IntoIterator<Item = &'a str>,
    what: &str,
) -> Result<()> {
    let mut seen = BTreeSet::new();
    for name in names {
        ensure(!name.trim().is_empty(), format!("{what} names must be non-empty"))?;
        ensure(seen.insert(name), format!("duplicate {what} name '{name}'"))?;
    }
    Ok(())
}

fn merge_features(base: &[FeatureSpec], overrides: &[FeatureSpec]) -> Vec<FeatureSpec> {
    let mut merged = base.to_vec();
    for feature in overrides {
        match merged.iter_mut().find(|f| f.name == feature.name) {
            Some(slot) => *slot = feature.clone(),
            None => merged.push(feature.clone()),
        }
    }
    merged
}

fn derive_seed(base: u64, index: usize) -> u64 {
    base ^ (index as u64 + 1).wrapping_mul(SEED_MIX)
}

impl Dsl {
    pub fn from_path(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path).map_err(|source| MestError::ReadDsl {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&raw, path.display().to_string())
    }

    pub fn from_yaml_str(raw: &str) -> Result<Self> {
        Self::parse(raw, "<inline>".to_string())
    }

    fn parse(raw: &str, origin: String) -> Result<Self> {
        let dsl: Dsl = match serde_yaml::from_str(raw) {
            Ok(dsl) => dsl,
            Err(source) => return Err(MestError::ParseDsl { origin, source }),
        };
        dsl.validate()?;
        Ok(dsl)
    }

    pub fn start_date(&self) -> Result<NaiveDate> {
        NaiveDate::parse_from_str(&self.start, "%Y-%m-%d")
            .map_err(|err| invalid(format!("start '{}' is not a YYYY-MM-DD date: {err}", self.start)))
    }

    pub fn model(&self, name: &str) -> Option<&ModelSpec> {
        self.models.iter().find(|m| m.name == name)
    }

    pub fn model_names(&self) -> Vec<String> {
        self.models.iter().map(|m| m.name.clone()).collect()
    }

    /// Apply every variant to the base settings. Without variants a single
    /// `baseline` simulation is returned.
    pub fn resolved_simulations(&self) -> Result<Vec<SimulationSettings>> {
        let start = self.start_date()?;
        let base = SimulationSettings {
            name: BASELINE_SIMULATION.to_string(),
            seed: self.seed,
            granularity: self.time_granularity,
            start,
            n_time_points: self.n_time_points,
            regions: self.regions.clone(),
            features: self.features.clone(),
            target: self.target.clone(),
        };

        if self.simulations.is_empty() {
            return Ok(vec![base]);
        }

        Ok(self
            .simulations
            .iter()
            .enumerate()
            .map(|(index, variant)| SimulationSettings {
                name: variant.name.clone(),
                seed: variant.seed.unwrap_or_else(|| derive_seed(self.seed, index)),
                granularity: base.granularity,
                start,
                n_time_points: variant.n_time_points.unwrap_or(base.n_time_points),
                regions: variant
                    .regions
                    .clone()
                    .unwrap_or_else(|| base.regions.clone()),
                features: match &variant.features {
                    Some(features) => merge_features(&base.features, features),
                    None => base.features.clone(),
                },
                target: match &variant.target {
                    Some(target) => target.apply(&base.target),
                    None => base.target.clone(),
                },
            })
            .collect())
    }

    pub fn validate(&self) -> Result<()> {
        ensure_unique(
            self.simulations.iter().map(|v| v.name.as_str()),
            "simulation",
        )?;

        let resolved = self.resolved_simulations()?;
        for settings in &resolved {
            validate_settings(settings).map_err(|err| match err {
                MestError::InvalidDsl(message) => {
                    invalid(format!("simulation '{}': {message}", settings.name))
                }
                other => other,
            })?;
        }

        self.validate_models(&resolved)?;
        self.validate_evaluation(&resolved)?;

        ensure(
            !self.output.dir.trim().is_empty(),
            "output.dir must be non-empty",
        )
    }

    fn validate_models(&self, resolved: &[SimulationSettings]) -> Result<()> {
        ensure(!self.models.is_empty(), "at least one model is required")?;
        ensure_unique(self.models.iter().map(|m| m.name.as_str()), "model")?;

        for model in &self.models {
            let context = format!("model '{}'", model.name);
            match &model.kind {
                ModelKind::Naive => {}
                ModelKind::SeasonalNaive { period } => {
                    ensure(period.map_or(true, |p| p > 0), format!("{context}: period must be > 0"))?;
                }
                ModelKind::HistoricalMean { window } => {
                    ensure(window.map_or(true, |w| w > 0), format!("{context}: window must be > 0"))?;
                }
                ModelKind::Holt { alpha, beta } => {
                    ensure(
                        *alpha > 0.0 && *alpha <= 1.0,
                        format!("{context}: alpha must be in (0, 1]"),
                    )?;
                    ensure(
                        (0.0..=1.0).contains(beta),
                        format!("{context}: beta must be in [0, 1]"),
                    )?;
                }
                ModelKind::LinearRegression(spec) => {
                    ensure(
                        spec.ridge.is_finite() && spec.ridge >= 0.0,
                        format!("{context}: ridge must be >= 0"),
                    )?;
                    for settings in resolved {
                        for feature in &spec.features {
                            ensure(
                                settings.features.iter().any(|f| &f.name == feature),
                                format!(
                                    "{context}: feature '{feature}' is not simulated in '{}'",
                                    settings.name
                                ),
                            )?;
                        }
                    }
                }
                ModelKind::TrustEnsemble(spec) => {
                    ensure(
                        !spec.members.is_empty(),
                        format!("{context}: members must be non-empty"),
                    )?;
                    ensure(
                        spec.rho > 0.0 && spec.rho < 1.0,
                        format!("{context}: rho must be in (0, 1)"),
                    )?;
                    ensure(spec.sigma0 > 0.0, format!("{context}: sigma0 must be > 0"))?;
                    for member in &spec.members {
                        let target = self.model(member).ok_or_else(|| {
                            invalid(format!("{context}: unknown member model '{member}'"))
                        })?;
                        ensure(
                            !matches!(target.kind, ModelKind::TrustEnsemble(_)),
                            format!("{context}: member '{member}' cannot be an ensemble"),
                        )?;
                    }
                }
            }
        }
        Ok(())
    }

    fn validate_evaluation(&self, resolved: &[SimulationSettings]) -> Result<()> {
        let eval = &self.evaluation;
        ensure(eval.horizon > 0, "evaluation.horizon must be > 0")?;
        ensure(eval.n_splits > 0, "evaluation.n_splits must be > 0")?;
        ensure(eval.stride > 0, "evaluation.stride must be > 0")?;
        ensure(eval.min_train >= 2, "evaluation.min_train must be >= 2")?;
        ensure(!eval.metrics.is_empty(), "evaluation.metrics must be non-empty")?;
        ensure_unique(eval.metrics.iter().map(|m| m.as_str()), "metric")?;

        let required = eval.required_length();
        for settings in resolved {
            ensure(
                settings.n_time_points >= required,
                format!(
                    "simulation '{}' has {} time points but the backtest needs {required}",
                    settings.name, settings.n_time_points
                ),
            )?;
        }
        Ok(())
    }
}

fn validate_settings(settings: &SimulationSettings) -> Result<()> {
    ensure(settings.n_time_points >= 2, "n_time_points must be >= 2")?;
    ensure(!settings.regions.is_empty(), "at least one region is required")?;
    ensure_unique(settings.regions.iter().map(|r| r.name.as_str()), "region")?;
    ensure_unique(settings.features.iter().map(|f| f.name.as_str()), "feature")?;

    let known: BTreeSet<&str> = settings.features.iter().map(|f| f.name.as_str()).collect();

    for region in &settings.regions {
        ensure(
            region.population.is_finite() && region.population > 0.0,
            format!("region '{}': population must be > 0", region.name),
        )?;
        for (feature, offset) in &region.offsets {
            ensure(
                known.contains(feature.as_str()),
                format!("region '{}': offset for unknown feature '{feature}'", region.name),
            )?;
            ensure(
                offset.is_finite(),
                format!("region '{}': offset for '{feature}' must be finite", region.name),
            )?;
        }
    }

    for feature in &settings.features {
        feature
            .generator
            .validate()
            .map_err(|err| invalid(format!("feature '{}': {err}", feature.name)))?;
        for (bound, value) in [("min", feature.min), ("max", feature.max)] {
            ensure(
                value.map_or(true, f64::is_finite),
                format!("feature '{}': {bound} must be finite", feature.name),
            )?;
        }
        if let (Some(min), Some(max)) = (feature.min, feature.max) {
            ensure(
                min <= max,
                format!("feature '{}': min must be <= max", feature.name),
            )?;
        }
    }

    let target = &settings.target;
    ensure(
        [
            target.intercept,
            target.seasonal_amplitude,
            target.seasonal_phase,
            target.autoregressive,
        ]
        .iter()
        .all(|v| v.is_finite()),
        "target parameters must be finite",
    )?;
    for effect in &target.effects {
        ensure(
            known.contains(effect.feature.as_str()),
            format!("target effect on unknown feature '{}'", effect.feature),
        )?;
        ensure(
            effect.coefficient.is_finite() && effect.center.is_finite(),
            format!("target effect on '{}' must be finite", effect.feature),
        )?;
    }
    if let CaseDistribution::NegativeBinomial { dispersion } = target.distribution {
        ensure(
            dispersion.is_finite() && dispersion > 0.0,
            "negative binomial dispersion must be > 0",
        )?;
    }
    Ok(())
}
