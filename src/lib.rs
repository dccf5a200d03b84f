//! mestDS - simulated climate-health datasets and model evaluation
//!
//! A YAML DSL describes regions, climate covariates and a disease case
//! process. [`MestDs::simulate`] turns it into seeded synthetic datasets and
//! [`MestDs::evaluate`] backtests the forecasting models the DSL names on
//! those datasets.

pub mod driver;
pub mod dsl;
pub mod evaluate;
pub mod features;
pub mod io;
pub mod metrics;
pub mod models;
pub mod sim;

use std::path::PathBuf;

use thiserror::Error;

// Re-export main types
pub use driver::{drive, run, MestDs, Pipeline};
pub use dsl::{Dsl, ModelKind, ModelSpec, SimulationSettings, TimeGranularity};
pub use evaluate::{evaluate, EvaluationReport, ForecastRecord, ModelScore, Ranking};
pub use metrics::{Metric, MetricsAccumulator};
pub use models::{build_model, ForecastModel, SeriesView};
pub use sim::{simulate_all, simulate_dataset, RegionSeries, SimulatedDataset, Simulations};

#[derive(Debug, Error)]
pub enum MestError {
    #[error("failed to read DSL file {path}: {source}")]
    ReadDsl {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse DSL {origin}: {source}")]
    ParseDsl {
        origin: String,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("invalid DSL: {0}")]
    InvalidDsl(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("{context}: needs at least {needed} observations, got {got}")]
    InsufficientData {
        context: String,
        needed: usize,
        got: usize,
    },
    #[error("{context} length mismatch: expected {expected}, got {got}")]
    LengthMismatch {
        context: &'static str,
        expected: usize,
        got: usize,
    },
    #[error("invalid distribution parameters: {0}")]
    Distribution(String),
}

pub type Result<T, E = MestError> = std::result::Result<T, E>;
