//! Driver: load a DSL, simulate once, evaluate the result once.

use std::path::{Path, PathBuf};

use crate::dsl::Dsl;
use crate::evaluate::{evaluate, EvaluationReport};
use crate::sim::{simulate_all, Simulations};
use crate::Result;

/// The two stages of a run.
pub trait Pipeline {
    type Output;
    type Report;

    fn simulate(&mut self) -> Result<Self::Output>;
    fn evaluate(&mut self, sims: &Self::Output) -> Result<Self::Report>;
}

/// Simulate once, then evaluate exactly that output once.
pub fn drive<P: Pipeline>(pipeline: &mut P) -> Result<(P::Output, P::Report)> {
    let sims = pipeline.simulate()?;
    let report = pipeline.evaluate(&sims)?;
    Ok((sims, report))
}

#[derive(Debug, Clone)]
pub struct MestDs {
    dsl: Dsl,
    source: Option<PathBuf>,
}

impl MestDs {
    /// Load and validate the DSL at `path`.
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let dsl = Dsl::from_path(path)?;
        Ok(Self {
            dsl,
            source: Some(path.to_path_buf()),
        })
    }

    pub fn from_dsl(dsl: Dsl) -> Result<Self> {
        dsl.validate()?;
        Ok(Self { dsl, source: None })
    }

    /// Replace the base seed. Variants with an explicit seed keep it.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.dsl.seed = seed;
        self
    }

    pub fn dsl(&self) -> &Dsl {
        &self.dsl
    }

    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    pub fn simulate(&self) -> Result<Simulations> {
        simulate_all(&self.dsl)
    }

    pub fn evaluate(&self, sims: &Simulations) -> Result<EvaluationReport> {
        evaluate(&self.dsl, sims)
    }
}

impl Pipeline for MestDs {
    type Output = Simulations;
    type Report = EvaluationReport;

    fn simulate(&mut self) -> Result<Simulations> {
        MestDs::simulate(self)
    }

    fn evaluate(&mut self, sims: &Simulations) -> Result<EvaluationReport> {
        MestDs::evaluate(self, sims)
    }
}

/// Construct from `path` and drive the full sequence.
pub fn run(path: impl AsRef<Path>) -> Result<(MestDs, Simulations, EvaluationReport)> {
    let mut mest = MestDs::new(path)?;
    let (sims, report) = drive(&mut mest)?;
    Ok((mest, sims, report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MestError;

    const DSL: &str = r#"
n_time_points: 36
regions: [{ name: coast, population: 200000 }]
models: [{ name: naive, kind: naive }]
"#;

    #[test]
    fn seed_override_changes_the_simulation() {
        let dsl = Dsl::from_yaml_str(DSL).unwrap();
        let a = MestDs::from_dsl(dsl.clone()).unwrap().simulate().unwrap();
        let b = MestDs::from_dsl(dsl.clone()).unwrap().simulate().unwrap();
        let c = MestDs::from_dsl(dsl).unwrap().with_seed(99).simulate().unwrap();

        assert_eq!(a.datasets[0].regions[0].cases, b.datasets[0].regions[0].cases);
        assert_ne!(a.datasets[0].regions[0].cases, c.datasets[0].regions[0].cases);
    }

    #[test]
    fn seed_override_keeps_explicit_variant_seeds() {
        let raw = format!("{DSL}simulations: [{{ name: fixed, seed: 5 }}, {{ name: derived }}]\n");
        let dsl = Dsl::from_yaml_str(&raw).unwrap();
        let before = MestDs::from_dsl(dsl.clone()).unwrap().simulate().unwrap();
        let after = MestDs::from_dsl(dsl).unwrap().with_seed(99).simulate().unwrap();

        assert_eq!(before.datasets[0].name, "fixed");
        assert_eq!(before.datasets[0].seed, 5);
        assert_eq!(after.datasets[0].seed, 5);
        assert_eq!(before.datasets[0], after.datasets[0]);

        assert_eq!(after.datasets[1].name, "derived");
        assert_ne!(before.datasets[1].seed, after.datasets[1].seed);
        assert_ne!(
            before.datasets[1].regions[0].cases,
            after.datasets[1].regions[0].cases
        );
    }

    #[test]
    fn drive_returns_simulations_and_report() {
        let mut mest = MestDs::from_dsl(Dsl::from_yaml_str(DSL).unwrap()).unwrap();
        assert!(mest.source().is_none());
        let (sims, report) = drive(&mut mest).unwrap();
        assert_eq!(sims.len(), 1);
        assert_eq!(report.best_model("baseline"), Some("naive"));
    }

    #[test]
    fn from_dsl_revalidates() {
        let mut dsl = Dsl::from_yaml_str(DSL).unwrap();
        dsl.models.clear();
        assert!(matches!(MestDs::from_dsl(dsl), Err(MestError::InvalidDsl(_))));
    }
}
