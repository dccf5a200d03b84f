//! Holt linear smoothing
//!
//! Level/trend observer run over the case history with a predict/correct
//! step per observation.

use crate::models::{clean_forecast, not_fitted, require_history, ForecastModel, SeriesView};
use crate::Result;

/// Smoothed level and trend after the last observation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HoltState {
    pub level: f64,
    pub trend: f64,
}

pub struct HoltModel {
    name: String,
    /// Level gain
    alpha: f64,
    /// Trend gain, relative to the level gain
    beta: f64,
    state: Option<HoltState>,
}

impl HoltModel {
    pub fn new(name: String, alpha: f64, beta: f64) -> Self {
        Self {
            name,
            alpha,
            beta,
            state: None,
        }
    }

    /// Run the smoother over `history`
    ///
    /// # Arguments
    /// * `history` - Observed counts, oldest first
    ///
    /// # Returns
    /// The state after the last observation, or `None` for an empty history
    pub fn smooth(&self, history: &[f64]) -> Option<HoltState> {
        let (&first, rest) = history.split_first()?;
        let mut state = HoltState {
            level: first,
            trend: 0.0,
        };

        for &y in rest {
            // Predict
            let pred = state.level + state.trend;
            // Residual r = y - pred
            let residual = y - pred;
            // Correct
            state.level = pred + self.alpha * residual;
            state.trend += self.alpha * self.beta * residual;
        }
        Some(state)
    }

    pub fn state(&self) -> Option<HoltState> {
        self.state
    }
}

impl ForecastModel for HoltModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn fit(&mut self, view: &SeriesView<'_>) -> Result<()> {
        require_history(&self.name, view, 2)?;
        self.state = self.smooth(view.history());
        Ok(())
    }

    fn predict(&self, _view: &SeriesView<'_>, horizon: usize) -> Result<Vec<f64>> {
        let state = self.state.ok_or_else(|| not_fitted(&self.name))?;
        Ok((1..=horizon)
            .map(|k| clean_forecast(state.level + k as f64 * state.trend))
            .collect())
    }
}
