//! Baseline models that only look at the case history.

use crate::models::{clean_forecast, not_fitted, require_history, ForecastModel, SeriesView};
use crate::Result;

/// Repeats the last observation.
pub struct NaiveModel {
    name: String,
    last: Option<f64>,
}

impl NaiveModel {
    pub fn new(name: String) -> Self {
        Self { name, last: None }
    }
}

impl ForecastModel for NaiveModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn fit(&mut self, view: &SeriesView<'_>) -> Result<()> {
        require_history(&self.name, view, 1)?;
        self.last = view.last();
        Ok(())
    }

    fn predict(&self, _view: &SeriesView<'_>, horizon: usize) -> Result<Vec<f64>> {
        let last = self.last.ok_or_else(|| not_fitted(&self.name))?;
        Ok(vec![clean_forecast(last); horizon])
    }
}

/// Repeats the value observed one season earlier.
pub struct SeasonalNaiveModel {
    name: String,
    period: Option<usize>,
    season: Vec<f64>,
}

impl SeasonalNaiveModel {
    /// `period` defaults to one year of the view's granularity.
    pub fn new(name: String, period: Option<usize>) -> Self {
        Self {
            name,
            period,
            season: Vec::new(),
        }
    }
}

impl ForecastModel for SeasonalNaiveModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn fit(&mut self, view: &SeriesView<'_>) -> Result<()> {
        require_history(&self.name, view, 1)?;
        let history = view.history();
        let period = self.period.unwrap_or_else(|| view.periods_per_year()).max(1);

        // Shorter history than one season degrades to the naive forecast
        self.season = if history.len() >= period {
            history[history.len() - period..].to_vec()
        } else {
            vec![history[history.len() - 1]]
        };
        Ok(())
    }

    fn predict(&self, _view: &SeriesView<'_>, horizon: usize) -> Result<Vec<f64>> {
        if self.season.is_empty() {
            return Err(not_fitted(&self.name));
        }
        Ok((0..horizon)
            .map(|k| clean_forecast(self.season[k % self.season.len()]))
            .collect())
    }
}

/// Mean of the trailing window, or of the whole history.
pub struct HistoricalMeanModel {
    name: String,
    window: Option<usize>,
    mean: Option<f64>,
}

impl HistoricalMeanModel {
    pub fn new(name: String, window: Option<usize>) -> Self {
        Self {
            name,
            window,
            mean: None,
        }
    }
}

impl ForecastModel for HistoricalMeanModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn fit(&mut self, view: &SeriesView<'_>) -> Result<()> {
        require_history(&self.name, view, 1)?;
        let history = view.history();
        let window = self.window.unwrap_or(history.len()).clamp(1, history.len());
        let tail = &history[history.len() - window..];
        self.mean = Some(tail.iter().sum::<f64>() / tail.len() as f64);
        Ok(())
    }

    fn predict(&self, _view: &SeriesView<'_>, horizon: usize) -> Result<Vec<f64>> {
        let mean = self.mean.ok_or_else(|| not_fitted(&self.name))?;
        Ok(vec![clean_forecast(mean); horizon])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MestError;
    use std::collections::BTreeMap;

    const HISTORY: [f64; 8] = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0];

    fn fit_predict(model: &mut dyn ForecastModel, history: &[f64], horizon: usize) -> Vec<f64> {
        let features = BTreeMap::new();
        let view = SeriesView::new(history, &features, 4);
        model.fit(&view).unwrap();
        model.predict(&view, horizon).unwrap()
    }

    #[test]
    fn naive_repeats_last_value() {
        let mut model = NaiveModel::new("naive".into());
        assert_eq!(fit_predict(&mut model, &HISTORY, 3), vec![8.0, 8.0, 8.0]);
    }

    #[test]
    fn seasonal_naive_repeats_the_last_season() {
        let mut model = SeasonalNaiveModel::new("sn".into(), None);
        assert_eq!(
            fit_predict(&mut model, &HISTORY, 6),
            vec![5.0, 6.0, 7.0, 8.0, 5.0, 6.0]
        );

        let mut short = SeasonalNaiveModel::new("sn".into(), Some(12));
        assert_eq!(fit_predict(&mut short, &HISTORY, 2), vec![8.0, 8.0]);
    }

    #[test]
    fn historical_mean_uses_window() {
        let mut windowed = HistoricalMeanModel::new("m".into(), Some(2));
        assert_eq!(fit_predict(&mut windowed, &HISTORY, 1), vec![7.5]);

        let mut full = HistoricalMeanModel::new("m".into(), None);
        assert_eq!(fit_predict(&mut full, &HISTORY, 1), vec![4.5]);
    }

    #[test]
    fn empty_history_is_insufficient() {
        let features = BTreeMap::new();
        let view = SeriesView::new(&[], &features, 12);
        let mut model = NaiveModel::new("naive".into());
        assert!(matches!(
            model.fit(&view),
            Err(MestError::InsufficientData { needed: 1, got: 0, .. })
        ));
    }

    #[test]
    fn predict_before_fit_fails() {
        let features = BTreeMap::new();
        let view = SeriesView::new(&HISTORY, &features, 12);
        let model = HistoricalMeanModel::new("m".into(), None);
        assert!(model.predict(&view, 1).is_err());
    }
}
