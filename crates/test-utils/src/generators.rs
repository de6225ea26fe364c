//! Synthetic raw archive responses.
//!
//! The generated datasets look like what the reanalysis archive returns
//! for a one-variable request: hourly steps on a `valid_time` axis, a
//! scalar ensemble `number`, an `expver` tag along time and, for
//! pressure-level requests, a unit-length `pressure_level` axis.
//!
//! Values follow [`hourly_value`], so daily means are known in closed form
//! (see [`expected_daily_mean`]).

use std::path::Path;

use chrono::{Datelike, NaiveDate, NaiveTime};
use grid_processor::format::write_zarr;
use grid_processor::{Dataset, GridProcessorConfig, Result, Variable};

/// Description of a synthetic raw file.
#[derive(Debug, Clone)]
pub struct RawSpec {
    /// Name of the data variable as the archive would call it.
    pub variable: String,
    pub dates: Vec<NaiveDate>,
    pub steps_per_day: u32,
    pub latitude: Vec<f64>,
    pub longitude: Vec<f64>,
    /// Adds a unit-length `pressure_level` axis.
    pub level: Option<f64>,
    /// Adds `number` and `expver` bookkeeping variables.
    pub with_auxiliaries: bool,
    /// Writes the time steps newest-first.
    pub reverse_time: bool,
    pub units: String,
}

impl RawSpec {
    pub fn new(variable: &str, dates: Vec<NaiveDate>, latitude: Vec<f64>, longitude: Vec<f64>) -> Self {
        Self {
            variable: variable.to_string(),
            dates,
            steps_per_day: 24,
            latitude,
            longitude,
            level: None,
            with_auxiliaries: true,
            reverse_time: false,
            units: "K".to_string(),
        }
    }

    pub fn with_level(mut self, level: f64) -> Self {
        self.level = Some(level);
        self
    }

    pub fn with_steps_per_day(mut self, steps: u32) -> Self {
        self.steps_per_day = steps.max(1);
        self
    }

    pub fn reversed(mut self) -> Self {
        self.reverse_time = true;
        self
    }

    pub fn without_auxiliaries(mut self) -> Self {
        self.with_auxiliaries = false;
        self
    }
}

/// Value at a grid point for step `step` of day `date`.
pub fn hourly_value(date: NaiveDate, step: u32, lat: f64, lon: f64) -> f64 {
    let day = date.ordinal() as f64;
    250.0 + 0.2 * lat + 0.01 * lon + 0.1 * day + step as f64
}

/// Mean of [`hourly_value`] over the `steps` samples of `date`.
pub fn expected_daily_mean(date: NaiveDate, steps: u32, lat: f64, lon: f64) -> f64 {
    hourly_value(date, 0, lat, lon) + (steps.saturating_sub(1)) as f64 / 2.0
}

/// Build the dataset described by `spec`.
pub fn synthetic_raw_dataset(spec: &RawSpec) -> Result<Dataset> {
    let step_hours = 24.0 / spec.steps_per_day as f64;
    let epoch = NaiveDate::from_ymd_opt(1970, 1, 1)
        .unwrap_or_default()
        .and_time(NaiveTime::MIN);

    let mut samples: Vec<(f64, NaiveDate, u32)> = Vec::new();
    for &date in &spec.dates {
        let midnight = date.and_time(NaiveTime::MIN);
        let base_hours = (midnight - epoch).num_hours() as f64;
        for step in 0..spec.steps_per_day {
            samples.push((base_hours + step as f64 * step_hours, date, step));
        }
    }
    if spec.reverse_time {
        samples.reverse();
    }

    let mut values = Vec::with_capacity(samples.len() * spec.latitude.len() * spec.longitude.len());
    for &(_, date, step) in &samples {
        for &lat in &spec.latitude {
            for &lon in &spec.longitude {
                values.push(hourly_value(date, step, lat, lon));
            }
        }
    }

    let mut ds = Dataset::new();
    ds.attrs.insert(
        "Conventions".to_string(),
        serde_json::json!("CF-1.7"),
    );
    ds.insert(
        "valid_time",
        Variable::coordinate("valid_time", samples.iter().map(|s| s.0).collect())
            .with_attr("units", "hours since 1970-01-01")
            .with_attr("calendar", "proleptic_gregorian"),
    )?;
    ds.insert("latitude", Variable::coordinate("latitude", spec.latitude.clone()))?;
    ds.insert("longitude", Variable::coordinate("longitude", spec.longitude.clone()))?;

    let mut dims = vec!["valid_time".to_string(), "latitude".to_string(), "longitude".to_string()];
    let mut shape = vec![samples.len(), spec.latitude.len(), spec.longitude.len()];
    if let Some(level) = spec.level {
        ds.insert("pressure_level", Variable::coordinate("pressure_level", vec![level]))?;
        dims.insert(1, "pressure_level".to_string());
        shape.insert(1, 1);
    }
    ds.insert(
        &spec.variable,
        Variable::new(dims, shape, values)?.with_attr("units", spec.units.as_str()),
    )?;

    if spec.with_auxiliaries {
        ds.insert(
            "expver",
            Variable::new(
                vec!["valid_time".to_string()],
                vec![samples.len()],
                vec![1.0; samples.len()],
            )?,
        )?;
        ds.insert("number", Variable::new(vec![], vec![], vec![0.0])?)?;
    }

    Ok(ds)
}

/// Write the dataset described by `spec` as a Zarr store at `path`.
pub fn write_raw_zarr(spec: &RawSpec, path: &Path) -> Result<()> {
    let ds = synthetic_raw_dataset(spec)?;
    write_zarr(&ds, path, &GridProcessorConfig::default())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> RawSpec {
        RawSpec::new(
            "t2m",
            vec![NaiveDate::from_ymd_opt(2020, 1, 1).unwrap(), NaiveDate::from_ymd_opt(2020, 1, 2).unwrap()],
            vec![80.0, 70.0],
            vec![0.0, 10.0, 20.0],
        )
    }

    #[test]
    fn test_dataset_layout() {
        let ds = synthetic_raw_dataset(&spec().with_level(500.0)).unwrap();
        let data = ds.get("t2m").unwrap();
        assert_eq!(data.shape, vec![48, 1, 2, 3]);
        assert!(ds.contains("expver"));
        assert!(ds.contains("number"));
        assert_eq!(ds.get("valid_time").unwrap().values[1] - ds.get("valid_time").unwrap().values[0], 1.0);
    }

    #[test]
    fn test_expected_mean_matches_samples() {
        let s = spec().with_steps_per_day(4);
        let date = s.dates[0];
        let mean: f64 = (0..4).map(|k| hourly_value(date, k, 70.0, 10.0)).sum::<f64>() / 4.0;
        assert!((mean - expected_daily_mean(date, 4, 70.0, 10.0)).abs() < 1e-12);
    }

    #[test]
    fn test_reverse_time() {
        let ds = synthetic_raw_dataset(&spec().reversed()).unwrap();
        let time = &ds.get("valid_time").unwrap().values;
        assert!(time[0] > time[time.len() - 1]);
    }
}
