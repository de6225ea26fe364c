//! Normalisation of raw archive responses into canonical daily fields.
//!
//! Archive files differ in small ways: the time coordinate may be called
//! `valid_time`, single-level requests can come back with a unit-length
//! level axis, ensemble and experiment-version bookkeeping variables ride
//! along with the data. Everything is reduced to one variable on
//! `[time, latitude, longitude]` with one step per calendar day.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use chrono::{NaiveDate, NaiveDateTime};
use tracing::{debug, instrument};

use crate::canonical::{CanonicalField, CanonicalFile, LATITUDE, LONGITUDE, TIME};
use crate::config::GridProcessorConfig;
use crate::dataset::{Dataset, Variable};
use crate::error::{GridProcessorError, Result};
use crate::format::{read_dataset, read_zarr_variable, RawFormat};
use crate::time;

/// Names archives use for the valid-time coordinate, in preference order.
pub const TIME_NAMES: &[&str] = &["valid_time", "time"];
pub const LATITUDE_NAMES: &[&str] = &["latitude", "lat"];
pub const LONGITUDE_NAMES: &[&str] = &["longitude", "lon"];
/// Vertical axes that must collapse to a single level.
pub const LEVEL_DIMS: &[&str] = &["pressure_level", "level", "isobaricInhPa", "plev"];
/// Bookkeeping variables that are never the payload.
pub const DEFAULT_AUXILIARY: &[&str] = &["number", "expver"];

const ENSEMBLE_DIM: &str = "number";
const EXPVER_DIM: &str = "expver";

/// Turns raw archive datasets into [`CanonicalField`]s.
#[derive(Debug, Clone)]
pub struct Postprocessor {
    auxiliary: BTreeSet<String>,
}

impl Default for Postprocessor {
    fn default() -> Self {
        Self::new::<&str>(&[])
    }
}

impl Postprocessor {
    /// `extra_auxiliary` names product-specific variables to discard on top
    /// of [`DEFAULT_AUXILIARY`].
    pub fn new<S: AsRef<str>>(extra_auxiliary: &[S]) -> Self {
        let auxiliary = DEFAULT_AUXILIARY
            .iter()
            .map(|s| s.to_string())
            .chain(extra_auxiliary.iter().map(|s| s.as_ref().to_string()))
            .collect();
        Self { auxiliary }
    }

    pub fn auxiliary(&self) -> impl Iterator<Item = &str> {
        self.auxiliary.iter().map(String::as_str)
    }

    /// Read a raw file and normalise it, naming the result `code`.
    #[instrument(skip(self, raw_path), fields(path = %raw_path.display()))]
    pub fn normalize(&self, raw_path: &Path, code: &str) -> Result<CanonicalField> {
        let dataset = read_dataset(raw_path)?;
        self.normalize_dataset(dataset, code)
    }

    /// Normalise a raw file and merge it into per-year canonical files.
    ///
    /// When `dates` is given only those days are kept. `dest_for_year`
    /// names the canonical file for each calendar year present.
    pub fn normalize_into(
        &self,
        raw_path: &Path,
        code: &str,
        dates: Option<&[NaiveDate]>,
        dest_for_year: impl Fn(i32) -> PathBuf,
        config: &GridProcessorConfig,
    ) -> Result<Vec<CanonicalFile>> {
        let mut field = self.normalize(raw_path, code)?;
        if let Some(dates) = dates {
            let wanted: BTreeSet<NaiveDate> = dates.iter().copied().collect();
            field.retain_dates(|d| wanted.contains(d));
        }
        if field.dates.is_empty() {
            return Err(GridProcessorError::schema(format!(
                "{}: no requested dates in {}",
                code,
                raw_path.display()
            )));
        }

        field
            .split_by_year()
            .into_iter()
            .map(|(year, part)| CanonicalFile::write_merged(&dest_for_year(year), part, config))
            .collect()
    }

    pub fn normalize_dataset(&self, mut ds: Dataset, code: &str) -> Result<CanonicalField> {
        rename_time(&mut ds)?;
        rename_first(&mut ds, LATITUDE_NAMES, LATITUDE)?;
        rename_first(&mut ds, LONGITUDE_NAMES, LONGITUDE)?;

        for dim in LEVEL_DIMS.iter().chain(&[ENSEMBLE_DIM]) {
            ds.squeeze(dim)?;
        }

        let auxiliary: Vec<&str> = self.auxiliary().collect();
        let mut data = take_data_variable(&mut ds, &auxiliary)?;

        if data.axis(EXPVER_DIM).is_some() {
            data = collapse_first_valid(&data, EXPVER_DIM)?;
        }

        let unexpected: Vec<&String> = data
            .dims
            .iter()
            .filter(|d| ![TIME, LATITUDE, LONGITUDE].contains(&d.as_str()))
            .collect();
        if !unexpected.is_empty() || data.ndim() != 3 {
            return Err(GridProcessorError::schema(format!(
                "expected dimensions (time, latitude, longitude), found {:?}",
                data.dims
            )));
        }
        let data = data.transpose(&[TIME, LATITUDE, LONGITUDE])?;

        let latitude = rectilinear_axis(&ds, LATITUDE)?;
        let longitude = rectilinear_axis(&ds, LONGITUDE)?;
        let time_var = ds
            .get(TIME)
            .ok_or_else(|| GridProcessorError::schema("missing time coordinate"))?;
        let times = time::decode_axis(
            &time_var.values,
            time_var.attr_str("units"),
            time_var.attr_str("calendar"),
        )?;
        if times.is_empty() {
            return Err(GridProcessorError::schema("empty time axis"));
        }

        let (dates, values) = daily_mean(&times, &data.values, latitude.len() * longitude.len());
        debug!(
            code,
            samples = times.len(),
            days = dates.len(),
            "Resampled to daily means"
        );

        let mut field = CanonicalField::new(code, dates, latitude, longitude, values)?;
        field.units = data.attr_str("units").map(str::to_string);
        Ok(field)
    }
}

/// Calendar days covered by the time axis of a raw archive file.
///
/// Zarr stores are read one coordinate at a time; other formats are read
/// whole.
pub fn raw_dates(path: &Path) -> Result<BTreeSet<NaiveDate>> {
    let mut time_var = match RawFormat::from_path(path) {
        Some(RawFormat::Zarr) => TIME_NAMES
            .iter()
            .find_map(|name| read_zarr_variable(path, name).ok())
            .ok_or_else(|| {
                GridProcessorError::schema(format!("{}: no time coordinate", path.display()))
            })?,
        _ => {
            let mut ds = read_dataset(path)?;
            rename_time(&mut ds)?;
            ds.get(TIME)
                .cloned()
                .ok_or_else(|| GridProcessorError::schema("missing time coordinate"))?
        }
    };
    time_var.decode_cf();

    let times = time::decode_axis(
        &time_var.values,
        time_var.attr_str("units"),
        time_var.attr_str("calendar"),
    )?;
    Ok(times.iter().map(|t| t.date()).collect())
}

fn rename_time(ds: &mut Dataset) -> Result<()> {
    let dims = ds.dims();
    let present = |ds: &Dataset, name: &str| ds.contains(name) || dims.contains_key(name);

    if present(ds, "valid_time") {
        if present(ds, TIME) {
            if dims.contains_key(TIME) {
                return Err(GridProcessorError::schema(
                    "both valid_time and time are dimensions",
                ));
            }
            // Forecast reference time, superseded by valid_time
            ds.drop_vars(&[TIME]);
        }
        ds.rename("valid_time", TIME)
    } else if present(ds, TIME) {
        Ok(())
    } else {
        Err(GridProcessorError::schema(format!(
            "no time coordinate (looked for {:?})",
            TIME_NAMES
        )))
    }
}

fn rename_first(ds: &mut Dataset, candidates: &[&str], to: &str) -> Result<()> {
    match candidates.iter().find(|name| ds.contains(name)) {
        Some(from) => ds.rename(from, to),
        None => Err(GridProcessorError::schema(format!(
            "no {} coordinate (looked for {:?})",
            to, candidates
        ))),
    }
}

/// Remove the auxiliary variables and return the single remaining data
/// variable. Zero or several candidates is an error rather than a guess.
fn take_data_variable(ds: &mut Dataset, auxiliary: &[&str]) -> Result<Variable> {
    let candidates: Vec<String> = ds
        .data_variables()
        .into_iter()
        .filter(|name| !auxiliary.contains(name))
        .map(str::to_string)
        .collect();

    match candidates.as_slice() {
        [name] => {
            ds.drop_vars(auxiliary);
            ds.variables
                .remove(name)
                .ok_or_else(|| GridProcessorError::schema(format!("missing variable {}", name)))
        }
        [] => Err(GridProcessorError::schema("no data variable left after removing auxiliaries")),
        many => Err(GridProcessorError::schema(format!(
            "ambiguous archive response, candidate data variables {:?}",
            many
        ))),
    }
}

fn rectilinear_axis(ds: &Dataset, name: &str) -> Result<Vec<f64>> {
    let var = ds
        .get(name)
        .ok_or_else(|| GridProcessorError::schema(format!("missing {} coordinate", name)))?;
    if !ds.is_coordinate(name) {
        return Err(GridProcessorError::schema(format!(
            "{} has dimensions {:?}; only rectilinear grids are supported",
            name, var.dims
        )));
    }
    Ok(var.values.clone())
}

/// Collapse `dim` by taking, at each position, the first finite value along
/// it. Archives use this layout to splice preliminary data onto final data.
fn collapse_first_valid(var: &Variable, dim: &str) -> Result<Variable> {
    let rest: Vec<&str> = var
        .dims
        .iter()
        .map(String::as_str)
        .filter(|d| *d != dim)
        .collect();
    let mut order = vec![dim];
    order.extend(&rest);
    let t = var.transpose(&order)?;

    let layers = t.shape[0];
    let n: usize = t.shape[1..].iter().product();
    let mut values = vec![f64::NAN; n];
    for layer in 0..layers {
        for (i, v) in t.values[layer * n..(layer + 1) * n].iter().enumerate() {
            if values[i].is_nan() && v.is_finite() {
                values[i] = *v;
            }
        }
    }

    let mut collapsed = Variable::new(
        rest.iter().map(|d| d.to_string()).collect(),
        t.shape[1..].to_vec(),
        values,
    )?;
    collapsed.attrs = var.attrs.clone();
    Ok(collapsed)
}

/// Average `values` (time-major, `n` cells per step) into calendar days.
/// Missing samples are skipped; a cell with no finite sample in a day is
/// NaN.
fn daily_mean(times: &[NaiveDateTime], values: &[f64], n: usize) -> (Vec<NaiveDate>, Vec<f32>) {
    let mut by_day: BTreeMap<NaiveDate, Vec<usize>> = BTreeMap::new();
    for (t, time) in times.iter().enumerate() {
        by_day.entry(time.date()).or_default().push(t);
    }

    let mut dates = Vec::with_capacity(by_day.len());
    let mut out = Vec::with_capacity(by_day.len() * n);
    let mut sums = vec![0f64; n];
    let mut counts = vec![0u32; n];

    for (date, steps) in by_day {
        sums.iter_mut().for_each(|s| *s = 0.0);
        counts.iter_mut().for_each(|c| *c = 0);

        for t in steps {
            for (i, v) in values[t * n..(t + 1) * n].iter().enumerate() {
                if v.is_finite() {
                    sums[i] += v;
                    counts[i] += 1;
                }
            }
        }

        dates.push(date);
        out.extend(sums.iter().zip(&counts).map(|(s, &c)| {
            if c == 0 {
                f32::NAN
            } else {
                (s / c as f64) as f32
            }
        }));
    }

    (dates, out)
}
