//! Normalised per-year files: daily lat/lon fields and their regridded
//! counterparts.

use std::path::{Path, PathBuf};

use chrono::{Datelike, NaiveDate};
use serde_json::json;
use tracing::debug;

use crate::config::GridProcessorConfig;
use crate::dataset::{Attributes, Dataset, Variable};
use crate::error::{GridProcessorError, Result};
use crate::format::{read_zarr, read_zarr_attributes, read_zarr_variable, write_dataset_atomic};
use crate::time::{self, CANONICAL_TIME_UNITS};

pub const TIME: &str = "time";
pub const LATITUDE: &str = "latitude";
pub const LONGITUDE: &str = "longitude";
pub const X: &str = "x";
pub const Y: &str = "y";

/// Attribute holding the id of a canonical file's content.
pub const REVISION_ATTR: &str = "revision";
/// Attribute naming the canonical revision a regridded file came from.
pub const SOURCE_REVISION_ATTR: &str = "source_revision";

const COORD_TOLERANCE: f64 = 1e-6;

/// A daily field on a rectilinear latitude/longitude grid.
///
/// `values` is row-major `[time, latitude, longitude]`.
#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalField {
    pub code: String,
    pub dates: Vec<NaiveDate>,
    pub latitude: Vec<f64>,
    pub longitude: Vec<f64>,
    pub values: Vec<f32>,
    pub units: Option<String>,
}

impl CanonicalField {
    pub fn new(
        code: impl Into<String>,
        dates: Vec<NaiveDate>,
        latitude: Vec<f64>,
        longitude: Vec<f64>,
        values: Vec<f32>,
    ) -> Result<Self> {
        let field = Self {
            code: code.into(),
            dates,
            latitude,
            longitude,
            values,
            units: None,
        };
        field.validate()?;
        Ok(field)
    }

    pub fn with_units(mut self, units: impl Into<String>) -> Self {
        self.units = Some(units.into());
        self
    }

    fn validate(&self) -> Result<()> {
        if self.latitude.is_empty() || self.longitude.is_empty() {
            return Err(GridProcessorError::schema(format!(
                "{}: empty latitude/longitude axis",
                self.code
            )));
        }
        let expected = self.dates.len() * self.grid_len();
        if self.values.len() != expected {
            return Err(GridProcessorError::schema(format!(
                "{}: expected {} values for {} days on a {}x{} grid, got {}",
                self.code,
                expected,
                self.dates.len(),
                self.latitude.len(),
                self.longitude.len(),
                self.values.len()
            )));
        }
        if self.dates.windows(2).any(|w| w[0] >= w[1]) {
            return Err(GridProcessorError::schema(format!(
                "{}: dates are not strictly increasing",
                self.code
            )));
        }
        Ok(())
    }

    /// Number of cells in one daily slice.
    pub fn grid_len(&self) -> usize {
        self.latitude.len() * self.longitude.len()
    }

    pub fn slice(&self, t: usize) -> &[f32] {
        let n = self.grid_len();
        &self.values[t * n..(t + 1) * n]
    }

    pub fn slices_mut(&mut self) -> std::slice::ChunksMut<'_, f32> {
        let n = self.grid_len();
        self.values.chunks_mut(n)
    }

    pub fn same_grid(&self, other: &CanonicalField) -> bool {
        axes_match(&self.latitude, &other.latitude) && axes_match(&self.longitude, &other.longitude)
    }

    /// Keep only the days for which `keep` returns true.
    pub fn retain_dates(&mut self, keep: impl Fn(&NaiveDate) -> bool) {
        let n = self.grid_len();
        let mut dates = Vec::new();
        let mut values = Vec::new();
        for (t, date) in self.dates.iter().enumerate() {
            if keep(date) {
                dates.push(*date);
                values.extend_from_slice(&self.values[t * n..(t + 1) * n]);
            }
        }
        self.dates = dates;
        self.values = values;
    }

    /// Split into one field per calendar year, in date order.
    pub fn split_by_year(self) -> Vec<(i32, CanonicalField)> {
        let mut years: Vec<i32> = self.dates.iter().map(|d| d.year()).collect();
        years.dedup();
        years
            .into_iter()
            .map(|year| {
                let mut part = self.clone();
                part.retain_dates(|d| d.year() == year);
                (year, part)
            })
            .collect()
    }

    /// Combine with a newer field for the same variable. The result holds
    /// the union of dates; where both have a date the newer values win.
    pub fn merge(self, newer: CanonicalField) -> Result<CanonicalField> {
        if self.code != newer.code {
            return Err(GridProcessorError::schema(format!(
                "cannot merge {} into {}",
                newer.code, self.code
            )));
        }
        if !self.same_grid(&newer) {
            return Err(GridProcessorError::schema(format!(
                "{}: new data is on a different grid ({}x{} vs {}x{})",
                self.code,
                newer.latitude.len(),
                newer.longitude.len(),
                self.latitude.len(),
                self.longitude.len()
            )));
        }

        let n = self.grid_len();
        let mut dates = Vec::with_capacity(self.dates.len() + newer.dates.len());
        let mut values = Vec::with_capacity(self.values.len() + newer.values.len());
        let (mut i, mut j) = (0, 0);
        while i < self.dates.len() || j < newer.dates.len() {
            let take_old = match (self.dates.get(i), newer.dates.get(j)) {
                (Some(a), Some(b)) if a < b => true,
                (Some(a), Some(b)) if a == b => {
                    // Same day in both, the older copy is superseded
                    i += 1;
                    false
                }
                (Some(_), None) => true,
                _ => false,
            };
            if take_old {
                dates.push(self.dates[i]);
                values.extend_from_slice(self.slice(i));
                i += 1;
            } else {
                dates.push(newer.dates[j]);
                values.extend_from_slice(&newer.values[j * n..(j + 1) * n]);
                j += 1;
            }
        }

        Ok(CanonicalField {
            code: self.code,
            dates,
            latitude: self.latitude,
            longitude: self.longitude,
            values,
            units: newer.units.or(self.units),
        })
    }

    fn to_dataset(&self, revision: &str) -> Result<Dataset> {
        let mut ds = Dataset::new();
        ds.insert(TIME, time_coordinate(&self.dates))?;
        ds.insert(
            LATITUDE,
            Variable::coordinate(LATITUDE, self.latitude.clone())
                .with_attr("units", "degrees_north")
                .with_attr("standard_name", "latitude"),
        )?;
        ds.insert(
            LONGITUDE,
            Variable::coordinate(LONGITUDE, self.longitude.clone())
                .with_attr("units", "degrees_east")
                .with_attr("standard_name", "longitude"),
        )?;

        let mut data = Variable::new(
            vec![TIME.into(), LATITUDE.into(), LONGITUDE.into()],
            vec![self.dates.len(), self.latitude.len(), self.longitude.len()],
            self.values.iter().map(|&v| v as f64).collect(),
        )?
        .with_attr(REVISION_ATTR, revision);
        if let Some(units) = &self.units {
            data = data.with_attr("units", units.as_str());
        }
        ds.insert(&self.code, data)?;
        Ok(ds)
    }

    fn from_dataset(ds: &Dataset) -> Result<(Self, Option<String>)> {
        let code = single_data_variable(ds)?;
        let data = ds
            .get(code)
            .ok_or_else(|| GridProcessorError::schema(format!("missing variable {}", code)))?
            .transpose(&[TIME, LATITUDE, LONGITUDE])?;

        let latitude = coordinate_values(ds, LATITUDE)?;
        let longitude = coordinate_values(ds, LONGITUDE)?;
        let dates = dates_from_axis(ds.get(TIME).ok_or_else(|| {
            GridProcessorError::schema(format!("{}: missing time coordinate", code))
        })?)?;

        let mut field = CanonicalField::new(
            code,
            dates,
            latitude,
            longitude,
            data.values.iter().map(|&v| v as f32).collect(),
        )?;
        field.units = data.attr_str("units").map(str::to_string);
        let revision = data.attr_str(REVISION_ATTR).map(str::to_string);
        Ok((field, revision))
    }
}

fn axes_match(a: &[f64], b: &[f64]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| (x - y).abs() <= COORD_TOLERANCE)
}

fn time_coordinate(dates: &[NaiveDate]) -> Variable {
    Variable::coordinate(TIME, dates.iter().map(|&d| time::date_to_days(d)).collect())
        .with_attr("units", CANONICAL_TIME_UNITS)
        .with_attr("calendar", "proleptic_gregorian")
}

fn dates_from_axis(variable: &Variable) -> Result<Vec<NaiveDate>> {
    let times = time::decode_axis(
        &variable.values,
        variable.attr_str("units"),
        variable.attr_str("calendar"),
    )?;
    Ok(times.into_iter().map(|t| t.date()).collect())
}

fn coordinate_values(ds: &Dataset, name: &str) -> Result<Vec<f64>> {
    if !ds.is_coordinate(name) {
        return Err(GridProcessorError::schema(format!("missing {} coordinate", name)));
    }
    Ok(ds.get(name).map(|v| v.values.clone()).unwrap_or_default())
}

fn single_data_variable(ds: &Dataset) -> Result<&str> {
    match ds.data_variables().as_slice() {
        [name] => Ok(*name),
        names => Err(GridProcessorError::schema(format!(
            "expected exactly one data variable, found {:?}",
            names
        ))),
    }
}

/// The days stored on the time axis of a canonical or regridded file.
pub fn read_dates(path: &Path) -> Result<Vec<NaiveDate>> {
    dates_from_axis(&read_zarr_variable(path, TIME)?)
}

/// A canonical field persisted at `path`.
#[derive(Debug, Clone)]
pub struct CanonicalFile {
    pub path: PathBuf,
    pub field: CanonicalField,
    pub revision: String,
}

impl CanonicalFile {
    /// Write `field` to `path` under a fresh revision id.
    pub fn write(path: &Path, field: CanonicalField, config: &GridProcessorConfig) -> Result<Self> {
        field.validate()?;
        let revision = uuid::Uuid::new_v4().to_string();
        write_dataset_atomic(&field.to_dataset(&revision)?, path, config)?;
        debug!(path = %path.display(), code = %field.code, days = field.dates.len(), "Wrote canonical file");
        Ok(Self {
            path: path.to_path_buf(),
            field,
            revision,
        })
    }

    pub fn open(path: &Path) -> Result<Self> {
        let (field, revision) = CanonicalField::from_dataset(&read_zarr(path)?)?;
        let revision = revision.ok_or_else(|| {
            GridProcessorError::schema(format!("{} has no {} attribute", path.display(), REVISION_ATTR))
        })?;
        Ok(Self {
            path: path.to_path_buf(),
            field,
            revision,
        })
    }

    /// Revision id of the file at `path`, read without loading the data.
    pub fn read_revision(path: &Path, code: &str) -> Result<String> {
        read_zarr_attributes(path, code)?
            .get(REVISION_ATTR)
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| {
                GridProcessorError::schema(format!("{} has no {} attribute", path.display(), REVISION_ATTR))
            })
    }

    /// Write `field`, merging it into the file already at `path` if any.
    pub fn write_merged(path: &Path, field: CanonicalField, config: &GridProcessorConfig) -> Result<Self> {
        let field = if path.exists() {
            let existing = Self::open(path)?;
            existing.field.merge(field)?
        } else {
            field
        };
        Self::write(path, field, config)
    }
}

/// A daily field on an EASE-Grid 2.0 grid. `values` is row-major
/// `[time, y, x]`.
#[derive(Debug, Clone, PartialEq)]
pub struct RegriddedField {
    pub code: String,
    pub dates: Vec<NaiveDate>,
    pub y: Vec<f64>,
    pub x: Vec<f64>,
    pub values: Vec<f32>,
    pub units: Option<String>,
}

impl RegriddedField {
    pub fn slice(&self, t: usize) -> &[f32] {
        let n = self.y.len() * self.x.len();
        &self.values[t * n..(t + 1) * n]
    }
}

/// A regridded field persisted at `path`, with the attributes identifying
/// how it was produced.
#[derive(Debug, Clone)]
pub struct RegriddedFile {
    pub path: PathBuf,
    pub field: RegriddedField,
    pub attrs: Attributes,
}

impl RegriddedFile {
    /// Write a regridded field. `fingerprint` and `source_revision` end up
    /// on the data variable; nothing time-dependent is stored.
    pub fn write(
        path: &Path,
        field: RegriddedField,
        fingerprint: Attributes,
        source_revision: &str,
        config: &GridProcessorConfig,
    ) -> Result<Self> {
        let mut attrs = fingerprint;
        attrs.insert(SOURCE_REVISION_ATTR.to_string(), json!(source_revision));
        if let Some(units) = &field.units {
            attrs.insert("units".to_string(), json!(units));
        }

        let mut ds = Dataset::new();
        ds.insert(TIME, time_coordinate(&field.dates))?;
        ds.insert(
            Y,
            Variable::coordinate(Y, field.y.clone())
                .with_attr("units", "m")
                .with_attr("standard_name", "projection_y_coordinate"),
        )?;
        ds.insert(
            X,
            Variable::coordinate(X, field.x.clone())
                .with_attr("units", "m")
                .with_attr("standard_name", "projection_x_coordinate"),
        )?;
        let mut data = Variable::new(
            vec![TIME.into(), Y.into(), X.into()],
            vec![field.dates.len(), field.y.len(), field.x.len()],
            field.values.iter().map(|&v| v as f64).collect(),
        )?;
        data.attrs = attrs.clone();
        ds.insert(&field.code, data)?;

        write_dataset_atomic(&ds, path, config)?;
        Ok(Self {
            path: path.to_path_buf(),
            field,
            attrs,
        })
    }

    pub fn open(path: &Path) -> Result<Self> {
        let ds = read_zarr(path)?;
        let code = single_data_variable(&ds)?.to_string();
        let data = ds
            .get(&code)
            .ok_or_else(|| GridProcessorError::schema(format!("missing variable {}", code)))?
            .transpose(&[TIME, Y, X])?;
        let dates = dates_from_axis(
            ds.get(TIME)
                .ok_or_else(|| GridProcessorError::schema("missing time coordinate"))?,
        )?;

        Ok(Self {
            path: path.to_path_buf(),
            field: RegriddedField {
                code,
                dates,
                y: coordinate_values(&ds, Y)?,
                x: coordinate_values(&ds, X)?,
                values: data.values.iter().map(|&v| v as f32).collect(),
                units: data.attr_str("units").map(str::to_string),
            },
            attrs: data.attrs.clone(),
        })
    }

    /// The data variable's attributes, read without loading the data.
    pub fn read_attrs(path: &Path, code: &str) -> Result<Attributes> {
        read_zarr_attributes(path, code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2020, 1, d).unwrap()
    }

    fn field(days: &[u32], fill: f32) -> CanonicalField {
        CanonicalField::new(
            "tas",
            days.iter().map(|&d| day(d)).collect(),
            vec![60.0, 50.0],
            vec![0.0, 10.0, 20.0],
            vec![fill; days.len() * 6],
        )
        .unwrap()
    }

    #[test]
    fn test_validation() {
        assert!(CanonicalField::new("tas", vec![day(1)], vec![1.0], vec![1.0], vec![]).is_err());
        assert!(CanonicalField::new("tas", vec![day(2), day(1)], vec![1.0], vec![1.0], vec![0.0, 0.0]).is_err());
        assert!(CanonicalField::new("tas", vec![], vec![], vec![1.0], vec![]).is_err());
    }

    #[test]
    fn test_merge_union_newer_wins() {
        let merged = field(&[1, 2, 4], 1.0).merge(field(&[2, 3], 2.0)).unwrap();
        assert_eq!(merged.dates, vec![day(1), day(2), day(3), day(4)]);
        assert_eq!(merged.slice(0)[0], 1.0);
        assert_eq!(merged.slice(1)[0], 2.0);
        assert_eq!(merged.slice(2)[0], 2.0);
        assert_eq!(merged.slice(3)[0], 1.0);
    }

    #[test]
    fn test_merge_rejects_other_grid() {
        let mut other = field(&[5], 1.0);
        other.latitude = vec![61.0, 50.0];
        assert!(matches!(
            field(&[1], 1.0).merge(other),
            Err(GridProcessorError::Schema(_))
        ));
    }

    #[test]
    fn test_retain_dates() {
        let mut f = field(&[1, 2, 3], 0.0);
        f.values[6] = 7.0;
        f.retain_dates(|d| *d != day(1));
        assert_eq!(f.dates, vec![day(2), day(3)]);
        assert_eq!(f.values[0], 7.0);
        assert_eq!(f.values.len(), 12);
    }

    #[test]
    fn test_split_by_year() {
        let mut f = field(&[1, 2], 0.0);
        f.dates[0] = NaiveDate::from_ymd_opt(2019, 12, 31).unwrap();
        let parts = f.split_by_year();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].0, 2019);
        assert_eq!(parts[1].1.dates, vec![day(2)]);
    }

    #[test]
    fn test_canonical_file_write_open_merge() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("latlon_2020.zarr");
        let config = GridProcessorConfig::default();

        let first = CanonicalFile::write(&path, field(&[1, 2], 1.0).with_units("K"), &config).unwrap();
        let reopened = CanonicalFile::open(&path).unwrap();
        assert_eq!(reopened.revision, first.revision);
        assert_eq!(reopened.field, first.field);
        assert_eq!(read_dates(&path).unwrap(), vec![day(1), day(2)]);

        let merged = CanonicalFile::write_merged(&path, field(&[3], 3.0), &config).unwrap();
        assert_ne!(merged.revision, first.revision);
        assert_eq!(read_dates(&path).unwrap(), vec![day(1), day(2), day(3)]);
        assert_eq!(CanonicalFile::open(&path).unwrap().field.units.as_deref(), Some("K"));
    }
}
