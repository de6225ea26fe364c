//! Regridding of canonical lat/lon fields onto EASE-Grid 2.0.

pub mod interpolation;
pub mod policy;

use std::path::Path;

use projection::EaseGrid;
use rayon::prelude::*;
use tracing::{debug, info, instrument};

use crate::canonical::{CanonicalField, CanonicalFile, RegriddedField, RegriddedFile, SOURCE_REVISION_ATTR};
use crate::config::GridProcessorConfig;
use crate::dataset::Attributes;
use crate::error::{GridProcessorError, Result};
use crate::types::{GridConfig, RegridMethod};

pub use interpolation::{bilinear_weights, nearest_index, Axis, NanPolicy, Stencil};
pub use policy::{base_code, DefaultPolicy, RegridPolicy};

/// Regrids fields onto one destination grid.
#[derive(Debug, Clone)]
pub struct Regridder {
    grid: GridConfig,
    ease: EaseGrid,
    config: GridProcessorConfig,
}

impl Regridder {
    pub fn new(grid: GridConfig, config: GridProcessorConfig) -> Result<Self> {
        config.validate()?;
        let ease = grid.ease_grid()?;
        Ok(Self { grid, ease, config })
    }

    pub fn grid(&self) -> &GridConfig {
        &self.grid
    }

    /// Attributes a current output for (`method`, `source_revision`) carries.
    pub fn expected_attrs(&self, method: RegridMethod, source_revision: &str) -> Attributes {
        let mut attrs = self.grid.fingerprint(method);
        attrs.insert(
            SOURCE_REVISION_ATTR.to_string(),
            serde_json::json!(source_revision),
        );
        attrs
    }

    /// Whether `dest` already holds the output this regridder would write
    /// for `canonical`.
    pub fn is_current(&self, dest: &Path, canonical: &CanonicalFile, policy: &dyn RegridPolicy) -> bool {
        self.is_current_revision(dest, &canonical.field.code, &canonical.revision, policy)
    }

    /// Like [`Regridder::is_current`], given only the variable code and
    /// revision of the canonical file.
    pub fn is_current_revision(
        &self,
        dest: &Path,
        code: &str,
        source_revision: &str,
        policy: &dyn RegridPolicy,
    ) -> bool {
        if !dest.exists() {
            return false;
        }
        let expected = self.expected_attrs(policy.method(code), source_revision);
        match RegriddedFile::read_attrs(dest, code) {
            Ok(attrs) => expected.iter().all(|(k, v)| attrs.get(k) == Some(v)),
            Err(e) => {
                debug!(path = %dest.display(), error = %e, "Existing output unreadable");
                false
            }
        }
    }

    /// Regrid a canonical file and write the result to `dest`.
    #[instrument(skip_all, fields(code = %canonical.field.code, dest = %dest.display()))]
    pub fn regrid(
        &self,
        canonical: &CanonicalFile,
        policy: &dyn RegridPolicy,
        dest: &Path,
    ) -> Result<RegriddedFile> {
        let method = policy.method(&canonical.field.code);
        let mut field = canonical.field.clone();
        policy.adjust(&mut field)?;

        let regridded = self.regrid_field(&field, method)?;
        let file = RegriddedFile::write(
            dest,
            regridded,
            self.grid.fingerprint(method),
            &canonical.revision,
            &self.config,
        )?;

        info!(method = %method, days = field.dates.len(), "Regridded");
        Ok(file)
    }

    /// Regrid every day of `field` with `method`.
    pub fn regrid_field(&self, field: &CanonicalField, method: RegridMethod) -> Result<RegriddedField> {
        let (lat, lon) = self.source_axes(field)?;
        let stencil = self.build_stencil(&lat, &lon, method);

        let n_src = field.grid_len();
        let slices: Vec<Vec<f32>> = field
            .values
            .par_chunks(n_src)
            .map(|slice| stencil.apply(slice))
            .collect();

        Ok(RegriddedField {
            code: field.code.clone(),
            dates: field.dates.clone(),
            y: self.ease.y_coords(),
            x: self.ease.x_coords(),
            values: slices.concat(),
            units: field.units.clone(),
        })
    }

    /// Source axes, after checking they reach the whole requested region.
    fn source_axes(&self, field: &CanonicalField) -> Result<(Axis, Axis)> {
        let lat = Axis::new(&field.latitude)?;
        let lon = Axis::longitude(&field.longitude)?;
        let bbox = self.grid.region.bbox();

        if !lat.covers(bbox.min_lat, bbox.max_lat) {
            let (lo, hi) = lat.bounds();
            return Err(GridProcessorError::grid(format!(
                "{}: latitudes {}..{} do not cover the {} region {}..{}",
                field.code,
                lo,
                hi,
                self.grid.hemisphere(),
                bbox.min_lat,
                bbox.max_lat
            )));
        }
        if !lon.covers(bbox.min_lon, bbox.max_lon) {
            let (lo, hi) = lon.bounds();
            return Err(GridProcessorError::grid(format!(
                "{}: longitudes {}..{} do not cover the {} region {}..{}",
                field.code,
                lo,
                hi,
                self.grid.hemisphere(),
                bbox.min_lon,
                bbox.max_lon
            )));
        }
        Ok((lat, lon))
    }

    /// Resolve every destination cell into source contributions. Rows are
    /// built in parallel and concatenated in order.
    fn build_stencil(&self, lat: &Axis, lon: &Axis, method: RegridMethod) -> Stencil {
        let nan_policy = match method {
            RegridMethod::Conservative => NanPolicy::Skip,
            _ => NanPolicy::Propagate,
        };
        let subsamples = match method {
            RegridMethod::Conservative => self.config.conservative_subsamples,
            _ => 1,
        };
        let (rows, cols) = self.ease.shape();
        let bbox = self.grid.region.bbox();

        let locate = |row: f64, col: f64| -> Option<(f64, f64)> {
            let (y_lat, x_lon) = self.ease.cell_to_geo(row, col);
            if !bbox.contains(x_lon, y_lat) {
                return None;
            }
            Some((lat.fractional_index(y_lat)?, lon.fractional_index(x_lon)?))
        };

        let row_stencils: Vec<Stencil> = (0..rows)
            .into_par_iter()
            .map(|row| {
                let mut stencil = Stencil::new(nan_policy);
                for col in 0..cols {
                    match method {
                        RegridMethod::Bilinear => {
                            let centre = locate(row as f64 + 0.5, col as f64 + 0.5);
                            match centre {
                                Some((r, c)) => stencil.push_cell(bilinear_weights(lat, lon, r, c)),
                                None => stencil.push_cell([]),
                            }
                        }
                        RegridMethod::Nearest => {
                            let centre = locate(row as f64 + 0.5, col as f64 + 0.5);
                            match centre {
                                Some((r, c)) => stencil.push_cell([(nearest_index(lat, lon, r, c), 1.0)]),
                                None => stencil.push_cell([]),
                            }
                        }
                        RegridMethod::Conservative => {
                            stencil.push_cell(self.cell_samples(row, col, subsamples, &locate, lat, lon));
                        }
                    }
                }
                stencil
            })
            .collect();

        let mut stencil = Stencil::new(nan_policy);
        for row_stencil in row_stencils {
            stencil.append(row_stencil);
        }
        stencil
    }

    /// Source cells under an n x n lattice of points inside one destination
    /// cell, counted. EASE cells have equal area, so counts are area
    /// weights.
    fn cell_samples(
        &self,
        row: usize,
        col: usize,
        n: usize,
        locate: &impl Fn(f64, f64) -> Option<(f64, f64)>,
        lat: &Axis,
        lon: &Axis,
    ) -> Vec<(usize, f64)> {
        let mut hits: Vec<usize> = Vec::with_capacity(n * n);
        for i in 0..n {
            for j in 0..n {
                let r = row as f64 + (i as f64 + 0.5) / n as f64;
                let c = col as f64 + (j as f64 + 0.5) / n as f64;
                if let Some((fr, fc)) = locate(r, c) {
                    hits.push(nearest_index(lat, lon, fr, fc));
                }
            }
        }
        hits.sort_unstable();

        let mut samples: Vec<(usize, f64)> = Vec::new();
        for index in hits {
            match samples.last_mut() {
                Some((last, count)) if *last == index => *count += 1.0,
                _ => samples.push((index, 1.0)),
            }
        }
        samples
    }
}
