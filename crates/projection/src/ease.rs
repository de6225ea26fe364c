//! EASE-Grid 2.0 polar equal-area grids.
//!
//! The projection is the ellipsoidal Lambert azimuthal equal-area in its
//! polar aspect (EPSG:6931 for the north, EPSG:6932 for the south), using the
//! WGS84 ellipsoid and a central meridian of 0°.
//!
//! Formulas follow Snyder, "Map Projections: A Working Manual" (1987),
//! equations 3-12, 3-18 and 24-18 to 24-21.
//!
//! Grid coordinates are metres from the pole. Rows run from +y (top) to -y,
//! columns from -x to +x; cell (0, 0) is the top-left corner cell.

use std::f64::consts::{FRAC_PI_2, PI};

use crate::{Hemisphere, ProjectionError, Result};

/// WGS84 semi-major axis in metres.
pub const WGS84_A: f64 = 6_378_137.0;

/// WGS84 first eccentricity.
pub const WGS84_E: f64 = 0.081_819_190_842_621_5;

/// Ellipsoidal polar Lambert azimuthal equal-area projection.
#[derive(Debug, Clone)]
pub struct PolarLaea {
    hemisphere: Hemisphere,
    /// Semi-major axis (metres)
    a: f64,
    /// First eccentricity
    e: f64,
    /// Central meridian in radians
    lon0: f64,
    /// Authalic q at the pole
    qp: f64,
}

impl PolarLaea {
    /// Create a projection for an arbitrary ellipsoid.
    pub fn new(hemisphere: Hemisphere, a: f64, e: f64, lon0_deg: f64) -> Self {
        Self {
            hemisphere,
            a,
            e,
            lon0: lon0_deg.to_radians(),
            qp: authalic_q(FRAC_PI_2, e),
        }
    }

    /// The EASE-Grid 2.0 projection for a hemisphere.
    pub fn wgs84(hemisphere: Hemisphere) -> Self {
        Self::new(hemisphere, WGS84_A, WGS84_E, 0.0)
    }

    pub fn hemisphere(&self) -> Hemisphere {
        self.hemisphere
    }

    /// Project geographic coordinates (degrees) to map coordinates (metres).
    pub fn forward(&self, lat_deg: f64, lon_deg: f64) -> (f64, f64) {
        let phi = lat_deg.to_radians();
        let dlam = lon_deg.to_radians() - self.lon0;
        let q = authalic_q(phi, self.e);

        match self.hemisphere {
            Hemisphere::North => {
                let rho = self.a * (self.qp - q).max(0.0).sqrt();
                (rho * dlam.sin(), -rho * dlam.cos())
            }
            Hemisphere::South => {
                let rho = self.a * (self.qp + q).max(0.0).sqrt();
                (rho * dlam.sin(), rho * dlam.cos())
            }
        }
    }

    /// Inverse projection from map coordinates (metres) to (lat, lon) degrees.
    ///
    /// Longitudes are normalised to [-180, 180).
    pub fn inverse(&self, x: f64, y: f64) -> (f64, f64) {
        let rho = x.hypot(y);
        let ratio = rho * rho / (self.a * self.a);

        let (q, lam) = match self.hemisphere {
            Hemisphere::North => (self.qp - ratio, x.atan2(-y)),
            Hemisphere::South => (-(self.qp - ratio), x.atan2(y)),
        };

        let beta = (q / self.qp).clamp(-1.0, 1.0).asin();
        let phi = authalic_to_geodetic(beta, self.e);

        (phi.to_degrees(), normalize_lon((self.lon0 + lam).to_degrees()))
    }
}

/// Snyder eq. 3-12.
fn authalic_q(phi: f64, e: f64) -> f64 {
    let sin_phi = phi.sin();
    if e == 0.0 {
        return 2.0 * sin_phi;
    }
    let es = e * sin_phi;
    (1.0 - e * e)
        * (sin_phi / (1.0 - es * es) - (1.0 / (2.0 * e)) * ((1.0 - es) / (1.0 + es)).ln())
}

/// Series inverse of the authalic latitude (Snyder eq. 3-18).
fn authalic_to_geodetic(beta: f64, e: f64) -> f64 {
    let e2 = e * e;
    let e4 = e2 * e2;
    let e6 = e4 * e2;

    beta + (e2 / 3.0 + 31.0 * e4 / 180.0 + 517.0 * e6 / 5040.0) * (2.0 * beta).sin()
        + (23.0 * e4 / 360.0 + 251.0 * e6 / 3780.0) * (4.0 * beta).sin()
        + (761.0 * e6 / 45360.0) * (6.0 * beta).sin()
}

fn normalize_lon(lon: f64) -> f64 {
    let wrapped = (lon + 180.0).rem_euclid(360.0) - 180.0;
    if wrapped >= 180.0 {
        wrapped - 360.0
    } else {
        wrapped
    }
}

/// A square EASE-Grid 2.0 grid centred on a pole.
#[derive(Debug, Clone)]
pub struct EaseGrid {
    pub hemisphere: Hemisphere,
    /// Cell edge length in metres
    pub resolution_m: f64,
    /// Distance from the pole to the grid edge in metres
    pub half_extent_m: f64,
    /// Number of rows (and columns)
    pub size: usize,
    projection: PolarLaea,
}

impl EaseGrid {
    /// Default half extent, giving the 432x432 grid at 25 km.
    pub const DEFAULT_HALF_EXTENT_KM: f64 = 5400.0;

    /// Build a grid with the given cell size and half extent, both in km.
    ///
    /// The cell size must divide the full extent into a whole number of cells.
    pub fn new(hemisphere: Hemisphere, resolution_km: f64, half_extent_km: f64) -> Result<Self> {
        if !(resolution_km > 0.0) || !resolution_km.is_finite() {
            return Err(ProjectionError::InvalidGrid(format!(
                "resolution must be positive, got {} km",
                resolution_km
            )));
        }
        if !(half_extent_km > 0.0) || !half_extent_km.is_finite() {
            return Err(ProjectionError::InvalidGrid(format!(
                "half extent must be positive, got {} km",
                half_extent_km
            )));
        }

        let cells = 2.0 * half_extent_km / resolution_km;
        let size = cells.round();
        if (cells - size).abs() > 1e-6 || size < 1.0 {
            return Err(ProjectionError::InvalidGrid(format!(
                "{} km does not divide the {} km extent into whole cells",
                resolution_km,
                2.0 * half_extent_km
            )));
        }

        Ok(Self {
            hemisphere,
            resolution_m: resolution_km * 1000.0,
            half_extent_m: half_extent_km * 1000.0,
            size: size as usize,
            projection: PolarLaea::wgs84(hemisphere),
        })
    }

    /// Grid shape as (rows, cols).
    pub fn shape(&self) -> (usize, usize) {
        (self.size, self.size)
    }

    pub fn projection(&self) -> &PolarLaea {
        &self.projection
    }

    /// Cell-centre x coordinates, left to right.
    pub fn x_coords(&self) -> Vec<f64> {
        (0..self.size)
            .map(|col| -self.half_extent_m + (col as f64 + 0.5) * self.resolution_m)
            .collect()
    }

    /// Cell-centre y coordinates, top to bottom.
    pub fn y_coords(&self) -> Vec<f64> {
        (0..self.size)
            .map(|row| self.half_extent_m - (row as f64 + 0.5) * self.resolution_m)
            .collect()
    }

    /// Map coordinates of a fractional cell position, where (0.5, 0.5) is the
    /// centre of the top-left cell.
    pub fn cell_to_map(&self, row: f64, col: f64) -> (f64, f64) {
        (
            -self.half_extent_m + col * self.resolution_m,
            self.half_extent_m - row * self.resolution_m,
        )
    }

    /// Geographic (lat, lon) of a fractional cell position.
    pub fn cell_to_geo(&self, row: f64, col: f64) -> (f64, f64) {
        let (x, y) = self.cell_to_map(row, col);
        self.projection.inverse(x, y)
    }
}
