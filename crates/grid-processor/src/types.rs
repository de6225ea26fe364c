//! Core types shared by the postprocessor and the regridder.

use std::fmt;

use projection::{EaseGrid, Hemisphere};
use serde::{Deserialize, Serialize};

use crate::error::{GridProcessorError, Result};

/// A geographic bounding box in WGS84 coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_lon: f64,
    pub min_lat: f64,
    pub max_lon: f64,
    pub max_lat: f64,
}

impl BoundingBox {
    pub fn new(min_lon: f64, min_lat: f64, max_lon: f64, max_lat: f64) -> Self {
        Self {
            min_lon,
            min_lat,
            max_lon,
            max_lat,
        }
    }

    /// Get the width in degrees.
    pub fn width(&self) -> f64 {
        self.max_lon - self.min_lon
    }

    /// Get the height in degrees.
    pub fn height(&self) -> f64 {
        self.max_lat - self.min_lat
    }

    /// Check if a point is contained within this bounding box.
    pub fn contains(&self, lon: f64, lat: f64) -> bool {
        lon >= self.min_lon && lon <= self.max_lon && lat >= self.min_lat && lat <= self.max_lat
    }
}

/// The area of the globe a download and regrid is restricted to.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HemisphereRegion {
    pub hemisphere: Hemisphere,
    /// Archive-style area as [north, west, south, east] in degrees.
    pub area: [f64; 4],
}

impl HemisphereRegion {
    /// The whole hemisphere from the equator to the pole.
    pub fn new(hemisphere: Hemisphere) -> Self {
        let area = match hemisphere {
            Hemisphere::North => [90.0, -180.0, 0.0, 180.0],
            Hemisphere::South => [0.0, -180.0, -90.0, 180.0],
        };
        Self { hemisphere, area }
    }

    pub fn with_area(hemisphere: Hemisphere, area: [f64; 4]) -> Result<Self> {
        let [north, west, south, east] = area;
        if north <= south || east <= west {
            return Err(GridProcessorError::Config(format!(
                "area {:?} must be ordered [north, west, south, east]",
                area
            )));
        }
        Ok(Self { hemisphere, area })
    }

    pub fn bbox(&self) -> BoundingBox {
        let [north, west, south, east] = self.area;
        BoundingBox::new(west, south, east, north)
    }
}

/// Interpolation/aggregation used to move a field onto the destination grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RegridMethod {
    /// Bilinear interpolation, for intensive quantities.
    #[default]
    Bilinear,
    /// Area-weighted averaging, for extensive quantities.
    Conservative,
    /// Nearest source cell.
    Nearest,
}

impl RegridMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bilinear => "bilinear",
            Self::Conservative => "conservative",
            Self::Nearest => "nearest",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "bilinear" | "linear" => Some(Self::Bilinear),
            "conservative" | "area" => Some(Self::Conservative),
            "nearest" => Some(Self::Nearest),
            _ => None,
        }
    }
}

impl fmt::Display for RegridMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Destination grid for regridding.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridConfig {
    pub resolution_km: f64,
    pub half_extent_km: f64,
    pub region: HemisphereRegion,
}

impl GridConfig {
    /// EASE-Grid 2.0 at the default extent.
    pub fn ease2(hemisphere: Hemisphere, resolution_km: f64) -> Self {
        Self {
            resolution_km,
            half_extent_km: EaseGrid::DEFAULT_HALF_EXTENT_KM,
            region: HemisphereRegion::new(hemisphere),
        }
    }

    pub fn hemisphere(&self) -> Hemisphere {
        self.region.hemisphere
    }

    /// Build the grid geometry, validating the resolution.
    pub fn ease_grid(&self) -> Result<EaseGrid> {
        Ok(EaseGrid::new(
            self.region.hemisphere,
            self.resolution_km,
            self.half_extent_km,
        )?)
    }

    /// Attributes identifying a regridded output produced with this grid
    /// and method.
    pub fn fingerprint(&self, method: RegridMethod) -> serde_json::Map<String, serde_json::Value> {
        let mut attrs = serde_json::Map::new();
        attrs.insert("projection".to_string(), serde_json::json!("EASE2"));
        attrs.insert(
            "crs".to_string(),
            serde_json::json!(format!("EPSG:{}", self.region.hemisphere.epsg())),
        );
        attrs.insert(
            "hemisphere".to_string(),
            serde_json::json!(self.region.hemisphere.as_str()),
        );
        attrs.insert("resolution_km".to_string(), serde_json::json!(self.resolution_km));
        attrs.insert("half_extent_km".to_string(), serde_json::json!(self.half_extent_km));
        attrs.insert("method".to_string(), serde_json::json!(method.as_str()));
        attrs
    }
}
