//! Coordinate reference system transformations.
//!
//! Implements the polar equal-area projections used as regridding targets
//! from scratch without external dependencies.

pub mod ease;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use ease::{EaseGrid, PolarLaea};

/// Errors raised while building a projection or grid.
#[derive(Debug, Error)]
pub enum ProjectionError {
    #[error("invalid grid definition: {0}")]
    InvalidGrid(String),

    #[error("unknown hemisphere: {0}")]
    UnknownHemisphere(String),
}

pub type Result<T> = std::result::Result<T, ProjectionError>;

/// Polar hemisphere a grid is centred on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Hemisphere {
    North,
    South,
}

impl Hemisphere {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::North => "north",
            Self::South => "south",
        }
    }

    /// EPSG code of the EASE-Grid 2.0 projection for this hemisphere.
    pub fn epsg(&self) -> u32 {
        match self {
            Self::North => 6931,
            Self::South => 6932,
        }
    }
}

impl fmt::Display for Hemisphere {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Hemisphere {
    type Err = ProjectionError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "north" | "n" | "nh" => Ok(Self::North),
            "south" | "s" | "sh" => Ok(Self::South),
            other => Err(ProjectionError::UnknownHemisphere(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hemisphere_parse() {
        assert_eq!("north".parse::<Hemisphere>().unwrap(), Hemisphere::North);
        assert_eq!("SH".parse::<Hemisphere>().unwrap(), Hemisphere::South);
        assert!("east".parse::<Hemisphere>().is_err());
    }

    #[test]
    fn test_hemisphere_epsg() {
        assert_eq!(Hemisphere::North.epsg(), 6931);
        assert_eq!(Hemisphere::South.epsg(), 6932);
    }
}
