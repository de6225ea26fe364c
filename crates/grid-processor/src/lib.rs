//! Normalisation and regridding of reanalysis archive files.
//!
//! Raw archive responses (hourly, arbitrary variable naming) are reduced to
//! canonical daily lat/lon Zarr stores, which are then regridded onto
//! EASE-Grid 2.0 polar grids.
//!
//! # Architecture
//!
//! ```text
//! raw_YYYY.nc / raw_YYYY.zarr
//!      │
//!      ▼
//! Postprocessor::normalize
//!      │  rename time, drop auxiliaries, squeeze level,
//!      │  sort by time, NaN-aware daily mean
//!      ▼
//! CanonicalFile (latlon_YYYY.zarr)  ◄── merged per year
//!      │
//!      ▼
//! Regridder::regrid(policy)
//!      │  adjust hook, coverage check, stencil per destination cell,
//!      │  parallel over days
//!      ▼
//! RegriddedFile (YYYY.zarr)
//! ```
//!
//! # Example
//!
//! ```ignore
//! use grid_processor::{CanonicalFile, DefaultPolicy, GridConfig, GridProcessorConfig, Postprocessor, Regridder};
//! use projection::Hemisphere;
//!
//! let config = GridProcessorConfig::from_env();
//! let field = Postprocessor::default().normalize(raw_path, "tas")?;
//! let canonical = CanonicalFile::write_merged(latlon_path, field, &config)?;
//!
//! let regridder = Regridder::new(GridConfig::ease2(Hemisphere::North, 25.0), config)?;
//! regridder.regrid(&canonical, &DefaultPolicy::new(), out_path)?;
//! ```

pub mod canonical;
pub mod config;
pub mod dataset;
pub mod error;
pub mod format;
pub mod postprocess;
pub mod regrid;
pub mod time;
pub mod types;

// Re-export commonly used types at crate root
pub use canonical::{read_dates, CanonicalField, CanonicalFile, RegriddedField, RegriddedFile};
pub use config::{GridProcessorConfig, ZarrCompression};
pub use dataset::{Attributes, Dataset, Variable};
pub use error::{GridProcessorError, Result};
pub use format::{read_dataset, write_dataset_atomic, RawFormat};
pub use postprocess::{raw_dates, Postprocessor};
pub use regrid::{DefaultPolicy, RegridPolicy, Regridder};
pub use types::{BoundingBox, GridConfig, HemisphereRegion, RegridMethod};
