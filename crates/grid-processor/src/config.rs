//! Configuration for the grid processor.

use serde::{Deserialize, Serialize};

use crate::error::{GridProcessorError, Result};

/// Configuration for reading, writing and regridding grids.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridProcessorConfig {
    /// Edge length of spatial Zarr chunks (square chunks).
    pub zarr_chunk_size: usize,

    /// Compression codec for Zarr files.
    pub zarr_compression: ZarrCompression,

    /// Compression level (1-9).
    pub zarr_compression_level: u8,

    /// Enable byte shuffle filter for better compression.
    pub zarr_shuffle: bool,

    /// Sub-samples per destination cell edge for conservative remapping
    /// (n x n points per cell).
    pub conservative_subsamples: usize,
}

impl Default for GridProcessorConfig {
    fn default() -> Self {
        Self {
            zarr_chunk_size: 512,
            zarr_compression: ZarrCompression::BloscZstd,
            zarr_compression_level: 1,
            zarr_shuffle: true,
            conservative_subsamples: 4,
        }
    }
}

impl GridProcessorConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("ZARR_CHUNK_SIZE") {
            if let Ok(size) = val.parse() {
                config.zarr_chunk_size = size;
            }
        }

        if let Ok(val) = std::env::var("ZARR_COMPRESSION") {
            config.zarr_compression = ZarrCompression::from_str(&val);
        }

        if let Ok(val) = std::env::var("ZARR_COMPRESSION_LEVEL") {
            if let Ok(level) = val.parse() {
                config.zarr_compression_level = level;
            }
        }

        if let Ok(val) = std::env::var("ZARR_SHUFFLE") {
            config.zarr_shuffle = val.to_lowercase() == "true" || val == "1";
        }

        if let Ok(val) = std::env::var("REGRID_SUBSAMPLES") {
            if let Ok(n) = val.parse() {
                config.conservative_subsamples = n;
            }
        }

        config
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.zarr_chunk_size == 0 {
            return Err(GridProcessorError::Config(
                "zarr_chunk_size must be > 0".to_string(),
            ));
        }

        if self.zarr_compression_level == 0 || self.zarr_compression_level > 9 {
            return Err(GridProcessorError::Config(
                "zarr_compression_level must be 1-9".to_string(),
            ));
        }

        if self.conservative_subsamples == 0 {
            return Err(GridProcessorError::Config(
                "conservative_subsamples must be > 0".to_string(),
            ));
        }

        Ok(())
    }
}

/// Compression codec for Zarr files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ZarrCompression {
    /// No compression.
    None,
    /// Blosc with LZ4.
    BloscLz4,
    /// Blosc with Zstd (recommended).
    #[default]
    BloscZstd,
}

impl ZarrCompression {
    /// Parse from string (case-insensitive).
    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "none" => Self::None,
            "lz4" | "blosc_lz4" => Self::BloscLz4,
            _ => Self::BloscZstd,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::BloscLz4 => "blosc_lz4",
            Self::BloscZstd => "blosc_zstd",
        }
    }
}

impl std::fmt::Display for ZarrCompression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
