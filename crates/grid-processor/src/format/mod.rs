//! On-disk representations of datasets.
//!
//! Archive responses arrive either as NetCDF (`.nc`, behind the `netcdf`
//! feature) or as Zarr directory stores (`.zarr`). Everything this crate
//! writes is Zarr.

#[cfg(feature = "netcdf")]
mod netcdf_reader;
mod zarr;

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::config::GridProcessorConfig;
use crate::dataset::Dataset;
use crate::error::{GridProcessorError, Result};

#[cfg(feature = "netcdf")]
pub use netcdf_reader::{read_netcdf, silence_hdf5_errors};
pub use zarr::{array_names, read_zarr, read_zarr_attributes, read_zarr_variable, write_zarr};

/// File formats a raw archive response may take.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RawFormat {
    Netcdf,
    Zarr,
}

impl RawFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Netcdf => "nc",
            Self::Zarr => "zarr",
        }
    }

    /// Value for the archive's `data_format` request field.
    pub fn request_name(&self) -> &'static str {
        match self {
            Self::Netcdf => "netcdf",
            Self::Zarr => "zarr",
        }
    }

    /// Whether this build can read files of this format.
    pub fn is_readable(&self) -> bool {
        match self {
            Self::Zarr => true,
            Self::Netcdf => cfg!(feature = "netcdf"),
        }
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension()?.to_str()? {
            "nc" | "nc4" | "netcdf" => Some(Self::Netcdf),
            "zarr" => Some(Self::Zarr),
            _ => None,
        }
    }
}

/// Read any supported file into memory with CF decoding applied.
pub fn read_dataset(path: &Path) -> Result<Dataset> {
    let format = RawFormat::from_path(path).ok_or_else(|| {
        GridProcessorError::UnsupportedFormat(format!("unknown file type: {}", path.display()))
    })?;

    let mut dataset = match format {
        RawFormat::Zarr => read_zarr(path)?,
        #[cfg(feature = "netcdf")]
        RawFormat::Netcdf => read_netcdf(path)?,
        #[cfg(not(feature = "netcdf"))]
        RawFormat::Netcdf => {
            return Err(GridProcessorError::UnsupportedFormat(format!(
                "{}: built without NetCDF support",
                path.display()
            )))
        }
    };

    for variable in dataset.variables.values_mut() {
        variable.decode_cf();
    }
    Ok(dataset)
}

/// Write a dataset so that `dest` either keeps its previous content or
/// holds the complete new store, never a partial one.
pub fn write_dataset_atomic(
    dataset: &Dataset,
    dest: &Path,
    config: &GridProcessorConfig,
) -> Result<()> {
    let tmp = sibling_path(dest, "tmp");
    if let Err(e) = write_zarr(dataset, &tmp, config) {
        let _ = remove_path(&tmp);
        return Err(e);
    }
    replace_path(&tmp, dest)?;
    Ok(())
}

/// A hidden, uniquely named path next to `path`.
pub fn sibling_path(path: &Path, tag: &str) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let unique = format!(".{}.{}-{}", name, tag, uuid::Uuid::new_v4().simple());
    match path.parent() {
        Some(parent) => parent.join(unique),
        None => PathBuf::from(unique),
    }
}

/// Move `src` over `dest`, replacing a file or a directory store.
pub fn replace_path(src: &Path, dest: &Path) -> std::io::Result<()> {
    if !dest.exists() {
        return std::fs::rename(src, dest);
    }
    // Directories cannot be renamed over, so park the old one first
    let old = sibling_path(dest, "old");
    std::fs::rename(dest, &old)?;
    if let Err(e) = std::fs::rename(src, dest) {
        let _ = std::fs::rename(&old, dest);
        return Err(e);
    }
    remove_path(&old)
}

/// Remove a file or directory tree; a missing path is not an error.
pub fn remove_path(path: &Path) -> std::io::Result<()> {
    let result = match std::fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => std::fs::remove_dir_all(path),
        Ok(_) => std::fs::remove_file(path),
        Err(e) => Err(e),
    };
    match result {
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_from_path() {
        assert_eq!(RawFormat::from_path(Path::new("a/raw_2020.nc")), Some(RawFormat::Netcdf));
        assert_eq!(RawFormat::from_path(Path::new("a/raw_2020.zarr")), Some(RawFormat::Zarr));
        assert_eq!(RawFormat::from_path(Path::new("a/raw_2020.grib")), None);
    }

    #[test]
    fn test_readable_formats() {
        assert!(RawFormat::Zarr.is_readable());
        assert_eq!(RawFormat::Netcdf.is_readable(), cfg!(feature = "netcdf"));
    }

    #[test]
    fn test_sibling_path_is_hidden_and_unique() {
        let dest = Path::new("/data/latlon_2020.zarr");
        let a = sibling_path(dest, "tmp");
        let b = sibling_path(dest, "tmp");
        assert_ne!(a, b);
        assert_eq!(a.parent(), dest.parent());
        assert!(a.file_name().unwrap().to_string_lossy().starts_with(".latlon_2020.zarr.tmp-"));
    }

    #[test]
    fn test_replace_and_remove() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("store");
        std::fs::create_dir(&dest).unwrap();
        std::fs::write(dest.join("old"), b"1").unwrap();

        let src = dir.path().join("new");
        std::fs::create_dir(&src).unwrap();
        std::fs::write(src.join("fresh"), b"2").unwrap();

        replace_path(&src, &dest).unwrap();
        assert!(dest.join("fresh").exists());
        assert!(!dest.join("old").exists());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);

        remove_path(&dest).unwrap();
        remove_path(&dest).unwrap();
        assert!(!dest.exists());
    }

    #[test]
    fn test_read_unknown_extension() {
        let err = read_dataset(Path::new("/nope/file.grib")).unwrap_err();
        assert!(matches!(err, GridProcessorError::UnsupportedFormat(_)));
    }
}
