//! On-disk layout of downloaded, canonical and regridded files.
//!
//! ```text
//! <output_dir>/<product>/<hemisphere>/<code><level>/
//!     raw_2020.nc        downloaded archive response (temporary)
//!     raw_2020_01.nc     ... when chunking by month
//!     latlon_2020.zarr   canonical daily field for 2020
//!     2020.zarr          same field on the EASE-Grid 2.0 grid
//! ```

use std::path::{Path, PathBuf};

use grid_processor::RawFormat;
use projection::Hemisphere;
use walkdir::WalkDir;

use crate::catalog::VariableSpec;
use crate::planner::DateChunk;

const RAW_PREFIX: &str = "raw_";
const CANONICAL_PREFIX: &str = "latlon_";
const ZARR_SUFFIX: &str = ".zarr";

/// Paths for one data product under an output directory.
#[derive(Debug, Clone)]
pub struct Layout {
    root: PathBuf,
    product: String,
}

impl Layout {
    pub fn new(output_dir: impl Into<PathBuf>, product: impl Into<String>) -> Self {
        Self {
            root: output_dir.into(),
            product: product.into(),
        }
    }

    pub fn hemisphere_dir(&self, hemisphere: Hemisphere) -> PathBuf {
        self.root.join(&self.product).join(hemisphere.as_str())
    }

    pub fn variable_dir(&self, hemisphere: Hemisphere, spec: &VariableSpec) -> PathBuf {
        self.hemisphere_dir(hemisphere).join(spec.qualified_code())
    }

    pub fn raw_path(
        &self,
        hemisphere: Hemisphere,
        spec: &VariableSpec,
        chunk: &DateChunk,
        format: RawFormat,
    ) -> PathBuf {
        self.variable_dir(hemisphere, spec).join(format!(
            "{}{}.{}",
            RAW_PREFIX,
            chunk.key(),
            format.extension()
        ))
    }

    pub fn canonical_path(&self, hemisphere: Hemisphere, spec: &VariableSpec, year: i32) -> PathBuf {
        self.variable_dir(hemisphere, spec)
            .join(format!("{}{}{}", CANONICAL_PREFIX, year, ZARR_SUFFIX))
    }

    pub fn regridded_path(&self, hemisphere: Hemisphere, spec: &VariableSpec, year: i32) -> PathBuf {
        self.variable_dir(hemisphere, spec)
            .join(format!("{}{}", year, ZARR_SUFFIX))
    }

    /// Every canonical file under the hemisphere, sorted by path.
    pub fn discover_canonical(&self, hemisphere: Hemisphere) -> Vec<PathBuf> {
        let dir = self.hemisphere_dir(hemisphere);
        if !dir.is_dir() {
            return Vec::new();
        }

        WalkDir::new(dir)
            .min_depth(2)
            .max_depth(2)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_dir())
            .filter(|entry| canonical_year(entry.path()).is_some())
            .map(|entry| entry.into_path())
            .collect()
    }
}

/// Year of a `latlon_<YYYY>.zarr` path.
pub fn canonical_year(path: &Path) -> Option<i32> {
    path.file_name()?
        .to_str()?
        .strip_prefix(CANONICAL_PREFIX)?
        .strip_suffix(ZARR_SUFFIX)?
        .parse()
        .ok()
}

/// The regridded sibling of a canonical file.
pub fn regridded_for(canonical: &Path) -> Option<PathBuf> {
    let year = canonical_year(canonical)?;
    Some(canonical.with_file_name(format!("{}{}", year, ZARR_SUFFIX)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn spec(level: Option<&str>) -> VariableSpec {
        VariableSpec {
            code: "ta".to_string(),
            level: level.map(str::to_string),
            archive_id: "temperature".to_string(),
            dataset: "reanalysis-carra-pressure-levels".to_string(),
        }
    }

    #[test]
    fn test_paths() {
        let layout = Layout::new("/data", "carra");
        let chunk = DateChunk::new(vec![NaiveDate::from_ymd_opt(2020, 1, 1).unwrap()]);

        assert_eq!(
            layout.raw_path(Hemisphere::North, &spec(Some("500")), &chunk, RawFormat::Netcdf),
            PathBuf::from("/data/carra/north/ta500/raw_2020.nc")
        );
        assert_eq!(
            layout.canonical_path(Hemisphere::South, &spec(None), 2021),
            PathBuf::from("/data/carra/south/ta/latlon_2021.zarr")
        );
        assert_eq!(
            layout.regridded_path(Hemisphere::North, &spec(None), 2021),
            PathBuf::from("/data/carra/north/ta/2021.zarr")
        );
    }

    #[test]
    fn test_canonical_names() {
        assert_eq!(canonical_year(Path::new("/x/latlon_1999.zarr")), Some(1999));
        assert_eq!(canonical_year(Path::new("/x/1999.zarr")), None);
        assert_eq!(canonical_year(Path::new("/x/latlon_abc.zarr")), None);
        assert_eq!(
            regridded_for(Path::new("/x/tas/latlon_2020.zarr")),
            Some(PathBuf::from("/x/tas/2020.zarr"))
        );
    }

    #[test]
    fn test_discover_canonical() {
        let dir = tempfile::tempdir().unwrap();
        let layout = Layout::new(dir.path(), "era5");
        let var_dir = layout.hemisphere_dir(Hemisphere::North).join("tas");
        std::fs::create_dir_all(var_dir.join("latlon_2021.zarr")).unwrap();
        std::fs::create_dir_all(var_dir.join("latlon_2020.zarr")).unwrap();
        std::fs::create_dir_all(var_dir.join("2020.zarr")).unwrap();
        std::fs::write(var_dir.join("raw_2022.nc"), b"").unwrap();

        let found = layout.discover_canonical(Hemisphere::North);
        assert_eq!(
            found,
            vec![var_dir.join("latlon_2020.zarr"), var_dir.join("latlon_2021.zarr")]
        );
        assert!(layout.discover_canonical(Hemisphere::South).is_empty());
    }
}
