//! Data products served by the archive.
//!
//! Each product supplies only what differs between reanalyses: its
//! variable catalog, the date range the archive holds, how a request is
//! phrased, which bookkeeping variables to discard and how fields are
//! regridded. Planning, downloading, normalisation and regridding are
//! shared.

mod carra;
mod era5;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use grid_processor::{CanonicalField, DefaultPolicy, HemisphereRegion, RawFormat, RegridMethod, RegridPolicy};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::catalog::VariableCatalog;
use crate::catalog::VariableSpec;
use crate::error::{PipelineError, Result};
use crate::planner::DateChunk;

pub use carra::Carra;
pub use era5::Era5;

/// A reanalysis data product.
pub trait Product: Send + Sync {
    /// Short name, also the top-level output directory.
    fn identifier(&self) -> &str;

    fn catalog(&self) -> &VariableCatalog;

    /// First day held by the archive and, if the product is no longer
    /// extended, the last one. Open-ended products run up to today.
    fn available_range(&self) -> (NaiveDate, Option<NaiveDate>);

    /// Archive query for one request.
    fn build_query(
        &self,
        spec: &VariableSpec,
        chunk: &DateChunk,
        region: &HemisphereRegion,
        format: RawFormat,
    ) -> Value {
        reanalysis_query(spec, chunk, region, format)
    }

    /// Variables in a response that are neither data nor coordinates.
    fn auxiliary_variables(&self) -> Vec<String> {
        Vec::new()
    }

    fn regrid_method(&self, code: &str) -> RegridMethod {
        DefaultPolicy::default_method(code)
    }

    /// Runs on a copy of the canonical field right before regridding.
    fn adjust(&self, _field: &mut CanonicalField) -> grid_processor::Result<()> {
        Ok(())
    }
}

/// Adapts a [`Product`] to the regridder's policy interface.
pub struct ProductPolicy<'a>(pub &'a dyn Product);

impl RegridPolicy for ProductPolicy<'_> {
    fn method(&self, code: &str) -> RegridMethod {
        self.0.regrid_method(code)
    }

    fn adjust(&self, field: &mut CanonicalField) -> grid_processor::Result<()> {
        self.0.adjust(field)
    }
}

/// Products selectable from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProductKind {
    Carra,
    Era5,
}

impl ProductKind {
    pub fn create(&self) -> Arc<dyn Product> {
        match self {
            Self::Carra => Arc::new(Carra::new()),
            Self::Era5 => Arc::new(Era5::new()),
        }
    }
}

impl fmt::Display for ProductKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Carra => f.write_str("carra"),
            Self::Era5 => f.write_str("era5"),
        }
    }
}

impl FromStr for ProductKind {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "carra" => Ok(Self::Carra),
            "era5" => Ok(Self::Era5),
            other => Err(PipelineError::config(format!("unknown product '{}'", other))),
        }
    }
}

/// Fail unless every date lies within the product's archive.
pub fn check_dates(product: &dyn Product, dates: &[NaiveDate]) -> Result<()> {
    let (first, last) = product.available_range();
    let last = last.unwrap_or_else(|| Utc::now().date_naive());

    let (Some(min), Some(max)) = (dates.iter().min(), dates.iter().max()) else {
        return Ok(());
    };
    if *min < first || *max > last {
        return Err(PipelineError::config(format!(
            "{}: requested {}..{} outside available range {}..{}",
            product.identifier(),
            min,
            max,
            first,
            last
        )));
    }
    Ok(())
}

/// CDS-style reanalysis request covering every hour of the chunk's days.
///
/// Months and days are requested as sets, so a chunk spanning several
/// months may fetch a few extra days; normalisation keeps only the
/// chunk's dates.
pub fn reanalysis_query(
    spec: &VariableSpec,
    chunk: &DateChunk,
    region: &HemisphereRegion,
    format: RawFormat,
) -> Value {
    let months: Vec<String> = chunk.months().iter().map(|m| format!("{:02}", m)).collect();
    let days: Vec<String> = chunk.days().iter().map(|d| format!("{:02}", d)).collect();
    let times: Vec<String> = (0..24).map(|h| format!("{:02}:00", h)).collect();

    let mut query = json!({
        "product_type": ["reanalysis"],
        "variable": [spec.archive_id],
        "year": [chunk.year().to_string()],
        "month": months,
        "day": days,
        "time": times,
        "data_format": format.request_name(),
        "download_format": "unarchived",
        "area": region.area,
    });
    if let Some(level) = &spec.level {
        query["pressure_level"] = json!([level]);
    }
    query
}

#[cfg(test)]
mod tests {
    use super::*;
    use projection::Hemisphere;

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_query_shape() {
        let product = Carra::new();
        let spec = product.catalog().resolve("ta", Some("850")).unwrap();
        let chunk = DateChunk::new(vec![ymd(2020, 2, 3), ymd(2020, 1, 31), ymd(2020, 2, 1)]);
        let region = HemisphereRegion::new(Hemisphere::North);

        let query = product.build_query(&spec, &chunk, &region, RawFormat::Netcdf);
        assert_eq!(query["variable"], json!(["temperature"]));
        assert_eq!(query["year"], json!(["2020"]));
        assert_eq!(query["month"], json!(["01", "02"]));
        assert_eq!(query["day"], json!(["01", "03", "31"]));
        assert_eq!(query["time"].as_array().unwrap().len(), 24);
        assert_eq!(query["time"][23], json!("23:00"));
        assert_eq!(query["data_format"], json!("netcdf"));
        assert_eq!(query["area"], json!([90.0, -180.0, 0.0, 180.0]));
        assert_eq!(query["pressure_level"], json!(["850"]));
    }

    #[test]
    fn test_surface_query_has_no_level() {
        let product = Era5::new();
        let spec = product.catalog().resolve("tas", None).unwrap();
        let chunk = DateChunk::new(vec![ymd(2020, 1, 1)]);
        let region = HemisphereRegion::new(Hemisphere::South);
        let query = product.build_query(&spec, &chunk, &region, RawFormat::Zarr);
        assert!(query.get("pressure_level").is_none());
        assert_eq!(query["data_format"], json!("zarr"));
        assert_eq!(query["area"], json!([0.0, -180.0, -90.0, 180.0]));
    }

    #[test]
    fn test_check_dates() {
        let carra = Carra::new();
        assert!(check_dates(&carra, &[ymd(2020, 1, 1)]).is_ok());
        assert!(matches!(
            check_dates(&carra, &[ymd(1990, 8, 31), ymd(2020, 1, 1)]),
            Err(PipelineError::Configuration(_))
        ));
        let tomorrow = Utc::now().date_naive().succ_opt().unwrap();
        assert!(check_dates(&Era5::new(), &[tomorrow]).is_err());
        assert!(check_dates(&Era5::new(), &[ymd(1940, 1, 1)]).is_ok());
    }

    #[test]
    fn test_product_kind() {
        assert_eq!("ERA5".parse::<ProductKind>().unwrap(), ProductKind::Era5);
        assert!("merra".parse::<ProductKind>().is_err());
        assert_eq!(ProductKind::Carra.create().identifier(), "carra");
    }

    #[test]
    fn test_policy_delegates() {
        let era5 = Era5::new();
        let policy = ProductPolicy(&era5);
        assert_eq!(policy.method("rsds"), RegridMethod::Conservative);
        assert_eq!(policy.method("ta500"), RegridMethod::Bilinear);
    }
}
