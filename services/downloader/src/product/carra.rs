//! Copernicus Arctic Regional Reanalysis.

use chrono::NaiveDate;

use super::Product;
use crate::catalog::VariableCatalog;

const SINGLE_LEVELS: &str = "reanalysis-carra-single-levels";
const PRESSURE_LEVELS: &str = "reanalysis-carra-pressure-levels";

/// Grid-mapping variable attached to CARRA responses.
const GRID_MAPPING: &str = "lambert_azimuthal_equal_area";

pub struct Carra {
    catalog: VariableCatalog,
}

impl Carra {
    pub fn new() -> Self {
        let catalog = VariableCatalog::new(SINGLE_LEVELS, PRESSURE_LEVELS)
            .with_single_level("tas", "2m_temperature")
            .with_single_level("psl", "surface_pressure")
            .with_single_level("uas", "10m_u_component_of_wind")
            .with_single_level("vas", "10m_v_component_of_wind")
            .with_single_level("rlds", "surface_thermal_radiation_downwards")
            .with_single_level("rsds", "surface_solar_radiation_downwards")
            .with_single_level("tos", "sea_surface_temperature")
            .with_pressure_level("ta", "temperature")
            .with_pressure_level("zg", "geopotential")
            .with_pressure_level("ua", "u_component_of_wind")
            .with_pressure_level("va", "v_component_of_wind")
            .with_pressure_level("hus", "specific_humidity");
        Self { catalog }
    }
}

impl Default for Carra {
    fn default() -> Self {
        Self::new()
    }
}

impl Product for Carra {
    fn identifier(&self) -> &str {
        "carra"
    }

    fn catalog(&self) -> &VariableCatalog {
        &self.catalog
    }

    fn available_range(&self) -> (NaiveDate, Option<NaiveDate>) {
        (
            NaiveDate::from_ymd_opt(1990, 9, 1).unwrap_or(NaiveDate::MIN),
            None,
        )
    }

    fn auxiliary_variables(&self) -> Vec<String> {
        vec![GRID_MAPPING.to_string()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_tables() {
        let carra = Carra::new();
        let codes: Vec<&str> = carra.catalog().single_level_codes().collect();
        assert_eq!(codes, vec!["psl", "rlds", "rsds", "tas", "tos", "uas", "vas"]);
        assert_eq!(carra.catalog().pressure_level_codes().count(), 5);

        let spec = carra.catalog().resolve("zg", Some("500")).unwrap();
        assert_eq!(spec.dataset, PRESSURE_LEVELS);
        assert_eq!(spec.archive_id, "geopotential");
    }

    #[test]
    fn test_drops_grid_mapping() {
        assert_eq!(Carra::new().auxiliary_variables(), vec![GRID_MAPPING.to_string()]);
    }
}
