//! ECMWF ERA5 global reanalysis.

use chrono::NaiveDate;
use grid_processor::regrid::base_code;
use grid_processor::CanonicalField;
use tracing::debug;

use super::Product;
use crate::catalog::VariableCatalog;

const SINGLE_LEVELS: &str = "reanalysis-era5-single-levels";
const PRESSURE_LEVELS: &str = "reanalysis-era5-pressure-levels";

/// Radiation fields the archive stores as hourly accumulations (J m-2).
const ACCUMULATED: &[&str] = &["rlds", "rsds"];

const SECONDS_PER_HOUR: f32 = 3600.0;

pub struct Era5 {
    catalog: VariableCatalog,
}

impl Era5 {
    pub fn new() -> Self {
        let catalog = VariableCatalog::new(SINGLE_LEVELS, PRESSURE_LEVELS)
            .with_single_level("tas", "2m_temperature")
            .with_single_level("psl", "mean_sea_level_pressure")
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

impl Default for Era5 {
    fn default() -> Self {
        Self::new()
    }
}

/// `J m-2`, `J m**-2`, `J/m2` ...
fn is_joules_per_square_metre(units: &str) -> bool {
    let compact: String = units
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '*' && *c != '^')
        .collect();
    matches!(compact.as_str(), "Jm-2" | "J/m2")
}

impl Product for Era5 {
    fn identifier(&self) -> &str {
        "era5"
    }

    fn catalog(&self) -> &VariableCatalog {
        &self.catalog
    }

    fn available_range(&self) -> (NaiveDate, Option<NaiveDate>) {
        (
            NaiveDate::from_ymd_opt(1940, 1, 1).unwrap_or(NaiveDate::MIN),
            None,
        )
    }

    /// Hourly accumulated radiation to mean flux in W m-2.
    fn adjust(&self, field: &mut CanonicalField) -> grid_processor::Result<()> {
        if !ACCUMULATED.contains(&base_code(&field.code)) {
            return Ok(());
        }
        match field.units.as_deref() {
            Some(units) if is_joules_per_square_metre(units) => {
                for value in field.values.iter_mut() {
                    *value /= SECONDS_PER_HOUR;
                }
                field.units = Some("W m-2".to_string());
                debug!(code = %field.code, "Converted accumulated radiation to flux");
            }
            units => {
                debug!(code = %field.code, units = ?units, "Radiation already a flux, leaving as is");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field(code: &str, units: &str) -> CanonicalField {
        CanonicalField::new(
            code,
            vec![NaiveDate::from_ymd_opt(2020, 6, 1).unwrap()],
            vec![80.0, 70.0],
            vec![0.0, 10.0],
            vec![3600.0, 7200.0, 0.0, f32::NAN],
        )
        .unwrap()
        .with_units(units)
    }

    #[test]
    fn test_units_match() {
        assert!(is_joules_per_square_metre("J m**-2"));
        assert!(is_joules_per_square_metre("J m-2"));
        assert!(is_joules_per_square_metre("J m^-2"));
        assert!(!is_joules_per_square_metre("W m**-2"));
    }

    #[test]
    fn test_radiation_converted() {
        let mut f = field("rsds", "J m**-2");
        Era5::new().adjust(&mut f).unwrap();
        assert_eq!(&f.values[..3], &[1.0, 2.0, 0.0]);
        assert!(f.values[3].is_nan());
        assert_eq!(f.units.as_deref(), Some("W m-2"));
    }

    #[test]
    fn test_other_fields_untouched() {
        let mut flux = field("rlds", "W m-2");
        Era5::new().adjust(&mut flux).unwrap();
        assert_eq!(flux.values[0], 3600.0);

        let mut temperature = field("tas", "J m**-2");
        Era5::new().adjust(&mut temperature).unwrap();
        assert_eq!(temperature.values[0], 3600.0);
    }

    #[test]
    fn test_msl_pressure() {
        let spec = Era5::new().catalog().resolve("psl", None).unwrap();
        assert_eq!(spec.archive_id, "mean_sea_level_pressure");
        assert_eq!(spec.dataset, SINGLE_LEVELS);
    }
}
