//! NetCDF reading via the system netCDF/HDF5 libraries.

use std::path::Path;
use std::sync::Once;

use tracing::debug;

use crate::dataset::{Dataset, Variable};
use crate::error::{GridProcessorError, Result};

const NUMERIC_ATTRS: &[&str] = &["_FillValue", "missing_value", "scale_factor", "add_offset"];
const STRING_ATTRS: &[&str] = &["units", "calendar", "long_name", "standard_name"];

/// Silence HDF5's automatic error printing to stderr.
///
/// HDF5 prints diagnostics even for lookups the Rust side handles, such as
/// probing optional attributes. Safe to call repeatedly.
pub fn silence_hdf5_errors() {
    static INIT: Once = Once::new();

    INIT.call_once(|| {
        // SAFETY: H5Eset_auto2 with null handlers is the documented way to
        // disable automatic error printing.
        unsafe {
            hdf5_metno_sys::h5e::H5Eset_auto2(
                hdf5_metno_sys::h5e::H5E_DEFAULT,
                None,
                std::ptr::null_mut(),
            );
        }
    });
}

/// Read every numeric variable of a NetCDF file.
pub fn read_netcdf(path: &Path) -> Result<Dataset> {
    silence_hdf5_errors();

    let file = netcdf::open(path).map_err(|e| {
        GridProcessorError::UnsupportedFormat(format!("failed to open {}: {}", path.display(), e))
    })?;

    let mut dataset = Dataset::new();
    for var in file.variables() {
        let name = var.name();
        let dims: Vec<String> = var.dimensions().iter().map(|d| d.name()).collect();
        let shape: Vec<usize> = var.dimensions().iter().map(|d| d.len()).collect();

        // Non-numeric variables (e.g. string labels) carry nothing we use
        let values: Vec<f64> = match var.get_values(..) {
            Ok(values) => values,
            Err(e) => {
                debug!(variable = %name, error = %e, "Skipping unreadable variable");
                continue;
            }
        };

        let mut variable = Variable::new(dims, shape, values)?;
        for key in NUMERIC_ATTRS {
            if let Some(value) = get_f64_attr(&var, key) {
                variable.attrs.insert(key.to_string(), serde_json::json!(value));
            }
        }
        for key in STRING_ATTRS {
            if let Some(value) = get_str_attr(&var, key) {
                variable.attrs.insert(key.to_string(), serde_json::json!(value));
            }
        }
        dataset.insert(&name, variable)?;
    }

    Ok(dataset)
}

fn has_attr(var: &netcdf::Variable, name: &str) -> bool {
    var.attributes().any(|attr| attr.name() == name)
}

fn get_f64_attr(var: &netcdf::Variable, name: &str) -> Option<f64> {
    if !has_attr(var, name) {
        return None;
    }
    let attr_value = var.attribute_value(name)?.ok()?;
    f64::try_from(attr_value).ok()
}

fn get_str_attr(var: &netcdf::Variable, name: &str) -> Option<String> {
    if !has_attr(var, name) {
        return None;
    }
    match var.attribute_value(name)?.ok()? {
        netcdf::AttributeValue::Str(s) => Some(s),
        _ => None,
    }
}
