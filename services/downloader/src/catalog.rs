//! Variable catalog: internal variable codes to archive identifiers.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};

/// A fully resolved variable, ready to be requested from the archive.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VariableSpec {
    /// Short internal code, e.g. `tas` or `ta`.
    pub code: String,
    /// Pressure level in hPa for pressure-level variables.
    pub level: Option<String>,
    /// Archive variable name, e.g. `2m_temperature`.
    pub archive_id: String,
    /// Archive dataset the variable is requested from.
    pub dataset: String,
}

impl VariableSpec {
    /// Code with the level appended (`ta500`), used to name files and the
    /// data variable of canonical and regridded outputs.
    pub fn qualified_code(&self) -> String {
        match &self.level {
            Some(level) => format!("{}{}", self.code, level),
            None => self.code.clone(),
        }
    }
}

impl fmt::Display for VariableSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.qualified_code())
    }
}

/// Single-level and pressure-level variable tables of one data product.
#[derive(Debug, Clone)]
pub struct VariableCatalog {
    single_level_dataset: String,
    pressure_level_dataset: String,
    single_level: BTreeMap<String, String>,
    pressure_level: BTreeMap<String, String>,
}

impl VariableCatalog {
    pub fn new(single_level_dataset: impl Into<String>, pressure_level_dataset: impl Into<String>) -> Self {
        Self {
            single_level_dataset: single_level_dataset.into(),
            pressure_level_dataset: pressure_level_dataset.into(),
            single_level: BTreeMap::new(),
            pressure_level: BTreeMap::new(),
        }
    }

    pub fn with_single_level(mut self, code: &str, archive_id: &str) -> Self {
        self.single_level.insert(code.to_string(), archive_id.to_string());
        self
    }

    pub fn with_pressure_level(mut self, code: &str, archive_id: &str) -> Self {
        self.pressure_level.insert(code.to_string(), archive_id.to_string());
        self
    }

    pub fn single_level_codes(&self) -> impl Iterator<Item = &str> {
        self.single_level.keys().map(String::as_str)
    }

    pub fn pressure_level_codes(&self) -> impl Iterator<Item = &str> {
        self.pressure_level.keys().map(String::as_str)
    }

    /// Resolve `code`, optionally at a pressure `level` in hPa.
    pub fn resolve(&self, code: &str, level: Option<&str>) -> Result<VariableSpec> {
        let level = level.map(str::trim).filter(|l| !l.is_empty());

        let (table, dataset) = match level {
            Some(_) => (&self.pressure_level, &self.pressure_level_dataset),
            None => (&self.single_level, &self.single_level_dataset),
        };

        let archive_id = table.get(code).ok_or_else(|| {
            PipelineError::config(match level {
                Some(level) => format!("unknown pressure-level variable '{}' (level {})", code, level),
                None => format!("unknown single-level variable '{}'", code),
            })
        })?;

        if let Some(level) = level {
            match level.parse::<u32>() {
                Ok(hpa) if hpa > 0 && hpa <= 1000 => {}
                _ => {
                    return Err(PipelineError::config(format!(
                        "invalid pressure level '{}' for '{}'",
                        level, code
                    )))
                }
            }
        }

        Ok(VariableSpec {
            code: code.to_string(),
            level: level.map(str::to_string),
            archive_id: archive_id.clone(),
            dataset: dataset.clone(),
        })
    }
}
