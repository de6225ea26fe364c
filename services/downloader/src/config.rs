//! Job configuration.
//!
//! A job is described by a YAML file (see `config/carra_north.yaml`) or by
//! the equivalent command-line flags.

use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::NaiveDate;
use grid_processor::{GridConfig, HemisphereRegion};
use projection::{EaseGrid, Hemisphere};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{PipelineError, Result};
use crate::orchestrator::DownloadJob;
use crate::planner::Chunking;
use crate::product::ProductKind;

/// Root of a job YAML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfig {
    pub product: ProductKind,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    pub hemisphere: Hemisphere,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub variables: Vec<VariableConfig>,
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    #[serde(default)]
    pub chunking: Chunking,
    #[serde(default = "default_true")]
    pub delete_temp_files: bool,
    #[serde(default = "default_true")]
    pub download: bool,
    #[serde(default = "default_true")]
    pub postprocess: bool,
    #[serde(default = "default_true")]
    pub regrid: bool,
    #[serde(default)]
    pub grid: GridSettings,
}

/// A variable and the pressure levels it is wanted on. No levels means
/// the single-level variable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableConfig {
    pub code: String,
    #[serde(default)]
    pub levels: Vec<String>,
}

/// Destination grid settings.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct GridSettings {
    #[serde(default = "default_resolution_km")]
    pub resolution_km: f64,
    #[serde(default = "default_half_extent_km")]
    pub half_extent_km: f64,
}

impl Default for GridSettings {
    fn default() -> Self {
        Self {
            resolution_km: default_resolution_km(),
            half_extent_km: default_half_extent_km(),
        }
    }
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_max_concurrency() -> usize {
    4
}

fn default_true() -> bool {
    true
}

fn default_resolution_km() -> f64 {
    25.0
}

fn default_half_extent_km() -> f64 {
    EaseGrid::DEFAULT_HALF_EXTENT_KM
}

impl JobConfig {
    /// Load and validate a job configuration from a YAML file.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: JobConfig = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        config
            .validate()
            .with_context(|| format!("Invalid config file: {}", path.display()))?;

        debug!(product = %config.product, path = %path.display(), "Loaded job config");
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.variables.is_empty() {
            return Err(PipelineError::config("no variables configured"));
        }
        if self.end_date < self.start_date {
            return Err(PipelineError::config(format!(
                "end date {} is before start date {}",
                self.end_date, self.start_date
            )));
        }
        if self.max_concurrency < 1 {
            return Err(PipelineError::config("max_concurrency must be at least 1"));
        }
        self.grid_config().ease_grid()?;
        Ok(())
    }

    /// Every day from start to end, inclusive.
    pub fn dates(&self) -> Vec<NaiveDate> {
        self.start_date
            .iter_days()
            .take_while(|d| *d <= self.end_date)
            .collect()
    }

    /// One (code, level) pair per configured level, or a single-level pair
    /// for variables without levels.
    pub fn variable_pairs(&self) -> (Vec<String>, Vec<Option<String>>) {
        let mut codes = Vec::new();
        let mut levels = Vec::new();
        for variable in &self.variables {
            if variable.levels.is_empty() {
                codes.push(variable.code.clone());
                levels.push(None);
            }
            for level in &variable.levels {
                codes.push(variable.code.clone());
                levels.push(Some(level.clone()));
            }
        }
        (codes, levels)
    }

    pub fn region(&self) -> HemisphereRegion {
        HemisphereRegion::new(self.hemisphere)
    }

    pub fn grid_config(&self) -> GridConfig {
        GridConfig {
            resolution_km: self.grid.resolution_km,
            half_extent_km: self.grid.half_extent_km,
            region: self.region(),
        }
    }

    pub fn download_job(&self) -> DownloadJob {
        let (variables, levels) = self.variable_pairs();
        DownloadJob {
            variables,
            levels,
            dates: self.dates(),
            region: self.region(),
            max_concurrency: self.max_concurrency,
            delete_temp_files: self.delete_temp_files,
            download: self.download,
            postprocess: self.postprocess,
        }
    }
}

/// Parse the command-line variable list.
///
/// `vars` is comma-separated. `levels`, when given, has one comma-separated
/// entry per variable holding `|`-separated levels, empty for a
/// single-level variable: `--vars tas,ta --levels ",500|850"`.
pub fn parse_variable_args(vars: &str, levels: Option<&str>) -> Result<Vec<VariableConfig>> {
    let codes: Vec<&str> = vars.split(',').map(str::trim).collect();
    if codes.iter().any(|c| c.is_empty()) {
        return Err(PipelineError::config(format!("malformed variable list '{}'", vars)));
    }

    let per_variable: Vec<&str> = match levels {
        Some(levels) => levels.split(',').collect(),
        None => vec![""; codes.len()],
    };
    if per_variable.len() != codes.len() {
        return Err(PipelineError::config(format!(
            "{} variables but {} level entries",
            codes.len(),
            per_variable.len()
        )));
    }

    Ok(codes
        .into_iter()
        .zip(per_variable)
        .map(|(code, levels)| VariableConfig {
            code: code.to_string(),
            levels: levels
                .split('|')
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(str::to_string)
                .collect(),
        })
        .collect())
}
