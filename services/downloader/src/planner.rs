//! Request planning: which archive requests a download still needs.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::{Datelike, NaiveDate};
use grid_processor::{raw_dates, read_dates, HemisphereRegion, RawFormat};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::catalog::VariableSpec;
use crate::error::{PipelineError, Result};
use crate::layout::Layout;
use crate::product::{check_dates, Product};

/// How requested dates are grouped into archive requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Chunking {
    #[default]
    Year,
    Month,
}

impl FromStr for Chunking {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "year" | "yearly" => Ok(Self::Year),
            "month" | "monthly" => Ok(Self::Month),
            other => Err(PipelineError::config(format!("unknown chunking '{}'", other))),
        }
    }
}

/// Sorted, distinct dates fetched by one archive request. All dates fall
/// in one calendar year (and one month when chunking by month).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateChunk {
    year: i32,
    month: Option<u32>,
    dates: Vec<NaiveDate>,
}

impl DateChunk {
    /// A year chunk. `dates` must be non-empty and within one year.
    pub fn new(mut dates: Vec<NaiveDate>) -> Self {
        dates.sort();
        dates.dedup();
        let year = dates.first().map(|d| d.year()).unwrap_or_default();
        Self {
            year,
            month: None,
            dates,
        }
    }

    /// Group `dates` into chunks, ordered chronologically.
    pub fn partition(dates: &[NaiveDate], chunking: Chunking) -> Vec<DateChunk> {
        let mut groups: BTreeMap<(i32, Option<u32>), BTreeSet<NaiveDate>> = BTreeMap::new();
        for date in dates {
            let month = match chunking {
                Chunking::Year => None,
                Chunking::Month => Some(date.month()),
            };
            groups.entry((date.year(), month)).or_default().insert(*date);
        }

        groups
            .into_iter()
            .map(|((year, month), dates)| DateChunk {
                year,
                month,
                dates: dates.into_iter().collect(),
            })
            .collect()
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn dates(&self) -> &[NaiveDate] {
        &self.dates
    }

    pub fn first(&self) -> Option<NaiveDate> {
        self.dates.first().copied()
    }

    pub fn last(&self) -> Option<NaiveDate> {
        self.dates.last().copied()
    }

    pub fn len(&self) -> usize {
        self.dates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }

    /// Distinct months, ascending.
    pub fn months(&self) -> Vec<u32> {
        let months: BTreeSet<u32> = self.dates.iter().map(|d| d.month()).collect();
        months.into_iter().collect()
    }

    /// Distinct days of the month, ascending.
    pub fn days(&self) -> Vec<u32> {
        let days: BTreeSet<u32> = self.dates.iter().map(|d| d.day()).collect();
        days.into_iter().collect()
    }

    /// File-name key: `2020` or `2020_03`.
    pub fn key(&self) -> String {
        match self.month {
            Some(month) => format!("{}_{:02}", self.year, month),
            None => self.year.to_string(),
        }
    }

    /// The same chunk restricted to dates for which `keep` holds.
    pub fn restrict(&self, keep: impl Fn(&NaiveDate) -> bool) -> DateChunk {
        DateChunk {
            year: self.year,
            month: self.month,
            dates: self.dates.iter().copied().filter(|d| keep(d)).collect(),
        }
    }
}

impl fmt::Display for DateChunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.first(), self.last()) {
            (Some(first), Some(last)) => write!(f, "{}..{}", first, last),
            _ => write!(f, "{} (empty)", self.key()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    InFlight,
    Done,
    Failed,
}

/// One archive call producing one raw file.
#[derive(Debug, Clone, Serialize)]
pub struct DownloadRequest {
    pub variable: VariableSpec,
    pub chunk: DateChunk,
    pub region: HemisphereRegion,
    /// Raw file written by the download.
    pub destination: PathBuf,
    pub status: RequestStatus,
}

impl DownloadRequest {
    pub fn new(variable: VariableSpec, chunk: DateChunk, region: HemisphereRegion, destination: PathBuf) -> Self {
        Self {
            variable,
            chunk,
            region,
            destination,
            status: RequestStatus::Pending,
        }
    }
}

impl fmt::Display for DownloadRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.variable, self.chunk)
    }
}

/// Outcome of planning.
#[derive(Debug, Default)]
pub struct Plan {
    /// Requests to send to the archive.
    pub requests: Vec<DownloadRequest>,
    /// Chunks whose raw file is already on disk but not yet normalised.
    pub pending_postprocess: Vec<DownloadRequest>,
    /// Chunks already fully present in canonical or regridded output.
    pub satisfied: Vec<DownloadRequest>,
}

impl Plan {
    /// Number of (variable, chunk) units the plan covers.
    pub fn total(&self) -> usize {
        self.requests.len() + self.pending_postprocess.len() + self.satisfied.len()
    }
}

/// Turns a download request into the archive calls it still needs.
pub struct Planner<'a> {
    product: &'a dyn Product,
    layout: &'a Layout,
    format: RawFormat,
    chunking: Chunking,
}

impl<'a> Planner<'a> {
    pub fn new(product: &'a dyn Product, layout: &'a Layout, format: RawFormat) -> Self {
        Self {
            product,
            layout,
            format,
            chunking: Chunking::default(),
        }
    }

    pub fn with_chunking(mut self, chunking: Chunking) -> Self {
        self.chunking = chunking;
        self
    }

    /// Resolve (variable, level) pairs through the product catalog,
    /// dropping repeated pairs.
    pub fn resolve(&self, variables: &[String], levels: &[Option<String>]) -> Result<Vec<VariableSpec>> {
        if variables.len() != levels.len() {
            return Err(PipelineError::config(format!(
                "{} variables but {} levels",
                variables.len(),
                levels.len()
            )));
        }

        let mut specs: Vec<VariableSpec> = Vec::with_capacity(variables.len());
        for (code, level) in variables.iter().zip(levels) {
            let spec = self.product.catalog().resolve(code, level.as_deref())?;
            if !specs.contains(&spec) {
                specs.push(spec);
            }
        }
        Ok(specs)
    }

    #[instrument(skip_all, fields(product = %self.product.identifier(), hemisphere = %region.hemisphere))]
    pub fn plan(
        &self,
        variables: &[String],
        levels: &[Option<String>],
        dates: &[NaiveDate],
        region: &HemisphereRegion,
    ) -> Result<Plan> {
        let specs = self.resolve(variables, levels)?;
        if specs.is_empty() {
            return Err(PipelineError::config("no variables requested"));
        }
        if dates.is_empty() {
            return Err(PipelineError::config("no dates requested"));
        }
        check_dates(self.product, dates)?;

        let chunks = DateChunk::partition(dates, self.chunking);
        let hemisphere = region.hemisphere;
        let mut plan = Plan::default();

        for spec in &specs {
            let mut present: HashMap<i32, BTreeSet<NaiveDate>> = HashMap::new();

            for chunk in &chunks {
                let year_present = present.entry(chunk.year()).or_insert_with(|| {
                    let mut dates = existing_dates(&self.layout.canonical_path(hemisphere, spec, chunk.year()));
                    dates.extend(existing_dates(&self.layout.regridded_path(hemisphere, spec, chunk.year())));
                    dates
                });

                let missing = chunk.restrict(|d| !year_present.contains(d));
                let destination = self.layout.raw_path(hemisphere, spec, chunk, self.format);

                if missing.is_empty() {
                    debug!(variable = %spec, chunk = %chunk, "Already present");
                    let mut request = DownloadRequest::new(spec.clone(), chunk.clone(), *region, destination);
                    request.status = RequestStatus::Done;
                    plan.satisfied.push(request);
                    continue;
                }

                let request = DownloadRequest::new(spec.clone(), missing, *region, destination);
                if raw_holds(&request.destination, request.chunk.dates()) {
                    debug!(variable = %spec, chunk = %request.chunk, "Raw file on disk, pending postprocessing");
                    plan.pending_postprocess.push(DownloadRequest {
                        status: RequestStatus::Done,
                        ..request
                    });
                } else {
                    plan.requests.push(request);
                }
            }
        }

        info!(
            variables = specs.len(),
            chunks = chunks.len(),
            requests = plan.requests.len(),
            pending_postprocess = plan.pending_postprocess.len(),
            satisfied = plan.satisfied.len(),
            "Planned downloads"
        );
        Ok(plan)
    }
}

/// Dates on the time axis of an existing output, empty if absent or
/// unreadable.
fn existing_dates(path: &Path) -> BTreeSet<NaiveDate> {
    if !path.exists() {
        return BTreeSet::new();
    }
    match read_dates(path) {
        Ok(dates) => dates.into_iter().collect(),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Ignoring unreadable output");
            BTreeSet::new()
        }
    }
}

/// Whether a raw file is on disk and holds every one of `dates`. A raw
/// file left over from an earlier, shorter request is fetched again.
fn raw_holds(path: &Path, dates: &[NaiveDate]) -> bool {
    if !path.exists() {
        return false;
    }
    match raw_dates(path) {
        Ok(held) => dates.iter().all(|d| held.contains(d)),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Unreadable raw file, fetching again");
            false
        }
    }
}
