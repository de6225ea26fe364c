//! Download and regrid operations over one data product.
//!
//! `download()` plans the archive requests still needed, runs them through
//! the worker pool, and normalises each downloaded file into per-year
//! canonical files once the pool has drained. `regrid()` moves every
//! canonical file onto the destination grid. Both are idempotent: state is
//! read back from the output directory, so a rerun after a partial
//! failure only repeats what is missing.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use grid_processor::{
    CanonicalFile, GridConfig, GridProcessorConfig, HemisphereRegion, Postprocessor, Regridder,
};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::client::ArchiveClient;
use crate::error::{DownloadError, PipelineError, Result};
use crate::layout::{regridded_for, Layout};
use crate::planner::{Chunking, DownloadRequest, Planner};
use crate::pool::{Fetch, WorkerPool};
use crate::product::{Product, ProductPolicy};

/// Parameters of one `download()` call.
#[derive(Debug, Clone)]
pub struct DownloadJob {
    pub variables: Vec<String>,
    /// One entry per variable; `None` for single-level variables.
    pub levels: Vec<Option<String>>,
    pub dates: Vec<NaiveDate>,
    pub region: HemisphereRegion,
    pub max_concurrency: usize,
    /// Remove raw files once they have been normalised.
    pub delete_temp_files: bool,
    /// Fetch from the archive. When off, only raw files already on disk
    /// are processed.
    pub download: bool,
    /// Normalise downloaded files into canonical files.
    pub postprocess: bool,
}

impl DownloadJob {
    pub fn new(variables: Vec<String>, levels: Vec<Option<String>>, dates: Vec<NaiveDate>, region: HemisphereRegion) -> Self {
        Self {
            variables,
            levels,
            dates,
            region,
            max_concurrency: 4,
            delete_temp_files: true,
            download: true,
            postprocess: true,
        }
    }
}

/// A unit of work that did not complete.
#[derive(Debug, Clone, Serialize)]
pub struct FailureRecord {
    pub variable: String,
    pub level: Option<String>,
    pub first: Option<NaiveDate>,
    pub last: Option<NaiveDate>,
    /// `download` or `postprocess`
    pub stage: String,
    pub error: String,
}

impl FailureRecord {
    fn new(request: &DownloadRequest, stage: &str, error: impl ToString) -> Self {
        Self {
            variable: request.variable.code.clone(),
            level: request.variable.level.clone(),
            first: request.chunk.first(),
            last: request.chunk.last(),
            stage: stage.to_string(),
            error: error.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DownloadReport {
    /// (variable, date chunk) units covered by the request.
    pub requested: usize,
    pub succeeded: usize,
    pub failed: Vec<FailureRecord>,
    /// Units already present, or left alone because downloading was off.
    pub skipped: usize,
    pub cancelled: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct RegridFailure {
    pub path: PathBuf,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RegridReport {
    pub discovered: usize,
    pub regridded: usize,
    /// Outputs already current for this grid and source.
    pub skipped: usize,
    pub failed: Vec<RegridFailure>,
}

/// Bridges the worker pool to the archive client.
struct ArchiveFetch<'a> {
    product: &'a dyn Product,
    client: &'a dyn ArchiveClient,
}

#[async_trait]
impl<'a> Fetch for ArchiveFetch<'a> {
    async fn fetch(&self, request: &DownloadRequest, target: &Path) -> std::result::Result<(), DownloadError> {
        let query = self.product.build_query(
            &request.variable,
            &request.chunk,
            &request.region,
            self.client.raw_format(),
        );
        let bytes = self
            .client
            .retrieve(&request.variable.dataset, &query, target)
            .await?;
        debug!(request = %request, bytes, "Archive response written");
        Ok(())
    }
}

/// Download and regrid front end for one data product.
pub struct ClimateDownloader {
    product: Arc<dyn Product>,
    client: Arc<dyn ArchiveClient>,
    layout: Layout,
    chunking: Chunking,
    processor_config: GridProcessorConfig,
    cancel: CancellationToken,
}

impl ClimateDownloader {
    pub fn new(product: Arc<dyn Product>, client: Arc<dyn ArchiveClient>, output_dir: impl Into<PathBuf>) -> Self {
        let layout = Layout::new(output_dir, product.identifier());
        Self {
            product,
            client,
            layout,
            chunking: Chunking::default(),
            processor_config: GridProcessorConfig::default(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_chunking(mut self, chunking: Chunking) -> Self {
        self.chunking = chunking;
        self
    }

    pub fn with_processor_config(mut self, config: GridProcessorConfig) -> Self {
        self.processor_config = config;
        self
    }

    /// Cancelling `token` stops the worker pool of a running download.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn product(&self) -> &dyn Product {
        self.product.as_ref()
    }

    #[instrument(skip_all, fields(product = %self.product.identifier(), hemisphere = %job.region.hemisphere))]
    pub async fn download(&self, job: &DownloadJob) -> Result<DownloadReport> {
        let pool = WorkerPool::new(job.max_concurrency)?.with_cancellation(self.cancel.clone());
        self.processor_config
            .validate()
            .map_err(PipelineError::from)?;

        let format = self.client.raw_format();
        if job.postprocess && !format.is_readable() {
            return Err(PipelineError::config(format!(
                "archive responses are {} but this build cannot read them (enable the `netcdf` feature)",
                format.extension()
            )));
        }

        let plan = Planner::new(self.product.as_ref(), &self.layout, format)
            .with_chunking(self.chunking)
            .plan(&job.variables, &job.levels, &job.dates, &job.region)?;

        let mut report = DownloadReport {
            requested: plan.total(),
            skipped: plan.satisfied.len(),
            ..Default::default()
        };

        let mut downloaded = Vec::new();
        if job.download {
            let fetch = ArchiveFetch {
                product: self.product.as_ref(),
                client: self.client.as_ref(),
            };
            let outcome = pool.run(plan.requests, &fetch).await;
            report.cancelled = outcome.cancelled.len();
            report.failed.extend(
                outcome
                    .failed
                    .iter()
                    .map(|(request, e)| FailureRecord::new(request, "download", e)),
            );
            downloaded = outcome.succeeded;
        } else if !plan.requests.is_empty() {
            info!(count = plan.requests.len(), "Downloading disabled, leaving requests unfetched");
            report.skipped += plan.requests.len();
        }

        downloaded.extend(plan.pending_postprocess);

        if !job.postprocess {
            report.succeeded = downloaded.len();
        } else if !self.cancel.is_cancelled() {
            for request in &downloaded {
                match self.postprocess(request) {
                    Ok(files) => {
                        report.succeeded += 1;
                        metrics::counter!("downloader_postprocess_total", "outcome" => "succeeded").increment(1);
                        debug!(request = %request, files = files.len(), "Normalised");
                        if job.delete_temp_files {
                            remove_raw(&request.destination);
                        }
                    }
                    Err(e) => {
                        metrics::counter!("downloader_postprocess_total", "outcome" => "failed").increment(1);
                        error!(
                            variable = %request.variable,
                            first = ?request.chunk.first(),
                            last = ?request.chunk.last(),
                            error = %e,
                            "Postprocessing failed"
                        );
                        report.failed.push(FailureRecord::new(request, "postprocess", &e));
                        if job.delete_temp_files {
                            remove_raw(&request.destination);
                        }
                    }
                }
            }
        } else {
            // Raw files stay on disk and are picked up as pending next run
            warn!(count = downloaded.len(), "Cancelled, skipping postprocessing");
            report.cancelled += downloaded.len();
        }

        info!(
            requested = report.requested,
            succeeded = report.succeeded,
            failed = report.failed.len(),
            skipped = report.skipped,
            cancelled = report.cancelled,
            "Download finished"
        );

        let attempted = report.succeeded + report.failed.len();
        if attempted > 0 && report.succeeded == 0 {
            return Err(PipelineError::TotalFailure {
                operation: "download".to_string(),
                attempted,
            });
        }
        Ok(report)
    }

    fn postprocess(&self, request: &DownloadRequest) -> Result<Vec<CanonicalFile>> {
        let auxiliary = self.product.auxiliary_variables();
        let postprocessor = Postprocessor::new(auxiliary.as_slice());
        let hemisphere = request.region.hemisphere;
        let files = postprocessor.normalize_into(
            &request.destination,
            &request.variable.qualified_code(),
            Some(request.chunk.dates()),
            |year| self.layout.canonical_path(hemisphere, &request.variable, year),
            &self.processor_config,
        )?;
        Ok(files)
    }

    /// Regrid every canonical file of the grid's hemisphere.
    #[instrument(skip_all, fields(
        product = %self.product.identifier(),
        hemisphere = %grid.hemisphere(),
        resolution_km = grid.resolution_km
    ))]
    pub fn regrid(&self, grid: &GridConfig) -> Result<RegridReport> {
        let regridder = Regridder::new(*grid, self.processor_config.clone())?;
        let policy = ProductPolicy(self.product.as_ref());
        let sources = self.layout.discover_canonical(grid.hemisphere());

        let mut report = RegridReport {
            discovered: sources.len(),
            ..Default::default()
        };

        for source in sources {
            match self.regrid_one(&regridder, &policy, &source) {
                Ok(true) => {
                    report.regridded += 1;
                    metrics::counter!("regrid_files_total", "outcome" => "regridded").increment(1);
                }
                Ok(false) => {
                    report.skipped += 1;
                    metrics::counter!("regrid_files_total", "outcome" => "skipped").increment(1);
                    debug!(path = %source.display(), "Regridded output is current");
                }
                Err(e) => {
                    metrics::counter!("regrid_files_total", "outcome" => "failed").increment(1);
                    error!(path = %source.display(), error = %e, "Regridding failed");
                    report.failed.push(RegridFailure {
                        path: source,
                        error: e.to_string(),
                    });
                }
            }
        }

        info!(
            discovered = report.discovered,
            regridded = report.regridded,
            skipped = report.skipped,
            failed = report.failed.len(),
            "Regrid finished"
        );

        let attempted = report.regridded + report.failed.len();
        if attempted > 0 && report.regridded == 0 {
            return Err(PipelineError::TotalFailure {
                operation: "regrid".to_string(),
                attempted,
            });
        }
        Ok(report)
    }

    /// Returns whether a new output was written.
    fn regrid_one(&self, regridder: &Regridder, policy: &ProductPolicy<'_>, source: &Path) -> Result<bool> {
        let dest = regridded_for(source)
            .ok_or_else(|| PipelineError::Schema(format!("{} is not a canonical file", source.display())))?;
        let code = source
            .parent()
            .and_then(|dir| dir.file_name())
            .and_then(|name| name.to_str())
            .ok_or_else(|| PipelineError::Schema(format!("{} has no variable directory", source.display())))?;

        let revision = CanonicalFile::read_revision(source, code)?;
        if regridder.is_current_revision(&dest, code, &revision, policy) {
            return Ok(false);
        }

        let canonical = CanonicalFile::open(source)?;
        regridder.regrid(&canonical, policy, &dest)?;
        Ok(true)
    }
}

fn remove_raw(path: &Path) {
    if let Err(e) = grid_processor::format::remove_path(path) {
        warn!(path = %path.display(), error = %e, "Failed to remove raw file");
    }
}
