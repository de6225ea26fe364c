//! Bounded-concurrency execution of download requests.
//!
//! Every request downloads into a private sibling of its destination and
//! is renamed into place only on success, so a failed or cancelled
//! request never leaves a file that a later run would take for a
//! completed download.

use std::path::Path;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use grid_processor::format::{replace_path, sibling_path};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::error::{DownloadError, PipelineError, Result};
use crate::planner::{DownloadRequest, RequestStatus};

/// Performs a single download, writing to `target`.
#[async_trait]
pub trait Fetch: Send + Sync {
    async fn fetch(&self, request: &DownloadRequest, target: &Path) -> std::result::Result<(), DownloadError>;
}

/// Results of one pool run.
#[derive(Debug, Default)]
pub struct PoolOutcome {
    pub succeeded: Vec<DownloadRequest>,
    pub failed: Vec<(DownloadRequest, DownloadError)>,
    /// Requests abandoned or never started because of cancellation.
    pub cancelled: Vec<DownloadRequest>,
}

impl PoolOutcome {
    /// Requests that were started and ran to an outcome.
    pub fn attempted(&self) -> usize {
        self.succeeded.len() + self.failed.len()
    }
}

/// Runs download requests with at most `max_concurrency` in flight.
///
/// There is no retry: a failed request is reported and the caller decides
/// whether to run it again.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    max_concurrency: usize,
    cancel: CancellationToken,
}

impl WorkerPool {
    pub fn new(max_concurrency: usize) -> Result<Self> {
        if max_concurrency < 1 {
            return Err(PipelineError::config("max_concurrency must be at least 1"));
        }
        Ok(Self {
            max_concurrency,
            cancel: CancellationToken::new(),
        })
    }

    /// Share a cancellation token with the caller.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    /// Stop starting new requests and abandon those in flight.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    #[instrument(skip_all, fields(requests = requests.len(), max_concurrency = self.max_concurrency))]
    pub async fn run(&self, requests: Vec<DownloadRequest>, fetch: &dyn Fetch) -> PoolOutcome {
        let results: Vec<(DownloadRequest, std::result::Result<(), DownloadError>)> = stream::iter(requests)
            .map(|request| self.execute(request, fetch))
            .buffer_unordered(self.max_concurrency)
            .collect()
            .await;

        let mut outcome = PoolOutcome::default();
        for (request, result) in results {
            match result {
                Ok(()) => outcome.succeeded.push(request),
                Err(DownloadError::Cancelled) => outcome.cancelled.push(request),
                Err(e) => outcome.failed.push((request, e)),
            }
        }

        info!(
            succeeded = outcome.succeeded.len(),
            failed = outcome.failed.len(),
            cancelled = outcome.cancelled.len(),
            "Worker pool drained"
        );
        outcome
    }

    async fn execute(
        &self,
        mut request: DownloadRequest,
        fetch: &dyn Fetch,
    ) -> (DownloadRequest, std::result::Result<(), DownloadError>) {
        if self.cancel.is_cancelled() {
            debug!(request = %request, "Cancelled before start");
            metrics::counter!("downloader_requests_total", "outcome" => "cancelled").increment(1);
            return (request, Err(DownloadError::Cancelled));
        }

        request.status = RequestStatus::InFlight;
        let partial = sibling_path(&request.destination, "partial");
        debug!(request = %request, partial = %partial.display(), "Starting download");

        let result = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(DownloadError::Cancelled),
            result = Self::download(&request, &partial, fetch) => result,
        };

        match &result {
            Ok(()) => {
                request.status = RequestStatus::Done;
                metrics::counter!("downloader_requests_total", "outcome" => "succeeded").increment(1);
                info!(request = %request, path = %request.destination.display(), "Downloaded");
            }
            Err(e) => {
                request.status = RequestStatus::Failed;
                remove_any(&partial).await;
                if e.is_cancelled() {
                    metrics::counter!("downloader_requests_total", "outcome" => "cancelled").increment(1);
                    warn!(request = %request, "Download abandoned");
                } else {
                    metrics::counter!("downloader_requests_total", "outcome" => "failed").increment(1);
                    error!(
                        variable = %request.variable,
                        first = ?request.chunk.first(),
                        last = ?request.chunk.last(),
                        error = %e,
                        "Download failed"
                    );
                }
            }
        }
        (request, result)
    }

    async fn download(
        request: &DownloadRequest,
        partial: &Path,
        fetch: &dyn Fetch,
    ) -> std::result::Result<(), DownloadError> {
        if let Some(parent) = request.destination.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        fetch.fetch(request, partial).await?;
        if tokio::fs::metadata(partial).await.is_err() {
            return Err(DownloadError::Archive(format!(
                "{}: download produced no file",
                request
            )));
        }
        // An older raw file for the same chunk is replaced, not merged
        let (src, dest) = (partial.to_path_buf(), request.destination.clone());
        tokio::task::spawn_blocking(move || replace_path(&src, &dest))
            .await
            .map_err(|e| DownloadError::Io(std::io::Error::other(e)))??;
        Ok(())
    }
}

/// Remove a file or directory tree, ignoring absence.
async fn remove_any(path: &Path) {
    let result = match tokio::fs::metadata(path).await {
        Ok(meta) if meta.is_dir() => tokio::fs::remove_dir_all(path).await,
        Ok(_) => tokio::fs::remove_file(path).await,
        Err(_) => return,
    };
    if let Err(e) = result {
        warn!(path = %path.display(), error = %e, "Failed to remove partial download");
    }
}
