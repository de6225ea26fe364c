//! Remote archive client.
//!
//! [`CdsClient`] speaks the Copernicus Climate Data Store retrieve API:
//! - submit a job for a dataset with a JSON query
//! - poll the job with exponential back-off until it settles
//! - stream the result asset to disk and verify its size

use std::path::Path;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::StreamExt;
use grid_processor::RawFormat;
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, instrument, warn};

use crate::error::{DownloadError, PipelineError};

const TOKEN_HEADER: &str = "PRIVATE-TOKEN";

/// Fetches one query from the archive into a local path.
#[async_trait]
pub trait ArchiveClient: Send + Sync {
    /// Format of the files written by [`ArchiveClient::retrieve`].
    fn raw_format(&self) -> RawFormat;

    /// Run `query` against `dataset` and write the response to `target`.
    /// Returns the number of bytes written.
    async fn retrieve(&self, dataset: &str, query: &Value, target: &Path) -> Result<u64, DownloadError>;
}

/// Connection settings for the Climate Data Store.
#[derive(Debug, Clone)]
pub struct CdsConfig {
    /// API root, e.g. `https://cds.climate.copernicus.eu/api`
    pub url: String,
    /// Personal access token
    pub key: String,
    /// First delay between job status polls
    pub poll_min: Duration,
    /// Longest delay between job status polls
    pub poll_max: Duration,
    /// HTTP request timeout
    pub request_timeout: Duration,
    /// Longest time a job may stay queued or running before it is given up
    pub max_wait: Duration,
}

impl CdsConfig {
    pub fn new(url: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            url: url.into().trim_end_matches('/').to_string(),
            key: key.into(),
            poll_min: Duration::from_secs(1),
            poll_max: Duration::from_secs(120),
            request_timeout: Duration::from_secs(3600),
            max_wait: Duration::from_secs(24 * 3600),
        }
    }

    /// Credentials from `CDSAPI_URL`/`CDSAPI_KEY`, falling back to
    /// `~/.cdsapirc`.
    pub fn from_env() -> Result<Self, PipelineError> {
        let mut url = std::env::var("CDSAPI_URL").ok();
        let mut key = std::env::var("CDSAPI_KEY").ok();

        if url.is_none() || key.is_none() {
            if let Some(home) = std::env::var_os("HOME") {
                let rc = Path::new(&home).join(".cdsapirc");
                if let Ok(content) = std::fs::read_to_string(&rc) {
                    debug!(path = %rc.display(), "Reading archive credentials");
                    let (rc_url, rc_key) = parse_rc(&content);
                    url = url.or(rc_url);
                    key = key.or(rc_key);
                }
            }
        }

        match (url, key) {
            (Some(url), Some(key)) => Ok(Self::new(url, key)),
            _ => Err(PipelineError::config(
                "archive credentials missing: set CDSAPI_URL and CDSAPI_KEY or create ~/.cdsapirc",
            )),
        }
    }
}

/// `url:` and `key:` entries of a `.cdsapirc` file.
pub fn parse_rc(content: &str) -> (Option<String>, Option<String>) {
    let mut url = None;
    let mut key = None;
    for line in content.lines() {
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim().to_string();
        match name.trim() {
            "url" => url = Some(value),
            "key" => key = Some(value),
            _ => {}
        }
    }
    (url, key)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
enum JobStatus {
    Accepted,
    Running,
    Successful,
    Failed,
    Rejected,
    Dismissed,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize)]
struct JobInfo {
    #[serde(rename = "jobID")]
    job_id: String,
    status: JobStatus,
}

#[derive(Debug, Deserialize)]
struct Asset {
    href: String,
    #[serde(rename = "file:size")]
    size: Option<u64>,
}

/// Classify an archive failure message.
fn classify_failure(message: &str) -> DownloadError {
    let lower = message.to_lowercase();
    if lower.contains("no data") || lower.contains("none of the data") || lower.contains("not available") {
        DownloadError::NoData(message.to_string())
    } else {
        DownloadError::Archive(message.to_string())
    }
}

/// Human-readable message from an archive error document.
fn error_message(doc: &Value) -> String {
    let title = doc.get("title").and_then(Value::as_str);
    let detail = doc
        .get("detail")
        .and_then(Value::as_str)
        .or_else(|| doc.pointer("/traceback").and_then(Value::as_str));
    match (title, detail) {
        (Some(title), Some(detail)) => format!("{}: {}", title, detail),
        (Some(msg), None) | (None, Some(msg)) => msg.to_string(),
        (None, None) => doc.to_string(),
    }
}

/// Error for a non-success response, keeping the archive's message when
/// the body is an error document and the raw body otherwise.
fn failure_from_body(status: StatusCode, body: &str) -> DownloadError {
    let message = serde_json::from_str::<Value>(body)
        .map(|doc| error_message(&doc))
        .unwrap_or_else(|_| body.trim().to_string());
    classify_failure(&format!("HTTP {}: {}", status, message))
}

/// Exponential poll delays bounded by an overall deadline.
#[derive(Debug)]
struct Backoff {
    delay: Duration,
    max: Duration,
    deadline: Instant,
}

impl Backoff {
    fn new(config: &CdsConfig) -> Self {
        Self {
            delay: config.poll_min,
            max: config.poll_max,
            deadline: Instant::now() + config.max_wait,
        }
    }

    /// Delay before the next poll, or `None` once the deadline has passed.
    fn next_delay(&mut self) -> Option<Duration> {
        let remaining = self.deadline.checked_duration_since(Instant::now())?;
        if remaining.is_zero() {
            return None;
        }
        let delay = self.delay.min(remaining);
        self.delay = std::cmp::min(self.delay * 2, self.max);
        Some(delay)
    }
}

/// Climate Data Store client.
pub struct CdsClient {
    client: Client,
    config: CdsConfig,
}

impl CdsClient {
    pub fn new(config: CdsConfig) -> Result<Self, PipelineError> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .connect_timeout(Duration::from_secs(30))
            .pool_max_idle_per_host(4)
            .tcp_nodelay(true)
            .build()
            .map_err(|e| PipelineError::config(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self { client, config })
    }

    fn jobs_url(&self, job_id: &str) -> String {
        format!("{}/retrieve/v1/jobs/{}", self.config.url, job_id)
    }

    /// Fail on non-success status, keeping the archive's error message.
    async fn check(response: Response) -> Result<Response, DownloadError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(failure_from_body(status, &body))
    }

    async fn submit(&self, dataset: &str, query: &Value) -> Result<JobInfo, DownloadError> {
        let url = format!(
            "{}/retrieve/v1/processes/{}/execution",
            self.config.url, dataset
        );
        let response = self
            .client
            .post(&url)
            .header(TOKEN_HEADER, &self.config.key)
            .json(&json!({ "inputs": query }))
            .send()
            .await?;
        Ok(Self::check(response).await?.json().await?)
    }

    async fn status(&self, job_id: &str) -> Result<JobStatus, DownloadError> {
        let response = self
            .client
            .get(self.jobs_url(job_id))
            .header(TOKEN_HEADER, &self.config.key)
            .send()
            .await?;
        let info: JobInfo = Self::check(response).await?.json().await?;
        Ok(info.status)
    }

    async fn results(&self, job_id: &str) -> Result<Value, DownloadError> {
        let response = self
            .client
            .get(format!("{}/results", self.jobs_url(job_id)))
            .header(TOKEN_HEADER, &self.config.key)
            .send()
            .await?;
        Ok(Self::check(response).await?.json().await?)
    }

    /// Poll until the job settles, backing off between polls.
    async fn wait(&self, job: JobInfo) -> Result<(), DownloadError> {
        let mut status = job.status;
        let mut backoff = Backoff::new(&self.config);

        loop {
            match status {
                JobStatus::Successful => return Ok(()),
                JobStatus::Failed => {
                    let doc = self.results(&job.job_id).await?;
                    return Err(classify_failure(&error_message(&doc)));
                }
                JobStatus::Rejected | JobStatus::Dismissed => {
                    return Err(DownloadError::Archive(format!(
                        "job {} {:?}",
                        job.job_id, status
                    )));
                }
                JobStatus::Accepted | JobStatus::Running | JobStatus::Unknown => {
                    let Some(delay) = backoff.next_delay() else {
                        warn!(job = %job.job_id, status = ?status, "Gave up waiting for job");
                        return Err(DownloadError::Archive(format!(
                            "job {} still {:?} after {}s",
                            job.job_id,
                            status,
                            self.config.max_wait.as_secs()
                        )));
                    };
                    debug!(job = %job.job_id, status = ?status, delay_secs = delay.as_secs(), "Waiting for job");
                    tokio::time::sleep(delay).await;
                    status = self.status(&job.job_id).await?;
                }
            }
        }
    }

    /// Stream `href` to `target`, returning the number of bytes written.
    async fn stream_to_file(&self, href: &str, target: &Path) -> Result<u64, DownloadError> {
        let response = Self::check(self.client.get(href).send().await?).await?;

        let mut file = File::create(target).await?;
        let mut stream = response.bytes_stream();
        let mut written = 0u64;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }

        file.flush().await?;
        file.sync_all().await?;
        Ok(written)
    }
}

#[async_trait]
impl ArchiveClient for CdsClient {
    fn raw_format(&self) -> RawFormat {
        RawFormat::Netcdf
    }

    #[instrument(skip(self, query, target), fields(target = %target.display()))]
    async fn retrieve(&self, dataset: &str, query: &Value, target: &Path) -> Result<u64, DownloadError> {
        let job = self.submit(dataset, query).await?;
        let job_id = job.job_id.clone();
        info!(job = %job_id, "Submitted archive request");

        self.wait(job).await?;

        let results = self.results(&job_id).await?;
        let asset: Asset = serde_json::from_value(results.pointer("/asset/value").cloned().unwrap_or(Value::Null))
            .map_err(|e| DownloadError::Archive(format!("job {} has no result asset: {}", job_id, e)))?;

        let written = self.stream_to_file(&asset.href, target).await?;
        if let Some(expected) = asset.size {
            if written != expected {
                warn!(job = %job_id, expected, written, "Download size mismatch");
                return Err(DownloadError::Archive(format!(
                    "download size mismatch: expected {} bytes, got {}",
                    expected, written
                )));
            }
        }

        info!(job = %job_id, bytes = written, "Download completed");
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_rc() {
        let (url, key) = parse_rc("url: https://cds.example/api\nkey: abc-123\n# comment\n");
        assert_eq!(url.as_deref(), Some("https://cds.example/api"));
        assert_eq!(key.as_deref(), Some("abc-123"));

        let (url, key) = parse_rc("verify: 0\n");
        assert!(url.is_none() && key.is_none());
    }

    #[test]
    fn test_config_trims_url() {
        let config = CdsConfig::new("https://cds.example/api/", "k");
        assert_eq!(config.url, "https://cds.example/api");
        assert!(config.poll_min < config.poll_max);
    }

    #[test]
    fn test_classify_failure() {
        assert!(matches!(
            classify_failure("None of the data you have requested is available yet"),
            DownloadError::NoData(_)
        ));
        assert!(matches!(classify_failure("No data found for request"), DownloadError::NoData(_)));
        assert!(matches!(
            classify_failure("Required licences not accepted"),
            DownloadError::Archive(_)
        ));
    }

    #[test]
    fn test_error_message() {
        let doc = json!({"type": "x", "title": "The job has failed", "detail": "no data available"});
        assert_eq!(error_message(&doc), "The job has failed: no data available");
        assert_eq!(error_message(&json!({"title": "Oops"})), "Oops");
    }

    #[test]
    fn test_failure_from_body() {
        let err = failure_from_body(StatusCode::BAD_GATEWAY, "<html>upstream timed out</html>\n");
        match err {
            DownloadError::Archive(msg) => {
                assert_eq!(msg, "HTTP 502 Bad Gateway: <html>upstream timed out</html>")
            }
            other => panic!("unexpected {:?}", other),
        }

        let body = r#"{"title": "The job has failed", "detail": "None of the data you have requested is available yet"}"#;
        assert!(matches!(
            failure_from_body(StatusCode::BAD_REQUEST, body),
            DownloadError::NoData(_)
        ));
    }

    #[test]
    fn test_backoff_doubles_up_to_max() {
        let mut config = CdsConfig::new("https://cds.example/api", "k");
        config.poll_min = Duration::from_secs(1);
        config.poll_max = Duration::from_secs(4);
        let mut backoff = Backoff::new(&config);
        let delays: Vec<u64> = (0..4).map(|_| backoff.next_delay().unwrap().as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 4]);
    }

    #[test]
    fn test_backoff_stops_at_deadline() {
        let mut config = CdsConfig::new("https://cds.example/api", "k");
        config.max_wait = Duration::ZERO;
        assert!(Backoff::new(&config).next_delay().is_none());

        // Never sleeps past the deadline
        config.max_wait = Duration::from_millis(50);
        config.poll_min = Duration::from_secs(10);
        let delay = Backoff::new(&config).next_delay().unwrap();
        assert!(delay <= Duration::from_millis(50));
    }

    #[test]
    fn test_job_status_parse() {
        let info: JobInfo = serde_json::from_value(json!({"jobID": "j1", "status": "running"})).unwrap();
        assert_eq!(info.status, JobStatus::Running);
        let info: JobInfo = serde_json::from_value(json!({"jobID": "j1", "status": "paused"})).unwrap();
        assert_eq!(info.status, JobStatus::Unknown);
    }

    #[test]
    fn test_asset_parse() {
        let results = json!({"asset": {"value": {"href": "https://x/y.nc", "file:size": 42}}});
        let asset: Asset = serde_json::from_value(results.pointer("/asset/value").cloned().unwrap()).unwrap();
        assert_eq!(asset.size, Some(42));
        assert_eq!(asset.href, "https://x/y.nc");
    }
}
