//! In-process archive used by the integration tests.

#![allow(dead_code)]

use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::NaiveDate;
use downloader::{ArchiveClient, DownloadError, DownloadJob};
use grid_processor::{HemisphereRegion, RawFormat};
use projection::Hemisphere;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use test_utils::{hemisphere_axes, write_raw_zarr, RawSpec};

/// Grid spacing of the synthetic responses, in degrees.
pub const STEP_DEG: f64 = 10.0;
/// Samples per day in the synthetic responses.
pub const STEPS_PER_DAY: u32 = 4;

/// One call received by the mock.
#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    pub dataset: String,
    pub variable: String,
    pub year: String,
    pub months: Vec<String>,
    pub level: Option<String>,
}

/// Writes synthetic hourly Zarr stores for every query it receives.
#[derive(Default)]
pub struct MockArchive {
    calls: Mutex<Vec<Call>>,
    count: AtomicUsize,
    /// Archive variable ids that fail with an archive error.
    fail: HashSet<String>,
    /// Archive variable ids for which the archive has no data.
    no_data: HashSet<String>,
    /// Cancel this token on the first call, then never answer.
    hang_and_cancel: Option<CancellationToken>,
    units: Option<String>,
    format: Option<RawFormat>,
}

impl MockArchive {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(mut self, archive_id: &str) -> Self {
        self.fail.insert(archive_id.to_string());
        self
    }

    pub fn without_data(mut self, archive_id: &str) -> Self {
        self.no_data.insert(archive_id.to_string());
        self
    }

    pub fn hanging(mut self, cancel: CancellationToken) -> Self {
        self.hang_and_cancel = Some(cancel);
        self
    }

    pub fn with_units(mut self, units: &str) -> Self {
        self.units = Some(units.to_string());
        self
    }

    /// Declare a response format other than Zarr. Responses are still
    /// written as Zarr.
    pub fn producing(mut self, format: RawFormat) -> Self {
        self.format = Some(format);
        self
    }

    pub fn call_count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().expect("Failed to lock calls").clone()
    }
}

fn strings(value: &Value) -> Vec<String> {
    value
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

/// Dates named by the month and day lists of a query.
fn query_dates(query: &Value) -> Vec<NaiveDate> {
    let year: i32 = strings(&query["year"])[0].parse().expect("Failed to parse year");
    let mut dates = Vec::new();
    for month in strings(&query["month"]) {
        for day in strings(&query["day"]) {
            let month: u32 = month.parse().expect("Failed to parse month");
            let day: u32 = day.parse().expect("Failed to parse day");
            if let Some(date) = NaiveDate::from_ymd_opt(year, month, day) {
                dates.push(date);
            }
        }
    }
    dates
}

#[async_trait]
impl ArchiveClient for MockArchive {
    fn raw_format(&self) -> RawFormat {
        self.format.unwrap_or(RawFormat::Zarr)
    }

    async fn retrieve(&self, dataset: &str, query: &Value, target: &Path) -> Result<u64, DownloadError> {
        self.count.fetch_add(1, Ordering::SeqCst);
        let variable = strings(&query["variable"])[0].clone();
        let level = strings(&query["pressure_level"]).first().cloned();
        self.calls.lock().expect("Failed to lock calls").push(Call {
            dataset: dataset.to_string(),
            variable: variable.clone(),
            year: strings(&query["year"])[0].clone(),
            months: strings(&query["month"]),
            level: level.clone(),
        });

        if let Some(cancel) = &self.hang_and_cancel {
            std::fs::write(target, b"partial").expect("Failed to write partial file");
            cancel.cancel();
            std::future::pending::<()>().await;
        }
        if self.no_data.contains(&variable) {
            return Err(DownloadError::NoData(format!("no data for {}", variable)));
        }

        let area: Vec<f64> = query["area"]
            .as_array()
            .expect("Failed to read area")
            .iter()
            .filter_map(Value::as_f64)
            .collect();
        let north = area[2] >= 0.0;
        let (latitude, longitude) = hemisphere_axes(north, STEP_DEG);

        let mut spec = RawSpec::new("var", query_dates(query), latitude, longitude)
            .with_steps_per_day(STEPS_PER_DAY);
        if let Some(level) = &level {
            spec = spec.with_level(level.parse().expect("Failed to parse level"));
        }
        if let Some(units) = &self.units {
            spec.units = units.clone();
        }
        write_raw_zarr(&spec, target).map_err(|e| DownloadError::Archive(e.to_string()))?;

        if self.fail.contains(&variable) {
            // Leave the half-written response behind, as a dropped
            // connection would
            return Err(DownloadError::Archive(format!("connection reset fetching {}", variable)));
        }
        Ok(0)
    }
}

pub fn ymd(year: i32, month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, day).expect("Failed to build date")
}

/// Surface-only job for the northern hemisphere.
pub fn job(codes: &[&str], dates: Vec<NaiveDate>) -> DownloadJob {
    let mut job = DownloadJob::new(
        codes.iter().map(|c| c.to_string()).collect(),
        vec![None; codes.len()],
        dates,
        HemisphereRegion::new(Hemisphere::North),
    );
    job.max_concurrency = 2;
    job
}

pub fn shared(archive: MockArchive) -> Arc<MockArchive> {
    Arc::new(archive)
}
