//! Reanalysis downloader.
//!
//! Downloads variables from the Climate Data Store with:
//! - Bounded concurrent archive requests
//! - Resumable runs (work already on disk is skipped)
//! - Daily normalisation into per-year canonical Zarr stores
//! - Regridding onto EASE-Grid 2.0

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::Parser;
use grid_processor::GridProcessorConfig;
use projection::Hemisphere;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

use downloader::config::{parse_variable_args, GridSettings};
use downloader::{CdsClient, CdsConfig, Chunking, ClimateDownloader, JobConfig, ProductKind};

#[derive(Parser, Debug)]
#[command(name = "downloader")]
#[command(about = "Download reanalysis variables and regrid them onto EASE-Grid 2.0")]
struct Args {
    /// Job configuration file; replaces the job flags below
    #[arg(long, env = "JOB_CONFIG")]
    config: Option<PathBuf>,

    /// Data product
    #[arg(long, default_value = "carra")]
    product: ProductKind,

    /// Comma-separated variable codes
    #[arg(long)]
    vars: Option<String>,

    /// Comma-separated levels per variable, `|`-separated within a variable
    #[arg(long)]
    levels: Option<String>,

    #[arg(long)]
    start_date: Option<NaiveDate>,

    #[arg(long)]
    end_date: Option<NaiveDate>,

    #[arg(long, default_value = "north")]
    hemisphere: Hemisphere,

    /// Maximum concurrent archive requests
    #[arg(long, default_value = "4")]
    workers: usize,

    /// Destination grid cell size in km
    #[arg(long, default_value = "25")]
    resolution: f64,

    /// Group requests by month instead of by year
    #[arg(long)]
    monthly: bool,

    #[arg(long, env = "OUTPUT_DIR", default_value = "data")]
    output_dir: PathBuf,

    /// Only process raw files already on disk
    #[arg(short = 'n', long)]
    do_not_download: bool,

    /// Leave downloaded raw files unprocessed
    #[arg(short = 'p', long)]
    do_not_postprocess: bool,

    #[arg(long)]
    do_not_regrid: bool,

    /// Keep raw files after postprocessing
    #[arg(long)]
    keep_temp_files: bool,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Args {
    fn job_config(&self) -> Result<JobConfig> {
        if let Some(path) = &self.config {
            return JobConfig::load(path);
        }

        let vars = self.vars.as_deref().context("--vars is required without --config")?;
        let config = JobConfig {
            product: self.product,
            output_dir: self.output_dir.clone(),
            hemisphere: self.hemisphere,
            start_date: self.start_date.context("--start-date is required without --config")?,
            end_date: self.end_date.context("--end-date is required without --config")?,
            variables: parse_variable_args(vars, self.levels.as_deref())?,
            max_concurrency: self.workers,
            chunking: if self.monthly { Chunking::Month } else { Chunking::Year },
            delete_temp_files: !self.keep_temp_files,
            download: !self.do_not_download,
            postprocess: !self.do_not_postprocess,
            regrid: !self.do_not_regrid,
            grid: GridSettings {
                resolution_km: self.resolution,
                ..GridSettings::default()
            },
        };
        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment from .env file if present
    dotenvy::dotenv().ok();

    let args = Args::parse();

    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .with_thread_ids(true)
        .json()
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    #[cfg(feature = "netcdf")]
    grid_processor::format::silence_hdf5_errors();

    let job = args.job_config()?;
    info!(
        product = %job.product,
        hemisphere = %job.hemisphere,
        start = %job.start_date,
        end = %job.end_date,
        "Starting reanalysis downloader"
    );

    let processor_config = GridProcessorConfig::from_env();
    processor_config.validate()?;

    let client = Arc::new(CdsClient::new(CdsConfig::from_env()?)?);
    let cancel = CancellationToken::new();

    // Ctrl+C stops the worker pool; finished downloads are kept
    let cancel_on_signal = cancel.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Received shutdown signal");
        cancel_on_signal.cancel();
    });

    let downloader = ClimateDownloader::new(job.product.create(), client, &job.output_dir)
        .with_chunking(job.chunking)
        .with_processor_config(processor_config)
        .with_cancellation(cancel.clone());

    if job.download || job.postprocess {
        let report = downloader.download(&job.download_job()).await?;
        for failure in &report.failed {
            error!(
                variable = %failure.variable,
                level = ?failure.level,
                first = ?failure.first,
                last = ?failure.last,
                stage = %failure.stage,
                error = %failure.error,
                "Request failed"
            );
        }
        info!(report = %serde_json::to_string(&report)?, "Download report");
    }

    if job.regrid && !cancel.is_cancelled() {
        let report = downloader.regrid(&job.grid_config())?;
        info!(report = %serde_json::to_string(&report)?, "Regrid report");
    }

    Ok(())
}
