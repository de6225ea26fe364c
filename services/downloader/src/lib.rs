//! Reanalysis download orchestration.
//!
//! Turns a declarative request (variables, levels, dates, hemisphere) into
//! bounded concurrent archive fetches, normalises each response into
//! per-year canonical daily files and regrids those onto EASE-Grid 2.0.
//!
//! ```text
//! VariableCatalog ──► Planner ──► WorkerPool ──► Postprocessor ──► Regridder
//!   (per Product)     (skips        (Fetch via     (grid-processor)  (grid-processor)
//!                      outputs       ArchiveClient)
//!                      on disk)
//! ```
//!
//! [`ClimateDownloader`] composes these behind `download()` and `regrid()`.

pub mod catalog;
pub mod client;
pub mod config;
pub mod error;
pub mod layout;
pub mod orchestrator;
pub mod planner;
pub mod pool;
pub mod product;

pub use catalog::{VariableCatalog, VariableSpec};
pub use client::{ArchiveClient, CdsClient, CdsConfig};
pub use config::{JobConfig, VariableConfig};
pub use error::{DownloadError, PipelineError, Result};
pub use layout::Layout;
pub use orchestrator::{ClimateDownloader, DownloadJob, DownloadReport, FailureRecord, RegridReport};
pub use planner::{Chunking, DateChunk, DownloadRequest, Plan, Planner, RequestStatus};
pub use pool::{Fetch, PoolOutcome, WorkerPool};
pub use product::{Carra, Era5, Product, ProductKind};
