//! Post-processing pipeline for container-image CSV report exports.
//!
//! Three stages, each its own binary, communicating only through files:
//! - `fetch`: request an on-demand CSV export from the reporting API, poll the
//!   job and extract the gzipped artifact.
//! - `extract`: scan a report for one label key inside the JSON-encoded
//!   labels column and write an image-id to label-value mapping CSV.
//! - `merge`: left-join that mapping back onto a report, appending one column.
//!
//! Inputs may be plain CSV or gzipped (`.gz`); rows stream as
//! `csv_async::ByteRecord` so only the fields a stage needs are decoded.

mod extract;
mod io;
mod merge;
pub mod sysdig;

pub use crate::extract::{
    extract_labels, write_mapping, ExtractOptions, ExtractSummary, LabelMapping,
};
pub use crate::io::{gunzip_file, reader_from_path};
pub use crate::merge::{load_mapping, merge_reports, MergeOptions, MergeSummary};

use std::path::PathBuf;
use thiserror::Error;

/// Fixed schema of the mapping CSV written by `extract` and read by `merge`.
pub const MAPPING_ID_COLUMN: &str = "Image ID";
pub const MAPPING_LABEL_COLUMN: &str = "Label";

/// Row interval for progress logging in the streaming passes.
pub(crate) const PROGRESS_EVERY: u64 = 10_000;

/// Error type returned by this crate when not using `anyhow`.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("File not found: {}", .0.display())]
    FileNotFound(PathBuf),
    #[error("Missing required column: {0}")]
    MissingColumn(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Csv(#[from] csv_async::Error),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error("API error {0}: {1}")]
    Api(u16, String),
    #[error("Report {0} not found in available reports (try --list)")]
    ReportNotFound(i64),
    #[error("Report job {0} failed")]
    JobFailed(String),
    #[error("Timed out waiting for report job {0}")]
    JobTimeout(String),
    #[error("Report job {0} completed without a download path")]
    NoArtifact(String),
}

pub type PipelineResult<T> = std::result::Result<T, PipelineError>;

/// Resolve a required header name to its column index.
pub(crate) fn required_column(
    headers: &csv_async::StringRecord,
    name: &str,
) -> PipelineResult<usize> {
    headers
        .iter()
        .position(|h| h == name)
        .ok_or_else(|| PipelineError::MissingColumn(name.to_string()))
}
