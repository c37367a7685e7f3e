//! Report merging: left-join the label mapping onto a report CSV, appending
//! exactly one column per row.
//!
//! The mapping is held in memory; the source report streams through row by
//! row, so output order always equals input order.

use crate::{
    required_column, PipelineResult, MAPPING_ID_COLUMN, MAPPING_LABEL_COLUMN, PROGRESS_EVERY,
};
use csv_async::{AsyncReaderBuilder, AsyncWriterBuilder, ByteRecord};
use std::collections::HashMap;
use std::time::Instant;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, info, warn};

/// Column names and the not-found sentinel for one merge run.
#[derive(Debug, Clone)]
pub struct MergeOptions {
    /// Image-id column in the source report.
    pub id_column: String,
    /// Header name of the appended column.
    pub label_column: String,
    /// Value written when an image id has no mapping entry.
    pub sentinel: String,
}

impl Default for MergeOptions {
    fn default() -> Self {
        Self {
            id_column: "Image ID".into(),
            label_column: "Maintainer".into(),
            sentinel: String::new(),
        }
    }
}

/// Counters for one merge pass.
#[derive(Debug, Default)]
pub struct MergeSummary {
    /// Rows written to the merged output.
    pub rows: u64,
    /// Rows whose image id had a mapping entry.
    pub matched: u64,
    /// Source rows skipped for a field-count mismatch, never written.
    pub skipped: u64,
}

/// Load the whole mapping CSV into the in-memory join index.
///
/// Requires the fixed `Image ID`/`Label` header. Duplicate ids: the last row
/// wins. Rows missing either field are ignored with a warning.
pub async fn load_mapping<R>(reader: R) -> PipelineResult<HashMap<String, String>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let mut rdr = AsyncReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .buffer_capacity(1 << 20)
        .create_reader(reader);

    let headers = rdr.headers().await?.clone();
    let id_idx = required_column(&headers, MAPPING_ID_COLUMN)?;
    let label_idx = required_column(&headers, MAPPING_LABEL_COLUMN)?;

    let mut mapping = HashMap::new();
    let mut record = ByteRecord::new();
    let mut row = 0u64;
    while rdr.read_byte_record(&mut record).await? {
        row += 1;
        match (utf8(record.get(id_idx)), utf8(record.get(label_idx))) {
            (Some(id), Some(label)) => {
                mapping.insert(id.to_string(), label.to_string());
            }
            _ => warn!(row, "mapping row is missing a field; ignoring"),
        }
    }
    info!(entries = mapping.len(), "mapping loaded");
    Ok(mapping)
}

/// Stream `source`, appending the mapped label (or the sentinel) to every
/// well-formed row.
///
/// Non-appended fields pass through byte-identical; no row is reordered or
/// duplicated. Malformed rows are skipped and counted, never written.
pub async fn merge_reports<R, W>(
    source: R,
    mapping: &HashMap<String, String>,
    writer: W,
    opts: &MergeOptions,
) -> PipelineResult<MergeSummary>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin,
{
    let mut rdr = AsyncReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .buffer_capacity(1 << 20)
        .create_reader(source);

    let headers = rdr.headers().await?.clone();
    let id_idx = required_column(&headers, &opts.id_column)?;
    let width = headers.len();

    let mut wtr = AsyncWriterBuilder::new().create_writer(writer);
    let mut out_headers = headers.clone();
    out_headers.push_field(&opts.label_column);
    wtr.write_record(&out_headers).await?;

    let mut summary = MergeSummary::default();
    let started = Instant::now();
    let mut record = ByteRecord::new();
    let mut read = 0u64;

    while rdr.read_byte_record(&mut record).await? {
        read += 1;
        if read % PROGRESS_EVERY == 0 {
            info!(
                rows = read,
                matched = summary.matched,
                elapsed = ?started.elapsed(),
                "merging report"
            );
        }
        if record.len() != width {
            summary.skipped += 1;
            debug!(
                row = read,
                fields = record.len(),
                expected = width,
                "skipping malformed row"
            );
            continue;
        }

        let image_id = utf8(record.get(id_idx)).unwrap_or("");
        let label = match mapping.get(image_id) {
            Some(label) => {
                summary.matched += 1;
                label.as_str()
            }
            None => opts.sentinel.as_str(),
        };
        record.push_field(label.as_bytes());
        wtr.write_byte_record(&record).await?;
        summary.rows += 1;
    }

    wtr.flush().await?;
    info!(
        rows = summary.rows,
        matched = summary.matched,
        skipped = summary.skipped,
        elapsed = ?started.elapsed(),
        "merge complete"
    );
    Ok(summary)
}

fn utf8(field: Option<&[u8]>) -> Option<&str> {
    field.and_then(|f| std::str::from_utf8(f).ok())
}
