//! Label extraction: scan a report CSV for one label key and build the
//! image-id to label-value mapping.
//!
//! The labels column carries a JSON object per row, e.g.
//! `{"MAINTAINER":"team-a@example.com","team":"payments"}`. Only non-empty
//! string values count as a match; rows without the key emit no mapping entry.

use crate::{
    required_column, PipelineResult, MAPPING_ID_COLUMN, MAPPING_LABEL_COLUMN, PROGRESS_EVERY,
};
use csv_async::{AsyncReaderBuilder, AsyncWriterBuilder, ByteRecord};
use linked_hash_map::LinkedHashMap;
use std::time::Instant;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, info};

/// Image id to label value, iterated in first-seen order. Duplicate ids
/// resolve to the last-seen value without moving the row.
pub type LabelMapping = LinkedHashMap<String, String>;

/// Column names and the target key for one extraction run.
#[derive(Debug, Clone)]
pub struct ExtractOptions {
    pub id_column: String,
    pub labels_column: String,
    pub label_key: String,
    /// Stop after this many data rows (sampling large exports).
    pub limit: Option<u64>,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            id_column: "Image ID".into(),
            labels_column: "Container Labels".into(),
            label_key: "MAINTAINER".into(),
            limit: None,
        }
    }
}

/// Counters for one extraction pass.
#[derive(Debug, Default)]
pub struct ExtractSummary {
    /// Data rows scanned.
    pub rows: u64,
    /// Rows where the target key held a non-empty string value.
    pub matched: u64,
    /// Rows with a blank id, an empty or unparsable labels cell, or no key.
    pub unmatched: u64,
    /// Rows skipped for a field-count mismatch against the header.
    pub skipped: u64,
}

/// One streaming pass over a report: collect `opts.label_key` per image id.
///
/// Fails up front if the id or labels column is missing from the header.
/// Malformed rows are skipped and counted, never fatal.
pub async fn extract_labels<R>(
    reader: R,
    opts: &ExtractOptions,
) -> PipelineResult<(LabelMapping, ExtractSummary)>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let mut rdr = AsyncReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .buffer_capacity(1 << 20)
        .create_reader(reader);

    let headers = rdr.headers().await?.clone();
    let id_idx = required_column(&headers, &opts.id_column)?;
    let labels_idx = required_column(&headers, &opts.labels_column)?;
    let width = headers.len();

    let mut mapping = LabelMapping::new();
    let mut summary = ExtractSummary::default();
    let started = Instant::now();
    let mut record = ByteRecord::new();

    while rdr.read_byte_record(&mut record).await? {
        if let Some(limit) = opts.limit {
            if summary.rows >= limit {
                break;
            }
        }
        summary.rows += 1;
        if summary.rows % PROGRESS_EVERY == 0 {
            info!(rows = summary.rows, elapsed = ?started.elapsed(), "scanning report");
        }

        if record.len() != width {
            summary.skipped += 1;
            debug!(
                row = summary.rows,
                fields = record.len(),
                expected = width,
                "skipping malformed row"
            );
            continue;
        }

        let image_id = str_field(&record, id_idx).trim();
        if image_id.is_empty() {
            summary.unmatched += 1;
            continue;
        }

        match label_value(str_field(&record, labels_idx).trim(), &opts.label_key) {
            Some(value) => {
                summary.matched += 1;
                // Keep the first-seen position, take the last-seen value.
                if let Some(slot) = mapping.get_mut(image_id) {
                    *slot = value;
                } else {
                    mapping.insert(image_id.to_string(), value);
                }
            }
            None => summary.unmatched += 1,
        }
    }

    info!(
        rows = summary.rows,
        matched = summary.matched,
        unmatched = summary.unmatched,
        skipped = summary.skipped,
        unique = mapping.len(),
        elapsed = ?started.elapsed(),
        "extraction complete"
    );
    Ok((mapping, summary))
}

/// Decode one field as UTF-8; missing or non-UTF-8 fields read as empty.
fn str_field(record: &ByteRecord, idx: usize) -> &str {
    record
        .get(idx)
        .map(|f| std::str::from_utf8(f).unwrap_or(""))
        .unwrap_or("")
}

/// Pull `key` out of a JSON-object labels cell. Non-object cells, non-string
/// values and empty strings yield no match.
fn label_value(cell: &str, key: &str) -> Option<String> {
    if cell.is_empty() {
        return None;
    }
    let labels: serde_json::Value = serde_json::from_str(cell).ok()?;
    labels
        .get(key)?
        .as_str()
        .filter(|v| !v.is_empty())
        .map(|v| v.to_string())
}

/// Write the mapping as the fixed two-column CSV consumed by `merge`.
pub async fn write_mapping<W>(mapping: &LabelMapping, writer: W) -> PipelineResult<()>
where
    W: AsyncWrite + Unpin,
{
    let mut wtr = AsyncWriterBuilder::new().create_writer(writer);
    wtr.write_record(&[MAPPING_ID_COLUMN, MAPPING_LABEL_COLUMN])
        .await?;
    for (image_id, label) in mapping.iter() {
        wtr.write_record(&[image_id.as_str(), label.as_str()]).await?;
    }
    wtr.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn label_value_finds_string_keys() {
        let cell = r#"{"MAINTAINER":"team-a@example.com","team":"payments"}"#;
        assert_eq!(
            label_value(cell, "MAINTAINER").as_deref(),
            Some("team-a@example.com")
        );
        assert_eq!(label_value(cell, "team").as_deref(), Some("payments"));
    }

    #[test]
    fn label_value_rejects_non_matches() {
        assert_eq!(label_value("", "team"), None);
        assert_eq!(label_value("{}", "team"), None);
        assert_eq!(label_value("not json", "team"), None);
        assert_eq!(label_value(r#"{"team":42}"#, "team"), None);
        assert_eq!(label_value(r#"{"team":""}"#, "team"), None);
        assert_eq!(label_value(r#"["team"]"#, "team"), None);
    }

    #[test]
    fn duplicate_ids_keep_first_position_and_last_value() {
        let mut mapping = LabelMapping::new();
        for (id, value) in [("img-1", "a"), ("img-2", "b"), ("img-1", "c")] {
            if let Some(slot) = mapping.get_mut(id) {
                *slot = value.to_string();
            } else {
                mapping.insert(id.to_string(), value.to_string());
            }
        }
        let rows: Vec<_> = mapping
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        assert_eq!(rows, vec![("img-1", "c"), ("img-2", "b")]);
    }
}
