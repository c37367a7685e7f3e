//! File openers for report inputs and artifact extraction.
//!
//! Exports arrive gzip-compressed from the reporting API; readers sniff the
//! `.gz` extension and decompress transparently so every stage accepts either
//! the extracted report or the archive itself.

use crate::{PipelineError, PipelineResult};
use async_compression::tokio::bufread::GzipDecoder;
use std::path::Path;
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncWriteExt, BufReader};

/// Open `path`, mapping the not-found case to an error that names the path.
async fn open_file(path: &Path) -> PipelineResult<File> {
    match File::open(path).await {
        Ok(f) => Ok(f),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(PipelineError::FileNotFound(path.to_path_buf()))
        }
        Err(e) => Err(e.into()),
    }
}

/// Build a CSV-ready reader from a local path, gunzipping `.gz` files.
pub async fn reader_from_path(path: &Path) -> PipelineResult<impl AsyncRead + Unpin + Send> {
    let file = open_file(path).await?;
    // Larger buffer reduces syscalls on multi-gigabyte exports
    let buf = BufReader::with_capacity(1 << 20, file);

    let is_gzip = path.extension().and_then(|s| s.to_str()) == Some("gz");
    let reader: Box<dyn AsyncRead + Unpin + Send> = if is_gzip {
        tracing::debug!(path = %path.display(), "reading through gzip decoder");
        Box::new(GzipDecoder::new(buf))
    } else {
        Box::new(buf)
    };
    Ok(reader)
}

/// Decompress a gzip archive to `dst`, returning the decompressed byte count.
pub async fn gunzip_file(src: &Path, dst: &Path) -> PipelineResult<u64> {
    let archive = open_file(src).await?;
    let mut decoder = GzipDecoder::new(BufReader::with_capacity(1 << 20, archive));
    let mut out = File::create(dst).await?;
    let written = tokio::io::copy(&mut decoder, &mut out).await?;
    out.flush().await?;
    Ok(written)
}
