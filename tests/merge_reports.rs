use report_pipeline::{
    load_mapping, merge_reports, reader_from_path, MergeOptions, PipelineError,
};
use std::{collections::HashMap, fs::File, io::Write, path::Path};
use tokio::io::AsyncWriteExt;

fn write_lines(path: &Path, lines: &[&str]) -> anyhow::Result<()> {
    let mut f = File::create(path)?;
    for line in lines {
        writeln!(f, "{line}")?;
    }
    Ok(())
}

async fn run_merge(
    source: &Path,
    mapping: &Path,
    output: &Path,
    opts: &MergeOptions,
) -> anyhow::Result<report_pipeline::MergeSummary> {
    let mapping = load_mapping(reader_from_path(mapping).await?).await?;
    let reader = reader_from_path(source).await?;
    let mut out = tokio::fs::File::create(output).await?;
    let summary = merge_reports(reader, &mapping, &mut out, opts).await?;
    out.flush().await?;
    Ok(summary)
}

#[tokio::test]
async fn appends_the_mapped_label_per_row() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let source = dir.path().join("v1-report.csv");
    let mapping = dir.path().join("output.csv");
    let merged = dir.path().join("merged-report.csv");
    write_lines(
        &source,
        &["Image ID,Severity", "img-1,High", "img-3,Low"],
    )?;
    write_lines(&mapping, &["Image ID,Label", "img-1,payments"])?;

    let summary = run_merge(&source, &mapping, &merged, &MergeOptions::default()).await?;

    assert_eq!(summary.rows, 2);
    assert_eq!(summary.matched, 1);
    assert_eq!(summary.skipped, 0);
    assert_eq!(
        std::fs::read_to_string(&merged)?,
        "Image ID,Severity,Maintainer\nimg-1,High,payments\nimg-3,Low,\n"
    );
    Ok(())
}

#[tokio::test]
async fn header_only_mapping_fills_the_sentinel_everywhere() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let source = dir.path().join("v1-report.csv");
    let mapping = dir.path().join("output.csv");
    let merged = dir.path().join("merged-report.csv");
    write_lines(&source, &["Image ID,Severity", "img-1,High", "img-2,Low"])?;
    write_lines(&mapping, &["Image ID,Label"])?;

    let summary = run_merge(&source, &mapping, &merged, &MergeOptions::default()).await?;

    assert_eq!(summary.rows, 2);
    assert_eq!(summary.matched, 0);
    assert_eq!(
        std::fs::read_to_string(&merged)?,
        "Image ID,Severity,Maintainer\nimg-1,High,\nimg-2,Low,\n"
    );
    Ok(())
}

#[tokio::test]
async fn custom_sentinel_and_column_name_are_honored() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let source = dir.path().join("v1-report.csv");
    let mapping = dir.path().join("output.csv");
    let merged = dir.path().join("merged-report.csv");
    write_lines(&source, &["Image ID,Severity", "img-1,High", "img-2,Low"])?;
    write_lines(&mapping, &["Image ID,Label", "img-2,infra"])?;

    let opts = MergeOptions {
        label_column: "Owner".into(),
        sentinel: "N/A".into(),
        ..Default::default()
    };
    run_merge(&source, &mapping, &merged, &opts).await?;

    assert_eq!(
        std::fs::read_to_string(&merged)?,
        "Image ID,Severity,Owner\nimg-1,High,N/A\nimg-2,Low,infra\n"
    );
    Ok(())
}

#[tokio::test]
async fn source_fields_pass_through_untouched() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let source = dir.path().join("v1-report.csv");
    let mapping = dir.path().join("output.csv");
    let merged = dir.path().join("merged-report.csv");
    write_lines(
        &source,
        &[
            "Image ID,Container Labels,Summary",
            r#"img-1,"{""team"":""payments""}","High, fix now""#,
            r#"img-2,,"quote "" inside""#,
        ],
    )?;
    write_lines(&mapping, &["Image ID,Label", "img-1,payments"])?;

    run_merge(&source, &mapping, &merged, &MergeOptions::default()).await?;

    // Quoting and field contents survive byte-for-byte; only the new column is added.
    assert_eq!(
        std::fs::read_to_string(&merged)?,
        concat!(
            "Image ID,Container Labels,Summary,Maintainer\n",
            r#"img-1,"{""team"":""payments""}","High, fix now",payments"#,
            "\n",
            r#"img-2,,"quote "" inside","#,
            "\n",
        )
    );
    Ok(())
}

#[tokio::test]
async fn merging_twice_produces_identical_bytes() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let source = dir.path().join("v1-report.csv");
    let mapping = dir.path().join("output.csv");
    write_lines(
        &source,
        &["Image ID,Severity", "img-1,High", "img-2,Low", "img-3,Medium"],
    )?;
    write_lines(&mapping, &["Image ID,Label", "img-2,infra", "img-3,web"])?;

    let first = dir.path().join("merged-1.csv");
    let second = dir.path().join("merged-2.csv");
    run_merge(&source, &mapping, &first, &MergeOptions::default()).await?;
    run_merge(&source, &mapping, &second, &MergeOptions::default()).await?;

    assert_eq!(std::fs::read(&first)?, std::fs::read(&second)?);
    Ok(())
}

#[tokio::test]
async fn embedded_newlines_and_unicode_pass_through() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let source = dir.path().join("v1-report.csv");
    let mapping = dir.path().join("output.csv");
    let merged = dir.path().join("merged-report.csv");
    std::fs::write(
        &source,
        "Image ID,Summary\nimg-1,\"first line\nsecond line\"\nimg-2,Grüße 漢字\n",
    )?;
    write_lines(&mapping, &["Image ID,Label", "img-1,payments"])?;

    let summary = run_merge(&source, &mapping, &merged, &MergeOptions::default()).await?;

    assert_eq!(summary.rows, 2);
    assert_eq!(
        std::fs::read_to_string(&merged)?,
        "Image ID,Summary,Maintainer\nimg-1,\"first line\nsecond line\",payments\nimg-2,Grüße 漢字,\n"
    );
    Ok(())
}

#[tokio::test]
async fn remerging_output_appends_exactly_one_column() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let source = dir.path().join("v1-report.csv");
    let mapping = dir.path().join("output.csv");
    write_lines(&source, &["Image ID,Severity", "img-1,High"])?;
    write_lines(&mapping, &["Image ID,Label", "img-1,payments"])?;

    let first = dir.path().join("merged-report.csv");
    run_merge(&source, &mapping, &first, &MergeOptions::default()).await?;

    let opts = MergeOptions {
        label_column: "Owner".into(),
        ..Default::default()
    };
    let second = dir.path().join("merged-twice.csv");
    run_merge(&first, &mapping, &second, &opts).await?;

    assert_eq!(
        std::fs::read_to_string(&second)?,
        "Image ID,Severity,Maintainer,Owner\nimg-1,High,payments,payments\n"
    );
    Ok(())
}

#[tokio::test]
async fn mapping_missing_label_column_is_fatal() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let mapping = dir.path().join("output.csv");
    write_lines(&mapping, &["Image ID,Owner", "img-1,payments"])?;

    let err = load_mapping(reader_from_path(&mapping).await?)
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::MissingColumn(ref c) if c == "Label"));
    Ok(())
}

#[tokio::test]
async fn source_missing_id_column_is_fatal() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let source = dir.path().join("v1-report.csv");
    let merged = dir.path().join("merged-report.csv");
    write_lines(&source, &["Digest,Severity", "sha,High"])?;

    let reader = reader_from_path(&source).await?;
    let mut out = tokio::fs::File::create(&merged).await?;
    let err = merge_reports(reader, &HashMap::new(), &mut out, &MergeOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::MissingColumn(ref c) if c == "Image ID"));
    Ok(())
}

#[tokio::test]
async fn malformed_source_rows_are_skipped_and_counted() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let source = dir.path().join("v1-report.csv");
    let mapping = dir.path().join("output.csv");
    let merged = dir.path().join("merged-report.csv");
    write_lines(
        &source,
        &[
            "Image ID,Severity",
            "img-1,High",
            "img-2",
            "img-3,Low,unexpected",
            "img-4,Medium",
        ],
    )?;
    write_lines(&mapping, &["Image ID,Label"])?;

    let summary = run_merge(&source, &mapping, &merged, &MergeOptions::default()).await?;

    assert_eq!(summary.rows, 2);
    assert_eq!(summary.skipped, 2);
    assert_eq!(
        std::fs::read_to_string(&merged)?,
        "Image ID,Severity,Maintainer\nimg-1,High,\nimg-4,Medium,\n"
    );
    Ok(())
}

#[tokio::test]
async fn duplicate_mapping_rows_keep_the_last_value() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let mapping = dir.path().join("output.csv");
    write_lines(
        &mapping,
        &["Image ID,Label", "img-1,old-owner", "img-2", "img-1,new-owner"],
    )?;

    let map = load_mapping(reader_from_path(&mapping).await?).await?;

    assert_eq!(map.len(), 1);
    assert_eq!(map.get("img-1").map(String::as_str), Some("new-owner"));
    Ok(())
}

#[tokio::test]
async fn gzipped_source_reports_merge_transparently() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let source = dir.path().join("v1-report.csv");
    let mapping = dir.path().join("output.csv");
    let merged = dir.path().join("merged-report.csv");
    write_lines(&source, &["Image ID,Severity", "img-1,High"])?;
    write_lines(&mapping, &["Image ID,Label", "img-1,payments"])?;

    let gz = dir.path().join("v1-report.csv.gz");
    let status = std::process::Command::new("bash")
        .arg("-lc")
        .arg(format!("gzip -c {} > {}", source.display(), gz.display()))
        .status()?;
    assert!(status.success());

    run_merge(&gz, &mapping, &merged, &MergeOptions::default()).await?;

    assert_eq!(
        std::fs::read_to_string(&merged)?,
        "Image ID,Severity,Maintainer\nimg-1,High,payments\n"
    );
    Ok(())
}
