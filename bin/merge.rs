use clap::{Arg, Command};
use report_pipeline::{load_mapping, merge_reports, reader_from_path, MergeOptions};
use std::path::PathBuf;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let matches = Command::new("merge")
        .about("Left-join the label mapping onto a report CSV, appending one column")
        .arg(
            Arg::new("input")
                .long("input")
                .value_parser(clap::value_parser!(PathBuf))
                .default_value("v1-report.csv")
                .help("Source report CSV (.gz accepted)"),
        )
        .arg(
            Arg::new("mapping")
                .long("mapping")
                .value_parser(clap::value_parser!(PathBuf))
                .default_value("output.csv")
                .help("Mapping CSV (Image ID,Label)"),
        )
        .arg(
            Arg::new("output")
                .long("output")
                .value_parser(clap::value_parser!(PathBuf))
                .default_value("merged-report.csv"),
        )
        .arg(
            Arg::new("id-column")
                .long("id-column")
                .default_value("Image ID"),
        )
        .arg(
            Arg::new("column")
                .long("column")
                .default_value("Maintainer")
                .help("Name of the appended column"),
        )
        .arg(
            Arg::new("sentinel")
                .long("sentinel")
                .default_value("")
                .help("Value written for ids absent from the mapping"),
        )
        .get_matches();

    let input = matches.get_one::<PathBuf>("input").unwrap();
    let mapping_path = matches.get_one::<PathBuf>("mapping").unwrap();
    let output = matches.get_one::<PathBuf>("output").unwrap();
    let opts = MergeOptions {
        id_column: matches.get_one::<String>("id-column").unwrap().clone(),
        label_column: matches.get_one::<String>("column").unwrap().clone(),
        sentinel: matches.get_one::<String>("sentinel").unwrap().clone(),
    };

    let mapping = load_mapping(reader_from_path(mapping_path).await?).await?;

    let source = reader_from_path(input).await?;
    let mut file = File::create(output).await?;
    let summary = merge_reports(source, &mapping, &mut file, &opts).await?;
    file.flush().await?;

    println!(
        "source={} mapping={} rows={} matched={} skipped={} -> {}",
        input.display(),
        mapping_path.display(),
        summary.rows,
        summary.matched,
        summary.skipped,
        output.display()
    );
    Ok(())
}
