use clap::{Arg, Command};
use report_pipeline::{extract_labels, reader_from_path, write_mapping, ExtractOptions};
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

    let matches = Command::new("extract")
        .about("Extract one label key per image id from a report CSV")
        .arg(
            Arg::new("input")
                .long("input")
                .value_parser(clap::value_parser!(PathBuf))
                .default_value("v1-report.csv")
                .help("Report CSV to scan (.gz accepted)"),
        )
        .arg(
            Arg::new("output")
                .long("output")
                .value_parser(clap::value_parser!(PathBuf))
                .default_value("output.csv")
                .help("Mapping CSV to write (Image ID,Label)"),
        )
        .arg(
            Arg::new("label-key")
                .long("label-key")
                .default_value("MAINTAINER")
                .help("Label key to look up in the labels column"),
        )
        .arg(
            Arg::new("id-column")
                .long("id-column")
                .default_value("Image ID"),
        )
        .arg(
            Arg::new("labels-column")
                .long("labels-column")
                .default_value("Container Labels"),
        )
        .arg(
            Arg::new("limit")
                .long("limit")
                .help("Stop after N rows (for sampling large exports)")
                .value_parser(clap::value_parser!(u64)),
        )
        .get_matches();

    let input = matches.get_one::<PathBuf>("input").unwrap();
    let output = matches.get_one::<PathBuf>("output").unwrap();
    let opts = ExtractOptions {
        id_column: matches.get_one::<String>("id-column").unwrap().clone(),
        labels_column: matches.get_one::<String>("labels-column").unwrap().clone(),
        label_key: matches.get_one::<String>("label-key").unwrap().clone(),
        limit: matches.get_one::<u64>("limit").copied(),
    };

    let reader = reader_from_path(input).await?;
    let (mapping, summary) = extract_labels(reader, &opts).await?;

    let mut file = File::create(output).await?;
    write_mapping(&mapping, &mut file).await?;
    file.flush().await?;

    println!(
        "source={} rows={} matched={} unmatched={} skipped={} unique={} -> {}",
        input.display(),
        summary.rows,
        summary.matched,
        summary.unmatched,
        summary.skipped,
        mapping.len(),
        output.display()
    );
    Ok(())
}
