use clap::{Arg, ArgAction, ArgGroup, Command};
use report_pipeline::sysdig::{CreateJobRequest, ReportingClient, TimeFrame};
use report_pipeline::{gunzip_file, PipelineError};
use std::path::PathBuf;
use std::time::Duration;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let matches = Command::new("fetch")
        .about("Request a CSV export from the reporting API and extract it locally")
        .arg(
            Arg::new("list")
                .long("list")
                .help("List available report definitions")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("id")
                .long("id")
                .help("Report ID to export")
                .value_parser(clap::value_parser!(i64)),
        )
        .group(
            ArgGroup::new("action")
                .args(["list", "id"])
                .multiple(true)
                .required(true),
        )
        .arg(
            Arg::new("tenant")
                .long("tenant")
                .env("SYSDIG_TENANT")
                .required(true)
                .help("Tenant host, e.g. us2.app.sysdig.com"),
        )
        .arg(
            Arg::new("token")
                .long("token")
                .env("SECURE_API_KEY")
                .hide_env_values(true)
                .required(true)
                .help("API token for the reporting service"),
        )
        .arg(
            Arg::new("output")
                .long("output")
                .value_parser(clap::value_parser!(PathBuf))
                .default_value("v1-report.csv")
                .help("Where to extract the report (archive lands next to it)"),
        )
        .arg(
            Arg::new("hours")
                .long("hours")
                .value_parser(clap::value_parser!(u64))
                .default_value("24")
                .help("Time frame covered by the export"),
        )
        .arg(
            Arg::new("job-name")
                .long("job-name")
                .default_value("Kubernetes Workload Vulnerability Findings"),
        )
        .arg(Arg::new("timezone").long("timezone").default_value("UTC"))
        .arg(
            Arg::new("poll-interval")
                .long("poll-interval")
                .value_parser(clap::value_parser!(u64))
                .default_value("30")
                .help("Seconds between job status checks"),
        )
        .arg(
            Arg::new("timeout")
                .long("timeout")
                .value_parser(clap::value_parser!(u64))
                .default_value("7200")
                .help("Seconds to wait for the job overall"),
        )
        .get_matches();

    let client = ReportingClient::new(
        matches.get_one::<String>("tenant").unwrap(),
        matches.get_one::<String>("token").unwrap(),
    )?;

    let reports = client.list_reports().await?;

    if matches.get_flag("list") {
        for report in &reports {
            println!(
                "ID: {}, Name: {}",
                report.id,
                report.name.as_deref().unwrap_or("(unnamed)")
            );
        }
    }

    let Some(report_id) = matches.get_one::<i64>("id").copied() else {
        return Ok(());
    };
    if !reports.iter().any(|r| r.id == report_id) {
        return Err(PipelineError::ReportNotFound(report_id).into());
    }

    let request = CreateJobRequest::on_demand(
        report_id,
        TimeFrame::last_hours(*matches.get_one::<u64>("hours").unwrap()),
        matches.get_one::<String>("job-name").unwrap(),
        matches.get_one::<String>("timezone").unwrap(),
    );
    let job = client.create_job(&request).await?;
    println!("Reporting job created: {}", job.id);

    let interval = Duration::from_secs(*matches.get_one::<u64>("poll-interval").unwrap());
    let timeout = Duration::from_secs(*matches.get_one::<u64>("timeout").unwrap());
    let done = client.wait_for_completion(&job.id, interval, timeout).await?;

    let file_path = done
        .file_path
        .ok_or_else(|| PipelineError::NoArtifact(job.id.clone()))?;

    let output = matches.get_one::<PathBuf>("output").unwrap();
    let mut archive = output.clone().into_os_string();
    archive.push(".gz");
    let archive = PathBuf::from(archive);

    let downloaded = client.download(&file_path, &archive).await?;
    let extracted = gunzip_file(&archive, output).await?;

    println!(
        "archive={} ({downloaded} bytes) report={} ({extracted} bytes)",
        archive.display(),
        output.display()
    );
    Ok(())
}
