//! Sysdig Secure reporting API client.
//!
//! Wraps the `/api/platform/reporting/v1` endpoints behind the `fetch`
//! binary: list report definitions, create an on-demand CSV export job, poll
//! it to completion and download the gzipped artifact.

use crate::{PipelineError, PipelineResult};
use chrono::Utc;
use futures::TryStreamExt;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::time::{Duration, Instant};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio_util::io::StreamReader;
use tracing::{debug, info};

const USER_AGENT: &str = concat!("report-pipeline/", env!("CARGO_PKG_VERSION"));
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
// Applies to the API calls only; artifact downloads run without a deadline.
const API_TIMEOUT: Duration = Duration::from_secs(60);

/// One report definition from `GET /reports`.
#[derive(Debug, Clone, Deserialize)]
pub struct ReportDefinition {
    pub id: i64,
    #[serde(default)]
    pub name: Option<String>,
}

/// Epoch-second window an export job covers.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TimeFrame {
    pub from: i64,
    pub to: i64,
}

impl TimeFrame {
    /// Window ending now and spanning the previous `hours`. Spans too large
    /// for epoch seconds clamp instead of overflowing.
    pub fn last_hours(hours: u64) -> Self {
        let to = Utc::now().timestamp();
        let span = i64::try_from(hours).unwrap_or(i64::MAX).saturating_mul(3600);
        Self {
            from: to.saturating_sub(span),
            to,
        }
    }
}

/// Payload for `POST /jobs`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateJobRequest {
    pub job_type: String,
    pub report_format: String,
    pub compression: String,
    pub scheduled_on: String,
    pub zones: Vec<String>,
    pub time_frame: TimeFrame,
    pub report_id: i64,
    pub is_report_template: bool,
    pub job_name: String,
    pub file_name: String,
    pub timezone: String,
}

impl CreateJobRequest {
    /// On-demand gzipped CSV export of `report_id` over `time_frame`.
    pub fn on_demand(
        report_id: i64,
        time_frame: TimeFrame,
        job_name: &str,
        timezone: &str,
    ) -> Self {
        Self {
            job_type: "ON_DEMAND".into(),
            report_format: "csv".into(),
            compression: "gzip".into(),
            scheduled_on: Utc::now().to_rfc3339(),
            zones: Vec::new(),
            time_frame,
            report_id,
            is_report_template: false,
            job_name: job_name.into(),
            file_name: job_name.into(),
            timezone: timezone.into(),
        }
    }
}

/// Job state reported by the API. Unrecognized states map to `Unknown` so
/// the poll loop keeps going if the service grows new intermediate states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Scheduled,
    Progress,
    Completed,
    Failed,
    #[default]
    #[serde(other)]
    Unknown,
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            JobStatus::Scheduled => "SCHEDULED",
            JobStatus::Progress => "PROGRESS",
            JobStatus::Completed => "COMPLETED",
            JobStatus::Failed => "FAILED",
            JobStatus::Unknown => "UNKNOWN",
        })
    }
}

/// One reporting job, as returned by `POST /jobs` and `GET /jobs/{id}`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportJob {
    pub id: String,
    #[serde(default)]
    pub status: JobStatus,
    #[serde(default)]
    pub file_path: Option<String>,
}

/// Reporting API client with bearer-token auth.
pub struct ReportingClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

impl ReportingClient {
    /// `tenant` is the tenant host, with or without an `https://` scheme.
    pub fn new(tenant: &str, token: &str) -> PipelineResult<Self> {
        let base_url = if tenant.starts_with("http://") || tenant.starts_with("https://") {
            tenant.trim_end_matches('/').to_string()
        } else {
            format!("https://{}", tenant.trim_end_matches('/'))
        };
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(CONNECT_TIMEOUT)
            .build()?;
        Ok(Self {
            http,
            base_url,
            token: token.to_string(),
        })
    }

    fn reporting_url(&self, path: &str) -> String {
        format!("{}/api/platform/reporting/v1{}", self.base_url, path)
    }

    /// List the report definitions available to this tenant.
    pub async fn list_reports(&self) -> PipelineResult<Vec<ReportDefinition>> {
        let url = self.reporting_url("/reports");
        debug!(%url, "listing report definitions");
        let resp = self
            .http
            .get(&url)
            .bearer_auth(&self.token)
            .timeout(API_TIMEOUT)
            .send()
            .await?;
        let resp = Self::check(resp).await?;
        Ok(resp.json().await?)
    }

    /// Create an on-demand export job.
    pub async fn create_job(&self, request: &CreateJobRequest) -> PipelineResult<ReportJob> {
        let url = self.reporting_url("/jobs");
        debug!(%url, report_id = request.report_id, "creating report job");
        let resp = self
            .http
            .post(&url)
            .bearer_auth(&self.token)
            .timeout(API_TIMEOUT)
            .json(request)
            .send()
            .await?;
        let resp = Self::check(resp).await?;
        Ok(resp.json().await?)
    }

    /// Fetch the current state of one job.
    pub async fn job_status(&self, job_id: &str) -> PipelineResult<ReportJob> {
        let url = self.reporting_url(&format!("/jobs/{job_id}"));
        let resp = self
            .http
            .get(&url)
            .bearer_auth(&self.token)
            .timeout(API_TIMEOUT)
            .send()
            .await?;
        let resp = Self::check(resp).await?;
        Ok(resp.json().await?)
    }

    /// Poll `job_id` every `interval` until it completes or fails, bailing
    /// out once `timeout` wall-clock time has passed.
    pub async fn wait_for_completion(
        &self,
        job_id: &str,
        interval: Duration,
        timeout: Duration,
    ) -> PipelineResult<ReportJob> {
        let started = Instant::now();
        loop {
            tokio::time::sleep(interval).await;
            if started.elapsed() > timeout {
                return Err(PipelineError::JobTimeout(job_id.to_string()));
            }
            let job = self.job_status(job_id).await?;
            info!(job = job_id, status = %job.status, "report job status");
            match job.status {
                JobStatus::Completed => return Ok(job),
                JobStatus::Failed => return Err(PipelineError::JobFailed(job_id.to_string())),
                _ => {}
            }
        }
    }

    /// Stream the artifact at `url` (a completed job's `filePath`) into
    /// `dest`, returning the byte count written.
    pub async fn download(&self, url: &str, dest: &Path) -> PipelineResult<u64> {
        info!(%url, dest = %dest.display(), "downloading report artifact");
        let resp = self.http.get(url).bearer_auth(&self.token).send().await?;
        let resp = Self::check(resp).await?;

        let stream = resp
            .bytes_stream()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e));
        let mut reader = StreamReader::new(stream);
        let mut file = File::create(dest).await?;
        let written = tokio::io::copy(&mut reader, &mut file).await?;
        file.flush().await?;
        Ok(written)
    }

    /// Map non-2xx responses to an error carrying status code and body.
    async fn check(resp: reqwest::Response) -> PipelineResult<reqwest::Response> {
        let status = resp.status();
        if status.is_success() {
            Ok(resp)
        } else {
            let body = resp.text().await.unwrap_or_default();
            Err(PipelineError::Api(status.as_u16(), body))
        }
    }
}
