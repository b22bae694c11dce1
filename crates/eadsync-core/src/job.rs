use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Status of a background job on the ArchivesSpace side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    /// A job cancelled on the server side is treated as failed.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "queued" => Ok(JobStatus::Queued),
            "running" => Ok(JobStatus::Running),
            "completed" => Ok(JobStatus::Completed),
            "failed" | "canceled" | "cancelled" => Ok(JobStatus::Failed),
            _ => Err(format!("Unknown job status: {}", s)),
        }
    }
}

/// A submitted job and what is currently known about it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobHandle {
    /// e.g. `/repositories/2/jobs/118`
    pub uri: String,
    pub status: JobStatus,
    pub output_files: Vec<u64>,
}

impl JobHandle {
    pub fn queued(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            status: JobStatus::Queued,
            output_files: Vec::new(),
        }
    }
}

/// Polling schedule for job completion.
#[derive(Debug, Clone, Copy)]
pub struct PollConfig {
    pub interval: Duration,
    pub max_wait: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            max_wait: Duration::from_secs(900),
        }
    }
}

impl PollConfig {
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = max_wait;
        self
    }

    /// Upper bound on status requests for one job.
    pub fn max_polls(&self) -> u64 {
        let interval = self.interval.as_millis().max(1);
        (self.max_wait.as_millis() / interval) as u64 + 1
    }
}

/// Request body for a print-to-PDF job.
#[derive(Debug, Clone, Serialize)]
pub struct PdfJobRequest {
    jsonmodel_type: &'static str,
    job: PrintToPdfJob,
}

#[derive(Debug, Clone, Serialize)]
struct PrintToPdfJob {
    jsonmodel_type: &'static str,
    source: String,
    include_unpublished: bool,
}

impl PdfJobRequest {
    pub fn new(source_uri: impl Into<String>) -> Self {
        Self {
            jsonmodel_type: "job",
            job: PrintToPdfJob {
                jsonmodel_type: "print_to_pdf_job",
                source: source_uri.into(),
                include_unpublished: false,
            },
        }
    }

    pub fn source(&self) -> &str {
        &self.job.source
    }
}
