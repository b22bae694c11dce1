use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::AppError;
use crate::job::{JobHandle, JobStatus, PdfJobRequest, PollConfig};
use crate::traits::ArchivesSpace;

/// Drives a print-to-PDF job from submission to downloaded output.
#[derive(Clone)]
pub struct PdfJobDriver<A: ArchivesSpace> {
    client: A,
    poll: PollConfig,
}

impl<A: ArchivesSpace> PdfJobDriver<A> {
    pub fn new(client: A, poll: PollConfig) -> Self {
        Self { client, poll }
    }

    /// Submit the job, wait for it, and return the first output file.
    ///
    /// A job that is still running after `max_wait` is abandoned on our side
    /// only; no cancel request is sent upstream.
    pub async fn run_pdf_job(
        &self,
        repo_id: u32,
        source_uri: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>, AppError> {
        let request = PdfJobRequest::new(source_uri);
        let submitted = tokio::select! {
            result = self.client.submit_job(repo_id, &request) => result.map_err(|e| match e {
                AppError::JobSubmission(_) => e,
                other => AppError::JobSubmission(other.to_string()),
            })?,
            () = cancel.cancelled() => return Err(AppError::Cancelled),
        };
        tracing::debug!(job = %submitted.uri, source = %source_uri, "Submitted PDF job");

        let job = self.wait_for(&submitted.uri, cancel).await?;
        match job.status {
            JobStatus::Completed => self.fetch_output(&job.uri).await,
            _ => Err(AppError::JobFailed(job.uri)),
        }
    }

    async fn wait_for(&self, job_uri: &str, cancel: &CancellationToken) -> Result<JobHandle, AppError> {
        let started = Instant::now();
        loop {
            if cancel.is_cancelled() {
                return Err(AppError::Cancelled);
            }

            let handle = self.client.job_status(job_uri).await?;
            if handle.status.is_terminal() {
                tracing::debug!(job = %job_uri, status = %handle.status, "PDF job finished");
                return Ok(handle);
            }

            let waited = started.elapsed();
            if waited >= self.poll.max_wait {
                tracing::warn!(job = %job_uri, waited_secs = waited.as_secs(), "Gave up waiting for PDF job");
                return Err(AppError::JobTimeout {
                    uri: job_uri.to_string(),
                    waited_secs: waited.as_secs(),
                });
            }

            tokio::select! {
                () = tokio::time::sleep(self.poll.interval) => {}
                () = cancel.cancelled() => return Err(AppError::Cancelled),
            }
        }
    }

    async fn fetch_output(&self, job_uri: &str) -> Result<Vec<u8>, AppError> {
        let files = self.client.job_output_files(job_uri).await?;
        let first = files
            .first()
            .ok_or_else(|| AppError::NoOutput(job_uri.to_string()))?;
        self.client.fetch_output_file(job_uri, *first).await
    }
}
