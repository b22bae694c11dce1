use std::future::Future;

use chrono::{DateTime, Utc};

use crate::digest::DigestEntry;
use crate::error::AppError;
use crate::job::{JobHandle, PdfJobRequest};
use crate::models::{Record, Repository, Watermark};

/// The upstream archival management system.
pub trait ArchivesSpace: Send + Sync + Clone {
    fn list_repositories(&self) -> impl Future<Output = Result<Vec<Repository>, AppError>> + Send;

    /// Ids of resources in `repo_id` modified since `watermark`.
    fn list_modified_resource_ids(
        &self,
        repo_id: u32,
        watermark: Watermark,
    ) -> impl Future<Output = Result<Vec<u64>, AppError>> + Send;

    fn get_resource(
        &self,
        repo_id: u32,
        resource_id: u64,
    ) -> impl Future<Output = Result<Record, AppError>> + Send;

    /// EAD XML for a resource, unpublished components excluded.
    fn export_ead(
        &self,
        repo_id: u32,
        resource_id: u64,
    ) -> impl Future<Output = Result<Vec<u8>, AppError>> + Send;

    /// MARCXML for a resource.
    fn export_marc(
        &self,
        repo_id: u32,
        resource_id: u64,
    ) -> impl Future<Output = Result<Vec<u8>, AppError>> + Send;

    fn submit_job(
        &self,
        repo_id: u32,
        request: &PdfJobRequest,
    ) -> impl Future<Output = Result<JobHandle, AppError>> + Send;

    fn job_status(&self, job_uri: &str) -> impl Future<Output = Result<JobHandle, AppError>> + Send;

    fn job_output_files(
        &self,
        job_uri: &str,
    ) -> impl Future<Output = Result<Vec<u64>, AppError>> + Send;

    fn fetch_output_file(
        &self,
        job_uri: &str,
        file_id: u64,
    ) -> impl Future<Output = Result<Vec<u8>, AppError>> + Send;
}

/// The downstream finding-aid search index.
pub trait IndexClient: Send + Sync + Clone {
    /// Ask the index to reindex the given bibids. An empty list is allowed.
    fn reindex(&self, bibids: &[String]) -> impl Future<Output = Result<(), AppError>> + Send;
}

/// Durable, append-only log behind the digest.
pub trait DigestStore: Send + Sync + Clone {
    fn append(&self, entry: &DigestEntry) -> impl Future<Output = Result<(), AppError>> + Send;

    /// All entries, oldest first.
    fn entries(&self) -> impl Future<Output = Result<Vec<DigestEntry>, AppError>> + Send;

    /// Remove entries timestamped before `cutoff`. Returns the number removed.
    fn prune_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> impl Future<Output = Result<u64, AppError>> + Send;
}

/// An index client that accepts every request without doing anything.
#[derive(Debug, Clone)]
pub struct NullIndex;

impl IndexClient for NullIndex {
    async fn reindex(&self, _bibids: &[String]) -> Result<(), AppError> {
        Ok(())
    }
}
