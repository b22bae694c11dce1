pub mod audit;
pub mod cache;
pub mod changes;
pub mod digest;
pub mod error;
pub mod export;
pub mod identifier;
pub mod job;
pub mod marc;
pub mod models;
pub mod pdf;
pub mod report;
pub mod traits;
pub mod validate;
pub mod xml;

#[cfg(test)]
pub(crate) mod testutil;

pub use audit::{CacheAudit, FileCheck, FileStatus, audit_ead_cache};
pub use cache::{ArtifactCache, ArtifactKind, WriteStatus};
pub use digest::{CsvDigestStore, DigestEntry, Digester};
pub use error::AppError;
pub use export::{ExportConfig, ExportReporter, ExportService, TracingExportReporter};
pub use identifier::BibidPolicy;
pub use job::{JobHandle, JobStatus, PdfJobRequest, PollConfig};
pub use models::{ExportOutcome, Record, RecordError, Repository, Watermark, compute_hash};
pub use report::UpdateReport;
pub use traits::{ArchivesSpace, DigestStore, IndexClient};
pub use validate::RecordValidator;
