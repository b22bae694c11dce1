//! Export orchestration: change set → fetch → validate → (transform) →
//! cache → (PDF) → reindex.

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::cache::{ArtifactCache, ArtifactKind, WriteStatus};
use crate::changes::{ChangeSetResolver, FetchFailure};
use crate::error::AppError;
use crate::identifier::{BibidPolicy, resolve_record};
use crate::job::PollConfig;
use crate::marc::MarcTransformer;
use crate::models::{BatchStatus, ExportOutcome, Record, RecordError, Watermark};
use crate::pdf::PdfJobDriver;
use crate::traits::{ArchivesSpace, IndexClient};
use crate::validate::{EAD_SCHEMA, MARC_SCHEMA, RecordValidator};

/// Events emitted during a batch for monitoring/logging.
#[derive(Debug, Clone)]
pub enum ExportEvent<'a> {
    BatchStarted {
        run_id: Uuid,
        repo_id: u32,
        watermark: Watermark,
    },
    RecordExported {
        bibid: &'a str,
        status: WriteStatus,
    },
    RecordFailed {
        error: &'a RecordError,
    },
    PdfGenerated {
        bibid: &'a str,
    },
    Reindexed {
        count: usize,
    },
    BatchCancelled {
        run_id: Uuid,
    },
    BatchFinished {
        outcome: &'a ExportOutcome,
    },
}

/// Trait for receiving export events (decoupled logging).
pub trait ExportReporter: Send + Sync {
    fn report(&self, event: ExportEvent<'_>) {
        let _ = event;
    }
}

/// Reporter that uses the `tracing` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingExportReporter;

impl ExportReporter for TracingExportReporter {
    fn report(&self, event: ExportEvent<'_>) {
        match event {
            ExportEvent::BatchStarted {
                run_id,
                repo_id,
                watermark,
            } => {
                tracing::info!(%run_id, repo_id, %watermark, "Export batch started");
            }
            ExportEvent::RecordExported { bibid, status } => {
                tracing::info!(%bibid, ?status, "Record exported");
            }
            ExportEvent::RecordFailed { error } => {
                tracing::warn!(bibid = ?error.bibid, resource = %error.resource, error = %error.message, "Record failed");
            }
            ExportEvent::PdfGenerated { bibid } => {
                tracing::info!(%bibid, "PDF generated");
            }
            ExportEvent::Reindexed { count } => {
                tracing::info!(count, "Reindex requested");
            }
            ExportEvent::BatchCancelled { run_id } => {
                tracing::warn!(%run_id, "Export batch cancelled; remaining records skipped");
            }
            ExportEvent::BatchFinished { outcome } => {
                tracing::info!(
                    run_id = %outcome.run_id,
                    exported = outcome.bibids.len(),
                    errors = outcome.errors.len(),
                    status = ?outcome.status,
                    "Export batch finished"
                );
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExportConfig {
    /// Records processed concurrently.
    pub workers: usize,
    /// Naming policy for finding-aid artifacts and the index.
    pub ead_policy: BibidPolicy,
    /// Naming policy for catalog MARC artifacts.
    pub marc_policy: BibidPolicy,
    pub with_pdf: bool,
    pub purge_html: bool,
    /// Overall time budget for one batch.
    pub deadline: Option<Duration>,
    pub poll: PollConfig,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            ead_policy: BibidPolicy::NumericPrefix("cul-".into()),
            marc_policy: BibidPolicy::Bare,
            with_pdf: false,
            purge_html: true,
            deadline: None,
            poll: PollConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExportPath {
    Ead,
    Marc,
}

/// Shared state of one running batch.
struct Batch<'a, R: ExportReporter> {
    outcome: Mutex<ExportOutcome>,
    cancel: CancellationToken,
    reporter: &'a R,
}

impl<R: ExportReporter> Batch<'_, R> {
    fn fail(&self, error: RecordError) {
        self.reporter.report(ExportEvent::RecordFailed { error: &error });
        self.lock().errors.push(error);
    }

    fn exported(&self, bibid: &str, status: WriteStatus) {
        self.reporter
            .report(ExportEvent::RecordExported { bibid, status });
        self.lock().bibids.push(bibid.to_string());
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ExportOutcome> {
        self.outcome.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn into_outcome(self) -> ExportOutcome {
        self.outcome
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Runs export batches for one ArchivesSpace instance.
pub struct ExportService<A: ArchivesSpace, I: IndexClient> {
    client: A,
    index: I,
    cache: ArtifactCache,
    validator: RecordValidator,
    pdf: PdfJobDriver<A>,
    config: ExportConfig,
}

impl<A: ArchivesSpace, I: IndexClient> ExportService<A, I> {
    pub fn new(
        client: A,
        index: I,
        cache: ArtifactCache,
        validator: RecordValidator,
        config: ExportConfig,
    ) -> Self {
        let pdf = PdfJobDriver::new(client.clone(), config.poll);
        Self {
            client,
            index,
            cache,
            validator,
            pdf,
            config,
        }
    }

    /// Refresh the EAD (and optionally PDF) cache for records modified since
    /// `watermark`, then ask the index to reindex every exported bibid.
    pub async fn run_daily_update<R: ExportReporter>(
        &self,
        repo_id: u32,
        watermark: Watermark,
        cancel: &CancellationToken,
        reporter: &R,
    ) -> ExportOutcome {
        let mut outcome = self
            .run_batch(ExportPath::Ead, repo_id, watermark, cancel, reporter)
            .await;

        match self.index.reindex(&outcome.bibids).await {
            Ok(()) => reporter.report(ExportEvent::Reindexed {
                count: outcome.bibids.len(),
            }),
            Err(e) => {
                tracing::error!(error = %e, "Reindex request failed");
                outcome.reindex_error = Some(e.to_string());
            }
        }

        reporter.report(ExportEvent::BatchFinished { outcome: &outcome });
        outcome
    }

    /// Refresh the MARC cache for records modified since `watermark`,
    /// applying the local catalog rules to each record.
    pub async fn run_marc_update<R: ExportReporter>(
        &self,
        repo_id: u32,
        watermark: Watermark,
        cancel: &CancellationToken,
        reporter: &R,
    ) -> ExportOutcome {
        let outcome = self
            .run_batch(ExportPath::Marc, repo_id, watermark, cancel, reporter)
            .await;
        reporter.report(ExportEvent::BatchFinished { outcome: &outcome });
        outcome
    }

    async fn run_batch<R: ExportReporter>(
        &self,
        path: ExportPath,
        repo_id: u32,
        watermark: Watermark,
        cancel: &CancellationToken,
        reporter: &R,
    ) -> ExportOutcome {
        let batch = Batch {
            outcome: Mutex::new(ExportOutcome::new()),
            cancel: cancel.child_token(),
            reporter,
        };
        let run_id = batch.lock().run_id;
        reporter.report(ExportEvent::BatchStarted {
            run_id,
            repo_id,
            watermark,
        });

        let resolver = ChangeSetResolver::new(self.client.clone());
        match resolver.changed_records(repo_id, watermark).await {
            Ok(records) => {
                let batch_ref = &batch;
                let work = records
                    .take_until(batch.cancel.cancelled())
                    .for_each_concurrent(self.config.workers.max(1), move |item| async move {
                        match item {
                            Ok(record) => self.process(path, repo_id, record, batch_ref).await,
                            Err(FetchFailure { resource, error }) => batch_ref.fail(RecordError {
                                bibid: None,
                                resource,
                                message: error.to_string(),
                            }),
                        }
                    });
                tokio::pin!(work);

                let deadline = async {
                    match self.config.deadline {
                        Some(limit) => tokio::time::sleep(limit).await,
                        None => std::future::pending::<()>().await,
                    }
                };
                let timed_out = tokio::select! {
                    () = &mut work => false,
                    () = deadline => true,
                };
                if timed_out {
                    tracing::warn!(%run_id, "Batch deadline reached");
                    batch.cancel.cancel();
                    work.await;
                }
            }
            Err(e) => batch.fail(RecordError {
                bibid: None,
                resource: format!("/repositories/{repo_id}"),
                message: format!("Could not list modified records: {e}"),
            }),
        }

        if batch.cancel.is_cancelled() {
            batch.lock().status = BatchStatus::Cancelled;
            reporter.report(ExportEvent::BatchCancelled { run_id });
        }
        batch.into_outcome()
    }

    /// Per-record boundary: every failure becomes an error entry, except
    /// cancellation, which is reported once for the batch.
    async fn process<R: ExportReporter>(
        &self,
        path: ExportPath,
        repo_id: u32,
        record: Record,
        batch: &Batch<'_, R>,
    ) {
        if batch.cancel.is_cancelled() {
            return;
        }

        let policy = match path {
            ExportPath::Ead => &self.config.ead_policy,
            ExportPath::Marc => &self.config.marc_policy,
        };
        let bibid = match policy.bibid_for(&record) {
            Ok(bibid) => bibid,
            Err(e) => {
                batch.fail(RecordError {
                    bibid: None,
                    resource: record.uri.clone(),
                    message: e.to_string(),
                });
                return;
            }
        };

        let result = match path {
            ExportPath::Ead => self.export_ead(repo_id, &record, &bibid, batch).await,
            ExportPath::Marc => self.export_marc(repo_id, &record, &bibid, batch).await,
        };
        match result {
            Ok(()) => {}
            Err(e) if e.is_cancelled() => {
                tracing::debug!(%bibid, "Record interrupted by cancellation");
            }
            Err(e) => batch.fail(RecordError {
                bibid: Some(bibid),
                resource: record.uri.clone(),
                message: e.to_string(),
            }),
        }
    }

    async fn export_ead<R: ExportReporter>(
        &self,
        repo_id: u32,
        record: &Record,
        bibid: &str,
        batch: &Batch<'_, R>,
    ) -> Result<(), AppError> {
        let resource_id = resource_id(record)?;
        let xml = tokio::select! {
            result = self.client.export_ead(repo_id, resource_id) => result?,
            () = batch.cancel.cancelled() => return Err(AppError::Cancelled),
        };

        self.check(&xml, EAD_SCHEMA, "EAD", record, bibid, batch)?;
        let status = self.cache.write(ArtifactKind::Ead, bibid, &xml)?;

        if self.config.purge_html {
            if let Err(e) = self.cache.purge_html(bibid) {
                batch.fail(record_error(record, bibid, format!("HTML purge failed: {e}")));
            }
        }
        batch.exported(bibid, status);

        if self.config.with_pdf {
            match self.pdf.run_pdf_job(repo_id, &record.uri, &batch.cancel).await {
                Ok(pdf) => {
                    self.cache.write(ArtifactKind::Pdf, bibid, &pdf)?;
                    batch.reporter.report(ExportEvent::PdfGenerated { bibid });
                }
                Err(e) if e.is_cancelled() => return Err(e),
                Err(e) => batch.fail(record_error(record, bibid, format!("PDF: {e}"))),
            }
        }
        Ok(())
    }

    async fn export_marc<R: ExportReporter>(
        &self,
        repo_id: u32,
        record: &Record,
        bibid: &str,
        batch: &Batch<'_, R>,
    ) -> Result<(), AppError> {
        let resource_id = resource_id(record)?;
        let xml = tokio::select! {
            result = self.client.export_marc(repo_id, resource_id) => result?,
            () = batch.cancel.cancelled() => return Err(AppError::Cancelled),
        };

        self.check(&xml, MARC_SCHEMA, "MARC", record, bibid, batch)?;

        // Catalog fields carry the bare bibid whatever the file naming policy.
        let catalog_id = resolve_record(record)?;
        let transformed = MarcTransformer::from_xml(&xml, catalog_id)?
            .apply_cul_rules()
            .to_xml()?;
        let status = self.cache.write(ArtifactKind::Marc, bibid, &transformed)?;
        batch.exported(bibid, status);
        Ok(())
    }

    /// Schema violations are recorded but do not stop the record; XML that
    /// does not parse does.
    fn check<R: ExportReporter>(
        &self,
        xml: &[u8],
        schema: &str,
        label: &str,
        record: &Record,
        bibid: &str,
        batch: &Batch<'_, R>,
    ) -> Result<(), AppError> {
        let report = self.validator.check(xml, schema)?;
        if !report.is_valid() {
            batch.fail(record_error(
                record,
                bibid,
                format!("Invalid {label}: {}", report.violations.join("; ")),
            ));
        }
        Ok(())
    }
}

fn resource_id(record: &Record) -> Result<u64, AppError> {
    record
        .resource_id()
        .ok_or_else(|| AppError::Generic(format!("Cannot parse resource id from {}", record.uri)))
}

fn record_error(record: &Record, bibid: &str, message: String) -> RecordError {
    RecordError {
        bibid: Some(bibid.to_string()),
        resource: record.uri.clone(),
        message,
    }
}
