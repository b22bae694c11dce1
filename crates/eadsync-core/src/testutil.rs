//! Test utilities: mock implementations of the core traits and sample
//! serializations.
//!
//! Handwritten mocks for dependency injection in unit tests. All mocks use
//! `Arc<Mutex<_>>` for interior mutability so tests can assert on recorded
//! calls after the fact.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::digest::DigestEntry;
use crate::error::AppError;
use crate::export::{ExportEvent, ExportReporter};
use crate::job::{JobHandle, JobStatus, PdfJobRequest};
use crate::models::{Record, Repository, Watermark};
use crate::traits::{ArchivesSpace, DigestStore, IndexClient};

pub const SAMPLE_EAD: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<ead xmlns="urn:isbn:1-931666-22-9" xmlns:xlink="http://www.w3.org/1999/xlink">
  <eadheader findaidstatus="Complete">
    <eadid countrycode="US" mainagencycode="US-NNC">4078773</eadid>
    <filedesc>
      <titlestmt>
        <titleproper>Papers of a Columbia Alumnus</titleproper>
      </titlestmt>
    </filedesc>
  </eadheader>
  <archdesc level="collection">
    <did>
      <unittitle>Papers</unittitle>
      <unitid>4078773</unitid>
      <unitdate>1900-1980</unitdate>
    </did>
  </archdesc>
</ead>
"#;

pub const SAMPLE_MARC: &str = r#"<record xmlns="http://www.loc.gov/MARC21/slim">
  <leader>00000npcaa2200000 a 4500</leader>
  <controlfield tag="008">240301i19001980xx                  eng d</controlfield>
  <datafield tag="035" ind1=" " ind2=" ">
    <subfield code="a">CULASPC-4078773</subfield>
  </datafield>
  <datafield tag="100" ind1="1" ind2=" ">
    <subfield code="a">Smith, John,</subfield>
    <subfield code="d">1900-1980.</subfield>
    <subfield code="e">creator.</subfield>
  </datafield>
  <datafield tag="245" ind1="1" ind2="0">
    <subfield code="a">Papers,</subfield>
    <subfield code="f">1900-1980.</subfield>
  </datafield>
  <datafield tag="610" ind1="2" ind2="0">
    <subfield code="a">Columbia University.</subfield>
    <subfield code="b">Libraries,</subfield>
  </datafield>
  <datafield tag="610" ind1="2" ind2="0">
    <subfield code="a">Barnard College.</subfield>
  </datafield>
  <datafield tag="856" ind1="4" ind2="2">
    <subfield code="u">https://findingaids.library.columbia.edu/ead/nnc-rb/ldpd_4078773</subfield>
    <subfield code="z">Finding aid online:</subfield>
  </datafield>
</record>"#;

pub const SAMPLE_PDF: &[u8] = b"%PDF-1.4\n% mock output\n";

/// A published, unsuppressed record in repository 2.
pub fn record(id: u64, id_0: &str) -> Record {
    Record {
        uri: format!("/repositories/2/resources/{id}"),
        id_0: Some(id_0.to_string()),
        publish: true,
        title: format!("Collection {id}"),
        ..Default::default()
    }
}

// ---------------------------------------------------------------------------
// MockArchivesSpace
// ---------------------------------------------------------------------------

/// In-memory ArchivesSpace. Known records export [`SAMPLE_EAD`] and
/// [`SAMPLE_MARC`] unless overridden; jobs complete on the first poll unless
/// a status script is given.
#[derive(Clone, Default)]
pub struct MockArchivesSpace {
    records: Arc<Mutex<HashMap<u64, Record>>>,
    modified_ids: Arc<Mutex<Option<Vec<u64>>>>,
    list_error: Arc<Mutex<Option<AppError>>>,
    ead: Arc<Mutex<HashMap<u64, Result<Vec<u8>, String>>>>,
    marc: Arc<Mutex<HashMap<u64, Result<Vec<u8>, String>>>>,
    export_delay: Arc<Mutex<Option<Duration>>>,
    job_script: Arc<Mutex<VecDeque<JobStatus>>>,
    job_stuck: Arc<Mutex<bool>>,
    submit_error: Arc<Mutex<Option<String>>>,
    output_files: Arc<Mutex<Option<Vec<u64>>>>,
    list_calls: Arc<Mutex<Vec<(u32, Watermark)>>>,
    status_polls: Arc<Mutex<usize>>,
    submitted: Arc<Mutex<Vec<String>>>,
    in_flight: Arc<Mutex<(usize, usize)>>,
}

impl MockArchivesSpace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_record(self, record: Record) -> Self {
        let id = record.resource_id().unwrap_or_default();
        self.records.lock().unwrap().insert(id, record);
        self
    }

    /// Override the ids returned by the modified-since listing.
    pub fn with_modified_ids(self, ids: Vec<u64>) -> Self {
        *self.modified_ids.lock().unwrap() = Some(ids);
        self
    }

    pub fn with_list_error(self, error: AppError) -> Self {
        *self.list_error.lock().unwrap() = Some(error);
        self
    }

    pub fn with_ead(self, id: u64, response: Result<&[u8], &str>) -> Self {
        self.ead
            .lock()
            .unwrap()
            .insert(id, response.map(<[u8]>::to_vec).map_err(String::from));
        self
    }

    pub fn with_marc(self, id: u64, response: Result<&[u8], &str>) -> Self {
        self.marc
            .lock()
            .unwrap()
            .insert(id, response.map(<[u8]>::to_vec).map_err(String::from));
        self
    }

    /// Every export call sleeps for `delay` first.
    pub fn with_export_delay(self, delay: Duration) -> Self {
        *self.export_delay.lock().unwrap() = Some(delay);
        self
    }

    /// Statuses returned by successive polls; once exhausted jobs complete.
    pub fn with_job_statuses(self, statuses: Vec<JobStatus>) -> Self {
        *self.job_script.lock().unwrap() = statuses.into();
        self
    }

    /// Jobs never leave the running state.
    pub fn with_stuck_jobs(self) -> Self {
        *self.job_stuck.lock().unwrap() = true;
        self
    }

    pub fn with_submit_error(self, message: &str) -> Self {
        *self.submit_error.lock().unwrap() = Some(message.to_string());
        self
    }

    pub fn with_output_files(self, files: Vec<u64>) -> Self {
        *self.output_files.lock().unwrap() = Some(files);
        self
    }

    pub fn list_calls(&self) -> Vec<(u32, Watermark)> {
        self.list_calls.lock().unwrap().clone()
    }

    pub fn status_polls(&self) -> usize {
        *self.status_polls.lock().unwrap()
    }

    pub fn submitted_sources(&self) -> Vec<String> {
        self.submitted.lock().unwrap().clone()
    }

    /// Highest number of exports that were in progress at the same time.
    pub fn max_concurrent_exports(&self) -> usize {
        self.in_flight.lock().unwrap().1
    }

    async fn export(
        &self,
        overrides: &Mutex<HashMap<u64, Result<Vec<u8>, String>>>,
        resource_id: u64,
        default: &[u8],
    ) -> Result<Vec<u8>, AppError> {
        {
            let mut in_flight = self.in_flight.lock().unwrap();
            in_flight.0 += 1;
            in_flight.1 = in_flight.1.max(in_flight.0);
        }
        let delay = *self.export_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.lock().unwrap().0 -= 1;

        if let Some(response) = overrides.lock().unwrap().get(&resource_id) {
            return response.clone().map_err(AppError::HttpError);
        }
        if self.records.lock().unwrap().contains_key(&resource_id) {
            Ok(default.to_vec())
        } else {
            Err(AppError::HttpError(format!(
                "HTTP 404 for resource {resource_id}"
            )))
        }
    }
}

impl ArchivesSpace for MockArchivesSpace {
    async fn list_repositories(&self) -> Result<Vec<Repository>, AppError> {
        Ok(vec![Repository {
            uri: "/repositories/2".into(),
            name: "Rare Book & Manuscript Library".into(),
            repo_code: "nnc-rb".into(),
            org_code: Some("NNC-RB".into()),
            publish: true,
        }])
    }

    async fn list_modified_resource_ids(
        &self,
        repo_id: u32,
        watermark: Watermark,
    ) -> Result<Vec<u64>, AppError> {
        self.list_calls.lock().unwrap().push((repo_id, watermark));
        if let Some(e) = self.list_error.lock().unwrap().take() {
            return Err(e);
        }
        if let Some(ids) = self.modified_ids.lock().unwrap().clone() {
            return Ok(ids);
        }
        let mut ids: Vec<u64> = self.records.lock().unwrap().keys().copied().collect();
        ids.sort_unstable();
        Ok(ids)
    }

    async fn get_resource(&self, _repo_id: u32, resource_id: u64) -> Result<Record, AppError> {
        self.records
            .lock()
            .unwrap()
            .get(&resource_id)
            .cloned()
            .ok_or_else(|| AppError::HttpError(format!("HTTP 404 for resource {resource_id}")))
    }

    async fn export_ead(&self, _repo_id: u32, resource_id: u64) -> Result<Vec<u8>, AppError> {
        self.export(&self.ead, resource_id, SAMPLE_EAD.as_bytes())
            .await
    }

    async fn export_marc(&self, _repo_id: u32, resource_id: u64) -> Result<Vec<u8>, AppError> {
        self.export(&self.marc, resource_id, SAMPLE_MARC.as_bytes())
            .await
    }

    async fn submit_job(&self, repo_id: u32, request: &PdfJobRequest) -> Result<JobHandle, AppError> {
        if let Some(msg) = self.submit_error.lock().unwrap().clone() {
            return Err(AppError::JobSubmission(msg));
        }
        let mut submitted = self.submitted.lock().unwrap();
        submitted.push(request.source().to_string());
        Ok(JobHandle::queued(format!(
            "/repositories/{repo_id}/jobs/{}",
            submitted.len()
        )))
    }

    async fn job_status(&self, job_uri: &str) -> Result<JobHandle, AppError> {
        *self.status_polls.lock().unwrap() += 1;
        let status = match self.job_script.lock().unwrap().pop_front() {
            Some(status) => status,
            None if *self.job_stuck.lock().unwrap() => JobStatus::Running,
            None => JobStatus::Completed,
        };
        Ok(JobHandle {
            uri: job_uri.to_string(),
            status,
            output_files: Vec::new(),
        })
    }

    async fn job_output_files(&self, _job_uri: &str) -> Result<Vec<u64>, AppError> {
        Ok(self
            .output_files
            .lock()
            .unwrap()
            .clone()
            .unwrap_or_else(|| vec![1]))
    }

    async fn fetch_output_file(&self, _job_uri: &str, _file_id: u64) -> Result<Vec<u8>, AppError> {
        Ok(SAMPLE_PDF.to_vec())
    }
}

// ---------------------------------------------------------------------------
// MockIndex
// ---------------------------------------------------------------------------

/// Index client that records reindex requests.
#[derive(Clone, Default)]
pub struct MockIndex {
    pub calls: Arc<Mutex<Vec<Vec<String>>>>,
    error: Arc<Mutex<Option<String>>>,
}

impl MockIndex {
    pub fn with_error(message: &str) -> Self {
        Self {
            calls: Arc::default(),
            error: Arc::new(Mutex::new(Some(message.to_string()))),
        }
    }

    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().unwrap().clone()
    }
}

impl IndexClient for MockIndex {
    async fn reindex(&self, bibids: &[String]) -> Result<(), AppError> {
        self.calls.lock().unwrap().push(bibids.to_vec());
        match self.error.lock().unwrap().clone() {
            Some(msg) => Err(AppError::HttpError(msg)),
            None => Ok(()),
        }
    }
}

// ---------------------------------------------------------------------------
// MockDigestStore
// ---------------------------------------------------------------------------

#[derive(Clone, Default)]
pub struct MockDigestStore {
    entries: Arc<Mutex<Vec<DigestEntry>>>,
}

impl DigestStore for MockDigestStore {
    async fn append(&self, entry: &DigestEntry) -> Result<(), AppError> {
        self.entries.lock().unwrap().push(entry.clone());
        Ok(())
    }

    async fn entries(&self) -> Result<Vec<DigestEntry>, AppError> {
        Ok(self.entries.lock().unwrap().clone())
    }

    async fn prune_before(&self, cutoff: DateTime<Utc>) -> Result<u64, AppError> {
        let mut entries = self.entries.lock().unwrap();
        let before = entries.len();
        entries.retain(|e| e.timestamp >= cutoff);
        Ok((before - entries.len()) as u64)
    }
}

// ---------------------------------------------------------------------------
// MockReporter
// ---------------------------------------------------------------------------

/// Reporter that records a short label for every event.
#[derive(Clone, Default)]
pub struct MockReporter {
    pub events: Arc<Mutex<Vec<String>>>,
}

impl MockReporter {
    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }
}

impl ExportReporter for MockReporter {
    fn report(&self, event: ExportEvent<'_>) {
        let label = match event {
            ExportEvent::BatchStarted { .. } => "batch_started".to_string(),
            ExportEvent::RecordExported { bibid, .. } => format!("exported:{bibid}"),
            ExportEvent::RecordFailed { error, .. } => format!("failed:{}", error.resource),
            ExportEvent::PdfGenerated { bibid } => format!("pdf:{bibid}"),
            ExportEvent::Reindexed { count } => format!("reindexed:{count}"),
            ExportEvent::BatchCancelled { .. } => "batch_cancelled".to_string(),
            ExportEvent::BatchFinished { .. } => "batch_finished".to_string(),
        };
        self.events.lock().unwrap().push(label);
    }
}
