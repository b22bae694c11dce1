//! Daily digest of messages posted by the export jobs.
//!
//! Jobs append one entry per run with [`Digester::post`]; a daily job calls
//! [`Digester::run`] to render the last 24 hours, grouped by script. On the
//! garbage day entries older than the previous calendar month are pruned.

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Datelike, Months, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::traits::DigestStore;

pub const DEFAULT_TRUNCATE: usize = 40_000;
pub const DEFAULT_GARBAGE_DAY: u32 = 15;
const TRUNCATION_MARKER: &str = " [...]";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DigestEntry {
    pub script_name: String,
    pub timestamp: DateTime<Utc>,
    pub message: String,
}

/// Messages from one script within the digest window, oldest first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DigestGroup {
    pub script: String,
    pub messages: Vec<(DateTime<Utc>, String)>,
}

pub struct Digester<S: DigestStore> {
    store: S,
    truncate: usize,
    garbage_day: u32,
}

impl<S: DigestStore> Digester<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            truncate: DEFAULT_TRUNCATE,
            garbage_day: DEFAULT_GARBAGE_DAY,
        }
    }

    pub fn with_truncate(mut self, chars: usize) -> Self {
        self.truncate = chars;
        self
    }

    pub fn with_garbage_day(mut self, day: u32) -> Self {
        self.garbage_day = day;
        self
    }

    pub async fn post(&self, script_name: &str, message: &str) -> Result<(), AppError> {
        self.post_at(script_name, message, Utc::now()).await
    }

    pub async fn post_at(
        &self,
        script_name: &str,
        message: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<(), AppError> {
        let entry = DigestEntry {
            script_name: script_name.to_string(),
            timestamp,
            message: truncate(message, self.truncate),
        };
        self.store.append(&entry).await?;
        tracing::debug!(script = %script_name, "Posted digest entry");
        Ok(())
    }

    /// Entries from the 24 hours before `now`, grouped by script. Groups are
    /// ordered by their earliest message, most recent group first.
    pub async fn digest(&self, now: DateTime<Utc>) -> Result<Vec<DigestGroup>, AppError> {
        let since = now - TimeDelta::days(1);
        let mut recent: Vec<DigestEntry> = self
            .store
            .entries()
            .await?
            .into_iter()
            .filter(|e| e.timestamp > since)
            .collect();
        recent.sort_by(|a, b| {
            (&a.script_name, a.timestamp).cmp(&(&b.script_name, b.timestamp))
        });

        let mut groups: Vec<DigestGroup> = Vec::new();
        for entry in recent {
            match groups.last_mut() {
                Some(group) if group.script == entry.script_name => {
                    group.messages.push((entry.timestamp, entry.message));
                }
                _ => groups.push(DigestGroup {
                    script: entry.script_name,
                    messages: vec![(entry.timestamp, entry.message)],
                }),
            }
        }
        groups.sort_by(|a, b| b.messages[0].0.cmp(&a.messages[0].0));
        Ok(groups)
    }

    /// Keep only entries from the current and previous calendar month.
    pub async fn cleanup(&self, now: DateTime<Utc>) -> Result<String, AppError> {
        let cutoff = start_of_previous_month(now)?;
        let total = self.store.entries().await?.len() as u64;
        let removed = self.store.prune_before(cutoff).await?;
        tracing::info!(%cutoff, removed, "Pruned digest entries");
        Ok(format!(
            "{removed} removed. {} recent entries retained.",
            total.saturating_sub(removed)
        ))
    }

    /// Clean up on the garbage day, then render the digest text.
    pub async fn run(&self, now: DateTime<Utc>) -> Result<String, AppError> {
        let mut out = String::new();
        if now.day() == self.garbage_day {
            out.push_str(&self.cleanup(now).await?);
            out.push('\n');
        }
        out.push_str(&format!(
            "This 24-hour digest composed at {} by eadsync.\n",
            now.format("%m/%d/%Y %H:%M:%S")
        ));
        for group in self.digest(now).await? {
            out.push_str(&format!("\n\u{25B6} *** OUTPUT FROM {} ***\n", group.script));
            for (_, message) in &group.messages {
                out.push_str(&format!("\u{2022} {message}\n"));
            }
            out.push_str("******************\n");
        }
        Ok(out)
    }
}

fn truncate(message: &str, limit: usize) -> String {
    match message.char_indices().nth(limit) {
        Some((at, _)) => format!("{}{TRUNCATION_MARKER}", &message[..at]),
        None => message.to_string(),
    }
}

fn start_of_previous_month(now: DateTime<Utc>) -> Result<DateTime<Utc>, AppError> {
    now.date_naive()
        .with_day(1)
        .and_then(|d| d.checked_sub_months(Months::new(1)))
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
        .ok_or_else(|| AppError::Generic(format!("No previous month for {now}")))
}

/// Digest log kept in a CSV file with columns `script_name,timestamp,message`.
#[derive(Debug, Clone)]
pub struct CsvDigestStore {
    path: PathBuf,
    lock: Arc<Mutex<()>>,
}

impl CsvDigestStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> Result<Vec<DigestEntry>, AppError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let mut reader = csv::Reader::from_path(&self.path).map_err(csv_err)?;
        reader
            .deserialize()
            .collect::<Result<Vec<DigestEntry>, _>>()
            .map_err(csv_err)
    }

    fn write_all(&self, entries: &[DigestEntry]) -> Result<(), AppError> {
        let tmp = self.path.with_extension("csv.tmp");
        {
            let mut writer = csv::Writer::from_path(&tmp).map_err(csv_err)?;
            for entry in entries {
                writer.serialize(entry).map_err(csv_err)?;
            }
            writer.flush()?;
        }
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl DigestStore for CsvDigestStore {
    async fn append(&self, entry: &DigestEntry) -> Result<(), AppError> {
        let _guard = self.lock.lock().map_err(|_| poisoned())?;
        let is_new = fs::metadata(&self.path).map(|m| m.len() == 0).unwrap_or(true);
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let file: File = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(is_new)
            .from_writer(file);
        writer.serialize(entry).map_err(csv_err)?;
        writer.flush()?;
        Ok(())
    }

    async fn entries(&self) -> Result<Vec<DigestEntry>, AppError> {
        let _guard = self.lock.lock().map_err(|_| poisoned())?;
        self.read_all()
    }

    async fn prune_before(&self, cutoff: DateTime<Utc>) -> Result<u64, AppError> {
        let _guard = self.lock.lock().map_err(|_| poisoned())?;
        let entries = self.read_all()?;
        let before = entries.len();
        let kept: Vec<DigestEntry> = entries.into_iter().filter(|e| e.timestamp >= cutoff).collect();
        let removed = (before - kept.len()) as u64;
        if removed > 0 {
            self.write_all(&kept)?;
        }
        Ok(removed)
    }
}

fn csv_err(e: csv::Error) -> AppError {
    AppError::Generic(format!("CSV digest error: {e}"))
}

fn poisoned() -> AppError {
    AppError::Generic("Digest store lock poisoned".to_string())
}
