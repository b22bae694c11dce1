use std::fmt;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::AppError;

/// An ArchivesSpace repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repository {
    pub uri: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub repo_code: String,
    #[serde(default)]
    pub org_code: Option<String>,
    #[serde(default)]
    pub publish: bool,
}

impl Repository {
    /// Numeric repository id parsed from the trailing segment of the URI.
    pub fn id(&self) -> Option<u32> {
        trailing_id(&self.uri)
    }
}

/// A structured date statement on a resource.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateStatement {
    #[serde(default)]
    pub expression: Option<String>,
    #[serde(default)]
    pub begin: Option<String>,
    #[serde(default)]
    pub end: Option<String>,
    #[serde(default)]
    pub date_type: Option<String>,
    #[serde(default)]
    pub label: Option<String>,
}

/// An extent statement, e.g. `3.5 linear_feet`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Extent {
    #[serde(default)]
    pub number: String,
    #[serde(default)]
    pub extent_type: String,
}

/// A description unit (resource record) as returned by the ArchivesSpace API.
///
/// Absent upstream attributes deserialize to `None`, `false` or empty
/// collections.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub uri: String,
    #[serde(default)]
    pub id_0: Option<String>,
    #[serde(default)]
    pub id_1: Option<String>,
    #[serde(default)]
    pub id_2: Option<String>,
    #[serde(default)]
    pub id_3: Option<String>,
    #[serde(default)]
    pub publish: bool,
    #[serde(default)]
    pub suppressed: bool,
    #[serde(default)]
    pub title: String,
    /// Last-modified timestamp maintained by ArchivesSpace.
    #[serde(default)]
    pub system_mtime: Option<DateTime<Utc>>,
    #[serde(default)]
    pub dates: Vec<DateStatement>,
    #[serde(default)]
    pub extents: Vec<Extent>,
    #[serde(default)]
    pub notes: Vec<serde_json::Value>,
}

impl Record {
    /// A record may leave the archive only when published and not suppressed.
    pub fn is_exportable(&self) -> bool {
        self.publish && !self.suppressed
    }

    /// The four hierarchical identifier parts, in order.
    pub fn identifier_parts(&self) -> [Option<String>; 4] {
        [
            self.id_0.clone(),
            self.id_1.clone(),
            self.id_2.clone(),
            self.id_3.clone(),
        ]
    }

    /// Resource id within its repository, parsed from the URI.
    pub fn resource_id(&self) -> Option<u64> {
        trailing_id(&self.uri)
    }
}

/// Reference point for "modified since", in epoch seconds (UTC).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Watermark(i64);

impl Watermark {
    pub fn from_epoch(secs: i64) -> Self {
        Self(secs)
    }

    /// Watermark `hours` before `now`.
    pub fn hours_before(now: DateTime<Utc>, hours: i64) -> Self {
        Self((now - TimeDelta::hours(hours)).timestamp())
    }

    /// Parse either an integer epoch or an RFC 3339 timestamp.
    pub fn parse(raw: &str) -> Result<Self, AppError> {
        let raw = raw.trim();
        if let Ok(secs) = raw.parse::<i64>() {
            return Ok(Self(secs));
        }
        DateTime::parse_from_rfc3339(raw)
            .map(|dt| Self(dt.timestamp()))
            .map_err(|e| {
                AppError::ConfigError(format!(
                    "Invalid watermark '{raw}': expected epoch seconds or RFC 3339 ({e})"
                ))
            })
    }

    pub fn epoch_seconds(&self) -> i64 {
        self.0
    }

    pub fn as_datetime(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.0, 0)
    }
}

impl Default for Watermark {
    /// 24 hours ago.
    fn default() -> Self {
        Self::hours_before(Utc::now(), 24)
    }
}

impl fmt::Display for Watermark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One per-record failure collected during a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordError {
    /// Bibid, when it could be derived before the failure.
    pub bibid: Option<String>,
    /// Upstream resource URI (or id) the failure refers to.
    pub resource: String,
    pub message: String,
}

impl fmt::Display for RecordError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.bibid {
            Some(bibid) => write!(f, "{bibid}: {}", self.message),
            None => write!(f, "{}: {}", self.resource, self.message),
        }
    }
}

/// How a batch ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchStatus {
    Completed,
    /// The batch deadline passed or the caller cancelled; artifacts written
    /// before that point are kept.
    Cancelled,
}

/// Result of one export run over a repository.
#[derive(Debug, Clone, Serialize)]
pub struct ExportOutcome {
    pub run_id: Uuid,
    pub bibids: Vec<String>,
    pub errors: Vec<RecordError>,
    pub status: BatchStatus,
    pub reindex_error: Option<String>,
}

impl ExportOutcome {
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            bibids: Vec::new(),
            errors: Vec::new(),
            status: BatchStatus::Completed,
            reindex_error: None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.status == BatchStatus::Cancelled
    }

    /// One-line message suitable for the digest log.
    pub fn summary(&self, label: &str) -> String {
        let mut msg = format!(
            "{label}: {} records exported, {} errors",
            self.bibids.len(),
            self.errors.len()
        );
        if self.is_cancelled() {
            msg.push_str(" (batch cancelled before completion)");
        }
        if let Some(err) = &self.reindex_error {
            msg.push_str(&format!("; reindex failed: {err}"));
        }
        for error in &self.errors {
            msg.push_str(&format!("\n{error}"));
        }
        msg
    }
}

impl Default for ExportOutcome {
    fn default() -> Self {
        Self::new()
    }
}

/// Compute a SHA-256 hash of raw bytes, returned as 64-char hex.
pub fn compute_hash(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    format!("{:x}", hasher.finalize())
}

fn trailing_id<T: std::str::FromStr>(uri: &str) -> Option<T> {
    uri.trim_end_matches('/').rsplit('/').next()?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_compute_hash_consistency() {
        let h1 = compute_hash(b"<ead/>");
        let h2 = compute_hash(b"<ead/>");
        assert_eq!(h1, h2);
        assert_eq!(h1.len(), 64);
        assert_ne!(h1, compute_hash(b"<ead></ead>"));
    }

    #[test]
    fn test_exportable_requires_published_and_unsuppressed() {
        let mut record = Record {
            uri: "/repositories/2/resources/1".into(),
            publish: true,
            ..Default::default()
        };
        assert!(record.is_exportable());

        record.suppressed = true;
        assert!(!record.is_exportable());

        record.suppressed = false;
        record.publish = false;
        assert!(!record.is_exportable());
    }

    #[test]
    fn test_record_deserializes_with_missing_fields() {
        let record: Record = serde_json::from_value(serde_json::json!({
            "uri": "/repositories/2/resources/5501",
            "id_0": "4078773",
            "publish": true,
            "title": "Papers",
            "system_mtime": "2024-03-01T12:00:00Z",
            "extents": [
                {"number": "3.5", "extent_type": "linear_feet"},
                {"number": "2", "extent_type": "boxes"}
            ]
        }))
        .unwrap();

        assert_eq!(record.id_0.as_deref(), Some("4078773"));
        assert_eq!(record.id_1, None);
        assert!(!record.suppressed);
        assert_eq!(record.resource_id(), Some(5501));
        assert_eq!(record.extents.len(), 2);
        assert_eq!(record.extents[1].extent_type, "boxes");
        assert_eq!(
            record.system_mtime,
            Some(Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_repository_id() {
        let repo = Repository {
            uri: "/repositories/7".into(),
            name: "Rare Book".into(),
            repo_code: "nnc-rb".into(),
            org_code: Some("NNC-RB".into()),
            publish: true,
        };
        assert_eq!(repo.id(), Some(7));
    }

    #[test]
    fn test_watermark_default_is_a_day_ago() {
        let now = Utc::now().timestamp();
        let wm = Watermark::default().epoch_seconds();
        assert!((now - 86_400 - wm).abs() <= 2);
    }

    #[test]
    fn test_watermark_parse() {
        assert_eq!(Watermark::parse("1700000000").unwrap().epoch_seconds(), 1_700_000_000);
        assert_eq!(
            Watermark::parse("2024-01-01T00:00:00Z")
                .unwrap()
                .epoch_seconds(),
            1_704_067_200
        );
        assert!(matches!(
            Watermark::parse("yesterday"),
            Err(AppError::ConfigError(_))
        ));
    }

    #[test]
    fn test_outcome_summary() {
        let mut outcome = ExportOutcome::new();
        outcome.bibids.push("cul-1".into());
        outcome.errors.push(RecordError {
            bibid: Some("cul-2".into()),
            resource: "/repositories/2/resources/2".into(),
            message: "HTTP 500".into(),
        });
        let summary = outcome.summary("EAD export (repo 2)");
        assert!(summary.starts_with("EAD export (repo 2): 1 records exported, 1 errors"));
        assert!(summary.contains("cul-2: HTTP 500"));
    }
}
