//! Batch check of the finding aids already in the EAD cache.

use std::fmt;
use std::fs;
use std::path::PathBuf;

use crate::cache::{ArtifactCache, ArtifactKind};
use crate::error::AppError;
use crate::validate::{EAD_SCHEMA, RecordValidator};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileStatus {
    Valid,
    /// Well-formed, but with schema violations.
    Invalid(Vec<String>),
    /// Not parseable as XML.
    Malformed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileCheck {
    pub bibid: String,
    pub path: PathBuf,
    pub status: FileStatus,
}

impl fmt::Display for FileCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.status {
            FileStatus::Valid => write!(f, "{}: valid", self.bibid),
            FileStatus::Invalid(violations) => {
                write!(f, "{}: {}", self.bibid, violations.join("; "))
            }
            FileStatus::Malformed(error) => write!(f, "{}: malformed: {error}", self.bibid),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheAudit {
    pub dir: PathBuf,
    pub files: Vec<FileCheck>,
}

impl CacheAudit {
    pub fn checked(&self) -> usize {
        self.files.len()
    }

    pub fn invalid_count(&self) -> usize {
        self.count(|s| matches!(s, FileStatus::Invalid(_)))
    }

    pub fn malformed_count(&self) -> usize {
        self.count(|s| matches!(s, FileStatus::Malformed(_)))
    }

    fn count(&self, pred: impl Fn(&FileStatus) -> bool) -> usize {
        self.files.iter().filter(|c| pred(&c.status)).count()
    }

    /// Files that are invalid or malformed, in bibid order.
    pub fn problems(&self) -> impl Iterator<Item = &FileCheck> {
        self.files.iter().filter(|c| c.status != FileStatus::Valid)
    }

    /// Lines posted to the digest after an audit.
    pub fn digest_messages(&self) -> Vec<String> {
        vec![
            format!("{} EAD files checked in {}.", self.checked(), self.dir.display()),
            format!("Files with schema errors: {}", self.invalid_count()),
            format!("Malformed files: {}", self.malformed_count()),
        ]
    }
}

/// Check every cached EAD for well-formedness and against the `ead` schema.
///
/// Parse failures are recorded per file; I/O failures and an unloadable
/// schema abort the audit.
pub fn audit_ead_cache(
    cache: &ArtifactCache,
    validator: &RecordValidator,
) -> Result<CacheAudit, AppError> {
    let mut audit = CacheAudit {
        dir: cache.dir_for(ArtifactKind::Ead),
        files: Vec::new(),
    };

    for (bibid, path) in cache.list(ArtifactKind::Ead)? {
        let bytes = fs::read(&path)?;
        let status = match validator.check(&bytes, EAD_SCHEMA) {
            Ok(report) if report.is_valid() => FileStatus::Valid,
            Ok(report) => FileStatus::Invalid(report.violations),
            Err(AppError::MalformedXml(error)) => FileStatus::Malformed(error),
            Err(e) => return Err(e),
        };
        let check = FileCheck {
            bibid,
            path,
            status,
        };
        if check.status != FileStatus::Valid {
            tracing::warn!(path = %check.path.display(), "{check}");
        }
        audit.files.push(check);
    }

    tracing::info!(
        checked = audit.checked(),
        invalid = audit.invalid_count(),
        malformed = audit.malformed_count(),
        "EAD cache audited"
    );
    Ok(audit)
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::testutil::SAMPLE_EAD;
    use crate::validate::SchemaRegistry;

    fn seeded(dir: &TempDir) -> ArtifactCache {
        let cache = ArtifactCache::new(dir.path());
        cache
            .write(ArtifactKind::Ead, "cul-1", SAMPLE_EAD.as_bytes())
            .unwrap();
        cache
            .write(
                ArtifactKind::Ead,
                "cul-2",
                br#"<ead xmlns="urn:isbn:1-931666-22-9"><eadheader><eadid>2</eadid></eadheader></ead>"#,
            )
            .unwrap();
        cache
            .write(ArtifactKind::Ead, "cul-3", b"<ead><archdesc></ead>")
            .unwrap();
        cache
            .write(ArtifactKind::Pdf, "cul-4", b"%PDF-1.4")
            .unwrap();
        fs::write(dir.path().join("ead_cache/clio_5.txt"), b"not an ead").unwrap();
        cache
    }

    #[test]
    fn test_audit_classifies_each_cached_file() {
        let tmp = TempDir::new().unwrap();
        let cache = seeded(&tmp);

        let audit = audit_ead_cache(&cache, &RecordValidator::default()).unwrap();

        assert_eq!(audit.checked(), 3);
        assert_eq!(audit.invalid_count(), 1);
        assert_eq!(audit.malformed_count(), 1);
        assert_eq!(audit.files[0].status, FileStatus::Valid);
        assert!(matches!(&audit.files[1].status, FileStatus::Invalid(v) if !v.is_empty()));
        assert!(matches!(audit.files[2].status, FileStatus::Malformed(_)));

        let problems: Vec<String> = audit.problems().map(|c| c.bibid.clone()).collect();
        assert_eq!(problems, vec!["cul-2", "cul-3"]);
        assert!(audit.files[2].to_string().starts_with("cul-3: malformed: "));
    }

    #[test]
    fn test_digest_messages_count_malformed_separately() {
        let tmp = TempDir::new().unwrap();
        let audit = audit_ead_cache(&seeded(&tmp), &RecordValidator::default()).unwrap();

        let messages = audit.digest_messages();
        assert_eq!(
            messages[0],
            format!("3 EAD files checked in {}.", tmp.path().join("ead_cache").display())
        );
        assert_eq!(messages[1], "Files with schema errors: 1");
        assert_eq!(messages[2], "Malformed files: 1");
    }

    #[test]
    fn test_missing_cache_is_empty_audit() {
        let tmp = TempDir::new().unwrap();
        let audit = audit_ead_cache(&ArtifactCache::new(tmp.path()), &RecordValidator::default())
            .unwrap();
        assert_eq!(audit.checked(), 0);
        assert_eq!(audit.digest_messages()[1], "Files with schema errors: 0");
    }

    #[test]
    fn test_unknown_schema_aborts() {
        let tmp = TempDir::new().unwrap();
        let schemas = TempDir::new().unwrap();
        fs::write(schemas.path().join("ead.json"), b"{ not json").unwrap();
        let validator = RecordValidator::new(SchemaRegistry::with_dir(schemas.path()));

        let err = audit_ead_cache(&seeded(&tmp), &validator).unwrap_err();
        assert!(matches!(err, AppError::SchemaError(_)));
    }
}
