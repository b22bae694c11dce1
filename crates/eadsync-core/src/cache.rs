//! On-disk artifact cache shared with the finding-aid site.
//!
//! ```text
//! {parent}/ead_cache/as_ead_{bibid}.xml
//! {parent}/pdf_cache/as_ead_{bibid}.pdf
//! {parent}/marc_cache/as_marc_{bibid}.xml
//! {parent}/html_cache/...                  stale renderings, purged per bibid
//! ```

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use uuid::Uuid;

use crate::error::AppError;
use crate::models::compute_hash;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    Ead,
    Pdf,
    Marc,
}

impl ArtifactKind {
    fn dir(&self) -> &'static str {
        match self {
            ArtifactKind::Ead => "ead_cache",
            ArtifactKind::Pdf => "pdf_cache",
            ArtifactKind::Marc => "marc_cache",
        }
    }

    fn file_name(&self, bibid: &str) -> String {
        let (prefix, suffix) = self.affixes();
        format!("{prefix}{bibid}{suffix}")
    }

    fn affixes(&self) -> (&'static str, &'static str) {
        match self {
            ArtifactKind::Ead => ("as_ead_", ".xml"),
            ArtifactKind::Pdf => ("as_ead_", ".pdf"),
            ArtifactKind::Marc => ("as_marc_", ".xml"),
        }
    }

    /// Inverse of the file naming: `as_ead_cul-1.xml` → `cul-1`.
    fn bibid_of<'a>(&self, file_name: &'a str) -> Option<&'a str> {
        let (prefix, suffix) = self.affixes();
        file_name
            .strip_prefix(prefix)?
            .strip_suffix(suffix)
            .filter(|bibid| !bibid.is_empty())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteStatus {
    Created,
    Updated,
    /// Existing file already had identical content.
    Unchanged,
}

#[derive(Debug, Clone)]
pub struct ArtifactCache {
    parent: PathBuf,
}

impl ArtifactCache {
    pub fn new(parent: impl Into<PathBuf>) -> Self {
        Self {
            parent: parent.into(),
        }
    }

    pub fn path_for(&self, kind: ArtifactKind, bibid: &str) -> Result<PathBuf, AppError> {
        if bibid.is_empty() || bibid.contains(['/', '\\']) || bibid.contains("..") {
            return Err(AppError::Generic(format!(
                "Bibid '{bibid}' cannot be used as a file name"
            )));
        }
        Ok(self.parent.join(kind.dir()).join(kind.file_name(bibid)))
    }

    pub fn dir_for(&self, kind: ArtifactKind) -> PathBuf {
        self.parent.join(kind.dir())
    }

    /// Cached artifacts of one kind as `(bibid, path)`, sorted by bibid.
    /// A cache directory that does not exist yet is empty.
    pub fn list(&self, kind: ArtifactKind) -> Result<Vec<(String, PathBuf)>, AppError> {
        let entries = match fs::read_dir(self.dir_for(kind)) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut found = Vec::new();
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name();
            if let Some(bibid) = kind.bibid_of(&name.to_string_lossy()) {
                found.push((bibid.to_string(), entry.path()));
            }
        }
        found.sort();
        Ok(found)
    }

    /// Write atomically: readers see either the old or the new bytes.
    pub fn write(
        &self,
        kind: ArtifactKind,
        bibid: &str,
        bytes: &[u8],
    ) -> Result<WriteStatus, AppError> {
        let path = self.path_for(kind, bibid)?;
        let status = match fs::read(&path) {
            Ok(existing) if compute_hash(&existing) == compute_hash(bytes) => {
                return Ok(WriteStatus::Unchanged);
            }
            Ok(_) => WriteStatus::Updated,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => WriteStatus::Created,
            Err(e) => return Err(e.into()),
        };

        let dir = path
            .parent()
            .ok_or_else(|| AppError::Generic(format!("No parent for {}", path.display())))?;
        fs::create_dir_all(dir)?;

        let tmp = dir.join(format!(".{}.{}.tmp", kind.file_name(bibid), Uuid::new_v4()));
        let result = write_then_rename(&tmp, &path, bytes);
        if result.is_err() {
            let _ = fs::remove_file(&tmp);
        }
        result?;

        tracing::debug!(path = %path.display(), ?status, "Wrote artifact");
        Ok(status)
    }

    pub fn read(&self, kind: ArtifactKind, bibid: &str) -> Result<Option<Vec<u8>>, AppError> {
        match fs::read(self.path_for(kind, bibid)?) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Remove cached HTML renderings whose file name contains `bibid`.
    /// Returns the number of files removed.
    pub fn purge_html(&self, bibid: &str) -> Result<usize, AppError> {
        let dir = self.parent.join("html_cache");
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let mut removed = 0;
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name();
            if entry.file_type()?.is_file() && matches_bibid(&name.to_string_lossy(), bibid) {
                fs::remove_file(entry.path())?;
                removed += 1;
            }
        }
        if removed > 0 {
            tracing::debug!(%bibid, removed, "Purged stale HTML");
        }
        Ok(removed)
    }
}

fn write_then_rename(tmp: &Path, dest: &Path, bytes: &[u8]) -> Result<(), AppError> {
    let mut file = fs::File::create(tmp)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    fs::rename(tmp, dest)?;
    Ok(())
}

/// `bibid` must appear as a whole token, so `cul-12` does not match
/// `cul-123_summary.html`.
fn matches_bibid(file_name: &str, bibid: &str) -> bool {
    file_name.match_indices(bibid).any(|(at, _)| {
        let before = file_name[..at].chars().next_back();
        let after = file_name[at + bibid.len()..].chars().next();
        !before.is_some_and(char::is_alphanumeric)
            && !after.is_some_and(|c| c.is_alphanumeric() || c == '-')
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_layout() {
        let cache = ArtifactCache::new("/srv/fa");
        assert_eq!(
            cache.path_for(ArtifactKind::Ead, "cul-4078773").unwrap(),
            PathBuf::from("/srv/fa/ead_cache/as_ead_cul-4078773.xml")
        );
        assert_eq!(
            cache.path_for(ArtifactKind::Pdf, "cul-4078773").unwrap(),
            PathBuf::from("/srv/fa/pdf_cache/as_ead_cul-4078773.pdf")
        );
        assert_eq!(
            cache.path_for(ArtifactKind::Marc, "4078773").unwrap(),
            PathBuf::from("/srv/fa/marc_cache/as_marc_4078773.xml")
        );
    }

    #[test]
    fn test_unsafe_bibid_rejected() {
        let cache = ArtifactCache::new("/srv/fa");
        assert!(cache.path_for(ArtifactKind::Ead, "../x").is_err());
        assert!(cache.path_for(ArtifactKind::Ead, "").is_err());
    }

    #[test]
    fn test_write_read_round_trip() {
        let tmp = TempDir::new().unwrap();
        let cache = ArtifactCache::new(tmp.path());
        let bytes = b"<ead>\xc3\xa9</ead>";

        assert_eq!(
            cache.write(ArtifactKind::Ead, "cul-1", bytes).unwrap(),
            WriteStatus::Created
        );
        assert_eq!(
            cache.read(ArtifactKind::Ead, "cul-1").unwrap().as_deref(),
            Some(&bytes[..])
        );
        assert_eq!(cache.read(ArtifactKind::Pdf, "cul-1").unwrap(), None);
    }

    #[test]
    fn test_identical_write_is_unchanged() {
        let tmp = TempDir::new().unwrap();
        let cache = ArtifactCache::new(tmp.path());

        cache.write(ArtifactKind::Marc, "1", b"a").unwrap();
        assert_eq!(
            cache.write(ArtifactKind::Marc, "1", b"a").unwrap(),
            WriteStatus::Unchanged
        );
        assert_eq!(
            cache.write(ArtifactKind::Marc, "1", b"b").unwrap(),
            WriteStatus::Updated
        );

        let leftovers: Vec<_> = fs::read_dir(tmp.path().join("marc_cache"))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(leftovers, vec!["as_marc_1.xml"]);
    }

    #[test]
    fn test_purge_html_matches_whole_bibid() {
        let tmp = TempDir::new().unwrap();
        let html = tmp.path().join("html_cache");
        fs::create_dir_all(&html).unwrap();
        for name in ["cul-12.html", "cul-12_dsc.html", "cul-123.html", "other.html"] {
            fs::write(html.join(name), "x").unwrap();
        }

        let cache = ArtifactCache::new(tmp.path());
        assert_eq!(cache.purge_html("cul-12").unwrap(), 2);
        assert!(html.join("cul-123.html").exists());
        assert!(html.join("other.html").exists());
    }

    #[test]
    fn test_list_returns_only_artifacts_of_kind() {
        let tmp = TempDir::new().unwrap();
        let cache = ArtifactCache::new(tmp.path());
        cache.write(ArtifactKind::Ead, "cul-2", b"<ead/>").unwrap();
        cache.write(ArtifactKind::Ead, "MS#0001", b"<ead/>").unwrap();
        cache.write(ArtifactKind::Marc, "2", b"<record/>").unwrap();
        fs::write(tmp.path().join("ead_cache/clio_2.txt"), b"x").unwrap();
        fs::write(tmp.path().join("ead_cache/as_ead_.xml"), b"x").unwrap();

        let bibids: Vec<String> = cache
            .list(ArtifactKind::Ead)
            .unwrap()
            .into_iter()
            .map(|(bibid, _)| bibid)
            .collect();
        assert_eq!(bibids, vec!["MS#0001", "cul-2"]);
        assert!(cache.list(ArtifactKind::Pdf).unwrap().is_empty());
    }

    #[test]
    fn test_purge_html_without_dir() {
        let tmp = TempDir::new().unwrap();
        assert_eq!(ArtifactCache::new(tmp.path()).purge_html("cul-1").unwrap(), 0);
    }
}
