//! Bibid derivation from a record's hierarchical identifier parts.

use std::fmt;
use std::str::FromStr;

use crate::error::AppError;
use crate::models::Record;

/// Derive the canonical bibid from identifier parts.
///
/// Precedence, evaluated in order:
/// 1. A purely numeric first part with no further parts is returned verbatim.
/// 2. If a second or third part is present, all present parts are joined
///    with `-`.
/// 3. Otherwise the first part alone.
///
/// Blank parts count as absent. Fails with [`AppError::MissingIdentifier`]
/// only when every part is absent.
pub fn resolve(parts: &[Option<String>]) -> Result<String, AppError> {
    let part = |i: usize| -> Option<&str> {
        parts
            .get(i)
            .and_then(|p| p.as_deref())
            .map(str::trim)
            .filter(|s| !s.is_empty())
    };
    let present: Vec<&str> = (0..parts.len()).filter_map(part).collect();
    let has_more = part(1).is_some() || part(2).is_some();

    match part(0) {
        Some(id) if is_numeric(id) && !has_more => Ok(id.to_string()),
        _ if has_more => Ok(present.join("-")),
        Some(id) => Ok(id.to_string()),
        None => match present.as_slice() {
            // Only id_3 is set.
            [only] => Ok((*only).to_string()),
            _ => Err(AppError::MissingIdentifier(String::new())),
        },
    }
}

/// Resolve the bibid for a record, attaching its URI to a missing-identifier error.
pub fn resolve_record(record: &Record) -> Result<String, AppError> {
    resolve(&record.identifier_parts()).map_err(|e| match e {
        AppError::MissingIdentifier(_) => AppError::MissingIdentifier(record.uri.clone()),
        other => other,
    })
}

fn is_numeric(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

/// Per-target naming policy applied by callers on top of [`resolve`].
///
/// The finding-aid index keys numeric bibids as `cul-<n>`, the legacy
/// catalog uses them bare; non-numeric bibids are never prefixed.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum BibidPolicy {
    #[default]
    Bare,
    NumericPrefix(String),
}

impl BibidPolicy {
    pub fn apply(&self, bibid: String) -> String {
        match self {
            BibidPolicy::NumericPrefix(prefix) if is_numeric(&bibid) => format!("{prefix}{bibid}"),
            _ => bibid,
        }
    }

    /// Resolve and apply the policy in one step.
    pub fn bibid_for(&self, record: &Record) -> Result<String, AppError> {
        resolve_record(record).map(|b| self.apply(b))
    }
}

impl fmt::Display for BibidPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BibidPolicy::Bare => write!(f, "bare"),
            BibidPolicy::NumericPrefix(prefix) => write!(f, "{prefix}"),
        }
    }
}

impl FromStr for BibidPolicy {
    type Err = String;

    /// `"bare"` (or empty) for no prefix, anything else is used as the prefix.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" | "bare" | "none" => Ok(BibidPolicy::Bare),
            prefix if prefix.chars().any(char::is_whitespace) => {
                Err(format!("Bibid prefix may not contain whitespace: '{prefix}'"))
            }
            prefix => Ok(BibidPolicy::NumericPrefix(prefix.to_string())),
        }
    }
}
