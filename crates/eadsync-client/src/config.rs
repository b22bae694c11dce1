use std::time::Duration;

use eadsync_core::AppError;

const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// Connection settings for one ArchivesSpace instance.
#[derive(Clone)]
pub struct AspaceConfig {
    /// API root, e.g. `https://aspace.example.edu/api`.
    pub base_url: String,
    pub username: String,
    pub password: String,
    pub timeout: Duration,
}

impl std::fmt::Debug for AspaceConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AspaceConfig")
            .field("base_url", &self.base_url)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl AspaceConfig {
    /// Read configuration from environment variables.
    ///
    /// - `ASPACE_BASE_URL`, `ASPACE_USERNAME`, `ASPACE_PASSWORD` (required)
    /// - `ASPACE_TIMEOUT_SECS` (optional, defaults to 60)
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, AppError> {
        Ok(Self {
            base_url: required_url(&lookup, "ASPACE_BASE_URL")?,
            username: required(&lookup, "ASPACE_USERNAME")?,
            password: required(&lookup, "ASPACE_PASSWORD")?,
            timeout: timeout(&lookup, "ASPACE_TIMEOUT_SECS")?,
        })
    }
}

/// Connection settings for the finding-aid index.
#[derive(Clone)]
pub struct IndexConfig {
    /// Site root; the reindex endpoint is `{base_url}/api/v1/index/index_ead`.
    pub base_url: String,
    pub token: String,
    pub timeout: Duration,
}

impl std::fmt::Debug for IndexConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexConfig")
            .field("base_url", &self.base_url)
            .field("token", &"<redacted>")
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl IndexConfig {
    /// Read configuration from environment variables.
    ///
    /// - `INDEX_BASE_URL`, `INDEX_TOKEN` (required)
    /// - `INDEX_TIMEOUT_SECS` (optional, defaults to 60)
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, AppError> {
        Ok(Self {
            base_url: required_url(&lookup, "INDEX_BASE_URL")?,
            token: required(&lookup, "INDEX_TOKEN")?,
            timeout: timeout(&lookup, "INDEX_TIMEOUT_SECS")?,
        })
    }
}

fn required(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<String, AppError> {
    lookup(key)
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| AppError::ConfigError(format!("{key} not set")))
}

fn required_url(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<String, AppError> {
    let raw = required(lookup, key)?;
    let parsed = url::Url::parse(&raw)
        .map_err(|e| AppError::ConfigError(format!("Invalid {key} '{raw}': {e}")))?;
    match parsed.scheme() {
        "http" | "https" => Ok(raw.trim_end_matches('/').to_string()),
        scheme => Err(AppError::ConfigError(format!(
            "Invalid {key}: scheme '{scheme}' is not http/https"
        ))),
    }
}

fn timeout(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Duration, AppError> {
    match lookup(key) {
        None => Ok(Duration::from_secs(DEFAULT_TIMEOUT_SECS)),
        Some(raw) => {
            let secs: u64 = raw.parse().map_err(|_| {
                AppError::ConfigError(format!("Invalid {key} '{raw}': must be a positive integer"))
            })?;
            if secs == 0 {
                return Err(AppError::ConfigError(format!("{key} must be at least 1")));
            }
            Ok(Duration::from_secs(secs))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_aspace_config_from_lookup() {
        let config = AspaceConfig::from_lookup(env(&[
            ("ASPACE_BASE_URL", "https://aspace.example.edu/api/"),
            ("ASPACE_USERNAME", "exporter"),
            ("ASPACE_PASSWORD", "hunter2"),
        ]))
        .unwrap();
        assert_eq!(config.base_url, "https://aspace.example.edu/api");
        assert_eq!(config.timeout, Duration::from_secs(60));
        assert!(!format!("{config:?}").contains("hunter2"));
    }

    #[test]
    fn test_missing_password_is_config_error() {
        let err = AspaceConfig::from_lookup(env(&[
            ("ASPACE_BASE_URL", "https://aspace.example.edu/api"),
            ("ASPACE_USERNAME", "exporter"),
        ]))
        .unwrap_err();
        assert!(matches!(err, AppError::ConfigError(msg) if msg.contains("ASPACE_PASSWORD")));
    }

    #[test]
    fn test_bad_url_and_timeout() {
        assert!(IndexConfig::from_lookup(env(&[
            ("INDEX_BASE_URL", "ftp://example.edu"),
            ("INDEX_TOKEN", "t"),
        ]))
        .is_err());
        assert!(IndexConfig::from_lookup(env(&[
            ("INDEX_BASE_URL", "https://findingaids.example.edu"),
            ("INDEX_TOKEN", "t"),
            ("INDEX_TIMEOUT_SECS", "0"),
        ]))
        .is_err());
    }
}
