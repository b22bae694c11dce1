use eadsync_core::AppError;

const DEFAULT_MAX_CONNECTIONS: u32 = 2;

/// Configuration for the digest database connection pool.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

impl DatabaseConfig {
    /// Read configuration from environment variables.
    ///
    /// - `DATABASE_URL` (required)
    /// - `DATABASE_MAX_CONNECTIONS` (optional, defaults to 2)
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, AppError> {
        let url = lookup("DATABASE_URL").filter(|v| !v.is_empty()).ok_or_else(|| {
            AppError::ConfigError("DATABASE_URL not set. Required for the database digest store.".into())
        })?;

        let max_connections = match lookup("DATABASE_MAX_CONNECTIONS") {
            None => DEFAULT_MAX_CONNECTIONS,
            Some(raw) => {
                let parsed: u32 = raw.parse().map_err(|_| {
                    AppError::ConfigError(format!(
                        "Invalid DATABASE_MAX_CONNECTIONS '{raw}': must be a positive integer"
                    ))
                })?;
                if parsed == 0 {
                    return Err(AppError::ConfigError(
                        "DATABASE_MAX_CONNECTIONS must be at least 1".into(),
                    ));
                }
                parsed
            }
        };

        Ok(Self {
            url,
            max_connections,
        })
    }
}
