use eadsync_core::AppError;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

use crate::config::DatabaseConfig;
use crate::repository::DigestRepository;

/// Owns the connection pool, runs migrations and vends repositories.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, AppError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.url)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to connect: {e}")))?;

        Ok(Self { pool })
    }

    /// Wrap an existing pool (used by the integration tests).
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> Result<(), AppError> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Migration failed: {e}")))?;
        tracing::debug!("Database migrations applied");
        Ok(())
    }

    pub fn digest_repo(&self) -> DigestRepository {
        DigestRepository::new(self.pool.clone())
    }
}
