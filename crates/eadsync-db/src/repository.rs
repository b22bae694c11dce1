use chrono::{DateTime, Utc};
use eadsync_core::digest::DigestEntry;
use eadsync_core::error::AppError;
use eadsync_core::traits::DigestStore;
use sqlx::{PgPool, Pool, Postgres};

/// Digest log persistence in PostgreSQL.
#[derive(Clone)]
pub struct DigestRepository {
    pool: Pool<Postgres>,
}

impl DigestRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn append(&self, entry: &DigestEntry) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO digest_entries (script_name, logged_at, message)
            VALUES ($1, $2, $3)
            "#,
        )
        .bind(&entry.script_name)
        .bind(entry.timestamp)
        .bind(&entry.message)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;
        Ok(())
    }

    /// All entries in insertion order.
    pub async fn entries(&self) -> Result<Vec<DigestEntry>, AppError> {
        let rows = sqlx::query_as::<_, DigestRow>(
            r#"
            SELECT script_name, logged_at, message
            FROM digest_entries
            ORDER BY logged_at ASC, id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    pub async fn prune_before(&self, cutoff: DateTime<Utc>) -> Result<u64, AppError> {
        let result = sqlx::query("DELETE FROM digest_entries WHERE logged_at < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;
        Ok(result.rows_affected())
    }
}

#[derive(sqlx::FromRow)]
struct DigestRow {
    script_name: String,
    logged_at: DateTime<Utc>,
    message: String,
}

impl From<DigestRow> for DigestEntry {
    fn from(row: DigestRow) -> Self {
        DigestEntry {
            script_name: row.script_name,
            timestamp: row.logged_at,
            message: row.message,
        }
    }
}

impl DigestStore for DigestRepository {
    async fn append(&self, entry: &DigestEntry) -> Result<(), AppError> {
        DigestRepository::append(self, entry).await
    }

    async fn entries(&self) -> Result<Vec<DigestEntry>, AppError> {
        DigestRepository::entries(self).await
    }

    async fn prune_before(&self, cutoff: DateTime<Utc>) -> Result<u64, AppError> {
        DigestRepository::prune_before(self, cutoff).await
    }
}
