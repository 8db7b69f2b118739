use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use marketbot_core::domain::session::{RegistrationSession, RegistrationStep};

use super::{RegistrationSessionRepository, RepositoryError};
use crate::DbPool;

pub struct SqlRegistrationSessionRepository {
    pool: DbPool,
}

impl SqlRegistrationSessionRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn decode_session(row: &SqliteRow) -> Result<RegistrationSession, RepositoryError> {
    let step_raw: String = row.try_get("step")?;
    let step = RegistrationStep::parse(&step_raw).ok_or_else(|| {
        RepositoryError::Decode(format!("registration_sessions.step: `{step_raw}`"))
    })?;

    Ok(RegistrationSession {
        external_id: row.try_get("external_id")?,
        step,
        username: row.try_get("username")?,
        created_at: row.try_get("created_at")?,
        expires_at: row.try_get("expires_at")?,
    })
}

#[async_trait::async_trait]
impl RegistrationSessionRepository for SqlRegistrationSessionRepository {
    async fn put(&self, session: &RegistrationSession) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO registration_sessions (external_id, step, username, created_at, expires_at) \
             VALUES (?, ?, ?, ?, ?) \
             ON CONFLICT (external_id) DO UPDATE SET \
             step = excluded.step, \
             username = excluded.username, \
             expires_at = excluded.expires_at",
        )
        .bind(&session.external_id)
        .bind(session.step.as_str())
        .bind(&session.username)
        .bind(session.created_at)
        .bind(session.expires_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_live(
        &self,
        external_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<RegistrationSession>, RepositoryError> {
        let row = sqlx::query(
            "SELECT * FROM registration_sessions WHERE external_id = ? AND expires_at > ?",
        )
        .bind(external_id)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(decode_session).transpose()
    }

    async fn delete(&self, external_id: &str) -> Result<(), RepositoryError> {
        sqlx::query("DELETE FROM registration_sessions WHERE external_id = ?")
            .bind(external_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, RepositoryError> {
        let result = sqlx::query("DELETE FROM registration_sessions WHERE expires_at <= ?")
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
