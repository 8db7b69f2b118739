use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use marketbot_core::domain::bot::BotId;
use marketbot_core::domain::credential::{AccountId, Credential};

use super::{CredentialRepository, RepositoryError};
use crate::DbPool;

pub struct SqlCredentialRepository {
    pool: DbPool,
}

impl SqlCredentialRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn decode_credential(row: &SqliteRow) -> Result<Credential, RepositoryError> {
    Ok(Credential {
        bot_id: BotId(row.try_get("bot_id")?),
        account_id: AccountId(row.try_get("account_id")?),
        access_token: row.try_get("access_token")?,
        refresh_token: row.try_get("refresh_token")?,
        expires_at: row.try_get("expires_at")?,
        scope: row.try_get("scope")?,
    })
}

#[async_trait::async_trait]
impl CredentialRepository for SqlCredentialRepository {
    async fn find_by_bot(&self, bot_id: BotId) -> Result<Option<Credential>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM tokens WHERE bot_id = ?")
            .bind(bot_id.0)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(decode_credential).transpose()
    }

    async fn find_by_account(
        &self,
        account_id: AccountId,
    ) -> Result<Option<Credential>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM tokens WHERE account_id = ?")
            .bind(account_id.0)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(decode_credential).transpose()
    }

    async fn upsert(&self, credential: &Credential) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO tokens (bot_id, account_id, access_token, refresh_token, expires_at, scope) \
             VALUES (?, ?, ?, ?, ?, ?) \
             ON CONFLICT (bot_id) DO UPDATE SET \
             account_id = excluded.account_id, \
             access_token = excluded.access_token, \
             refresh_token = excluded.refresh_token, \
             expires_at = excluded.expires_at, \
             scope = excluded.scope",
        )
        .bind(credential.bot_id.0)
        .bind(credential.account_id.0)
        .bind(&credential.access_token)
        .bind(&credential.refresh_token)
        .bind(credential.expires_at)
        .bind(&credential.scope)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_by_bot(&self, bot_id: BotId) -> Result<(), RepositoryError> {
        sqlx::query("DELETE FROM tokens WHERE bot_id = ?")
            .bind(bot_id.0)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
