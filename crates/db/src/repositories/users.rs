use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use marketbot_core::domain::user::{User, UserId};

use super::{NewUser, RepositoryError, UserRepository};
use crate::DbPool;

pub struct SqlUserRepository {
    pool: DbPool,
}

impl SqlUserRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn decode_user(row: &SqliteRow) -> Result<User, RepositoryError> {
    Ok(User {
        id: UserId(row.try_get("id")?),
        external_id: row.try_get("external_id")?,
        username: row.try_get("username")?,
        password_hash: row.try_get("password_hash")?,
        registration_date: row.try_get("registration_date")?,
        trial_end_date: row.try_get("trial_end_date")?,
        balance_cents: row.try_get("balance_cents")?,
    })
}

#[async_trait::async_trait]
impl UserRepository for SqlUserRepository {
    async fn find_by_id(&self, id: UserId) -> Result<Option<User>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM users WHERE id = ?")
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(decode_user).transpose()
    }

    async fn find_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<User>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM users WHERE external_id = ?")
            .bind(external_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(decode_user).transpose()
    }

    async fn create(&self, new_user: NewUser) -> Result<User, RepositoryError> {
        let now = Utc::now();
        let result = sqlx::query(
            "INSERT INTO users \
             (external_id, username, password_hash, registration_date, trial_end_date, balance_cents) \
             VALUES (?, ?, ?, ?, ?, 0)",
        )
        .bind(&new_user.external_id)
        .bind(&new_user.username)
        .bind(&new_user.password_hash)
        .bind(now)
        .bind(new_user.trial_end_date)
        .execute(&self.pool)
        .await?;

        Ok(User {
            id: UserId(result.last_insert_rowid()),
            external_id: new_user.external_id,
            username: new_user.username,
            password_hash: new_user.password_hash,
            registration_date: now,
            trial_end_date: new_user.trial_end_date,
            balance_cents: 0,
        })
    }

    async fn list_with_active_bots(&self) -> Result<Vec<User>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT DISTINCT u.* FROM users u \
             JOIN bots b ON b.user_id = u.id \
             WHERE b.status = 'active' \
             ORDER BY u.id",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(decode_user).collect()
    }

    async fn debit(&self, id: UserId, amount_cents: i64) -> Result<bool, RepositoryError> {
        // Relative update with a balance guard: a raced or undersized
        // balance leaves the row untouched instead of going negative.
        let result = sqlx::query(
            "UPDATE users SET balance_cents = balance_cents - ? \
             WHERE id = ? AND balance_cents >= ?",
        )
        .bind(amount_cents)
        .bind(id.0)
        .bind(amount_cents)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use crate::connect_with;
    use crate::migrations::run_pending;
    use crate::repositories::{NewUser, UserRepository};

    use super::SqlUserRepository;

    async fn repo() -> SqlUserRepository {
        let pool = connect_with("sqlite::memory:", 1, 5).await.expect("connect");
        run_pending(&pool).await.expect("migrate");
        SqlUserRepository::new(pool)
    }

    fn new_user(external_id: &str) -> NewUser {
        NewUser {
            external_id: external_id.to_string(),
            username: format!("user-{external_id}"),
            password_hash: "hash".to_string(),
            trial_end_date: Utc::now() + Duration::days(14),
        }
    }

    #[tokio::test]
    async fn creates_and_finds_users() {
        let repo = repo().await;
        let created = repo.create(new_user("ext-1")).await.expect("create");

        let by_id = repo.find_by_id(created.id).await.expect("find by id");
        assert_eq!(by_id, Some(created.clone()));

        let by_external = repo.find_by_external_id("ext-1").await.expect("find by external id");
        assert_eq!(by_external, Some(created));

        assert_eq!(repo.find_by_external_id("ext-404").await.expect("miss"), None);
    }

    #[tokio::test]
    async fn debit_is_guarded_and_relative() {
        let repo = repo().await;
        let user = repo.create(new_user("ext-2")).await.expect("create");

        // Fresh users start at zero; any debit must be refused.
        assert!(!repo.debit(user.id, 100).await.expect("debit attempt"));

        sqlx::query("UPDATE users SET balance_cents = 10000 WHERE id = ?")
            .bind(user.id.0)
            .execute(&repo.pool)
            .await
            .expect("seed balance");

        assert!(repo.debit(user.id, 4_000).await.expect("first debit"));
        assert!(repo.debit(user.id, 4_000).await.expect("second debit"));
        assert!(!repo.debit(user.id, 4_000).await.expect("third debit refused"));

        let after = repo.find_by_id(user.id).await.expect("reload").expect("exists");
        assert_eq!(after.balance_cents, 2_000);
    }
}
