use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use marketbot_core::domain::bot::{Bot, BotId, BotStatus, ItemSelection, SpecEntry};
use marketbot_core::domain::user::UserId;

use super::{BotRepository, NewBot, RepositoryError};
use crate::DbPool;

pub struct SqlBotRepository {
    pool: DbPool,
}

impl SqlBotRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn decode_specs(raw: &str, column: &str) -> Result<Vec<SpecEntry>, RepositoryError> {
    serde_json::from_str(raw)
        .map_err(|error| RepositoryError::Decode(format!("bots.{column}: {error}")))
}

fn decode_bot(row: &SqliteRow) -> Result<Bot, RepositoryError> {
    let status_raw: String = row.try_get("status")?;
    let status = BotStatus::parse(&status_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("bots.status: `{status_raw}`")))?;

    let items = match row.try_get::<Option<String>, _>("items")? {
        None => None,
        Some(raw) => Some(
            ItemSelection::from_json(&raw)
                .ok_or_else(|| RepositoryError::Decode(format!("bots.items: `{raw}`")))?,
        ),
    };

    let parameters_raw: String = row.try_get("parameters")?;
    let actions_raw: String = row.try_get("actions")?;

    Ok(Bot {
        id: BotId(row.try_get("id")?),
        user_id: UserId(row.try_get("user_id")?),
        prompt: row.try_get("prompt")?,
        status,
        items,
        is_authorized: row.try_get("is_authorized")?,
        parameters: decode_specs(&parameters_raw, "parameters")?,
        actions: decode_specs(&actions_raw, "actions")?,
    })
}

fn encode_specs(entries: &[SpecEntry]) -> String {
    serde_json::to_string(entries).unwrap_or_else(|_| "[]".to_string())
}

#[async_trait::async_trait]
impl BotRepository for SqlBotRepository {
    async fn find_by_id(&self, id: BotId) -> Result<Option<Bot>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM bots WHERE id = ?")
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(decode_bot).transpose()
    }

    async fn find_for_user(
        &self,
        id: BotId,
        user_id: UserId,
    ) -> Result<Option<Bot>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM bots WHERE id = ? AND user_id = ?")
            .bind(id.0)
            .bind(user_id.0)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(decode_bot).transpose()
    }

    async fn create(&self, new_bot: NewBot) -> Result<Bot, RepositoryError> {
        let result = sqlx::query(
            "INSERT INTO bots (user_id, prompt, status, items, is_authorized, parameters, actions) \
             VALUES (?, ?, 'stopped', NULL, 0, ?, ?)",
        )
        .bind(new_bot.user_id.0)
        .bind(&new_bot.prompt)
        .bind(encode_specs(&new_bot.parameters))
        .bind(encode_specs(&new_bot.actions))
        .execute(&self.pool)
        .await?;

        Ok(Bot {
            id: BotId(result.last_insert_rowid()),
            user_id: new_bot.user_id,
            prompt: new_bot.prompt,
            status: BotStatus::Stopped,
            items: None,
            is_authorized: false,
            parameters: new_bot.parameters,
            actions: new_bot.actions,
        })
    }

    async fn update_config(
        &self,
        id: BotId,
        prompt: &str,
        parameters: &[SpecEntry],
        actions: &[SpecEntry],
    ) -> Result<(), RepositoryError> {
        sqlx::query("UPDATE bots SET prompt = ?, parameters = ?, actions = ? WHERE id = ?")
            .bind(prompt)
            .bind(encode_specs(parameters))
            .bind(encode_specs(actions))
            .bind(id.0)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn set_status(&self, id: BotId, status: BotStatus) -> Result<(), RepositoryError> {
        sqlx::query("UPDATE bots SET status = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(id.0)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn set_items(&self, id: BotId, items: &ItemSelection) -> Result<(), RepositoryError> {
        sqlx::query("UPDATE bots SET items = ? WHERE id = ?")
            .bind(items.to_json())
            .bind(id.0)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn mark_authorized(&self, id: BotId) -> Result<(), RepositoryError> {
        sqlx::query("UPDATE bots SET is_authorized = 1 WHERE id = ?")
            .bind(id.0)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn count_for_user(&self, user_id: UserId) -> Result<i64, RepositoryError> {
        let row = sqlx::query("SELECT COUNT(*) AS count FROM bots WHERE user_id = ?")
            .bind(user_id.0)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get("count"))
    }

    async fn list_active_for_user(&self, user_id: UserId) -> Result<Vec<Bot>, RepositoryError> {
        let rows =
            sqlx::query("SELECT * FROM bots WHERE user_id = ? AND status = 'active' ORDER BY id")
                .bind(user_id.0)
                .fetch_all(&self.pool)
                .await?;
        rows.iter().map(decode_bot).collect()
    }

    async fn delete(&self, id: BotId) -> Result<(), RepositoryError> {
        sqlx::query("DELETE FROM bots WHERE id = ?").bind(id.0).execute(&self.pool).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use marketbot_core::domain::bot::{BotStatus, ItemSelection, SpecEntry};
    use marketbot_core::domain::user::UserId;

    use crate::connect_with;
    use crate::migrations::run_pending;
    use crate::repositories::{
        BotRepository, NewBot, NewUser, SqlUserRepository, UserRepository,
    };
    use crate::DbPool;

    use super::SqlBotRepository;

    async fn pool() -> DbPool {
        let pool = connect_with("sqlite::memory:", 1, 5).await.expect("connect");
        run_pending(&pool).await.expect("migrate");
        pool
    }

    async fn seed_user(pool: &DbPool) -> UserId {
        let users = SqlUserRepository::new(pool.clone());
        users
            .create(NewUser {
                external_id: "ext-owner".to_string(),
                username: "owner".to_string(),
                password_hash: "hash".to_string(),
                trial_end_date: Utc::now() + Duration::days(14),
            })
            .await
            .expect("seed user")
            .id
    }

    fn new_bot(user_id: UserId) -> NewBot {
        NewBot {
            user_id,
            prompt: "You sell bicycles.".to_string(),
            parameters: vec![SpecEntry {
                name: "budget".to_string(),
                description: "buyer budget".to_string(),
            }],
            actions: vec![SpecEntry {
                name: "notify".to_string(),
                description: "tell the owner something important".to_string(),
            }],
        }
    }

    #[tokio::test]
    async fn creates_bots_stopped_and_unauthorized() {
        let pool = pool().await;
        let user_id = seed_user(&pool).await;
        let repo = SqlBotRepository::new(pool);

        let bot = repo.create(new_bot(user_id)).await.expect("create bot");
        assert_eq!(bot.status, BotStatus::Stopped);
        assert!(!bot.is_authorized);
        assert_eq!(bot.items, None);

        let reloaded = repo.find_by_id(bot.id).await.expect("reload").expect("exists");
        assert_eq!(reloaded, bot);
    }

    #[tokio::test]
    async fn owner_scoping_hides_other_users_bots() {
        let pool = pool().await;
        let user_id = seed_user(&pool).await;
        let repo = SqlBotRepository::new(pool);

        let bot = repo.create(new_bot(user_id)).await.expect("create bot");
        let other_owner = UserId(user_id.0 + 1);

        assert!(repo.find_for_user(bot.id, user_id).await.expect("owner lookup").is_some());
        assert!(repo.find_for_user(bot.id, other_owner).await.expect("foreign lookup").is_none());
    }

    #[tokio::test]
    async fn status_items_and_authorization_round_trip() {
        let pool = pool().await;
        let user_id = seed_user(&pool).await;
        let repo = SqlBotRepository::new(pool);
        let bot = repo.create(new_bot(user_id)).await.expect("create bot");

        repo.mark_authorized(bot.id).await.expect("authorize");
        repo.set_items(bot.id, &ItemSelection::Listed(vec![11, 12])).await.expect("items");
        repo.set_status(bot.id, BotStatus::Active).await.expect("activate");

        let reloaded = repo.find_by_id(bot.id).await.expect("reload").expect("exists");
        assert!(reloaded.is_authorized);
        assert_eq!(reloaded.items, Some(ItemSelection::Listed(vec![11, 12])));
        assert_eq!(reloaded.status, BotStatus::Active);

        let active = repo.list_active_for_user(user_id).await.expect("list active");
        assert_eq!(active.len(), 1);
        assert_eq!(repo.count_for_user(user_id).await.expect("count"), 1);
    }

    #[tokio::test]
    async fn deleting_a_bot_removes_it() {
        let pool = pool().await;
        let user_id = seed_user(&pool).await;
        let repo = SqlBotRepository::new(pool);
        let bot = repo.create(new_bot(user_id)).await.expect("create bot");

        repo.delete(bot.id).await.expect("delete");
        assert!(repo.find_by_id(bot.id).await.expect("lookup").is_none());
    }
}
