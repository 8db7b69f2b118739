use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use marketbot_core::domain::bot::BotId;
use marketbot_core::domain::credential::AccountId;
use marketbot_core::domain::message::{ConversationTurn, TurnId, TURN_STATUS_RECEIVED};

use super::{MessageRepository, NewTurn, RepositoryError};
use crate::DbPool;

pub struct SqlMessageRepository {
    pool: DbPool,
}

impl SqlMessageRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn decode_turn(row: &SqliteRow) -> Result<ConversationTurn, RepositoryError> {
    Ok(ConversationTurn {
        id: TurnId(row.try_get("id")?),
        bot_id: row.try_get::<Option<i64>, _>("bot_id")?.map(BotId),
        text: row.try_get("text")?,
        response: row.try_get("response")?,
        status: row.try_get("status")?,
        is_test: row.try_get("is_test")?,
        timestamp: row.try_get("timestamp")?,
        account_id: row.try_get::<Option<i64>, _>("account_id")?.map(AccountId),
    })
}

#[async_trait::async_trait]
impl MessageRepository for SqlMessageRepository {
    async fn insert_inbound(
        &self,
        account_id: AccountId,
        text: &str,
        raw_payload: &str,
    ) -> Result<TurnId, RepositoryError> {
        let result = sqlx::query(
            "INSERT INTO messages (bot_id, text, response, status, is_test, timestamp, account_id) \
             VALUES (NULL, ?, ?, ?, 0, ?, ?)",
        )
        .bind(text)
        .bind(raw_payload)
        .bind(TURN_STATUS_RECEIVED)
        .bind(Utc::now())
        .bind(account_id.0)
        .execute(&self.pool)
        .await?;

        Ok(TurnId(result.last_insert_rowid()))
    }

    async fn assign_bot(&self, id: TurnId, bot_id: BotId) -> Result<(), RepositoryError> {
        sqlx::query("UPDATE messages SET bot_id = ? WHERE id = ?")
            .bind(bot_id.0)
            .bind(id.0)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn record_turn(&self, turn: NewTurn) -> Result<TurnId, RepositoryError> {
        let result = sqlx::query(
            "INSERT INTO messages (bot_id, text, response, status, is_test, timestamp, account_id) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(turn.bot_id.0)
        .bind(&turn.text)
        .bind(&turn.response)
        .bind(&turn.status)
        .bind(turn.is_test)
        .bind(Utc::now())
        .bind(turn.account_id.map(|account| account.0))
        .execute(&self.pool)
        .await?;

        Ok(TurnId(result.last_insert_rowid()))
    }

    async fn history(
        &self,
        bot_id: BotId,
        is_test: bool,
    ) -> Result<Vec<ConversationTurn>, RepositoryError> {
        // Ingestion rows carry raw webhook payloads, not dispatched turns;
        // they stay out of the replayable history.
        let rows = sqlx::query(
            "SELECT * FROM messages WHERE bot_id = ? AND is_test = ? AND status != ? \
             ORDER BY timestamp ASC, id ASC",
        )
        .bind(bot_id.0)
        .bind(is_test)
        .bind(TURN_STATUS_RECEIVED)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(decode_turn).collect()
    }

    async fn clear_test(&self, bot_id: BotId) -> Result<u64, RepositoryError> {
        let result = sqlx::query("DELETE FROM messages WHERE bot_id = ? AND is_test = 1")
            .bind(bot_id.0)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use sqlx::Row;

    use marketbot_core::domain::bot::BotId;
    use marketbot_core::domain::credential::AccountId;
    use marketbot_core::domain::message::TURN_STATUS_RECEIVED;

    use crate::connect_with;
    use crate::migrations::run_pending;
    use crate::repositories::{
        BotRepository, MessageRepository, NewBot, NewTurn, NewUser, SqlBotRepository,
        SqlUserRepository, UserRepository,
    };
    use crate::DbPool;

    use super::SqlMessageRepository;

    async fn pool_with_bot() -> (DbPool, BotId) {
        let pool = connect_with("sqlite::memory:", 1, 5).await.expect("connect");
        run_pending(&pool).await.expect("migrate");

        let user = SqlUserRepository::new(pool.clone())
            .create(NewUser {
                external_id: "ext-owner".to_string(),
                username: "owner".to_string(),
                password_hash: "hash".to_string(),
                trial_end_date: Utc::now() + Duration::days(14),
            })
            .await
            .expect("seed user");

        let bot = SqlBotRepository::new(pool.clone())
            .create(NewBot {
                user_id: user.id,
                prompt: "prompt".to_string(),
                parameters: Vec::new(),
                actions: Vec::new(),
            })
            .await
            .expect("seed bot");

        (pool, bot.id)
    }

    fn turn(bot_id: BotId, text: &str, is_test: bool) -> NewTurn {
        NewTurn {
            bot_id,
            text: text.to_string(),
            response: format!("{{\"response\":\"re: {text}\"}}"),
            status: "processed".to_string(),
            is_test,
            account_id: None,
        }
    }

    #[tokio::test]
    async fn inbound_rows_start_unreconciled() {
        let (pool, bot_id) = pool_with_bot().await;
        let repo = SqlMessageRepository::new(pool);

        let id = repo
            .insert_inbound(AccountId(42), "hello", "{\"id\":\"m-1\"}")
            .await
            .expect("ingest");

        repo.assign_bot(id, bot_id).await.expect("assign");

        let row = sqlx::query("SELECT bot_id, status, account_id FROM messages WHERE id = ?")
            .bind(id.0)
            .fetch_one(&repo.pool)
            .await
            .expect("reload ingestion row");
        assert_eq!(row.get::<Option<i64>, _>("bot_id"), Some(bot_id.0));
        assert_eq!(row.get::<String, _>("status"), TURN_STATUS_RECEIVED);
        assert_eq!(row.get::<Option<i64>, _>("account_id"), Some(42));

        // Raw ingestion rows never surface in the replayable history.
        assert!(repo.history(bot_id, false).await.expect("history").is_empty());
    }

    #[tokio::test]
    async fn history_is_ordered_and_partitioned() {
        let (pool, bot_id) = pool_with_bot().await;
        let repo = SqlMessageRepository::new(pool);

        repo.record_turn(turn(bot_id, "first", false)).await.expect("live 1");
        repo.record_turn(turn(bot_id, "second", false)).await.expect("live 2");
        repo.record_turn(turn(bot_id, "sandbox", true)).await.expect("test 1");

        let live = repo.history(bot_id, false).await.expect("live history");
        assert_eq!(
            live.iter().map(|t| t.text.as_str()).collect::<Vec<_>>(),
            vec!["first", "second"]
        );

        let test = repo.history(bot_id, true).await.expect("test history");
        assert_eq!(test.len(), 1);
        assert_eq!(test[0].text, "sandbox");
    }

    #[tokio::test]
    async fn clearing_the_sandbox_leaves_live_turns() {
        let (pool, bot_id) = pool_with_bot().await;
        let repo = SqlMessageRepository::new(pool);

        repo.record_turn(turn(bot_id, "live", false)).await.expect("live");
        repo.record_turn(turn(bot_id, "test-1", true)).await.expect("test 1");
        repo.record_turn(turn(bot_id, "test-2", true)).await.expect("test 2");

        let removed = repo.clear_test(bot_id).await.expect("clear");
        assert_eq!(removed, 2);
        assert_eq!(repo.history(bot_id, true).await.expect("test history").len(), 0);
        assert_eq!(repo.history(bot_id, false).await.expect("live history").len(), 1);
    }
}
