use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use marketbot_core::domain::notification::{Notification, NotificationId, NotificationStatus};

use super::{NotificationRepository, RepositoryError};
use crate::DbPool;

pub struct SqlNotificationRepository {
    pool: DbPool,
}

impl SqlNotificationRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn decode_notification(row: &SqliteRow) -> Result<Notification, RepositoryError> {
    let status_raw: String = row.try_get("status")?;
    let status = NotificationStatus::parse(&status_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("notifications.status: `{status_raw}`")))?;

    Ok(Notification {
        id: NotificationId(row.try_get("id")?),
        external_id: row.try_get("external_id")?,
        text: row.try_get("text")?,
        status,
        created_at: row.try_get("created_at")?,
        sent_at: row.try_get("sent_at")?,
    })
}

#[async_trait::async_trait]
impl NotificationRepository for SqlNotificationRepository {
    async fn enqueue(
        &self,
        external_id: &str,
        text: &str,
    ) -> Result<NotificationId, RepositoryError> {
        let result = sqlx::query(
            "INSERT INTO notifications (external_id, text, status, created_at) \
             VALUES (?, ?, 'pending', ?)",
        )
        .bind(external_id)
        .bind(text)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(NotificationId(result.last_insert_rowid()))
    }

    async fn list_pending(&self) -> Result<Vec<Notification>, RepositoryError> {
        let rows =
            sqlx::query("SELECT * FROM notifications WHERE status = 'pending' ORDER BY id")
                .fetch_all(&self.pool)
                .await?;
        rows.iter().map(decode_notification).collect()
    }

    async fn mark_sent(&self, id: NotificationId) -> Result<(), RepositoryError> {
        sqlx::query("UPDATE notifications SET status = 'sent', sent_at = ? WHERE id = ?")
            .bind(Utc::now())
            .bind(id.0)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn mark_failed(&self, id: NotificationId) -> Result<(), RepositoryError> {
        sqlx::query("UPDATE notifications SET status = 'failed', sent_at = ? WHERE id = ?")
            .bind(Utc::now())
            .bind(id.0)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use marketbot_core::domain::notification::NotificationStatus;

    use crate::connect_with;
    use crate::migrations::run_pending;
    use crate::repositories::NotificationRepository;

    use super::SqlNotificationRepository;

    async fn repo() -> SqlNotificationRepository {
        let pool = connect_with("sqlite::memory:", 1, 5).await.expect("connect");
        run_pending(&pool).await.expect("migrate");
        SqlNotificationRepository::new(pool)
    }

    #[tokio::test]
    async fn enqueued_rows_are_pending_in_order() {
        let repo = repo().await;

        repo.enqueue("ext-1", "first").await.expect("enqueue 1");
        repo.enqueue("ext-2", "second").await.expect("enqueue 2");

        let pending = repo.list_pending().await.expect("list");
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].text, "first");
        assert_eq!(pending[1].text, "second");
        assert!(pending.iter().all(|n| n.status == NotificationStatus::Pending));
        assert!(pending.iter().all(|n| n.sent_at.is_none()));
    }

    #[tokio::test]
    async fn worker_transitions_remove_rows_from_the_pending_set() {
        let repo = repo().await;

        let sent = repo.enqueue("ext-1", "deliverable").await.expect("enqueue");
        let failed = repo.enqueue("ext-1", "undeliverable").await.expect("enqueue");

        repo.mark_sent(sent).await.expect("mark sent");
        repo.mark_failed(failed).await.expect("mark failed");

        assert!(repo.list_pending().await.expect("list").is_empty());
    }
}
