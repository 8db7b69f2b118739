use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use marketbot_core::domain::bot::{Bot, BotId, BotStatus, ItemSelection, SpecEntry};
use marketbot_core::domain::credential::{AccountId, Credential};
use marketbot_core::domain::message::{ConversationTurn, TurnId};
use marketbot_core::domain::notification::{Notification, NotificationId};
use marketbot_core::domain::session::RegistrationSession;
use marketbot_core::domain::user::{User, UserId};

pub mod bots;
pub mod credentials;
pub mod memory;
pub mod messages;
pub mod notifications;
pub mod sessions;
pub mod users;

pub use bots::SqlBotRepository;
pub use credentials::SqlCredentialRepository;
pub use memory::{
    InMemoryBotRepository, InMemoryCredentialRepository, InMemoryMessageRepository,
    InMemoryNotificationRepository, InMemoryRegistrationSessionRepository, InMemoryUserRepository,
};
pub use messages::SqlMessageRepository;
pub use notifications::SqlNotificationRepository;
pub use sessions::SqlRegistrationSessionRepository;
pub use users::SqlUserRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("constraint violation: {0}")]
    Conflict(String),
}

#[derive(Clone, Debug)]
pub struct NewUser {
    pub external_id: String,
    pub username: String,
    pub password_hash: String,
    pub trial_end_date: DateTime<Utc>,
}

#[derive(Clone, Debug)]
pub struct NewBot {
    pub user_id: UserId,
    pub prompt: String,
    pub parameters: Vec<SpecEntry>,
    pub actions: Vec<SpecEntry>,
}

/// A fully dispatched turn, ready for the history log.
#[derive(Clone, Debug)]
pub struct NewTurn {
    pub bot_id: BotId,
    pub text: String,
    pub response: String,
    pub status: String,
    pub is_test: bool,
    pub account_id: Option<AccountId>,
}

#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn find_by_id(&self, id: UserId) -> Result<Option<User>, RepositoryError>;
    async fn find_by_external_id(&self, external_id: &str)
        -> Result<Option<User>, RepositoryError>;
    async fn create(&self, new_user: NewUser) -> Result<User, RepositoryError>;
    /// Users that own at least one `active` bot; the billing sweep's work
    /// list.
    async fn list_with_active_bots(&self) -> Result<Vec<User>, RepositoryError>;
    /// Relative debit guarded by the current balance. Returns `false`
    /// (without touching the row) when the balance no longer covers the
    /// amount; never writes an absolute balance.
    async fn debit(&self, id: UserId, amount_cents: i64) -> Result<bool, RepositoryError>;
}

#[async_trait]
pub trait BotRepository: Send + Sync {
    async fn find_by_id(&self, id: BotId) -> Result<Option<Bot>, RepositoryError>;
    /// Owner-scoped lookup; both the live and the sandbox dispatch paths go
    /// through this.
    async fn find_for_user(&self, id: BotId, user_id: UserId)
        -> Result<Option<Bot>, RepositoryError>;
    async fn create(&self, new_bot: NewBot) -> Result<Bot, RepositoryError>;
    async fn update_config(
        &self,
        id: BotId,
        prompt: &str,
        parameters: &[SpecEntry],
        actions: &[SpecEntry],
    ) -> Result<(), RepositoryError>;
    async fn set_status(&self, id: BotId, status: BotStatus) -> Result<(), RepositoryError>;
    async fn set_items(&self, id: BotId, items: &ItemSelection) -> Result<(), RepositoryError>;
    async fn mark_authorized(&self, id: BotId) -> Result<(), RepositoryError>;
    async fn count_for_user(&self, user_id: UserId) -> Result<i64, RepositoryError>;
    async fn list_active_for_user(&self, user_id: UserId) -> Result<Vec<Bot>, RepositoryError>;
    async fn delete(&self, id: BotId) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait CredentialRepository: Send + Sync {
    async fn find_by_bot(&self, bot_id: BotId) -> Result<Option<Credential>, RepositoryError>;
    async fn find_by_account(
        &self,
        account_id: AccountId,
    ) -> Result<Option<Credential>, RepositoryError>;
    /// Insert-or-overwrite keyed by bot. The account uniqueness constraint
    /// assumes reconciliation has already released any other bot's claim.
    async fn upsert(&self, credential: &Credential) -> Result<(), RepositoryError>;
    async fn delete_by_bot(&self, bot_id: BotId) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait MessageRepository: Send + Sync {
    /// Webhook ingestion row: no bot yet, raw payload kept in the response
    /// column, status `received`.
    async fn insert_inbound(
        &self,
        account_id: AccountId,
        text: &str,
        raw_payload: &str,
    ) -> Result<TurnId, RepositoryError>;
    async fn assign_bot(&self, id: TurnId, bot_id: BotId) -> Result<(), RepositoryError>;
    async fn record_turn(&self, turn: NewTurn) -> Result<TurnId, RepositoryError>;
    /// Prior turns for one partition, oldest first. Test and live histories
    /// never mix.
    async fn history(
        &self,
        bot_id: BotId,
        is_test: bool,
    ) -> Result<Vec<ConversationTurn>, RepositoryError>;
    async fn clear_test(&self, bot_id: BotId) -> Result<u64, RepositoryError>;
}

/// The notification outbox. Producers append `pending` rows; only the
/// external delivery worker moves rows to `sent`/`failed` after an attempt.
#[async_trait]
pub trait NotificationRepository: Send + Sync {
    async fn enqueue(&self, external_id: &str, text: &str)
        -> Result<NotificationId, RepositoryError>;
    async fn list_pending(&self) -> Result<Vec<Notification>, RepositoryError>;
    async fn mark_sent(&self, id: NotificationId) -> Result<(), RepositoryError>;
    async fn mark_failed(&self, id: NotificationId) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait RegistrationSessionRepository: Send + Sync {
    async fn put(&self, session: &RegistrationSession) -> Result<(), RepositoryError>;
    /// Sessions past their expiry are invisible to callers even before the
    /// purge job removes them.
    async fn find_live(
        &self,
        external_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<RegistrationSession>, RepositoryError>;
    async fn delete(&self, external_id: &str) -> Result<(), RepositoryError>;
    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, RepositoryError>;
}
