//! In-memory repository implementations used by unit tests across the
//! workspace. Behavior mirrors the SQL implementations, including the
//! balance guard on debits and the account uniqueness constraint.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use marketbot_core::domain::bot::{Bot, BotId, BotStatus, ItemSelection, SpecEntry};
use marketbot_core::domain::credential::{AccountId, Credential};
use marketbot_core::domain::message::{ConversationTurn, TurnId, TURN_STATUS_RECEIVED};
use marketbot_core::domain::notification::{Notification, NotificationId, NotificationStatus};
use marketbot_core::domain::session::RegistrationSession;
use marketbot_core::domain::user::{User, UserId};

use super::{
    BotRepository, CredentialRepository, MessageRepository, NewBot, NewTurn, NewUser,
    NotificationRepository, RegistrationSessionRepository, RepositoryError, UserRepository,
};

#[derive(Default)]
pub struct InMemoryBotRepository {
    bots: RwLock<HashMap<i64, Bot>>,
    next_id: AtomicI64,
}

impl InMemoryBotRepository {
    /// Test seeding: stores the bot as-is under its own id.
    pub async fn insert(&self, bot: Bot) {
        self.next_id.fetch_max(bot.id.0, Ordering::SeqCst);
        self.bots.write().await.insert(bot.id.0, bot);
    }
}

#[async_trait::async_trait]
impl BotRepository for InMemoryBotRepository {
    async fn find_by_id(&self, id: BotId) -> Result<Option<Bot>, RepositoryError> {
        Ok(self.bots.read().await.get(&id.0).cloned())
    }

    async fn find_for_user(
        &self,
        id: BotId,
        user_id: UserId,
    ) -> Result<Option<Bot>, RepositoryError> {
        Ok(self.bots.read().await.get(&id.0).filter(|bot| bot.user_id == user_id).cloned())
    }

    async fn create(&self, new_bot: NewBot) -> Result<Bot, RepositoryError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let bot = Bot {
            id: BotId(id),
            user_id: new_bot.user_id,
            prompt: new_bot.prompt,
            status: BotStatus::Stopped,
            items: None,
            is_authorized: false,
            parameters: new_bot.parameters,
            actions: new_bot.actions,
        };
        self.bots.write().await.insert(id, bot.clone());
        Ok(bot)
    }

    async fn update_config(
        &self,
        id: BotId,
        prompt: &str,
        parameters: &[SpecEntry],
        actions: &[SpecEntry],
    ) -> Result<(), RepositoryError> {
        if let Some(bot) = self.bots.write().await.get_mut(&id.0) {
            bot.prompt = prompt.to_string();
            bot.parameters = parameters.to_vec();
            bot.actions = actions.to_vec();
        }
        Ok(())
    }

    async fn set_status(&self, id: BotId, status: BotStatus) -> Result<(), RepositoryError> {
        if let Some(bot) = self.bots.write().await.get_mut(&id.0) {
            bot.status = status;
        }
        Ok(())
    }

    async fn set_items(&self, id: BotId, items: &ItemSelection) -> Result<(), RepositoryError> {
        if let Some(bot) = self.bots.write().await.get_mut(&id.0) {
            bot.items = Some(items.clone());
        }
        Ok(())
    }

    async fn mark_authorized(&self, id: BotId) -> Result<(), RepositoryError> {
        if let Some(bot) = self.bots.write().await.get_mut(&id.0) {
            bot.is_authorized = true;
        }
        Ok(())
    }

    async fn count_for_user(&self, user_id: UserId) -> Result<i64, RepositoryError> {
        Ok(self.bots.read().await.values().filter(|bot| bot.user_id == user_id).count() as i64)
    }

    async fn list_active_for_user(&self, user_id: UserId) -> Result<Vec<Bot>, RepositoryError> {
        let mut active: Vec<Bot> = self
            .bots
            .read()
            .await
            .values()
            .filter(|bot| bot.user_id == user_id && bot.status == BotStatus::Active)
            .cloned()
            .collect();
        active.sort_by_key(|bot| bot.id.0);
        Ok(active)
    }

    async fn delete(&self, id: BotId) -> Result<(), RepositoryError> {
        self.bots.write().await.remove(&id.0);
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryUserRepository {
    users: RwLock<HashMap<i64, User>>,
    next_id: AtomicI64,
    // Optional link so `list_with_active_bots` can emulate the SQL join.
    bots: Option<Arc<InMemoryBotRepository>>,
}

impl InMemoryUserRepository {
    pub fn with_bots(bots: Arc<InMemoryBotRepository>) -> Self {
        Self { bots: Some(bots), ..Self::default() }
    }

    /// Test seeding: stores the user as-is, balance included.
    pub async fn insert(&self, user: User) {
        self.next_id.fetch_max(user.id.0, Ordering::SeqCst);
        self.users.write().await.insert(user.id.0, user);
    }

    pub async fn get(&self, id: UserId) -> Option<User> {
        self.users.read().await.get(&id.0).cloned()
    }
}

#[async_trait::async_trait]
impl UserRepository for InMemoryUserRepository {
    async fn find_by_id(&self, id: UserId) -> Result<Option<User>, RepositoryError> {
        Ok(self.users.read().await.get(&id.0).cloned())
    }

    async fn find_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<User>, RepositoryError> {
        Ok(self
            .users
            .read()
            .await
            .values()
            .find(|user| user.external_id == external_id)
            .cloned())
    }

    async fn create(&self, new_user: NewUser) -> Result<User, RepositoryError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let user = User {
            id: UserId(id),
            external_id: new_user.external_id,
            username: new_user.username,
            password_hash: new_user.password_hash,
            registration_date: Utc::now(),
            trial_end_date: new_user.trial_end_date,
            balance_cents: 0,
        };
        self.users.write().await.insert(id, user.clone());
        Ok(user)
    }

    async fn list_with_active_bots(&self) -> Result<Vec<User>, RepositoryError> {
        let Some(bots) = &self.bots else {
            return Ok(Vec::new());
        };

        let mut owners = Vec::new();
        for user in self.users.read().await.values() {
            if !bots.list_active_for_user(user.id).await?.is_empty() {
                owners.push(user.clone());
            }
        }
        owners.sort_by_key(|user| user.id.0);
        Ok(owners)
    }

    async fn debit(&self, id: UserId, amount_cents: i64) -> Result<bool, RepositoryError> {
        let mut users = self.users.write().await;
        let Some(user) = users.get_mut(&id.0) else {
            return Ok(false);
        };
        if user.balance_cents < amount_cents {
            return Ok(false);
        }
        user.balance_cents -= amount_cents;
        Ok(true)
    }
}

#[derive(Default)]
pub struct InMemoryCredentialRepository {
    credentials: RwLock<HashMap<i64, Credential>>,
}

#[async_trait::async_trait]
impl CredentialRepository for InMemoryCredentialRepository {
    async fn find_by_bot(&self, bot_id: BotId) -> Result<Option<Credential>, RepositoryError> {
        Ok(self.credentials.read().await.get(&bot_id.0).cloned())
    }

    async fn find_by_account(
        &self,
        account_id: AccountId,
    ) -> Result<Option<Credential>, RepositoryError> {
        Ok(self
            .credentials
            .read()
            .await
            .values()
            .find(|credential| credential.account_id == account_id)
            .cloned())
    }

    async fn upsert(&self, credential: &Credential) -> Result<(), RepositoryError> {
        let mut credentials = self.credentials.write().await;
        let conflicting = credentials.values().any(|existing| {
            existing.account_id == credential.account_id && existing.bot_id != credential.bot_id
        });
        if conflicting {
            return Err(RepositoryError::Conflict(format!(
                "account {} is already bound to another bot",
                credential.account_id.0
            )));
        }
        credentials.insert(credential.bot_id.0, credential.clone());
        Ok(())
    }

    async fn delete_by_bot(&self, bot_id: BotId) -> Result<(), RepositoryError> {
        self.credentials.write().await.remove(&bot_id.0);
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryMessageRepository {
    turns: RwLock<Vec<ConversationTurn>>,
    next_id: AtomicI64,
}

impl InMemoryMessageRepository {
    pub async fn all(&self) -> Vec<ConversationTurn> {
        self.turns.read().await.clone()
    }
}

#[async_trait::async_trait]
impl MessageRepository for InMemoryMessageRepository {
    async fn insert_inbound(
        &self,
        account_id: AccountId,
        text: &str,
        raw_payload: &str,
    ) -> Result<TurnId, RepositoryError> {
        let id = TurnId(self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        self.turns.write().await.push(ConversationTurn {
            id,
            bot_id: None,
            text: text.to_string(),
            response: raw_payload.to_string(),
            status: TURN_STATUS_RECEIVED.to_string(),
            is_test: false,
            timestamp: Utc::now(),
            account_id: Some(account_id),
        });
        Ok(id)
    }

    async fn assign_bot(&self, id: TurnId, bot_id: BotId) -> Result<(), RepositoryError> {
        if let Some(turn) = self.turns.write().await.iter_mut().find(|turn| turn.id == id) {
            turn.bot_id = Some(bot_id);
        }
        Ok(())
    }

    async fn record_turn(&self, turn: NewTurn) -> Result<TurnId, RepositoryError> {
        let id = TurnId(self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        self.turns.write().await.push(ConversationTurn {
            id,
            bot_id: Some(turn.bot_id),
            text: turn.text,
            response: turn.response,
            status: turn.status,
            is_test: turn.is_test,
            timestamp: Utc::now(),
            account_id: turn.account_id,
        });
        Ok(id)
    }

    async fn history(
        &self,
        bot_id: BotId,
        is_test: bool,
    ) -> Result<Vec<ConversationTurn>, RepositoryError> {
        let mut history: Vec<ConversationTurn> = self
            .turns
            .read()
            .await
            .iter()
            .filter(|turn| {
                turn.bot_id == Some(bot_id)
                    && turn.is_test == is_test
                    && turn.status != TURN_STATUS_RECEIVED
            })
            .cloned()
            .collect();
        history.sort_by_key(|turn| (turn.timestamp, turn.id.0));
        Ok(history)
    }

    async fn clear_test(&self, bot_id: BotId) -> Result<u64, RepositoryError> {
        let mut turns = self.turns.write().await;
        let before = turns.len();
        turns.retain(|turn| !(turn.bot_id == Some(bot_id) && turn.is_test));
        Ok((before - turns.len()) as u64)
    }
}

#[derive(Default)]
pub struct InMemoryNotificationRepository {
    notifications: RwLock<Vec<Notification>>,
    next_id: AtomicI64,
}

impl InMemoryNotificationRepository {
    pub async fn all(&self) -> Vec<Notification> {
        self.notifications.read().await.clone()
    }
}

#[async_trait::async_trait]
impl NotificationRepository for InMemoryNotificationRepository {
    async fn enqueue(
        &self,
        external_id: &str,
        text: &str,
    ) -> Result<NotificationId, RepositoryError> {
        let id = NotificationId(self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        self.notifications.write().await.push(Notification {
            id,
            external_id: external_id.to_string(),
            text: text.to_string(),
            status: NotificationStatus::Pending,
            created_at: Utc::now(),
            sent_at: None,
        });
        Ok(id)
    }

    async fn list_pending(&self) -> Result<Vec<Notification>, RepositoryError> {
        Ok(self
            .notifications
            .read()
            .await
            .iter()
            .filter(|notification| notification.status == NotificationStatus::Pending)
            .cloned()
            .collect())
    }

    async fn mark_sent(&self, id: NotificationId) -> Result<(), RepositoryError> {
        self.transition(id, NotificationStatus::Sent).await;
        Ok(())
    }

    async fn mark_failed(&self, id: NotificationId) -> Result<(), RepositoryError> {
        self.transition(id, NotificationStatus::Failed).await;
        Ok(())
    }
}

impl InMemoryNotificationRepository {
    async fn transition(&self, id: NotificationId, status: NotificationStatus) {
        if let Some(notification) =
            self.notifications.write().await.iter_mut().find(|notification| notification.id == id)
        {
            notification.status = status;
            notification.sent_at = Some(Utc::now());
        }
    }
}

#[derive(Default)]
pub struct InMemoryRegistrationSessionRepository {
    sessions: RwLock<HashMap<String, RegistrationSession>>,
}

#[async_trait::async_trait]
impl RegistrationSessionRepository for InMemoryRegistrationSessionRepository {
    async fn put(&self, session: &RegistrationSession) -> Result<(), RepositoryError> {
        self.sessions.write().await.insert(session.external_id.clone(), session.clone());
        Ok(())
    }

    async fn find_live(
        &self,
        external_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<RegistrationSession>, RepositoryError> {
        Ok(self
            .sessions
            .read()
            .await
            .get(external_id)
            .filter(|session| !session.expired(now))
            .cloned())
    }

    async fn delete(&self, external_id: &str) -> Result<(), RepositoryError> {
        self.sessions.write().await.remove(external_id);
        Ok(())
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, RepositoryError> {
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, session| !session.expired(now));
        Ok((before - sessions.len()) as u64)
    }
}
