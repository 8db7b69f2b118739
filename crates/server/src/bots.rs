use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tracing::info;

use marketbot_core::domain::bot::{
    parse_spec_entries, ActivationBlocker, Bot, BotId, BotStatus, ItemSelection, SpecParseError,
};
use marketbot_core::domain::user::{User, UserId};
use marketbot_db::repositories::{
    BotRepository, MessageRepository, NewBot, NotificationRepository, RepositoryError,
    UserRepository,
};

/// Bot lifecycle operations. The dashboard (out of process) drives these
/// through a narrow interface; every mutation emits its user notification
/// and the activation invariant is enforced here, not in the dashboard.
pub struct BotService {
    users: Arc<dyn UserRepository>,
    bots: Arc<dyn BotRepository>,
    messages: Arc<dyn MessageRepository>,
    notifications: Arc<dyn NotificationRepository>,
    bot_daily_cost_cents: i64,
}

#[derive(Debug, Error)]
pub enum BotServiceError {
    #[error("bot not found")]
    BotNotFound,
    #[error("user not found")]
    UserNotFound,
    #[error(transparent)]
    Validation(#[from] SpecParseError),
    #[error("insufficient funds: balance {balance_cents} does not cover {required_cents}")]
    InsufficientFunds { balance_cents: i64, required_cents: i64 },
    #[error("bot is not authorized with a marketplace account")]
    NotAuthorized,
    #[error("bot has no item selection")]
    NoItemsSelected,
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl BotService {
    pub fn new(
        users: Arc<dyn UserRepository>,
        bots: Arc<dyn BotRepository>,
        messages: Arc<dyn MessageRepository>,
        notifications: Arc<dyn NotificationRepository>,
        bot_daily_cost_cents: i64,
    ) -> Self {
        Self { users, bots, messages, notifications, bot_daily_cost_cents }
    }

    async fn owner(&self, user_id: UserId) -> Result<User, BotServiceError> {
        self.users.find_by_id(user_id).await?.ok_or(BotServiceError::UserNotFound)
    }

    async fn owned_bot(&self, bot_id: BotId, user_id: UserId) -> Result<Bot, BotServiceError> {
        self.bots.find_for_user(bot_id, user_id).await?.ok_or(BotServiceError::BotNotFound)
    }

    /// Creates a stopped, unauthorized bot from the dashboard's spec text.
    /// The first bot is free to create; additional ones require either an
    /// active trial or a balance covering a day of usage.
    pub async fn create_bot(
        &self,
        user_id: UserId,
        prompt: &str,
        parameters_text: &str,
        actions_text: &str,
    ) -> Result<Bot, BotServiceError> {
        let owner = self.owner(user_id).await?;
        let existing = self.bots.count_for_user(user_id).await?;

        if existing >= 1
            && !owner.trial_active(Utc::now())
            && !owner.can_afford(self.bot_daily_cost_cents)
        {
            self.notifications
                .enqueue(
                    &owner.external_id,
                    "Insufficient funds to create another bot. Top up your balance.",
                )
                .await?;
            return Err(BotServiceError::InsufficientFunds {
                balance_cents: owner.balance_cents,
                required_cents: self.bot_daily_cost_cents,
            });
        }

        // Spec text is rejected before anything is persisted.
        let parameters = parse_spec_entries(parameters_text, "parameters")?;
        let actions = parse_spec_entries(actions_text, "actions")?;

        let bot = self
            .bots
            .create(NewBot { user_id, prompt: prompt.to_string(), parameters, actions })
            .await?;

        self.notifications
            .enqueue(&owner.external_id, &format!("Bot #{} created!", bot.id.0))
            .await?;
        info!(event_name = "bots.created", bot_id = bot.id.0, user_id = user_id.0, "bot created");
        Ok(bot)
    }

    pub async fn update_config(
        &self,
        user_id: UserId,
        bot_id: BotId,
        prompt: &str,
        parameters_text: &str,
        actions_text: &str,
    ) -> Result<(), BotServiceError> {
        let owner = self.owner(user_id).await?;
        let bot = self.owned_bot(bot_id, user_id).await?;

        let parameters = parse_spec_entries(parameters_text, "parameters")?;
        let actions = parse_spec_entries(actions_text, "actions")?;
        self.bots.update_config(bot.id, prompt, &parameters, &actions).await?;

        self.notifications
            .enqueue(&owner.external_id, &format!("Prompt of bot #{} updated.", bot.id.0))
            .await?;
        Ok(())
    }

    /// Transition to `active`. The invariant (authorized + items selected)
    /// and the funds/trial precheck both gate it; every refusal tells the
    /// owner why.
    pub async fn activate_bot(&self, user_id: UserId, bot_id: BotId) -> Result<(), BotServiceError> {
        let owner = self.owner(user_id).await?;
        let bot = self.owned_bot(bot_id, user_id).await?;

        if let Some(blocker) = bot.activation_blocker() {
            let (message, error) = match blocker {
                ActivationBlocker::NotAuthorized => (
                    format!(
                        "Bot #{} cannot be activated: connect a marketplace account first.",
                        bot.id.0
                    ),
                    BotServiceError::NotAuthorized,
                ),
                ActivationBlocker::NoItemsSelected => (
                    format!("Bot #{} cannot be activated: select listings first.", bot.id.0),
                    BotServiceError::NoItemsSelected,
                ),
            };
            self.notifications.enqueue(&owner.external_id, &message).await?;
            return Err(error);
        }

        if !owner.trial_active(Utc::now()) && !owner.can_afford(self.bot_daily_cost_cents) {
            self.notifications
                .enqueue(
                    &owner.external_id,
                    &format!(
                        "Insufficient funds to activate bot #{}. Top up your balance.",
                        bot.id.0
                    ),
                )
                .await?;
            return Err(BotServiceError::InsufficientFunds {
                balance_cents: owner.balance_cents,
                required_cents: self.bot_daily_cost_cents,
            });
        }

        self.bots.set_status(bot.id, BotStatus::Active).await?;
        self.notifications
            .enqueue(&owner.external_id, &format!("Bot #{} activated!", bot.id.0))
            .await?;
        info!(event_name = "bots.activated", bot_id = bot.id.0, user_id = user_id.0, "bot activated");
        Ok(())
    }

    pub async fn stop_bot(&self, user_id: UserId, bot_id: BotId) -> Result<(), BotServiceError> {
        let owner = self.owner(user_id).await?;
        let bot = self.owned_bot(bot_id, user_id).await?;

        self.bots.set_status(bot.id, BotStatus::Stopped).await?;
        self.notifications
            .enqueue(&owner.external_id, &format!("Bot #{} stopped.", bot.id.0))
            .await?;
        info!(event_name = "bots.stopped", bot_id = bot.id.0, user_id = user_id.0, "bot stopped");
        Ok(())
    }

    /// Deletes the bot; the credential and message rows go with it via the
    /// schema's cascades.
    pub async fn delete_bot(&self, user_id: UserId, bot_id: BotId) -> Result<(), BotServiceError> {
        let owner = self.owner(user_id).await?;
        let bot = self.owned_bot(bot_id, user_id).await?;

        self.bots.delete(bot.id).await?;
        self.notifications
            .enqueue(&owner.external_id, &format!("Bot #{} deleted.", bot.id.0))
            .await?;
        info!(event_name = "bots.deleted", bot_id = bot.id.0, user_id = user_id.0, "bot deleted");
        Ok(())
    }

    pub async fn select_items(
        &self,
        user_id: UserId,
        bot_id: BotId,
        selection: ItemSelection,
    ) -> Result<(), BotServiceError> {
        let owner = self.owner(user_id).await?;
        let bot = self.owned_bot(bot_id, user_id).await?;

        self.bots.set_items(bot.id, &selection).await?;
        self.notifications
            .enqueue(&owner.external_id, &format!("Listing selection for bot #{} saved.", bot.id.0))
            .await?;
        Ok(())
    }

    /// Clears the sandbox partition only; live history is untouched.
    pub async fn reset_test_dialog(
        &self,
        user_id: UserId,
        bot_id: BotId,
    ) -> Result<u64, BotServiceError> {
        let owner = self.owner(user_id).await?;
        let bot = self.owned_bot(bot_id, user_id).await?;

        let removed = self.messages.clear_test(bot.id).await?;
        self.notifications
            .enqueue(&owner.external_id, &format!("Test dialog of bot #{} reset.", bot.id.0))
            .await?;
        Ok(removed)
    }
}
