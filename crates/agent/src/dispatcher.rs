use std::sync::Arc;

use thiserror::Error;
use tracing::{info, warn};

use marketbot_core::config::LlmConfig;
use marketbot_core::domain::bot::{BotId, NOTIFY_ACTION};
use marketbot_core::domain::credential::AccountId;
use marketbot_core::domain::message::TURN_STATUS_PROCESSED;
use marketbot_core::domain::user::UserId;
use marketbot_db::repositories::{
    BotRepository, MessageRepository, NewTurn, NotificationRepository, RepositoryError,
    UserRepository,
};

use crate::llm::{ChatRequest, ChatTurn, LlmClient};
use crate::prompt::{compile_system_prompt, replay_history};
use crate::response::{parse_structured, StructuredResponse};

/// One inbound message, owner-scoped. The live webhook path and the
/// sandbox path build the same request and differ only in `is_test`.
#[derive(Clone, Debug)]
pub struct DispatchRequest {
    pub bot_id: BotId,
    pub user_id: UserId,
    pub text: String,
    pub is_test: bool,
    pub account_id: Option<AccountId>,
}

/// Failures ahead of the model call. Everything at the model boundary is
/// absorbed by the retry/fallback policy and never surfaces here.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("bot not found")]
    BotNotFound,
    #[error("bot owner not found")]
    OwnerNotFound,
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

pub struct ConversationDispatcher {
    users: Arc<dyn UserRepository>,
    bots: Arc<dyn BotRepository>,
    messages: Arc<dyn MessageRepository>,
    notifications: Arc<dyn NotificationRepository>,
    llm: Arc<dyn LlmClient>,
    model: String,
    temperature: f32,
    max_attempts: u32,
}

impl ConversationDispatcher {
    pub fn new(
        users: Arc<dyn UserRepository>,
        bots: Arc<dyn BotRepository>,
        messages: Arc<dyn MessageRepository>,
        notifications: Arc<dyn NotificationRepository>,
        llm: Arc<dyn LlmClient>,
        llm_config: &LlmConfig,
    ) -> Self {
        Self {
            users,
            bots,
            messages,
            notifications,
            llm,
            model: llm_config.model.clone(),
            temperature: llm_config.temperature,
            max_attempts: llm_config.max_attempts.max(1),
        }
    }

    /// Runs one full turn: load config and history, call the model inside
    /// the retry budget, execute the reserved notify action, persist the
    /// exchange. Returns the structured response (possibly the fallback,
    /// which is a valid outcome, not an error).
    pub async fn handle_message(
        &self,
        request: DispatchRequest,
    ) -> Result<StructuredResponse, DispatchError> {
        let bot = self
            .bots
            .find_for_user(request.bot_id, request.user_id)
            .await?
            .ok_or(DispatchError::BotNotFound)?;
        let owner = self
            .users
            .find_by_id(request.user_id)
            .await?
            .ok_or(DispatchError::OwnerNotFound)?;

        let history = self.messages.history(bot.id, request.is_test).await?;

        let mut turns = Vec::with_capacity(history.len() * 2 + 2);
        turns.push(ChatTurn::system(compile_system_prompt(&bot)));
        turns.extend(replay_history(&history));
        turns.push(ChatTurn::user(request.text.clone()));

        let chat_request =
            ChatRequest { model: self.model.clone(), temperature: self.temperature, turns };

        let mut accepted = None;
        for attempt in 1..=self.max_attempts {
            match self.llm.chat(&chat_request).await {
                Ok(raw) => match parse_structured(&raw) {
                    Some(response) => {
                        accepted = Some(response);
                        break;
                    }
                    None => warn!(
                        event_name = "agent.dispatch.attempt_rejected",
                        bot_id = bot.id.0,
                        attempt,
                        max_attempts = self.max_attempts,
                        "model answer failed structured-output validation"
                    ),
                },
                Err(error) => warn!(
                    event_name = "agent.dispatch.attempt_failed",
                    bot_id = bot.id.0,
                    attempt,
                    max_attempts = self.max_attempts,
                    error = %error,
                    "model call failed"
                ),
            }
        }

        let response = match accepted {
            Some(response) => {
                self.execute_actions(&response, &owner.external_id, bot.id).await?;
                response
            }
            None => {
                warn!(
                    event_name = "agent.dispatch.fallback",
                    bot_id = bot.id.0,
                    is_test = request.is_test,
                    "retry budget exhausted; returning fallback response"
                );
                StructuredResponse::fallback()
            }
        };

        let status =
            response.status.clone().unwrap_or_else(|| TURN_STATUS_PROCESSED.to_string());
        let serialized =
            serde_json::to_string(&response).unwrap_or_else(|_| "{}".to_string());
        self.messages
            .record_turn(NewTurn {
                bot_id: bot.id,
                text: request.text,
                response: serialized,
                status,
                is_test: request.is_test,
                account_id: request.account_id,
            })
            .await?;

        Ok(response)
    }

    /// The one action name the dispatcher executes itself. Bot-defined
    /// action names are business data for the operator, persisted untouched.
    async fn execute_actions(
        &self,
        response: &StructuredResponse,
        owner_external_id: &str,
        bot_id: BotId,
    ) -> Result<(), RepositoryError> {
        for action in &response.actions {
            if action.action != NOTIFY_ACTION {
                continue;
            }
            self.notifications.enqueue(owner_external_id, &action.value).await?;
            info!(
                event_name = "agent.dispatch.notify_action",
                bot_id = bot_id.0,
                "notify action enqueued for the bot owner"
            );
        }
        Ok(())
    }
}
