use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::post;
use axum::{Json, Router};
use tracing::{info, warn};
use uuid::Uuid;

use marketbot_agent::dispatcher::{ConversationDispatcher, DispatchRequest};
use marketbot_core::domain::bot::BotStatus;
use marketbot_core::domain::credential::AccountId;
use marketbot_db::repositories::{BotRepository, CredentialRepository, MessageRepository};
use marketbot_platform::client::MarketplaceApi;
use marketbot_platform::events::WebhookMessage;
use marketbot_platform::tokens::TokenLifecycleManager;

/// Everything one webhook event flows through after the ack: ingestion,
/// account-to-bot reconciliation, dispatch, and the best-effort chat reply.
pub struct WebhookPipeline {
    bots: Arc<dyn BotRepository>,
    credentials: Arc<dyn CredentialRepository>,
    messages: Arc<dyn MessageRepository>,
    dispatcher: Arc<ConversationDispatcher>,
    tokens: Arc<TokenLifecycleManager>,
    marketplace: Arc<dyn MarketplaceApi>,
}

/// Where processing stopped. Every variant is a normal end state; none of
/// them ever turns the webhook ack non-200.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PipelineOutcome {
    /// No credential binds this account; the row stays unreconciled.
    AccountUnbound,
    /// The bound bot is stopped; ingestion only.
    BotInactive,
    /// The event's listing is outside the bot's item selection.
    ItemOutOfScope,
    /// The event carried no text to answer.
    NoText,
    Dispatched,
}

impl WebhookPipeline {
    pub fn new(
        bots: Arc<dyn BotRepository>,
        credentials: Arc<dyn CredentialRepository>,
        messages: Arc<dyn MessageRepository>,
        dispatcher: Arc<ConversationDispatcher>,
        tokens: Arc<TokenLifecycleManager>,
        marketplace: Arc<dyn MarketplaceApi>,
    ) -> Self {
        Self { bots, credentials, messages, dispatcher, tokens, marketplace }
    }

    pub async fn process(
        &self,
        account_id: AccountId,
        payload: &WebhookMessage,
    ) -> anyhow::Result<PipelineOutcome> {
        let raw_payload = serde_json::to_string(payload)?;
        let turn_id =
            self.messages.insert_inbound(account_id, payload.text(), &raw_payload).await?;

        let Some(credential) = self.credentials.find_by_account(account_id).await? else {
            return Ok(PipelineOutcome::AccountUnbound);
        };
        let Some(bot) = self.bots.find_by_id(credential.bot_id).await? else {
            return Ok(PipelineOutcome::AccountUnbound);
        };

        self.messages.assign_bot(turn_id, bot.id).await?;

        if bot.status != BotStatus::Active {
            return Ok(PipelineOutcome::BotInactive);
        }

        if let (Some(item_id), Some(selection)) = (payload.item_id, &bot.items) {
            if !selection.covers(item_id) {
                return Ok(PipelineOutcome::ItemOutOfScope);
            }
        }

        if payload.text().is_empty() {
            return Ok(PipelineOutcome::NoText);
        }

        let response = self
            .dispatcher
            .handle_message(DispatchRequest {
                bot_id: bot.id,
                user_id: bot.user_id,
                text: payload.text().to_string(),
                is_test: false,
                account_id: Some(account_id),
            })
            .await?;

        // Reply delivery is best-effort; the turn is already persisted and
        // the platform offers no exactly-once send anyway.
        match self.tokens.ensure_valid_token(bot.id).await {
            Ok(access_token) => {
                if let Err(send_error) = self
                    .marketplace
                    .send_message(&access_token, account_id, &payload.chat_id, &response.response)
                    .await
                {
                    warn!(
                        event_name = "ingress.webhook.reply_failed",
                        bot_id = bot.id.0,
                        account_id = account_id.0,
                        chat_id = %payload.chat_id,
                        error = %send_error,
                        "reply delivery failed; turn remains persisted"
                    );
                }
            }
            Err(token_error) => warn!(
                event_name = "ingress.webhook.reply_token_unavailable",
                bot_id = bot.id.0,
                account_id = account_id.0,
                error = %token_error,
                "no valid token for reply delivery"
            ),
        }

        Ok(PipelineOutcome::Dispatched)
    }
}

pub fn router(pipeline: Arc<WebhookPipeline>) -> Router {
    Router::new()
        .route("/marketplace/webhook/{account_id}", post(receive))
        .with_state(pipeline)
}

/// Acks immediately with `{"ok": true}` and processes in the background;
/// once the payload deserialized, nothing downstream can fail the response.
async fn receive(
    State(pipeline): State<Arc<WebhookPipeline>>,
    Path(account_id): Path<i64>,
    Json(payload): Json<WebhookMessage>,
) -> Json<serde_json::Value> {
    let correlation_id = Uuid::new_v4().to_string();
    info!(
        event_name = "ingress.webhook.received",
        account_id,
        message_id = %payload.id,
        correlation_id = %correlation_id,
        "webhook event received"
    );

    tokio::spawn(async move {
        match pipeline.process(AccountId(account_id), &payload).await {
            Ok(outcome) => info!(
                event_name = "ingress.webhook.processed",
                account_id,
                message_id = %payload.id,
                correlation_id = %correlation_id,
                outcome = ?outcome,
                "webhook event processed"
            ),
            Err(error) => warn!(
                event_name = "ingress.webhook.processing_failed",
                account_id,
                message_id = %payload.id,
                correlation_id = %correlation_id,
                error = %error,
                "webhook processing failed; ack was already sent"
            ),
        }
    });

    Json(serde_json::json!({ "ok": true }))
}
