use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::response::Redirect;
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use tracing::{error, info};
use uuid::Uuid;

use marketbot_core::config::MarketplaceConfig;
use marketbot_core::domain::bot::{Bot, BotId};
use marketbot_core::domain::user::User;
use marketbot_core::errors::InterfaceError;
use marketbot_db::repositories::{BotRepository, NotificationRepository, UserRepository};
use marketbot_platform::client::MarketplaceApi;
use marketbot_platform::oauth::authorize_url;
use marketbot_platform::tokens::{TokenError, TokenLifecycleManager};

use crate::errors::ApiError;

/// Shared context of the OAuth routes: the authorization redirect, the
/// callback that completes a grant, and the listing fetch used by the item
/// selection step.
pub struct OauthContext {
    pub bots: Arc<dyn BotRepository>,
    pub users: Arc<dyn UserRepository>,
    pub notifications: Arc<dyn NotificationRepository>,
    pub tokens: Arc<TokenLifecycleManager>,
    pub marketplace: Arc<dyn MarketplaceApi>,
    pub marketplace_config: MarketplaceConfig,
}

pub fn router(context: Arc<OauthContext>) -> Router {
    Router::new()
        .route("/oauth/marketplace", get(authorize))
        .route("/oauth/marketplace/callback", get(callback))
        .route("/marketplace/items/{bot_id}", get(items))
        .with_state(context)
}

#[derive(Debug, Deserialize)]
struct AuthorizeQuery {
    bot_id: i64,
}

#[derive(Debug, Deserialize)]
struct CallbackQuery {
    code: String,
    state: String,
}

impl OauthContext {
    async fn bot_with_owner(
        &self,
        bot_id: BotId,
        correlation_id: &str,
    ) -> Result<(Bot, User), ApiError> {
        let bot = self
            .bots
            .find_by_id(bot_id)
            .await
            .map_err(|repo_error| {
                error!(
                    event_name = "oauth.lookup_failed",
                    bot_id = bot_id.0,
                    correlation_id,
                    error = %repo_error,
                    "bot lookup failed"
                );
                ApiError(InterfaceError::ServiceUnavailable {
                    message: "persistence failure".to_string(),
                    correlation_id: correlation_id.to_string(),
                })
            })?
            .ok_or_else(|| {
                ApiError(InterfaceError::NotFound {
                    message: "bot not found".to_string(),
                    correlation_id: correlation_id.to_string(),
                })
            })?;

        let owner = self
            .users
            .find_by_id(bot.user_id)
            .await
            .map_err(|repo_error| {
                error!(
                    event_name = "oauth.lookup_failed",
                    bot_id = bot_id.0,
                    correlation_id,
                    error = %repo_error,
                    "owner lookup failed"
                );
                ApiError(InterfaceError::ServiceUnavailable {
                    message: "persistence failure".to_string(),
                    correlation_id: correlation_id.to_string(),
                })
            })?
            .ok_or_else(|| {
                ApiError(InterfaceError::NotFound {
                    message: "bot owner not found".to_string(),
                    correlation_id: correlation_id.to_string(),
                })
            })?;

        Ok((bot, owner))
    }
}

/// Entry point of the flow: redirect the operator to the marketplace
/// consent screen with the bot id riding in `state`.
async fn authorize(
    State(context): State<Arc<OauthContext>>,
    Query(query): Query<AuthorizeQuery>,
) -> Result<Redirect, ApiError> {
    let correlation_id = Uuid::new_v4().to_string();
    let bot_id = BotId(query.bot_id);
    let (bot, _owner) = context.bot_with_owner(bot_id, &correlation_id).await?;

    info!(
        event_name = "oauth.redirecting",
        bot_id = bot.id.0,
        correlation_id = %correlation_id,
        "redirecting to marketplace authorization"
    );
    Ok(Redirect::temporary(&authorize_url(&context.marketplace_config, bot.id)))
}

/// The marketplace redirects back here with `code` and our `state`.
async fn callback(
    State(context): State<Arc<OauthContext>>,
    Query(query): Query<CallbackQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let correlation_id = Uuid::new_v4().to_string();

    let bot_id = query.state.parse::<i64>().map(BotId).map_err(|_| {
        ApiError(InterfaceError::BadRequest {
            message: "state is not a bot id".to_string(),
            correlation_id: correlation_id.clone(),
        })
    })?;

    let (bot, owner) = context.bot_with_owner(bot_id, &correlation_id).await?;

    let outcome = context
        .tokens
        .complete_authorization(bot.id, &query.code, &owner.external_id)
        .await
        .map_err(|token_error| {
            error!(
                event_name = "oauth.callback_failed",
                bot_id = bot.id.0,
                correlation_id = %correlation_id,
                error = %token_error,
                "authorization could not be completed"
            );
            match token_error {
                TokenError::UpstreamAuth(_) => ApiError(InterfaceError::ServiceUnavailable {
                    message: "marketplace token exchange failed".to_string(),
                    correlation_id: correlation_id.clone(),
                }),
                TokenError::CredentialMissing => ApiError(InterfaceError::NotFound {
                    message: "credential not found".to_string(),
                    correlation_id: correlation_id.clone(),
                }),
                TokenError::Repository(_) => ApiError(InterfaceError::ServiceUnavailable {
                    message: "persistence failure".to_string(),
                    correlation_id: correlation_id.clone(),
                }),
            }
        })?;

    context.bots.mark_authorized(bot.id).await.map_err(|repo_error| {
        error!(
            event_name = "oauth.callback_failed",
            bot_id = bot.id.0,
            correlation_id = %correlation_id,
            error = %repo_error,
            "failed to flag bot as authorized"
        );
        ApiError(InterfaceError::ServiceUnavailable {
            message: "persistence failure".to_string(),
            correlation_id: correlation_id.clone(),
        })
    })?;

    let _ = context
        .notifications
        .enqueue(
            &owner.external_id,
            &format!("Marketplace account connected to bot #{}.", bot.id.0),
        )
        .await;

    info!(
        event_name = "oauth.callback_completed",
        bot_id = bot.id.0,
        account_id = outcome.credential.account_id.0,
        correlation_id = %correlation_id,
        webhook_subscribed = outcome.webhook_error.is_none(),
        "authorization callback completed"
    );

    Ok(Json(serde_json::json!({
        "ok": true,
        "bot_id": bot.id.0,
        "account_id": outcome.credential.account_id.0,
        "webhook_subscribed": outcome.webhook_error.is_none(),
    })))
}

/// Listing inventory for the item selection step, fetched with a token the
/// lifecycle manager guarantees to be fresh.
async fn items(
    State(context): State<Arc<OauthContext>>,
    Path(bot_id): Path<i64>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let correlation_id = Uuid::new_v4().to_string();
    let bot_id = BotId(bot_id);
    let (bot, _owner) = context.bot_with_owner(bot_id, &correlation_id).await?;

    let access_token = context.tokens.ensure_valid_token(bot.id).await.map_err(|token_error| {
        error!(
            event_name = "oauth.items_token_failed",
            bot_id = bot.id.0,
            correlation_id = %correlation_id,
            error = %token_error,
            "could not obtain a valid token for the items fetch"
        );
        match token_error {
            TokenError::CredentialMissing => ApiError(InterfaceError::NotFound {
                message: "no marketplace account connected".to_string(),
                correlation_id: correlation_id.clone(),
            }),
            _ => ApiError(InterfaceError::ServiceUnavailable {
                message: "marketplace token refresh failed".to_string(),
                correlation_id: correlation_id.clone(),
            }),
        }
    })?;

    let listings =
        context.marketplace.fetch_items(&access_token).await.map_err(|api_error| {
            error!(
                event_name = "oauth.items_fetch_failed",
                bot_id = bot.id.0,
                correlation_id = %correlation_id,
                error = %api_error,
                "listing fetch failed"
            );
            ApiError(InterfaceError::ServiceUnavailable {
                message: "marketplace listing fetch failed".to_string(),
                correlation_id: correlation_id.clone(),
            })
        })?;

    let items: Vec<serde_json::Value> = listings
        .into_iter()
        .map(|item| serde_json::json!({ "id": item.id, "title": item.title }))
        .collect();
    Ok(Json(serde_json::json!({ "bot_id": bot.id.0, "items": items })))
}
