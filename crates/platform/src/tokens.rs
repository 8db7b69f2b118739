use std::sync::Arc;

use chrono::{Duration, Utc};
use thiserror::Error;
use tracing::{info, warn};

use marketbot_core::domain::bot::{BotId, BotStatus};
use marketbot_core::domain::credential::{AccountId, Credential};
use marketbot_db::repositories::{
    BotRepository, CredentialRepository, NotificationRepository, RepositoryError,
};

use crate::client::{MarketplaceApi, MarketplaceError};
use crate::oauth::DEFAULT_SCOPE;

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("no credential stored for this bot")]
    CredentialMissing,
    #[error("upstream authorization failure: {0}")]
    UpstreamAuth(MarketplaceError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// Result of a completed authorization. The credential is persisted even
/// when the webhook subscription failed; the error is carried here instead
/// of rolling anything back.
#[derive(Debug)]
pub struct AuthorizationOutcome {
    pub credential: Credential,
    /// A different bot previously held this account and was stopped.
    pub displaced_bot: Option<BotId>,
    pub webhook_error: Option<MarketplaceError>,
}

/// Keeps one valid credential per bot: refresh-on-expiry for outbound
/// calls, code exchange plus account reconciliation for new grants.
pub struct TokenLifecycleManager {
    credentials: Arc<dyn CredentialRepository>,
    bots: Arc<dyn BotRepository>,
    notifications: Arc<dyn NotificationRepository>,
    api: Arc<dyn MarketplaceApi>,
}

impl TokenLifecycleManager {
    pub fn new(
        credentials: Arc<dyn CredentialRepository>,
        bots: Arc<dyn BotRepository>,
        notifications: Arc<dyn NotificationRepository>,
        api: Arc<dyn MarketplaceApi>,
    ) -> Self {
        Self { credentials, bots, notifications, api }
    }

    /// Returns a non-expired access token for the bot, refreshing and
    /// persisting on demand. A refresh failure surfaces immediately: the
    /// caller decides whether to prompt reauthorization, nothing is retried
    /// here. Concurrent refreshes for the same bot are tolerated; the last
    /// writer wins.
    pub async fn ensure_valid_token(&self, bot_id: BotId) -> Result<String, TokenError> {
        let credential = self
            .credentials
            .find_by_bot(bot_id)
            .await?
            .ok_or(TokenError::CredentialMissing)?;

        let now = Utc::now();
        if !credential.expired(now) {
            return Ok(credential.access_token);
        }

        let refreshed = self
            .api
            .refresh_token(&credential.refresh_token)
            .await
            .map_err(TokenError::UpstreamAuth)?;

        let updated = Credential {
            bot_id,
            account_id: credential.account_id,
            access_token: refreshed.access_token,
            // The platform may omit a new refresh token; the old one stays
            // valid in that case.
            refresh_token: refreshed.refresh_token.unwrap_or(credential.refresh_token),
            expires_at: now + Duration::seconds(refreshed.expires_in),
            scope: refreshed.scope.unwrap_or(credential.scope),
        };
        self.credentials.upsert(&updated).await?;

        info!(
            event_name = "platform.tokens.refreshed",
            bot_id = bot_id.0,
            account_id = updated.account_id.0,
            "access token refreshed and persisted"
        );
        Ok(updated.access_token)
    }

    /// Exchanges an authorization code, reconciles the account binding,
    /// persists the credential, then subscribes the webhook. Ordering is
    /// deliberate: persistence precedes the subscription call, and a
    /// subscription failure is reported in the outcome without undoing the
    /// persisted credential.
    pub async fn complete_authorization(
        &self,
        bot_id: BotId,
        code: &str,
        owner_external_id: &str,
    ) -> Result<AuthorizationOutcome, TokenError> {
        let token = self.api.exchange_code(code).await.map_err(TokenError::UpstreamAuth)?;
        let account_id = AccountId(token.user_id);

        let displaced_bot = self.reconcile_account(bot_id, account_id, owner_external_id).await?;

        let credential = Credential {
            bot_id,
            account_id,
            access_token: token.access_token,
            refresh_token: token.refresh_token.unwrap_or_default(),
            expires_at: Utc::now() + Duration::seconds(token.expires_in),
            scope: token.scope.unwrap_or_else(|| DEFAULT_SCOPE.to_string()),
        };
        self.credentials.upsert(&credential).await?;

        let webhook_error =
            match self.api.subscribe_webhook(&credential.access_token, account_id).await {
                Ok(()) => None,
                Err(error) => {
                    warn!(
                        event_name = "platform.oauth.webhook_subscription_failed",
                        bot_id = bot_id.0,
                        account_id = account_id.0,
                        error = %error,
                        "webhook subscription failed; credential remains persisted"
                    );
                    Some(error)
                }
            };

        info!(
            event_name = "platform.oauth.authorized",
            bot_id = bot_id.0,
            account_id = account_id.0,
            displaced_bot = displaced_bot.map(|bot| bot.0).unwrap_or_default(),
            "authorization completed"
        );

        Ok(AuthorizationOutcome { credential, displaced_bot, webhook_error })
    }

    /// One bot per account: if another bot currently holds this account,
    /// stop it, release its credential, and tell the owner about the
    /// hand-off.
    async fn reconcile_account(
        &self,
        bot_id: BotId,
        account_id: AccountId,
        owner_external_id: &str,
    ) -> Result<Option<BotId>, TokenError> {
        let Some(existing) = self.credentials.find_by_account(account_id).await? else {
            return Ok(None);
        };
        if existing.bot_id == bot_id {
            return Ok(None);
        }

        self.bots.set_status(existing.bot_id, BotStatus::Stopped).await?;
        self.credentials.delete_by_bot(existing.bot_id).await?;
        self.notifications
            .enqueue(
                owner_external_id,
                &format!(
                    "Marketplace account switched to bot #{}. The previous bot #{} has been stopped.",
                    bot_id.0, existing.bot_id.0
                ),
            )
            .await?;

        info!(
            event_name = "platform.oauth.account_rebound",
            bot_id = bot_id.0,
            displaced_bot = existing.bot_id.0,
            account_id = account_id.0,
            "account moved between bots; previous holder stopped"
        );
        Ok(Some(existing.bot_id))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    use async_trait::async_trait;
    use chrono::{Duration, Utc};
    use tokio::sync::Mutex;

    use marketbot_core::domain::bot::{Bot, BotId, BotStatus};
    use marketbot_core::domain::credential::{AccountId, Credential};
    use marketbot_db::repositories::{
        BotRepository, CredentialRepository, InMemoryBotRepository, InMemoryCredentialRepository,
        InMemoryNotificationRepository,
    };

    use crate::client::{ItemSummary, MarketplaceApi, MarketplaceError};
    use crate::oauth::TokenResponse;

    use super::{TokenError, TokenLifecycleManager};

    #[derive(Default)]
    struct ScriptedMarketplace {
        exchange_results: Mutex<VecDeque<Result<TokenResponse, MarketplaceError>>>,
        refresh_results: Mutex<VecDeque<Result<TokenResponse, MarketplaceError>>>,
        subscribe_results: Mutex<VecDeque<Result<(), MarketplaceError>>>,
        refresh_calls: AtomicU32,
        exchange_calls: AtomicU32,
        subscribe_calls: AtomicU32,
    }

    impl ScriptedMarketplace {
        fn refresh_calls(&self) -> u32 {
            self.refresh_calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl MarketplaceApi for ScriptedMarketplace {
        async fn exchange_code(&self, _code: &str) -> Result<TokenResponse, MarketplaceError> {
            self.exchange_calls.fetch_add(1, Ordering::SeqCst);
            self.exchange_results
                .lock()
                .await
                .pop_front()
                .unwrap_or_else(|| Err(MarketplaceError::Transport("unscripted".into())))
        }

        async fn refresh_token(
            &self,
            _refresh_token: &str,
        ) -> Result<TokenResponse, MarketplaceError> {
            self.refresh_calls.fetch_add(1, Ordering::SeqCst);
            self.refresh_results
                .lock()
                .await
                .pop_front()
                .unwrap_or_else(|| Err(MarketplaceError::Transport("unscripted".into())))
        }

        async fn subscribe_webhook(
            &self,
            _access_token: &str,
            _account_id: AccountId,
        ) -> Result<(), MarketplaceError> {
            self.subscribe_calls.fetch_add(1, Ordering::SeqCst);
            self.subscribe_results.lock().await.pop_front().unwrap_or(Ok(()))
        }

        async fn fetch_items(
            &self,
            _access_token: &str,
        ) -> Result<Vec<ItemSummary>, MarketplaceError> {
            Ok(Vec::new())
        }

        async fn send_message(
            &self,
            _access_token: &str,
            _account_id: AccountId,
            _chat_id: &str,
            _text: &str,
        ) -> Result<(), MarketplaceError> {
            Ok(())
        }
    }

    struct Harness {
        credentials: Arc<InMemoryCredentialRepository>,
        bots: Arc<InMemoryBotRepository>,
        notifications: Arc<InMemoryNotificationRepository>,
        api: Arc<ScriptedMarketplace>,
        manager: TokenLifecycleManager,
    }

    fn harness(api: ScriptedMarketplace) -> Harness {
        let credentials = Arc::new(InMemoryCredentialRepository::default());
        let bots = Arc::new(InMemoryBotRepository::default());
        let notifications = Arc::new(InMemoryNotificationRepository::default());
        let api = Arc::new(api);
        let manager = TokenLifecycleManager::new(
            credentials.clone(),
            bots.clone(),
            notifications.clone(),
            api.clone(),
        );
        Harness { credentials, bots, notifications, api, manager }
    }

    fn credential(bot: i64, account: i64, hours_to_expiry: i64) -> Credential {
        Credential {
            bot_id: BotId(bot),
            account_id: AccountId(account),
            access_token: format!("access-{bot}"),
            refresh_token: format!("refresh-{bot}"),
            expires_at: Utc::now() + Duration::hours(hours_to_expiry),
            scope: "messenger:read,messenger:write".to_string(),
        }
    }

    fn token_response(access: &str, refresh: Option<&str>) -> TokenResponse {
        TokenResponse {
            access_token: access.to_string(),
            refresh_token: refresh.map(str::to_string),
            expires_in: 86_400,
            scope: None,
            user_id: 900,
        }
    }

    async fn seed_bot(bots: &InMemoryBotRepository, id: i64, status: BotStatus) {
        bots.insert(Bot {
            id: BotId(id),
            user_id: marketbot_core::domain::user::UserId(1),
            prompt: "prompt".to_string(),
            status,
            items: None,
            is_authorized: true,
            parameters: Vec::new(),
            actions: Vec::new(),
        })
        .await;
    }

    #[tokio::test]
    async fn a_valid_token_is_returned_without_any_network_call() {
        let harness = harness(ScriptedMarketplace::default());
        harness.credentials.upsert(&credential(1, 100, 6)).await.expect("seed credential");

        let first = harness.manager.ensure_valid_token(BotId(1)).await.expect("first call");
        let second = harness.manager.ensure_valid_token(BotId(1)).await.expect("second call");

        assert_eq!(first, "access-1");
        assert_eq!(first, second);
        assert_eq!(harness.api.refresh_calls(), 0);
    }

    #[tokio::test]
    async fn an_expired_token_triggers_exactly_one_refresh_with_a_later_expiry() {
        let api = ScriptedMarketplace::default();
        api.refresh_results
            .try_lock()
            .expect("fresh mutex")
            .push_back(Ok(token_response("access-new", Some("refresh-new"))));
        let harness = harness(api);

        let stale = credential(1, 100, -1);
        let old_expiry = stale.expires_at;
        harness.credentials.upsert(&stale).await.expect("seed credential");

        let token = harness.manager.ensure_valid_token(BotId(1)).await.expect("refresh");
        assert_eq!(token, "access-new");
        assert_eq!(harness.api.refresh_calls(), 1);

        let stored =
            harness.credentials.find_by_bot(BotId(1)).await.expect("find").expect("exists");
        assert_eq!(stored.access_token, "access-new");
        assert_eq!(stored.refresh_token, "refresh-new");
        assert!(stored.expires_at > old_expiry);
    }

    #[tokio::test]
    async fn an_omitted_refresh_token_keeps_the_stored_one() {
        let api = ScriptedMarketplace::default();
        api.refresh_results
            .try_lock()
            .expect("fresh mutex")
            .push_back(Ok(token_response("access-new", None)));
        let harness = harness(api);
        harness.credentials.upsert(&credential(1, 100, -1)).await.expect("seed credential");

        harness.manager.ensure_valid_token(BotId(1)).await.expect("refresh");

        let stored =
            harness.credentials.find_by_bot(BotId(1)).await.expect("find").expect("exists");
        assert_eq!(stored.refresh_token, "refresh-1");
    }

    #[tokio::test]
    async fn a_missing_credential_is_terminal() {
        let harness = harness(ScriptedMarketplace::default());
        let error = harness
            .manager
            .ensure_valid_token(BotId(7))
            .await
            .expect_err("no credential row exists");
        assert!(matches!(error, TokenError::CredentialMissing));
        assert_eq!(harness.api.refresh_calls(), 0);
    }

    #[tokio::test]
    async fn a_failed_refresh_surfaces_without_automatic_retry() {
        let api = ScriptedMarketplace::default();
        api.refresh_results
            .try_lock()
            .expect("fresh mutex")
            .push_back(Err(MarketplaceError::Api { status: 400, detail: "revoked".into() }));
        let harness = harness(api);
        harness.credentials.upsert(&credential(1, 100, -1)).await.expect("seed credential");

        let error = harness
            .manager
            .ensure_valid_token(BotId(1))
            .await
            .expect_err("refresh failure must surface");
        assert!(matches!(error, TokenError::UpstreamAuth(_)));
        assert_eq!(harness.api.refresh_calls(), 1);

        // The stale credential is untouched; reauthorization is the
        // caller's move.
        let stored =
            harness.credentials.find_by_bot(BotId(1)).await.expect("find").expect("exists");
        assert_eq!(stored.access_token, "access-1");
    }

    #[tokio::test]
    async fn authorizing_a_bound_account_displaces_the_previous_bot() {
        let api = ScriptedMarketplace::default();
        api.exchange_results
            .try_lock()
            .expect("fresh mutex")
            .push_back(Ok(token_response("access-b", Some("refresh-b"))));
        let harness = harness(api);

        seed_bot(&harness.bots, 1, BotStatus::Active).await;
        seed_bot(&harness.bots, 2, BotStatus::Stopped).await;
        // Account 900 currently belongs to bot 1.
        harness.credentials.upsert(&credential(1, 900, 6)).await.expect("seed binding");

        let outcome = harness
            .manager
            .complete_authorization(BotId(2), "auth-code", "owner-ext")
            .await
            .expect("authorization should succeed");

        assert_eq!(outcome.displaced_bot, Some(BotId(1)));
        assert!(outcome.webhook_error.is_none());

        let displaced =
            harness.bots.find_by_id(BotId(1)).await.expect("find").expect("exists");
        assert_eq!(displaced.status, BotStatus::Stopped);

        // Bot 2 is now the sole holder of the account's tokens.
        assert!(harness.credentials.find_by_bot(BotId(1)).await.expect("lookup").is_none());
        let holder = harness
            .credentials
            .find_by_account(AccountId(900))
            .await
            .expect("lookup")
            .expect("exists");
        assert_eq!(holder.bot_id, BotId(2));
        assert_eq!(holder.access_token, "access-b");

        let notifications = harness.notifications.all().await;
        assert_eq!(notifications.len(), 1);
        assert!(notifications[0].text.contains("bot #2"));
    }

    #[tokio::test]
    async fn a_subscription_failure_does_not_roll_back_the_credential() {
        let api = ScriptedMarketplace::default();
        api.exchange_results
            .try_lock()
            .expect("fresh mutex")
            .push_back(Ok(token_response("access-b", Some("refresh-b"))));
        api.subscribe_results
            .try_lock()
            .expect("fresh mutex")
            .push_back(Err(MarketplaceError::Api { status: 500, detail: "outage".into() }));
        let harness = harness(api);
        seed_bot(&harness.bots, 2, BotStatus::Stopped).await;

        let outcome = harness
            .manager
            .complete_authorization(BotId(2), "auth-code", "owner-ext")
            .await
            .expect("authorization persists despite subscription failure");

        assert!(outcome.webhook_error.is_some());
        assert!(harness.credentials.find_by_bot(BotId(2)).await.expect("lookup").is_some());
    }
}
