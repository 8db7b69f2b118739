use std::sync::Arc;

use axum::Router;
use thiserror::Error;
use tracing::info;

use marketbot_agent::dispatcher::ConversationDispatcher;
use marketbot_agent::llm::HttpLlmClient;
use marketbot_core::config::{AppConfig, ConfigError, LoadOptions};
use marketbot_db::repositories::{
    SqlBotRepository, SqlCredentialRepository, SqlMessageRepository, SqlNotificationRepository,
    SqlUserRepository,
};
use marketbot_db::{connect_with, migrations, DbPool};
use marketbot_platform::client::{HttpMarketplaceClient, MarketplaceError};
use marketbot_platform::tokens::TokenLifecycleManager;

use crate::billing::BillingSweep;
use crate::bots::BotService;
use crate::oauth::{self, OauthContext};
use crate::webhook::{self, WebhookPipeline};

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub pipeline: Arc<WebhookPipeline>,
    pub oauth: Arc<OauthContext>,
    pub billing: Arc<BillingSweep>,
    pub bot_service: Arc<BotService>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("marketplace client construction failed: {0}")]
    Marketplace(#[source] MarketplaceError),
    #[error("llm client construction failed: {0}")]
    Llm(String),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );

    let db_pool = connect_with(
        &config.database.url,
        config.database.max_connections,
        config.database.timeout_secs,
    )
    .await
    .map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        "database migrations applied"
    );

    let users = Arc::new(SqlUserRepository::new(db_pool.clone()));
    let bots = Arc::new(SqlBotRepository::new(db_pool.clone()));
    let credentials = Arc::new(SqlCredentialRepository::new(db_pool.clone()));
    let messages = Arc::new(SqlMessageRepository::new(db_pool.clone()));
    let notifications = Arc::new(SqlNotificationRepository::new(db_pool.clone()));

    let marketplace = Arc::new(
        HttpMarketplaceClient::from_config(&config.marketplace)
            .map_err(BootstrapError::Marketplace)?,
    );
    let llm = Arc::new(
        HttpLlmClient::from_config(&config.llm)
            .map_err(|client_error| BootstrapError::Llm(client_error.to_string()))?,
    );

    let dispatcher = Arc::new(ConversationDispatcher::new(
        users.clone(),
        bots.clone(),
        messages.clone(),
        notifications.clone(),
        llm,
        &config.llm,
    ));
    let tokens = Arc::new(TokenLifecycleManager::new(
        credentials.clone(),
        bots.clone(),
        notifications.clone(),
        marketplace.clone(),
    ));

    let pipeline = Arc::new(WebhookPipeline::new(
        bots.clone(),
        credentials.clone(),
        messages.clone(),
        dispatcher,
        tokens.clone(),
        marketplace.clone(),
    ));
    let oauth = Arc::new(OauthContext {
        bots: bots.clone(),
        users: users.clone(),
        notifications: notifications.clone(),
        tokens,
        marketplace,
        marketplace_config: config.marketplace.clone(),
    });
    let billing = Arc::new(BillingSweep::new(
        users.clone(),
        bots.clone(),
        notifications.clone(),
        config.billing.bot_daily_cost_cents,
    ));
    let bot_service = Arc::new(BotService::new(
        users,
        bots,
        messages,
        notifications,
        config.billing.bot_daily_cost_cents,
    ));

    Ok(Application { config, db_pool, pipeline, oauth, billing, bot_service })
}

/// The main API surface: webhook ingress plus the OAuth flow. Health runs
/// on its own port.
pub fn api_router(app: &Application) -> Router {
    webhook::router(app.pipeline.clone()).merge(oauth::router(app.oauth.clone()))
}

#[cfg(test)]
mod tests {
    use marketbot_core::config::{ConfigOverrides, LoadOptions};
    use marketbot_core::domain::bot::ItemSelection;
    use marketbot_db::repositories::{
        BotRepository, NewUser, SqlBotRepository, SqlUserRepository, UserRepository,
    };

    use crate::bootstrap::bootstrap;

    fn valid_overrides(database_url: &str) -> LoadOptions {
        LoadOptions {
            overrides: ConfigOverrides {
                database_url: Some(database_url.to_string()),
                marketplace_client_id: Some("client-test".to_string()),
                marketplace_client_secret: Some("secret-test".to_string()),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        }
    }

    #[tokio::test]
    async fn bootstrap_fails_fast_without_marketplace_credentials() {
        let result = bootstrap(LoadOptions {
            overrides: ConfigOverrides {
                database_url: Some("sqlite::memory:".to_string()),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        })
        .await;

        assert!(result.is_err());
        let message = result.err().expect("error").to_string();
        assert!(message.contains("marketplace.client_id"));
    }

    #[tokio::test]
    async fn integration_smoke_covers_startup_and_the_bot_lifecycle_path() {
        let app = bootstrap(valid_overrides("sqlite::memory:?cache=shared"))
            .await
            .expect("bootstrap should succeed with valid overrides");

        let (table_count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name IN \
             ('users', 'bots', 'tokens', 'messages', 'notifications')",
        )
        .fetch_one(&app.db_pool)
        .await
        .expect("expected baseline tables to be available after bootstrap");
        assert_eq!(table_count, 5, "bootstrap should expose the baseline tables");

        // Walk the lifecycle far enough to prove the wiring: create, then
        // hit the activation invariant, then satisfy it.
        let users = SqlUserRepository::new(app.db_pool.clone());
        let owner = users
            .create(NewUser {
                external_id: "ext-smoke".to_string(),
                username: "smoke".to_string(),
                password_hash: "hash".to_string(),
                trial_end_date: chrono::Utc::now() + chrono::Duration::days(14),
            })
            .await
            .expect("seed user");

        let bot = app
            .bot_service
            .create_bot(owner.id, "You answer chats.", "[budget] [buyer budget]", "")
            .await
            .expect("create bot");

        app.bot_service
            .activate_bot(owner.id, bot.id)
            .await
            .expect_err("activation must be blocked before authorization");

        let bots = SqlBotRepository::new(app.db_pool.clone());
        bots.mark_authorized(bot.id).await.expect("authorize");
        bots.set_items(bot.id, &ItemSelection::All).await.expect("items");
        app.bot_service.activate_bot(owner.id, bot.id).await.expect("activation succeeds");

        app.db_pool.close().await;
    }
}
