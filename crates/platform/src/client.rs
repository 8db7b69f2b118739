use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use thiserror::Error;

use marketbot_core::config::MarketplaceConfig;
use marketbot_core::domain::credential::AccountId;

use crate::oauth::TokenResponse;

#[derive(Debug, Error)]
pub enum MarketplaceError {
    #[error("marketplace request failed: {0}")]
    Transport(String),
    #[error("marketplace returned {status}: {detail}")]
    Api { status: u16, detail: String },
    #[error("malformed marketplace response: {0}")]
    Decode(String),
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct ItemSummary {
    pub id: i64,
    pub title: String,
}

/// The platform HTTP surface the rest of the system depends on. Every call
/// is a single bounded request; retries are the caller's policy, not the
/// client's.
#[async_trait]
pub trait MarketplaceApi: Send + Sync {
    async fn exchange_code(&self, code: &str) -> Result<TokenResponse, MarketplaceError>;
    async fn refresh_token(&self, refresh_token: &str)
        -> Result<TokenResponse, MarketplaceError>;
    async fn subscribe_webhook(
        &self,
        access_token: &str,
        account_id: AccountId,
    ) -> Result<(), MarketplaceError>;
    async fn fetch_items(&self, access_token: &str)
        -> Result<Vec<ItemSummary>, MarketplaceError>;
    async fn send_message(
        &self,
        access_token: &str,
        account_id: AccountId,
        chat_id: &str,
        text: &str,
    ) -> Result<(), MarketplaceError>;
}

pub struct HttpMarketplaceClient {
    http: reqwest::Client,
    token_url: String,
    api_url: String,
    client_id: String,
    client_secret: SecretString,
    webhook_base_url: String,
}

impl HttpMarketplaceClient {
    pub fn from_config(config: &MarketplaceConfig) -> Result<Self, MarketplaceError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|error| MarketplaceError::Transport(error.to_string()))?;

        Ok(Self {
            http,
            token_url: config.token_url.clone(),
            api_url: config.api_url.trim_end_matches('/').to_string(),
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            webhook_base_url: config.webhook_base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn token_request(
        &self,
        form: &[(&str, &str)],
    ) -> Result<TokenResponse, MarketplaceError> {
        let response = self
            .http
            .post(&self.token_url)
            .form(form)
            .send()
            .await
            .map_err(|error| MarketplaceError::Transport(error.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(MarketplaceError::Api { status: status.as_u16(), detail });
        }

        response
            .json::<TokenResponse>()
            .await
            .map_err(|error| MarketplaceError::Decode(error.to_string()))
    }

    async fn expect_success(response: reqwest::Response) -> Result<(), MarketplaceError> {
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let detail = response.text().await.unwrap_or_default();
        Err(MarketplaceError::Api { status: status.as_u16(), detail })
    }
}

#[derive(Deserialize)]
struct ItemsPage {
    #[serde(default)]
    items: Vec<ItemSummary>,
}

#[async_trait]
impl MarketplaceApi for HttpMarketplaceClient {
    async fn exchange_code(&self, code: &str) -> Result<TokenResponse, MarketplaceError> {
        self.token_request(&[
            ("grant_type", "authorization_code"),
            ("code", code),
            ("client_id", &self.client_id),
            ("client_secret", self.client_secret.expose_secret()),
        ])
        .await
    }

    async fn refresh_token(
        &self,
        refresh_token: &str,
    ) -> Result<TokenResponse, MarketplaceError> {
        self.token_request(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", &self.client_id),
            ("client_secret", self.client_secret.expose_secret()),
        ])
        .await
    }

    async fn subscribe_webhook(
        &self,
        access_token: &str,
        account_id: AccountId,
    ) -> Result<(), MarketplaceError> {
        let callback =
            format!("{}/marketplace/webhook/{}", self.webhook_base_url, account_id.0);
        let response = self
            .http
            .post(format!("{}/messenger/v3/webhook", self.api_url))
            .bearer_auth(access_token)
            .json(&serde_json::json!({ "url": callback }))
            .send()
            .await
            .map_err(|error| MarketplaceError::Transport(error.to_string()))?;

        Self::expect_success(response).await
    }

    async fn fetch_items(
        &self,
        access_token: &str,
    ) -> Result<Vec<ItemSummary>, MarketplaceError> {
        let response = self
            .http
            .get(format!("{}/items", self.api_url))
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|error| MarketplaceError::Transport(error.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(MarketplaceError::Api { status: status.as_u16(), detail });
        }

        let page: ItemsPage = response
            .json()
            .await
            .map_err(|error| MarketplaceError::Decode(error.to_string()))?;
        Ok(page.items)
    }

    async fn send_message(
        &self,
        access_token: &str,
        account_id: AccountId,
        chat_id: &str,
        text: &str,
    ) -> Result<(), MarketplaceError> {
        let response = self
            .http
            .post(format!(
                "{}/messenger/v1/accounts/{}/chats/{chat_id}/messages",
                self.api_url, account_id.0
            ))
            .bearer_auth(access_token)
            .json(&serde_json::json!({
                "message": { "text": text },
                "type": "text",
            }))
            .send()
            .await
            .map_err(|error| MarketplaceError::Transport(error.to_string()))?;

        Self::expect_success(response).await
    }
}
