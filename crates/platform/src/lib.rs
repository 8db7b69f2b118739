//! Marketplace integration: the OAuth flow, the HTTP API client, the
//! webhook wire format, and the token lifecycle manager that keeps one
//! valid credential per bot.
//!
//! # Architecture
//!
//! ```text
//! OAuth callback ─→ TokenLifecycleManager ─→ CredentialRepository
//!                        │    (reconcile, exchange, persist, subscribe)
//!                        └──→ MarketplaceApi (HTTP)
//!
//! Outbound call ─→ ensure_valid_token ─→ refresh-on-expiry, last writer wins
//! ```
//!
//! # Key Types
//!
//! - `MarketplaceApi` - trait over the platform HTTP surface
//! - `HttpMarketplaceClient` - reqwest implementation with bounded timeouts
//! - `TokenLifecycleManager` - `ensure_valid_token` / `complete_authorization`
//! - `WebhookMessage` - inbound messenger event payload

pub mod client;
pub mod events;
pub mod oauth;
pub mod tokens;

pub use client::{HttpMarketplaceClient, ItemSummary, MarketplaceApi, MarketplaceError};
pub use events::{WebhookContent, WebhookMessage};
pub use oauth::{authorize_url, TokenResponse, DEFAULT_SCOPE};
pub use tokens::{AuthorizationOutcome, TokenError, TokenLifecycleManager};
