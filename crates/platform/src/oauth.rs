use serde::Deserialize;

use marketbot_core::config::MarketplaceConfig;
use marketbot_core::domain::bot::BotId;

/// Scope recorded when the token endpoint does not echo one back.
pub const DEFAULT_SCOPE: &str = "messenger:read,messenger:write,items:info";

/// The token endpoint's answer for both the code exchange and the refresh
/// grant. `refresh_token` may be omitted on refresh, in which case the
/// stored one stays valid; `user_id` identifies the marketplace account.
#[derive(Clone, Debug, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    pub expires_in: i64,
    #[serde(default)]
    pub scope: Option<String>,
    pub user_id: i64,
}

/// The authorization redirect. `state` carries the bot id so the callback
/// can resolve which bot the grant belongs to.
pub fn authorize_url(config: &MarketplaceConfig, bot_id: BotId) -> String {
    format!(
        "{}?client_id={}&redirect_uri={}&response_type=code&state={}&scope={}",
        config.auth_url,
        urlencode(&config.client_id),
        urlencode(&config.redirect_uri),
        bot_id.0,
        urlencode(&config.scope),
    )
}

// Query-string escaping for the handful of characters our config values can
// realistically contain.
fn urlencode(value: &str) -> String {
    let mut encoded = String::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                encoded.push(byte as char)
            }
            other => {
                encoded.push('%');
                encoded.push_str(&format!("{other:02X}"));
            }
        }
    }
    encoded
}
