use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::bot::BotId;

/// The marketplace account identifier, as reported by the OAuth token
/// endpoint's `user_id` field and echoed in webhook routes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AccountId(pub i64);

/// The OAuth binding between one bot and one marketplace account. Exactly
/// one row per bot and per account; refreshes overwrite it in place.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Credential {
    pub bot_id: BotId,
    pub account_id: AccountId,
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
    pub scope: String,
}

impl Credential {
    pub fn expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use crate::domain::bot::BotId;

    use super::{AccountId, Credential};

    #[test]
    fn a_credential_expires_at_its_deadline_inclusive() {
        let now = Utc::now();
        let credential = Credential {
            bot_id: BotId(1),
            account_id: AccountId(100),
            access_token: "access".to_string(),
            refresh_token: "refresh".to_string(),
            expires_at: now,
            scope: "messenger:read".to_string(),
        };

        assert!(credential.expired(now));
        assert!(credential.expired(now + Duration::seconds(1)));
        assert!(!credential.expired(now - Duration::seconds(1)));
    }
}
