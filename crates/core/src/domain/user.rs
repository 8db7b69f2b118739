use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(pub i64);

/// An operator account. `external_id` is the identity on the notification
/// channel (the chat service the registration front-end runs on), not the
/// marketplace account id.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub external_id: String,
    pub username: String,
    pub password_hash: String,
    pub registration_date: DateTime<Utc>,
    pub trial_end_date: DateTime<Utc>,
    pub balance_cents: i64,
}

impl User {
    pub fn trial_active(&self, now: DateTime<Utc>) -> bool {
        self.trial_end_date > now
    }

    /// Whether the balance covers a cost. Charging itself is a relative
    /// update in the repository layer; this is only the precheck used by
    /// bot creation and activation.
    pub fn can_afford(&self, cost_cents: i64) -> bool {
        self.balance_cents >= cost_cents
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use super::{User, UserId};

    fn user(balance_cents: i64, trial_days_left: i64) -> User {
        let now = Utc::now();
        User {
            id: UserId(1),
            external_id: "ext-1".to_string(),
            username: "operator".to_string(),
            password_hash: "hash".to_string(),
            registration_date: now - Duration::days(30),
            trial_end_date: now + Duration::days(trial_days_left),
            balance_cents,
        }
    }

    #[test]
    fn trial_is_active_until_end_date() {
        let now = Utc::now();
        assert!(user(0, 1).trial_active(now));
        assert!(!user(0, -1).trial_active(now));
    }

    #[test]
    fn affordability_is_a_simple_threshold() {
        assert!(user(5_000, 0).can_afford(5_000));
        assert!(!user(4_999, 0).can_afford(5_000));
    }
}
