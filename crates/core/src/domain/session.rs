use chrono::{DateTime, Utc};

/// Steps of the multi-message registration form driven by the external chat
/// front-end.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RegistrationStep {
    Username,
    Password,
}

impl RegistrationStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Username => "username",
            Self::Password => "password",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "username" => Some(Self::Username),
            "password" => Some(Self::Password),
            _ => None,
        }
    }
}

/// Durable, keyed replacement for the old in-process registration map: one
/// row per external chat identity with an explicit expiry, so half-finished
/// registrations survive restarts and scale across processes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RegistrationSession {
    pub external_id: String,
    pub step: RegistrationStep,
    pub username: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl RegistrationSession {
    pub fn expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}
