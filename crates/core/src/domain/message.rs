use chrono::{DateTime, Utc};

use crate::domain::bot::BotId;
use crate::domain::credential::AccountId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TurnId(pub i64);

/// Status of a freshly ingested webhook row, before reconciliation with a
/// bot.
pub const TURN_STATUS_RECEIVED: &str = "received";
/// Default status of a dispatched turn when the model did not report one.
pub const TURN_STATUS_PROCESSED: &str = "processed";

/// One conversation turn: the inbound text plus the serialized structured
/// response. `bot_id` is None only for webhook ingestion rows that have not
/// been reconciled yet. Test and live turns form disjoint histories.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConversationTurn {
    pub id: TurnId,
    pub bot_id: Option<BotId>,
    pub text: String,
    pub response: String,
    pub status: String,
    pub is_test: bool,
    pub timestamp: DateTime<Utc>,
    pub account_id: Option<AccountId>,
}
