//! Core domain for the marketbot service.
//!
//! Everything in this crate is I/O-free: the bot/user/credential domain
//! model, the parameter/action spec text format, the billing policy, the
//! layered configuration loader, and the error taxonomy shared by the other
//! crates. Persistence lives in `marketbot-db`, conversation dispatch in
//! `marketbot-agent`, and the marketplace integration in
//! `marketbot-platform`.

pub mod billing;
pub mod config;
pub mod domain;
pub mod errors;

pub use billing::{assess_charge, ChargeOutcome};
pub use domain::bot::{
    parse_spec_entries, ActivationBlocker, Bot, BotId, BotStatus, ItemSelection, SpecEntry,
    SpecParseError, NOTIFY_ACTION,
};
pub use domain::credential::{AccountId, Credential};
pub use domain::message::{
    ConversationTurn, TurnId, TURN_STATUS_PROCESSED, TURN_STATUS_RECEIVED,
};
pub use domain::notification::{Notification, NotificationId, NotificationStatus};
pub use domain::session::{RegistrationSession, RegistrationStep};
pub use domain::user::{User, UserId};
pub use errors::{ApplicationError, DomainError, InterfaceError};
