use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::user::UserId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BotId(pub i64);

/// Reserved action name: when the model requests it, the dispatcher enqueues
/// the action value as a notification to the bot owner. Every other action
/// name is persisted untouched.
pub const NOTIFY_ACTION: &str = "notify";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BotStatus {
    Stopped,
    Active,
}

impl BotStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stopped => "stopped",
            Self::Active => "active",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "stopped" => Some(Self::Stopped),
            "active" => Some(Self::Active),
            _ => None,
        }
    }
}

/// Which marketplace listings the bot answers for: everything the account
/// owns, or an explicit set of listing ids.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ItemSelection {
    All,
    Listed(Vec<i64>),
}

impl ItemSelection {
    pub fn to_json(&self) -> String {
        match self {
            Self::All => "\"all\"".to_string(),
            Self::Listed(ids) => {
                serde_json::to_string(ids).unwrap_or_else(|_| "[]".to_string())
            }
        }
    }

    pub fn from_json(raw: &str) -> Option<Self> {
        match serde_json::from_str::<serde_json::Value>(raw).ok()? {
            serde_json::Value::String(tag) if tag == "all" => Some(Self::All),
            serde_json::Value::Array(values) => {
                let ids = values.into_iter().map(|value| value.as_i64()).collect::<Option<_>>()?;
                Some(Self::Listed(ids))
            }
            _ => None,
        }
    }

    pub fn covers(&self, item_id: i64) -> bool {
        match self {
            Self::All => true,
            Self::Listed(ids) => ids.contains(&item_id),
        }
    }
}

/// One named parameter the model must collect, or one named action it may
/// request. Both sides of the prompt contract share this shape.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpecEntry {
    pub name: String,
    pub description: String,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SpecParseError {
    #[error("malformed {field} line: `{line}` (expected `[name] [description]`)")]
    MalformedLine { field: &'static str, line: String },
}

/// Parses the dashboard's spec text: one `[name] [description]` line per
/// entry, blank input meaning an empty list. Rejected before anything is
/// persisted.
pub fn parse_spec_entries(
    text: &str,
    field: &'static str,
) -> Result<Vec<SpecEntry>, SpecParseError> {
    let mut entries = Vec::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        entries.push(parse_spec_line(line, field)?);
    }
    Ok(entries)
}

fn parse_spec_line(line: &str, field: &'static str) -> Result<SpecEntry, SpecParseError> {
    let malformed = || SpecParseError::MalformedLine { field, line: line.to_string() };

    let rest = line.strip_prefix('[').ok_or_else(malformed)?;
    let (name, rest) = rest.split_once(']').ok_or_else(malformed)?;
    let rest = rest.trim_start();
    let rest = rest.strip_prefix('[').ok_or_else(malformed)?;
    let description = rest.strip_suffix(']').ok_or_else(malformed)?;

    if name.is_empty() || description.is_empty() {
        return Err(malformed());
    }

    Ok(SpecEntry { name: name.to_string(), description: description.to_string() })
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ActivationBlocker {
    NotAuthorized,
    NoItemsSelected,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Bot {
    pub id: BotId,
    pub user_id: UserId,
    pub prompt: String,
    pub status: BotStatus,
    pub items: Option<ItemSelection>,
    pub is_authorized: bool,
    pub parameters: Vec<SpecEntry>,
    pub actions: Vec<SpecEntry>,
}

impl Bot {
    /// The activation invariant: a bot may only become `active` once a
    /// marketplace account is bound and a listing selection exists.
    pub fn activation_blocker(&self) -> Option<ActivationBlocker> {
        if !self.is_authorized {
            return Some(ActivationBlocker::NotAuthorized);
        }
        if self.items.is_none() {
            return Some(ActivationBlocker::NoItemsSelected);
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use crate::domain::user::UserId;

    use super::{
        parse_spec_entries, ActivationBlocker, Bot, BotId, BotStatus, ItemSelection, SpecEntry,
        SpecParseError,
    };

    fn bot(is_authorized: bool, items: Option<ItemSelection>) -> Bot {
        Bot {
            id: BotId(1),
            user_id: UserId(1),
            prompt: "You are a sales assistant.".to_string(),
            status: BotStatus::Stopped,
            items,
            is_authorized,
            parameters: Vec::new(),
            actions: Vec::new(),
        }
    }

    #[test]
    fn parses_spec_lines_into_entries() {
        let entries = parse_spec_entries(
            "[budget] [the buyer's maximum budget]\n\n[deadline] [when they need it]",
            "parameters",
        )
        .expect("spec should parse");

        assert_eq!(
            entries,
            vec![
                SpecEntry {
                    name: "budget".to_string(),
                    description: "the buyer's maximum budget".to_string(),
                },
                SpecEntry {
                    name: "deadline".to_string(),
                    description: "when they need it".to_string(),
                },
            ]
        );
    }

    #[test]
    fn empty_spec_text_is_an_empty_list() {
        assert_eq!(parse_spec_entries("", "actions").expect("empty is fine"), Vec::new());
        assert_eq!(parse_spec_entries("  \n  ", "actions").expect("blank is fine"), Vec::new());
    }

    #[test]
    fn rejects_malformed_spec_lines() {
        let error = parse_spec_entries("budget - the budget", "parameters")
            .expect_err("missing brackets should fail");
        assert!(matches!(error, SpecParseError::MalformedLine { field: "parameters", .. }));

        parse_spec_entries("[name] []", "actions").expect_err("empty description should fail");
        parse_spec_entries("[] [desc]", "actions").expect_err("empty name should fail");
    }

    #[test]
    fn activation_requires_authorization_then_items() {
        assert_eq!(
            bot(false, None).activation_blocker(),
            Some(ActivationBlocker::NotAuthorized)
        );
        assert_eq!(
            bot(true, None).activation_blocker(),
            Some(ActivationBlocker::NoItemsSelected)
        );
        assert_eq!(bot(true, Some(ItemSelection::All)).activation_blocker(), None);
    }

    #[test]
    fn item_selection_round_trips_through_json() {
        assert_eq!(ItemSelection::from_json("\"all\""), Some(ItemSelection::All));
        assert_eq!(
            ItemSelection::from_json("[3, 14, 15]"),
            Some(ItemSelection::Listed(vec![3, 14, 15]))
        );
        assert_eq!(ItemSelection::Listed(vec![9]).to_json(), "[9]");
        assert_eq!(ItemSelection::All.to_json(), "\"all\"");
        assert_eq!(ItemSelection::from_json("42"), None);
    }

    #[test]
    fn listed_selection_scopes_item_coverage() {
        let selection = ItemSelection::Listed(vec![7, 8]);
        assert!(selection.covers(7));
        assert!(!selection.covers(9));
        assert!(ItemSelection::All.covers(9));
    }
}
