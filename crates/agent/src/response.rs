use serde::{Deserialize, Serialize};

/// Fallback reply sent to the customer when the model never produced a
/// usable object.
pub const FALLBACK_RESPONSE_TEXT: &str = "We will get back to you shortly.";
/// Status persisted with a fallback turn; operators filter on it.
pub const STATUS_NEEDS_MANUAL_HANDLING: &str = "needs manual handling";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionCall {
    pub action: String,
    pub value: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterValue {
    pub parameter: String,
    pub value: String,
}

/// The shape the model is instructed to answer with. `status` is optional
/// on the wire; the dispatcher defaults it to `processed` when absent.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructuredResponse {
    pub response: String,
    pub actions: Vec<ActionCall>,
    pub parameters: Vec<ParameterValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

impl StructuredResponse {
    /// The fixed terminal outcome after the retry budget is exhausted. A
    /// valid result, not an error: the conversation keeps flowing.
    pub fn fallback() -> Self {
        Self {
            response: FALLBACK_RESPONSE_TEXT.to_string(),
            actions: Vec::new(),
            parameters: Vec::new(),
            status: Some(STATUS_NEEDS_MANUAL_HANDLING.to_string()),
        }
    }
}

/// Accepts a raw model answer only if it is a JSON object carrying all
/// three required keys. Anything else costs the attempt.
pub fn parse_structured(raw: &str) -> Option<StructuredResponse> {
    let value: serde_json::Value = serde_json::from_str(raw).ok()?;
    let object = value.as_object()?;
    for key in ["response", "actions", "parameters"] {
        if !object.contains_key(key) {
            return None;
        }
    }
    serde_json::from_value(value).ok()
}
