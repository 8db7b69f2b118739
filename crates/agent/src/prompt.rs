use std::fmt::Write as _;

use marketbot_core::domain::bot::{Bot, SpecEntry};
use marketbot_core::domain::message::ConversationTurn;

use crate::llm::ChatTurn;
use crate::response::parse_structured;

/// Compiles the system prompt: the bot's own template, the generated
/// parameter and action sections, and the fixed JSON-shape instruction the
/// validator in `response` depends on.
pub fn compile_system_prompt(bot: &Bot) -> String {
    let mut prompt = bot.prompt.trim_end().to_string();

    let _ = write!(
        prompt,
        "\n\nDuring the dialogue you must collect the following data (parameter list):\n\
         {}\n\
         Update and extend the collected values in every answer.",
        spec_section(&bot.parameters)
    );

    let _ = write!(
        prompt,
        "\n\nDuring the dialogue you must perform actions alongside your answers whenever \
         appropriate at the current stage:\n\
         {}",
        spec_section(&bot.actions)
    );

    let _ = write!(
        prompt,
        "\n\nAnswer with a JSON object of exactly this structure:\n\
         {{\n\
         \x20 \"response\": \"string (your reply to the customer)\",\n\
         \x20 \"actions\": [{{\"action\": \"string (a name from your action list)\", \
         \"value\": \"string (action payload)\"}}],\n\
         \x20 \"parameters\": [{{\"parameter\": \"string (a name from your parameter list)\", \
         \"value\": \"string (collected value)\"}}]\n\
         }}"
    );

    prompt
}

fn spec_section(entries: &[SpecEntry]) -> String {
    entries
        .iter()
        .map(|entry| format!("[{}] [{}]", entry.name, entry.description))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Rebuilds prior turns as alternating user/assistant messages. An
/// assistant turn that does not parse as structured output is carried
/// verbatim: the model sees the full history even where a past answer was
/// malformed.
pub fn replay_history(history: &[ConversationTurn]) -> Vec<ChatTurn> {
    let mut turns = Vec::with_capacity(history.len() * 2);
    for record in history {
        turns.push(ChatTurn::user(record.text.clone()));
        if record.response.is_empty() {
            continue;
        }
        match parse_structured(&record.response) {
            Some(structured) => {
                let compact = serde_json::to_string(&structured)
                    .unwrap_or_else(|_| record.response.clone());
                turns.push(ChatTurn::assistant(compact));
            }
            None => turns.push(ChatTurn::assistant(record.response.clone())),
        }
    }
    turns
}
