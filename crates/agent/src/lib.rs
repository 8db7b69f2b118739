//! Conversation dispatch: one inbound message in, one structured response
//! out, side effects applied exactly once.
//!
//! The pipeline per message:
//! 1. **Prompt compilation** (`prompt`) - bot template + generated
//!    parameter/action sections + the JSON-shape instruction
//! 2. **History replay** (`prompt`) - prior turns of the same partition,
//!    oldest first, malformed past responses carried verbatim
//! 3. **Model call** (`llm`) - OpenAI-compatible chat completion with a
//!    JSON-object response-format constraint and a bounded timeout
//! 4. **Validation + retry** (`response`, `dispatcher`) - two attempts,
//!    then the fixed fallback as a *successful* terminal outcome
//! 5. **Side effects + persistence** (`dispatcher`) - the reserved notify
//!    action feeds the outbox; the turn is appended to history
//!
//! The LLM is never trusted with control flow: a malformed answer costs an
//! attempt, never an error to the caller.

pub mod dispatcher;
pub mod llm;
pub mod prompt;
pub mod response;

pub use dispatcher::{ConversationDispatcher, DispatchError, DispatchRequest};
pub use llm::{ChatRequest, ChatRole, ChatTurn, HttpLlmClient, LlmClient};
pub use response::{ActionCall, ParameterValue, StructuredResponse};
