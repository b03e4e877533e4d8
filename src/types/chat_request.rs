use serde::{Deserialize, Serialize};

use crate::types::Turn;

/// The JSON body posted to the chat endpoint.
///
/// The remote API keeps no state between calls, so every request carries the
/// whole conversation so far.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatRequest {
    /// The ordered conversation turns.
    pub messages: Vec<Turn>,

    /// Optional server-side conversation identifier.
    #[serde(
        rename = "conversationId",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub conversation_id: Option<String>,
}

impl ChatRequest {
    /// Create a new `ChatRequest` from a list of turns.
    pub fn new(messages: Vec<Turn>) -> Self {
        Self {
            messages,
            conversation_id: None,
        }
    }

    /// Attach a conversation identifier.
    pub fn with_conversation_id(mut self, conversation_id: Option<String>) -> Self {
        self.conversation_id = conversation_id;
        self
    }
}
