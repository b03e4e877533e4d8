use serde::{Deserialize, Serialize};

use crate::types::Role;

/// One role-tagged message in a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    /// Who authored the turn.
    pub role: Role,

    /// The text of the turn.
    pub content: String,
}

impl Turn {
    /// Create a new `Turn` with the given role and content.
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    /// Create a new user `Turn`.
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    /// Create a new assistant `Turn`.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, to_value};

    #[test]
    fn turn_serialization() {
        let turn = Turn::user("hello");
        assert_eq!(
            to_value(&turn).unwrap(),
            json!({
                "role": "user",
                "content": "hello"
            })
        );
    }

    #[test]
    fn turn_deserialization() {
        let turn: Turn = serde_json::from_value(json!({
            "role": "assistant",
            "content": "hi there"
        }))
        .unwrap();
        assert_eq!(turn, Turn::assistant("hi there"));
    }
}
