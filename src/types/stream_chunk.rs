use serde::{Deserialize, Serialize};

/// One JSON payload carried by a `data:` line of the response stream.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamChunk {
    /// The choices in this chunk; only the first is consulted.
    #[serde(default)]
    pub choices: Vec<ChunkChoice>,
}

/// A single choice within a [`StreamChunk`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkChoice {
    /// The incremental update.
    #[serde(default)]
    pub delta: ChunkDelta,
}

/// The incremental update within a [`ChunkChoice`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkDelta {
    /// Text to append to the reply, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

impl StreamChunk {
    /// The text carried by the first choice, if any.
    pub fn content(&self) -> Option<&str> {
        self.choices
            .first()
            .and_then(|choice| choice.delta.content.as_deref())
    }
}
