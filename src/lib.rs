//! Relay prompts to a streaming chat API and deliver the replies into a chat
//! surface, keeping a short-lived conversation per channel.

// Public modules
pub mod chat;
pub mod client;
pub mod delivery;
pub mod error;
pub mod logging;
pub mod relay;
pub mod render;
pub mod sse;
pub mod surface;
pub mod types;

mod observability;

// Re-exports
pub use chat::{ChatSession, SessionStore, SharedSession};
pub use client::ChatClient;
pub use delivery::{DeliveryClass, DeliveryPolicy, classify_delivery_error};
pub use error::{Error, Result};
pub use observability::register_biometrics;
pub use relay::{Relay, RelayOutcome};
pub use render::{CallbackRenderer, NullRenderer, PlainTextRenderer, Renderer};
pub use sse::{StreamEvent, decode_line, decode_stream, process_lines};
pub use surface::{Attachment, ChatSurface, ConsoleSurface, MessageRef, Trigger};
pub use types::*;
