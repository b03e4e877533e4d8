// Public modules
pub mod chat_request;
pub mod role;
pub mod stream_chunk;
pub mod turn;

// Re-exports
pub use chat_request::ChatRequest;
pub use role::Role;
pub use stream_chunk::{ChunkChoice, ChunkDelta, StreamChunk};
pub use turn::Turn;
