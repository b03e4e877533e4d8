//! Conversation sessions and the pieces that host them.
//!
//! # Architecture
//!
//! - [`config`]: CLI argument parsing, settings file, and credential lookup
//! - [`session`]: one conversation and its exchange with the chat API
//! - [`store`]: per-channel sessions with inactivity expiry
//! - [`commands`]: `/ai` trigger and console command parsing

mod commands;
mod config;
mod session;
pub(crate) mod store;

pub use crate::render::{CallbackRenderer, NullRenderer, PlainTextRenderer, Renderer};
pub use commands::{
    ConsoleCommand, RelayCommand, TRIGGER, help_text, parse_command, parse_console_command,
};
pub use config::{
    DEFAULT_RESET_LINGER, DEFAULT_TOKEN_FILE, LEGACY_TOKEN_FILE, RelayArgs, RelayConfig,
    TOKEN_ENV_VAR, load_token,
};
pub use session::{ChatSession, SessionStats};
pub use store::{
    DEFAULT_SESSION_TIMEOUT, DEFAULT_SWEEP_INTERVAL, SessionStore, SharedSession, SweepHandle,
};
