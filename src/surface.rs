//! The chat surface the relay posts into.
//!
//! A surface is anything that can post, edit, and delete messages in a
//! channel: a chat platform, or the console for local use. Failures are
//! reported through the crate [`Error`] taxonomy so that
//! [`DeliveryPolicy`](crate::delivery::DeliveryPolicy) can classify them.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;

use crate::error::{Error, Result};

/// Identifies a message within a channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MessageRef {
    /// The channel the message lives in.
    pub channel: String,
    /// The message id, unique within the channel.
    pub id: String,
}

impl MessageRef {
    /// Creates a message reference.
    pub fn new(channel: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            id: id.into(),
        }
    }
}

/// A file posted alongside a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    /// The name shown for the file.
    pub filename: String,
    /// The file contents.
    pub content: Vec<u8>,
}

impl Attachment {
    /// Creates a UTF-8 text attachment.
    pub fn text(filename: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            content: content.into().into_bytes(),
        }
    }
}

/// An inbound message that may address the relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Trigger {
    /// The inbound message.
    pub message: MessageRef,
    /// Its text.
    pub content: String,
}

impl Trigger {
    /// Creates a trigger.
    pub fn new(message: MessageRef, content: impl Into<String>) -> Self {
        Self {
            message,
            content: content.into(),
        }
    }

    /// The channel the trigger was posted in; sessions are keyed by it.
    pub fn channel(&self) -> &str {
        &self.message.channel
    }
}

/// Message primitives of a chat platform.
#[async_trait]
pub trait ChatSurface: Send + Sync {
    /// Post a message with optional text and an optional file.
    async fn send(
        &self,
        channel: &str,
        content: Option<&str>,
        file: Option<&Attachment>,
    ) -> Result<MessageRef>;

    /// Replace the text of a message.
    async fn edit(&self, message: &MessageRef, content: &str) -> Result<()>;

    /// Delete a message.
    async fn delete(&self, message: &MessageRef) -> Result<()>;

    /// React to a message.
    async fn add_reaction(&self, _message: &MessageRef, _emoji: &str) -> Result<()> {
        Ok(())
    }

    /// Remove a reaction.
    async fn remove_reaction(&self, _message: &MessageRef, _emoji: &str) -> Result<()> {
        Ok(())
    }
}

/// A surface that prints to a terminal.
///
/// Attachments are written into `save_dir` when one is set and printed inline
/// otherwise. Edits print the new text; deletions are not visible.
pub struct ConsoleSurface {
    out: Mutex<Box<dyn Write + Send>>,
    save_dir: Option<PathBuf>,
    next_id: AtomicU64,
}

impl ConsoleSurface {
    /// A console surface on standard output.
    pub fn stdout() -> Self {
        Self::with_writer(Box::new(std::io::stdout()))
    }

    /// A console surface on an arbitrary writer.
    pub fn with_writer(out: Box<dyn Write + Send>) -> Self {
        Self {
            out: Mutex::new(out),
            save_dir: None,
            next_id: AtomicU64::new(1),
        }
    }

    /// Write attachments into `dir` instead of printing them.
    pub fn with_save_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.save_dir = dir;
        self
    }

    fn write_line(&self, line: &str) -> Result<()> {
        let mut out = self
            .out
            .lock()
            .map_err(|_| Error::unknown("console writer poisoned"))?;
        writeln!(out, "{line}")?;
        out.flush()?;
        Ok(())
    }
}

#[async_trait]
impl ChatSurface for ConsoleSurface {
    async fn send(
        &self,
        channel: &str,
        content: Option<&str>,
        file: Option<&Attachment>,
    ) -> Result<MessageRef> {
        if let Some(content) = content {
            self.write_line(content)?;
        }
        if let Some(file) = file {
            match &self.save_dir {
                Some(dir) => {
                    let path = dir.join(&file.filename);
                    std::fs::write(&path, &file.content).map_err(|e| {
                        Error::io(format!("failed to write {}", path.display()), e)
                    })?;
                    self.write_line(&format!("[saved {}]", path.display()))?;
                }
                None => {
                    self.write_line(&format!("[{}]", file.filename))?;
                    self.write_line(&String::from_utf8_lossy(&file.content))?;
                }
            }
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        Ok(MessageRef::new(channel, id.to_string()))
    }

    async fn edit(&self, _message: &MessageRef, content: &str) -> Result<()> {
        self.write_line(content)
    }

    async fn delete(&self, message: &MessageRef) -> Result<()> {
        tracing::trace!(channel = %message.channel, id = %message.id, "console delete");
        Ok(())
    }
}
