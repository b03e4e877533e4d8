//! Relays `/ai` triggers from a chat surface to per-channel sessions.

use std::sync::Arc;
use std::time::Duration;

use crate::chat::{
    ChatSession, DEFAULT_RESET_LINGER, RelayCommand, RelayConfig, SessionStore, SharedSession,
    SweepHandle, parse_command,
};
use crate::client::ChatClient;
use crate::delivery::DeliveryPolicy;
use crate::error::{Error, Result};
use crate::render::Renderer;
use crate::surface::{Attachment, ChatSurface, MessageRef, Trigger};

/// Posted while the model is answering.
pub const THINKING_TEXT: &str = "🤔 Thinking...";

/// Caption of the reply attachment.
pub const REPLY_CAPTION: &str = "✨ Here's your AI response:";

/// Shown when the model answered with nothing.
pub const NO_RESPONSE_TEXT: &str = "❌ No response from AI. Please try again.";

/// Shown when the user interrupted the reply.
pub const INTERRUPTED_TEXT: &str = "⚠️ Response interrupted.";

/// Confirmation for a reset of an existing conversation.
pub const RESET_TEXT: &str = "✅ Conversation history has been reset!";

/// Confirmation for a reset with nothing to clear.
pub const NOTHING_TO_RESET_TEXT: &str = "ℹ️ No active conversation to reset.";

const RULE_WIDTH: usize = 80;

/// Builds a fresh session for a channel.
pub type SessionFactory = Arc<dyn Fn() -> Result<ChatSession> + Send + Sync>;

/// What [`Relay::handle`] did with a trigger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayOutcome {
    /// The message did not address the relay.
    Ignored,
    /// The reply was posted.
    Replied(MessageRef),
    /// The model returned an empty reply.
    NoResponse,
    /// The reply was interrupted.
    Interrupted,
    /// The exchange with the chat API failed; the error was shown in the channel.
    Failed(String),
    /// The channel was reset; `existed` tells whether there was a session.
    Reset {
        /// True if a session was cleared.
        existed: bool,
    },
    /// The trigger was malformed; usage was shown in the channel.
    Invalid,
    /// Posting was refused for lack of permission and the trigger was removed.
    Suppressed,
}

/// Glue between a chat surface, the session store, and the delivery policy.
pub struct Relay<S> {
    surface: S,
    store: Arc<SessionStore>,
    factory: SessionFactory,
    policy: DeliveryPolicy,
    reset_linger: Duration,
}

impl<S: ChatSurface> Relay<S> {
    /// Creates a relay with the default delivery policy and reset linger.
    pub fn new(surface: S, store: Arc<SessionStore>, factory: SessionFactory) -> Self {
        Self {
            surface,
            store,
            factory,
            policy: DeliveryPolicy::new(),
            reset_linger: DEFAULT_RESET_LINGER,
        }
    }

    /// Creates a relay whose sessions talk to the configured endpoint with
    /// `token`.
    ///
    /// # Errors
    ///
    /// Fails if the configuration does not validate or a client cannot be
    /// built with it.
    pub fn from_config(config: &RelayConfig, token: impl Into<String>, surface: S) -> Result<Self> {
        config.validate()?;
        let token = token.into();
        let endpoint = config.endpoint.clone();
        let timeout = config.request_timeout;
        let max_turns = config.max_turns;
        ChatClient::with_options(token.clone(), Some(endpoint.clone()), Some(timeout))?;

        let factory: SessionFactory = Arc::new(move || {
            let client =
                ChatClient::with_options(token.clone(), Some(endpoint.clone()), Some(timeout))?;
            Ok(ChatSession::new(client).with_max_turns(max_turns))
        });
        let store = Arc::new(SessionStore::with_timeout(config.session_timeout));
        Ok(Self::new(surface, store, factory)
            .with_policy(DeliveryPolicy::new().with_max_attempts(config.max_attempts))
            .with_reset_linger(config.reset_linger))
    }

    /// Sets the delivery policy.
    pub fn with_policy(mut self, policy: DeliveryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Sets how long reset confirmations stay visible.
    pub fn with_reset_linger(mut self, linger: Duration) -> Self {
        self.reset_linger = linger;
        self
    }

    /// The session store.
    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    /// The chat surface.
    pub fn surface(&self) -> &S {
        &self.surface
    }

    /// The live session for `channel`, created if needed.
    pub fn session(&self, channel: &str) -> Result<SharedSession> {
        self.store.get_or_create(channel, || (self.factory)())
    }

    /// Starts the periodic expiry sweep of the store.
    pub fn spawn_sweeper(&self, interval: Duration) -> SweepHandle {
        self.store.spawn_sweeper(interval)
    }

    /// Acts on `trigger` if it addresses the relay.
    ///
    /// Reply deltas are streamed to `renderer`. Failures of the chat API are
    /// shown in the channel and reported as [`RelayOutcome::Failed`].
    ///
    /// # Errors
    ///
    /// Returns the last delivery error when posting to the surface fails
    /// after all attempts.
    pub async fn handle(
        &self,
        trigger: &Trigger,
        renderer: &mut dyn Renderer,
    ) -> Result<RelayOutcome> {
        let Some(command) = parse_command(&trigger.content) else {
            return Ok(RelayOutcome::Ignored);
        };
        match command {
            RelayCommand::Prompt(prompt) => self.handle_prompt(trigger, &prompt, renderer).await,
            RelayCommand::Reset => self.handle_reset(trigger).await,
            RelayCommand::Invalid(usage) => {
                match self.post(trigger.channel(), &format!("❌ {usage}"), None).await? {
                    Some(_) => Ok(RelayOutcome::Invalid),
                    None => Ok(self.suppress(trigger).await),
                }
            }
        }
    }

    async fn handle_prompt(
        &self,
        trigger: &Trigger,
        prompt: &str,
        renderer: &mut dyn Renderer,
    ) -> Result<RelayOutcome> {
        let channel = trigger.channel();
        tracing::info!(channel, prompt_chars = prompt.len(), "relaying prompt");

        let Some(thinking) = self.post(channel, THINKING_TEXT, None).await? else {
            return Ok(self.suppress(trigger).await);
        };

        let reply = match self.session(channel) {
            Ok(session) => {
                let mut session = session.lock().await;
                session.send(prompt, renderer).await
            }
            Err(err) => Err(err),
        };

        let text = match reply {
            Ok(text) => text,
            Err(err) => {
                let status = if err.is_abort() {
                    INTERRUPTED_TEXT.to_string()
                } else {
                    tracing::warn!(channel, error = %err, "chat request failed");
                    format!("❌ Error: {err}")
                };
                if !self.update(&thinking, &status).await? {
                    return Ok(self.suppress(trigger).await);
                }
                return Ok(RelayOutcome::from(err));
            }
        };

        if text.is_empty() {
            if !self.update(&thinking, NO_RESPONSE_TEXT).await? {
                return Ok(self.suppress(trigger).await);
            }
            return Ok(RelayOutcome::NoResponse);
        }

        let timestamp = time::OffsetDateTime::now_utc().unix_timestamp();
        let file = reply_attachment(prompt, &text, timestamp);
        let posted = self.post(channel, REPLY_CAPTION, Some(&file)).await?;
        self.discard(&thinking).await;
        match posted {
            Some(reply) => {
                tracing::info!(channel, reply_chars = text.len(), file = %file.filename, "posted reply");
                Ok(RelayOutcome::Replied(reply))
            }
            None => Ok(self.suppress(trigger).await),
        }
    }

    async fn handle_reset(&self, trigger: &Trigger) -> Result<RelayOutcome> {
        let channel = trigger.channel();
        self.discard(&trigger.message).await;

        let existed = self.store.reset(channel).await;
        let text = if existed {
            RESET_TEXT
        } else {
            NOTHING_TO_RESET_TEXT
        };
        if let Some(confirmation) = self.post(channel, text, None).await? {
            if !self.reset_linger.is_zero() {
                tokio::time::sleep(self.reset_linger).await;
            }
            self.discard(&confirmation).await;
        }
        Ok(RelayOutcome::Reset { existed })
    }

    /// Posts through the delivery policy. `None` means permission was denied.
    async fn post(
        &self,
        channel: &str,
        content: &str,
        file: Option<&Attachment>,
    ) -> Result<Option<MessageRef>> {
        self.policy
            .deliver(|_| self.surface.send(channel, Some(content), file))
            .await
    }

    /// Edits through the delivery policy. False means permission was denied.
    async fn update(&self, message: &MessageRef, content: &str) -> Result<bool> {
        let edited = self
            .policy
            .deliver(|_| self.surface.edit(message, content))
            .await?;
        Ok(edited.is_some())
    }

    /// Deletes a message, ignoring failure.
    async fn discard(&self, message: &MessageRef) {
        if let Err(err) = self.surface.delete(message).await {
            tracing::debug!(channel = %message.channel, id = %message.id, error = %err, "delete failed");
        }
    }

    async fn suppress(&self, trigger: &Trigger) -> RelayOutcome {
        tracing::info!(channel = trigger.channel(), "no permission to post, removing trigger");
        self.discard(&trigger.message).await;
        RelayOutcome::Suppressed
    }
}

/// The file a reply is posted as: the prompt, a rule, then the reply.
pub fn reply_attachment(prompt: &str, reply: &str, timestamp: i64) -> Attachment {
    let content = format!("Prompt: {prompt}\n{}\n\n{reply}", "=".repeat(RULE_WIDTH));
    Attachment::text(format!("ai_response_{timestamp}.txt"), content)
}

impl From<Error> for RelayOutcome {
    fn from(err: Error) -> Self {
        if err.is_abort() {
            RelayOutcome::Interrupted
        } else {
            RelayOutcome::Failed(err.to_string())
        }
    }
}
