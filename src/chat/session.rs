//! Core chat session management.
//!
//! This module provides the `ChatSession` struct which owns the turns of one
//! conversation and performs the streaming exchange with the chat endpoint.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{from_reader, to_writer_pretty};

use crate::client::ChatClient;
use crate::error::{Error, Result};
use crate::render::Renderer;
use crate::sse::decode_sse;
use crate::types::{ChatRequest, Role, Turn};

/// A conversation with the chat endpoint.
///
/// The endpoint is stateless, so every [`send`](ChatSession::send) replays the
/// full turn history. The payload therefore grows with the conversation unless
/// a cap is configured with [`with_max_turns`](ChatSession::with_max_turns).
#[derive(Debug, Clone)]
pub struct ChatSession {
    client: ChatClient,
    turns: Vec<Turn>,
    response_history: Vec<String>,
    conversation_id: Option<String>,
    max_turns: Option<usize>,
    request_count: u64,
    failed_request_count: u64,
}

/// Aggregated stats for a chat session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStats {
    /// The number of turns in the conversation.
    pub message_count: usize,
    /// The number of completed assistant replies.
    pub response_count: usize,
    /// Total number of requests made.
    pub total_requests: u64,
    /// Requests that ended in an error.
    pub failed_requests: u64,
    /// The server-side conversation identifier, if any.
    pub conversation_id: Option<String>,
    /// The outbound history cap, if any.
    pub max_turns: Option<usize>,
}

impl ChatSession {
    /// Creates a new, empty session that talks through `client`.
    pub fn new(client: ChatClient) -> Self {
        Self {
            client,
            turns: Vec::new(),
            response_history: Vec::new(),
            conversation_id: None,
            max_turns: None,
            request_count: 0,
            failed_request_count: 0,
        }
    }

    /// Sets the conversation identifier sent with every request.
    pub fn with_conversation_id(mut self, conversation_id: Option<String>) -> Self {
        self.conversation_id = conversation_id;
        self
    }

    /// Caps how many of the most recent turns are replayed per request.
    ///
    /// `None` (the default) replays everything. The stored history is never
    /// truncated, only the outbound payload.
    pub fn with_max_turns(mut self, max_turns: Option<usize>) -> Self {
        self.max_turns = max_turns.filter(|n| *n > 0);
        self
    }

    /// Sends a user prompt and streams the reply.
    ///
    /// This method:
    /// 1. Appends the prompt to the history as a user turn
    /// 2. Posts the whole history to the endpoint
    /// 3. Hands each streamed delta to `renderer`
    /// 4. Appends a non-empty reply as an assistant turn
    ///
    /// An empty reply is returned as an empty string and leaves the history
    /// ending in the unanswered user turn. On error the user turn also stays;
    /// no assistant turn is ever appended for a failed exchange.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Timeout`], [`Error::Connection`], or [`Error::Api`]
    /// for a failed exchange, [`Error::Streaming`] if the body breaks
    /// mid-read, and [`Error::Abort`] if the renderer requests an interrupt.
    pub async fn send(&mut self, prompt: &str, renderer: &mut dyn Renderer) -> Result<String> {
        self.turns.push(Turn::user(prompt));
        self.request_count += 1;

        let request = ChatRequest::new(self.outbound_turns().to_vec())
            .with_conversation_id(self.conversation_id.clone());

        let text = match self.exchange(&request, renderer).await {
            Ok(text) => text,
            Err(err) => {
                self.failed_request_count += 1;
                return Err(err);
            }
        };

        if !text.is_empty() {
            self.turns.push(Turn::assistant(text.clone()));
            self.response_history.insert(0, text.clone());
            renderer.finish_response();
        }
        Ok(text)
    }

    async fn exchange(&self, request: &ChatRequest, renderer: &mut dyn Renderer) -> Result<String> {
        let body = self.client.stream_chat(request).await?;
        decode_sse(body, renderer).await
    }

    fn outbound_turns(&self) -> &[Turn] {
        let Some(max_turns) = self.max_turns else {
            return &self.turns;
        };
        let mut start = self.turns.len().saturating_sub(max_turns);
        // Never open the window on an assistant turn.
        while start < self.turns.len() && self.turns[start].role == Role::Assistant {
            start += 1;
        }
        &self.turns[start..]
    }

    /// Clears the conversation history and the response history.
    pub fn reset(&mut self) {
        self.turns.clear();
        self.response_history.clear();
    }

    /// Returns a copy of the conversation turns.
    pub fn history(&self) -> Vec<Turn> {
        self.turns.clone()
    }

    /// Replaces the conversation turns with a copy of `turns`.
    pub fn set_history(&mut self, turns: &[Turn]) {
        self.turns = turns.to_vec();
    }

    /// Returns a copy of the completed replies, most recent first.
    pub fn response_history(&self) -> Vec<String> {
        self.response_history.clone()
    }

    /// The most recently completed reply.
    pub fn last_response(&self) -> Option<&str> {
        self.response_history.first().map(String::as_str)
    }

    /// Returns the number of turns in the conversation.
    pub fn message_count(&self) -> usize {
        self.turns.len()
    }

    /// The bearer token this session authenticates with.
    pub fn auth_token(&self) -> &str {
        self.client.auth_token()
    }

    /// Returns the current session statistics snapshot.
    pub fn stats(&self) -> SessionStats {
        SessionStats {
            message_count: self.turns.len(),
            response_count: self.response_history.len(),
            total_requests: self.request_count,
            failed_requests: self.failed_request_count,
            conversation_id: self.conversation_id.clone(),
            max_turns: self.max_turns,
        }
    }

    /// Saves the transcript to the specified path.
    pub fn save_transcript_to<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let transcript = TranscriptFile::new(&self.turns);
        let file = File::create(path.as_ref())
            .map_err(|err| Error::io("failed to create transcript file", err))?;
        let writer = BufWriter::new(file);
        to_writer_pretty(writer, &transcript).map_err(|err| {
            Error::serialization("failed to serialize transcript", Some(Box::new(err)))
        })
    }

    /// Loads a transcript from disk, replacing the current conversation history.
    ///
    /// The response history is rebuilt from the transcript's assistant turns.
    pub fn load_transcript_from<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let file = File::open(path.as_ref())
            .map_err(|err| Error::io("failed to open transcript file", err))?;
        let reader = BufReader::new(file);
        let transcript: TranscriptFile = from_reader(reader).map_err(|err| {
            Error::serialization("failed to parse transcript", Some(Box::new(err)))
        })?;
        self.turns = transcript.turns;
        self.response_history = self
            .turns
            .iter()
            .rev()
            .filter(|turn| turn.role == Role::Assistant)
            .map(|turn| turn.content.clone())
            .collect();
        Ok(())
    }
}

#[derive(Serialize, Deserialize)]
struct TranscriptFile {
    version: u8,
    turns: Vec<Turn>,
}

impl TranscriptFile {
    fn new(turns: &[Turn]) -> Self {
        Self {
            version: 1,
            turns: turns.to_vec(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::{CallbackRenderer, NullRenderer};
    use std::time::Duration;
    use wiremock::matchers::{body_json, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn sse_body(deltas: &[&str]) -> String {
        let mut body = String::new();
        for delta in deltas {
            body.push_str(&format!(
                "data: {}\n\n",
                serde_json::json!({"choices": [{"delta": {"content": delta}}]})
            ));
        }
        body.push_str("data: [DONE]\n\n");
        body
    }

    fn session_for(server: &MockServer) -> ChatSession {
        let client = ChatClient::with_options("token", Some(server.uri()), None).unwrap();
        ChatSession::new(client)
    }

    #[test]
    fn new_session_empty() {
        let session = ChatSession::new(ChatClient::new("token").unwrap());
        assert_eq!(session.message_count(), 0);
        assert!(session.response_history().is_empty());
        assert_eq!(session.auth_token(), "token");
    }

    #[tokio::test]
    async fn send_appends_user_and_assistant_turns() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string(sse_body(&["Hi", " there"])))
            .mount(&server)
            .await;

        let mut session = session_for(&server);
        let mut deltas = Vec::new();
        let mut renderer = CallbackRenderer::new(|d: &str| deltas.push(d.to_string()));
        let reply = session.send("hello", &mut renderer).await.unwrap();
        drop(renderer);

        assert_eq!(reply, "Hi there");
        assert_eq!(deltas, vec!["Hi", " there"]);
        assert_eq!(
            session.history(),
            vec![Turn::user("hello"), Turn::assistant("Hi there")]
        );
        assert_eq!(session.response_history(), vec!["Hi there".to_string()]);
    }

    #[tokio::test]
    async fn empty_stream_leaves_only_user_turn() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string(sse_body(&[])))
            .mount(&server)
            .await;

        let mut session = session_for(&server);
        let reply = session.send("hello", &mut NullRenderer).await.unwrap();

        assert_eq!(reply, "");
        assert_eq!(session.history(), vec![Turn::user("hello")]);
        assert!(session.response_history().is_empty());
    }

    #[tokio::test]
    async fn full_history_is_replayed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_json(serde_json::json!({
                "messages": [
                    {"role": "user", "content": "one"},
                    {"role": "assistant", "content": "first"},
                    {"role": "user", "content": "two"}
                ]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_string(sse_body(&["second"])))
            .expect(1)
            .mount(&server)
            .await;

        let mut session = session_for(&server);
        session.set_history(&[Turn::user("one"), Turn::assistant("first")]);
        let reply = session.send("two", &mut NullRenderer).await.unwrap();
        assert_eq!(reply, "second");
        assert_eq!(session.message_count(), 4);
    }

    #[tokio::test]
    async fn conversation_id_is_sent() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_json(serde_json::json!({
                "messages": [{"role": "user", "content": "hi"}],
                "conversationId": "abc"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_string(sse_body(&["ok"])))
            .expect(1)
            .mount(&server)
            .await;

        let mut session = session_for(&server).with_conversation_id(Some("abc".to_string()));
        assert_eq!(session.send("hi", &mut NullRenderer).await.unwrap(), "ok");
    }

    #[tokio::test]
    async fn max_turns_limits_payload_not_history() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_json(serde_json::json!({
                "messages": [
                    {"role": "user", "content": "b"},
                    {"role": "assistant", "content": "B"},
                    {"role": "user", "content": "c"}
                ]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_string(sse_body(&["C"])))
            .expect(1)
            .mount(&server)
            .await;

        let mut session = session_for(&server).with_max_turns(Some(4));
        session.set_history(&[
            Turn::user("a"),
            Turn::assistant("A"),
            Turn::user("b"),
            Turn::assistant("B"),
        ]);
        session.send("c", &mut NullRenderer).await.unwrap();
        assert_eq!(session.message_count(), 6);
        assert_eq!(session.stats().max_turns, Some(4));
    }

    #[tokio::test]
    async fn api_error_keeps_user_turn_only() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let mut session = session_for(&server);
        let err = session.send("hello", &mut NullRenderer).await.unwrap_err();

        assert!(matches!(err, Error::Api { status_code: 500, ref message } if message == "boom"));
        assert_eq!(session.history(), vec![Turn::user("hello")]);
        assert_eq!(session.stats().failed_requests, 1);
    }

    #[tokio::test]
    async fn timeout_keeps_user_turn_only() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(sse_body(&["late"]))
                    .set_delay(Duration::from_millis(500)),
            )
            .mount(&server)
            .await;

        let client =
            ChatClient::with_options("token", Some(server.uri()), Some(Duration::from_millis(50)))
                .unwrap();
        let mut session = ChatSession::new(client);
        let err = session.send("hello", &mut NullRenderer).await.unwrap_err();

        assert!(err.is_timeout());
        assert_eq!(session.history(), vec![Turn::user("hello")]);
    }

    #[tokio::test]
    async fn response_history_is_most_recent_first() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string(sse_body(&["first"])))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string(sse_body(&["second"])))
            .mount(&server)
            .await;

        let mut session = session_for(&server);
        session.send("a", &mut NullRenderer).await.unwrap();
        session.send("b", &mut NullRenderer).await.unwrap();

        assert_eq!(
            session.response_history(),
            vec!["second".to_string(), "first".to_string()]
        );
        assert_eq!(session.last_response(), Some("second"));
        assert_eq!(session.stats().total_requests, 2);
    }

    #[test]
    fn reset_clears_everything() {
        let mut session = ChatSession::new(ChatClient::new("token").unwrap());
        session.set_history(&[Turn::user("a"), Turn::assistant("b")]);
        session.response_history.push("b".to_string());

        session.reset();
        assert_eq!(session.message_count(), 0);
        assert!(session.response_history().is_empty());
    }

    #[test]
    fn history_is_a_copy() {
        let mut session = ChatSession::new(ChatClient::new("token").unwrap());
        let mut turns = vec![Turn::user("a")];
        session.set_history(&turns);
        turns.push(Turn::assistant("not stored"));

        let mut copy = session.history();
        copy.clear();
        assert_eq!(session.history(), vec![Turn::user("a")]);
    }

    #[test]
    fn transcript_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("transcript.json");

        let mut session = ChatSession::new(ChatClient::new("token").unwrap());
        session.set_history(&[Turn::user("q"), Turn::assistant("a")]);
        session.save_transcript_to(&path).unwrap();

        let mut restored = ChatSession::new(ChatClient::new("token").unwrap());
        restored.load_transcript_from(&path).unwrap();
        assert_eq!(restored.history(), session.history());
    }

    #[test]
    fn loading_transcript_replaces_responses() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("transcript.json");

        let mut saved = ChatSession::new(ChatClient::new("token").unwrap());
        saved.set_history(&[
            Turn::user("q1"),
            Turn::assistant("a1"),
            Turn::user("q2"),
            Turn::assistant("a2"),
        ]);
        saved.save_transcript_to(&path).unwrap();

        let mut session = ChatSession::new(ChatClient::new("token").unwrap());
        session.response_history.push("stale".to_string());
        session.load_transcript_from(&path).unwrap();

        assert_eq!(session.last_response(), Some("a2"));
        assert_eq!(
            session.response_history(),
            vec!["a2".to_string(), "a1".to_string()]
        );
    }

    #[test]
    fn load_missing_transcript_fails() {
        let mut session = ChatSession::new(ChatClient::new("token").unwrap());
        let err = session
            .load_transcript_from("/nonexistent/chatrelay/transcript.json")
            .unwrap_err();
        assert!(matches!(err, Error::Io { .. }));
    }
}
