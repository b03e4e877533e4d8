use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use wiremock::matchers::{body_json, method};
use wiremock::{Mock, MockServer, ResponseTemplate};

use chatrelay::chat::RelayConfig;
use chatrelay::relay::{INTERRUPTED_TEXT, NO_RESPONSE_TEXT, RESET_TEXT, THINKING_TEXT};
use chatrelay::{
    Attachment, CallbackRenderer, ChatSurface, Error, MessageRef, NullRenderer, Relay,
    RelayOutcome, Result, Role, Trigger,
};

#[derive(Debug, Clone, PartialEq)]
enum Event {
    Sent {
        id: String,
        content: Option<String>,
        file: Option<Attachment>,
    },
    Edited {
        id: String,
        content: String,
    },
    Deleted {
        id: String,
    },
}

/// Records every call; sends fail with queued errors first.
#[derive(Default)]
struct RecordingSurface {
    events: Mutex<Vec<Event>>,
    send_failures: Mutex<VecDeque<Error>>,
    next_id: Mutex<u64>,
}

impl RecordingSurface {
    fn failing_with(errors: Vec<Error>) -> Self {
        Self {
            send_failures: Mutex::new(errors.into()),
            ..Self::default()
        }
    }

    fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatSurface for RecordingSurface {
    async fn send(
        &self,
        channel: &str,
        content: Option<&str>,
        file: Option<&Attachment>,
    ) -> Result<MessageRef> {
        if let Some(err) = self.send_failures.lock().unwrap().pop_front() {
            return Err(err);
        }
        let id = {
            let mut next = self.next_id.lock().unwrap();
            *next += 1;
            format!("bot-{next}")
        };
        self.events.lock().unwrap().push(Event::Sent {
            id: id.clone(),
            content: content.map(str::to_string),
            file: file.cloned(),
        });
        Ok(MessageRef::new(channel, id))
    }

    async fn edit(&self, message: &MessageRef, content: &str) -> Result<()> {
        self.events.lock().unwrap().push(Event::Edited {
            id: message.id.clone(),
            content: content.to_string(),
        });
        Ok(())
    }

    async fn delete(&self, message: &MessageRef) -> Result<()> {
        self.events.lock().unwrap().push(Event::Deleted {
            id: message.id.clone(),
        });
        Ok(())
    }
}

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

fn relay_for(server: &MockServer, surface: RecordingSurface) -> Relay<RecordingSurface> {
    let config = RelayConfig::new()
        .with_endpoint(server.uri())
        .with_reset_linger(Duration::ZERO);
    Relay::from_config(&config, "test-token", surface).unwrap()
}

fn trigger(channel: &str, id: &str, content: &str) -> Trigger {
    Trigger::new(MessageRef::new(channel, id), content)
}

#[tokio::test]
async fn prompt_is_answered_with_attachment() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_json(serde_json::json!({
            "messages": [{"role": "user", "content": "say hi"}]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_string(sse_body(&["Hi", " there"])))
        .expect(1)
        .mount(&server)
        .await;

    let relay = relay_for(&server, RecordingSurface::default());
    let mut streamed = String::new();
    let mut renderer = CallbackRenderer::new(|d: &str| streamed.push_str(d));

    let outcome = relay
        .handle(&trigger("c1", "u1", "/ai say hi"), &mut renderer)
        .await
        .unwrap();
    drop(renderer);

    assert_eq!(outcome, RelayOutcome::Replied(MessageRef::new("c1", "bot-2")));
    assert_eq!(streamed, "Hi there");

    let events = relay.surface().events();
    assert_eq!(events.len(), 3);
    assert_eq!(
        events[0],
        Event::Sent {
            id: "bot-1".to_string(),
            content: Some(THINKING_TEXT.to_string()),
            file: None,
        }
    );
    match &events[1] {
        Event::Sent {
            content: Some(caption),
            file: Some(file),
            ..
        } => {
            assert!(caption.contains("AI response"));
            assert!(file.filename.starts_with("ai_response_"));
            assert!(file.filename.ends_with(".txt"));
            let text = String::from_utf8(file.content.clone()).unwrap();
            assert!(text.starts_with("Prompt: say hi\n"));
            assert!(text.ends_with("\n\nHi there"));
        }
        other => panic!("unexpected event: {other:?}"),
    }
    assert_eq!(
        events[2],
        Event::Deleted {
            id: "bot-1".to_string()
        }
    );

    let session = relay.session("c1").unwrap();
    let history = session.lock().await.history();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].role, Role::User);
    assert_eq!(history[1].content, "Hi there");
}

#[tokio::test]
async fn follow_up_replays_history() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_json(serde_json::json!({
            "messages": [
                {"role": "user", "content": "first"},
                {"role": "assistant", "content": "one"},
                {"role": "user", "content": "second"}
            ]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_string(sse_body(&["two"])))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_string(sse_body(&["one"])))
        .expect(1)
        .mount(&server)
        .await;

    let relay = relay_for(&server, RecordingSurface::default());
    relay
        .handle(&trigger("c1", "u1", "/ai first"), &mut NullRenderer)
        .await
        .unwrap();
    relay
        .handle(&trigger("c1", "u2", "/ai second"), &mut NullRenderer)
        .await
        .unwrap();

    let session = relay.session("c1").unwrap();
    let session = session.lock().await;
    assert_eq!(session.message_count(), 4);
    assert_eq!(session.response_history(), vec!["two", "one"]);
}

#[tokio::test]
async fn channels_have_separate_sessions() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_string(sse_body(&["ok"])))
        .mount(&server)
        .await;

    let relay = relay_for(&server, RecordingSurface::default());
    relay
        .handle(&trigger("a", "1", "/ai hello a"), &mut NullRenderer)
        .await
        .unwrap();
    relay
        .handle(&trigger("b", "2", "/ai hello b"), &mut NullRenderer)
        .await
        .unwrap();

    assert_eq!(relay.store().len(), 2);
    let a = relay.session("a").unwrap();
    assert_eq!(a.lock().await.history()[0].content, "hello a");
}

#[tokio::test]
async fn empty_reply_edits_indicator() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_string("data: [DONE]\n\n"))
        .mount(&server)
        .await;

    let relay = relay_for(&server, RecordingSurface::default());
    let outcome = relay
        .handle(&trigger("c1", "u1", "/ai anyone?"), &mut NullRenderer)
        .await
        .unwrap();

    assert_eq!(outcome, RelayOutcome::NoResponse);
    assert_eq!(
        relay.surface().events().last(),
        Some(&Event::Edited {
            id: "bot-1".to_string(),
            content: NO_RESPONSE_TEXT.to_string(),
        })
    );
    let session = relay.session("c1").unwrap();
    assert_eq!(session.lock().await.message_count(), 1);
}

#[tokio::test]
async fn api_error_is_shown_in_channel() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&server)
        .await;

    let relay = relay_for(&server, RecordingSurface::default());
    let outcome = relay
        .handle(&trigger("c1", "u1", "/ai fail please"), &mut NullRenderer)
        .await
        .unwrap();

    assert!(matches!(outcome, RelayOutcome::Failed(ref msg) if msg.contains("500")));
    assert_eq!(
        relay.surface().events().last(),
        Some(&Event::Edited {
            id: "bot-1".to_string(),
            content: "❌ Error: HTTP 500: boom".to_string(),
        })
    );
}

#[tokio::test]
async fn interrupted_reply_is_reported() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_string(sse_body(&["a", "b", "c"])))
        .mount(&server)
        .await;

    let relay = relay_for(&server, RecordingSurface::default());
    let flag = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
    let trip = flag.clone();
    let mut renderer = CallbackRenderer::new(move |_: &str| {
        trip.store(true, std::sync::atomic::Ordering::Relaxed);
    })
    .with_interrupt(flag);

    let outcome = relay
        .handle(&trigger("c1", "u1", "/ai long answer"), &mut renderer)
        .await
        .unwrap();

    assert_eq!(outcome, RelayOutcome::Interrupted);
    assert_eq!(
        relay.surface().events().last(),
        Some(&Event::Edited {
            id: "bot-1".to_string(),
            content: INTERRUPTED_TEXT.to_string(),
        })
    );
    let session = relay.session("c1").unwrap();
    assert_eq!(session.lock().await.message_count(), 1);
}

#[tokio::test]
async fn reset_clears_and_confirms() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_string(sse_body(&["hi"])))
        .mount(&server)
        .await;

    let relay = relay_for(&server, RecordingSurface::default());
    relay
        .handle(&trigger("c1", "u1", "/ai hello"), &mut NullRenderer)
        .await
        .unwrap();
    let before = relay.surface().events().len();

    let outcome = relay
        .handle(&trigger("c1", "u2", "/ai RESET"), &mut NullRenderer)
        .await
        .unwrap();
    assert_eq!(outcome, RelayOutcome::Reset { existed: true });

    let events = relay.surface().events();
    assert_eq!(
        events[before..],
        [
            Event::Deleted {
                id: "u2".to_string()
            },
            Event::Sent {
                id: "bot-3".to_string(),
                content: Some(RESET_TEXT.to_string()),
                file: None,
            },
            Event::Deleted {
                id: "bot-3".to_string()
            },
        ]
    );
    let session = relay.session("c1").unwrap();
    assert_eq!(session.lock().await.message_count(), 0);
}

#[tokio::test]
async fn reset_without_session() {
    let server = MockServer::start().await;
    let relay = relay_for(&server, RecordingSurface::default());

    let outcome = relay
        .handle(&trigger("c1", "u1", "/ai reset"), &mut NullRenderer)
        .await
        .unwrap();

    assert_eq!(outcome, RelayOutcome::Reset { existed: false });
    assert!(relay.store().is_empty());
}

#[tokio::test]
async fn permission_denied_removes_trigger() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_string(sse_body(&["never"])))
        .expect(0)
        .mount(&server)
        .await;

    let surface = RecordingSurface::failing_with(vec![Error::platform(
        403,
        50013,
        "Missing Permissions",
    )]);
    let relay = relay_for(&server, surface);
    let outcome = relay
        .handle(&trigger("c1", "u1", "/ai hello"), &mut NullRenderer)
        .await
        .unwrap();

    assert_eq!(outcome, RelayOutcome::Suppressed);
    assert_eq!(
        relay.surface().events(),
        vec![Event::Deleted {
            id: "u1".to_string()
        }]
    );
}

#[tokio::test]
async fn rate_limited_send_is_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_string(sse_body(&["ok"])))
        .mount(&server)
        .await;

    let surface = RecordingSurface::failing_with(vec![Error::rate_limit(
        "You are being rate limited.",
        Some(0.01),
    )]);
    let relay = relay_for(&server, surface);
    let outcome = relay
        .handle(&trigger("c1", "u1", "/ai hello"), &mut NullRenderer)
        .await
        .unwrap();

    assert!(matches!(outcome, RelayOutcome::Replied(_)));
}

#[tokio::test]
async fn exhausted_delivery_propagates() {
    let server = MockServer::start().await;
    let surface = RecordingSurface::failing_with(vec![
        Error::api(502, "bad gateway"),
        Error::api(502, "bad gateway"),
        Error::api(503, "unavailable"),
    ]);
    let relay = relay_for(&server, surface);

    let err = relay
        .handle(&trigger("c1", "u1", "/ai hello"), &mut NullRenderer)
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), Some(503));
}

#[tokio::test]
async fn non_commands_and_bare_trigger() {
    let server = MockServer::start().await;
    let relay = relay_for(&server, RecordingSurface::default());

    let outcome = relay
        .handle(&trigger("c1", "u1", "just chatting"), &mut NullRenderer)
        .await
        .unwrap();
    assert_eq!(outcome, RelayOutcome::Ignored);
    assert!(relay.surface().events().is_empty());

    let outcome = relay
        .handle(&trigger("c1", "u2", "/ai"), &mut NullRenderer)
        .await
        .unwrap();
    assert_eq!(outcome, RelayOutcome::Invalid);
    assert!(matches!(
        &relay.surface().events()[0],
        Event::Sent { content: Some(text), .. } if text.contains("provide a prompt")
    ));
}

#[tokio::test]
async fn concurrent_prompts_on_one_channel_are_serialized() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_json(serde_json::json!({
            "messages": [{"role": "user", "content": "first"}]
        })))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(sse_body(&["one"]))
                .set_delay(Duration::from_millis(200)),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(body_json(serde_json::json!({
            "messages": [
                {"role": "user", "content": "first"},
                {"role": "assistant", "content": "one"},
                {"role": "user", "content": "second"}
            ]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_string(sse_body(&["two"])))
        .expect(1)
        .mount(&server)
        .await;

    let relay = relay_for(&server, RecordingSurface::default());
    let first = trigger("c1", "u1", "/ai first");
    let second = trigger("c1", "u2", "/ai second");
    let mut first_renderer = NullRenderer;
    let mut second_renderer = NullRenderer;

    let (a, b) = tokio::join!(
        relay.handle(&first, &mut first_renderer),
        relay.handle(&second, &mut second_renderer),
    );
    assert!(matches!(a.unwrap(), RelayOutcome::Replied(_)));
    assert!(matches!(b.unwrap(), RelayOutcome::Replied(_)));

    let session = relay.session("c1").unwrap();
    let history = session.lock().await.history();
    let roles: Vec<Role> = history.iter().map(|turn| turn.role).collect();
    assert_eq!(
        roles,
        vec![Role::User, Role::Assistant, Role::User, Role::Assistant]
    );
    let contents: Vec<&str> = history.iter().map(|turn| turn.content.as_str()).collect();
    assert_eq!(contents, vec!["first", "one", "second", "two"]);
}
