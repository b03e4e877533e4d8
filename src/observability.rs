use biometrics::{Collector, Counter, Moments};

pub(crate) static CLIENT_REQUESTS: Counter = Counter::new("chatrelay.client.requests");
pub(crate) static CLIENT_REQUEST_ERRORS: Counter =
    Counter::new("chatrelay.client.request_errors");
pub(crate) static CLIENT_REQUEST_DURATION: Moments =
    Moments::new("chatrelay.client.request_duration_seconds");

pub(crate) static STREAM_DELTAS: Counter = Counter::new("chatrelay.stream.deltas");
pub(crate) static STREAM_MALFORMED: Counter = Counter::new("chatrelay.stream.malformed");
pub(crate) static STREAM_BYTES: Counter = Counter::new("chatrelay.stream.bytes");
pub(crate) static STREAM_DURATION: Moments = Moments::new("chatrelay.stream.duration_seconds");

pub(crate) static SESSIONS_CREATED: Counter = Counter::new("chatrelay.sessions.created");
pub(crate) static SESSIONS_EXPIRED: Counter = Counter::new("chatrelay.sessions.expired");
pub(crate) static SESSIONS_RESET: Counter = Counter::new("chatrelay.sessions.reset");

pub(crate) static DELIVERY_ATTEMPTS: Counter = Counter::new("chatrelay.delivery.attempts");
pub(crate) static DELIVERY_RETRIES: Counter = Counter::new("chatrelay.delivery.retries");
pub(crate) static DELIVERY_PERMISSION_DENIED: Counter =
    Counter::new("chatrelay.delivery.permission_denied");
pub(crate) static DELIVERY_BACKOFF: Moments =
    Moments::new("chatrelay.delivery.backoff_seconds");

/// Register this crate's biometrics with the provided collector.
pub fn register_biometrics(collector: Collector) {
    collector.register_counter(&CLIENT_REQUESTS);
    collector.register_counter(&CLIENT_REQUEST_ERRORS);
    collector.register_moments(&CLIENT_REQUEST_DURATION);

    collector.register_counter(&STREAM_DELTAS);
    collector.register_counter(&STREAM_MALFORMED);
    collector.register_counter(&STREAM_BYTES);
    collector.register_moments(&STREAM_DURATION);

    collector.register_counter(&SESSIONS_CREATED);
    collector.register_counter(&SESSIONS_EXPIRED);
    collector.register_counter(&SESSIONS_RESET);

    collector.register_counter(&DELIVERY_ATTEMPTS);
    collector.register_counter(&DELIVERY_RETRIES);
    collector.register_counter(&DELIVERY_PERMISSION_DENIED);
    collector.register_moments(&DELIVERY_BACKOFF);
}
