//! Per-key session storage with inactivity expiry.
//!
//! A [`SessionStore`] maps a key (typically a channel id) to at most one live
//! [`ChatSession`]. Records expire after a period without use; expiry is
//! checked lazily on lookup and eagerly by a periodic sweep.

use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::chat::ChatSession;
use crate::error::Result;
use crate::observability::{SESSIONS_CREATED, SESSIONS_EXPIRED, SESSIONS_RESET};

/// Inactivity period after which a session is discarded.
pub const DEFAULT_SESSION_TIMEOUT: Duration = Duration::from_secs(20 * 60);

/// How often the background sweep runs.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// A session handle shared between the store and its users.
///
/// Holding the lock serializes sends against the session, which keeps the
/// turn history in request order.
pub type SharedSession = Arc<Mutex<ChatSession>>;

struct SessionRecord {
    session: SharedSession,
    last_activity: Instant,
}

impl SessionRecord {
    fn new(session: ChatSession, now: Instant) -> Self {
        Self {
            session: Arc::new(Mutex::new(session)),
            last_activity: now,
        }
    }

    fn is_expired(&self, now: Instant, timeout: Duration) -> bool {
        now.saturating_duration_since(self.last_activity) > timeout
    }

    fn in_use(&self) -> bool {
        self.session.try_lock().is_err()
    }
}

/// Maps keys to chat sessions.
///
/// Every read-modify-write against one key (lookup and refresh, creation,
/// reset, expiry) happens under that key's map shard lock, so a key never has
/// two live records. Different keys proceed independently.
pub struct SessionStore {
    timeout: Duration,
    records: DashMap<String, SessionRecord>,
}

impl SessionStore {
    /// Creates a store with the default 20 minute timeout.
    pub fn new() -> Self {
        Self::with_timeout(DEFAULT_SESSION_TIMEOUT)
    }

    /// Creates a store with a custom inactivity timeout.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout,
            records: DashMap::new(),
        }
    }

    /// The inactivity timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// The number of records, expired or not.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// True if the store holds no records.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// True if a record exists for `key`, expired or not.
    pub fn contains(&self, key: &str) -> bool {
        self.records.contains_key(key)
    }

    /// Returns the live session for `key`, creating one with `factory` if
    /// there is none or the existing one has expired.
    ///
    /// A live session has its activity time refreshed. An expired record is
    /// dropped before the replacement is created, unless its session is locked
    /// by an in-flight operation; then it is refreshed and returned like a live
    /// one, so a key never has two sessions at once.
    ///
    /// # Errors
    ///
    /// Returns whatever `factory` fails with; the key is left without a record.
    pub fn get_or_create<F>(&self, key: &str, factory: F) -> Result<SharedSession>
    where
        F: FnOnce() -> Result<ChatSession>,
    {
        let now = Instant::now();
        match self.records.entry(key.to_string()) {
            Entry::Occupied(mut entry) => {
                let record = entry.get();
                if !record.is_expired(now, self.timeout) || record.in_use() {
                    entry.get_mut().last_activity = now;
                    return Ok(entry.get().session.clone());
                }
                SESSIONS_EXPIRED.click();
                tracing::info!(key, "session expired, starting a new one");
                match factory() {
                    Ok(session) => {
                        let record = SessionRecord::new(session, now);
                        let shared = record.session.clone();
                        entry.insert(record);
                        SESSIONS_CREATED.click();
                        Ok(shared)
                    }
                    Err(err) => {
                        entry.remove();
                        Err(err)
                    }
                }
            }
            Entry::Vacant(entry) => {
                let record = SessionRecord::new(factory()?, now);
                let shared = record.session.clone();
                entry.insert(record);
                SESSIONS_CREATED.click();
                tracing::info!(key, "created session");
                Ok(shared)
            }
        }
    }

    /// Clears the history of the session for `key`, if there is one.
    ///
    /// Refreshes the record's activity time. Waits for any in-flight send on
    /// the session to finish before clearing. Returns false without side
    /// effects when no record exists.
    pub async fn reset(&self, key: &str) -> bool {
        let session = match self.records.get_mut(key) {
            Some(mut record) => {
                record.last_activity = Instant::now();
                record.session.clone()
            }
            None => return false,
        };
        session.lock().await.reset();
        SESSIONS_RESET.click();
        tracing::info!(key, "reset session");
        true
    }

    /// Removes every record idle for longer than the timeout as of `now`.
    ///
    /// Records whose session is locked by an in-flight operation are kept.
    /// Returns the number of records removed.
    pub fn sweep_expired(&self, now: Instant) -> usize {
        let mut removed = 0;
        self.records.retain(|key, record| {
            if record.is_expired(now, self.timeout) && !record.in_use() {
                removed += 1;
                tracing::info!(key = %key, "removed expired session");
                false
            } else {
                true
            }
        });
        if removed > 0 {
            SESSIONS_EXPIRED.count(removed as u64);
        }
        removed
    }

    /// Runs [`sweep_expired`](Self::sweep_expired) every `interval` until the
    /// store is dropped or the returned handle is shut down.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> SweepHandle {
        let store: Weak<Self> = Arc::downgrade(self);
        let token = CancellationToken::new();
        let cancelled = token.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancelled.cancelled() => break,
                    _ = ticker.tick() => {
                        let Some(store) = store.upgrade() else {
                            break;
                        };
                        let removed = store.sweep_expired(Instant::now());
                        if removed > 0 {
                            tracing::debug!(removed, remaining = store.len(), "session sweep");
                        }
                    }
                }
            }
        });
        SweepHandle {
            token,
            handle: Some(handle),
        }
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle to the background sweep task; dropping it stops the task.
pub struct SweepHandle {
    token: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl SweepHandle {
    /// Stops the sweep task and waits for it to exit.
    pub async fn shutdown(mut self) {
        self.token.cancel();
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }

    /// True once the task has exited.
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().is_none_or(|h| h.is_finished())
    }
}

impl Drop for SweepHandle {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
