//! Sessions: connection semantics over a stateless transport.
//!
//! A [`Session`] owns its handshake state, negotiated capabilities and a
//! bounded FIFO of outbound envelopes. The [`SessionManager`] is the only
//! code that performs read-modify-write on stored sessions, and it always
//! does so while holding the per-session lock from the
//! [`SessionStore`](crate::mcp::store::SessionStore).
//!
//! Nothing is cached between calls: every operation reloads the session from
//! the store.

use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::SessionError;
use crate::mcp::capabilities::NegotiatedCapabilities;
use crate::mcp::protocol::{JsonRpcMessage, RequestId};
use crate::mcp::state::{InitializationState, InvalidStateTransition, LifecycleEvent};
use crate::mcp::store::SessionStore;

/// Longest accepted session id.
pub const MAX_SESSION_ID_LEN: usize = 128;

/// How many cancelled request ids a session remembers.
pub const MAX_CANCELLED_IDS: usize = 64;

/// Opaque session identity.
///
/// Generated ids are random v4 UUIDs in simple (hex) form. Ids read from a
/// client are restricted to ASCII alphanumerics and `-` so they are safe as
/// header values and file names.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SessionId(String);

impl SessionId {
    /// Generates a new unguessable id.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    /// Validates a client-supplied id.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::InvalidId`] for empty, overlong or
    /// non-alphanumeric ids.
    pub fn parse(raw: &str) -> Result<Self, SessionError> {
        if raw.is_empty() || raw.len() > MAX_SESSION_ID_LEN {
            return Err(SessionError::InvalidId(format!(
                "length must be 1..={MAX_SESSION_ID_LEN}"
            )));
        }
        if !raw.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-') {
            return Err(SessionError::InvalidId(
                "only ASCII letters, digits and '-' are allowed".to_string(),
            ));
        }
        Ok(Self(raw.to_string()))
    }

    /// The id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for SessionId {
    type Err = SessionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for SessionId {
    type Error = SessionError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<SessionId> for String {
    fn from(id: SessionId) -> Self {
        id.0
    }
}

/// One logical connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    id: SessionId,
    created_at: DateTime<Utc>,
    last_activity_at: DateTime<Utc>,
    #[serde(default)]
    state: InitializationState,
    #[serde(default)]
    capabilities: NegotiatedCapabilities,
    #[serde(default)]
    outbound: VecDeque<JsonRpcMessage>,
    max_queue_size: usize,
    #[serde(default)]
    cancelled: VecDeque<RequestId>,
}

impl Session {
    /// Creates a fresh session with an empty queue.
    #[must_use]
    pub fn new(id: SessionId, max_queue_size: usize) -> Self {
        Self::new_at(id, max_queue_size, Utc::now())
    }

    /// Creates a fresh session as of `now`.
    #[must_use]
    pub fn new_at(id: SessionId, max_queue_size: usize, now: DateTime<Utc>) -> Self {
        Self {
            id,
            created_at: now,
            last_activity_at: now,
            state: InitializationState::NotInitialized,
            capabilities: NegotiatedCapabilities::default(),
            outbound: VecDeque::new(),
            max_queue_size,
            cancelled: VecDeque::new(),
        }
    }

    /// The session id.
    #[must_use]
    pub const fn id(&self) -> &SessionId {
        &self.id
    }

    /// When the session was created.
    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// When the client last did something with this session.
    #[must_use]
    pub const fn last_activity_at(&self) -> DateTime<Utc> {
        self.last_activity_at
    }

    /// Current handshake state.
    #[must_use]
    pub const fn state(&self) -> InitializationState {
        self.state
    }

    /// Capabilities recorded during the handshake.
    #[must_use]
    pub const fn capabilities(&self) -> &NegotiatedCapabilities {
        &self.capabilities
    }

    pub(crate) fn capabilities_mut(&mut self) -> &mut NegotiatedCapabilities {
        &mut self.capabilities
    }

    /// Applies a lifecycle event to the handshake state.
    ///
    /// # Errors
    ///
    /// Returns the rejected transition; the state is left unchanged.
    pub fn advance(
        &mut self,
        event: LifecycleEvent,
    ) -> Result<InitializationState, InvalidStateTransition> {
        self.state = self.state.transition(event)?;
        Ok(self.state)
    }

    /// Number of queued outbound envelopes.
    #[must_use]
    pub fn queue_len(&self) -> usize {
        self.outbound.len()
    }

    /// The queue bound.
    #[must_use]
    pub const fn max_queue_size(&self) -> usize {
        self.max_queue_size
    }

    /// Appends an outbound envelope.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::QueueFull`] when the queue is at its bound. The
    /// queue is left untouched; nothing already queued is dropped.
    pub fn enqueue(&mut self, message: JsonRpcMessage) -> Result<(), SessionError> {
        if self.outbound.len() >= self.max_queue_size {
            return Err(SessionError::QueueFull {
                limit: self.max_queue_size,
            });
        }
        self.outbound.push_back(message);
        Ok(())
    }

    /// Removes and returns up to `limit` envelopes in enqueue order.
    pub fn drain(&mut self, limit: usize) -> Vec<JsonRpcMessage> {
        let n = limit.min(self.outbound.len());
        self.outbound.drain(..n).collect()
    }

    /// Records client activity now.
    pub fn touch(&mut self) {
        self.touch_at(Utc::now());
    }

    /// Records client activity at `now`.
    pub fn touch_at(&mut self, now: DateTime<Utc>) {
        if now > self.last_activity_at {
            self.last_activity_at = now;
        }
    }

    /// Whether `now - last_activity_at` exceeds `timeout`.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>, timeout: Duration) -> bool {
        now.signed_duration_since(self.last_activity_at)
            .to_std()
            .is_ok_and(|idle| idle > timeout)
    }

    /// Remembers that the client cancelled `id`.
    pub fn record_cancelled(&mut self, id: RequestId) {
        if self.cancelled.contains(&id) {
            return;
        }
        if self.cancelled.len() >= MAX_CANCELLED_IDS {
            self.cancelled.pop_front();
        }
        self.cancelled.push_back(id);
    }

    /// Whether the client cancelled `id`.
    #[must_use]
    pub fn is_cancelled(&self, id: &RequestId) -> bool {
        self.cancelled.contains(id)
    }
}

/// Session policy shared by every session a manager creates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSettings {
    /// Inactivity after which a session expires.
    pub timeout: Duration,
    /// Bound on each session's outbound queue.
    pub max_queue_size: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(1800),
            max_queue_size: 1000,
        }
    }
}

/// Locked, store-backed session operations.
#[derive(Clone)]
pub struct SessionManager {
    store: Arc<dyn SessionStore>,
    settings: SessionSettings,
}

impl fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionManager")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl SessionManager {
    /// Creates a manager over `store`.
    #[must_use]
    pub fn new(store: Arc<dyn SessionStore>, settings: SessionSettings) -> Self {
        Self { store, settings }
    }

    /// The policy applied to sessions.
    #[must_use]
    pub const fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    /// Creates and stores a new session.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub async fn create_session(&self) -> Result<SessionId, SessionError> {
        loop {
            let id = SessionId::generate();
            let lock = self.store.acquire(&id).await?;
            if self.store.load(&lock).await?.is_some() {
                continue;
            }
            self.store
                .save(&lock, &Session::new(id.clone(), self.settings.max_queue_size))
                .await?;
            lock.release();
            tracing::debug!(session_id = %id, "Created session");
            return Ok(id);
        }
    }

    /// Runs `f` on the stored session under its lock and saves the result.
    ///
    /// An expired session is deleted inside the same critical section and
    /// reported as [`SessionError::Expired`]. The lock is released on every
    /// exit path.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::NotFound`], [`SessionError::Expired`] or a store
    /// error.
    pub async fn with_session<F, R>(&self, id: &SessionId, f: F) -> Result<R, SessionError>
    where
        F: FnOnce(&mut Session) -> R + Send,
        R: Send,
    {
        let lock = self.store.acquire(id).await?;
        let Some(mut session) = self.store.load(&lock).await? else {
            return Err(SessionError::NotFound(id.clone()));
        };

        if session.is_expired_at(Utc::now(), self.settings.timeout) {
            self.store.delete(&lock).await?;
            tracing::info!(session_id = %id, "Session expired");
            return Err(SessionError::Expired(id.clone()));
        }

        let result = f(&mut session);
        self.store.save(&lock, &session).await?;
        lock.release();
        Ok(result)
    }

    /// Appends an outbound envelope to the session's queue.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::QueueFull`] when the queue is at its bound, or
    /// any error from [`Self::with_session`].
    pub async fn enqueue_outbound(
        &self,
        id: &SessionId,
        message: JsonRpcMessage,
    ) -> Result<(), SessionError> {
        self.with_session(id, move |session| session.enqueue(message))
            .await?
    }

    /// Removes and returns up to `limit` queued envelopes.
    ///
    /// Draining is delivery, not client activity: it does not touch the session.
    ///
    /// # Errors
    ///
    /// Returns any error from [`Self::with_session`].
    pub async fn drain_outbound(
        &self,
        id: &SessionId,
        limit: usize,
    ) -> Result<Vec<JsonRpcMessage>, SessionError> {
        self.with_session(id, |session| session.drain(limit)).await
    }

    /// Records client activity.
    ///
    /// # Errors
    ///
    /// Returns any error from [`Self::with_session`].
    pub async fn touch(&self, id: &SessionId) -> Result<(), SessionError> {
        self.with_session(id, Session::touch).await
    }

    /// Whether the session has outlived its timeout. Does not evict.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::NotFound`] for an unknown session, or a store error.
    pub async fn is_expired(&self, id: &SessionId) -> Result<bool, SessionError> {
        let lock = self.store.acquire(id).await?;
        let session = self
            .store
            .load(&lock)
            .await?
            .ok_or_else(|| SessionError::NotFound(id.clone()))?;
        lock.release();
        Ok(session.is_expired_at(Utc::now(), self.settings.timeout))
    }

    /// Deletes the session and its queue. Returns whether it existed.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails; an absent session is not an error.
    pub async fn terminate(&self, id: &SessionId) -> Result<bool, SessionError> {
        let lock = self.store.acquire(id).await?;
        let existed = self.store.load(&lock).await?.is_some();
        if existed {
            self.store.delete(&lock).await?;
            tracing::debug!(session_id = %id, "Terminated session");
        }
        lock.release();
        Ok(existed)
    }

    /// Deletes every expired session. Returns how many were evicted.
    ///
    /// Each candidate is re-checked under its lock, so a session touched
    /// between listing and eviction survives.
    ///
    /// # Errors
    ///
    /// Returns the first store error encountered.
    pub async fn sweep_expired(&self) -> Result<usize, SessionError> {
        let now = Utc::now();
        let candidates = self.store.list_expired(now, self.settings.timeout).await?;
        let mut evicted = 0;

        for id in candidates {
            let lock = self.store.acquire(&id).await?;
            let still_expired = self
                .store
                .load(&lock)
                .await?
                .is_some_and(|s| s.is_expired_at(Utc::now(), self.settings.timeout));
            if still_expired {
                self.store.delete(&lock).await?;
                evicted += 1;
            }
            lock.release();
        }

        if evicted > 0 {
            tracing::info!(evicted, "Swept expired sessions");
        }
        Ok(evicted)
    }
}
