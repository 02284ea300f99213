//! C2 — the session store: tracks live `Mcp-Session-Id` connections and the
//! bounded, per-session outbound message queue each one drains into its SSE
//! stream.
//!
//! Two implementations share the [`SessionStore`] trait: [`local::LocalSessionStore`]
//! (single-process, in-memory) and [`shared::SharedSessionStore`] (redis-backed
//! KV + pub/sub, for a gateway running as more than one replica).

pub mod local;
pub mod shared;

use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Outbound SSE events are dropped (not blocked on) past this many
/// outstanding messages per session — a slow or disconnected client must
/// never grow memory without bound.
pub const QUEUE_CAPACITY: usize = 100;

#[derive(Debug, Clone)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Metadata recorded at `initialize` time and surfaced unchanged for the
/// life of the session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionMeta {
    pub id: String,
    pub prefix: String,
    pub created_unix_ms: u64,
}

impl SessionMeta {
    pub fn new(id: impl Into<String>, prefix: impl Into<String>) -> Self {
        let created_unix_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        Self {
            id: id.into(),
            prefix: prefix.into(),
            created_unix_ms,
        }
    }
}

/// A single SSE wire message: `event: <event>\nid: <id>\ndata: <data>\n\n`.
/// `event` is `None` for the default (unnamed) event type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub event: Option<String>,
    pub data: String,
}

impl Message {
    pub fn new(data: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            event: None,
            data: data.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session {0:?} not found")]
    NotFound(String),
    #[error("session {id:?} already registered under a different prefix ({existing_prefix:?})")]
    Conflict { id: String, existing_prefix: String },
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

/// The session-store collaborator: register a new connection, push messages
/// to it, look up and list active sessions, and unregister on disconnect.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Idempotent on `meta.id`: re-registering a live id with the same
    /// `prefix` returns `Ok(())` without resetting its queue. Registering an
    /// id already held by a *different* prefix is a [`SessionError::Conflict`].
    async fn register(&self, meta: SessionMeta) -> Result<(), SessionError>;
    async fn get(&self, id: &str) -> Result<Option<SessionMeta>, SessionError>;
    async fn unregister(&self, id: &str) -> Result<(), SessionError>;
    async fn list(&self) -> Result<Vec<SessionMeta>, SessionError>;

    /// Enqueue `msg` for delivery to `id`'s SSE stream. Non-blocking: if the
    /// session's queue is at [`QUEUE_CAPACITY`], the new message is dropped
    /// and a warning is logged — the oldest buffered messages are kept
    /// rather than the newest, since a backlog usually means the consumer
    /// has already fallen behind enough that freshness won't help it.
    async fn publish(&self, id: &str, msg: Message) -> Result<(), SessionError>;

    /// Pull the next queued message for `id`, waiting if none is queued yet.
    /// Returns `None` once the session has been unregistered and its queue
    /// drained, signalling the SSE drain loop to close the stream.
    async fn next_message(&self, id: &str) -> Result<Option<Message>, SessionError>;
}
