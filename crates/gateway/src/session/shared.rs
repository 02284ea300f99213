//! Multi-replica session store: session metadata lives in redis as plain
//! keys (`session:<id>`, with `session:ids` as the membership set so
//! [`SharedSessionStore::list`] doesn't need `KEYS`/`SCAN`); outbound
//! messages are published to a per-session pub/sub topic (`session:<id>:messages`)
//! so whichever replica holds that session's SSE connection receives them,
//! regardless of which replica a caller's `tools/call` landed on.
//!
//! Each local process lazily subscribes to a session's topic the first time
//! something calls [`SharedSessionStore::next_message`] for it, and relays
//! into a bounded local queue with the same drop-newest behavior as
//! [`super::local::LocalSessionStore`].

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::StreamExt;
use redis::AsyncCommands;
use tokio::sync::{Mutex, RwLock, mpsc};
use tracing::warn;

use super::{Message, SessionError, SessionMeta, SessionStore, QUEUE_CAPACITY};

fn meta_key(id: &str) -> String {
    format!("session:{id}")
}

fn topic(id: &str) -> String {
    format!("session:{id}:messages")
}

const IDS_SET: &str = "session:ids";

struct Relay {
    rx: Mutex<mpsc::Receiver<Message>>,
    task: tokio::task::JoinHandle<()>,
}

impl Drop for Relay {
    fn drop(&mut self) {
        self.task.abort();
    }
}

pub struct SharedSessionStore {
    client: redis::Client,
    manager: redis::aio::ConnectionManager,
    relays: RwLock<HashMap<String, Arc<Relay>>>,
}

impl SharedSessionStore {
    pub async fn connect(redis_url: &str) -> anyhow::Result<Self> {
        let client = redis::Client::open(redis_url)?;
        let manager = redis::aio::ConnectionManager::new(client.clone()).await?;
        Ok(Self {
            client,
            manager,
            relays: RwLock::new(HashMap::new()),
        })
    }

    async fn relay_for(&self, id: &str) -> anyhow::Result<Arc<Relay>> {
        if let Some(relay) = self.relays.read().await.get(id) {
            return Ok(relay.clone());
        }
        let mut relays = self.relays.write().await;
        if let Some(relay) = relays.get(id) {
            return Ok(relay.clone());
        }
        let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.subscribe(topic(id)).await?;
        let session_id = id.to_string();
        let task = tokio::spawn(async move {
            let mut stream = pubsub.on_message();
            while let Some(msg) = stream.next().await {
                let Ok(payload) = msg.get_payload::<String>() else {
                    continue;
                };
                let Ok(decoded) = serde_json::from_str::<Message>(&payload) else {
                    continue;
                };
                if let Err(mpsc::error::TrySendError::Full(_)) = tx.try_send(decoded) {
                    warn!(session_id = %session_id, "session queue full, dropping message");
                }
            }
        });
        let relay = Arc::new(Relay {
            rx: Mutex::new(rx),
            task,
        });
        relays.insert(id.to_string(), relay.clone());
        Ok(relay)
    }
}

#[async_trait]
impl SessionStore for SharedSessionStore {
    async fn register(&self, meta: SessionMeta) -> Result<(), SessionError> {
        if let Some(existing) = self.get(&meta.id).await? {
            return if existing.prefix == meta.prefix {
                Ok(())
            } else {
                Err(SessionError::Conflict {
                    id: meta.id,
                    existing_prefix: existing.prefix,
                })
            };
        }
        let mut conn = self.manager.clone();
        let payload = serde_json::to_string(&meta).map_err(|e| SessionError::Backend(e.into()))?;
        conn.set::<_, _, ()>(meta_key(&meta.id), payload)
            .await
            .map_err(|e| SessionError::Backend(e.into()))?;
        conn.sadd::<_, _, ()>(IDS_SET, &meta.id)
            .await
            .map_err(|e| SessionError::Backend(e.into()))?;
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<SessionMeta>, SessionError> {
        let mut conn = self.manager.clone();
        let raw: Option<String> = conn
            .get(meta_key(id))
            .await
            .map_err(|e| SessionError::Backend(e.into()))?;
        raw.map(|s| serde_json::from_str(&s).map_err(|e| SessionError::Backend(e.into())))
            .transpose()
    }

    async fn unregister(&self, id: &str) -> Result<(), SessionError> {
        let mut conn = self.manager.clone();
        conn.del::<_, ()>(meta_key(id))
            .await
            .map_err(|e| SessionError::Backend(e.into()))?;
        conn.srem::<_, _, ()>(IDS_SET, id)
            .await
            .map_err(|e| SessionError::Backend(e.into()))?;
        self.relays.write().await.remove(id);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<SessionMeta>, SessionError> {
        let mut conn = self.manager.clone();
        let ids: Vec<String> = conn
            .smembers(IDS_SET)
            .await
            .map_err(|e| SessionError::Backend(e.into()))?;
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(meta) = self.get(&id).await? {
                out.push(meta);
            }
        }
        Ok(out)
    }

    async fn publish(&self, id: &str, msg: Message) -> Result<(), SessionError> {
        let mut conn = self.manager.clone();
        let payload = serde_json::to_string(&msg).map_err(|e| SessionError::Backend(e.into()))?;
        conn.publish::<_, _, ()>(topic(id), payload)
            .await
            .map_err(|e| SessionError::Backend(e.into()))?;
        Ok(())
    }

    async fn next_message(&self, id: &str) -> Result<Option<Message>, SessionError> {
        let relay = self
            .relay_for(id)
            .await
            .map_err(SessionError::Backend)?;
        Ok(relay.rx.lock().await.recv().await)
    }
}
