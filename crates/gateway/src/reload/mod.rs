//! C7 — the reload controller: mutex-serialized re-reads of the config
//! store, folded through [`merge_configs`] and published atomically via
//! [`arc_swap::ArcSwap`]. A failed reload leaves the previously published
//! snapshot live — a bad document must never tear down a running gateway.

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{error, info};

use crate::config::store::{ConfigNotifier, ConfigStore, StoreError};
use crate::config::{merge_configs, ConfigError, GatewayConfig};

/// How long the previous snapshot's sessions are still honored after a
/// reload drops the server/tool they belong to, before being torn down.
pub const RELOAD_GRACE_PERIOD: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum ReloadError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

pub struct ReloadController {
    store: Box<dyn ConfigStore>,
    current: Arc<ArcSwap<GatewayConfig>>,
    // Serializes concurrent reload attempts (a file-watch tick racing an
    // admin-triggered `/_reload` call) so two reloads never interleave
    // their store reads.
    lock: Mutex<()>,
}

impl ReloadController {
    pub async fn bootstrap(store: Box<dyn ConfigStore>) -> Result<Self, ReloadError> {
        let docs = store.list().await?;
        let config = merge_configs(&docs)?;
        Ok(Self {
            store,
            current: Arc::new(ArcSwap::from_pointee(config)),
            lock: Mutex::new(()),
        })
    }

    pub fn snapshot(&self) -> Arc<ArcSwap<GatewayConfig>> {
        self.current.clone()
    }

    /// Re-read the store, merge, and publish. On any error the previous
    /// snapshot stays live and is returned unchanged to the caller context
    /// via the error — nothing is torn down.
    pub async fn reload_now(&self) -> Result<Arc<GatewayConfig>, ReloadError> {
        let _guard = self.lock.lock().await;
        let docs = self.store.list().await?;
        let config = merge_configs(&docs)?;
        let snapshot = Arc::new(config);
        self.current.store(snapshot.clone());
        info!("config snapshot published");
        Ok(snapshot)
    }

    /// Run forever, reloading each time `notifier` ticks. Intended to be
    /// spawned as its own task; reload errors are logged and do not stop
    /// the loop — the next filesystem event gets another chance.
    pub async fn watch(self: Arc<Self>, mut notifier: Box<dyn ConfigNotifier>) {
        loop {
            notifier.changed().await;
            if let Err(e) = self.reload_now().await {
                error!(error = %e, "config reload failed, keeping previous snapshot");
            }
        }
    }
}
