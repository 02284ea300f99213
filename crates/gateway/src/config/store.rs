//! The config-storage collaborator: lists the raw config documents currently
//! on offer, plus a notifier that produces "update available" ticks. Both
//! are kept behind small traits so a relational-DB or admin-API backend
//! could be swapped in later without touching the reload controller.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;

use super::RawGatewayConfig;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("reading config dir {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing config document {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}

#[async_trait]
pub trait ConfigStore: Send + Sync {
    async fn list(&self) -> Result<Vec<RawGatewayConfig>, StoreError>;
}

/// Reads every `*.yaml`/`*.yml`/`*.json` file under one or more directories,
/// each parsed as a single [`RawGatewayConfig`] document. This is the
/// default collaborator; a relational-DB-backed store is a separate,
/// externally-owned service and is represented only by the [`ConfigStore`]
/// trait it would implement.
#[derive(Debug, Clone)]
pub struct FileConfigStore {
    dirs: Vec<PathBuf>,
}

impl FileConfigStore {
    pub fn new(dirs: Vec<PathBuf>) -> Self {
        Self { dirs }
    }
}

#[async_trait]
impl ConfigStore for FileConfigStore {
    async fn list(&self) -> Result<Vec<RawGatewayConfig>, StoreError> {
        let mut docs = Vec::new();
        for dir in &self.dirs {
            let mut entries = fs_err::tokio::read_dir(dir)
                .await
                .map_err(|source| StoreError::Io {
                    path: dir.clone(),
                    source,
                })?;
            let mut paths = Vec::new();
            while let Some(entry) = entries.next_entry().await.map_err(|source| StoreError::Io {
                path: dir.clone(),
                source,
            })? {
                let path = entry.path();
                if is_config_file(&path) {
                    paths.push(path);
                }
            }
            // Sorted so a directory listing's OS-dependent order never
            // changes the resulting document list (merge_configs sorts its
            // own output too, but this keeps per-file error messages stable).
            paths.sort();
            for path in paths {
                let contents =
                    fs_err::tokio::read_to_string(&path)
                        .await
                        .map_err(|source| StoreError::Io {
                            path: path.clone(),
                            source,
                        })?;
                let doc: RawGatewayConfig =
                    serde_yaml::from_str(&contents).map_err(|source| StoreError::Parse {
                        path: path.clone(),
                        source,
                    })?;
                docs.push(doc);
            }
        }
        Ok(docs)
    }
}

fn is_config_file(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml") | Some("yml") | Some("json")
    )
}

/// An in-memory store for embedding the gateway as a library and for tests.
#[derive(Debug, Clone, Default)]
pub struct StaticConfigStore {
    docs: Vec<RawGatewayConfig>,
}

impl StaticConfigStore {
    pub fn new(docs: Vec<RawGatewayConfig>) -> Self {
        Self { docs }
    }
}

#[async_trait]
impl ConfigStore for StaticConfigStore {
    async fn list(&self) -> Result<Vec<RawGatewayConfig>, StoreError> {
        Ok(self.docs.clone())
    }
}

/// Produces a tick every time the backing config source changes. The
/// content of the tick is irrelevant; the reload controller always re-pulls
/// the full document list via [`ConfigStore::list`].
#[async_trait]
pub trait ConfigNotifier: Send + Sync {
    async fn changed(&mut self);
}

/// Debounced filesystem watcher over the same directories a
/// [`FileConfigStore`] reads, using the `notify`/`notify-debouncer-full`
/// pair to trigger a reload whenever a config file changes on disk.
pub struct FileWatchNotifier {
    rx: tokio::sync::mpsc::Receiver<()>,
    // Keeping the debouncer alive keeps its background watch thread alive.
    _debouncer: notify_debouncer_full::Debouncer<
        notify::RecommendedWatcher,
        notify_debouncer_full::RecommendedCache,
    >,
}

impl FileWatchNotifier {
    pub fn new(dirs: &[PathBuf]) -> Result<Self, notify::Error> {
        use notify::RecursiveMode;
        use notify_debouncer_full::{DebounceEventResult, new_debouncer};

        let (tx, rx) = tokio::sync::mpsc::channel(1);
        let mut debouncer = new_debouncer(
            std::time::Duration::from_millis(300),
            None,
            move |result: DebounceEventResult| {
                if result.is_ok() {
                    let _ = tx.try_send(());
                }
            },
        )?;
        for dir in dirs {
            debouncer.watch(dir, RecursiveMode::NonRecursive)?;
        }
        Ok(Self {
            rx,
            _debouncer: debouncer,
        })
    }
}

#[async_trait]
impl ConfigNotifier for FileWatchNotifier {
    async fn changed(&mut self) {
        // A closed channel (watcher dropped) should not spin; park forever.
        if self.rx.recv().await.is_none() {
            std::future::pending::<()>().await;
        }
    }
}
