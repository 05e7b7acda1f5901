// ABOUTME: Mailbox actor that owns one Collection and applies requests to it one at a time.
// ABOUTME: Provides CollectionHandle, a cloneable async front end that talks to the actor over tokio channels.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

use crate::collection::{Collection, CollectionError, Keys, SnapshotStats};

/// Errors returned through a CollectionHandle.
#[derive(Debug, Error)]
pub enum ActorError {
    #[error(transparent)]
    Collection(#[from] CollectionError),

    #[error("collection actor is gone")]
    ChannelClosed,
}

impl ActorError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ActorError::Collection(e) if e.is_not_found())
    }
}

/// Compaction choices made by the owner of the actor.
#[derive(Debug, Clone, Copy, Default)]
pub struct ActorOptions {
    /// Compact after a mutation once the journal reaches this many bytes.
    pub compact_after_bytes: Option<u64>,
    /// Compact before closing the collection.
    pub compact_on_close: bool,
}

type Reply<T> = oneshot::Sender<Result<T, CollectionError>>;

enum Request {
    Push {
        key: String,
        value: String,
        reply: Reply<()>,
    },
    Get {
        key: String,
        reply: Reply<String>,
    },
    Set {
        key: String,
        value: String,
        reply: Reply<()>,
    },
    Pop {
        key: String,
        reply: Reply<String>,
    },
    Count {
        reply: oneshot::Sender<usize>,
    },
    Keys {
        reply: oneshot::Sender<Keys>,
    },
    Snapshot {
        reply: Reply<SnapshotStats>,
    },
    Close {
        reply: Reply<()>,
    },
}

/// Public handle for a collection owned by an actor. Clones share the same
/// mailbox, so requests from every clone are applied in arrival order.
#[derive(Clone)]
pub struct CollectionHandle {
    tx: mpsc::Sender<Request>,
    name: Arc<str>,
}

impl CollectionHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn push(&self, key: &str, value: &str) -> Result<(), ActorError> {
        let (key, value) = (key.to_string(), value.to_string());
        self.request(|reply| Request::Push { key, value, reply }).await
    }

    pub async fn get(&self, key: &str) -> Result<String, ActorError> {
        let key = key.to_string();
        self.request(|reply| Request::Get { key, reply }).await
    }

    pub async fn set(&self, key: &str, value: &str) -> Result<(), ActorError> {
        let (key, value) = (key.to_string(), value.to_string());
        self.request(|reply| Request::Set { key, value, reply }).await
    }

    pub async fn pop(&self, key: &str) -> Result<String, ActorError> {
        let key = key.to_string();
        self.request(|reply| Request::Pop { key, reply }).await
    }

    pub async fn count(&self) -> Result<usize, ActorError> {
        let (tx, rx) = oneshot::channel();
        self.send(Request::Count { reply: tx }).await?;
        rx.await.map_err(|_| ActorError::ChannelClosed)
    }

    pub async fn keys(&self) -> Result<Keys, ActorError> {
        let (tx, rx) = oneshot::channel();
        self.send(Request::Keys { reply: tx }).await?;
        rx.await.map_err(|_| ActorError::ChannelClosed)
    }

    pub async fn snapshot(&self) -> Result<SnapshotStats, ActorError> {
        self.request(|reply| Request::Snapshot { reply }).await
    }

    /// Close the collection and stop the actor. Requests sent afterwards
    /// fail with `ChannelClosed`.
    pub async fn close(&self) -> Result<(), ActorError> {
        self.request(|reply| Request::Close { reply }).await
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(Reply<T>) -> Request,
    ) -> Result<T, ActorError> {
        let (tx, rx) = oneshot::channel();
        self.send(make(tx)).await?;
        Ok(rx.await.map_err(|_| ActorError::ChannelClosed)??)
    }

    async fn send(&self, request: Request) -> Result<(), ActorError> {
        self.tx
            .send(request)
            .await
            .map_err(|_| ActorError::ChannelClosed)
    }
}

/// Hand `collection` to a new actor and return the handle for it. The actor
/// runs on tokio's blocking pool since every request does synchronous file
/// I/O. It stops on `close()` or once every handle has been dropped.
pub fn spawn(collection: Collection, options: ActorOptions) -> CollectionHandle {
    let (tx, rx) = mpsc::channel::<Request>(64);
    let handle = CollectionHandle {
        tx,
        name: Arc::from(collection.name()),
    };

    let actor = CollectionActor {
        collection,
        rx,
        options,
    };
    tokio::task::spawn_blocking(move || actor.run());

    handle
}

struct CollectionActor {
    collection: Collection,
    rx: mpsc::Receiver<Request>,
    options: ActorOptions,
}

impl CollectionActor {
    fn run(mut self) {
        while let Some(request) = self.rx.blocking_recv() {
            match request {
                Request::Push { key, value, reply } => {
                    let result = self.collection.push(&key, value);
                    self.after_mutation(result.is_ok());
                    // Ignore send error: the caller may have dropped their receiver
                    let _ = reply.send(result);
                }
                Request::Get { key, reply } => {
                    let _ = reply.send(self.collection.get(&key));
                }
                Request::Set { key, value, reply } => {
                    let result = self.collection.set(&key, value);
                    self.after_mutation(result.is_ok());
                    let _ = reply.send(result);
                }
                Request::Pop { key, reply } => {
                    let result = self.collection.pop(&key);
                    self.after_mutation(result.is_ok());
                    let _ = reply.send(result);
                }
                Request::Count { reply } => {
                    let _ = reply.send(self.collection.count());
                }
                Request::Keys { reply } => {
                    let _ = reply.send(self.collection.keys());
                }
                Request::Snapshot { reply } => {
                    let _ = reply.send(self.collection.snapshot());
                }
                Request::Close { reply } => {
                    let _ = reply.send(self.shutdown());
                    return;
                }
            }
        }

        if let Err(e) = self.shutdown() {
            tracing::error!("failed to close collection {}: {}", self.collection.name(), e);
        }
    }

    fn after_mutation(&mut self, committed: bool) {
        let Some(limit) = self.options.compact_after_bytes else {
            return;
        };
        if !committed || self.collection.journal_len() < limit {
            return;
        }
        if let Err(e) = self.collection.snapshot() {
            tracing::warn!("compaction of {} failed: {}", self.collection.name(), e);
        }
    }

    fn shutdown(&mut self) -> Result<(), CollectionError> {
        if self.options.compact_on_close && self.collection.is_open() {
            self.collection.snapshot()?;
        }
        self.collection.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn handle_round_trips_operations() {
        let dir = TempDir::new().unwrap();
        let collection = Collection::open(dir.path(), "routes").unwrap();
        let handle = spawn(collection, ActorOptions::default());
        assert_eq!(handle.name(), "routes");

        handle.push("/fred", "1").await.unwrap();
        handle.set("/fred", "2").await.unwrap();
        assert_eq!(handle.get("/fred").await.unwrap(), "2");
        assert!(handle.set("/missing", "x").await.unwrap_err().is_not_found());
        assert_eq!(handle.count().await.unwrap(), 1);
        assert_eq!(handle.keys().await.unwrap().into_vec(), vec!["/fred"]);
        assert_eq!(handle.pop("/fred").await.unwrap(), "2");
        assert!(handle.get("/fred").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn concurrent_handles_are_serialized() {
        let dir = TempDir::new().unwrap();
        let collection = Collection::open(dir.path(), "c").unwrap();
        let handle = spawn(collection, ActorOptions::default());

        let mut tasks = Vec::new();
        for t in 0..8 {
            let h = handle.clone();
            tasks.push(tokio::spawn(async move {
                for i in 0..25 {
                    h.push(&format!("/t{}/{}", t, i), "v").await.unwrap();
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(handle.count().await.unwrap(), 200);
        handle.close().await.unwrap();

        let reopened = Collection::open(dir.path(), "c").unwrap();
        assert_eq!(reopened.count(), 200);
        assert_eq!(reopened.last_seq(), 200);
    }

    #[tokio::test]
    async fn requests_after_close_fail() {
        let dir = TempDir::new().unwrap();
        let collection = Collection::open(dir.path(), "c").unwrap();
        let handle = spawn(collection, ActorOptions::default());

        handle.close().await.unwrap();
        assert!(matches!(
            handle.push("k", "v").await,
            Err(ActorError::ChannelClosed)
        ));
        assert!(matches!(handle.count().await, Err(ActorError::ChannelClosed)));
    }

    #[tokio::test]
    async fn compacts_when_journal_passes_threshold() {
        let dir = TempDir::new().unwrap();
        let collection = Collection::open(dir.path(), "c").unwrap();
        let handle = spawn(
            collection,
            ActorOptions {
                compact_after_bytes: Some(512),
                compact_on_close: false,
            },
        );

        for i in 0..20 {
            handle.push(&format!("/k{}", i), "some payload").await.unwrap();
        }
        handle.close().await.unwrap();

        let journal_len = std::fs::metadata(dir.path().join("c").join("journal.log"))
            .unwrap()
            .len();
        assert!(journal_len < 512);
        assert!(dir.path().join("c").join("snapshot.json").exists());

        let reopened = Collection::open(dir.path(), "c").unwrap();
        assert_eq!(reopened.count(), 20);
    }

    #[tokio::test]
    async fn compacts_on_close_when_asked() {
        let dir = TempDir::new().unwrap();
        let collection = Collection::open(dir.path(), "c").unwrap();
        let handle = spawn(
            collection,
            ActorOptions {
                compact_after_bytes: None,
                compact_on_close: true,
            },
        );

        handle.push("a", "1").await.unwrap();
        handle.push("b", "2").await.unwrap();
        handle.close().await.unwrap();

        let reopened = Collection::open(dir.path(), "c").unwrap();
        assert_eq!(reopened.journal_len(), 0);
        assert_eq!(reopened.count(), 2);
        assert!(reopened.replay_report().from_snapshot);
    }

    #[tokio::test]
    async fn dropping_every_handle_closes_the_collection() {
        let dir = TempDir::new().unwrap();
        let collection = Collection::open(dir.path(), "c").unwrap();
        let handle = spawn(
            collection,
            ActorOptions {
                compact_after_bytes: None,
                compact_on_close: true,
            },
        );
        handle.push("a", "1").await.unwrap();
        drop(handle);

        // The actor compacts on its way out; wait for the snapshot to land.
        let snapshot = dir.path().join("c").join("snapshot.json");
        for _ in 0..100 {
            if snapshot.exists() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert!(snapshot.exists());
    }
}
