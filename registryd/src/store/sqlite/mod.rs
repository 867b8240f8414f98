//! SQLite backend. The connection is owned by one thread and every request,
//! reads included, goes through its command queue, so writes to a key are
//! applied one at a time in arrival order.

pub mod db;

use std::thread;
use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

use super::{KvPair, KvStore, Result, StoreError, WriteOptions};
pub use db::KvDb;

type Reply<T> = oneshot::Sender<anyhow::Result<T>>;

/// Commands sent to the store thread
enum StoreCommand {
    List(String, Reply<Vec<KvPair>>),
    Get(String, Reply<Option<KvPair>>),
    Put {
        key: String,
        value: Vec<u8>,
        options: WriteOptions,
        reply: Reply<()>,
    },
    PutIfVersion {
        key: String,
        value: Vec<u8>,
        expected_version: u64,
        reply: Reply<bool>,
    },
    Shutdown,
}

/// Handle to the store thread
#[derive(Clone)]
pub struct SqliteStore {
    tx: mpsc::Sender<StoreCommand>,
}

impl SqliteStore {
    /// Spawn the store thread around an open database
    pub fn spawn(db: KvDb) -> Self {
        let (tx, mut rx) = mpsc::channel::<StoreCommand>(256);

        thread::spawn(move || {
            while let Some(cmd) = rx.blocking_recv() {
                match cmd {
                    StoreCommand::List(prefix, reply) => {
                        let _ = reply.send(db.list(&prefix));
                    }
                    StoreCommand::Get(key, reply) => {
                        let _ = reply.send(db.get(&key));
                    }
                    StoreCommand::Put { key, value, options, reply } => {
                        let _ = reply.send(db.put(&key, &value, options));
                    }
                    StoreCommand::PutIfVersion { key, value, expected_version, reply } => {
                        let _ = reply.send(db.put_if_version(&key, &value, expected_version));
                    }
                    StoreCommand::Shutdown => {
                        tracing::info!("SQLite store thread shutting down");
                        break;
                    }
                }
            }
        });

        Self { tx }
    }

    async fn request<T>(&self, make: impl FnOnce(Reply<T>) -> StoreCommand) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(make(reply))
            .await
            .map_err(|_| stopped())?;

        rx.await
            .map_err(|_| stopped())?
            .map_err(|e| StoreError::Backend(format!("{:#}", e)))
    }
}

fn stopped() -> StoreError {
    StoreError::Backend("SQLite store thread is not running".to_string())
}

#[async_trait]
impl KvStore for SqliteStore {
    fn backend(&self) -> &'static str {
        "sqlite"
    }

    async fn list(&self, prefix: &str) -> Result<Vec<KvPair>> {
        self.request(|reply| StoreCommand::List(prefix.to_string(), reply)).await
    }

    async fn get(&self, key: &str) -> Result<KvPair> {
        self.request(|reply| StoreCommand::Get(key.to_string(), reply))
            .await?
            .ok_or_else(|| StoreError::NotFound(key.to_string()))
    }

    async fn put(&self, key: &str, value: &[u8], options: WriteOptions) -> Result<()> {
        self.request(|reply| StoreCommand::Put {
            key: key.to_string(),
            value: value.to_vec(),
            options,
            reply,
        })
        .await
    }

    async fn put_if_version(&self, key: &str, value: &[u8], expected_version: u64) -> Result<()> {
        let written = self
            .request(|reply| StoreCommand::PutIfVersion {
                key: key.to_string(),
                value: value.to_vec(),
                expected_version,
                reply,
            })
            .await?;

        if written {
            Ok(())
        } else {
            Err(StoreError::Conflict {
                key: key.to_string(),
                expected: expected_version,
            })
        }
    }

    async fn close(&self) -> Result<()> {
        self.tx
            .send(StoreCommand::Shutdown)
            .await
            .map_err(|_| stopped())
    }
}
