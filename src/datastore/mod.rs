//! Id-keyed shard data store
//!
//! Stores one entry per request id under `data/<id[0:4]>/<id>/`, holding the
//! shard data file, its checksum file, and the shard metadata. Entries are
//! moved in wholesale from a staging directory and dropped wholesale, with
//! drops deferred while readers still hold the entry open.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::io::{AsyncRead, AsyncWriteExt};
use tracing::{debug, warn};

use crate::blockio::DataFileReader;
use crate::error::{Error, Result};

/// Name of the shard data file inside an entry.
pub const DATA_FILENAME: &str = "part.0";

/// A reader that stalls this long is reaped and its hold released.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(15 * 60);

/// A streaming handle over stored shard bytes.
pub type DataReader = Box<dyn AsyncRead + Send + Unpin>;

/// Store of staged-and-committed shard data, keyed by request id.
pub struct DataStore {
    store_dir: PathBuf,
    /// Active reader count per id.
    usage: DashMap<String, usize>,
    /// Ids whose removal waits for the last reader to close.
    pending_drops: DashMap<String, ()>,
}

impl DataStore {
    pub fn new(store_dir: impl Into<PathBuf>) -> Arc<Self> {
        Arc::new(Self {
            store_dir: store_dir.into(),
            usage: DashMap::new(),
            pending_drops: DashMap::new(),
        })
    }

    fn index_dir(&self, id: &str) -> PathBuf {
        self.store_dir.join(&id[..4])
    }

    /// Directory of one entry: `data/<id[0:4]>/<id>/`.
    pub fn data_dir(&self, id: &str) -> PathBuf {
        self.index_dir(id).join(id)
    }

    /// Path of the shard data file of one entry.
    pub fn data_file(&self, id: &str) -> PathBuf {
        self.data_dir(id).join(DATA_FILENAME)
    }

    /// Move a fully staged directory into the store as entry `id`.
    pub async fn put(&self, id: &str, staged_dir: &Path) -> Result<()> {
        if self.usage.contains_key(id) {
            return Err(Error::DataInUse);
        }

        tokio::fs::create_dir_all(self.index_dir(id)).await?;

        let data_dir = self.data_dir(id);
        match tokio::fs::rename(staged_dir, &data_dir).await {
            Ok(()) => Ok(()),
            Err(err) => {
                if tokio::fs::try_exists(&data_dir).await.unwrap_or(false) {
                    return Err(Error::DataAlreadyExists);
                }
                Err(err.into())
            }
        }
    }

    /// Open a streaming reader over `[offset, offset + length)` of the
    /// entry's data file. The entry is held open until the reader finishes,
    /// errors, or sits idle past the timeout.
    pub async fn get(self: &Arc<Self>, id: &str, offset: u64, length: u64) -> Result<DataReader> {
        let file = match DataFileReader::open(&self.data_file(id), offset, length).await {
            Ok(file) => file,
            Err(Error::Io(err)) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::DataNotFound)
            }
            Err(err) => return Err(err),
        };

        let hold = UsageHold::acquire(self.clone(), id.to_string());
        let (mut pipe_writer, pipe_reader) = tokio::io::duplex(64 * 1024);

        tokio::spawn(async move {
            // Keep the hold alive for the lifetime of the pump; dropping it
            // releases the entry and applies any deferred removal.
            let _hold = hold;
            let mut file = file;
            loop {
                match file.next_block().await {
                    Ok(Some(block)) => {
                        let write = pipe_writer.write_all(&block);
                        match tokio::time::timeout(DEFAULT_IDLE_TIMEOUT, write).await {
                            Ok(Ok(())) => {}
                            Ok(Err(_)) => break,
                            Err(_) => {
                                warn!("data reader idle past timeout, reaping");
                                break;
                            }
                        }
                    }
                    Ok(None) => break,
                    Err(err) => {
                        debug!("data read aborted: {}", err);
                        break;
                    }
                }
            }
        });

        Ok(Box::new(pipe_reader))
    }

    /// Remove the entry, now or once the last reader closes.
    pub fn drop_entry(&self, id: &str) {
        if self.usage.contains_key(id) {
            self.pending_drops.insert(id.to_string(), ());
            // Re-check: the last reader may have just closed.
            if !self.usage.contains_key(id) && self.pending_drops.remove(id).is_some() {
                self.remove_entry(id);
            }
            return;
        }

        self.remove_entry(id);
    }

    fn remove_entry(&self, id: &str) {
        if let Err(err) = std::fs::remove_dir_all(self.data_dir(id)) {
            if err.kind() != std::io::ErrorKind::NotFound {
                warn!("unable to drop data {}: {}", id, err);
            }
        }
    }

    fn increment_usage(&self, id: &str) {
        *self.usage.entry(id.to_string()).or_insert(0) += 1;
    }

    fn decrement_usage(&self, id: &str) {
        let mut last = false;
        if let Some(mut count) = self.usage.get_mut(id) {
            *count -= 1;
            last = *count == 0;
        }
        if last {
            self.usage.remove(id);
            if self.pending_drops.remove(id).is_some() {
                self.remove_entry(id);
            }
        }
    }
}

/// Keeps an entry's usage count raised; releases on drop.
struct UsageHold {
    store: Arc<DataStore>,
    id: String,
}

impl UsageHold {
    fn acquire(store: Arc<DataStore>, id: String) -> Self {
        store.increment_usage(&id);
        Self { store, id }
    }
}

impl Drop for UsageHold {
    fn drop(&mut self) {
        self.store.decrement_usage(&self.id);
    }
}

// =============================================================================
// Tests
// =============================================================================
