//! Namespace locking
//!
//! Per-peer read/write locks keyed by `(bucket, object)` with request-id
//! bookkeeping, plus the cluster-wide locker that replicates acquisitions
//! across peers under quorum.
//!
//! There is no global lock order across peers; two requests may be admitted
//! in different orders on different peers. Mutations tolerate this because
//! they are two-phase: only the commit phase observes the namespace, and it
//! runs only once the lock quorum holds.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};
use tracing::{error, warn};

use crate::error::{Error, Result};

/// Kind of namespace hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockKind {
    Read,
    Write,
}

impl std::fmt::Display for LockKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LockKind::Read => write!(f, "read-lock"),
            LockKind::Write => write!(f, "write-lock"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct NsKey {
    bucket: String,
    object: String,
}

enum HeldGuard {
    Read(#[allow(dead_code)] OwnedRwLockReadGuard<()>),
    Write(#[allow(dead_code)] OwnedRwLockWriteGuard<()>),
}

struct NsEntry {
    rw: Arc<RwLock<()>>,
    counter: usize,
    holders: HashMap<String, LockKind>,
    guards: HashMap<String, HeldGuard>,
}

impl NsEntry {
    fn new() -> Self {
        Self {
            rw: Arc::new(RwLock::new(())),
            counter: 0,
            holders: HashMap::new(),
            guards: HashMap::new(),
        }
    }
}

// =============================================================================
// Per-Peer Locker
// =============================================================================

/// One peer's namespace lock table.
///
/// Entries are created on first use and dropped when the last holder leaves.
/// A request id may hold a given key at most once; a duplicate acquisition is
/// a programmer error and aborts the process.
pub struct NsLocker {
    map: Mutex<HashMap<NsKey, NsEntry>>,
}

impl NsLocker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            map: Mutex::new(HashMap::new()),
        })
    }

    async fn acquire(&self, request_id: &str, bucket: &str, object: &str, kind: LockKind) {
        let key = NsKey {
            bucket: bucket.to_string(),
            object: object.to_string(),
        };

        let rw = {
            let mut map = self.map.lock();
            let entry = map.entry(key.clone()).or_insert_with(NsEntry::new);
            if let Some(held) = entry.holders.get(request_id) {
                // A duplicate acquisition breaks the lock table's invariant
                // for every later request on this key. A panic here would be
                // swallowed at the connection task boundary, so take the
                // whole node down instead.
                error!(
                    "duplicate request ID {} with {} found for {} request",
                    request_id, held, kind
                );
                std::process::abort();
            }
            entry.holders.insert(request_id.to_string(), kind);
            entry.counter += 1;
            entry.rw.clone()
        };

        let guard = match kind {
            LockKind::Read => HeldGuard::Read(rw.read_owned().await),
            LockKind::Write => HeldGuard::Write(rw.write_owned().await),
        };

        let mut map = self.map.lock();
        if let Some(entry) = map.get_mut(&key) {
            entry.guards.insert(request_id.to_string(), guard);
        }
    }

    fn release(&self, request_id: &str, bucket: &str, object: &str) {
        let key = NsKey {
            bucket: bucket.to_string(),
            object: object.to_string(),
        };

        let guard = {
            let mut map = self.map.lock();
            let Some(entry) = map.get_mut(&key) else {
                return;
            };
            if entry.holders.remove(request_id).is_none() {
                return;
            }
            let guard = entry.guards.remove(request_id);
            entry.counter -= 1;
            if entry.counter == 0 {
                map.remove(&key);
            }
            guard
        };

        // Releasing the read or write hold happens here, outside the table
        // mutex.
        drop(guard);
    }

    /// Number of live entries; empty after every holder unlocked.
    pub fn entry_count(&self) -> usize {
        self.map.lock().len()
    }
}

// =============================================================================
// Locker Trait
// =============================================================================

/// The namespace-lock contract shared by the local table and remote peers.
#[async_trait]
pub trait Locker: Send + Sync {
    async fn lock(&self, request_id: &str, bucket: &str, object: &str) -> Result<()>;
    async fn rlock(&self, request_id: &str, bucket: &str, object: &str) -> Result<()>;
    async fn unlock(&self, request_id: &str, bucket: &str, object: &str) -> Result<()>;
    async fn runlock(&self, request_id: &str, bucket: &str, object: &str) -> Result<()>;
}

#[async_trait]
impl Locker for NsLocker {
    async fn lock(&self, request_id: &str, bucket: &str, object: &str) -> Result<()> {
        self.acquire(request_id, bucket, object, LockKind::Write).await;
        Ok(())
    }

    async fn rlock(&self, request_id: &str, bucket: &str, object: &str) -> Result<()> {
        self.acquire(request_id, bucket, object, LockKind::Read).await;
        Ok(())
    }

    async fn unlock(&self, request_id: &str, bucket: &str, object: &str) -> Result<()> {
        self.release(request_id, bucket, object);
        Ok(())
    }

    async fn runlock(&self, request_id: &str, bucket: &str, object: &str) -> Result<()> {
        self.release(request_id, bucket, object);
        Ok(())
    }
}

// =============================================================================
// Cluster Locker
// =============================================================================

/// Quorum-replicated namespace lock over all peers.
///
/// Single-shot like the dispatcher: peers that fail are skipped for the rest
/// of the request. A failed acquisition releases whatever it obtained,
/// best-effort, before reporting the quorum error.
#[derive(Clone)]
pub struct ClusterLocker {
    lockers: Vec<Option<Arc<dyn Locker>>>,
    read_quorum: usize,
    write_quorum: usize,
}

impl ClusterLocker {
    pub fn new(lockers: Vec<Arc<dyn Locker>>, read_quorum: usize, write_quorum: usize) -> Self {
        Self {
            lockers: lockers.into_iter().map(Some).collect(),
            read_quorum,
            write_quorum,
        }
    }

    async fn fan_out<F, Fut>(&mut self, op: F) -> Vec<Result<()>>
    where
        F: Fn(Arc<dyn Locker>) -> Fut,
        Fut: std::future::Future<Output = Result<()>> + Send + 'static,
    {
        let futures: Vec<std::pin::Pin<Box<dyn std::future::Future<Output = Result<()>> + Send>>> =
            self.lockers
                .iter()
                .map(|slot| match slot {
                    Some(locker) => {
                        Box::pin(op(locker.clone()))
                            as std::pin::Pin<
                                Box<dyn std::future::Future<Output = Result<()>> + Send>,
                            >
                    }
                    None => Box::pin(async { Err(Error::PeerUnavailable) })
                        as std::pin::Pin<Box<dyn std::future::Future<Output = Result<()>> + Send>>,
                })
                .collect();

        let results = futures::future::join_all(futures).await;
        for (i, result) in results.iter().enumerate() {
            if result.is_err() {
                self.lockers[i] = None;
            }
        }
        results
    }

    async fn acquire(
        &mut self,
        request_id: &str,
        bucket: &str,
        object: &str,
        kind: LockKind,
    ) -> Result<()> {
        let results = self
            .fan_out(|locker| {
                let (rid, bucket, object) =
                    (request_id.to_string(), bucket.to_string(), object.to_string());
                async move {
                    match kind {
                        LockKind::Read => locker.rlock(&rid, &bucket, &object).await,
                        LockKind::Write => locker.lock(&rid, &bucket, &object).await,
                    }
                }
            })
            .await;

        let quorum = match kind {
            LockKind::Read => self.read_quorum,
            LockKind::Write => self.write_quorum,
        };

        let acquired = results.iter().filter(|r| r.is_ok()).count();
        if acquired >= quorum {
            return Ok(());
        }

        warn!(bucket, object, %kind, acquired, "lock quorum not met, releasing partial holds");
        let release = self
            .fan_out(|locker| {
                let (rid, bucket, object) =
                    (request_id.to_string(), bucket.to_string(), object.to_string());
                async move {
                    match kind {
                        LockKind::Read => locker.runlock(&rid, &bucket, &object).await,
                        LockKind::Write => locker.unlock(&rid, &bucket, &object).await,
                    }
                }
            })
            .await;
        drop(release);

        Err(match kind {
            LockKind::Read => Error::ReadQuorum,
            LockKind::Write => Error::WriteQuorum,
        })
    }

    async fn release(
        &mut self,
        request_id: &str,
        bucket: &str,
        object: &str,
        kind: LockKind,
    ) -> Result<()> {
        let results = self
            .fan_out(|locker| {
                let (rid, bucket, object) =
                    (request_id.to_string(), bucket.to_string(), object.to_string());
                async move {
                    match kind {
                        LockKind::Read => locker.runlock(&rid, &bucket, &object).await,
                        LockKind::Write => locker.unlock(&rid, &bucket, &object).await,
                    }
                }
            })
            .await;

        let quorum = match kind {
            LockKind::Read => self.read_quorum,
            LockKind::Write => self.write_quorum,
        };

        if results.iter().filter(|r| r.is_ok()).count() >= quorum {
            return Ok(());
        }

        warn!(bucket, object, %kind, "unlock quorum not met");
        Err(match kind {
            LockKind::Read => Error::ReadQuorum,
            LockKind::Write => Error::WriteQuorum,
        })
    }

    pub async fn lock(&mut self, request_id: &str, bucket: &str, object: &str) -> Result<()> {
        self.acquire(request_id, bucket, object, LockKind::Write).await
    }

    pub async fn rlock(&mut self, request_id: &str, bucket: &str, object: &str) -> Result<()> {
        self.acquire(request_id, bucket, object, LockKind::Read).await
    }

    pub async fn unlock(&mut self, request_id: &str, bucket: &str, object: &str) -> Result<()> {
        self.release(request_id, bucket, object, LockKind::Write).await
    }

    pub async fn runlock(&mut self, request_id: &str, bucket: &str, object: &str) -> Result<()> {
        self.release(request_id, bucket, object, LockKind::Read).await
    }
}

// =============================================================================
// Tests
// =============================================================================
