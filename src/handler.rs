//! Object handler
//!
//! Per-request orchestration over the quorum backend and the cluster lock:
//! stage → lock → commit → close → unlock for mutations, lock → open →
//! unlock → stream for reads. One handler serves one request; its dispatcher
//! and locker are single-shot clones.
//!
//! Compensating close calls and unlocks are best-effort: their failures are
//! logged and the primary operation's result stands.

use rand::seq::SliceRandom;
use tokio::io::AsyncWriteExt;
use tracing::{debug, instrument, warn};

use crate::backend::{BucketInfo, BucketListing, ObjectInfo, QuorumBackend, ShardStream};
use crate::erasure::{ShardSection, StripeDecoder, StripeGeometry};
use crate::error::Result;
use crate::nslock::ClusterLocker;

/// Orchestrates one client request across the cluster.
pub struct StoreHandler {
    backend: QuorumBackend,
    locker: ClusterLocker,
}

impl StoreHandler {
    /// Takes single-shot clones of the cluster's dispatcher and locker.
    pub fn new(backend: QuorumBackend, locker: ClusterLocker) -> Self {
        Self { backend, locker }
    }

    async fn unlock_logged(&mut self, request_id: &str, bucket: &str, object: &str) {
        if let Err(err) = self.locker.unlock(request_id, bucket, object).await {
            debug!(bucket, object, "unlock failed: {}", err);
        }
    }

    async fn runlock_logged(&mut self, request_id: &str, bucket: &str, object: &str) {
        if let Err(err) = self.locker.runlock(request_id, bucket, object).await {
            debug!(bucket, object, "read unlock failed: {}", err);
        }
    }

    // =========================================================================
    // Bucket Operations
    // =========================================================================

    #[instrument(skip(self))]
    pub async fn put_bucket(&mut self, request_id: &str, bucket: &str) -> Result<()> {
        self.locker.lock(request_id, bucket, "").await?;

        let result = self.backend.put_bucket(request_id, bucket).await;
        if let Err(err) = self
            .backend
            .close_put_bucket(request_id, bucket, result.is_err())
            .await
        {
            debug!(bucket, "close_put_bucket failed: {}", err);
        }

        self.unlock_logged(request_id, bucket, "").await;
        result
    }

    #[instrument(skip(self))]
    pub async fn delete_bucket(&mut self, request_id: &str, bucket: &str) -> Result<()> {
        self.locker.lock(request_id, bucket, "").await?;

        let result = self.backend.delete_bucket(request_id, bucket).await;
        if let Err(err) = self
            .backend
            .close_delete_bucket(request_id, bucket, result.is_err())
            .await
        {
            debug!(bucket, "close_delete_bucket failed: {}", err);
        }

        self.unlock_logged(request_id, bucket, "").await;
        result
    }

    #[instrument(skip(self))]
    pub async fn head_bucket(&mut self, request_id: &str, bucket: &str) -> Result<BucketInfo> {
        self.locker.rlock(request_id, bucket, "").await?;
        let result = self.backend.head_bucket(bucket).await;
        self.runlock_logged(request_id, bucket, "").await;
        result
    }

    #[instrument(skip(self))]
    pub async fn get_bucket(
        &mut self,
        bucket: &str,
        prefix: &str,
        start_after: &str,
        max_keys: usize,
    ) -> Result<BucketListing> {
        self.backend
            .get_bucket(bucket, prefix, start_after, max_keys)
            .await
    }

    // =========================================================================
    // Object Operations
    // =========================================================================

    #[instrument(skip(self, body))]
    pub async fn put_object(
        &mut self,
        request_id: &str,
        bucket: &str,
        object: &str,
        version_id: &str,
        body: ShardStream,
        body_size: u64,
    ) -> Result<()> {
        let mut shard_order: Vec<usize> = (0..self.backend.peer_count()).collect();
        shard_order.shuffle(&mut rand::thread_rng());

        let metadata = ObjectInfo {
            shard_order,
            ..ObjectInfo::default()
        };

        self.backend
            .put_object(request_id, bucket, object, version_id, body, body_size, metadata)
            .await?;

        if let Err(err) = self.locker.lock(request_id, bucket, object).await {
            // Staged shards are unreachable without a commit; scrap them.
            let _ = self
                .backend
                .close_put_object(request_id, bucket, object, version_id, true)
                .await;
            return Err(err);
        }

        let result = self
            .backend
            .commit_put_object(request_id, bucket, object, version_id)
            .await;

        if let Err(err) = self
            .backend
            .close_put_object(request_id, bucket, object, version_id, result.is_err())
            .await
        {
            debug!(bucket, object, "close_put_object failed: {}", err);
        }

        self.unlock_logged(request_id, bucket, object).await;
        result
    }

    #[instrument(skip(self))]
    pub async fn delete_object(
        &mut self,
        request_id: &str,
        bucket: &str,
        object: &str,
        version_id: &str,
    ) -> Result<()> {
        self.locker.lock(request_id, bucket, object).await?;

        let result = self
            .backend
            .delete_object(request_id, bucket, object, version_id)
            .await;
        if let Err(err) = self
            .backend
            .close_delete_object(request_id, bucket, object, version_id, result.is_err())
            .await
        {
            debug!(bucket, object, "close_delete_object failed: {}", err);
        }

        self.unlock_logged(request_id, bucket, object).await;
        result
    }

    #[instrument(skip(self))]
    pub async fn head_object(
        &mut self,
        request_id: &str,
        bucket: &str,
        object: &str,
        version_id: &str,
    ) -> Result<ObjectInfo> {
        self.locker.rlock(request_id, bucket, object).await?;
        let result = self.backend.head_object(bucket, object, version_id).await;
        self.runlock_logged(request_id, bucket, object).await;
        result
    }

    /// Open an object for reading. The read lock is released once the shard
    /// readers are established: they hold their own handles, and the data
    /// store defers any racing drop until they close.
    #[instrument(skip(self))]
    pub async fn get_object(
        &mut self,
        request_id: &str,
        bucket: &str,
        object: &str,
        version_id: &str,
        offset: u64,
        length: Option<u64>,
    ) -> Result<(ShardStream, u64)> {
        self.locker.rlock(request_id, bucket, object).await?;
        let prepared = self
            .prepare_get(bucket, object, version_id, offset, length)
            .await;
        self.runlock_logged(request_id, bucket, object).await;

        let (info, section, length, mut shards) = prepared?;

        // Logical shard i was stored on the peer at shard_order[i].
        let mut readers: Vec<Option<ShardStream>> = Vec::with_capacity(shards.len());
        for &peer_index in &info.shard_order {
            readers.push(shards[peer_index].take());
        }

        let mut decoder = StripeDecoder::new(
            info.data_count,
            info.parity_count,
            section.shard_size,
            section.last_shard_size,
            section.stripe_count,
            section.bytes_to_skip,
        )?;

        let (mut pipe_writer, pipe_reader) = tokio::io::duplex(64 * 1024);
        tokio::spawn(async move {
            let mut readers = readers;
            match decoder.copy_n(&mut pipe_writer, &mut readers, length).await {
                Ok(written) => {
                    if written != length {
                        warn!("short object stream: wrote {} of {}", written, length);
                    }
                    let _ = pipe_writer.shutdown().await;
                }
                Err(err) => {
                    // The response status is already committed; all that is
                    // left is to log and cut the stream.
                    warn!("object decode failed: {}", err);
                }
            }
        });

        Ok((Box::new(pipe_reader), length))
    }

    async fn prepare_get(
        &mut self,
        bucket: &str,
        object: &str,
        version_id: &str,
        offset: u64,
        length: Option<u64>,
    ) -> Result<(ObjectInfo, ShardSection, u64, Vec<Option<ShardStream>>)> {
        let info = self.backend.head_object(bucket, object, version_id).await?;

        let available = info.object_size.saturating_sub(offset);
        let length = length.unwrap_or(u64::MAX).min(available);

        let geometry = StripeGeometry {
            object_size: info.object_size,
            data_count: info.data_count,
            parity_count: info.parity_count,
            shard_size: info.shard_size,
            last_shard_size: info.last_shard_size,
            stripe_count: info.shard_count,
        };
        let section = geometry.section(offset, length);

        let shards = self
            .backend
            .open_object_shards(
                bucket,
                object,
                version_id,
                section.shard_offset,
                section.shard_length,
            )
            .await?;

        Ok((info, section, length, shards))
    }
}
