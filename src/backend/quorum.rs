//! Quorum dispatcher
//!
//! Fans every operation out to all peers concurrently, then reduces the
//! per-peer results to one answer: a known error held by a quorum of peers
//! wins, too few successes is a quorum failure, anything else succeeds.
//!
//! A dispatcher instance is single-shot: the object handler clones one per
//! request, and any peer that fails once is skipped for the remaining phases
//! of that request.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use futures::future::join_all;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::erasure::encoder::ShardWriter;
use crate::erasure::{StripeEncoder, StripeGeometry};
use crate::error::{Error, Result};

use super::{Backend, BucketInfo, BucketListing, ObjectInfo, ShardStream};

type PeerFuture<T> = Pin<Box<dyn Future<Output = Result<T>> + Send>>;

fn count_ok<T>(results: &[Result<T>]) -> usize {
    results.iter().filter(|r| r.is_ok()).count()
}

fn count_err<T>(results: &[Result<T>], sample: &Error) -> usize {
    results
        .iter()
        .filter(|r| {
            matches!(r, Err(e) if std::mem::discriminant(e) == std::mem::discriminant(sample))
        })
        .count()
}

fn clone_semantic(err: &Error) -> Error {
    match err {
        Error::BucketAlreadyExists => Error::BucketAlreadyExists,
        Error::BucketNotEmpty => Error::BucketNotEmpty,
        Error::BucketNotFound => Error::BucketNotFound,
        Error::ObjectNotFound => Error::ObjectNotFound,
        other => Error::Internal(other.to_string()),
    }
}

/// Pick the representative of the largest semantically-equal group, if that
/// group reaches the quorum.
fn best_match<'a, T>(items: &[&'a T], eq: impl Fn(&T, &T) -> bool, quorum: usize) -> Option<&'a T> {
    let mut best: Option<(&'a T, usize)> = None;
    for &item in items {
        let size = items.iter().filter(|&&other| eq(item, other)).count();
        if best.map_or(true, |(_, best_size)| size > best_size) {
            best = Some((item, size));
        }
    }
    best.and_then(|(item, size)| (size >= quorum).then_some(item))
}

/// Single-shot fan-out over all peer backends.
#[derive(Clone)]
pub struct QuorumBackend {
    peers: Vec<Option<Arc<dyn Backend>>>,
    local_index: usize,
    data_count: usize,
    parity_count: usize,
    shard_size: usize,
    read_quorum: usize,
    write_quorum: usize,
}

impl QuorumBackend {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        peers: Vec<Arc<dyn Backend>>,
        local_index: usize,
        data_count: usize,
        parity_count: usize,
        shard_size: usize,
        read_quorum: usize,
        write_quorum: usize,
    ) -> Self {
        Self {
            peers: peers.into_iter().map(Some).collect(),
            local_index,
            data_count,
            parity_count,
            shard_size,
            read_quorum,
            write_quorum,
        }
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    pub fn data_count(&self) -> usize {
        self.data_count
    }

    pub fn parity_count(&self) -> usize {
        self.parity_count
    }

    /// Run `op` against every live peer concurrently; peers that fail are
    /// skipped by later phases of this request.
    async fn fan_out<T, F, Fut>(&mut self, op: F) -> Vec<Result<T>>
    where
        T: Send + 'static,
        F: Fn(usize, Arc<dyn Backend>) -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let futures: Vec<PeerFuture<T>> = self
            .peers
            .iter()
            .enumerate()
            .map(|(i, slot)| match slot {
                Some(peer) => Box::pin(op(i, peer.clone())) as PeerFuture<T>,
                None => Box::pin(async { Err(Error::PeerUnavailable) }) as PeerFuture<T>,
            })
            .collect();

        let results = join_all(futures).await;
        for (i, result) in results.iter().enumerate() {
            if result.is_err() {
                self.peers[i] = None;
            }
        }
        results
    }

    fn reduce<T>(
        &self,
        operation: &'static str,
        results: &[Result<T>],
        quorum: usize,
        known: &[Error],
    ) -> Result<()> {
        for sample in known {
            if count_err(results, sample) >= quorum {
                return Err(clone_semantic(sample));
            }
        }

        if count_ok(results) < quorum {
            let errors: Vec<String> = results
                .iter()
                .filter_map(|r| r.as_ref().err().map(|e| e.to_string()))
                .collect();
            warn!(operation, ?errors, "quorum not met");
            return Err(if quorum == self.write_quorum {
                Error::WriteQuorum
            } else {
                Error::ReadQuorum
            });
        }

        Ok(())
    }

    // =========================================================================
    // Bucket Operations
    // =========================================================================

    pub async fn put_bucket(&mut self, request_id: &str, bucket: &str) -> Result<()> {
        let results = self
            .fan_out(|_, peer| {
                let (rid, bucket) = (request_id.to_string(), bucket.to_string());
                async move { peer.put_bucket(&rid, &bucket).await }
            })
            .await;

        self.reduce(
            "put_bucket",
            &results,
            self.write_quorum,
            &[Error::BucketAlreadyExists],
        )
    }

    pub async fn close_put_bucket(
        &mut self,
        request_id: &str,
        bucket: &str,
        undo: bool,
    ) -> Result<()> {
        let results = self
            .fan_out(|_, peer| {
                let (rid, bucket) = (request_id.to_string(), bucket.to_string());
                async move { peer.close_put_bucket(&rid, &bucket, undo).await }
            })
            .await;

        self.reduce("close_put_bucket", &results, self.write_quorum, &[])
    }

    pub async fn delete_bucket(&mut self, request_id: &str, bucket: &str) -> Result<()> {
        let results = self
            .fan_out(|_, peer| {
                let (rid, bucket) = (request_id.to_string(), bucket.to_string());
                async move { peer.delete_bucket(&rid, &bucket).await }
            })
            .await;

        self.reduce(
            "delete_bucket",
            &results,
            self.write_quorum,
            &[Error::BucketNotFound, Error::BucketNotEmpty],
        )
    }

    pub async fn close_delete_bucket(
        &mut self,
        request_id: &str,
        bucket: &str,
        undo: bool,
    ) -> Result<()> {
        let results = self
            .fan_out(|_, peer| {
                let (rid, bucket) = (request_id.to_string(), bucket.to_string());
                async move { peer.close_delete_bucket(&rid, &bucket, undo).await }
            })
            .await;

        self.reduce("close_delete_bucket", &results, self.write_quorum, &[])
    }

    pub async fn head_bucket(&mut self, bucket: &str) -> Result<BucketInfo> {
        let results = self
            .fan_out(|_, peer| {
                let bucket = bucket.to_string();
                async move { peer.head_bucket(&bucket).await }
            })
            .await;

        self.reduce(
            "head_bucket",
            &results,
            self.read_quorum,
            &[Error::BucketNotFound],
        )?;

        let infos: Vec<&BucketInfo> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
        best_match(&infos, BucketInfo::semantic_eq, self.read_quorum)
            .cloned()
            .ok_or(Error::ReadQuorum)
    }

    /// Listing is answered by the local export alone.
    pub async fn get_bucket(
        &self,
        bucket: &str,
        prefix: &str,
        start_after: &str,
        max_keys: usize,
    ) -> Result<BucketListing> {
        let local = self.peers[self.local_index]
            .clone()
            .ok_or(Error::PeerUnavailable)?;
        local.get_bucket(bucket, prefix, start_after, max_keys).await
    }

    // =========================================================================
    // Object Operations
    // =========================================================================

    /// Stage an object: stream the body through the erasure encoder into one
    /// shard writer per peer, in shard order.
    pub async fn put_object(
        &mut self,
        request_id: &str,
        bucket: &str,
        object: &str,
        version_id: &str,
        mut body: ShardStream,
        body_size: u64,
        mut metadata: ObjectInfo,
    ) -> Result<()> {
        let total = self.peers.len();
        if metadata.shard_order.len() != total {
            return Err(Error::InvalidArgument(format!(
                "shard order length {} does not match peer count {}",
                metadata.shard_order.len(),
                total
            )));
        }

        let geometry =
            StripeGeometry::compute(body_size, self.data_count, self.parity_count, self.shard_size);

        metadata.object_size = body_size;
        metadata.data_count = self.data_count;
        metadata.parity_count = self.parity_count;
        metadata.shard_size = self.shard_size;
        metadata.last_shard_size = geometry.last_shard_size;
        metadata.shard_count = geometry.stripe_count;

        let shard_object_size = geometry.shard_object_size();
        let shard_order = metadata.shard_order.clone();

        // Logical shard i streams to the peer at shard_order[i].
        let mut writers: Vec<Option<ShardWriter>> = Vec::with_capacity(total);
        let mut tasks: Vec<Option<JoinHandle<Result<()>>>> = Vec::with_capacity(total);

        for (shard_index, &peer_index) in shard_order.iter().enumerate() {
            let Some(peer) = self.peers[peer_index].clone() else {
                writers.push(None);
                tasks.push(None);
                continue;
            };

            let (pipe_writer, pipe_reader) = tokio::io::duplex(64 * 1024);
            writers.push(Some(Box::new(pipe_writer)));

            let (rid, bucket, object, version_id) = (
                request_id.to_string(),
                bucket.to_string(),
                object.to_string(),
                version_id.to_string(),
            );
            let mut info = metadata.clone();
            info.shard_index = shard_index;

            tasks.push(Some(tokio::spawn(async move {
                peer.put_object(
                    &rid,
                    &bucket,
                    &object,
                    &version_id,
                    Box::new(pipe_reader),
                    shard_object_size,
                    info,
                )
                .await
            })));
        }

        let encoder = StripeEncoder::new(self.data_count, self.parity_count, self.shard_size)?;
        let encode_result = encoder.copy_n(&mut writers, &mut body, body_size).await;
        drop(writers);

        let mut results: Vec<Result<()>> = Vec::with_capacity(total);
        for task in tasks {
            results.push(match task {
                Some(handle) => handle
                    .await
                    .unwrap_or_else(|err| Err(Error::Internal(err.to_string()))),
                None => Err(Error::PeerUnavailable),
            });
        }

        for (shard_index, result) in results.iter().enumerate() {
            if let Err(err) = result {
                debug!(peer = shard_order[shard_index], "shard stage failed: {}", err);
                self.peers[shard_order[shard_index]] = None;
            }
        }

        self.reduce(
            "put_object",
            &results,
            self.write_quorum,
            &[Error::BucketNotFound],
        )?;

        encode_result
    }

    pub async fn commit_put_object(
        &mut self,
        request_id: &str,
        bucket: &str,
        object: &str,
        version_id: &str,
    ) -> Result<()> {
        let results = self
            .fan_out(|_, peer| {
                let (rid, bucket, object, version) = (
                    request_id.to_string(),
                    bucket.to_string(),
                    object.to_string(),
                    version_id.to_string(),
                );
                async move { peer.commit_put_object(&rid, &bucket, &object, &version).await }
            })
            .await;

        self.reduce(
            "commit_put_object",
            &results,
            self.write_quorum,
            &[Error::BucketNotFound, Error::ObjectNotFound],
        )
    }

    pub async fn close_put_object(
        &mut self,
        request_id: &str,
        bucket: &str,
        object: &str,
        version_id: &str,
        undo: bool,
    ) -> Result<()> {
        let results = self
            .fan_out(|_, peer| {
                let (rid, bucket, object, version) = (
                    request_id.to_string(),
                    bucket.to_string(),
                    object.to_string(),
                    version_id.to_string(),
                );
                async move { peer.close_put_object(&rid, &bucket, &object, &version, undo).await }
            })
            .await;

        self.reduce("close_put_object", &results, self.write_quorum, &[])
    }

    pub async fn delete_object(
        &mut self,
        request_id: &str,
        bucket: &str,
        object: &str,
        version_id: &str,
    ) -> Result<()> {
        let results = self
            .fan_out(|_, peer| {
                let (rid, bucket, object, version) = (
                    request_id.to_string(),
                    bucket.to_string(),
                    object.to_string(),
                    version_id.to_string(),
                );
                async move { peer.delete_object(&rid, &bucket, &object, &version).await }
            })
            .await;

        self.reduce(
            "delete_object",
            &results,
            self.write_quorum,
            &[Error::BucketNotFound, Error::ObjectNotFound],
        )
    }

    pub async fn close_delete_object(
        &mut self,
        request_id: &str,
        bucket: &str,
        object: &str,
        version_id: &str,
        undo: bool,
    ) -> Result<()> {
        let results = self
            .fan_out(|_, peer| {
                let (rid, bucket, object, version) = (
                    request_id.to_string(),
                    bucket.to_string(),
                    object.to_string(),
                    version_id.to_string(),
                );
                async move {
                    peer.close_delete_object(&rid, &bucket, &object, &version, undo).await
                }
            })
            .await;

        self.reduce("close_delete_object", &results, self.write_quorum, &[])
    }

    /// Open one shard stream per peer over the given shard section. Slots of
    /// failed peers come back as `None`; the caller reorders them by the
    /// object's shard order before decoding.
    pub async fn open_object_shards(
        &mut self,
        bucket: &str,
        object: &str,
        version_id: &str,
        shard_offset: u64,
        shard_length: u64,
    ) -> Result<Vec<Option<ShardStream>>> {
        let results = self
            .fan_out(|_, peer| {
                let (bucket, object, version) =
                    (bucket.to_string(), object.to_string(), version_id.to_string());
                async move {
                    peer.get_object(&bucket, &object, &version, shard_offset, shard_length)
                        .await
                }
            })
            .await;

        self.reduce(
            "get_object",
            &results,
            self.read_quorum,
            &[Error::BucketNotFound, Error::ObjectNotFound],
        )?;

        Ok(results.into_iter().map(|r| r.ok()).collect())
    }

    pub async fn head_object(
        &mut self,
        bucket: &str,
        object: &str,
        version_id: &str,
    ) -> Result<ObjectInfo> {
        let results = self
            .fan_out(|_, peer| {
                let (bucket, object, version) =
                    (bucket.to_string(), object.to_string(), version_id.to_string());
                async move { peer.head_object(&bucket, &object, &version).await }
            })
            .await;

        self.reduce(
            "head_object",
            &results,
            self.read_quorum,
            &[Error::BucketNotFound, Error::ObjectNotFound],
        )?;

        let infos: Vec<&ObjectInfo> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
        best_match(&infos, ObjectInfo::semantic_eq, self.read_quorum)
            .cloned()
            .ok_or(Error::ReadQuorum)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_best_match_majority_wins() {
        let a1 = "alpha".to_string();
        let a2 = "alpha".to_string();
        let b = "beta".to_string();
        let items = vec![&a1, &b, &a2];

        let winner = best_match(&items, |x, y| x == y, 2).unwrap();
        assert_eq!(winner.as_str(), "alpha");
    }

    #[test]
    fn test_best_match_below_quorum() {
        let a = "alpha".to_string();
        let b = "beta".to_string();
        let items = vec![&a, &b];

        assert!(best_match(&items, |x, y| x == y, 2).is_none());
    }

    #[test]
    fn test_best_match_exact_quorum() {
        let a1 = "alpha".to_string();
        let a2 = "alpha".to_string();
        let items = vec![&a1, &a2];

        // A group of exactly read-quorum size is accepted.
        assert!(best_match(&items, |x, y| x == y, 2).is_some());
    }

    #[test]
    fn test_count_err_matches_discriminant() {
        let results: Vec<Result<()>> = vec![
            Err(Error::BucketNotFound),
            Err(Error::BucketNotFound),
            Err(Error::ObjectNotFound),
            Ok(()),
        ];

        assert_eq!(count_err(&results, &Error::BucketNotFound), 2);
        assert_eq!(count_err(&results, &Error::ObjectNotFound), 1);
        assert_eq!(count_err(&results, &Error::BucketNotEmpty), 0);
        assert_eq!(count_ok(&results), 1);
    }
}
