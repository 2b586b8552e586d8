//! Backend contract
//!
//! The capability set shared by every peer: the local disk export and the
//! remote RPC client present the same operations, so the quorum dispatcher
//! fans out without caring where a peer lives. Tests substitute mock
//! implementations for failed peers.

pub mod disk;
pub mod quorum;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncRead;

use crate::error::Result;

pub use disk::Disk;
pub use quorum::QuorumBackend;

/// A streaming shard body, on either side of an operation.
pub type ShardStream = Box<dyn AsyncRead + Send + Unpin>;

// =============================================================================
// Bucket / Object Metadata
// =============================================================================

/// Per-bucket attributes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BucketInfo {
    pub name: String,
    pub mod_time: DateTime<Utc>,
}

impl BucketInfo {
    /// Component-wise equality excluding timestamps; used for best-match
    /// grouping across peers.
    pub fn semantic_eq(&self, other: &BucketInfo) -> bool {
        self.name == other.name
    }
}

/// Per-shard object metadata, stored as `meta.json` on every peer.
///
/// Replicas differ only in `shard_index`; everything else must agree across
/// the cluster for a read to be trusted.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectInfo {
    pub bucket_name: String,
    pub object_name: String,
    #[serde(rename = "objectVersionId")]
    pub object_version_id: String,
    #[serde(rename = "objectDataId")]
    pub object_data_id: String,
    pub object_size: u64,
    pub data_count: usize,
    pub parity_count: usize,
    pub shard_size: usize,
    pub last_shard_size: usize,
    pub shard_count: usize,
    pub shard_order: Vec<usize>,
    pub shard_index: usize,
}

impl ObjectInfo {
    /// Component-wise equality excluding the per-peer shard index.
    pub fn semantic_eq(&self, other: &ObjectInfo) -> bool {
        self.bucket_name == other.bucket_name
            && self.object_name == other.object_name
            && self.object_version_id == other.object_version_id
            && self.object_data_id == other.object_data_id
            && self.object_size == other.object_size
            && self.data_count == other.data_count
            && self.parity_count == other.parity_count
            && self.shard_size == other.shard_size
            && self.last_shard_size == other.last_shard_size
            && self.shard_count == other.shard_count
            && self.shard_order == other.shard_order
    }
}

/// One page of a bucket listing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BucketListing {
    pub keys: Vec<String>,
    pub common_prefixes: Vec<String>,
    pub next_marker: Option<String>,
}

// =============================================================================
// Backend Trait
// =============================================================================

/// The peer storage contract.
///
/// Mutations are two-phase: the primary method stages or applies the change
/// under the request id, and the matching `close_*` method commits the
/// cleanup or, with `undo`, reverses what the primary did. Close methods are
/// best-effort and must be idempotent per request id.
#[async_trait]
pub trait Backend: Send + Sync {
    async fn put_bucket(&self, request_id: &str, bucket: &str) -> Result<()>;
    async fn close_put_bucket(&self, request_id: &str, bucket: &str, undo: bool) -> Result<()>;

    async fn delete_bucket(&self, request_id: &str, bucket: &str) -> Result<()>;
    async fn close_delete_bucket(&self, request_id: &str, bucket: &str, undo: bool) -> Result<()>;

    async fn head_bucket(&self, bucket: &str) -> Result<BucketInfo>;

    async fn get_bucket(
        &self,
        bucket: &str,
        prefix: &str,
        start_after: &str,
        max_keys: usize,
    ) -> Result<BucketListing>;

    #[allow(clippy::too_many_arguments)]
    async fn put_object(
        &self,
        request_id: &str,
        bucket: &str,
        object: &str,
        version_id: &str,
        reader: ShardStream,
        reader_size: u64,
        metadata: ObjectInfo,
    ) -> Result<()>;

    async fn commit_put_object(
        &self,
        request_id: &str,
        bucket: &str,
        object: &str,
        version_id: &str,
    ) -> Result<()>;

    async fn close_put_object(
        &self,
        request_id: &str,
        bucket: &str,
        object: &str,
        version_id: &str,
        undo: bool,
    ) -> Result<()>;

    async fn delete_object(
        &self,
        request_id: &str,
        bucket: &str,
        object: &str,
        version_id: &str,
    ) -> Result<()>;

    async fn close_delete_object(
        &self,
        request_id: &str,
        bucket: &str,
        object: &str,
        version_id: &str,
        undo: bool,
    ) -> Result<()>;

    async fn get_object(
        &self,
        bucket: &str,
        object: &str,
        version_id: &str,
        offset: u64,
        length: u64,
    ) -> Result<ShardStream>;

    async fn head_object(&self, bucket: &str, object: &str, version_id: &str)
        -> Result<ObjectInfo>;
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_info(shard_index: usize) -> ObjectInfo {
        ObjectInfo {
            bucket_name: "b".to_string(),
            object_name: "o".to_string(),
            object_version_id: String::new(),
            object_data_id: "rid-1".to_string(),
            object_size: 100,
            data_count: 2,
            parity_count: 2,
            shard_size: 512,
            last_shard_size: 50,
            shard_count: 1,
            shard_order: vec![2, 0, 3, 1],
            shard_index,
        }
    }

    #[test]
    fn test_semantic_eq_ignores_shard_index() {
        let a = sample_info(0);
        let b = sample_info(3);
        assert!(a.semantic_eq(&b));
    }

    #[test]
    fn test_semantic_eq_detects_divergence() {
        let a = sample_info(0);
        let mut b = sample_info(0);
        b.object_size = 101;
        assert!(!a.semantic_eq(&b));

        let mut c = sample_info(0);
        c.shard_order = vec![0, 1, 2, 3];
        assert!(!a.semantic_eq(&c));
    }

    #[test]
    fn test_object_info_json_field_names() {
        let info = sample_info(1);
        let json = serde_json::to_value(&info).unwrap();
        for field in [
            "bucketName",
            "objectName",
            "objectVersionId",
            "objectDataId",
            "objectSize",
            "dataCount",
            "parityCount",
            "shardSize",
            "lastShardSize",
            "shardCount",
            "shardOrder",
            "shardIndex",
        ] {
            assert!(json.get(field).is_some(), "missing field {}", field);
        }
    }
}
