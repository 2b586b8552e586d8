//! Remote peers
//!
//! RPC client shims presenting the same `Backend` and `Locker` contracts as
//! the local implementations, so the quorum layers cannot tell a remote peer
//! from the local export.

use std::time::Duration;

use async_trait::async_trait;

use crate::backend::{Backend, BucketInfo, BucketListing, ObjectInfo, ShardStream};
use crate::error::{Error, Result};
use crate::nslock::Locker;

use super::{
    methods, BucketArgs, CloseBucketArgs, CloseObjectArgs, GetObjectArgs, HeadBucketArgs,
    HeadObjectArgs, LockArgs, ObjectArgs, PutObjectArgs, RpcClient, VoidReply,
    DEFAULT_RPC_TIMEOUT,
};

// =============================================================================
// Remote Disk
// =============================================================================

/// A peer's disk export, reached over RPC.
pub struct RemoteDisk {
    client: RpcClient,
}

impl RemoteDisk {
    pub fn new(service_url: impl Into<String>) -> Result<Self> {
        Self::with_timeout(service_url, DEFAULT_RPC_TIMEOUT)
    }

    pub fn with_timeout(service_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: RpcClient::new(service_url, timeout)?,
        })
    }
}

#[async_trait]
impl Backend for RemoteDisk {
    async fn put_bucket(&self, request_id: &str, bucket: &str) -> Result<()> {
        let _: VoidReply = self
            .client
            .call(
                methods::DISK_PUT_BUCKET,
                &BucketArgs {
                    request_id: request_id.to_string(),
                    bucket: bucket.to_string(),
                },
            )
            .await?;
        Ok(())
    }

    async fn close_put_bucket(&self, request_id: &str, bucket: &str, undo: bool) -> Result<()> {
        let _: VoidReply = self
            .client
            .call(
                methods::DISK_CLOSE_PUT_BUCKET,
                &CloseBucketArgs {
                    request_id: request_id.to_string(),
                    bucket: bucket.to_string(),
                    undo,
                },
            )
            .await?;
        Ok(())
    }

    async fn delete_bucket(&self, request_id: &str, bucket: &str) -> Result<()> {
        let _: VoidReply = self
            .client
            .call(
                methods::DISK_DELETE_BUCKET,
                &BucketArgs {
                    request_id: request_id.to_string(),
                    bucket: bucket.to_string(),
                },
            )
            .await?;
        Ok(())
    }

    async fn close_delete_bucket(&self, request_id: &str, bucket: &str, undo: bool) -> Result<()> {
        let _: VoidReply = self
            .client
            .call(
                methods::DISK_CLOSE_DELETE_BUCKET,
                &CloseBucketArgs {
                    request_id: request_id.to_string(),
                    bucket: bucket.to_string(),
                    undo,
                },
            )
            .await?;
        Ok(())
    }

    async fn head_bucket(&self, bucket: &str) -> Result<BucketInfo> {
        self.client
            .call(
                methods::DISK_HEAD_BUCKET,
                &HeadBucketArgs {
                    bucket: bucket.to_string(),
                },
            )
            .await
    }

    async fn get_bucket(
        &self,
        _bucket: &str,
        _prefix: &str,
        _start_after: &str,
        _max_keys: usize,
    ) -> Result<BucketListing> {
        // Listing is served by each node's own export.
        Err(Error::InvalidArgument("method unsupported".to_string()))
    }

    async fn put_object(
        &self,
        request_id: &str,
        bucket: &str,
        object: &str,
        version_id: &str,
        reader: ShardStream,
        reader_size: u64,
        metadata: ObjectInfo,
    ) -> Result<()> {
        let args = PutObjectArgs {
            request_id: request_id.to_string(),
            bucket: bucket.to_string(),
            object: object.to_string(),
            version_id: version_id.to_string(),
            reader_size,
            metadata,
        };

        let (_, _body): (VoidReply, ShardStream) = self
            .client
            .call_with(methods::DISK_PUT_OBJECT, &args, Some(reader))
            .await?;
        Ok(())
    }

    async fn commit_put_object(
        &self,
        request_id: &str,
        bucket: &str,
        object: &str,
        version_id: &str,
    ) -> Result<()> {
        let _: VoidReply = self
            .client
            .call(
                methods::DISK_COMMIT_PUT_OBJECT,
                &ObjectArgs {
                    request_id: request_id.to_string(),
                    bucket: bucket.to_string(),
                    object: object.to_string(),
                    version_id: version_id.to_string(),
                },
            )
            .await?;
        Ok(())
    }

    async fn close_put_object(
        &self,
        request_id: &str,
        bucket: &str,
        object: &str,
        version_id: &str,
        undo: bool,
    ) -> Result<()> {
        let _: VoidReply = self
            .client
            .call(
                methods::DISK_CLOSE_PUT_OBJECT,
                &CloseObjectArgs {
                    request_id: request_id.to_string(),
                    bucket: bucket.to_string(),
                    object: object.to_string(),
                    version_id: version_id.to_string(),
                    undo,
                },
            )
            .await?;
        Ok(())
    }

    async fn delete_object(
        &self,
        request_id: &str,
        bucket: &str,
        object: &str,
        version_id: &str,
    ) -> Result<()> {
        let _: VoidReply = self
            .client
            .call(
                methods::DISK_DELETE_OBJECT,
                &ObjectArgs {
                    request_id: request_id.to_string(),
                    bucket: bucket.to_string(),
                    object: object.to_string(),
                    version_id: version_id.to_string(),
                },
            )
            .await?;
        Ok(())
    }

    async fn close_delete_object(
        &self,
        request_id: &str,
        bucket: &str,
        object: &str,
        version_id: &str,
        undo: bool,
    ) -> Result<()> {
        let _: VoidReply = self
            .client
            .call(
                methods::DISK_CLOSE_DELETE_OBJECT,
                &CloseObjectArgs {
                    request_id: request_id.to_string(),
                    bucket: bucket.to_string(),
                    object: object.to_string(),
                    version_id: version_id.to_string(),
                    undo,
                },
            )
            .await?;
        Ok(())
    }

    async fn get_object(
        &self,
        bucket: &str,
        object: &str,
        version_id: &str,
        offset: u64,
        length: u64,
    ) -> Result<ShardStream> {
        let args = GetObjectArgs {
            bucket: bucket.to_string(),
            object: object.to_string(),
            version_id: version_id.to_string(),
            offset,
            length,
        };

        let (_, body): (VoidReply, ShardStream) = self
            .client
            .call_with(methods::DISK_GET_OBJECT, &args, None)
            .await?;
        Ok(body)
    }

    async fn head_object(
        &self,
        bucket: &str,
        object: &str,
        version_id: &str,
    ) -> Result<ObjectInfo> {
        self.client
            .call(
                methods::DISK_HEAD_OBJECT,
                &HeadObjectArgs {
                    bucket: bucket.to_string(),
                    object: object.to_string(),
                    version_id: version_id.to_string(),
                },
            )
            .await
    }
}

// =============================================================================
// Remote Locker
// =============================================================================

/// A peer's namespace locker, reached over RPC.
pub struct RemoteLocker {
    client: RpcClient,
}

impl RemoteLocker {
    pub fn new(service_url: impl Into<String>) -> Result<Self> {
        Self::with_timeout(service_url, DEFAULT_RPC_TIMEOUT)
    }

    pub fn with_timeout(service_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: RpcClient::new(service_url, timeout)?,
        })
    }

    fn args(request_id: &str, bucket: &str, object: &str) -> LockArgs {
        LockArgs {
            request_id: request_id.to_string(),
            bucket: bucket.to_string(),
            object: object.to_string(),
        }
    }
}

#[async_trait]
impl Locker for RemoteLocker {
    async fn lock(&self, request_id: &str, bucket: &str, object: &str) -> Result<()> {
        let _: VoidReply = self
            .client
            .call(methods::LOCK, &Self::args(request_id, bucket, object))
            .await?;
        Ok(())
    }

    async fn rlock(&self, request_id: &str, bucket: &str, object: &str) -> Result<()> {
        let _: VoidReply = self
            .client
            .call(methods::RLOCK, &Self::args(request_id, bucket, object))
            .await?;
        Ok(())
    }

    async fn unlock(&self, request_id: &str, bucket: &str, object: &str) -> Result<()> {
        let _: VoidReply = self
            .client
            .call(methods::UNLOCK, &Self::args(request_id, bucket, object))
            .await?;
        Ok(())
    }

    async fn runlock(&self, request_id: &str, bucket: &str, object: &str) -> Result<()> {
        let _: VoidReply = self
            .client
            .call(methods::RUNLOCK, &Self::args(request_id, bucket, object))
            .await?;
        Ok(())
    }
}
