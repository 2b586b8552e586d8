//! RPC servers
//!
//! Method dispatch for the two peer services: the disk backend at `/_` and
//! the namespace locker at `/_/lock`. Each serves one call per request:
//! decode the call frame, validate auth, execute against the local
//! implementation, and answer with a response frame plus an optional body
//! stream. Failures travel back inside the frame as wire errors, so the
//! HTTP status stays 200 for every understood call.

use std::sync::Arc;

use tracing::debug;

use crate::backend::{Backend, Disk, ShardStream};
use crate::error::Result;
use crate::nslock::{Locker, NsLocker};

use super::{
    decode_args, encode_frame, encode_reply, methods, read_frame, BucketArgs, CallRequest,
    CallResponse, CloseBucketArgs, CloseObjectArgs, Envelope, GetObjectArgs, HeadBucketArgs,
    HeadObjectArgs, LockArgs, ObjectArgs, PutObjectArgs, VoidReply,
};

/// One serviced call: the encoded response frame and an optional body
/// stream to append after it.
pub struct RpcReply {
    pub frame: Vec<u8>,
    pub body: Option<ShardStream>,
}

fn reply_ok(reply_bytes: Vec<u8>, body: Option<ShardStream>) -> RpcReply {
    let frame = encode_frame(&CallResponse {
        reply: reply_bytes,
        error: None,
    })
    .unwrap_or_default();
    RpcReply { frame, body }
}

fn reply_err(err: &crate::error::Error) -> RpcReply {
    debug!("rpc call failed: {}", err);
    let frame = encode_frame(&CallResponse {
        reply: Vec::new(),
        error: Some(err.into()),
    })
    .unwrap_or_default();
    RpcReply { frame, body: None }
}

// =============================================================================
// Disk Service
// =============================================================================

/// Serves the local disk backend to remote peers.
pub struct DiskRpcServer {
    disk: Arc<Disk>,
}

impl DiskRpcServer {
    pub fn new(disk: Arc<Disk>) -> Self {
        Self { disk }
    }

    /// Service one call whose frame and payload arrive on `body`.
    pub async fn serve(&self, body: ShardStream) -> RpcReply {
        match self.dispatch(body).await {
            Ok(reply) => reply,
            Err(err) => reply_err(&err),
        }
    }

    async fn dispatch(&self, mut body: ShardStream) -> Result<RpcReply> {
        let request: CallRequest = read_frame(&mut body).await?;

        match request.method.as_str() {
            methods::DISK_PUT_BUCKET => {
                let env: Envelope<BucketArgs> = decode_args(&request.args)?;
                env.auth.validate()?;
                self.disk.put_bucket(&env.args.request_id, &env.args.bucket).await?;
                Ok(reply_ok(encode_reply(&VoidReply)?, None))
            }
            methods::DISK_CLOSE_PUT_BUCKET => {
                let env: Envelope<CloseBucketArgs> = decode_args(&request.args)?;
                env.auth.validate()?;
                self.disk
                    .close_put_bucket(&env.args.request_id, &env.args.bucket, env.args.undo)
                    .await?;
                Ok(reply_ok(encode_reply(&VoidReply)?, None))
            }
            methods::DISK_DELETE_BUCKET => {
                let env: Envelope<BucketArgs> = decode_args(&request.args)?;
                env.auth.validate()?;
                self.disk
                    .delete_bucket(&env.args.request_id, &env.args.bucket)
                    .await?;
                Ok(reply_ok(encode_reply(&VoidReply)?, None))
            }
            methods::DISK_CLOSE_DELETE_BUCKET => {
                let env: Envelope<CloseBucketArgs> = decode_args(&request.args)?;
                env.auth.validate()?;
                self.disk
                    .close_delete_bucket(&env.args.request_id, &env.args.bucket, env.args.undo)
                    .await?;
                Ok(reply_ok(encode_reply(&VoidReply)?, None))
            }
            methods::DISK_HEAD_BUCKET => {
                let env: Envelope<HeadBucketArgs> = decode_args(&request.args)?;
                env.auth.validate()?;
                let info = self.disk.head_bucket(&env.args.bucket).await?;
                Ok(reply_ok(encode_reply(&info)?, None))
            }
            methods::DISK_PUT_OBJECT => {
                let env: Envelope<PutObjectArgs> = decode_args(&request.args)?;
                env.auth.validate()?;
                // The rest of the request body is the shard stream.
                self.disk
                    .put_object(
                        &env.args.request_id,
                        &env.args.bucket,
                        &env.args.object,
                        &env.args.version_id,
                        body,
                        env.args.reader_size,
                        env.args.metadata,
                    )
                    .await?;
                Ok(reply_ok(encode_reply(&VoidReply)?, None))
            }
            methods::DISK_COMMIT_PUT_OBJECT => {
                let env: Envelope<ObjectArgs> = decode_args(&request.args)?;
                env.auth.validate()?;
                self.disk
                    .commit_put_object(
                        &env.args.request_id,
                        &env.args.bucket,
                        &env.args.object,
                        &env.args.version_id,
                    )
                    .await?;
                Ok(reply_ok(encode_reply(&VoidReply)?, None))
            }
            methods::DISK_CLOSE_PUT_OBJECT => {
                let env: Envelope<CloseObjectArgs> = decode_args(&request.args)?;
                env.auth.validate()?;
                self.disk
                    .close_put_object(
                        &env.args.request_id,
                        &env.args.bucket,
                        &env.args.object,
                        &env.args.version_id,
                        env.args.undo,
                    )
                    .await?;
                Ok(reply_ok(encode_reply(&VoidReply)?, None))
            }
            methods::DISK_DELETE_OBJECT => {
                let env: Envelope<ObjectArgs> = decode_args(&request.args)?;
                env.auth.validate()?;
                self.disk
                    .delete_object(
                        &env.args.request_id,
                        &env.args.bucket,
                        &env.args.object,
                        &env.args.version_id,
                    )
                    .await?;
                Ok(reply_ok(encode_reply(&VoidReply)?, None))
            }
            methods::DISK_CLOSE_DELETE_OBJECT => {
                let env: Envelope<CloseObjectArgs> = decode_args(&request.args)?;
                env.auth.validate()?;
                self.disk
                    .close_delete_object(
                        &env.args.request_id,
                        &env.args.bucket,
                        &env.args.object,
                        &env.args.version_id,
                        env.args.undo,
                    )
                    .await?;
                Ok(reply_ok(encode_reply(&VoidReply)?, None))
            }
            methods::DISK_GET_OBJECT => {
                let env: Envelope<GetObjectArgs> = decode_args(&request.args)?;
                env.auth.validate()?;
                let stream = self
                    .disk
                    .get_object(
                        &env.args.bucket,
                        &env.args.object,
                        &env.args.version_id,
                        env.args.offset,
                        env.args.length,
                    )
                    .await?;
                Ok(reply_ok(encode_reply(&VoidReply)?, Some(stream)))
            }
            methods::DISK_HEAD_OBJECT => {
                let env: Envelope<HeadObjectArgs> = decode_args(&request.args)?;
                env.auth.validate()?;
                let info = self
                    .disk
                    .head_object(&env.args.bucket, &env.args.object, &env.args.version_id)
                    .await?;
                Ok(reply_ok(encode_reply(&info)?, None))
            }
            other => Err(crate::error::Error::Rpc(format!("unknown method {}", other))),
        }
    }
}

// =============================================================================
// Lock Service
// =============================================================================

/// Serves the local namespace locker to remote peers.
pub struct LockRpcServer {
    locker: Arc<NsLocker>,
}

impl LockRpcServer {
    pub fn new(locker: Arc<NsLocker>) -> Self {
        Self { locker }
    }

    pub async fn serve(&self, body: ShardStream) -> RpcReply {
        match self.dispatch(body).await {
            Ok(reply) => reply,
            Err(err) => reply_err(&err),
        }
    }

    async fn dispatch(&self, mut body: ShardStream) -> Result<RpcReply> {
        let request: CallRequest = read_frame(&mut body).await?;
        let env: Envelope<LockArgs> = decode_args(&request.args)?;
        env.auth.validate()?;

        let (rid, bucket, object) = (&env.args.request_id, &env.args.bucket, &env.args.object);
        match request.method.as_str() {
            methods::LOCK => self.locker.lock(rid, bucket, object).await?,
            methods::RLOCK => self.locker.rlock(rid, bucket, object).await?,
            methods::UNLOCK => self.locker.unlock(rid, bucket, object).await?,
            methods::RUNLOCK => self.locker.runlock(rid, bucket, object).await?,
            other => {
                return Err(crate::error::Error::Rpc(format!("unknown method {}", other)));
            }
        }

        Ok(reply_ok(encode_reply(&VoidReply)?, None))
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::WireError;
    use crate::rpc::{encode_args, CallResponse};

    fn frame_for<T: serde::Serialize>(method: &str, args: &T) -> Vec<u8> {
        encode_frame(&CallRequest {
            method: method.to_string(),
            args: encode_args(args).unwrap(),
        })
        .unwrap()
    }

    async fn decode_response(reply: &RpcReply) -> CallResponse {
        let mut reader = reply.frame.as_slice();
        read_frame(&mut reader).await.unwrap()
    }

    #[tokio::test]
    async fn test_disk_rpc_put_and_head_bucket() {
        let dir = tempfile::tempdir().unwrap();
        let disk = Disk::create(dir.path()).await.unwrap();
        let server = DiskRpcServer::new(disk);

        let wire = frame_for(
            methods::DISK_PUT_BUCKET,
            &BucketArgs {
                request_id: "rid-1".to_string(),
                bucket: "b".to_string(),
            },
        );
        let reply = server.serve(Box::new(std::io::Cursor::new(wire))).await;
        let response = decode_response(&reply).await;
        assert!(response.error.is_none());

        let wire = frame_for(
            methods::DISK_HEAD_BUCKET,
            &HeadBucketArgs {
                bucket: "b".to_string(),
            },
        );
        let reply = server.serve(Box::new(std::io::Cursor::new(wire))).await;
        let response = decode_response(&reply).await;
        assert!(response.error.is_none());
        let info: crate::backend::BucketInfo = crate::rpc::decode_reply(&response.reply).unwrap();
        assert_eq!(info.name, "b");
    }

    #[tokio::test]
    async fn test_disk_rpc_semantic_error_tag() {
        let dir = tempfile::tempdir().unwrap();
        let disk = Disk::create(dir.path()).await.unwrap();
        let server = DiskRpcServer::new(disk);

        let wire = frame_for(
            methods::DISK_HEAD_BUCKET,
            &HeadBucketArgs {
                bucket: "ghost".to_string(),
            },
        );
        let reply = server.serve(Box::new(std::io::Cursor::new(wire))).await;
        let response = decode_response(&reply).await;
        assert!(matches!(response.error, Some(WireError::BucketNotFound)));
    }

    #[tokio::test]
    async fn test_lock_rpc_round_trip() {
        let locker = NsLocker::new();
        let server = LockRpcServer::new(locker.clone());

        let args = LockArgs {
            request_id: "rid-1".to_string(),
            bucket: "b".to_string(),
            object: "o".to_string(),
        };

        let reply = server
            .serve(Box::new(std::io::Cursor::new(frame_for(methods::LOCK, &args))))
            .await;
        assert!(decode_response(&reply).await.error.is_none());
        assert_eq!(locker.entry_count(), 1);

        let reply = server
            .serve(Box::new(std::io::Cursor::new(frame_for(methods::UNLOCK, &args))))
            .await;
        assert!(decode_response(&reply).await.error.is_none());
        assert_eq!(locker.entry_count(), 0);
    }

    #[tokio::test]
    async fn test_unknown_method_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let disk = Disk::create(dir.path()).await.unwrap();
        let server = DiskRpcServer::new(disk);

        let wire = frame_for(
            "Disk.Nope",
            &HeadBucketArgs {
                bucket: "b".to_string(),
            },
        );
        let reply = server.serve(Box::new(std::io::Cursor::new(wire))).await;
        let response = decode_response(&reply).await;
        assert!(matches!(response.error, Some(WireError::Message(_))));
    }
}
