//! Peer RPC
//!
//! One HTTP POST carries a full duplex exchange: a length-prefixed binary
//! call frame, optionally followed by a payload stream, answered by a
//! length-prefixed response frame and an optional body stream. Errors cross
//! the wire as typed tags, never as matched strings.
//!
//! Every call carries authentication arguments: the client's UTC timestamp
//! (rejected beyond 15 minutes of skew) and the RPC semantic version
//! (rejected unless it matches exactly).

pub mod client;
pub mod remote;
pub mod server;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{Error, Result, WireError};

pub use client::RpcClient;
pub use remote::{RemoteDisk, RemoteLocker};
pub use server::{DiskRpcServer, LockRpcServer};

/// Default RPC timeout: one minute.
pub const DEFAULT_RPC_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(60);

/// Maximum accepted clock skew between peers.
pub const DEFAULT_SKEW_SECS: i64 = 15 * 60;

/// Frames larger than this are rejected outright.
const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

// =============================================================================
// Versioning / Authentication
// =============================================================================

/// RPC semantic version, per semver 2.0.0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcVersion {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
}

/// The version spoken by this build.
pub const RPC_API_VERSION: RpcVersion = RpcVersion {
    major: 1,
    minor: 0,
    patch: 0,
};

impl std::fmt::Display for RpcVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Authentication arguments attached to every call.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AuthArgs {
    pub request_time: DateTime<Utc>,
    pub version: RpcVersion,
}

impl AuthArgs {
    pub fn now() -> Self {
        Self {
            request_time: Utc::now(),
            version: RPC_API_VERSION,
        }
    }

    /// Server-side validation: skew within bounds, version exact.
    pub fn validate(&self) -> Result<()> {
        let now = Utc::now();
        let skew = (self.request_time - now).num_seconds().abs();
        if skew > DEFAULT_SKEW_SECS {
            return Err(Error::Auth(format!(
                "client time {} is too far apart from server time {}",
                self.request_time, now
            )));
        }

        if self.version != RPC_API_VERSION {
            return Err(Error::Auth(format!(
                "version mismatch; expected: {}, received: {}",
                RPC_API_VERSION, self.version
            )));
        }

        Ok(())
    }
}

// =============================================================================
// Frames
// =============================================================================

/// The leading frame of a request.
#[derive(Debug, Serialize, Deserialize)]
pub struct CallRequest {
    pub method: String,
    pub args: Vec<u8>,
}

/// The leading frame of a response.
#[derive(Debug, Serialize, Deserialize)]
pub struct CallResponse {
    pub reply: Vec<u8>,
    pub error: Option<WireError>,
}

/// Authenticated wrapper around method-specific arguments.
#[derive(Debug, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub auth: AuthArgs,
    pub args: T,
}

/// Empty reply for methods returning nothing.
#[derive(Debug, Serialize, Deserialize)]
pub struct VoidReply;

/// Serialize a frame value with a little-endian u32 length prefix.
pub fn encode_frame<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    let body = bincode::serialize(value).map_err(|e| Error::Rpc(e.to_string()))?;
    let mut out = Vec::with_capacity(4 + body.len());
    out.extend_from_slice(&(body.len() as u32).to_le_bytes());
    out.extend_from_slice(&body);
    Ok(out)
}

/// Read one length-prefixed frame from the stream.
pub async fn read_frame<R, T>(reader: &mut R) -> Result<T>
where
    R: AsyncRead + Unpin + ?Sized,
    T: DeserializeOwned,
{
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf).await?;
    let len = u32::from_le_bytes(len_buf) as usize;
    if len > MAX_FRAME_LEN {
        return Err(Error::Rpc(format!("frame length {} exceeds limit", len)));
    }

    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf).await?;
    bincode::deserialize(&buf).map_err(|e| Error::Rpc(e.to_string()))
}

pub fn encode_args<T: Serialize>(args: &T) -> Result<Vec<u8>> {
    let envelope = Envelope {
        auth: AuthArgs::now(),
        args,
    };
    bincode::serialize(&envelope).map_err(|e| Error::Rpc(e.to_string()))
}

pub fn decode_args<T: DeserializeOwned>(raw: &[u8]) -> Result<Envelope<T>> {
    bincode::deserialize(raw).map_err(|e| Error::Rpc(e.to_string()))
}

pub fn encode_reply<T: Serialize>(reply: &T) -> Result<Vec<u8>> {
    bincode::serialize(reply).map_err(|e| Error::Rpc(e.to_string()))
}

pub fn decode_reply<T: DeserializeOwned>(raw: &[u8]) -> Result<T> {
    bincode::deserialize(raw).map_err(|e| Error::Rpc(e.to_string()))
}

// =============================================================================
// Method Names
// =============================================================================

pub mod methods {
    pub const DISK_DELETE_BUCKET: &str = "Disk.DeleteBucket";
    pub const DISK_CLOSE_DELETE_BUCKET: &str = "Disk.CloseDeleteBucket";
    pub const DISK_HEAD_BUCKET: &str = "Disk.HeadBucket";
    pub const DISK_PUT_BUCKET: &str = "Disk.PutBucket";
    pub const DISK_CLOSE_PUT_BUCKET: &str = "Disk.ClosePutBucket";
    pub const DISK_DELETE_OBJECT: &str = "Disk.DeleteObject";
    pub const DISK_CLOSE_DELETE_OBJECT: &str = "Disk.CloseDeleteObject";
    pub const DISK_GET_OBJECT: &str = "Disk.GetObject";
    pub const DISK_HEAD_OBJECT: &str = "Disk.HeadObject";
    pub const DISK_PUT_OBJECT: &str = "Disk.PutObject";
    pub const DISK_COMMIT_PUT_OBJECT: &str = "Disk.CommitPutObject";
    pub const DISK_CLOSE_PUT_OBJECT: &str = "Disk.ClosePutObject";

    pub const LOCK: &str = "NSLocker.Lock";
    pub const RLOCK: &str = "NSLocker.RLock";
    pub const UNLOCK: &str = "NSLocker.Unlock";
    pub const RUNLOCK: &str = "NSLocker.RUnlock";
}

// =============================================================================
// Method Arguments
// =============================================================================

use crate::backend::ObjectInfo;

#[derive(Debug, Serialize, Deserialize)]
pub struct BucketArgs {
    pub request_id: String,
    pub bucket: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CloseBucketArgs {
    pub request_id: String,
    pub bucket: String,
    pub undo: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HeadBucketArgs {
    pub bucket: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ObjectArgs {
    pub request_id: String,
    pub bucket: String,
    pub object: String,
    pub version_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CloseObjectArgs {
    pub request_id: String,
    pub bucket: String,
    pub object: String,
    pub version_id: String,
    pub undo: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct GetObjectArgs {
    pub bucket: String,
    pub object: String,
    pub version_id: String,
    pub offset: u64,
    pub length: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HeadObjectArgs {
    pub bucket: String,
    pub object: String,
    pub version_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PutObjectArgs {
    pub request_id: String,
    pub bucket: String,
    pub object: String,
    pub version_id: String,
    pub reader_size: u64,
    pub metadata: ObjectInfo,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LockArgs {
    pub request_id: String,
    pub bucket: String,
    pub object: String,
}

// =============================================================================
// Tests
// =============================================================================
