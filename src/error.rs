//! Error types for StripeStor

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in StripeStor
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Namespace Errors
    // =========================================================================
    /// Bucket already exists
    #[error("bucket already exists")]
    BucketAlreadyExists,

    /// Bucket is not empty
    #[error("bucket not empty")]
    BucketNotEmpty,

    /// Bucket not found
    #[error("bucket not found")]
    BucketNotFound,

    /// Object not found
    #[error("object not found")]
    ObjectNotFound,

    // =========================================================================
    // Quorum Errors
    // =========================================================================
    /// Not enough peers answered a read
    #[error("read quorum not met")]
    ReadQuorum,

    /// Not enough peers acknowledged a write
    #[error("write quorum not met")]
    WriteQuorum,

    /// Peer was marked unavailable earlier in this request
    #[error("peer unavailable")]
    PeerUnavailable,

    // =========================================================================
    // Integrity Errors
    // =========================================================================
    /// Block checksum did not match
    #[error("checksum mismatch; expected: {expected}, got: {got}")]
    ChecksumMismatch { expected: String, got: String },

    /// Too many shard streams failed within one stripe
    #[error("too many failed shards: {failed} of {total}")]
    CorruptedShards { failed: usize, total: usize },

    /// Fewer healthy shards than data shards
    #[error("insufficient shards for reconstruction: have {available}, need {required}")]
    InsufficientShards { available: usize, required: usize },

    // =========================================================================
    // Data Store Errors
    // =========================================================================
    /// Data entry is held open by active readers
    #[error("data in use")]
    DataInUse,

    /// Data entry already exists under this id
    #[error("data already exists")]
    DataAlreadyExists,

    /// Data entry not found
    #[error("data not found")]
    DataNotFound,

    /// Requested section is beyond the stored data length
    #[error("requested length from offset is beyond file size")]
    OutOfRange,

    // =========================================================================
    // Transport Errors
    // =========================================================================
    /// Network-level RPC failure
    #[error("rpc transport error: {0}")]
    Transport(String),

    /// RPC call rejected or failed remotely
    #[error("rpc call failed: {0}")]
    Rpc(String),

    /// Peer is in its network-error backoff window
    #[error("rpc retry pending")]
    RetryPending,

    /// RPC authentication rejected (clock skew or version mismatch)
    #[error("authentication error: {0}")]
    Auth(String),

    // =========================================================================
    // Request / Configuration Errors
    // =========================================================================
    /// Invalid request argument
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Invalid erasure or cluster configuration
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Unknown checksum algorithm name
    #[error("unknown algorithm: {0}")]
    UnknownAlgorithm(String),

    // =========================================================================
    // Wrapped Errors
    // =========================================================================
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Metadata encoding error
    #[error("metadata error: {0}")]
    Json(#[from] serde_json::Error),

    /// Internal error
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// True for the namespace errors that map to 404/409 rather than 500.
    pub fn is_semantic(&self) -> bool {
        matches!(
            self,
            Error::BucketAlreadyExists
                | Error::BucketNotEmpty
                | Error::BucketNotFound
                | Error::ObjectNotFound
        )
    }
}

// =============================================================================
// Wire Errors
// =============================================================================

/// Typed error tags carried across peer RPC.
///
/// The known namespace errors survive the wire as variants so the client can
/// restore the exact local error; anything else collapses to `Message`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum WireError {
    BucketAlreadyExists,
    BucketNotEmpty,
    BucketNotFound,
    ObjectNotFound,
    DataNotFound,
    OutOfRange,
    Auth(String),
    Message(String),
}

impl From<&Error> for WireError {
    fn from(err: &Error) -> Self {
        match err {
            Error::BucketAlreadyExists => WireError::BucketAlreadyExists,
            Error::BucketNotEmpty => WireError::BucketNotEmpty,
            Error::BucketNotFound => WireError::BucketNotFound,
            Error::ObjectNotFound => WireError::ObjectNotFound,
            Error::DataNotFound => WireError::DataNotFound,
            Error::OutOfRange => WireError::OutOfRange,
            Error::Auth(msg) => WireError::Auth(msg.clone()),
            other => WireError::Message(other.to_string()),
        }
    }
}

impl From<WireError> for Error {
    fn from(err: WireError) -> Self {
        match err {
            WireError::BucketAlreadyExists => Error::BucketAlreadyExists,
            WireError::BucketNotEmpty => Error::BucketNotEmpty,
            WireError::BucketNotFound => Error::BucketNotFound,
            WireError::ObjectNotFound => Error::ObjectNotFound,
            WireError::DataNotFound => Error::DataNotFound,
            WireError::OutOfRange => Error::OutOfRange,
            WireError::Auth(msg) => Error::Auth(msg),
            WireError::Message(msg) => Error::Rpc(msg),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_semantic_errors() {
        assert!(Error::BucketNotFound.is_semantic());
        assert!(Error::BucketAlreadyExists.is_semantic());
        assert!(Error::BucketNotEmpty.is_semantic());
        assert!(Error::ObjectNotFound.is_semantic());
        assert!(!Error::ReadQuorum.is_semantic());
        assert!(!Error::WriteQuorum.is_semantic());
    }

    #[test]
    fn test_wire_error_round_trip() {
        let original = Error::BucketNotFound;
        let wire = WireError::from(&original);
        let restored = Error::from(wire);
        assert!(matches!(restored, Error::BucketNotFound));
    }

    #[test]
    fn test_wire_error_unknown_collapses_to_message() {
        let original = Error::Internal("boom".to_string());
        let wire = WireError::from(&original);
        let restored = Error::from(wire);
        assert!(matches!(restored, Error::Rpc(_)));
    }
}
