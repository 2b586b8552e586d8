//! StripeStor - Distributed Erasure-Coded Object Storage
//!
//! An S3-style object storage backend that persists each object as a
//! Reed-Solomon erasure-coded stripe across N peer nodes, with quorum-based
//! coordination, two-phase commit of mutations, and a quorum-replicated
//! namespace lock.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                              One Node                                    │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │  ┌──────────────┐     ┌─────────────────┐     ┌─────────────────────┐   │
//! │  │ HTTP surface │────▶│  Object handler │────▶│  Quorum dispatcher  │   │
//! │  │ (S3 subset)  │     │ lock→io→commit  │     │  + cluster locker   │   │
//! │  └──────────────┘     └─────────────────┘     └──────────┬──────────┘   │
//! │         │                                                │              │
//! │  ┌──────┴───────┐                      ┌─────────────────┼───────────┐  │
//! │  │  Peer RPC    │                      │ local Disk      │ RemoteDisk │  │
//! │  │  /_ /_/lock  │                      │ (block codec +  │ (RPC shim) │  │
//! │  └──────────────┘                      │  data store)    │  × N-1     │  │
//! │                                        └─────────────────┴───────────┘  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`backend`] - Peer contract, local disk store, quorum dispatcher
//! - [`blockio`] - Checksum-verified block files
//! - [`config`] - CLI arguments and cluster setup
//! - [`datastore`] - Id-keyed shard data store
//! - [`erasure`] - Stripe geometry and streaming Reed-Solomon codec
//! - [`error`] - Error types
//! - [`handler`] - Per-request orchestration
//! - [`http`] - S3-subset surface plus peer RPC endpoints
//! - [`metrics`] - Prometheus counters
//! - [`nslock`] - Per-peer and cluster-wide namespace locks
//! - [`rpc`] - Peer RPC framing, client, servers, remote shims

pub mod backend;
pub mod blockio;
pub mod config;
pub mod datastore;
pub mod erasure;
pub mod error;
pub mod handler;
pub mod hash;
pub mod http;
pub mod metrics;
pub mod nslock;
pub mod rpc;

// Re-export commonly used types
pub use backend::{Backend, BucketInfo, BucketListing, Disk, ObjectInfo, QuorumBackend};
pub use config::{Args, Setup};
pub use error::{Error, Result};
pub use handler::StoreHandler;
pub use http::{Cluster, Server};
pub use nslock::{ClusterLocker, Locker, NsLocker};
