//! Cluster setup
//!
//! CLI arguments, endpoint parsing, and the derived erasure geometry. Every
//! peer must be launched with the same endpoint list; the local index picks
//! which endpoint is this process, and that endpoint's path is the local
//! export directory.

use std::path::PathBuf;

use clap::Parser;

use crate::error::{Error, Result};

/// Default erasure block size: exactly 10,450,440 bytes, approximately
/// 9.97 MiB. 360360 is divisible by every number between 1 and 15, so the
/// block splits evenly for any supported data-shard count.
pub const DEFAULT_ERASURE_BLOCK_SIZE: usize = 360360 * 29;

/// Per-shard slice of the default block for a given data-shard count.
pub fn default_shard_size(data_count: usize) -> usize {
    DEFAULT_ERASURE_BLOCK_SIZE / data_count
}

// =============================================================================
// CLI Arguments
// =============================================================================

/// StripeStor - distributed erasure-coded object storage
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Index of this node in the endpoint list (0-based)
    pub local_index: usize,

    /// Peer endpoints, e.g. http://node1:9000/mnt/d1; same list on every
    /// node
    #[arg(required = true, num_args = 1..)]
    pub endpoints: Vec<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    pub log_json: bool,
}

// =============================================================================
// Endpoints
// =============================================================================

/// One peer address: scheme, host, port, and export path.
#[derive(Debug, Clone)]
pub struct Endpoint {
    pub scheme: String,
    pub host: String,
    pub port: u16,
    pub path: String,
}

impl Endpoint {
    pub fn parse(raw: &str) -> Result<Self> {
        let (scheme, rest) = if let Some(rest) = raw.strip_prefix("https://") {
            ("https", rest)
        } else if let Some(rest) = raw.strip_prefix("http://") {
            ("http", rest)
        } else {
            return Err(Error::InvalidConfig(format!(
                "endpoint {} must start with http:// or https://",
                raw
            )));
        };

        let (authority, path) = match rest.find('/') {
            Some(i) => (&rest[..i], &rest[i..]),
            None => {
                return Err(Error::InvalidConfig(format!(
                    "endpoint {} is missing an export path",
                    raw
                )))
            }
        };

        let (host, port) = authority.split_once(':').ok_or_else(|| {
            Error::InvalidConfig(format!("endpoint {} is missing a port", raw))
        })?;
        if host.is_empty() {
            return Err(Error::InvalidConfig(format!(
                "endpoint {} is missing a host",
                raw
            )));
        }
        let port: u16 = port
            .parse()
            .map_err(|_| Error::InvalidConfig(format!("endpoint {} has an invalid port", raw)))?;

        if path.len() < 2 {
            return Err(Error::InvalidConfig(format!(
                "endpoint {} is missing an export path",
                raw
            )));
        }

        Ok(Self {
            scheme: scheme.to_string(),
            host: host.to_string(),
            port,
            path: path.to_string(),
        })
    }

    /// URL of the peer's disk RPC service.
    pub fn disk_service_url(&self) -> String {
        format!("{}://{}:{}/_", self.scheme, self.host, self.port)
    }

    /// URL of the peer's namespace-lock RPC service.
    pub fn lock_service_url(&self) -> String {
        format!("{}://{}:{}/_/lock", self.scheme, self.host, self.port)
    }
}

// =============================================================================
// Setup
// =============================================================================

/// Validated cluster configuration for one node.
#[derive(Debug, Clone)]
pub struct Setup {
    pub local_index: usize,
    pub endpoints: Vec<Endpoint>,
    pub export_dir: PathBuf,
    pub port: u16,
    pub data_count: usize,
    pub parity_count: usize,
    pub shard_size: usize,
    pub read_quorum: usize,
    pub write_quorum: usize,
}

impl Setup {
    pub fn from_args(args: &Args) -> Result<Self> {
        let count = args.endpoints.len();
        if count < 4 {
            return Err(Error::InvalidConfig(format!(
                "need at least 4 endpoints, got {}",
                count
            )));
        }
        if count % 2 != 0 {
            return Err(Error::InvalidConfig(format!(
                "endpoint count must be even, got {}",
                count
            )));
        }
        if args.local_index >= count {
            return Err(Error::InvalidConfig(format!(
                "local index {} out of range for {} endpoints",
                args.local_index, count
            )));
        }

        let endpoints: Vec<Endpoint> = args
            .endpoints
            .iter()
            .map(|raw| Endpoint::parse(raw))
            .collect::<Result<_>>()?;

        let local = &endpoints[args.local_index];
        let data_count = count / 2;
        let parity_count = count / 2;
        let read_quorum = data_count;
        let write_quorum = read_quorum + 1;

        Ok(Self {
            local_index: args.local_index,
            export_dir: PathBuf::from(&local.path),
            port: local.port,
            endpoints,
            data_count,
            parity_count,
            shard_size: default_shard_size(data_count),
            read_quorum,
            write_quorum,
        })
    }
}

// =============================================================================
// Tests
// =============================================================================
