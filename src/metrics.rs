//! Prometheus metrics
//!
//! Request and byte counters owned by the server and exposed in text format
//! at `/_/metrics`.

use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};

use crate::error::{Error, Result};

/// Counters shared across request handlers.
pub struct Metrics {
    registry: Registry,
    requests: IntCounterVec,
    bytes_received: IntCounter,
    bytes_sent: IntCounter,
}

impl Metrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let requests = IntCounterVec::new(
            Opts::new("stripestor_requests_total", "Requests served, by operation and status"),
            &["operation", "status"],
        )
        .map_err(|e| Error::Internal(e.to_string()))?;
        let bytes_received = IntCounter::new(
            "stripestor_bytes_received_total",
            "Object payload bytes accepted from clients",
        )
        .map_err(|e| Error::Internal(e.to_string()))?;
        let bytes_sent = IntCounter::new(
            "stripestor_bytes_sent_total",
            "Object payload bytes streamed to clients",
        )
        .map_err(|e| Error::Internal(e.to_string()))?;

        for collector in [
            Box::new(requests.clone()) as Box<dyn prometheus::core::Collector>,
            Box::new(bytes_received.clone()),
            Box::new(bytes_sent.clone()),
        ] {
            registry
                .register(collector)
                .map_err(|e| Error::Internal(e.to_string()))?;
        }

        Ok(Self {
            registry,
            requests,
            bytes_received,
            bytes_sent,
        })
    }

    pub fn record_request(&self, operation: &str, status: u16) {
        self.requests
            .with_label_values(&[operation, &status.to_string()])
            .inc();
    }

    pub fn record_bytes_received(&self, count: u64) {
        self.bytes_received.inc_by(count);
    }

    pub fn record_bytes_sent(&self, count: u64) {
        self.bytes_sent.inc_by(count);
    }

    /// Text exposition of all registered metrics.
    pub fn export(&self) -> Vec<u8> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        if let Err(err) = encoder.encode(&self.registry.gather(), &mut buffer) {
            tracing::warn!("metrics encoding failed: {}", err);
        }
        buffer
    }
}

// =============================================================================
// Tests
// =============================================================================
