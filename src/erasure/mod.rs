//! Erasure Coding Module
//!
//! Streaming Reed-Solomon coding of an object body across N shard streams.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                           Erasure Module                                 │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                          │
//! │  ┌──────────────┐       ┌──────────────┐       ┌──────────────────────┐ │
//! │  │   Geometry   │       │   Encoder    │       │       Decoder        │ │
//! │  │ (stripe math)│       │ body → D+P   │       │ D+P shards → body    │ │
//! │  └──────────────┘       │ shard writes │       │ with reconstruction  │ │
//! │                         └──────────────┘       └──────────────────────┘ │
//! │                                                                          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A payload is cut into stripes of `shard_size * data_count` bytes. Each
//! stripe yields `data_count` data shards plus `parity_count` parity shards,
//! one written to each peer. Any `data_count` of the `data_count +
//! parity_count` shard streams suffice to reconstruct the payload.

pub mod decoder;
pub mod encoder;
pub mod geometry;

#[cfg(test)]
mod proptest;

pub use decoder::StripeDecoder;
pub use encoder::StripeEncoder;
pub use geometry::{ShardSection, StripeGeometry};
