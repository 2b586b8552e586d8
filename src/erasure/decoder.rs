//! Streaming Reed-Solomon decoder
//!
//! Reads `data_count + parity_count` shard streams stripe by stripe and
//! writes the payload section they encode. Streams that error or end early
//! are marked absent; missing data shards are rebuilt from parity as long as
//! enough streams survive.

use futures::future::join_all;
use reed_solomon_erasure::galois_8::ReedSolomon;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

use crate::error::{Error, Result};

/// One shard input stream.
pub type ShardReader = Box<dyn AsyncRead + Send + Unpin>;

/// Streaming decoder for one read window, parameterized by the window's
/// shard section values.
pub struct StripeDecoder {
    rs: ReedSolomon,
    data_count: usize,
    parity_count: usize,
    shard_size: usize,
    last_shard_size: usize,
    stripe_count: usize,
    bytes_to_skip: usize,
}

impl StripeDecoder {
    pub fn new(
        data_count: usize,
        parity_count: usize,
        shard_size: usize,
        last_shard_size: usize,
        stripe_count: usize,
        bytes_to_skip: usize,
    ) -> Result<Self> {
        let rs = ReedSolomon::new(data_count, parity_count)
            .map_err(|e| Error::InvalidConfig(format!("reed-solomon: {}", e)))?;

        Ok(Self {
            rs,
            data_count,
            parity_count,
            shard_size,
            last_shard_size,
            stripe_count,
            bytes_to_skip,
        })
    }

    pub fn total_count(&self) -> usize {
        self.data_count + self.parity_count
    }

    /// Decode up to `length` payload bytes into `writer`.
    ///
    /// Returns the number of bytes written. Readers that fail are replaced
    /// with `None`; a stripe fails once `parity_count + 2` streams are gone,
    /// which is one more loss than reconstruction could ever tolerate.
    pub async fn copy_n<W>(
        &mut self,
        writer: &mut W,
        readers: &mut [Option<ShardReader>],
        length: u64,
    ) -> Result<u64>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let total = self.total_count();
        if readers.len() != total {
            return Err(Error::InvalidConfig(format!(
                "insufficient readers {} found, expected {}",
                readers.len(),
                total
            )));
        }

        let mut shards: Vec<Option<Vec<u8>>> = vec![None; total];
        let mut remaining = length;

        for stripe in 0..self.stripe_count {
            if stripe == self.stripe_count - 1 {
                self.shard_size = self.last_shard_size;
            }

            let need_reconstruct = self.read_stripe(readers, &mut shards).await?;

            if need_reconstruct {
                let available = shards.iter().filter(|s| s.is_some()).count();
                if available < self.data_count {
                    return Err(Error::InsufficientShards {
                        available,
                        required: self.data_count,
                    });
                }
                self.rs
                    .reconstruct_data(&mut shards)
                    .map_err(|e| Error::Internal(format!("reed-solomon reconstruct: {}", e)))?;
            }

            for shard in shards.iter().take(self.data_count) {
                let shard = shard.as_ref().ok_or(Error::InsufficientShards {
                    available: self.data_count - 1,
                    required: self.data_count,
                })?;

                let mut start = 0;
                if self.bytes_to_skip > 0 {
                    if shard.len() <= self.bytes_to_skip {
                        self.bytes_to_skip -= shard.len();
                        continue;
                    }
                    start = self.bytes_to_skip;
                    self.bytes_to_skip = 0;
                }

                let take = ((shard.len() - start) as u64).min(remaining) as usize;
                if take == 0 {
                    continue;
                }
                writer.write_all(&shard[start..start + take]).await?;
                remaining -= take as u64;
            }
        }

        Ok(length - remaining)
    }

    /// Read one stripe's worth from every live reader. Returns whether a
    /// data shard is absent and reconstruction is needed.
    async fn read_stripe(
        &self,
        readers: &mut [Option<ShardReader>],
        shards: &mut [Option<Vec<u8>>],
    ) -> Result<bool> {
        // Dead readers contribute empty slots; live ones get a fresh buffer
        // of this stripe's shard size.
        for (slot, shard) in readers.iter().zip(shards.iter_mut()) {
            *shard = match slot {
                Some(_) => Some(vec![0u8; self.shard_size]),
                None => None,
            };
        }

        let reads = readers
            .iter_mut()
            .zip(shards.iter_mut())
            .enumerate()
            .filter_map(|(i, (slot, shard))| match (slot, shard) {
                (Some(reader), Some(buf)) => {
                    Some(async move { (i, reader.read_exact(&mut buf[..]).await) })
                }
                _ => None,
            });

        let mut failed = Vec::new();
        for (i, result) in join_all(reads).await {
            if let Err(err) = result {
                debug!(shard = i, "shard read failed: {}", err);
                failed.push(i);
            }
        }

        for i in failed {
            readers[i] = None;
            shards[i] = None;
        }
        let need_reconstruct = shards.iter().take(self.data_count).any(|s| s.is_none());

        let down = readers.iter().filter(|r| r.is_none()).count();
        if down > self.parity_count + 1 {
            return Err(Error::CorruptedShards {
                failed: down,
                total: readers.len(),
            });
        }

        Ok(need_reconstruct)
    }
}

// =============================================================================
// Tests
// =============================================================================
