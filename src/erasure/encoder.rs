//! Streaming Reed-Solomon encoder
//!
//! Reads a payload stripe by stripe and fans each stripe's data + parity
//! shards out to `data_count + parity_count` concurrent writers. Writers that
//! fail are set aside; the encode keeps going as long as enough writers
//! remain for a durable commit.

use futures::future::join_all;
use reed_solomon_erasure::galois_8::ReedSolomon;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

use crate::error::{Error, Result};

/// One shard output stream.
pub type ShardWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Streaming encoder for one object body.
pub struct StripeEncoder {
    rs: ReedSolomon,
    data_count: usize,
    parity_count: usize,
    shard_size: usize,
}

impl StripeEncoder {
    pub fn new(data_count: usize, parity_count: usize, shard_size: usize) -> Result<Self> {
        let rs = ReedSolomon::new(data_count, parity_count)
            .map_err(|e| Error::InvalidConfig(format!("reed-solomon: {}", e)))?;

        Ok(Self {
            rs,
            data_count,
            parity_count,
            shard_size,
        })
    }

    pub fn total_count(&self) -> usize {
        self.data_count + self.parity_count
    }

    /// Stream `length` bytes from `reader` into the shard writers.
    ///
    /// Writers that fail are replaced with `None` and skipped from then on.
    /// A stripe succeeds while at most `parity_count - 1` writers have
    /// failed, which leaves `data_count + 1` intact shard files (the write
    /// quorum). Losing more fails the whole encode.
    pub async fn copy_n<R>(
        &self,
        writers: &mut [Option<ShardWriter>],
        reader: &mut R,
        length: u64,
    ) -> Result<()>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let total = self.total_count();
        if writers.len() != total {
            return Err(Error::InvalidConfig(format!(
                "insufficient writers {} found, expected {}",
                writers.len(),
                total
            )));
        }

        let block_size = self.shard_size as u64 * self.data_count as u64;
        let mut stripe_count = (length / block_size) as usize;
        if (stripe_count as u64) * block_size < length {
            stripe_count += 1;
        }

        let mut shard_size = self.shard_size;
        let mut available = length;
        let mut shards: Vec<Vec<u8>> = vec![vec![0u8; shard_size]; total];

        for stripe in 0..stripe_count {
            let last_stripe = stripe == stripe_count - 1;

            // Active data shards of this stripe and the bytes to read into
            // the final active one. Earlier stripes are always full.
            let mut active_data = self.data_count;
            let mut last_read = shard_size;

            if last_stripe && available < block_size {
                let chunk = available as usize;
                shard_size = chunk / self.data_count;
                if shard_size * self.data_count < chunk {
                    shard_size += 1;
                }

                last_read = shard_size;
                active_data = if shard_size == 0 { 0 } else { chunk / shard_size };
                if active_data * shard_size < chunk {
                    last_read = chunk - active_data * shard_size;
                    active_data += 1;
                }

                for shard in shards.iter_mut() {
                    shard.clear();
                    shard.resize(shard_size, 0);
                }
            }

            // Fill data shards; unused ones stay zeroed.
            for i in 0..active_data {
                let take = if i == active_data - 1 { last_read } else { shard_size };
                reader.read_exact(&mut shards[i][..take]).await?;
                if take < shard_size {
                    shards[i][take..].fill(0);
                }
                available -= take as u64;
            }

            self.rs
                .encode(&mut shards)
                .map_err(|e| Error::Internal(format!("reed-solomon encode: {}", e)))?;

            self.write_stripe(writers, &shards).await?;
        }

        Ok(())
    }

    async fn write_stripe(
        &self,
        writers: &mut [Option<ShardWriter>],
        shards: &[Vec<u8>],
    ) -> Result<()> {
        let writes = writers
            .iter_mut()
            .zip(shards.iter())
            .enumerate()
            .filter_map(|(i, (slot, shard))| {
                slot.as_mut()
                    .map(|writer| async move { (i, writer.write_all(shard).await) })
            });

        let mut failed = Vec::new();
        for (i, result) in join_all(writes).await {
            if let Err(err) = result {
                debug!(shard = i, "shard write failed: {}", err);
                failed.push(i);
            }
        }

        for i in failed {
            writers[i] = None;
        }

        let down = writers.iter().filter(|w| w.is_none()).count();
        if down + 1 > self.parity_count {
            return Err(Error::CorruptedShards {
                failed: down,
                total: writers.len(),
            });
        }

        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
