//! Stripe geometry
//!
//! Pure arithmetic mapping a payload size onto stripes and shard files, and a
//! requested (offset, length) onto the per-shard section that must be read.

/// Shard layout of one stored object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StripeGeometry {
    /// Payload size in bytes.
    pub object_size: u64,
    /// Number of data shards per stripe.
    pub data_count: usize,
    /// Number of parity shards per stripe.
    pub parity_count: usize,
    /// Bytes per shard in every stripe except the last.
    pub shard_size: usize,
    /// Bytes per shard in the last stripe.
    pub last_shard_size: usize,
    /// Number of stripes.
    pub stripe_count: usize,
}

/// Per-shard coordinates of a requested (offset, length) read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ShardSection {
    /// Byte offset into each shard file.
    pub shard_offset: u64,
    /// Bytes to read from each shard file.
    pub shard_length: u64,
    /// Shard bytes per stripe for this read window.
    pub shard_size: usize,
    /// Shard bytes in the window's final stripe.
    pub last_shard_size: usize,
    /// Stripes covered by the window.
    pub stripe_count: usize,
    /// Payload bytes to discard from the first stripe.
    pub bytes_to_skip: usize,
}

impl StripeGeometry {
    /// Compute the layout of a payload of `object_size` bytes.
    ///
    /// When the payload fits in a single stripe, the shard size shrinks to
    /// `ceil(object_size / data_count)` so the stripe is not padded out to the
    /// configured size.
    pub fn compute(
        object_size: u64,
        data_count: usize,
        parity_count: usize,
        shard_size: usize,
    ) -> Self {
        let block_size = shard_size as u64 * data_count as u64;

        let ceil_div = |chunk: u64| -> usize {
            let mut per_shard = (chunk / data_count as u64) as usize;
            if (per_shard as u64) * (data_count as u64) < chunk {
                per_shard += 1;
            }
            per_shard
        };

        let mut shard_size = shard_size;
        let mut last_shard_size = shard_size;
        let mut stripe_count = 1usize;

        if object_size > block_size {
            stripe_count = (object_size / block_size) as usize;
            let covered = stripe_count as u64 * block_size;
            if covered < object_size {
                last_shard_size = ceil_div(object_size - covered);
                stripe_count += 1;
            }
        } else {
            last_shard_size = ceil_div(object_size);
            shard_size = last_shard_size;
        }

        Self {
            object_size,
            data_count,
            parity_count,
            shard_size,
            last_shard_size,
            stripe_count,
        }
    }

    /// Size of each peer's shard file. Independent of any read window.
    pub fn shard_object_size(&self) -> u64 {
        self.last_shard_size as u64 + self.shard_size as u64 * (self.stripe_count as u64 - 1)
    }

    /// Map a payload (offset, length) onto the shard section to read.
    ///
    /// An offset past the payload yields an empty window; a length past the
    /// payload is clamped.
    pub fn section(&self, offset: u64, mut length: u64) -> ShardSection {
        let shard_object_size = self.shard_object_size();

        if offset > self.object_size {
            return ShardSection {
                shard_offset: shard_object_size,
                ..ShardSection::default()
            };
        }

        if offset + length > self.object_size {
            length = self.object_size - offset;
        }

        let block_size = self.shard_size as u64 * self.data_count as u64;

        let (skip_stripes, bytes_to_skip, mut stripe_count) = if block_size == 0 {
            (0usize, 0usize, 0usize)
        } else {
            let skip = (offset / block_size) as usize;
            let to_skip = (offset - skip as u64 * block_size) as usize;
            // The window may straddle a stripe boundary, so the skipped prefix
            // counts toward the stripes that must be read.
            let covered = to_skip as u64 + length;
            let mut count = (covered / block_size) as usize;
            if (count as u64) * block_size < covered {
                count += 1;
            }
            (skip, to_skip, count)
        };
        if length == 0 {
            stripe_count = 0;
        }

        let mut shard_size = self.shard_size;
        let mut last_shard_size = self.shard_size;
        if skip_stripes + stripe_count == self.stripe_count {
            last_shard_size = self.last_shard_size;
            if stripe_count == 1 {
                shard_size = self.last_shard_size;
            }
        }

        // Skipped stripes always occupy the full stripe shard size in the
        // shard file, even when the window itself covers only the smaller
        // final stripe.
        let shard_offset = skip_stripes as u64 * self.shard_size as u64;
        let mut shard_length = stripe_count as u64 * shard_size as u64;
        if shard_offset + shard_length > shard_object_size {
            shard_length = shard_object_size - shard_offset;
        }

        ShardSection {
            shard_offset,
            shard_length,
            shard_size,
            last_shard_size,
            stripe_count,
            bytes_to_skip,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
