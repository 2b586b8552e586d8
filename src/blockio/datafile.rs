//! Block data file writer and verified reader

use std::path::Path;

use bytes::Bytes;
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeekExt, AsyncWriteExt, SeekFrom};

use crate::error::{Error, Result};
use crate::hash::Checksummer;

use super::checksum::{checksum_path, ChecksumReader, ChecksumWriter};

/// Default block size of stored data files: 1 MiB.
pub const DEFAULT_BLOCK_SIZE: usize = 1024 * 1024;

/// Stream exactly `length` bytes from `reader` into a block data file plus
/// its sibling checksum file. If the stream ends early or any write fails,
/// both files are removed; partial writes never survive.
pub async fn write_data_file<R>(
    path: &Path,
    reader: &mut R,
    length: u64,
    hasher: Checksummer,
    block_size: usize,
) -> Result<()>
where
    R: AsyncRead + Unpin + ?Sized,
{
    match write_blocks(path, reader, length, hasher, block_size).await {
        Ok(()) => Ok(()),
        Err(err) => {
            let _ = tokio::fs::remove_file(path).await;
            let _ = tokio::fs::remove_file(checksum_path(path)).await;
            Err(err)
        }
    }
}

async fn write_blocks<R>(
    path: &Path,
    reader: &mut R,
    length: u64,
    hasher: Checksummer,
    block_size: usize,
) -> Result<()>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut last_read_size = block_size;
    let mut block_count = 0usize;
    if length > 0 {
        block_count = (length / block_size as u64) as usize;
        if (block_count as u64) * (block_size as u64) < length {
            last_read_size = (length - block_count as u64 * block_size as u64) as usize;
            block_count += 1;
        }
    }

    let mut data_file = File::create(path).await?;
    let mut checksums =
        ChecksumWriter::create(&checksum_path(path), hasher, block_size, block_count, length)
            .await?;

    let mut buf = vec![0u8; block_size];
    for index in 0..block_count {
        let size = if index == block_count - 1 {
            last_read_size
        } else {
            block_size
        };

        reader.read_exact(&mut buf[..size]).await?;
        data_file.write_all(&buf[..size]).await?;
        checksums.write_sum(&buf[..size]).await?;
    }

    data_file.flush().await?;
    checksums.flush().await?;
    Ok(())
}

// =============================================================================
// Reader
// =============================================================================

/// Random-access reader over a block data file.
///
/// Each block is read in full, its checksum recomputed and compared against
/// the sibling checksum file. A mismatch is fatal for this reader; the
/// erasure layer treats the shard as absent and reconstructs from the rest.
pub struct DataFileReader {
    data_file: File,
    checksums: ChecksumReader,
    block_index: usize,
    bytes_to_skip: usize,
    remaining: u64,
    buf: Vec<u8>,
}

impl DataFileReader {
    /// Open the section `[offset, offset + length)` of the data file.
    pub async fn open(path: &Path, offset: u64, length: u64) -> Result<Self> {
        let mut checksums = ChecksumReader::open(&checksum_path(path)).await?;
        let section = checksums.section(offset, length)?;
        checksums.seek_to(section.start_block).await?;

        let block_size = checksums.header().block_size;
        let mut data_file = File::open(path).await?;
        data_file
            .seek(SeekFrom::Start(section.start_block as u64 * block_size as u64))
            .await?;

        Ok(Self {
            data_file,
            checksums,
            block_index: section.start_block,
            bytes_to_skip: section.bytes_to_skip,
            remaining: length,
            buf: vec![0u8; block_size],
        })
    }

    /// Read and verify the next block, trimmed to the requested section.
    /// Returns `None` once the section is exhausted.
    pub async fn next_block(&mut self) -> Result<Option<Bytes>> {
        if self.remaining == 0 {
            return Ok(None);
        }

        let block_size = self.checksums.header().block_size;
        let block_count = self.checksums.header().block_count;
        let data_length = self.checksums.header().data_length;

        let expected = self.checksums.next_sum().await?;

        let size = if self.block_index == block_count - 1 {
            (data_length - self.block_index as u64 * block_size as u64) as usize
        } else {
            block_size
        };

        self.data_file.read_exact(&mut self.buf[..size]).await?;
        self.block_index += 1;

        let got = self.checksums.sum(&self.buf[..size]);
        if got != expected {
            return Err(Error::ChecksumMismatch { expected, got });
        }

        // The section start is always inside the first block returned.
        debug_assert!(self.bytes_to_skip < size);
        let start = self.bytes_to_skip;
        self.bytes_to_skip = 0;

        let take = ((size - start) as u64).min(self.remaining) as usize;
        self.remaining -= take as u64;

        Ok(Some(Bytes::copy_from_slice(&self.buf[start..start + take])))
    }

    /// Collect the whole section into memory.
    pub async fn read_all(&mut self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        while let Some(block) = self.next_block().await? {
            out.extend_from_slice(&block);
        }
        Ok(out)
    }
}

// =============================================================================
// Tests
// =============================================================================
