//! Checksum file writer/reader

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncSeekExt, AsyncWriteExt, BufReader, SeekFrom};

use crate::error::{Error, Result};
use crate::hash::Checksummer;

use super::CHECKSUM_FILE_EXT;

/// Path of the checksum file that sits next to a data file.
pub fn checksum_path(data_path: &Path) -> PathBuf {
    let mut os = data_path.as_os_str().to_os_string();
    os.push(CHECKSUM_FILE_EXT);
    PathBuf::from(os)
}

/// First line of every checksum file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChecksumHeader {
    pub hash_name: String,
    pub hash_key: String,
    pub hash_length: usize,
    pub block_size: usize,
    pub block_count: usize,
    pub data_length: u64,
}

/// Block coordinates of an (offset, length) section of the data file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockSection {
    pub start_block: usize,
    pub bytes_to_skip: usize,
    pub required_blocks: usize,
}

// =============================================================================
// Writer
// =============================================================================

/// Appends one fixed-width hex sum per block after the JSON header line.
pub struct ChecksumWriter {
    file: File,
    hasher: Checksummer,
}

impl ChecksumWriter {
    pub async fn create(
        path: &Path,
        hasher: Checksummer,
        block_size: usize,
        block_count: usize,
        data_length: u64,
    ) -> Result<Self> {
        let header = ChecksumHeader {
            hash_name: hasher.name().to_string(),
            hash_key: hasher.key_hex(),
            hash_length: hasher.hex_len(),
            block_size,
            block_count,
            data_length,
        };

        let mut file = File::create(path).await?;
        let mut line = serde_json::to_string(&header)?;
        line.push('\n');
        if let Err(err) = file.write_all(line.as_bytes()).await {
            drop(file);
            let _ = tokio::fs::remove_file(path).await;
            return Err(err.into());
        }

        Ok(Self { file, hasher })
    }

    /// Hash `block` and append its sum line.
    pub async fn write_sum(&mut self, block: &[u8]) -> Result<()> {
        let mut line = self.hasher.sum(block);
        line.push('\n');
        self.file.write_all(line.as_bytes()).await?;
        Ok(())
    }

    pub async fn flush(&mut self) -> Result<()> {
        self.file.flush().await?;
        Ok(())
    }
}

// =============================================================================
// Reader
// =============================================================================

/// Random-access reader over the sum lines of a checksum file.
pub struct ChecksumReader {
    file: File,
    header: ChecksumHeader,
    hasher: Checksummer,
    header_len: usize,
}

impl ChecksumReader {
    pub async fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).await?;
        let mut buffered = BufReader::new(file);

        let mut line = String::new();
        buffered.read_line(&mut line).await?;
        let header: ChecksumHeader = serde_json::from_str(line.trim_end())?;
        let hasher = Checksummer::by_name(&header.hash_name, &header.hash_key)?;

        // The buffered reader may have consumed past the header line; seek the
        // raw file back to the first sum line.
        let mut file = buffered.into_inner();
        file.seek(SeekFrom::Start(line.len() as u64)).await?;

        Ok(Self {
            file,
            header,
            hasher,
            header_len: line.len(),
        })
    }

    pub fn header(&self) -> &ChecksumHeader {
        &self.header
    }

    /// Map a data-file (offset, length) onto block coordinates.
    pub fn section(&self, offset: u64, length: u64) -> Result<BlockSection> {
        if offset + length > self.header.data_length {
            return Err(Error::OutOfRange);
        }

        let block_size = self.header.block_size as u64;
        let start_block = (offset / block_size) as usize;
        let bytes_to_skip = (offset - start_block as u64 * block_size) as usize;

        let mut required_blocks = (length / block_size) as usize;
        if (required_blocks as u64) * block_size < length {
            required_blocks += 1;
        }

        Ok(BlockSection {
            start_block,
            bytes_to_skip,
            required_blocks,
        })
    }

    /// Seek so the next `next_sum` call returns the sum of `block_index`.
    pub async fn seek_to(&mut self, block_index: usize) -> Result<()> {
        let pos = self.header_len as u64
            + block_index as u64 * (self.header.hash_length as u64 + 1);
        self.file.seek(SeekFrom::Start(pos)).await?;
        Ok(())
    }

    /// Read the next sum line.
    pub async fn next_sum(&mut self) -> Result<String> {
        let mut buf = vec![0u8; self.header.hash_length + 1];
        self.file.read_exact(&mut buf).await?;
        buf.truncate(self.header.hash_length);
        String::from_utf8(buf)
            .map_err(|_| Error::InvalidArgument("non-ascii checksum line".to_string()))
    }

    /// Hash `data` with the algorithm named in the header.
    pub fn sum(&self, data: &[u8]) -> String {
        self.hasher.sum(data)
    }
}

// =============================================================================
// Tests
// =============================================================================
