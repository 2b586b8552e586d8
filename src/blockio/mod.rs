//! Checksum-verified block files
//!
//! A stored payload is a pair of files: the data file (raw bytes) and a
//! sibling checksum file. The checksum file starts with a one-line JSON
//! header naming the hash algorithm, key, block size, block count, and data
//! length, followed by one fixed-width hex sum per block. Offsets into both
//! files are computed arithmetically from the header.
//!
//! Writers never leave partial results behind: if the input stream ends
//! early, both files are removed.

mod checksum;
mod datafile;

pub use checksum::{checksum_path, BlockSection, ChecksumHeader, ChecksumReader, ChecksumWriter};
pub use datafile::{write_data_file, DataFileReader, DEFAULT_BLOCK_SIZE};

/// File name extension of checksum files.
pub const CHECKSUM_FILE_EXT: &str = ".checksum";

/// File name extension of data-store metadata files.
pub const METADATA_FILE_EXT: &str = ".meta.json";
