//! Block checksum algorithms
//!
//! Checksum files name their algorithm and key in the header, so a reader can
//! rebuild the exact hasher that produced the sums. HighwayHash-256 is the
//! default; SHA-256 is supported as an alternate.

use highway::{HighwayHash, HighwayHasher, Key};
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

/// Algorithm name stored in checksum-file headers for HighwayHash-256.
pub const HIGHWAY_HASH_256: &str = "HighwayHash256";

/// Algorithm name stored in checksum-file headers for SHA-256.
pub const SHA_256: &str = "SHA256";

const DEFAULT_HIGHWAY_KEY: [u8; 32] = [
    1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16, 17, 18, 19, 20, 21, 22, 23, 24, 25, 26,
    27, 28, 29, 30, 31, 32,
];

/// A named, optionally keyed block hasher producing fixed-width hex sums.
#[derive(Debug, Clone)]
pub enum Checksummer {
    Highway256 { key: [u8; 32] },
    Sha256,
}

impl Checksummer {
    /// HighwayHash-256 with the given key, or the built-in default key.
    pub fn highway256(key: Option<[u8; 32]>) -> Self {
        Checksummer::Highway256 {
            key: key.unwrap_or(DEFAULT_HIGHWAY_KEY),
        }
    }

    /// SHA-256 (unkeyed).
    pub fn sha256() -> Self {
        Checksummer::Sha256
    }

    /// Rebuild a hasher from a checksum-file header's name and hex key.
    pub fn by_name(name: &str, key_hex: &str) -> Result<Self> {
        match name {
            HIGHWAY_HASH_256 => {
                if key_hex.is_empty() {
                    return Ok(Self::highway256(None));
                }
                let raw = hex::decode(key_hex)
                    .map_err(|e| Error::InvalidArgument(format!("bad hash key: {}", e)))?;
                let key: [u8; 32] = raw
                    .try_into()
                    .map_err(|_| Error::InvalidArgument("hash key must be 32 bytes".to_string()))?;
                Ok(Self::highway256(Some(key)))
            }
            SHA_256 => Ok(Checksummer::Sha256),
            _ => Err(Error::UnknownAlgorithm(name.to_string())),
        }
    }

    /// Algorithm name as written into checksum-file headers.
    pub fn name(&self) -> &'static str {
        match self {
            Checksummer::Highway256 { .. } => HIGHWAY_HASH_256,
            Checksummer::Sha256 => SHA_256,
        }
    }

    /// Hex-encoded key, empty for unkeyed algorithms.
    pub fn key_hex(&self) -> String {
        match self {
            Checksummer::Highway256 { key } => hex::encode(key),
            Checksummer::Sha256 => String::new(),
        }
    }

    /// Width of one hex-encoded sum. Both algorithms are 256-bit.
    pub fn hex_len(&self) -> usize {
        64
    }

    /// Hex-encoded checksum of `data`.
    pub fn sum(&self, data: &[u8]) -> String {
        match self {
            Checksummer::Highway256 { key } => {
                let mut hasher = HighwayHasher::new(Key(highway_key(key)));
                hasher.append(data);
                let words = hasher.finalize256();
                let mut out = [0u8; 32];
                for (i, word) in words.iter().enumerate() {
                    out[i * 8..(i + 1) * 8].copy_from_slice(&word.to_le_bytes());
                }
                hex::encode(out)
            }
            Checksummer::Sha256 => hex::encode(Sha256::digest(data)),
        }
    }
}

fn highway_key(key: &[u8; 32]) -> [u64; 4] {
    let mut words = [0u64; 4];
    for (i, chunk) in key.chunks_exact(8).enumerate() {
        words[i] = u64::from_le_bytes(chunk.try_into().unwrap());
    }
    words
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sum_width() {
        let data = b"the quick brown fox";
        for hasher in [Checksummer::highway256(None), Checksummer::sha256()] {
            let sum = hasher.sum(data);
            assert_eq!(sum.len(), hasher.hex_len());
        }
    }

    #[test]
    fn test_sum_deterministic() {
        let hasher = Checksummer::highway256(None);
        assert_eq!(hasher.sum(b"abc"), hasher.sum(b"abc"));
        assert_ne!(hasher.sum(b"abc"), hasher.sum(b"abd"));
    }

    #[test]
    fn test_key_changes_sum() {
        let default = Checksummer::highway256(None);
        let keyed = Checksummer::highway256(Some([7u8; 32]));
        assert_ne!(default.sum(b"abc"), keyed.sum(b"abc"));
    }

    #[test]
    fn test_by_name_round_trip() {
        let original = Checksummer::highway256(Some([9u8; 32]));
        let rebuilt = Checksummer::by_name(original.name(), &original.key_hex()).unwrap();
        assert_eq!(original.sum(b"payload"), rebuilt.sum(b"payload"));

        let sha = Checksummer::by_name(SHA_256, "").unwrap();
        assert_eq!(sha.name(), SHA_256);
    }

    #[test]
    fn test_by_name_unknown() {
        assert!(matches!(
            Checksummer::by_name("MD5", ""),
            Err(Error::UnknownAlgorithm(_))
        ));
    }
}
