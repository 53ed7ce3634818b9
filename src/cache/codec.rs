//! Value Codec
//!
//! Serializes cache values to bytes, compressing with LZ4 above a size
//! threshold, and checksums the serialized form so decode can verify
//! round-trip integrity.

use crate::error::{Error, Result};
use bytes::Bytes;

use super::entry::fx_hash;

// =============================================================================
// Compression Algorithm
// =============================================================================

/// Supported compression algorithms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompressionAlgorithm {
    /// No compression
    None,
    /// LZ4 - fast compression
    Lz4,
}

impl CompressionAlgorithm {
    /// Human-readable name
    pub fn name(&self) -> &'static str {
        match self {
            CompressionAlgorithm::None => "none",
            CompressionAlgorithm::Lz4 => "lz4",
        }
    }
}

impl std::fmt::Display for CompressionAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

// =============================================================================
// Compressor Trait
// =============================================================================

/// Trait for compression implementations
pub trait Compressor: Send + Sync {
    /// Algorithm identifier
    fn algorithm(&self) -> CompressionAlgorithm;

    /// Compress data
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>>;

    /// Decompress data
    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>>;
}

/// Pass-through compressor
pub struct NoopCompressor;

impl Compressor for NoopCompressor {
    fn algorithm(&self) -> CompressionAlgorithm {
        CompressionAlgorithm::None
    }

    fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        Ok(data.to_vec())
    }

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>> {
        Ok(data.to_vec())
    }
}

/// LZ4 compressor
pub struct Lz4Compressor {
    level: i32,
}

impl Lz4Compressor {
    /// Create with default compression level
    pub fn new() -> Self {
        Self { level: 4 }
    }

    /// Create with custom compression level
    pub fn with_level(level: i32) -> Self {
        Self { level }
    }
}

impl Default for Lz4Compressor {
    fn default() -> Self {
        Self::new()
    }
}

impl Compressor for Lz4Compressor {
    fn algorithm(&self) -> CompressionAlgorithm {
        CompressionAlgorithm::Lz4
    }

    fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        lz4::block::compress(
            data,
            Some(lz4::block::CompressionMode::HIGHCOMPRESSION(self.level)),
            true,
        )
        .map_err(|e| Error::CompressionFailed {
            algorithm: "LZ4".into(),
            reason: e.to_string(),
        })
    }

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>> {
        lz4::block::decompress(data, None).map_err(|e| Error::DecompressionFailed {
            algorithm: "LZ4".into(),
            reason: e.to_string(),
        })
    }
}

// =============================================================================
// Codec
// =============================================================================

/// Codec configuration
#[derive(Debug, Clone)]
pub struct CodecConfig {
    /// Minimum serialized size to attempt compression
    pub compression_threshold: usize,
    /// Compression level
    pub level: i32,
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            compression_threshold: 1024, // 1KB minimum
            level: 4,
        }
    }
}

/// An encoded cache value ready for tier storage
#[derive(Debug, Clone)]
pub struct EncodedValue {
    /// Stored bytes (possibly compressed)
    pub bytes: Bytes,
    /// Whether `bytes` is LZ4-compressed
    pub compressed: bool,
    /// Checksum of the serialized (pre-compression) form
    pub checksum: u64,
}

/// Encodes and decodes cache values with threshold compression
pub struct Codec {
    config: CodecConfig,
    lz4: Lz4Compressor,
}

impl Codec {
    /// Create a codec with default configuration
    pub fn new() -> Self {
        Self::with_config(CodecConfig::default())
    }

    /// Create with custom config
    pub fn with_config(config: CodecConfig) -> Self {
        Self {
            lz4: Lz4Compressor::with_level(config.level),
            config,
        }
    }

    /// Serialize and (above threshold) compress a value
    pub fn encode(&self, value: &serde_json::Value) -> Result<EncodedValue> {
        let serialized = serde_json::to_vec(value)?;
        let checksum = fx_hash(&serialized);

        if serialized.len() < self.config.compression_threshold {
            return Ok(EncodedValue {
                bytes: Bytes::from(serialized),
                compressed: false,
                checksum,
            });
        }

        match self.lz4.compress(&serialized) {
            // Only keep the compressed form if it is actually smaller
            Ok(compressed) if compressed.len() < serialized.len() => Ok(EncodedValue {
                bytes: Bytes::from(compressed),
                compressed: true,
                checksum,
            }),
            Ok(_) => Ok(EncodedValue {
                bytes: Bytes::from(serialized),
                compressed: false,
                checksum,
            }),
            Err(e) => {
                tracing::warn!("compression failed, storing uncompressed: {}", e);
                Ok(EncodedValue {
                    bytes: Bytes::from(serialized),
                    compressed: false,
                    checksum,
                })
            }
        }
    }

    /// Reverse compression and deserialize, verifying the checksum
    pub fn decode(
        &self,
        bytes: &[u8],
        compressed: bool,
        checksum: u64,
    ) -> Result<serde_json::Value> {
        let serialized = if compressed {
            self.lz4.decompress(bytes)?
        } else {
            bytes.to_vec()
        };

        let actual = fx_hash(&serialized);
        if actual != checksum {
            return Err(Error::ChecksumMismatch {
                expected: checksum,
                actual,
            });
        }

        Ok(serde_json::from_slice(&serialized)?)
    }

    /// Get configuration
    pub fn config(&self) -> &CodecConfig {
        &self.config
    }
}

impl Default for Codec {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Tests
// =============================================================================
