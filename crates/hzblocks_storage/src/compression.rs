//! Byte compression of encoded blocks.
//!
//! Each field names a default compression (`default_compression(lz4)` in the idx file). The codec of every stored block is
//! recorded next to it, so a dataset may mix codecs and the reader never guesses.

#[cfg(feature = "lz4")]
mod lz4_compression;
#[cfg(feature = "snap")]
mod snappy_compression;

#[cfg(feature = "lz4")]
pub use lz4_compression::Lz4;
#[cfg(feature = "snap")]
pub use snappy_compression::Snappy;

use crate::{IdxError, Result};

use serde::{Deserialize, Serialize};

/// A compression algorithm that acts directly on a slice of bytes.
pub trait BytesCompression {
    fn compress_bytes(&self, bytes: &[u8], compressed_bytes: impl std::io::Write)
        -> std::io::Result<()>;
    fn decompress_bytes(compressed_bytes: &[u8], bytes: &mut impl std::io::Write)
        -> std::io::Result<()>;
}

/// The codec of one stored block.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockCompression {
    Raw,
    Lz4,
    Snappy,
}

impl Default for BlockCompression {
    fn default() -> Self {
        Self::Raw
    }
}

impl BlockCompression {
    /// Parses a field's compression token. An empty token means no compression.
    pub fn from_token(token: &str) -> Result<Self> {
        match token.trim().to_lowercase().as_str() {
            "" | "raw" | "none" => Ok(Self::Raw),
            "lz4" => Ok(Self::Lz4),
            "snappy" | "snap" => Ok(Self::Snappy),
            other => Err(IdxError::not_supported(format!(
                "compression {:?}",
                other
            ))),
        }
    }

    pub fn token(&self) -> &'static str {
        match self {
            Self::Raw => "raw",
            Self::Lz4 => "lz4",
            Self::Snappy => "snappy",
        }
    }

    /// The code stored in block headers.
    pub fn code(&self) -> u8 {
        match self {
            Self::Raw => 0,
            Self::Lz4 => 1,
            Self::Snappy => 2,
        }
    }

    pub fn from_code(code: u8) -> Result<Self> {
        match code {
            0 => Ok(Self::Raw),
            1 => Ok(Self::Lz4),
            2 => Ok(Self::Snappy),
            _ => Err(IdxError::backend(format!("unknown compression code {}", code))),
        }
    }

    pub fn encode(&self, bytes: &[u8]) -> Result<Vec<u8>> {
        match self {
            Self::Raw => Ok(bytes.to_vec()),
            Self::Lz4 => {
                #[cfg(feature = "lz4")]
                {
                    let mut compressed = Vec::new();
                    Lz4 { level: 4 }.compress_bytes(bytes, &mut compressed)?;
                    Ok(compressed)
                }
                #[cfg(not(feature = "lz4"))]
                {
                    Err(IdxError::not_supported("lz4 compression (enable the `lz4` feature)"))
                }
            }
            Self::Snappy => {
                #[cfg(feature = "snap")]
                {
                    let mut compressed = Vec::new();
                    Snappy.compress_bytes(bytes, &mut compressed)?;
                    Ok(compressed)
                }
                #[cfg(not(feature = "snap"))]
                {
                    Err(IdxError::not_supported("snappy compression (enable the `snappy` feature)"))
                }
            }
        }
    }

    /// Decodes `compressed`, which must expand to exactly `expected_len` bytes.
    pub fn decode(&self, compressed: &[u8], expected_len: usize) -> Result<Vec<u8>> {
        let bytes = match self {
            Self::Raw => compressed.to_vec(),
            Self::Lz4 => {
                #[cfg(feature = "lz4")]
                {
                    let mut bytes = Vec::with_capacity(expected_len);
                    Lz4::decompress_bytes(compressed, &mut bytes)?;
                    bytes
                }
                #[cfg(not(feature = "lz4"))]
                {
                    return Err(IdxError::not_supported("lz4 compression (enable the `lz4` feature)"));
                }
            }
            Self::Snappy => {
                #[cfg(feature = "snap")]
                {
                    let mut bytes = Vec::with_capacity(expected_len);
                    Snappy::decompress_bytes(compressed, &mut bytes)?;
                    bytes
                }
                #[cfg(not(feature = "snap"))]
                {
                    return Err(IdxError::not_supported("snappy compression (enable the `snappy` feature)"));
                }
            }
        };

        if bytes.len() != expected_len {
            return Err(IdxError::backend(format!(
                "decoded {} bytes, expected {}",
                bytes.len(),
                expected_len
            )));
        }

        Ok(bytes)
    }
}

// ████████╗███████╗███████╗████████╗
// ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝
//    ██║   █████╗  ███████╗   ██║
//    ██║   ██╔══╝  ╚════██║   ██║
//    ██║   ███████╗███████║   ██║
//    ╚═╝   ╚══════╝╚══════╝   ╚═╝
