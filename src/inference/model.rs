//! GGUF header checks
//!
//! A downloaded file is only handed to the engine once its header looks like
//! a GGUF model we can load.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use thiserror::Error;

/// GGUF magic bytes (little-endian: "GGUF")
pub const GGUF_MAGIC: u32 = 0x46554747;

/// magic(4) + version(4) + tensor_count(8) + metadata_kv_count(8)
const HEADER_LEN: usize = 24;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("Failed to read model file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid GGUF file: magic bytes mismatch (expected 0x{:08X}, got 0x{:08X})", GGUF_MAGIC, .0)]
    InvalidMagic(u32),

    #[error("Unsupported GGUF version: {0}")]
    UnsupportedVersion(u32),

    #[error("File too small to be valid GGUF")]
    FileTooSmall,
}

/// Fixed-size header at the start of every GGUF file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GgufHeader {
    pub version: u32,
    pub tensor_count: u64,
    pub metadata_kv_count: u64,
}

/// Reads and checks a GGUF header from the start of `reader`.
pub fn read_gguf_header<R: Read>(mut reader: R) -> Result<GgufHeader, ModelError> {
    let mut buf = [0u8; HEADER_LEN];
    let mut filled = 0;
    while filled < HEADER_LEN {
        match reader.read(&mut buf[filled..])? {
            0 => return Err(ModelError::FileTooSmall),
            n => filled += n,
        }
    }

    let magic = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
    if magic != GGUF_MAGIC {
        return Err(ModelError::InvalidMagic(magic));
    }

    let version = u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]);
    if !(2..=3).contains(&version) {
        return Err(ModelError::UnsupportedVersion(version));
    }

    let mut tensor_count = [0u8; 8];
    tensor_count.copy_from_slice(&buf[8..16]);
    let mut metadata_kv_count = [0u8; 8];
    metadata_kv_count.copy_from_slice(&buf[16..24]);

    Ok(GgufHeader {
        version,
        tensor_count: u64::from_le_bytes(tensor_count),
        metadata_kv_count: u64::from_le_bytes(metadata_kv_count),
    })
}

/// Checks the GGUF header of the file at `path`.
pub fn validate_gguf<P: AsRef<Path>>(path: P) -> Result<GgufHeader, ModelError> {
    let file = File::open(path)?;
    read_gguf_header(BufReader::new(file))
}

#[cfg(test)]
pub(crate) fn header_bytes(version: u32, tensors: u64, kvs: u64) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(HEADER_LEN);
    bytes.extend_from_slice(&GGUF_MAGIC.to_le_bytes());
    bytes.extend_from_slice(&version.to_le_bytes());
    bytes.extend_from_slice(&tensors.to_le_bytes());
    bytes.extend_from_slice(&kvs.to_le_bytes());
    bytes
}
