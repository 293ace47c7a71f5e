//! Chunk codec: compression methods and the serialized chunk format

use crate::data_block::DataBlock;
use crate::error::{Result, VdsError};
use crate::types::{Components, Format, DIMENSIONALITY_MAX};
use crate::VDS_MAGIC;
use flate2::write::{DeflateDecoder, DeflateEncoder};
use flate2::Compression as FlateCompression;
use serde::{Deserialize, Serialize};
use std::io::Write;

/// Compression applied to chunk payloads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum CompressionMethod {
    None = 0,
    /// Deflate/ZIP
    Deflate = 1,
    /// Byte run-length encoding
    RLE = 2,
    Zstd = 3,
    /// Recognised in stored volumes but not decodable
    Wavelet = 4,
}

impl CompressionMethod {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(CompressionMethod::None),
            1 => Some(CompressionMethod::Deflate),
            2 => Some(CompressionMethod::RLE),
            3 => Some(CompressionMethod::Zstd),
            4 => Some(CompressionMethod::Wavelet),
            _ => None,
        }
    }

    pub fn is_supported(&self) -> bool {
        !matches!(self, CompressionMethod::Wavelet)
    }

    fn unsupported(&self) -> VdsError {
        VdsError::Compression(format!("{:?} compression is not supported", self))
    }
}

/// Effort level from 0 (store) to 9 (smallest output)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompressionLevel(u8);

impl CompressionLevel {
    pub fn new(level: u8) -> Self {
        Self(level.min(9))
    }

    pub fn fast() -> Self {
        Self(1)
    }

    pub fn best() -> Self {
        Self(9)
    }

    pub fn value(&self) -> u8 {
        self.0
    }

    /// Equivalent zstd level, spread over 1..=19
    fn zstd_level(&self) -> i32 {
        1 + self.0 as i32 * 2
    }
}

impl Default for CompressionLevel {
    fn default() -> Self {
        Self(6)
    }
}

/// Compresses and restores chunk payloads
pub trait Compressor: Send + Sync {
    fn compress(&self, data: &[u8], level: CompressionLevel) -> Result<Vec<u8>>;

    /// Restore a payload. `expected_len` is the uncompressed size recorded
    /// with it; a payload restoring to another size is rejected.
    fn decompress(&self, data: &[u8], expected_len: usize) -> Result<Vec<u8>>;
}

impl Compressor for CompressionMethod {
    fn compress(&self, data: &[u8], level: CompressionLevel) -> Result<Vec<u8>> {
        let compressed = match self {
            CompressionMethod::None => Ok(data.to_vec()),
            CompressionMethod::Deflate => {
                let mut encoder = DeflateEncoder::new(Vec::new(), FlateCompression::new(level.value() as u32));
                encoder.write_all(data).and_then(|_| encoder.finish())
            }
            CompressionMethod::RLE => Ok(rle_encode(data)),
            CompressionMethod::Zstd => zstd::encode_all(data, level.zstd_level()),
            CompressionMethod::Wavelet => return Err(self.unsupported()),
        };
        compressed.map_err(|e| VdsError::Compression(format!("{:?}: {}", self, e)))
    }

    fn decompress(&self, data: &[u8], expected_len: usize) -> Result<Vec<u8>> {
        let restored = match self {
            CompressionMethod::None => data.to_vec(),
            CompressionMethod::Deflate => {
                let mut decoder = DeflateDecoder::new(Vec::with_capacity(expected_len));
                decoder
                    .write_all(data)
                    .and_then(|_| decoder.finish())
                    .map_err(|e| VdsError::Decompression(format!("Deflate: {}", e)))?
            }
            CompressionMethod::RLE => rle_decode(data, expected_len)?,
            CompressionMethod::Zstd => {
                zstd::decode_all(data).map_err(|e| VdsError::Decompression(format!("Zstd: {}", e)))?
            }
            CompressionMethod::Wavelet => return Err(self.unsupported()),
        };
        if restored.len() != expected_len {
            return Err(VdsError::Decompression(format!(
                "{:?} payload restored to {} bytes, expected {}",
                self,
                restored.len(),
                expected_len
            )));
        }
        Ok(restored)
    }
}

/// Runs of up to 255 equal bytes as `(count, value)` pairs
fn rle_encode(data: &[u8]) -> Vec<u8> {
    let mut encoded = Vec::with_capacity(data.len() / 4);
    let mut rest = data;
    while let Some(&value) = rest.first() {
        let run = rest.iter().take(255).take_while(|&&byte| byte == value).count();
        encoded.extend([run as u8, value]);
        rest = &rest[run..];
    }
    encoded
}

fn rle_decode(data: &[u8], expected_len: usize) -> Result<Vec<u8>> {
    if data.len() % 2 != 0 {
        return Err(VdsError::Decompression(
            "RLE payload has an odd length".to_string(),
        ));
    }
    let mut decoded = Vec::with_capacity(expected_len);
    for pair in data.chunks_exact(2) {
        decoded.resize(decoded.len() + pair[0] as usize, pair[1]);
        if decoded.len() > expected_len {
            return Err(VdsError::Decompression(
                "RLE payload overruns the chunk".to_string(),
            ));
        }
    }
    Ok(decoded)
}

/// Header in front of every serialized chunk
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChunkHeader {
    pub magic: [u8; 4],
    pub format: u8,
    pub components: u8,
    pub size: [u32; DIMENSIONALITY_MAX],
    pub compression: u8,
    pub tolerance: f32,
    pub uncompressed_len: u64,
}

impl ChunkHeader {
    fn for_block(block: &DataBlock, compression: CompressionMethod, tolerance: f32) -> Self {
        Self {
            magic: *VDS_MAGIC,
            format: block.format().storage_code(),
            components: block.components().count() as u8,
            size: block.size().map(|n| n as u32),
            compression: compression as u8,
            tolerance,
            uncompressed_len: block.as_bytes().len() as u64,
        }
    }
}

/// Encodes data blocks into chunk objects and back
pub trait VolumeDataCodec: Send + Sync {
    fn encode(&self, block: &DataBlock) -> Result<Vec<u8>>;

    /// Deserialize a chunk, checking it against the expected geometry
    fn decode(
        &self,
        bytes: &[u8],
        format: Format,
        size: [usize; DIMENSIONALITY_MAX],
    ) -> Result<DataBlock>;
}

/// Codec writing a bincode header followed by the compressed samples.
/// Decoding honors the method recorded in each chunk.
#[derive(Debug, Clone, Copy)]
pub struct DefaultCodec {
    method: CompressionMethod,
    tolerance: f32,
    level: CompressionLevel,
}

impl DefaultCodec {
    pub fn new(method: CompressionMethod, tolerance: f32) -> Self {
        Self {
            method,
            tolerance,
            level: CompressionLevel::default(),
        }
    }

    pub fn with_level(mut self, level: CompressionLevel) -> Self {
        self.level = level;
        self
    }
}

impl VolumeDataCodec for DefaultCodec {
    fn encode(&self, block: &DataBlock) -> Result<Vec<u8>> {
        let header = ChunkHeader::for_block(block, self.method, self.tolerance);
        let mut bytes = bincode::serialize(&header)?;
        bytes.extend(self.method.compress(block.as_bytes(), self.level)?);
        Ok(bytes)
    }

    fn decode(
        &self,
        bytes: &[u8],
        format: Format,
        size: [usize; DIMENSIONALITY_MAX],
    ) -> Result<DataBlock> {
        let header: ChunkHeader = bincode::deserialize(bytes)?;
        if &header.magic != VDS_MAGIC {
            return Err(VdsError::InvalidFormat("Bad chunk magic".to_string()));
        }
        let stored_format = Format::from_storage_code(header.format).ok_or_else(|| {
            VdsError::InvalidFormat(format!("Unknown format code {}", header.format))
        })?;
        if stored_format != format || header.size.map(|n| n as usize) != size {
            return Err(VdsError::InvalidFormat(format!(
                "Chunk holds {:?} {:?}, expected {:?} {:?}",
                stored_format, header.size, format, size
            )));
        }
        let components = Components::from_count(header.components as usize).ok_or_else(|| {
            VdsError::InvalidFormat(format!("Invalid component count {}", header.components))
        })?;
        let method = CompressionMethod::from_u8(header.compression).ok_or_else(|| {
            VdsError::InvalidFormat(format!("Unknown compression {}", header.compression))
        })?;

        let offset = bincode::serialized_size(&header)? as usize;
        let payload = bytes
            .get(offset..)
            .ok_or_else(|| VdsError::InvalidFormat("Truncated chunk".to_string()))?;
        let data = method.decompress(payload, header.uncompressed_len as usize)?;
        DataBlock::from_bytes(format, components, size, data)
    }
}
