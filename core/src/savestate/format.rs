//! Binary savestate file format
//!
//! Layout (little-endian):
//!
//! ```text
//! [0..4]    magic "RPSV"
//! [4..8]    version: u32
//! [8]       flags: u8
//! [9..12]   reserved
//! [12..16]  metadata length: u32
//! [..]      metadata (JSON)
//! [+0..8]   frame size: u64 (uncompressed)
//! [+8..16]  frame checksum: u64 (xxh3 of the uncompressed frame)
//! [+16..20] payload length: u32
//! [..]      payload (LZ4 with prepended size if COMPRESSED, raw otherwise)
//! ```

use std::io::{self, Read, Write};

use byteorder::{ByteOrder, LittleEndian, ReadBytesExt, WriteBytesExt};
use lz4_flex::compress_prepend_size;
use xxhash_rust::xxh3::xxh3_64;

use crate::error::SavestateError;

use super::SavestateMetadata;

pub const SAVESTATE_MAGIC: [u8; 4] = *b"RPSV";
pub const SAVESTATE_VERSION: u32 = 1;

/// Upper bound on the metadata block, to reject corrupt length fields
const MAX_METADATA_LEN: usize = 1024 * 1024;

/// Best compression ratio LZ4 can reach, bounding the decompressed size
const MAX_LZ4_RATIO: u64 = 255;

bitflags::bitflags! {
    /// Savestate feature flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SavestateFlags: u8 {
        /// Payload is LZ4 compressed
        const COMPRESSED = 0b0000_0001;
    }
}

/// A decoded savestate file
#[derive(Debug, Clone, PartialEq)]
pub struct SavestateFile {
    pub metadata: SavestateMetadata,
    /// Serialized core state
    pub frame: Vec<u8>,
}

impl SavestateFile {
    pub fn new(metadata: SavestateMetadata, frame: Vec<u8>) -> Self {
        Self { metadata, frame }
    }

    /// Encode to `writer`, compressing the frame if `compress` is set
    pub fn write_to<W: Write>(&self, mut writer: W, compress: bool) -> Result<(), SavestateError> {
        let flags = if compress {
            SavestateFlags::COMPRESSED
        } else {
            SavestateFlags::empty()
        };
        let metadata = serde_json::to_vec(&self.metadata)?;

        writer.write_all(&SAVESTATE_MAGIC)?;
        writer.write_u32::<LittleEndian>(SAVESTATE_VERSION)?;
        writer.write_u8(flags.bits())?;
        writer.write_all(&[0u8; 3])?;
        writer.write_u32::<LittleEndian>(len_u32(metadata.len())?)?;
        writer.write_all(&metadata)?;

        writer.write_u64::<LittleEndian>(self.frame.len() as u64)?;
        writer.write_u64::<LittleEndian>(xxh3_64(&self.frame))?;
        if compress {
            let payload = compress_prepend_size(&self.frame);
            writer.write_u32::<LittleEndian>(len_u32(payload.len())?)?;
            writer.write_all(&payload)?;
        } else {
            writer.write_u32::<LittleEndian>(len_u32(self.frame.len())?)?;
            writer.write_all(&self.frame)?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Decode from `reader`, validating magic, version, size and checksum
    pub fn read_from<R: Read>(mut reader: R) -> Result<Self, SavestateError> {
        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic)?;
        if magic != SAVESTATE_MAGIC {
            return Err(SavestateError::InvalidMagic(magic));
        }

        let version = reader.read_u32::<LittleEndian>()?;
        if version != SAVESTATE_VERSION {
            return Err(SavestateError::UnsupportedVersion(version));
        }

        let flags = SavestateFlags::from_bits_truncate(reader.read_u8()?);
        let mut reserved = [0u8; 3];
        reader.read_exact(&mut reserved)?;

        let metadata_len = reader.read_u32::<LittleEndian>()? as usize;
        if metadata_len > MAX_METADATA_LEN {
            return Err(invalid_data("savestate metadata too large").into());
        }
        let mut metadata = vec![0u8; metadata_len];
        reader.read_exact(&mut metadata)?;
        let metadata: SavestateMetadata = serde_json::from_slice(&metadata)?;

        let frame_size = reader.read_u64::<LittleEndian>()?;
        let checksum = reader.read_u64::<LittleEndian>()?;
        let payload_len = reader.read_u32::<LittleEndian>()? as usize;

        let mut payload = Vec::new();
        reader.take(payload_len as u64).read_to_end(&mut payload)?;
        if payload.len() != payload_len {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "truncated savestate").into());
        }

        let frame = if flags.contains(SavestateFlags::COMPRESSED) {
            decompress_frame(&payload, frame_size)?
        } else {
            payload
        };

        if frame.len() as u64 != frame_size {
            return Err(SavestateError::SizeMismatch {
                expected: frame_size as usize,
                actual: frame.len(),
            });
        }

        let actual = xxh3_64(&frame);
        if actual != checksum {
            return Err(SavestateError::ChecksumMismatch {
                expected: checksum,
                actual,
            });
        }

        Ok(Self { metadata, frame })
    }
}

fn len_u32(len: usize) -> Result<u32, SavestateError> {
    u32::try_from(len).map_err(|_| invalid_data("savestate section exceeds 4 GiB").into())
}

/// Decompress a size-prefixed LZ4 payload into exactly `frame_size` bytes
///
/// The prefix is checked before anything is allocated.
fn decompress_frame(payload: &[u8], frame_size: u64) -> Result<Vec<u8>, SavestateError> {
    if payload.len() < 4 {
        return Err(invalid_data("compressed payload missing size prefix").into());
    }
    let (prefix, block) = payload.split_at(4);
    let size = u64::from(LittleEndian::read_u32(prefix));
    if size != frame_size {
        return Err(SavestateError::SizeMismatch {
            expected: frame_size as usize,
            actual: size as usize,
        });
    }
    if size > (block.len() as u64).saturating_mul(MAX_LZ4_RATIO) {
        return Err(invalid_data("compressed payload too small for its frame size").into());
    }
    Ok(lz4_flex::block::decompress(block, size as usize)?)
}

fn invalid_data(message: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, message.to_string())
}
