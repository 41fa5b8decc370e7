use crate::error::StorageError;

pub const HEADER_LEN: usize = 32;

const MAGIC: [u8; 4] = *b"NVTX";
const FORMAT_VERSION: u16 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Compression {
    None = 0,
    Zstd = 1,
}

impl Compression {
    fn from_tag(tag: u8) -> Result<Self, StorageError> {
        match tag {
            0 => Ok(Compression::None),
            1 => Ok(Compression::Zstd),
            other => Err(StorageError::UnsupportedCompression(other)),
        }
    }
}

/// Fixed-size little-endian header in front of every spilled text.
///
/// ```text
/// 0..4   magic "NVTX"
/// 4..6   format version
/// 6      compression tag
/// 7      reserved
/// 8..16  uncompressed length
/// 16..24 payload length (as stored)
/// 24..32 content hash (blake3 of the uncompressed bytes, first 8 bytes)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextHeader {
    pub compression: Compression,
    pub uncompressed_len: u64,
    pub payload_len: u64,
    pub content_hash: u64,
}

impl TextHeader {
    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        out[0..4].copy_from_slice(&MAGIC);
        out[4..6].copy_from_slice(&FORMAT_VERSION.to_le_bytes());
        out[6] = self.compression as u8;
        out[8..16].copy_from_slice(&self.uncompressed_len.to_le_bytes());
        out[16..24].copy_from_slice(&self.payload_len.to_le_bytes());
        out[24..32].copy_from_slice(&self.content_hash.to_le_bytes());
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, StorageError> {
        if bytes.len() < HEADER_LEN {
            return Err(StorageError::Truncated {
                expected: HEADER_LEN,
                found: bytes.len(),
            });
        }
        if bytes[0..4] != MAGIC {
            return Err(StorageError::InvalidHeader("bad magic"));
        }
        if u16::from_le_bytes([bytes[4], bytes[5]]) != FORMAT_VERSION {
            return Err(StorageError::InvalidHeader("unsupported format version"));
        }

        Ok(Self {
            compression: Compression::from_tag(bytes[6])?,
            uncompressed_len: read_u64(&bytes[8..16]),
            payload_len: read_u64(&bytes[16..24]),
            content_hash: read_u64(&bytes[24..32]),
        })
    }
}

fn read_u64(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[..8]);
    u64::from_le_bytes(buf)
}

pub(crate) fn content_hash(bytes: &[u8]) -> u64 {
    read_u64(blake3::hash(bytes).as_bytes())
}
