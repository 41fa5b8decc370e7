use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid header: {0}")]
    InvalidHeader(&'static str),
    #[error("truncated file: expected at least {expected} bytes, found {found}")]
    Truncated { expected: usize, found: usize },
    #[error("unsupported compression tag {0}")]
    UnsupportedCompression(u8),
    #[error("compression failed: {0}")]
    Compression(String),
    #[error("decompression failed: {0}")]
    Decompression(String),
    #[error("payload hash mismatch: expected {expected}, found {found}")]
    HashMismatch { expected: u64, found: u64 },
    #[error("stored text is not valid utf-8")]
    InvalidUtf8,
    #[error("temporary storage was already written")]
    AlreadyWritten,
    #[error("temporary storage has not been written yet")]
    NotWritten,
}
