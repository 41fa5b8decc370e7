use std::fs;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use memmap2::MmapOptions;
use parking_lot::Mutex;

use crate::error::StorageError;
use crate::header::{content_hash, Compression, TextHeader, HEADER_LEN};
use crate::{StorageCounters, StorageStats, TemporaryStorage, TemporaryStorageService};

static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Spills texts to files under a directory, one file per storage handle.
///
/// Payloads at least `compression_threshold` bytes long are zstd-compressed.
/// Files are removed when their handle is dropped.
#[derive(Debug)]
pub struct FileStorageService {
    dir: PathBuf,
    compression_threshold: usize,
    next_id: AtomicU64,
    counters: Arc<StorageCounters>,
}

impl FileStorageService {
    pub fn new(dir: impl Into<PathBuf>, compression_threshold: usize) -> Result<Self, StorageError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            compression_threshold,
            next_id: AtomicU64::new(1),
            counters: Arc::default(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl TemporaryStorageService for FileStorageService {
    fn create_storage(&self) -> Result<Arc<dyn TemporaryStorage>, StorageError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let path = self
            .dir
            .join(format!("nova-text-{}-{id}.bin", std::process::id()));
        Ok(Arc::new(FileStorage {
            path,
            compression_threshold: self.compression_threshold,
            written: Mutex::new(false),
            counters: self.counters.clone(),
        }))
    }

    fn stats(&self) -> StorageStats {
        self.counters.snapshot()
    }
}

/// A write-once file holding one spilled text.
#[derive(Debug)]
pub struct FileStorage {
    path: PathBuf,
    compression_threshold: usize,
    written: Mutex<bool>,
    counters: Arc<StorageCounters>,
}

impl FileStorage {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl TemporaryStorage for FileStorage {
    fn write_text(&self, text: &str) -> Result<(), StorageError> {
        // Held across the write so a racing second writer observes the first.
        let mut written = self.written.lock();
        if *written {
            return Err(StorageError::AlreadyWritten);
        }

        let compression = if text.len() >= self.compression_threshold {
            Compression::Zstd
        } else {
            Compression::None
        };
        write_text_atomic(&self.path, text.as_bytes(), compression)?;

        *written = true;
        self.counters.record_write();
        tracing::trace!(
            target = "nova.storage",
            path = %self.path.display(),
            bytes = text.len(),
            ?compression,
            "spilled text to temporary storage"
        );
        Ok(())
    }

    fn read_text(&self) -> Result<String, StorageError> {
        if !*self.written.lock() {
            return Err(StorageError::NotWritten);
        }
        self.counters.record_read();
        read_text_file(&self.path)
    }

    fn is_written(&self) -> bool {
        *self.written.lock()
    }
}

impl Drop for FileStorage {
    fn drop(&mut self) {
        if !*self.written.get_mut() {
            return;
        }
        if let Err(err) = fs::remove_file(&self.path) {
            if err.kind() != io::ErrorKind::NotFound {
                tracing::debug!(
                    target = "nova.storage",
                    path = %self.path.display(),
                    error = %err,
                    "failed to remove temporary storage file"
                );
            }
        }
    }
}

fn write_text_atomic(path: &Path, bytes: &[u8], compression: Compression) -> Result<(), StorageError> {
    let parent = path
        .parent()
        .ok_or(StorageError::InvalidHeader("missing parent directory"))?;
    let (tmp_path, file) = open_unique_tmp_file(path, parent)?;

    let result = (|| -> Result<(), StorageError> {
        let (mut file, payload_len) = write_payload(file, bytes, compression)?;
        let header = TextHeader {
            compression,
            uncompressed_len: bytes.len() as u64,
            payload_len,
            content_hash: content_hash(bytes),
        };

        // Replace the placeholder header now that the payload length is known.
        file.seek(SeekFrom::Start(0))?;
        file.write_all(&header.encode())?;
        file.sync_all()?;
        drop(file);

        fs::rename(&tmp_path, path)?;
        Ok(())
    })();

    if result.is_err() {
        let _ = fs::remove_file(&tmp_path);
    }
    result
}

fn write_payload(
    mut file: fs::File,
    payload: &[u8],
    compression: Compression,
) -> Result<(fs::File, u64), StorageError> {
    file.write_all(&[0u8; HEADER_LEN])?;

    match compression {
        Compression::None => {
            file.write_all(payload)?;
            Ok((file, payload.len() as u64))
        }
        Compression::Zstd => {
            let mut encoder = zstd::stream::write::Encoder::new(file, 0)
                .map_err(|e| StorageError::Compression(e.to_string()))?;
            encoder.write_all(payload)?;
            let mut file = encoder
                .finish()
                .map_err(|e| StorageError::Compression(e.to_string()))?;
            let end = file.seek(SeekFrom::End(0))?;
            let payload_len = end
                .checked_sub(HEADER_LEN as u64)
                .ok_or(StorageError::InvalidHeader("payload length underflow"))?;
            Ok((file, payload_len))
        }
    }
}

fn open_unique_tmp_file(dest: &Path, parent: &Path) -> io::Result<(PathBuf, fs::File)> {
    let file_name = dest
        .file_name()
        .ok_or_else(|| io::Error::other("destination path has no file name"))?;

    loop {
        let counter = TMP_COUNTER.fetch_add(1, Ordering::Relaxed);
        let mut tmp_name = file_name.to_os_string();
        tmp_name.push(format!(".tmp.{counter}"));
        let tmp_path = parent.join(tmp_name);

        match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&tmp_path)
        {
            Ok(file) => return Ok((tmp_path, file)),
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(err) => return Err(err),
        }
    }
}

fn read_text_file(path: &Path) -> Result<String, StorageError> {
    let file = fs::File::open(path)?;

    // SAFETY: the file is private to this process and never modified after the
    // atomic rename; a concurrent external truncation surfaces as a hash or
    // length mismatch, not as undefined behaviour we rely on.
    let bytes = match unsafe { MmapOptions::new().map(&file) } {
        Ok(mmap) => decode_payload(&mmap)?,
        Err(err) => {
            tracing::debug!(
                target = "nova.storage",
                path = %path.display(),
                error = %err,
                "mmap failed; falling back to buffered read"
            );
            let mut owned = Vec::new();
            let mut file = file;
            file.read_to_end(&mut owned)?;
            decode_payload(&owned)?
        }
    };

    String::from_utf8(bytes).map_err(|_| StorageError::InvalidUtf8)
}

fn decode_payload(bytes: &[u8]) -> Result<Vec<u8>, StorageError> {
    let header = TextHeader::decode(bytes)?;
    let payload_len = usize::try_from(header.payload_len)
        .map_err(|_| StorageError::InvalidHeader("payload length overflow"))?;
    let end = HEADER_LEN
        .checked_add(payload_len)
        .ok_or(StorageError::InvalidHeader("payload length overflow"))?;
    if bytes.len() < end {
        return Err(StorageError::Truncated {
            expected: end,
            found: bytes.len(),
        });
    }
    let payload = &bytes[HEADER_LEN..end];

    let uncompressed = match header.compression {
        Compression::None => payload.to_vec(),
        Compression::Zstd => {
            let mut decoder = zstd::stream::read::Decoder::new(payload)
                .map_err(|e| StorageError::Decompression(e.to_string()))?;
            let mut out = Vec::with_capacity(payload.len().saturating_mul(4));
            decoder
                .read_to_end(&mut out)
                .map_err(|e| StorageError::Decompression(e.to_string()))?;
            out
        }
    };

    if uncompressed.len() as u64 != header.uncompressed_len {
        return Err(StorageError::InvalidHeader("uncompressed length mismatch"));
    }

    let found = content_hash(&uncompressed);
    if found != header.content_hash {
        return Err(StorageError::HashMismatch {
            expected: header.content_hash,
            found,
        });
    }
    Ok(uncompressed)
}
