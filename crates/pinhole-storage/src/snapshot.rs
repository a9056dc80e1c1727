//! Whole-store snapshots for the in-memory backend.
//!
//! A snapshot is written once at shutdown and read once at startup. Writes
//! between the last snapshot and a crash are lost.
//!
//! Layout, integers little-endian:
//!
//! ```text
//! magic   [u8; 4]  "PNHL"
//! version u16
//! saved   i64      milliseconds since the Unix epoch
//! count   u64
//! count x { len: u32, body: [u8; len] }   body = bitcode(StoredUrl)
//! ```

use crate::memory::InMemoryRepository;
use jiff::Timestamp;
use pinhole_core::{ShortenerError, StorageError, StoredUrl};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::info;

pub const SNAPSHOT_MAGIC: [u8; 4] = *b"PNHL";
pub const SNAPSHOT_VERSION: u16 = 1;

const HEADER_LEN: usize = 4 + 2 + 8 + 8;

pub type Result<T> = std::result::Result<T, SnapshotError>;

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("snapshot i/o failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("not a snapshot file: bad magic {0:?}")]
    BadMagic([u8; 4]),
    #[error("unsupported snapshot version {found}; expected {expected}")]
    UnsupportedVersion { found: u16, expected: u16 },
    #[error("snapshot truncated: needed {needed} bytes at offset {offset}")]
    Truncated { offset: usize, needed: usize },
    #[error("snapshot has {0} trailing bytes")]
    TrailingBytes(usize),
    #[error("failed to encode record: {0}")]
    Encode(String),
    #[error("failed to decode record {index}: {message}")]
    Decode { index: u64, message: String },
    #[error("snapshot content is inconsistent: {0}")]
    Corrupt(String),
}

impl From<SnapshotError> for ShortenerError {
    fn from(value: SnapshotError) -> Self {
        ShortenerError::SerializationFailure(value.to_string())
    }
}

/// A decoded snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub saved_at: Timestamp,
    pub entries: Vec<StoredUrl>,
}

/// Encodes entries into the snapshot format.
pub fn encode(entries: &[StoredUrl], saved_at: Timestamp) -> Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(HEADER_LEN + entries.len() * 128);
    buf.extend_from_slice(&SNAPSHOT_MAGIC);
    buf.extend_from_slice(&SNAPSHOT_VERSION.to_le_bytes());
    buf.extend_from_slice(&saved_at.as_millisecond().to_le_bytes());
    buf.extend_from_slice(&(entries.len() as u64).to_le_bytes());

    for entry in entries {
        let body = bitcode::serialize(entry).map_err(|e| SnapshotError::Encode(e.to_string()))?;
        let len = u32::try_from(body.len())
            .map_err(|_| SnapshotError::Encode(format!("record '{}' too large", entry.code)))?;
        buf.extend_from_slice(&len.to_le_bytes());
        buf.extend_from_slice(&body);
    }

    Ok(buf)
}

/// Decodes a snapshot produced by [`encode`].
pub fn decode(bytes: &[u8]) -> Result<Snapshot> {
    let mut reader = Reader { bytes, offset: 0 };

    let magic: [u8; 4] = reader.array()?;
    if magic != SNAPSHOT_MAGIC {
        return Err(SnapshotError::BadMagic(magic));
    }

    let version = u16::from_le_bytes(reader.array()?);
    if version != SNAPSHOT_VERSION {
        return Err(SnapshotError::UnsupportedVersion {
            found: version,
            expected: SNAPSHOT_VERSION,
        });
    }

    let saved_ms = i64::from_le_bytes(reader.array()?);
    let saved_at = Timestamp::from_millisecond(saved_ms)
        .map_err(|e| SnapshotError::Corrupt(format!("invalid save time {saved_ms}: {e}")))?;

    let count = u64::from_le_bytes(reader.array()?);
    let mut entries = Vec::new();
    for index in 0..count {
        let len = u32::from_le_bytes(reader.array()?) as usize;
        let body = reader.take(len)?;
        let entry = bitcode::deserialize(body).map_err(|e| SnapshotError::Decode {
            index,
            message: e.to_string(),
        })?;
        entries.push(entry);
    }

    let rest = bytes.len() - reader.offset;
    if rest != 0 {
        return Err(SnapshotError::TrailingBytes(rest));
    }

    Ok(Snapshot { saved_at, entries })
}

struct Reader<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self
            .offset
            .checked_add(len)
            .filter(|end| *end <= self.bytes.len())
            .ok_or(SnapshotError::Truncated {
                offset: self.offset,
                needed: len,
            })?;
        let slice = &self.bytes[self.offset..end];
        self.offset = end;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }
}

/// Loads and saves the in-memory store at a fixed path.
#[derive(Debug, Clone)]
pub struct SnapshotPersister {
    path: PathBuf,
}

impl SnapshotPersister {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the snapshot into a fresh repository.
    ///
    /// A missing or empty file yields an empty repository. Any other failure
    /// is an error; the caller must not fall back to an empty store.
    pub async fn load(&self) -> Result<InMemoryRepository> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(path = %self.path.display(), "no snapshot found, starting empty");
                return Ok(InMemoryRepository::new());
            }
            Err(err) => return Err(err.into()),
        };

        if bytes.is_empty() {
            info!(path = %self.path.display(), "snapshot is empty, starting empty");
            return Ok(InMemoryRepository::new());
        }

        let snapshot = decode(&bytes)?;
        let records = snapshot.entries.len();
        let repository = InMemoryRepository::from_snapshot(snapshot.entries).map_err(|e| match e {
            StorageError::InvalidData(message) => SnapshotError::Corrupt(message),
            other => SnapshotError::Corrupt(other.to_string()),
        })?;

        info!(
            path = %self.path.display(),
            records,
            saved_at = %snapshot.saved_at,
            "snapshot loaded"
        );
        Ok(repository)
    }

    /// Writes the whole repository, replacing any previous snapshot.
    ///
    /// Returns only after the data is flushed to disk. A process killed
    /// mid-write can leave a truncated file, which the next `load` rejects.
    pub async fn save(&self, repository: &InMemoryRepository) -> Result<()> {
        let entries = repository.snapshot();
        let bytes = encode(&entries, Timestamp::now())?;

        let mut file = tokio::fs::File::create(&self.path).await?;
        file.write_all(&bytes).await?;
        file.flush().await?;
        file.sync_all().await?;

        info!(
            path = %self.path.display(),
            records = entries.len(),
            bytes = bytes.len(),
            "snapshot saved"
        );
        Ok(())
    }
}
