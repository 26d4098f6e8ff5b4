use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, ErrorKind};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use posguard_core::{MetadataPatch, MetadataStore, PositionMetadata};

/// Errors from the file-backed metadata store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// IO error reading or writing the data file.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The data file does not parse as JSON.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The writer lock stayed contended through every retry.
    #[error("store locked after {attempts} attempts")]
    Locked { attempts: u32 },
}

/// Metadata store over one JSON file keyed by ticket.
///
/// Records are kept as raw JSON objects internally so a patch applied to a
/// never-tracked ticket still lands (and is returned as `None` until the
/// record is complete enough to type).
pub struct FileMetadataStore {
    path: PathBuf,
    lock_path: PathBuf,
    max_attempts: u32,
    backoff_base: Duration,
}

impl FileMetadataStore {
    /// Store over `path` with the default lock discipline: 5 attempts,
    /// backoff growing linearly from 100ms.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::with_retry(path, 5, Duration::from_millis(100))
    }

    #[must_use]
    pub fn with_retry(path: impl Into<PathBuf>, max_attempts: u32, backoff_base: Duration) -> Self {
        let path = path.into();
        let mut lock_path = path.clone().into_os_string();
        lock_path.push(".lock");
        Self {
            path,
            lock_path: PathBuf::from(lock_path),
            max_attempts,
            backoff_base,
        }
    }

    /// Write the full record for a ticket, replacing any existing one. Used
    /// at execution time when a position is first tracked; governance actions
    /// only ever patch.
    pub async fn put(&self, ticket: u64, metadata: &PositionMetadata) -> Result<(), StoreError> {
        let record = serde_json::to_value(metadata)?;
        let _guard = self.acquire_lock().await?;
        let mut root = read_root(&self.path)?;
        root.insert(ticket.to_string(), record);
        write_root(&self.path, &root)
    }

    /// Merge a patch into the stored record under the writer lock.
    pub async fn update(&self, ticket: u64, patch: &MetadataPatch) -> Result<(), StoreError> {
        let patch_obj = match serde_json::to_value(patch)? {
            Value::Object(map) => map,
            _ => Map::new(),
        };

        let _guard = self.acquire_lock().await?;
        let mut root = read_root(&self.path)?;
        let record = root
            .entry(ticket.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if let Value::Object(fields) = record {
            for (key, value) in patch_obj {
                fields.insert(key, value);
            }
        }
        write_root(&self.path, &root)
    }

    /// Read the typed record for a ticket. A record that exists but cannot be
    /// typed (for example one created by patching a never-tracked ticket) is
    /// reported as absent with a warning.
    pub fn get(&self, ticket: u64) -> Result<Option<PositionMetadata>, StoreError> {
        let root = read_root(&self.path)?;
        let Some(record) = root.get(&ticket.to_string()) else {
            return Ok(None);
        };
        match serde_json::from_value(record.clone()) {
            Ok(meta) => Ok(Some(meta)),
            Err(e) => {
                warn!(ticket, error = %e, "Stored record is not a complete metadata record");
                Ok(None)
            }
        }
    }

    async fn acquire_lock(&self) -> Result<LockGuard, StoreError> {
        for attempt in 1..=self.max_attempts {
            match OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&self.lock_path)
            {
                Ok(_) => {
                    return Ok(LockGuard {
                        path: self.lock_path.clone(),
                    })
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    debug!(
                        attempt,
                        max_attempts = self.max_attempts,
                        "Store locked, backing off"
                    );
                    tokio::time::sleep(self.backoff_base * attempt).await;
                }
                Err(e) => return Err(StoreError::Io(e)),
            }
        }
        Err(StoreError::Locked {
            attempts: self.max_attempts,
        })
    }
}

/// Removes the lock file when the write completes or fails.
struct LockGuard {
    path: PathBuf,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), error = %e, "Failed to release store lock");
        }
    }
}

fn read_root(path: &Path) -> Result<Map<String, Value>, StoreError> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Map::new()),
        Err(e) => return Err(StoreError::Io(e)),
    };
    let value: Value = serde_json::from_reader(BufReader::new(file))?;
    match value {
        Value::Object(map) => Ok(map),
        _ => Ok(Map::new()),
    }
}

/// Write via temp file and rename so concurrent readers never observe a torn
/// file.
fn write_root(path: &Path, root: &Map<String, Value>) -> Result<(), StoreError> {
    let tmp = path.with_extension("tmp");
    let file = File::create(&tmp)?;
    serde_json::to_writer_pretty(BufWriter::new(file), root)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

#[async_trait]
impl MetadataStore for FileMetadataStore {
    async fn get_position_metadata(&self, ticket: u64) -> Result<Option<PositionMetadata>> {
        Ok(self.get(ticket)?)
    }

    async fn update_position_metadata(&self, ticket: u64, patch: MetadataPatch) -> Result<()> {
        Ok(self.update(ticket, &patch).await?)
    }

    /// No-op by contract: the write-ahead patch stands after a broker
    /// rejection, and a later cycle re-attempts if the trigger still holds.
    async fn rollback_position_modification(&self, ticket: u64) -> Result<()> {
        debug!(ticket, "Rollback requested, keeping write-ahead state");
        Ok(())
    }
}
