use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, instrument};

use super::{OfflineQueueEntry, QueueStorage};
use crate::error::QueueError;
use crate::MAX_QUEUE_CAPACITY;

const CURRENT_SCHEMA_VERSION: u32 = 1;
const MAX_FILE_BYTES: usize = 32 * 1024 * 1024;
const MAX_ENTRIES: usize = MAX_QUEUE_CAPACITY;
const QUEUE_MAGIC: &[u8; 4] = b"CQUE";

#[derive(Serialize, Deserialize, Debug)]
struct QueueEnvelope {
    magic: [u8; 4],
    schema_version: u32,
    checksum: [u8; 32],
    payload: Vec<u8>,
}

#[derive(Serialize, Deserialize, Debug)]
struct QueuePayload {
    entries: Vec<OfflineQueueEntry>,
}

/// Keeps the offline queue in a single file, rewritten atomically on every
/// change.
#[derive(Debug, Clone)]
pub struct FileQueueStorage {
    path: PathBuf,
}

impl FileQueueStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl QueueStorage for FileQueueStorage {
    #[instrument(skip(self), fields(path = %self.path.display()))]
    async fn load(&self) -> Result<Vec<OfflineQueueEntry>, QueueError> {
        let path = self.path.clone();
        let entries = tokio::task::spawn_blocking(move || load_from_path(&path))
            .await
            .map_err(|e| QueueError::Storage(e.to_string()))??;
        debug!(count = entries.len(), "Loaded offline queue file");
        Ok(entries)
    }

    #[instrument(skip(self, entries), fields(path = %self.path.display(), count = entries.len()))]
    async fn save(&self, entries: &[OfflineQueueEntry]) -> Result<(), QueueError> {
        let bytes = encode(entries)?;
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || write_atomically(&path, &bytes))
            .await
            .map_err(|e| QueueError::Storage(e.to_string()))?
    }
}

fn load_from_path(path: &Path) -> Result<Vec<OfflineQueueEntry>, QueueError> {
    if !path.exists() {
        return Ok(Vec::new());
    }

    let bytes = std::fs::read(path)?;

    if bytes.is_empty() {
        return Err(QueueError::Corrupted {
            reason: "empty file",
        });
    }

    decode(&bytes)
}

fn write_atomically(path: &Path, bytes: &[u8]) -> Result<(), QueueError> {
    let tmp_path = path.with_extension("tmp");

    let mut file = File::create(&tmp_path)?;
    file.write_all(bytes)?;
    file.sync_all()?;

    std::fs::rename(&tmp_path, path)?;

    if let Some(parent) = path.parent() {
        if let Ok(dir) = File::open(parent) {
            let _ = dir.sync_all();
        }
    }

    Ok(())
}

fn encode(entries: &[OfflineQueueEntry]) -> Result<Vec<u8>, QueueError> {
    let payload = QueuePayload {
        entries: entries.to_vec(),
    };

    let mut payload_bytes = Vec::new();
    ciborium::into_writer(&payload, &mut payload_bytes)?;

    let checksum = blake3::hash(&payload_bytes);

    let envelope = QueueEnvelope {
        magic: *QUEUE_MAGIC,
        schema_version: CURRENT_SCHEMA_VERSION,
        checksum: *checksum.as_bytes(),
        payload: payload_bytes,
    };

    let mut envelope_bytes = Vec::new();
    ciborium::into_writer(&envelope, &mut envelope_bytes)?;

    // Never write a file that load would refuse
    if envelope_bytes.len() > MAX_FILE_BYTES {
        return Err(QueueError::TooLarge {
            size: envelope_bytes.len(),
            max: MAX_FILE_BYTES,
        });
    }
    Ok(envelope_bytes)
}

fn decode(bytes: &[u8]) -> Result<Vec<OfflineQueueEntry>, QueueError> {
    if bytes.len() > MAX_FILE_BYTES {
        return Err(QueueError::TooLarge {
            size: bytes.len(),
            max: MAX_FILE_BYTES,
        });
    }

    let envelope: QueueEnvelope = ciborium::from_reader(bytes)?;

    if envelope.magic != *QUEUE_MAGIC {
        return Err(QueueError::Corrupted {
            reason: "invalid magic bytes",
        });
    }

    if envelope.schema_version > CURRENT_SCHEMA_VERSION {
        return Err(QueueError::FutureSchema {
            found: envelope.schema_version,
            max: CURRENT_SCHEMA_VERSION,
        });
    }

    let actual_checksum = blake3::hash(&envelope.payload);
    if actual_checksum.as_bytes() != &envelope.checksum {
        return Err(QueueError::IntegrityCheckFailed {
            expected: hex::encode(envelope.checksum),
            actual: hex::encode(actual_checksum.as_bytes()),
        });
    }

    let payload: QueuePayload = ciborium::from_reader(&envelope.payload[..])?;

    if payload.entries.len() > MAX_ENTRIES {
        return Err(QueueError::Corrupted {
            reason: "too many entries",
        });
    }

    Ok(payload.entries)
}
