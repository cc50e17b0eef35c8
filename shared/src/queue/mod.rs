//! Durable on-device buffer for submissions that could not reach the
//! complaint store.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::Mutex;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::error::QueueError;
use crate::model::{CitizenId, ComplaintId, DraftComplaint, UnixTimeMs};
use crate::store::ComplaintStore;
use crate::MAX_QUEUE_CAPACITY;

/// Longest failure message kept on an entry.
const MAX_LAST_ERROR_LENGTH: usize = 512;

#[cfg(not(target_arch = "wasm32"))]
mod file;

#[cfg(not(target_arch = "wasm32"))]
pub use file::FileQueueStorage;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueueEntryId(String);

impl QueueEntryId {
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for QueueEntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Everything needed to replay a `create` later.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QueuedSubmission {
    pub citizen_id: CitizenId,
    pub draft: DraftComplaint,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OfflineQueueEntry {
    pub id: QueueEntryId,
    pub payload: QueuedSubmission,
    pub enqueued_at: UnixTimeMs,
    pub attempts: u32,
    pub last_error: Option<String>,
}

/// Outcome of one [`OfflineQueue::drain`] pass.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub synced: usize,
    pub failed: usize,
    /// Entries another drain was already replaying.
    pub skipped: usize,
    pub created: Vec<ComplaintId>,
}

/// Where the queue keeps its entries between restarts. The queue always
/// writes a full snapshot, oldest entry first.
#[async_trait]
pub trait QueueStorage: Send + Sync {
    async fn load(&self) -> Result<Vec<OfflineQueueEntry>, QueueError>;
    async fn save(&self, entries: &[OfflineQueueEntry]) -> Result<(), QueueError>;
}

/// Volatile storage for tests and targets without a filesystem.
#[derive(Default)]
pub struct MemoryQueueStorage {
    entries: Mutex<Vec<OfflineQueueEntry>>,
}

impl MemoryQueueStorage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl QueueStorage for MemoryQueueStorage {
    async fn load(&self) -> Result<Vec<OfflineQueueEntry>, QueueError> {
        Ok(self.entries.lock().await.clone())
    }

    async fn save(&self, entries: &[OfflineQueueEntry]) -> Result<(), QueueError> {
        *self.entries.lock().await = entries.to_vec();
        Ok(())
    }
}

pub struct OfflineQueue<Q: QueueStorage> {
    storage: Arc<Q>,
    capacity: usize,
    entries: Mutex<VecDeque<OfflineQueueEntry>>,
    in_flight: Arc<StdMutex<HashSet<QueueEntryId>>>,
}

/// Releases in-flight markers even if the drain future is dropped.
struct InFlightGuard {
    set: Arc<StdMutex<HashSet<QueueEntryId>>>,
    ids: Vec<QueueEntryId>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if let Ok(mut set) = self.set.lock() {
            for id in &self.ids {
                set.remove(id);
            }
        }
    }
}

impl<Q: QueueStorage> OfflineQueue<Q> {
    #[instrument(skip(storage))]
    pub async fn open(storage: Arc<Q>, capacity: usize) -> Result<Self, QueueError> {
        if capacity == 0 || capacity > MAX_QUEUE_CAPACITY {
            return Err(QueueError::CapacityOutOfRange {
                capacity,
                max: MAX_QUEUE_CAPACITY,
            });
        }
        let loaded = storage.load().await?;
        if loaded.len() > capacity {
            warn!(
                loaded = loaded.len(),
                capacity, "Offline queue holds more entries than its capacity"
            );
        }
        info!("Offline queue opened with {} entries", loaded.len());
        Ok(Self {
            storage,
            capacity,
            entries: Mutex::new(loaded.into()),
            in_flight: Arc::new(StdMutex::new(HashSet::new())),
        })
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    /// Snapshot of the pending entries, oldest first.
    pub async fn entries(&self) -> Vec<OfflineQueueEntry> {
        self.entries.lock().await.iter().cloned().collect()
    }

    /// Appends a submission and persists it before returning.
    #[instrument(skip(self, payload), fields(category = payload.draft.category.as_str()))]
    pub async fn enqueue(&self, payload: QueuedSubmission) -> Result<QueueEntryId, QueueError> {
        let mut entries = self.entries.lock().await;
        if entries.len() >= self.capacity {
            warn!(capacity = self.capacity, "Offline queue is full");
            return Err(QueueError::Full { max: self.capacity });
        }

        let entry = OfflineQueueEntry {
            id: QueueEntryId::generate(),
            payload,
            enqueued_at: UnixTimeMs::now(),
            attempts: 0,
            last_error: None,
        };
        let id = entry.id.clone();

        // Memory first, then persist - rollback on failure
        entries.push_back(entry);
        if let Err(e) = self.storage.save(entries.make_contiguous()).await {
            entries.pop_back();
            error!("Failed to persist offline entry: {e}");
            return Err(e);
        }

        info!(entry_id = %id, "Submission queued offline");
        Ok(id)
    }

    /// Drops an entry without replaying it.
    pub async fn discard(&self, id: &QueueEntryId) -> Result<Option<OfflineQueueEntry>, QueueError> {
        let mut entries = self.entries.lock().await;
        let Some(index) = entries.iter().position(|e| &e.id == id) else {
            return Ok(None);
        };
        let removed = entries.remove(index);
        if let Err(e) = self.storage.save(entries.make_contiguous()).await {
            if let Some(entry) = removed {
                entries.insert(index, entry);
            }
            return Err(e);
        }
        Ok(removed)
    }

    /// Replays pending submissions against `store`, oldest first.
    ///
    /// A successful replay removes the entry. A failed one stays queued with
    /// its attempt count and last error updated, and the pass moves on to the
    /// next entry. Entries a concurrent drain is already replaying are left
    /// alone, so an entry is never submitted twice by overlapping drains.
    #[instrument(skip(self, store))]
    pub async fn drain<S>(&self, store: &S) -> Result<DrainReport, QueueError>
    where
        S: ComplaintStore + ?Sized,
    {
        let mut report = DrainReport::default();

        let (batch, _guard) = {
            let entries = self.entries.lock().await;
            let mut in_flight = self
                .in_flight
                .lock()
                .map_err(|_| QueueError::Storage("in-flight set lock poisoned".into()))?;
            let mut batch = Vec::new();
            for entry in entries.iter() {
                if in_flight.insert(entry.id.clone()) {
                    batch.push(entry.clone());
                } else {
                    report.skipped += 1;
                }
            }
            let guard = InFlightGuard {
                set: Arc::clone(&self.in_flight),
                ids: batch.iter().map(|e| e.id.clone()).collect(),
            };
            (batch, guard)
        };

        let mut unsaved: Option<QueueError> = None;

        for entry in batch {
            let result = store
                .create(&entry.payload.draft, &entry.payload.citizen_id)
                .await;

            let mut entries = self.entries.lock().await;
            match result {
                Ok(complaint) => {
                    entries.retain(|e| e.id != entry.id);
                    info!(entry_id = %entry.id, complaint_id = %complaint.id, "Queued submission synced");
                    report.synced += 1;
                    report.created.push(complaint.id);
                }
                Err(e) => {
                    if let Some(stored) = entries.iter_mut().find(|s| s.id == entry.id) {
                        stored.attempts = stored.attempts.saturating_add(1);
                        stored.last_error = Some(truncate_message(e.to_string()));
                    }
                    warn!(entry_id = %entry.id, "Queued submission failed to sync: {e}");
                    report.failed += 1;
                }
            }

            // A synced entry is already gone from memory; if this save fails
            // the next successful save still drops it from disk.
            match self.storage.save(entries.make_contiguous()).await {
                Ok(()) => unsaved = None,
                Err(e) => {
                    error!("Failed to persist offline queue: {e}");
                    unsaved = Some(e);
                }
            }
        }

        if let Some(e) = unsaved {
            return Err(e);
        }

        info!(
            synced = report.synced,
            failed = report.failed,
            skipped = report.skipped,
            "Offline queue drained"
        );
        Ok(report)
    }
}

fn truncate_message(mut message: String) -> String {
    if message.len() > MAX_LAST_ERROR_LENGTH {
        let mut end = MAX_LAST_ERROR_LENGTH;
        while !message.is_char_boundary(end) {
            end -= 1;
        }
        message.truncate(end);
    }
    message
}
