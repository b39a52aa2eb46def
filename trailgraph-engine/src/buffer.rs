//! Durable FIFO event buffer
//!
//! Records are keyed by monotonic ULIDs, so key order is enqueue order.
//! [`EventBuffer::drain`] removes exactly the entries it read: a record
//! enqueued while a drain is running is either returned by that drain or
//! left for the next one, never dropped.

use fjall::Partition;
use std::sync::{Arc, Mutex};
use trailgraph_core::*;
use ulid::{Generator, Ulid};

use crate::{store_err, StorageEngine};

const PARTITION: &str = "event_buffer";

/// Entry taken out of the buffer, still in its serialized form
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DrainedEntry {
    pub id: Ulid,
    pub bytes: Vec<u8>,
}

impl DrainedEntry {
    pub fn decode(&self) -> Result<BufferedRecord> {
        BufferedRecord::from_bytes(&self.bytes)
    }
}

/// Queue shared by all request handlers and the flush worker
#[derive(Clone)]
pub struct EventBuffer {
    partition: Arc<Partition>,
    engine: StorageEngine,
    ids: Arc<Mutex<Generator>>,
}

impl EventBuffer {
    pub(crate) fn new(engine: StorageEngine) -> Result<Self> {
        let partition = engine.partition(PARTITION)?;
        Ok(EventBuffer {
            partition,
            engine,
            ids: Arc::new(Mutex::new(Generator::new())),
        })
    }

    /// Append one validated record
    pub fn enqueue(&self, record: &BufferedRecord) -> Result<Ulid> {
        self.push_raw(&record.to_canonical_bytes()?)
    }

    /// Append several records in one atomic write
    pub fn enqueue_all(&self, records: &[BufferedRecord]) -> Result<usize> {
        if records.is_empty() {
            return Ok(0);
        }

        let mut batch = self.engine.keyspace().batch();
        for record in records {
            let id = self.next_id()?;
            batch.insert(&self.partition, id.to_bytes().to_vec(), record.to_canonical_bytes()?);
        }
        batch.commit().map_err(store_err)?;
        self.engine.persist()?;

        Ok(records.len())
    }

    /// Append already-serialized bytes
    pub fn push_raw(&self, bytes: &[u8]) -> Result<Ulid> {
        let id = self.next_id()?;
        self.partition
            .insert(id.to_bytes().to_vec(), bytes.to_vec())
            .map_err(store_err)?;
        self.engine.persist()?;
        Ok(id)
    }

    /// Take up to `max` of the oldest entries (all when `None`) and remove
    /// them in a single atomic write.
    pub fn drain(&self, max: Option<usize>) -> Result<Vec<DrainedEntry>> {
        let limit = max.unwrap_or(usize::MAX);
        let mut entries = Vec::new();

        for item in self.partition.iter() {
            if entries.len() >= limit {
                break;
            }
            let (key, value) = item.map_err(store_err)?;
            let id = decode_id(&key)?;
            entries.push(DrainedEntry {
                id,
                bytes: value.to_vec(),
            });
        }

        if entries.is_empty() {
            return Ok(entries);
        }

        let mut batch = self.engine.keyspace().batch();
        for entry in &entries {
            batch.remove(&self.partition, entry.id.to_bytes().to_vec());
        }
        batch.commit().map_err(store_err)?;
        self.engine.persist()?;

        Ok(entries)
    }

    pub fn len(&self) -> Result<usize> {
        self.partition.len().map_err(store_err)
    }

    pub fn is_empty(&self) -> Result<bool> {
        self.partition.is_empty().map_err(store_err)
    }

    fn next_id(&self) -> Result<Ulid> {
        let mut ids = self
            .ids
            .lock()
            .map_err(|_| TrailError::Internal("buffer id generator poisoned".to_string()))?;
        ids.generate()
            .map_err(|e| TrailError::Internal(format!("buffer id generation failed: {}", e)))
    }
}

fn decode_id(key: &[u8]) -> Result<Ulid> {
    let bytes: [u8; 16] = key
        .try_into()
        .map_err(|_| TrailError::Internal(format!("malformed buffer key of {} bytes", key.len())))?;
    Ok(Ulid::from_bytes(bytes))
}
