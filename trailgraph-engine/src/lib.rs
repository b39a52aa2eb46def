//! Durable stores for trailgraph, built on a single fjall keyspace

use fjall::{Config, Keyspace, Partition, PartitionCreateOptions, PersistMode};
use std::path::Path;
use std::sync::Arc;
use trailgraph_core::*;

pub mod buffer;
pub mod credentials;
pub mod graph;
pub mod users;

pub use buffer::*;
pub use credentials::*;
pub use graph::*;
pub use users::*;

/// Storage engine wrapping a fjall keyspace.
///
/// Cheap to clone; every store handle produced from it shares the keyspace.
#[derive(Clone)]
pub struct StorageEngine {
    keyspace: Arc<Keyspace>,
}

impl StorageEngine {
    /// Create new storage engine at the given path
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let config = Config::new(path);
        let keyspace = Arc::new(config.open().map_err(store_err)?);

        Ok(StorageEngine { keyspace })
    }

    /// Create temporary storage engine for testing
    #[cfg(any(test, feature = "test-utils"))]
    pub fn temp() -> Result<(Self, tempfile::TempDir)> {
        let temp_dir = tempfile::tempdir()?;
        let engine = Self::new(temp_dir.path())?;
        Ok((engine, temp_dir))
    }

    pub fn credentials(&self) -> Result<CredentialStore> {
        CredentialStore::new(self.clone())
    }

    pub fn event_buffer(&self) -> Result<EventBuffer> {
        EventBuffer::new(self.clone())
    }

    pub fn graph(&self) -> Result<GraphStore> {
        GraphStore::new(self.clone())
    }

    pub fn users(&self) -> Result<UserDirectory> {
        UserDirectory::new(self.clone())
    }

    /// Get the underlying keyspace
    pub(crate) fn keyspace(&self) -> &Keyspace {
        &self.keyspace
    }

    pub(crate) fn partition(&self, name: &str) -> Result<Arc<Partition>> {
        let partition = self
            .keyspace
            .open_partition(name, PartitionCreateOptions::default())
            .map_err(store_err)?;
        Ok(Arc::new(partition))
    }

    /// Persist all changes to disk
    pub fn persist(&self) -> Result<()> {
        self.keyspace
            .persist(PersistMode::SyncAll)
            .map_err(store_err)
    }
}

pub(crate) fn store_err(e: impl std::fmt::Display) -> TrailError {
    TrailError::StoreUnavailable(e.to_string())
}

pub(crate) fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
