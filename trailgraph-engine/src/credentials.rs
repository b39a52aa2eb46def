//! Credential store: sessions and signing secrets with expiry
//!
//! Entries carry their own deadline. Expired entries are invisible to
//! readers and removed lazily on access or in bulk by [`CredentialStore::purge_expired`].

use fjall::Partition;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use trailgraph_core::auth::{SessionToken, SigningSecret};
use trailgraph_core::*;

use crate::{now_ms, store_err, StorageEngine};

const PARTITION: &str = "credentials";

#[derive(Debug, Serialize, Deserialize)]
struct Expiring<T> {
    value: T,
    expires_at_ms: i64,
}

impl<T> Expiring<T> {
    fn is_expired(&self, now_ms: i64) -> bool {
        now_ms >= self.expires_at_ms
    }
}

/// Durable key-value store for credentials
#[derive(Clone)]
pub struct CredentialStore {
    partition: Arc<Partition>,
    engine: StorageEngine,
}

impl CredentialStore {
    pub(crate) fn new(engine: StorageEngine) -> Result<Self> {
        let partition = engine.partition(PARTITION)?;
        Ok(CredentialStore { partition, engine })
    }

    /// Store a browser session for `identity`
    pub fn put_session(
        &self,
        token: &SessionToken,
        identity: &Identity,
        ttl: Duration,
    ) -> Result<()> {
        self.put(&session_key(token), identity, ttl)
    }

    /// Resolve a session token, `None` if unknown or expired
    pub fn session(&self, token: &SessionToken) -> Result<Option<Identity>> {
        self.get(&session_key(token))
    }

    /// Replace the user's signing secret
    pub fn put_secret(&self, user_id: UserId, secret: &SigningSecret, ttl: Duration) -> Result<()> {
        self.put(&secret_key(user_id), secret, ttl)
    }

    /// Current signing secret, `None` if absent or expired
    pub fn secret(&self, user_id: UserId) -> Result<Option<SigningSecret>> {
        self.get(&secret_key(user_id))
    }

    pub fn delete_secret(&self, user_id: UserId) -> Result<()> {
        self.delete(&secret_key(user_id))
    }

    /// Log out: drop the session and its user's signing secret together.
    ///
    /// Returns the identity the session belonged to, `None` if it was
    /// unknown or already expired (nothing is removed then).
    pub fn end_session(&self, token: &SessionToken) -> Result<Option<Identity>> {
        let identity: Identity = match self.get(&session_key(token))? {
            Some(identity) => identity,
            None => return Ok(None),
        };

        let mut batch = self.engine.keyspace().batch();
        batch.remove(&self.partition, session_key(token).as_slice());
        batch.remove(&self.partition, secret_key(identity.user_id).as_slice());
        batch.commit().map_err(store_err)?;
        self.engine.persist()?;

        Ok(Some(identity))
    }

    /// Remove every expired entry, returning how many were dropped
    pub fn purge_expired(&self) -> Result<usize> {
        let now = now_ms();
        let mut expired = Vec::new();

        for item in self.partition.iter() {
            let (key, value) = item.map_err(store_err)?;
            // Only the deadline is needed here, whatever the value type.
            match serde_json::from_slice::<Expiring<serde_json::Value>>(&value) {
                Ok(entry) if !entry.is_expired(now) => {}
                _ => expired.push(key.to_vec()),
            }
        }

        if expired.is_empty() {
            return Ok(0);
        }

        let mut batch = self.engine.keyspace().batch();
        for key in &expired {
            batch.remove(&self.partition, key.as_slice());
        }
        batch.commit().map_err(store_err)?;
        self.engine.persist()?;

        Ok(expired.len())
    }

    fn put<T: Serialize>(&self, key: &[u8], value: &T, ttl: Duration) -> Result<()> {
        let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
        let entry = Expiring {
            value,
            expires_at_ms: now_ms().saturating_add(ttl_ms),
        };
        let bytes = serde_json::to_vec(&entry)?;

        self.partition.insert(key, bytes).map_err(store_err)?;
        self.engine.persist()
    }

    fn get<T: DeserializeOwned>(&self, key: &[u8]) -> Result<Option<T>> {
        let bytes = match self.partition.get(key).map_err(store_err)? {
            Some(bytes) => bytes,
            None => return Ok(None),
        };

        let entry: Expiring<T> = serde_json::from_slice(&bytes)?;
        if entry.is_expired(now_ms()) {
            self.partition.remove(key).map_err(store_err)?;
            return Ok(None);
        }

        Ok(Some(entry.value))
    }

    fn delete(&self, key: &[u8]) -> Result<()> {
        self.partition.remove(key).map_err(store_err)?;
        self.engine.persist()
    }
}

fn session_key(token: &SessionToken) -> Vec<u8> {
    format!("session:{}", token.as_str()).into_bytes()
}

fn secret_key(user_id: UserId) -> Vec<u8> {
    format!("secret:{}", user_id).into_bytes()
}
