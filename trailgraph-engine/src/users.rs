//! Registered accounts
//!
//! Accounts are indexed twice: `email:<lowercased email>` maps to the id
//! and `id:<n>` holds the record. Ids come from a counter in the `meta`
//! partition.

use argon2::{
    password_hash::{rand_core, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use chrono::{DateTime, Utc};
use fjall::Partition;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use trailgraph_core::*;

use crate::{store_err, StorageEngine};

const USERS: &str = "users";
const META: &str = "meta";
const NEXT_ID_KEY: &[u8] = b"next_user_id";

/// How the account signs in
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthProvider {
    #[default]
    Email,
    LinkedIn,
}

impl AuthProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthProvider::Email => "email",
            AuthProvider::LinkedIn => "linkedin",
        }
    }
}

/// Stored account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: UserId,
    pub email: String,
    #[serde(default)]
    pub full_name: String,
    /// PHC string, absent for accounts without a password
    #[serde(default)]
    pub password_hash: Option<String>,
    #[serde(default)]
    pub tier: PlanTier,
    #[serde(default)]
    pub auth_provider: AuthProvider,
    pub created_at: DateTime<Utc>,
}

impl UserRecord {
    pub fn identity(&self) -> Identity {
        Identity::new(self.id, self.tier)
    }
}

/// Registration input
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct NewUser {
    pub email: String,
    pub password: String,
    pub full_name: String,
}

#[derive(Clone)]
pub struct UserDirectory {
    users: Arc<Partition>,
    meta: Arc<Partition>,
    engine: StorageEngine,
    // Serializes id allocation together with the email uniqueness check
    registration: Arc<Mutex<()>>,
}

impl UserDirectory {
    pub(crate) fn new(engine: StorageEngine) -> Result<Self> {
        let users = engine.partition(USERS)?;
        let meta = engine.partition(META)?;
        Ok(UserDirectory {
            users,
            meta,
            engine,
            registration: Arc::new(Mutex::new(())),
        })
    }

    /// Create an email/password account
    pub fn register(&self, new_user: NewUser) -> Result<UserRecord> {
        let email = normalize_email(&new_user.email)?;
        if new_user.password.is_empty() {
            return Err(TrailError::Validation("password is required".to_string()));
        }
        let password_hash = hash_password(&new_user.password)?;

        let _guard = self
            .registration
            .lock()
            .map_err(|_| TrailError::Internal("registration lock poisoned".to_string()))?;

        if self.users.get(email_key(&email)).map_err(store_err)?.is_some() {
            return Err(TrailError::Conflict("email already registered".to_string()));
        }

        let id = self.next_id()?;
        let record = UserRecord {
            id,
            email: email.clone(),
            full_name: new_user.full_name.trim().to_string(),
            password_hash: Some(password_hash),
            tier: PlanTier::Free,
            auth_provider: AuthProvider::Email,
            created_at: Utc::now(),
        };

        let mut batch = self.engine.keyspace().batch();
        batch.insert(&self.users, email_key(&email), id.as_u64().to_be_bytes().to_vec());
        batch.insert(&self.users, id_key(id), serde_json::to_vec(&record)?);
        batch.insert(&self.meta, NEXT_ID_KEY, (id.as_u64() + 1).to_be_bytes().to_vec());
        batch.commit().map_err(store_err)?;
        self.engine.persist()?;

        Ok(record)
    }

    /// Check an email/password pair.
    ///
    /// Unknown email, wrong password and accounts without a password all
    /// fail the same way.
    pub fn authenticate(&self, email: &str, password: &str) -> Result<UserRecord> {
        let email = normalize_email(email).map_err(|_| TrailError::InvalidCredentials)?;
        let record = self
            .find_by_email(&email)?
            .ok_or(TrailError::InvalidCredentials)?;

        let hash = record
            .password_hash
            .as_deref()
            .ok_or(TrailError::InvalidCredentials)?;
        if !verify_password(hash, password) {
            return Err(TrailError::InvalidCredentials);
        }

        Ok(record)
    }

    pub fn get(&self, id: UserId) -> Result<Option<UserRecord>> {
        match self.users.get(id_key(id)).map_err(store_err)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn find_by_email(&self, email: &str) -> Result<Option<UserRecord>> {
        let email = email.trim().to_lowercase();
        let id = match self.users.get(email_key(&email)).map_err(store_err)? {
            Some(bytes) => decode_id(&bytes)?,
            None => return Ok(None),
        };
        self.get(id)
    }

    fn next_id(&self) -> Result<UserId> {
        match self.meta.get(NEXT_ID_KEY).map_err(store_err)? {
            Some(bytes) => decode_id(&bytes),
            None => Ok(UserId::new(1)),
        }
    }
}

fn normalize_email(email: &str) -> Result<String> {
    let email = email.trim().to_lowercase();
    let valid = match email.split_once('@') {
        Some((local, domain)) => !local.is_empty() && !domain.is_empty() && !domain.contains('@'),
        None => false,
    };
    if !valid {
        return Err(TrailError::Validation("a valid email is required".to_string()));
    }
    Ok(email)
}

fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut rand_core::OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| TrailError::Internal(format!("password hashing failed: {}", e)))
}

fn verify_password(hash: &str, password: &str) -> bool {
    match PasswordHash::new(hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(_) => false,
    }
}

fn email_key(email: &str) -> Vec<u8> {
    format!("email:{}", email).into_bytes()
}

fn id_key(id: UserId) -> Vec<u8> {
    format!("id:{}", id).into_bytes()
}

fn decode_id(bytes: &[u8]) -> Result<UserId> {
    let raw: [u8; 8] = bytes
        .try_into()
        .map_err(|_| TrailError::Internal("malformed user id".to_string()))?;
    Ok(UserId::new(u64::from_be_bytes(raw)))
}
