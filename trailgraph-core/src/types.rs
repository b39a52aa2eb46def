//! Core data types for trailgraph

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::{Result, TrailError};

/// Maximum number of connections accepted in one import batch
pub const MAX_CONNECTIONS_PER_BATCH: usize = 200;

/// Maximum accepted ingestion body size in bytes
pub const MAX_INGEST_BODY_BYTES: usize = 256 * 1024;

/// Unique user identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(u64);

impl UserId {
    pub fn new(id: u64) -> Self {
        UserId(id)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for UserId {
    type Err = TrailError;

    fn from_str(s: &str) -> Result<Self> {
        s.trim()
            .parse::<u64>()
            .map(UserId)
            .map_err(|_| TrailError::Validation(format!("invalid user id '{}'", s)))
    }
}

/// Subscription tier carried alongside every identity
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanTier {
    #[default]
    Free,
    Paid,
}

impl PlanTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanTier::Free => "free",
            PlanTier::Paid => "paid",
        }
    }
}

impl fmt::Display for PlanTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Authenticated principal attached to a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: UserId,
    pub tier: PlanTier,
}

impl Identity {
    pub fn new(user_id: UserId, tier: PlanTier) -> Self {
        Identity { user_id, tier }
    }
}

/// Event body as sent by the extension.
///
/// There is no `user_id` field: a client-supplied one is discarded during
/// deserialization and the authenticated identity is stamped instead.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventPayload {
    pub post_urn: String,
    pub url: String,
    pub action: String,
    pub author_name: String,
    pub author_slug: String,
    pub author_degree: String,
    pub post_text: String,
    pub interaction_type: String,
    pub interactor_name: String,
    pub interactor_slug: String,
    pub timestamp: Option<DateTime<Utc>>,
}

impl EventPayload {
    /// Validate required fields and stamp the caller's identity.
    pub fn stamp(self, user_id: UserId, now: DateTime<Utc>) -> Result<Event> {
        let mut missing = Vec::new();
        if self.post_urn.trim().is_empty() {
            missing.push("post_urn");
        }
        if self.action.trim().is_empty() {
            missing.push("action");
        }
        if self.author_slug.trim().is_empty() {
            missing.push("author_slug");
        }
        if !missing.is_empty() {
            return Err(TrailError::Validation(format!(
                "missing required fields ({})",
                missing.join(", ")
            )));
        }

        Ok(Event {
            user_id,
            post_urn: self.post_urn,
            url: self.url,
            action: self.action,
            author_name: self.author_name,
            author_slug: self.author_slug,
            author_degree: self.author_degree,
            post_text: self.post_text,
            interaction_type: self.interaction_type,
            interactor_name: self.interactor_name,
            interactor_slug: self.interactor_slug,
            timestamp: self.timestamp.unwrap_or(now),
        })
    }
}

/// Identity-stamped activity event, as held in the buffer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub user_id: UserId,
    pub post_urn: String,
    #[serde(default)]
    pub url: String,
    pub action: String,
    #[serde(default)]
    pub author_name: String,
    pub author_slug: String,
    #[serde(default)]
    pub author_degree: String,
    #[serde(default)]
    pub post_text: String,
    #[serde(default)]
    pub interaction_type: String,
    #[serde(default)]
    pub interactor_name: String,
    #[serde(default)]
    pub interactor_slug: String,
    pub timestamp: DateTime<Utc>,
}

impl Event {
    pub fn has_interactor(&self) -> bool {
        !self.interactor_slug.trim().is_empty()
    }
}

/// Single imported contact
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Connection {
    pub name: String,
    pub slug: String,
    pub headline: String,
    /// `YYYY-MM-DD` as shown on the connections page
    pub connected_at: String,
}

/// Body of `POST /connections/batch`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionBatch {
    #[serde(default)]
    pub connections: Vec<Connection>,
}

impl ConnectionBatch {
    /// Check the batch size limits.
    pub fn validate(&self) -> Result<()> {
        if self.connections.is_empty() {
            return Err(TrailError::Validation("connections array is empty".to_string()));
        }
        if self.connections.len() > MAX_CONNECTIONS_PER_BATCH {
            return Err(TrailError::Validation(format!(
                "max {} connections per batch",
                MAX_CONNECTIONS_PER_BATCH
            )));
        }
        Ok(())
    }

    /// Split into stamped records, returning them with the number of
    /// entries skipped for lacking a slug.
    pub fn into_records(self, user_id: UserId) -> (Vec<BufferedRecord>, usize) {
        let total = self.connections.len();
        let records: Vec<BufferedRecord> = self
            .connections
            .into_iter()
            .filter(|c| !c.slug.trim().is_empty())
            .map(|connection| BufferedRecord::Connection { user_id, connection })
            .collect();
        let skipped = total - records.len();
        (records, skipped)
    }
}

/// Unit of work carried by the event buffer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BufferedRecord {
    Event(Event),
    Connection {
        user_id: UserId,
        connection: Connection,
    },
}

impl BufferedRecord {
    pub fn user_id(&self) -> UserId {
        match self {
            BufferedRecord::Event(event) => event.user_id,
            BufferedRecord::Connection { user_id, .. } => *user_id,
        }
    }

    /// Canonical serialized form stored in the buffer
    pub fn to_canonical_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}
