//! Social graph store over fjall partitions
//!
//! Nodes are keyed by their natural identifiers (`user:<id>`,
//! `person:<slug>`, `post:<urn>`). Edges are keyed by kind, both endpoint
//! keys and a type discriminator stored as an attribute, so merging the same
//! input twice leaves the same set of nodes and edges behind.
//!
//! Writes go through a [`GraphTransaction`]: each merge is staged on its
//! own and either fully staged or rejected, and the whole transaction is
//! committed as one atomic batch.

use chrono::{DateTime, Utc};
use fjall::Partition;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use trailgraph_core::*;

use crate::{store_err, StorageEngine};

const NODES: &str = "graph_nodes";
const EDGES: &str = "graph_edges";
const SEP: char = '\u{1f}';

/// Node labels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeLabel {
    User,
    Person,
    Post,
}

impl NodeLabel {
    fn prefix(&self) -> &'static str {
        match self {
            NodeLabel::User => "user:",
            NodeLabel::Person => "person:",
            NodeLabel::Post => "post:",
        }
    }
}

/// Natural key of a node
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NodeKey {
    User(UserId),
    Person(String),
    Post(String),
}

impl NodeKey {
    pub fn person(slug: &str) -> Result<Self> {
        Ok(NodeKey::Person(natural_key("person slug", slug)?))
    }

    pub fn post(urn: &str) -> Result<Self> {
        Ok(NodeKey::Post(natural_key("post urn", urn)?))
    }

    pub fn label(&self) -> NodeLabel {
        match self {
            NodeKey::User(_) => NodeLabel::User,
            NodeKey::Person(_) => NodeLabel::Person,
            NodeKey::Post(_) => NodeLabel::Post,
        }
    }

    fn encode(&self) -> String {
        match self {
            NodeKey::User(id) => format!("{}{}", NodeLabel::User.prefix(), id),
            NodeKey::Person(slug) => format!("{}{}", NodeLabel::Person.prefix(), slug),
            NodeKey::Post(urn) => format!("{}{}", NodeLabel::Post.prefix(), urn),
        }
    }
}

impl fmt::Display for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

/// Natural keys must be non-empty and free of control characters
fn natural_key(what: &str, value: &str) -> Result<String> {
    let value = value.trim();
    if value.is_empty() {
        return Err(TrailError::Validation(format!("empty {}", what)));
    }
    if value.chars().any(|c| c.is_control()) {
        return Err(TrailError::Validation(format!(
            "control characters not allowed in {}",
            what
        )));
    }
    Ok(value.to_string())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserNode {
    pub id: UserId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersonNode {
    pub slug: String,
    pub name: String,
    #[serde(default)]
    pub degree: String,
    #[serde(default)]
    pub headline: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostNode {
    pub urn: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub url: String,
}

/// Edge kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EdgeKind {
    /// User -> Post, typed by the action
    Action,
    /// Post -> Person
    AuthoredBy,
    /// Person -> Post, typed by the interaction
    Amplified,
    /// User -> Person
    ConnectedTo,
}

impl EdgeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EdgeKind::Action => "ACTION",
            EdgeKind::AuthoredBy => "AUTHORED_BY",
            EdgeKind::Amplified => "AMPLIFIED",
            EdgeKind::ConnectedTo => "CONNECTED_TO",
        }
    }
}

/// Stored edge with its attributes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    pub kind: EdgeKind,
    pub from: String,
    pub to: String,
    /// Type discriminator, part of the edge identity
    #[serde(rename = "type", default)]
    pub edge_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub since: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Edge {
    fn new(kind: EdgeKind, from: &NodeKey, to: &NodeKey, edge_type: &str) -> Self {
        Edge {
            kind,
            from: from.encode(),
            to: to.encode(),
            edge_type: edge_type.to_string(),
            timestamp: None,
            since: None,
            updated_at: None,
        }
    }

    fn key(&self) -> Vec<u8> {
        edge_key(self.kind, &self.from, &self.to, &self.edge_type)
    }
}

fn edge_prefix(kind: EdgeKind, from: &str, to: &str) -> String {
    format!("{}{SEP}{}{SEP}{}{SEP}", kind.as_str(), from, to)
}

fn edge_key(kind: EdgeKind, from: &str, to: &str, edge_type: &str) -> Vec<u8> {
    let mut key = edge_prefix(kind, from, to);
    key.push_str(edge_type);
    key.into_bytes()
}

/// Node and edge totals
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GraphStats {
    pub users: usize,
    pub persons: usize,
    pub posts: usize,
    pub actions: usize,
    pub authored: usize,
    pub amplified: usize,
    pub connections: usize,
}

/// Durable social graph
#[derive(Clone)]
pub struct GraphStore {
    nodes: Arc<Partition>,
    edges: Arc<Partition>,
    engine: StorageEngine,
}

impl GraphStore {
    pub(crate) fn new(engine: StorageEngine) -> Result<Self> {
        let nodes = engine.partition(NODES)?;
        let edges = engine.partition(EDGES)?;
        Ok(GraphStore { nodes, edges, engine })
    }

    /// Begin a write transaction
    pub fn transaction(&self) -> GraphTransaction<'_> {
        GraphTransaction {
            store: self,
            staged: Staged::default(),
            merged: 0,
        }
    }

    /// Merge a single event in its own transaction
    pub fn merge_event(&self, event: &Event) -> Result<()> {
        let mut txn = self.transaction();
        txn.merge_event(event)?;
        txn.commit()
    }

    pub fn user(&self, id: UserId) -> Result<Option<UserNode>> {
        self.read_node(&NodeKey::User(id))
    }

    pub fn person(&self, slug: &str) -> Result<Option<PersonNode>> {
        self.read_node(&NodeKey::person(slug)?)
    }

    pub fn post(&self, urn: &str) -> Result<Option<PostNode>> {
        self.read_node(&NodeKey::post(urn)?)
    }

    /// All edges of `kind` from `from` to `to`, whatever their type
    pub fn edges_between(&self, kind: EdgeKind, from: &NodeKey, to: &NodeKey) -> Result<Vec<Edge>> {
        let prefix = edge_prefix(kind, &from.encode(), &to.encode());
        let mut edges = Vec::new();
        for item in self.edges.prefix(prefix.as_bytes()) {
            let (_, value) = item.map_err(store_err)?;
            edges.push(serde_json::from_slice(&value)?);
        }
        Ok(edges)
    }

    pub fn node_count(&self, label: NodeLabel) -> Result<usize> {
        count_prefix(&self.nodes, label.prefix().as_bytes())
    }

    pub fn edge_count(&self, kind: EdgeKind) -> Result<usize> {
        let prefix = format!("{}{SEP}", kind.as_str());
        count_prefix(&self.edges, prefix.as_bytes())
    }

    pub fn stats(&self) -> Result<GraphStats> {
        Ok(GraphStats {
            users: self.node_count(NodeLabel::User)?,
            persons: self.node_count(NodeLabel::Person)?,
            posts: self.node_count(NodeLabel::Post)?,
            actions: self.edge_count(EdgeKind::Action)?,
            authored: self.edge_count(EdgeKind::AuthoredBy)?,
            amplified: self.edge_count(EdgeKind::Amplified)?,
            connections: self.edge_count(EdgeKind::ConnectedTo)?,
        })
    }

    fn read_node<N: DeserializeOwned>(&self, key: &NodeKey) -> Result<Option<N>> {
        match self.nodes.get(key.encode().as_bytes()).map_err(store_err)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }
}

fn count_prefix(partition: &Partition, prefix: &[u8]) -> Result<usize> {
    let mut count = 0;
    for item in partition.prefix(prefix) {
        item.map_err(store_err)?;
        count += 1;
    }
    Ok(count)
}

#[derive(Default)]
struct Staged {
    nodes: HashMap<Vec<u8>, Vec<u8>>,
    edges: HashMap<Vec<u8>, Vec<u8>>,
}

impl Staged {
    fn absorb(&mut self, other: Staged) {
        self.nodes.extend(other.nodes);
        self.edges.extend(other.edges);
    }
}

/// Batch of merges committed atomically
pub struct GraphTransaction<'a> {
    store: &'a GraphStore,
    staged: Staged,
    merged: usize,
}

impl GraphTransaction<'_> {
    /// Merge one activity event.
    ///
    /// On error nothing from this event is staged; earlier merges in the
    /// transaction are unaffected.
    pub fn merge_event(&mut self, event: &Event) -> Result<()> {
        let author = NodeKey::person(&event.author_slug)?;
        let post = NodeKey::post(&event.post_urn)?;
        let user = NodeKey::User(event.user_id);
        let action = natural_key("action", &event.action)?;
        let interactor = if event.has_interactor() {
            Some(NodeKey::person(&event.interactor_slug)?)
        } else {
            None
        };

        let mut local = Staged::default();

        self.upsert_node(
            &mut local,
            &author,
            || PersonNode {
                slug: event.author_slug.trim().to_string(),
                name: event.author_name.clone(),
                degree: event.author_degree.clone(),
                headline: String::new(),
                created_at: Utc::now(),
            },
            |p| {
                p.name = event.author_name.clone();
                if !event.author_degree.is_empty() {
                    p.degree = event.author_degree.clone();
                }
            },
        )?;

        self.upsert_node(
            &mut local,
            &post,
            || PostNode {
                urn: event.post_urn.trim().to_string(),
                text: event.post_text.clone(),
                url: event.url.clone(),
            },
            |_| {},
        )?;

        self.upsert_edge(&mut local, Edge::new(EdgeKind::AuthoredBy, &post, &author, ""), |_| {})?;

        self.upsert_node(&mut local, &user, || UserNode { id: event.user_id }, |_| {})?;

        let mut action_edge = Edge::new(EdgeKind::Action, &user, &post, &action);
        action_edge.timestamp = Some(event.timestamp);
        self.upsert_edge(&mut local, action_edge, |e| e.timestamp = Some(event.timestamp))?;

        if let Some(interactor) = interactor {
            self.upsert_node(
                &mut local,
                &interactor,
                || PersonNode {
                    slug: event.interactor_slug.trim().to_string(),
                    name: event.interactor_name.clone(),
                    degree: String::new(),
                    headline: String::new(),
                    created_at: Utc::now(),
                },
                |p| p.name = event.interactor_name.clone(),
            )?;
            self.upsert_edge(
                &mut local,
                Edge::new(EdgeKind::Amplified, &interactor, &post, event.interaction_type.trim()),
                |_| {},
            )?;
        }

        self.staged.absorb(local);
        self.merged += 1;
        Ok(())
    }

    /// Merge one imported connection of `user_id`
    pub fn merge_connection(&mut self, user_id: UserId, connection: &Connection) -> Result<()> {
        let person = NodeKey::person(&connection.slug)?;
        let user = NodeKey::User(user_id);
        let mut local = Staged::default();

        self.upsert_node(
            &mut local,
            &person,
            || PersonNode {
                slug: connection.slug.trim().to_string(),
                name: connection.name.clone(),
                degree: String::new(),
                headline: connection.headline.clone(),
                created_at: Utc::now(),
            },
            |p| {
                p.name = connection.name.clone();
                p.headline = connection.headline.clone();
            },
        )?;

        self.upsert_node(&mut local, &user, || UserNode { id: user_id }, |_| {})?;

        let mut edge = Edge::new(EdgeKind::ConnectedTo, &user, &person, "");
        edge.since = Some(connection.connected_at.clone());
        edge.updated_at = Some(Utc::now());
        self.upsert_edge(&mut local, edge, |_| {})?;

        self.staged.absorb(local);
        self.merged += 1;
        Ok(())
    }

    /// Merge any buffered record
    pub fn merge_record(&mut self, record: &BufferedRecord) -> Result<()> {
        match record {
            BufferedRecord::Event(event) => self.merge_event(event),
            BufferedRecord::Connection { user_id, connection } => {
                self.merge_connection(*user_id, connection)
            }
        }
    }

    /// Number of merges staged so far
    pub fn merged(&self) -> usize {
        self.merged
    }

    /// Write every staged merge in one atomic batch
    pub fn commit(self) -> Result<()> {
        if self.staged.nodes.is_empty() && self.staged.edges.is_empty() {
            return Ok(());
        }

        let engine = &self.store.engine;
        let mut batch = engine.keyspace().batch();
        for (key, value) in self.staged.nodes {
            batch.insert(&self.store.nodes, key, value);
        }
        for (key, value) in self.staged.edges {
            batch.insert(&self.store.edges, key, value);
        }
        batch.commit().map_err(store_err)?;
        engine.persist()
    }

    fn upsert_node<N>(
        &self,
        local: &mut Staged,
        key: &NodeKey,
        on_create: impl FnOnce() -> N,
        on_match: impl FnOnce(&mut N),
    ) -> Result<()>
    where
        N: Serialize + DeserializeOwned,
    {
        let key = key.encode().into_bytes();
        let node = match self.lookup(&local.nodes, &self.staged.nodes, &self.store.nodes, &key)? {
            Some(mut existing) => {
                on_match(&mut existing);
                existing
            }
            None => on_create(),
        };
        local.nodes.insert(key, serde_json::to_vec(&node)?);
        Ok(())
    }

    fn upsert_edge(
        &self,
        local: &mut Staged,
        edge: Edge,
        on_match: impl FnOnce(&mut Edge),
    ) -> Result<()> {
        let key = edge.key();
        let edge = match self.lookup::<Edge>(&local.edges, &self.staged.edges, &self.store.edges, &key)? {
            Some(mut existing) => {
                on_match(&mut existing);
                existing
            }
            None => edge,
        };
        local.edges.insert(key, serde_json::to_vec(&edge)?);
        Ok(())
    }

    /// Read-your-writes lookup: this merge, then the transaction, then disk
    fn lookup<T: DeserializeOwned>(
        &self,
        local: &HashMap<Vec<u8>, Vec<u8>>,
        staged: &HashMap<Vec<u8>, Vec<u8>>,
        partition: &Partition,
        key: &[u8],
    ) -> Result<Option<T>> {
        if let Some(bytes) = local.get(key).or_else(|| staged.get(key)) {
            return Ok(Some(serde_json::from_slice(bytes)?));
        }
        match partition.get(key).map_err(store_err)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }
}
