//! trailgraph Rust client SDK
//!
//! Logs in, keeps the issued token and signing secret, and sends signed
//! ingestion requests.

pub mod client;
pub mod error;
pub mod signer;

pub use client::{Client, ConnectionsAccepted};
pub use error::ClientError;
pub use signer::Credentials;

pub type Result<T> = std::result::Result<T, ClientError>;
