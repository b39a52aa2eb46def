//! Authentication primitives for trailgraph
//!
//! This module implements the credential plane with:
//! - Ed25519 key material and key fingerprints
//! - EdDSA identity tokens with strongly typed claims
//! - Random session tokens and per-user signing secrets
//! - HMAC-SHA256 request body signatures
//! - Constant-time comparisons

pub mod keys;
pub mod secret;
pub mod signature;
pub mod timing;
pub mod token;

pub use keys::*;
pub use secret::*;
pub use signature::*;
pub use timing::*;
pub use token::*;
