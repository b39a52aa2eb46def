//! Signed ingestion requests

use bytes::Bytes;
use http_body_util::Full;
use hyper::header::{AUTHORIZATION, CONTENT_TYPE};
use hyper::{Method, Request};
use serde::{Deserialize, Serialize};
use trailgraph_core::auth::{sign_body, SigningSecret, SIGNATURE_HEADER};
use trailgraph_core::*;

use crate::{ClientError, Result};

pub const EVENTS_PATH: &str = "/events";
pub const CONNECTIONS_PATH: &str = "/connections/batch";

/// Token and signing secret returned by `POST /login`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credentials {
    pub token: String,
    pub signing_secret: SigningSecret,
}

impl Credentials {
    pub fn new(token: impl Into<String>, signing_secret: SigningSecret) -> Self {
        Credentials {
            token: token.into(),
            signing_secret,
        }
    }

    /// Hex HMAC-SHA256 of `body` under the signing secret
    pub fn sign(&self, body: &[u8]) -> String {
        sign_body(&self.signing_secret, body)
    }

    /// POST `body` to `uri` with bearer and signature headers.
    ///
    /// The signature covers exactly the bytes sent.
    pub fn signed_request(&self, uri: &str, body: Vec<u8>) -> Result<Request<Full<Bytes>>> {
        let signature = self.sign(&body);
        Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header(CONTENT_TYPE, "application/json")
            .header(AUTHORIZATION, format!("Bearer {}", self.token))
            .header(SIGNATURE_HEADER, signature)
            .body(Full::new(Bytes::from(body)))
            .map_err(|e| ClientError::Request(e.to_string()))
    }

    /// Signed `POST /events`
    pub fn event_request(&self, base_url: &str, event: &EventPayload) -> Result<Request<Full<Bytes>>> {
        let body = serde_json::to_vec(event)?;
        self.signed_request(&join(base_url, EVENTS_PATH), body)
    }

    /// Signed `POST /connections/batch`
    pub fn connections_request(
        &self,
        base_url: &str,
        connections: &[Connection],
    ) -> Result<Request<Full<Bytes>>> {
        let batch = ConnectionBatch {
            connections: connections.to_vec(),
        };
        let body = serde_json::to_vec(&batch)?;
        self.signed_request(&join(base_url, CONNECTIONS_PATH), body)
    }
}

pub(crate) fn join(base_url: &str, path: &str) -> String {
    format!("{}{}", base_url.trim_end_matches('/'), path)
}
