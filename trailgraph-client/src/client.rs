//! Main client implementation

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::client::conn::http1;
use hyper::header::{CONTENT_TYPE, HOST};
use hyper::{Method, Request, Uri};
use hyper_util::rt::TokioIo;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tracing::debug;
use trailgraph_core::*;

use crate::signer::join;
use crate::{ClientError, Credentials, Result};

/// Result of a connection import
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct ConnectionsAccepted {
    pub queued: usize,
    pub skipped: usize,
}

/// trailgraph client
pub struct Client {
    base_url: String,
    authority: String,
}

impl Client {
    /// Create new client for `http://host:port`
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let base_url = base_url.into();
        let uri: Uri = base_url
            .parse()
            .map_err(|e| ClientError::Connection(format!("Invalid URL: {}", e)))?;
        if uri.scheme_str() != Some("http") {
            return Err(ClientError::Connection(format!("unsupported URL {}", base_url)));
        }
        let authority = uri
            .authority()
            .map(|a| {
                if a.port().is_some() {
                    a.to_string()
                } else {
                    format!("{}:80", a.host())
                }
            })
            .ok_or_else(|| ClientError::Connection(format!("missing host in {}", base_url)))?;

        Ok(Client {
            base_url,
            authority,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn health(&self) -> Result<Value> {
        let request = self.json_request(Method::GET, "/health", None)?;
        self.send(request).await
    }

    pub async fn register(&self, email: &str, password: &str, full_name: &str) -> Result<UserId> {
        let body = json!({ "email": email, "password": password, "full_name": full_name });
        let request = self.json_request(Method::POST, "/register", Some(&body))?;
        let response = self.send(request).await?;
        Ok(serde_json::from_value(response["user_id"].clone())?)
    }

    /// Log in and keep the returned token and signing secret
    pub async fn login(&self, email: &str, password: &str) -> Result<Credentials> {
        let body = json!({ "email": email, "password": password });
        let request = self.json_request(Method::POST, "/login", Some(&body))?;
        let response = self.send(request).await?;
        Ok(serde_json::from_value(response)?)
    }

    /// Send one activity event
    pub async fn send_event(&self, credentials: &Credentials, event: &EventPayload) -> Result<()> {
        let request = credentials.event_request(&self.base_url, event)?;
        self.send(request).await?;
        Ok(())
    }

    /// Import a batch of connections
    pub async fn send_connections(
        &self,
        credentials: &Credentials,
        connections: &[Connection],
    ) -> Result<ConnectionsAccepted> {
        let request = credentials.connections_request(&self.base_url, connections)?;
        let response = self.send(request).await?;
        Ok(serde_json::from_value(response)?)
    }

    fn json_request(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<Request<Full<Bytes>>> {
        let bytes = match body {
            Some(value) => Bytes::from(serde_json::to_vec(value)?),
            None => Bytes::new(),
        };
        Request::builder()
            .method(method)
            .uri(join(&self.base_url, path))
            .header(CONTENT_TYPE, "application/json")
            .body(Full::new(bytes))
            .map_err(|e| ClientError::Request(e.to_string()))
    }

    /// One request over a fresh HTTP/1.1 connection
    async fn send(&self, mut request: Request<Full<Bytes>>) -> Result<Value> {
        let host = self
            .authority
            .parse()
            .map_err(|_| ClientError::Request(format!("invalid host {}", self.authority)))?;
        request.headers_mut().insert(HOST, host);

        let stream = TcpStream::connect(self.authority.as_str())
            .await
            .map_err(|e| ClientError::Connection(format!("{}: {}", self.authority, e)))?;
        let (mut sender, connection) = http1::handshake(TokioIo::new(stream)).await?;
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                debug!("Connection closed with error: {}", e);
            }
        });

        let response = sender.send_request(request).await?;
        let status = response.status();
        let bytes = response.into_body().collect().await?.to_bytes();
        let value: Value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes)
                .map_err(|e| ClientError::InvalidResponse(e.to_string()))?
        };

        if !status.is_success() {
            return Err(ClientError::Status {
                status: status.as_u16(),
                message: value["error"].as_str().unwrap_or_default().to_string(),
            });
        }
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_validates_url() {
        assert!(Client::new("http://127.0.0.1:3100").is_ok());
        assert_eq!(Client::new("http://example.com").unwrap().authority, "example.com:80");
        assert!(Client::new("https://example.com").is_err());
        assert!(Client::new("not a url").is_err());
    }
}
