//! Response builders and the error to status mapping

use bytes::Bytes;
use http_body_util::Full;
use hyper::header::{
    HeaderValue, ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS,
    ACCESS_CONTROL_ALLOW_ORIGIN, ACCESS_CONTROL_MAX_AGE, CONTENT_TYPE, SERVER, SET_COOKIE,
};
use hyper::{Response, StatusCode};
use serde_json::{json, Value};
use tracing::{debug, error};
use trailgraph_core::*;

pub type BoxBody = Full<Bytes>;

const SERVER_NAME: &str = concat!("trailgraph/", env!("CARGO_PKG_VERSION"));

/// Request headers the browser extension may send cross-origin
const CORS_ALLOW_HEADERS: &str = "Origin, Content-Type, Accept, Authorization, X-Signature";
const CORS_ALLOW_METHODS: &str = "GET, POST, OPTIONS";

/// JSON response with the given status
pub fn json_response(status: StatusCode, body: Value) -> Response<BoxBody> {
    let mut response = Response::new(Full::new(Bytes::from(body.to_string())));
    *response.status_mut() = status;
    let headers = response.headers_mut();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers.insert(SERVER, HeaderValue::from_static(SERVER_NAME));
    headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    response
}

/// Empty `204` answering a CORS preflight
pub fn preflight_response() -> Response<BoxBody> {
    let mut response = Response::new(Full::new(Bytes::new()));
    *response.status_mut() = StatusCode::NO_CONTENT;
    let headers = response.headers_mut();
    headers.insert(SERVER, HeaderValue::from_static(SERVER_NAME));
    headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    headers.insert(ACCESS_CONTROL_ALLOW_METHODS, HeaderValue::from_static(CORS_ALLOW_METHODS));
    headers.insert(ACCESS_CONTROL_ALLOW_HEADERS, HeaderValue::from_static(CORS_ALLOW_HEADERS));
    headers.insert(ACCESS_CONTROL_MAX_AGE, HeaderValue::from_static("86400"));
    response
}

/// Attach a `Set-Cookie` header
pub fn with_cookie(mut response: Response<BoxBody>, cookie: &str) -> Result<Response<BoxBody>> {
    let value = HeaderValue::from_str(cookie)
        .map_err(|e| TrailError::Internal(format!("invalid cookie value: {}", e)))?;
    response.headers_mut().append(SET_COOKIE, value);
    Ok(response)
}

pub fn status_for(err: &TrailError) -> StatusCode {
    match err {
        TrailError::Unauthenticated
        | TrailError::SignatureMismatch
        | TrailError::InvalidCredentials => StatusCode::UNAUTHORIZED,
        TrailError::Validation(_) => StatusCode::BAD_REQUEST,
        TrailError::Conflict(_) => StatusCode::CONFLICT,
        TrailError::NotFound(_) => StatusCode::NOT_FOUND,
        TrailError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        TrailError::StoreUnavailable(_)
        | TrailError::KeyUnavailable(_)
        | TrailError::Serialization(_)
        | TrailError::Io(_)
        | TrailError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Render an error for the client.
///
/// Authentication failures share one body. Server-side failures are logged
/// here and never echoed back.
pub fn error_response(err: &TrailError) -> Response<BoxBody> {
    let status = status_for(err);
    let message = match err {
        e if e.is_auth_failure() => {
            debug!(reason = %e, "authentication rejected");
            "Unauthorized".to_string()
        }
        TrailError::Validation(msg) | TrailError::Conflict(msg) => msg.clone(),
        TrailError::NotFound(_) => "Not found".to_string(),
        TrailError::Timeout(_) => {
            error!(error = %err, "request timed out");
            "Request timed out".to_string()
        }
        _ => {
            error!(error = %err, "request failed");
            "Internal server error".to_string()
        }
    };
    json_response(status, json!({ "error": message }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;
    use std::time::Duration;

    async fn body_json(response: Response<BoxBody>) -> Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_auth_failures_are_indistinguishable() {
        let mut bodies = Vec::new();
        for err in [
            TrailError::Unauthenticated,
            TrailError::SignatureMismatch,
            TrailError::InvalidCredentials,
        ] {
            let response = error_response(&err);
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
            bodies.push(body_json(response).await);
        }
        assert!(bodies.iter().all(|b| *b == json!({"error": "Unauthorized"})));
    }

    #[tokio::test]
    async fn test_internal_details_are_hidden() {
        let response = error_response(&TrailError::StoreUnavailable("disk on fire".into()));
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body_json(response).await["error"], "Internal server error");
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(status_for(&TrailError::Validation("x".into())), StatusCode::BAD_REQUEST);
        assert_eq!(status_for(&TrailError::Conflict("x".into())), StatusCode::CONFLICT);
        assert_eq!(status_for(&TrailError::NotFound("x".into())), StatusCode::NOT_FOUND);
        assert_eq!(
            status_for(&TrailError::Timeout(Duration::from_secs(5))),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            status_for(&TrailError::KeyUnavailable("x".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
