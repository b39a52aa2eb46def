//! HTTP request handlers

use bytes::Bytes;
use chrono::Utc;
use http_body_util::{BodyExt, Limited};
use hyper::body::Body;
use hyper::{HeaderMap, Method, Request, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use std::convert::Infallible;
use std::time::Instant;
use tracing::{debug, info, warn};
use trailgraph_core::*;
use trailgraph_engine::NewUser;

use crate::auth::{
    session_clear_cookie, session_set_cookie, signature_header, PresentedCredentials,
};
use crate::response::{error_response, json_response, preflight_response, with_cookie, BoxBody};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
struct LoginRequest {
    #[serde(default)]
    email: String,
    #[serde(default)]
    password: String,
}

/// Main request handler
pub async fn handle_request<B>(
    req: Request<B>,
    state: AppState,
) -> std::result::Result<Response<BoxBody>, Infallible>
where
    B: Body,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let started = Instant::now();
    let (parts, body) = req.into_parts();

    let result = match Limited::new(body, MAX_INGEST_BODY_BYTES).collect().await {
        Ok(collected) => {
            route(
                &state,
                &parts.method,
                parts.uri.path(),
                &parts.headers,
                collected.to_bytes(),
            )
            .await
        }
        Err(e) => {
            debug!(error = %e, "failed to read request body");
            Err(TrailError::Validation("request body too large or unreadable".to_string()))
        }
    };

    let response = result.unwrap_or_else(|e| error_response(&e));
    info!(
        method = %parts.method,
        path = parts.uri.path(),
        status = response.status().as_u16(),
        latency_ms = (started.elapsed().as_millis() as u64),
        "{} {} -> {}",
        parts.method,
        parts.uri.path(),
        response.status()
    );
    Ok(response)
}

async fn route(
    state: &AppState,
    method: &Method,
    path: &str,
    headers: &HeaderMap,
    body: Bytes,
) -> Result<Response<BoxBody>> {
    match (method, path) {
        (&Method::OPTIONS, _) => Ok(preflight_response()),
        (&Method::GET, "/health") => Ok(handle_health()),
        (&Method::POST, "/register") => handle_register(state, body).await,
        (&Method::POST, "/login") => handle_login(state, body).await,
        (&Method::POST, "/logout") => handle_logout(state, headers).await,
        (&Method::GET, "/me") => handle_me(state, headers).await,
        (&Method::GET, "/whoami") => handle_whoami(state, headers).await,
        (&Method::POST, "/events") => handle_event(state, headers, body).await,
        (&Method::POST, "/connections/batch") => {
            handle_connections(state, headers, body).await
        }
        (method, path) => Err(TrailError::NotFound(format!("{} {}", method, path))),
    }
}

fn parse_json<T: DeserializeOwned>(body: &[u8]) -> Result<T> {
    serde_json::from_slice(body)
        .map_err(|e| TrailError::Validation(format!("invalid request body: {}", e)))
}

/// Health check handler
fn handle_health() -> Response<BoxBody> {
    json_response(
        StatusCode::OK,
        json!({
            "status": "healthy",
            "service": "trailgraph",
            "version": env!("CARGO_PKG_VERSION"),
        }),
    )
}

async fn handle_register(state: &AppState, body: Bytes) -> Result<Response<BoxBody>> {
    let new_user: NewUser = parse_json(&body)?;
    let users = state.users.clone();
    let record = state.blocking(move || users.register(new_user)).await?;

    info!(user_id = %record.id, "registered user");
    Ok(json_response(
        StatusCode::OK,
        json!({
            "message": "User successfully registered",
            "user_id": record.id,
        }),
    ))
}

/// Verify the password, open a browser session and issue the extension's
/// token and signing secret.
async fn handle_login(state: &AppState, body: Bytes) -> Result<Response<BoxBody>> {
    let login: LoginRequest = parse_json(&body)?;
    let users = state.users.clone();
    let issuer = state.issuer.clone();
    let session_ttl = state.config.session_ttl;

    let (session, issued) = state
        .blocking(move || {
            let record = users.authenticate(&login.email, &login.password)?;
            issuer.login(&record.identity(), session_ttl)
        })
        .await?;

    info!(user_id = %issued.token.identity().user_id, "user logged in");
    let response = json_response(
        StatusCode::OK,
        json!({
            "token": issued.token.token(),
            "signing_secret": issued.signing_secret.as_str(),
        }),
    );
    with_cookie(response, &session_set_cookie(&session, session_ttl.as_secs()))
}

/// End the browser session and revoke the extension's signing secret, so a
/// still-valid identity token can no longer sign ingestion calls.
async fn handle_logout(state: &AppState, headers: &HeaderMap) -> Result<Response<BoxBody>> {
    if let Some(session) = PresentedCredentials::from_headers(headers).session {
        let credentials = state.credentials.clone();
        let ended = state
            .blocking(move || credentials.end_session(&session))
            .await?;
        if let Some(identity) = ended {
            info!(user_id = %identity.user_id, "user logged out");
        }
    }

    let response = json_response(StatusCode::OK, json!({ "message": "Logged out" }));
    with_cookie(response, &session_clear_cookie())
}

async fn handle_me(state: &AppState, headers: &HeaderMap) -> Result<Response<BoxBody>> {
    let presented = PresentedCredentials::from_headers(headers);
    let authenticator = state.authenticator.clone();
    let users = state.users.clone();

    let record = state
        .blocking(move || {
            let caller = authenticator.authenticate_session(&presented)?;
            users
                .get(caller.identity.user_id)?
                .ok_or(TrailError::Unauthenticated)
        })
        .await?;

    Ok(json_response(
        StatusCode::OK,
        json!({
            "user_id": record.id,
            "email": record.email,
            "full_name": record.full_name,
            "tier": record.tier,
            "auth_provider": record.auth_provider,
        }),
    ))
}

async fn handle_whoami(state: &AppState, headers: &HeaderMap) -> Result<Response<BoxBody>> {
    let presented = PresentedCredentials::from_headers(headers);
    let authenticator = state.authenticator.clone();
    let caller = state
        .blocking(move || authenticator.authenticate(&presented))
        .await?;

    Ok(json_response(
        StatusCode::OK,
        json!({
            "user_id": caller.identity.user_id,
            "tier": caller.identity.tier,
            "via": caller.via,
        }),
    ))
}

/// Accept one signed activity event into the buffer
async fn handle_event(
    state: &AppState,
    headers: &HeaderMap,
    body: Bytes,
) -> Result<Response<BoxBody>> {
    let caller = state
        .authenticator
        .authenticate_bearer(&PresentedCredentials::from_headers(headers))?;
    let user_id = caller.identity.user_id;
    let signature = signature_header(headers);
    let signatures = state.signatures.clone();
    let buffer = state.buffer.clone();

    let id = state
        .blocking(move || {
            signatures.verify(user_id, &body, signature.as_deref())?;
            let payload: EventPayload = parse_json(&body)?;
            let event = payload.stamp(user_id, Utc::now())?;
            buffer.enqueue(&BufferedRecord::Event(event))
        })
        .await?;

    debug!(user_id = %user_id, buffer_id = %id, "queued event");
    Ok(json_response(StatusCode::OK, json!({ "status": "ok" })))
}

/// Accept a signed batch of imported connections into the buffer
async fn handle_connections(
    state: &AppState,
    headers: &HeaderMap,
    body: Bytes,
) -> Result<Response<BoxBody>> {
    let caller = state
        .authenticator
        .authenticate_bearer(&PresentedCredentials::from_headers(headers))?;
    let user_id = caller.identity.user_id;
    let signature = signature_header(headers);
    let signatures = state.signatures.clone();
    let buffer = state.buffer.clone();

    let (queued, skipped) = state
        .blocking(move || {
            signatures.verify(user_id, &body, signature.as_deref())?;
            let batch: ConnectionBatch = parse_json(&body)?;
            batch.validate()?;
            let (records, skipped) = batch.into_records(user_id);
            let queued = buffer.enqueue_all(&records)?;
            Ok((queued, skipped))
        })
        .await?;

    if skipped > 0 {
        warn!(user_id = %user_id, skipped, "connections without slug skipped");
    }
    info!(user_id = %user_id, queued, "queued connections");
    Ok(json_response(
        StatusCode::OK,
        json!({
            "status": "ok",
            "queued": queued,
            "skipped": skipped,
        }),
    ))
}
