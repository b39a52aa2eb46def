//! Shared handles owned by the composition root

use std::sync::Arc;
use std::time::Duration;
use tracing::warn;
use trailgraph_core::auth::{SigningKey, VerifyingKey};
use trailgraph_core::*;
use trailgraph_engine::{CredentialStore, EventBuffer, GraphStore, StorageEngine, UserDirectory};

use crate::auth::{Authenticator, SignatureVerifier};
use crate::config::ServerConfig;
use crate::issuer::TokenIssuer;

/// Everything a request handler or the flush worker needs.
///
/// Built once in `main` and cloned into every connection task.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub credentials: CredentialStore,
    pub buffer: EventBuffer,
    pub graph: GraphStore,
    pub users: UserDirectory,
    pub issuer: Arc<TokenIssuer>,
    pub authenticator: Authenticator,
    pub signatures: SignatureVerifier,
}

impl AppState {
    pub fn new(
        engine: &StorageEngine,
        signing_key: SigningKey,
        verifying_key: VerifyingKey,
        config: ServerConfig,
    ) -> Result<Self> {
        if signing_key.key_id() != verifying_key.key_id() {
            return Err(TrailError::KeyUnavailable(format!(
                "public key {} does not match private key {}",
                verifying_key.key_id(),
                signing_key.key_id()
            )));
        }

        let credentials = engine.credentials()?;
        let issuer = TokenIssuer::new(signing_key, credentials.clone(), config.token_ttl);

        Ok(AppState {
            buffer: engine.event_buffer()?,
            graph: engine.graph()?,
            users: engine.users()?,
            issuer: Arc::new(issuer),
            authenticator: Authenticator::new(credentials.clone(), verifying_key),
            signatures: SignatureVerifier::new(credentials.clone()),
            credentials,
            config: Arc::new(config),
        })
    }

    /// Run a blocking store call on the blocking pool, bounded by the
    /// request timeout.
    pub async fn blocking<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce() -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        bounded(self.config.request_timeout, f).await
    }
}

/// Run `f` on the blocking pool and give up after `limit`
async fn bounded<T, F>(limit: Duration, f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    match tokio::time::timeout(limit, tokio::task::spawn_blocking(f)).await {
        Ok(Ok(result)) => result,
        Ok(Err(e)) => Err(TrailError::Internal(format!("blocking task failed: {}", e))),
        Err(_) => Err(TrailError::Timeout(limit)),
    }
}

/// Run `f` on the blocking pool and wait until it has finished.
///
/// Unlike [`bounded`] the work is never abandoned: passing `limit` only logs
/// a warning, so the caller cannot start a second run while one is in
/// flight.
pub async fn blocking_to_completion<T, F>(task: &'static str, limit: Duration, f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    let mut handle = tokio::task::spawn_blocking(f);
    let joined = match tokio::time::timeout(limit, &mut handle).await {
        Ok(joined) => joined,
        Err(_) => {
            warn!(task, limit_ms = (limit.as_millis() as u64), "still running past its deadline");
            handle.await
        }
    };
    joined.map_err(|e| TrailError::Internal(format!("blocking task failed: {}", e)))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[tokio::test]
    async fn test_bounded_times_out() {
        let result: Result<()> = bounded(Duration::from_millis(20), || {
            std::thread::sleep(Duration::from_millis(200));
            Ok(())
        })
        .await;
        assert!(matches!(result, Err(TrailError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_overrunning_work_is_awaited() {
        let done = Arc::new(AtomicBool::new(false));
        let flag = done.clone();
        let result = blocking_to_completion("sleep", Duration::from_millis(20), move || {
            std::thread::sleep(Duration::from_millis(200));
            flag.store(true, Ordering::SeqCst);
            Ok(7)
        })
        .await;

        assert_eq!(result.unwrap(), 7);
        assert!(done.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_bounded_passes_errors_through() {
        let result: Result<()> = bounded(Duration::from_secs(1), || {
            Err(TrailError::Validation("bad".into()))
        })
        .await;
        assert!(matches!(result, Err(TrailError::Validation(_))));
    }

    #[test]
    fn test_mismatched_key_pair_is_rejected() {
        let (engine, _temp) = StorageEngine::temp().unwrap();
        let result = AppState::new(
            &engine,
            SigningKey::generate(),
            SigningKey::generate().verifying_key(),
            ServerConfig::default(),
        );
        assert!(matches!(result, Err(TrailError::KeyUnavailable(_))));
    }
}
