//! Background flush of the event buffer into the graph
//!
//! Every tick the worker drains the buffer and merges the drained records
//! in one graph transaction. A record that cannot be decoded or merged is
//! logged and dropped; the rest of the batch still commits. A batch that
//! overruns the flush deadline is not committed, and the next tick never
//! starts before the previous batch has returned.

use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use trailgraph_core::*;
use trailgraph_engine::{CredentialStore, EventBuffer, GraphStore};

use crate::state::{blocking_to_completion, AppState};

/// Outcome of one flush
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub drained: usize,
    pub merged: usize,
    pub skipped: usize,
}

pub struct FlushWorker {
    buffer: EventBuffer,
    graph: GraphStore,
    credentials: CredentialStore,
    interval: Duration,
    flush_timeout: Duration,
}

impl FlushWorker {
    pub fn new(state: &AppState) -> Self {
        FlushWorker {
            buffer: state.buffer.clone(),
            graph: state.graph.clone(),
            credentials: state.credentials.clone(),
            interval: state.config.flush_interval,
            flush_timeout: state.config.flush_timeout,
        }
    }

    /// Tick until `shutdown` flips to `true`. A flush in progress completes
    /// before the loop exits.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(interval_secs = self.interval.as_secs(), "flush worker started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.tick().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("flush worker stopped");
    }

    /// One flush plus the credential sweep; failures are logged only
    pub async fn tick(&self) {
        match self.flush().await {
            Ok(report) if report.drained > 0 => info!(
                drained = report.drained,
                merged = report.merged,
                skipped = report.skipped,
                "flushed buffer"
            ),
            Ok(_) => debug!("buffer empty"),
            Err(e) => error!(error = %e, "flush failed"),
        }

        let credentials = self.credentials.clone();
        let sweep = move || credentials.purge_expired();
        match blocking_to_completion("credential sweep", self.flush_timeout, sweep).await {
            Ok(0) => {}
            Ok(purged) => debug!(purged, "purged expired credentials"),
            Err(e) => warn!(error = %e, "credential sweep failed"),
        }
    }

    /// Drain and merge one batch under the flush deadline
    pub async fn flush(&self) -> Result<FlushReport> {
        let buffer = self.buffer.clone();
        let graph = self.graph.clone();
        let limit = self.flush_timeout;
        blocking_to_completion("flush", limit, move || flush_batch(&buffer, &graph, limit)).await
    }
}

fn flush_batch(buffer: &EventBuffer, graph: &GraphStore, limit: Duration) -> Result<FlushReport> {
    let deadline = Instant::now() + limit;
    let entries = buffer.drain(None)?;
    if entries.is_empty() {
        return Ok(FlushReport::default());
    }

    let mut report = FlushReport {
        drained: entries.len(),
        ..Default::default()
    };
    let mut txn = graph.transaction();

    for entry in &entries {
        if Instant::now() >= deadline {
            return Err(TrailError::Timeout(limit));
        }
        match entry.decode().and_then(|record| txn.merge_record(&record)) {
            Ok(()) => report.merged += 1,
            Err(e) => {
                warn!(buffer_id = %entry.id, error = %e, "skipping buffered record");
                report.skipped += 1;
            }
        }
    }

    if Instant::now() >= deadline {
        return Err(TrailError::Timeout(limit));
    }
    txn.commit()?;
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use trailgraph_core::auth::SigningKey;
    use trailgraph_engine::{EdgeKind, GraphStats, StorageEngine};

    use crate::config::ServerConfig;

    fn state(engine: &StorageEngine) -> AppState {
        let key = SigningKey::generate();
        let verifying = key.verifying_key();
        AppState::new(engine, key, verifying, ServerConfig::default()).unwrap()
    }

    fn event(urn: &str) -> BufferedRecord {
        let payload = EventPayload {
            post_urn: urn.to_string(),
            action: "like".to_string(),
            author_slug: "x".to_string(),
            ..Default::default()
        };
        BufferedRecord::Event(payload.stamp(UserId::new(1), Utc::now()).unwrap())
    }

    #[tokio::test]
    async fn test_flush_skips_bad_records() {
        let (engine, _temp) = StorageEngine::temp().unwrap();
        let state = state(&engine);
        let worker = FlushWorker::new(&state);

        for i in 0..9 {
            state.buffer.enqueue(&event(&format!("urn:{}", i))).unwrap();
            if i == 4 {
                state.buffer.push_raw(b"{\"kind\":\"event\"}").unwrap();
            }
        }

        let report = worker.flush().await.unwrap();
        assert_eq!(report, FlushReport { drained: 10, merged: 9, skipped: 1 });
        assert_eq!(state.graph.edge_count(EdgeKind::Action).unwrap(), 9);
        assert!(state.buffer.is_empty().unwrap());
    }

    #[tokio::test]
    async fn test_empty_flush_is_noop() {
        let (engine, _temp) = StorageEngine::temp().unwrap();
        let worker = FlushWorker::new(&state(&engine));
        assert_eq!(worker.flush().await.unwrap(), FlushReport::default());
    }

    #[test]
    fn test_overdue_batch_is_not_committed() {
        let (engine, _temp) = StorageEngine::temp().unwrap();
        let state = state(&engine);
        state.buffer.enqueue(&event("urn:1")).unwrap();

        let err = flush_batch(&state.buffer, &state.graph, Duration::ZERO).unwrap_err();
        assert!(matches!(err, TrailError::Timeout(_)));
        assert_eq!(state.graph.stats().unwrap(), GraphStats::default());
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let (engine, _temp) = StorageEngine::temp().unwrap();
        let state = state(&engine);
        state.buffer.enqueue(&event("urn:1")).unwrap();

        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(FlushWorker::new(&state).run(rx));

        // The first tick fires immediately
        for _ in 0..100 {
            if state.graph.edge_count(EdgeKind::Action).unwrap() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        tx.send(true).unwrap();
        handle.await.unwrap();

        assert!(state.buffer.is_empty().unwrap());
        assert_eq!(state.graph.edge_count(EdgeKind::Action).unwrap(), 1);
    }
}
