//! Queued, cached access to the brokerage API
//!
//! Many callers (one per analyzer task, plus the lifecycle loop) hit the
//! same rate-limited endpoints for the same symbols at the same moments.
//! A single worker drains queued calls strictly in arrival order, keeps a
//! minimum spacing between outbound requests, and caches successful
//! responses under their [`QuoteKey`] so a burst of identical lookups
//! collapses into one call.
//!
//! Callers that find a live cache entry never touch the queue. Identical
//! keys already sitting in the queue are not merged: an entry dequeued
//! before the first result lands still issues its own call. The coarse key
//! bucket bounds how stale that can get, and keeping the worker the sole
//! cache writer keeps the common burst down to one outbound call.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures::future::BoxFuture;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::CoordinatorConfig;
use crate::coordination::shutdown::ShutdownToken;
use crate::domain::QuoteKey;
use crate::error::{Result, ScoopError};

type BoxedCall = BoxFuture<'static, Result<Value>>;

/// One pending unit of work: the call itself plus the slot its result
/// is posted to. The slot is fulfilled exactly once; if the submitting
/// caller timed out and dropped its receiver, the late result is discarded.
struct QueuedCall {
    key: String,
    call: BoxedCall,
    reply: oneshot::Sender<Result<Value>>,
}

struct CacheEntry {
    value: Value,
    expires_at: Instant,
}

/// Serializes outbound brokerage calls through one background worker
/// with a TTL response cache.
pub struct RequestCoordinator {
    tx: mpsc::UnboundedSender<QueuedCall>,
    cache: Arc<DashMap<String, CacheEntry>>,
    wait_timeout: Duration,
}

impl RequestCoordinator {
    /// Create the coordinator and spawn its worker task. The worker stops
    /// when `shutdown` fires or the coordinator is dropped.
    pub fn spawn(cfg: &CoordinatorConfig, shutdown: ShutdownToken) -> Arc<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        let cache = Arc::new(DashMap::new());

        tokio::spawn(worker(
            rx,
            cache.clone(),
            Duration::from_millis(cfg.min_interval_ms),
            Duration::from_secs(cfg.cache_ttl_secs),
            shutdown,
        ));

        Arc::new(Self {
            tx,
            cache,
            wait_timeout: Duration::from_secs(cfg.wait_timeout_secs),
        })
    }

    /// Run `op` through the queue, or serve its result from the cache.
    ///
    /// Blocks the caller until the result is posted back, up to the
    /// configured wait bound; on expiry the caller receives
    /// [`ScoopError::QueueTimeout`] and the entry is left to run (its
    /// result is dropped).
    pub async fn submit<F, Fut>(&self, key: &QuoteKey, op: F) -> Result<Value>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        if let Some(hit) = self.cached(key.as_str()) {
            debug!(key = %key, "quote cache hit");
            return Ok(hit);
        }

        let (reply, rx) = oneshot::channel();
        self.tx
            .send(QueuedCall {
                key: key.to_string(),
                call: Box::pin(op()),
                reply,
            })
            .map_err(|_| ScoopError::Cancelled)?;

        match tokio::time::timeout(self.wait_timeout, rx).await {
            Ok(Ok(result)) => result,
            // Worker stopped before servicing the entry.
            Ok(Err(_)) => Err(ScoopError::Cancelled),
            Err(_) => Err(ScoopError::QueueTimeout {
                key: key.to_string(),
            }),
        }
    }

    fn cached(&self, key: &str) -> Option<Value> {
        if let Some(entry) = self.cache.get(key) {
            if entry.expires_at > Instant::now() {
                return Some(entry.value.clone());
            }
        }
        self.cache.remove_if(key, |_, e| e.expires_at <= Instant::now());
        None
    }

    pub fn cache_size(&self) -> usize {
        self.cache.len()
    }

    pub fn clear_cache(&self) {
        let count = self.cache.len();
        self.cache.clear();
        debug!("cleared {count} cached quotes");
    }
}

async fn worker(
    mut rx: mpsc::UnboundedReceiver<QueuedCall>,
    cache: Arc<DashMap<String, CacheEntry>>,
    min_interval: Duration,
    cache_ttl: Duration,
    mut shutdown: ShutdownToken,
) {
    let mut last_call: Option<Instant> = None;

    loop {
        let queued = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            item = rx.recv() => match item {
                Some(queued) => queued,
                None => break,
            },
        };

        // Sleep out the remainder of the spacing interval before dialing.
        if let Some(last) = last_call {
            let elapsed = last.elapsed();
            if elapsed < min_interval {
                tokio::time::sleep(min_interval - elapsed).await;
            }
        }

        debug!(key = %queued.key, "executing queued brokerage call");
        let result = queued.call.await;
        last_call = Some(Instant::now());

        if let Ok(value) = &result {
            cache.insert(
                queued.key.clone(),
                CacheEntry {
                    value: value.clone(),
                    expires_at: Instant::now() + cache_ttl,
                },
            );
        }

        if queued.reply.send(result).is_err() {
            warn!(key = %queued.key, "caller abandoned queued call before completion");
        }
    }

    debug!("request coordinator worker stopped");
}
