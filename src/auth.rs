//! Shared OAuth2 token broker
//!
//! Every process that talks to the brokerage shares one access token
//! through the `shared_tokens` row instead of minting its own. Within a
//! process, a local mutex keeps concurrent callers from stampeding the
//! issuance endpoint; across processes, contention surfaces as a 403 from
//! the endpoint and is retried with jitter after re-checking whether
//! another process already won.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::adapters::{IssuedToken, SharedToken};
use crate::error::{Result, ScoopError};

const MAX_ISSUE_ATTEMPTS: u32 = 3;

/// Storage seam for the shared token row
#[async_trait]
pub trait TokenStore: Send + Sync {
    async fn read_token(&self) -> Result<Option<SharedToken>>;
    async fn upsert_token(&self, access_token: &str, expires_at: DateTime<Utc>) -> Result<()>;
}

/// Issuance seam over the brokerage's OAuth2 endpoint
#[async_trait]
pub trait TokenIssuer: Send + Sync {
    async fn issue_token(&self) -> Result<IssuedToken>;
}

pub struct TokenBroker {
    store: Arc<dyn TokenStore>,
    issuer: Arc<dyn TokenIssuer>,
    /// Serializes refresh attempts from this process only.
    refresh_lock: Mutex<()>,
    /// Tokens are treated as expired this long before their true expiry.
    safety_margin: ChronoDuration,
}

impl TokenBroker {
    pub fn new(
        store: Arc<dyn TokenStore>,
        issuer: Arc<dyn TokenIssuer>,
        safety_margin_secs: u64,
    ) -> Self {
        Self {
            store,
            issuer,
            refresh_lock: Mutex::new(()),
            safety_margin: ChronoDuration::seconds(safety_margin_secs as i64),
        }
    }

    /// Return a currently-valid access token, refreshing the shared row
    /// if needed. Never returns a token within the safety margin of its
    /// expiry.
    pub async fn access_token(&self) -> Result<String> {
        if let Some(token) = self.read_live().await? {
            return Ok(token);
        }

        let _guard = self.refresh_lock.lock().await;

        // Another task in this process may have refreshed while we waited.
        if let Some(token) = self.read_live().await? {
            debug!("shared token refreshed by a concurrent task");
            return Ok(token);
        }

        self.issue_and_share().await
    }

    async fn read_live(&self) -> Result<Option<String>> {
        let now = Utc::now();
        Ok(self
            .store
            .read_token()
            .await?
            .filter(|t| t.expires_at - self.safety_margin > now)
            .map(|t| t.access_token))
    }

    async fn issue_and_share(&self) -> Result<String> {
        for attempt in 1..=MAX_ISSUE_ATTEMPTS {
            if attempt > 1 {
                let jitter = rand::thread_rng().gen_range(100..500);
                info!(
                    "Retrying token issuance (attempt {attempt}/{MAX_ISSUE_ATTEMPTS}) after {jitter}ms"
                );
                tokio::time::sleep(Duration::from_millis(jitter)).await;

                // Another process may have issued a token in the meantime.
                if let Some(token) = self.read_live().await? {
                    info!("Another process issued the shared token, reusing it");
                    return Ok(token);
                }
            }

            match self.issuer.issue_token().await {
                Ok(issued) => {
                    // Upsert always wins on conflict: the last successful
                    // issuance is authoritative.
                    self.store
                        .upsert_token(&issued.access_token, issued.expires_at)
                        .await?;
                    return Ok(issued.access_token);
                }
                Err(e) if e.is_contention() && attempt < MAX_ISSUE_ATTEMPTS => {
                    warn!("Token issuance contention (likely concurrent process): {e}");
                }
                Err(e) => return Err(e),
            }
        }

        Err(ScoopError::RateLimited(format!(
            "token issuance still contended after {MAX_ISSUE_ATTEMPTS} attempts"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// In-memory token row with upsert-overwrite semantics.
    #[derive(Default)]
    struct MemoryStore {
        row: std::sync::Mutex<Option<SharedToken>>,
    }

    #[async_trait]
    impl TokenStore for MemoryStore {
        async fn read_token(&self) -> Result<Option<SharedToken>> {
            Ok(self.row.lock().unwrap().clone())
        }

        async fn upsert_token(
            &self,
            access_token: &str,
            expires_at: DateTime<Utc>,
        ) -> Result<()> {
            *self.row.lock().unwrap() = Some(SharedToken {
                access_token: access_token.to_string(),
                expires_at,
            });
            Ok(())
        }
    }

    /// Issuer that plays back a script of outcomes and counts calls.
    struct ScriptedIssuer {
        script: std::sync::Mutex<VecDeque<Result<IssuedToken>>>,
        calls: AtomicUsize,
    }

    impl ScriptedIssuer {
        fn new(script: Vec<Result<IssuedToken>>) -> Arc<Self> {
            Arc::new(Self {
                script: std::sync::Mutex::new(script.into()),
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl TokenIssuer for ScriptedIssuer {
        async fn issue_token(&self) -> Result<IssuedToken> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(ScoopError::Internal("script exhausted".into())))
        }
    }

    fn fresh(token: &str) -> Result<IssuedToken> {
        Ok(IssuedToken {
            access_token: token.to_string(),
            expires_at: Utc::now() + ChronoDuration::seconds(86_400),
        })
    }

    fn contended() -> Result<IssuedToken> {
        Err(ScoopError::RateLimited("403 from issuance endpoint".into()))
    }

    #[tokio::test]
    async fn live_shared_token_is_reused_without_issuance() {
        let store = Arc::new(MemoryStore::default());
        store.upsert_token("tok-live", Utc::now() + ChronoDuration::hours(6)).await.unwrap();
        let issuer = ScriptedIssuer::new(vec![]);
        let broker = TokenBroker::new(store, issuer.clone(), 300);

        assert_eq!(broker.access_token().await.unwrap(), "tok-live");
        assert_eq!(issuer.calls(), 0);
    }

    #[tokio::test]
    async fn token_inside_safety_margin_is_refreshed() {
        let store = Arc::new(MemoryStore::default());
        // True expiry is 60s away, margin is 300s: must refresh.
        store.upsert_token("tok-stale", Utc::now() + ChronoDuration::seconds(60)).await.unwrap();
        let issuer = ScriptedIssuer::new(vec![fresh("tok-new")]);
        let broker = TokenBroker::new(store.clone(), issuer.clone(), 300);

        assert_eq!(broker.access_token().await.unwrap(), "tok-new");
        assert_eq!(issuer.calls(), 1);
        let row = store.read_token().await.unwrap().unwrap();
        assert_eq!(row.access_token, "tok-new");
    }

    #[tokio::test]
    async fn concurrent_callers_in_one_process_issue_once() {
        let store = Arc::new(MemoryStore::default());
        let issuer = ScriptedIssuer::new(vec![fresh("tok-shared")]);
        let broker = Arc::new(TokenBroker::new(store, issuer.clone(), 300));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let broker = broker.clone();
            handles.push(tokio::spawn(async move { broker.access_token().await }));
        }
        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), "tok-shared");
        }

        // The losers of the lock race re-read the store instead of issuing.
        assert_eq!(issuer.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn contention_is_retried_then_succeeds() {
        let store = Arc::new(MemoryStore::default());
        let issuer = ScriptedIssuer::new(vec![contended(), contended(), fresh("tok-won")]);
        let broker = TokenBroker::new(store, issuer.clone(), 300);

        assert_eq!(broker.access_token().await.unwrap(), "tok-won");
        assert_eq!(issuer.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_surface_rate_limited() {
        let store = Arc::new(MemoryStore::default());
        let issuer = ScriptedIssuer::new(vec![contended(), contended(), contended()]);
        let broker = TokenBroker::new(store, issuer.clone(), 300);

        assert!(matches!(
            broker.access_token().await,
            Err(ScoopError::RateLimited(_))
        ));
        assert_eq!(issuer.calls(), 3);
    }

    /// Issuer standing in for a lost cross-process race: the collision
    /// rejection arrives while the winning process's token lands in the
    /// shared store.
    struct LosesRaceIssuer {
        store: Arc<MemoryStore>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl TokenIssuer for LosesRaceIssuer {
        async fn issue_token(&self) -> Result<IssuedToken> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.store
                .upsert_token("tok-other-process", Utc::now() + ChronoDuration::hours(6))
                .await?;
            contended()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn store_recheck_wins_over_reissuance() {
        let store = Arc::new(MemoryStore::default());
        let issuer = Arc::new(LosesRaceIssuer {
            store: store.clone(),
            calls: AtomicUsize::new(0),
        });
        let broker = TokenBroker::new(store, issuer.clone(), 300);

        // Attempt 1 collides; the pre-retry store check finds the other
        // process's token and no second issuance happens.
        assert_eq!(broker.access_token().await.unwrap(), "tok-other-process");
        assert_eq!(issuer.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn non_contention_error_is_not_retried() {
        let store = Arc::new(MemoryStore::default());
        let issuer = ScriptedIssuer::new(vec![Err(ScoopError::Auth("bad app key".into()))]);
        let broker = TokenBroker::new(store, issuer.clone(), 300);

        assert!(matches!(
            broker.access_token().await,
            Err(ScoopError::Auth(_))
        ));
        assert_eq!(issuer.calls(), 1);
    }
}
