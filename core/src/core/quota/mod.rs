//! Quota prober: concurrent precise/status probes against the upstream
//! service, with per-account TTL caching and bounded concurrency.

mod client;

pub use client::ProbeOutcome;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, RwLock, Semaphore};
use tracing::{debug, warn};

use crate::core::store::models::QuotaSnapshotRow;
use crate::core::store::quota::NewQuotaSnapshot;
use crate::core::store::Store;
use crate::core::vault::VaultManager;
use crate::core::{AccountId, CoreError, QuotaMode, QuotaState};

struct CacheEntry {
    fetched_at: Instant,
    snapshot: QuotaSnapshotRow,
}

/// Probes upstream quota endpoints on behalf of stored accounts.
pub struct QuotaProber {
    store: Arc<Store>,
    vault: Arc<VaultManager>,
    http: reqwest::Client,
    semaphore: Arc<Semaphore>,
    request_timeout: Duration,
    cache_ttl: RwLock<Duration>,
    cache: Mutex<HashMap<AccountId, CacheEntry>>,
}

impl QuotaProber {
    pub fn new(
        store: Arc<Store>,
        vault: Arc<VaultManager>,
        max_concurrency: usize,
        request_timeout: Duration,
        cache_ttl: Duration,
    ) -> Result<Self, CoreError> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| CoreError::ProbeFailed(format!("failed to build http client: {e}")))?;

        Ok(Self {
            store,
            vault,
            http,
            semaphore: Arc::new(Semaphore::new(max_concurrency.max(1))),
            request_timeout,
            cache_ttl: RwLock::new(cache_ttl),
            cache: Mutex::new(HashMap::new()),
        })
    }

    /// Overrides the per-account cache TTL at runtime.
    pub async fn set_cache_ttl(&self, ttl: Duration) {
        *self.cache_ttl.write().await = ttl;
    }

    /// Refreshes the quota snapshot for `account_id`, serving from the TTL
    /// cache unless `force` is set.
    pub async fn refresh(
        &self,
        account_id: AccountId,
        force: bool,
    ) -> Result<QuotaSnapshotRow, CoreError> {
        if !force {
            if let Some(cached) = self.cached(account_id).await {
                debug!(%account_id, "quota cache hit");
                return Ok(cached);
            }
        }

        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| CoreError::ProbeFailed("semaphore closed".to_string()))?;

        let account = self.store.get_account(account_id).await?;
        let plaintext = self.vault.unwrap_blob(&account.auth_ciphertext).await?;
        let token = client::extract_bearer_token(&plaintext)?;

        let outcome = client::probe(&self.http, &token, self.request_timeout).await;

        let new_snapshot = NewQuotaSnapshot {
            account_id,
            mode: outcome.mode,
            remaining_value: outcome.remaining_value,
            remaining_unit: outcome.remaining_unit,
            quota_state: outcome.quota_state,
            reset_at: outcome.reset_at,
            source: outcome.source,
            confidence: outcome.confidence,
            reason: outcome.reason,
        };

        let id = self.store.insert_quota_snapshot(new_snapshot).await?;
        let snapshot = self
            .store
            .latest_quota_snapshot(account_id)
            .await?
            .filter(|s| s.id == id)
            .ok_or_else(|| CoreError::StoreError("quota snapshot vanished after insert".to_string()))?;

        self.cache.lock().await.insert(
            account_id,
            CacheEntry {
                fetched_at: Instant::now(),
                snapshot: snapshot.clone(),
            },
        );

        Ok(snapshot)
    }

    /// Refreshes every known account under the shared semaphore. Individual
    /// probe failures do not abort the dashboard; they are logged and
    /// skipped so one bad account cannot blank the whole view.
    pub async fn dashboard(&self) -> Result<Vec<QuotaSnapshotRow>, CoreError> {
        let accounts = self.store.list_accounts().await?;
        let mut snapshots = Vec::with_capacity(accounts.len());

        let mut join_set = tokio::task::JoinSet::new();
        for account in accounts {
            let store = self.store.clone();
            let vault = self.vault.clone();
            let http = self.http.clone();
            let semaphore = self.semaphore.clone();
            let request_timeout = self.request_timeout;
            join_set.spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok()?;
                let account = store.get_account(account.id).await.ok()?;
                let plaintext = vault.unwrap_blob(&account.auth_ciphertext).await.ok()?;
                let token = client::extract_bearer_token(&plaintext).ok()?;
                let outcome = client::probe(&http, &token, request_timeout).await;
                let new_snapshot = NewQuotaSnapshot {
                    account_id: account.id,
                    mode: outcome.mode,
                    remaining_value: outcome.remaining_value,
                    remaining_unit: outcome.remaining_unit,
                    quota_state: outcome.quota_state,
                    reset_at: outcome.reset_at,
                    source: outcome.source,
                    confidence: outcome.confidence,
                    reason: outcome.reason,
                };
                let id = store.insert_quota_snapshot(new_snapshot).await.ok()?;
                store
                    .latest_quota_snapshot(account.id)
                    .await
                    .ok()
                    .flatten()
                    .filter(|s| s.id == id)
            });
        }

        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(Some(snapshot)) => snapshots.push(snapshot),
                Ok(None) => warn!("dashboard refresh skipped an account"),
                Err(e) => warn!(error = %e, "dashboard refresh task panicked"),
            }
        }
        Ok(snapshots)
    }

    /// Returns the most recent snapshots for `account_id`, oldest probes
    /// last.
    pub async fn history(
        &self,
        account_id: AccountId,
        limit: u32,
    ) -> Result<Vec<QuotaSnapshotRow>, CoreError> {
        self.store.list_quota_snapshots(account_id, limit).await
    }

    async fn cached(&self, account_id: AccountId) -> Option<QuotaSnapshotRow> {
        let ttl = *self.cache_ttl.read().await;
        let cache = self.cache.lock().await;
        let entry = cache.get(&account_id)?;
        if entry.fetched_at.elapsed() <= ttl {
            Some(entry.snapshot.clone())
        } else {
            None
        }
    }
}
