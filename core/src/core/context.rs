//! Application context and command facade.
//!
//! A single value constructed once at startup (store handle, vault manager,
//! HTTP client, runtime config) and threaded through every operation exposed
//! to a caller. No hidden globals; every lock lives inside this context or
//! the subsystems it owns.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::core::cli_adapter::CliAdapter;
use crate::core::config::{self, RuntimeConfig};
use crate::core::crypto;
use crate::core::quota::QuotaProber;
use crate::core::store::models::{Account, QuotaSnapshotRow, SwitchHistoryRow};
use crate::core::store::Store;
use crate::core::switch::SwitchEngine;
use crate::core::vault::{VaultManager, VaultStatus};
use crate::core::{AccountId, CoreError, HistoryId};

/// Snapshot of system health for the diagnostics panel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeDiagnostics {
    pub app_data_dir: PathBuf,
    pub database_path: PathBuf,
    pub live_auth_path: Option<PathBuf>,
    pub live_auth_file_exists: bool,
    pub schema_version: u32,
    pub detected_cli_process_count: usize,
}

/// Snapshot of the external CLI's observed state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CliStatus {
    pub running: bool,
    pub process_count: usize,
    pub checked_at: chrono::DateTime<chrono::Utc>,
}

/// Name used for an import when the caller provides an empty string.
fn default_account_name(fingerprint: &str) -> String {
    format!("Account-{}", &fingerprint[..fingerprint.len().min(8)])
}

/// The single value constructed at startup and threaded through every
/// operation exposed to a caller.
pub struct AppContext {
    store: Arc<Store>,
    vault: Arc<VaultManager>,
    cli: Arc<CliAdapter>,
    switch: SwitchEngine,
    quota: QuotaProber,
    config: RuntimeConfig,
}

impl AppContext {
    /// Builds the context from `config`, opening (or creating) the
    /// database and vault state it describes.
    pub async fn new(config: RuntimeConfig) -> Result<Self, CoreError> {
        let db_path = config.paths.app_data_dir.join("codex-switch.db");
        let store = Arc::new(Store::open(&db_path)?);
        let vault = Arc::new(VaultManager::new(store.clone()).await?);
        let cli = Arc::new(CliAdapter::new());

        let live_auth_path = config::live_auth_path(&config)
            .ok_or_else(|| CoreError::InvalidInput("could not determine live auth path".to_string()))?;

        let switch = SwitchEngine::new(
            store.clone(),
            vault.clone(),
            cli.clone(),
            live_auth_path,
            config.paths.app_data_dir.clone(),
            Duration::from_millis(config.switch.kill_grace_ms),
        );

        let quota = QuotaProber::new(
            store.clone(),
            vault.clone(),
            config.probe.max_concurrency,
            Duration::from_millis(config.probe.request_timeout_ms),
            Duration::from_secs(config.probe.cache_ttl_s),
        )?;

        info!(app_data_dir = %config.paths.app_data_dir.display(), "application context ready");

        Ok(Self {
            store,
            vault,
            cli,
            switch,
            quota,
            config,
        })
    }

    // -------------------------------------------------------------------
    // Vault
    // -------------------------------------------------------------------

    pub async fn init_vault(&self, password: &str) -> Result<(), CoreError> {
        self.vault.init(password, self.config.kdf_params()).await
    }

    pub async fn unlock_vault(&self, password: &str) -> Result<(), CoreError> {
        self.vault.unlock(password).await
    }

    pub async fn lock_vault(&self) -> Result<(), CoreError> {
        self.vault.lock().await
    }

    pub async fn vault_status(&self) -> VaultStatus {
        self.vault.status().await
    }

    // -------------------------------------------------------------------
    // Accounts
    // -------------------------------------------------------------------

    /// Imports the current live auth file as a new account.
    pub async fn import_current(&self, name: &str, tags: &[String]) -> Result<AccountId, CoreError> {
        let live_auth_path = config::live_auth_path(&self.config)
            .ok_or_else(|| CoreError::InvalidInput("could not determine live auth path".to_string()))?;
        self.import_from_file(&live_auth_path, name, tags).await
    }

    /// Imports an arbitrary auth file as a new account.
    pub async fn import_from_file(
        &self,
        path: &std::path::Path,
        name: &str,
        tags: &[String],
    ) -> Result<AccountId, CoreError> {
        let plaintext = tokio::fs::read(path).await?;
        // Validate it is JSON before accepting it as a credential.
        let _: serde_json::Value = serde_json::from_slice(&plaintext)?;

        let fingerprint = crypto::fingerprint(&plaintext)?;
        let ciphertext = self.vault.wrap(&plaintext).await?;

        let resolved_name = if name.is_empty() {
            default_account_name(&fingerprint)
        } else {
            name.to_string()
        };

        self.store
            .insert_account(&resolved_name, tags, &ciphertext, &fingerprint)
            .await
    }

    /// Invokes the CLI's login flow, waits for the live file to change, then
    /// imports the result as a new account.
    pub async fn import_via_login(&self, name: &str, tags: &[String]) -> Result<AccountId, CoreError> {
        let live_auth_path = config::live_auth_path(&self.config)
            .ok_or_else(|| CoreError::InvalidInput("could not determine live auth path".to_string()))?;

        let before_mtime = tokio::fs::metadata(&live_auth_path)
            .await
            .and_then(|m| m.modified())
            .ok();

        let binary = self.cli.locate().await?;
        self.cli.login(&binary, Duration::from_secs(60)).await?;

        self.wait_for_live_file_change(&live_auth_path, before_mtime, Duration::from_secs(60))
            .await?;

        self.import_from_file(&live_auth_path, name, tags).await
    }

    async fn wait_for_live_file_change(
        &self,
        path: &std::path::Path,
        before_mtime: Option<std::time::SystemTime>,
        timeout: Duration,
    ) -> Result<(), CoreError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Ok(metadata) = tokio::fs::metadata(path).await {
                let changed = match (before_mtime, metadata.modified()) {
                    (Some(before), Ok(after)) => after > before,
                    (None, Ok(_)) => true,
                    _ => false,
                };
                if changed {
                    return Ok(());
                }
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(CoreError::LoginFailed(
                    "live auth file did not change within the login window".to_string(),
                ));
            }
            tokio::time::sleep(Duration::from_millis(250)).await;
        }
    }

    pub async fn list_accounts(&self) -> Result<Vec<Account>, CoreError> {
        self.store.list_accounts().await
    }

    pub async fn update_account_meta(
        &self,
        id: AccountId,
        name: &str,
        tags: &[String],
    ) -> Result<(), CoreError> {
        self.store.update_account_meta(id, name, tags).await
    }

    pub async fn delete_account(&self, id: AccountId) -> Result<(), CoreError> {
        self.store.delete_account(id).await
    }

    // -------------------------------------------------------------------
    // Switch
    // -------------------------------------------------------------------

    pub async fn switch_account(
        &self,
        id: AccountId,
        force_restart: bool,
    ) -> Result<HistoryId, CoreError> {
        self.switch.switch(id, force_restart).await
    }

    pub async fn rollback(&self, history_id: HistoryId) -> Result<HistoryId, CoreError> {
        self.switch.rollback(history_id).await
    }

    pub async fn list_history(&self, limit: u32) -> Result<Vec<SwitchHistoryRow>, CoreError> {
        self.store.list_history(limit).await
    }

    // -------------------------------------------------------------------
    // Quota
    // -------------------------------------------------------------------

    /// Refreshes one account's quota, or every account if `id` is absent.
    pub async fn refresh_quota(
        &self,
        id: Option<AccountId>,
        force: bool,
    ) -> Result<Vec<QuotaSnapshotRow>, CoreError> {
        match id {
            Some(account_id) => Ok(vec![self.quota.refresh(account_id, force).await?]),
            None => self.quota.dashboard().await,
        }
    }

    pub async fn quota_dashboard(&self) -> Result<Vec<QuotaSnapshotRow>, CoreError> {
        self.quota.dashboard().await
    }

    pub async fn list_snapshots(
        &self,
        id: AccountId,
        limit: u32,
    ) -> Result<Vec<QuotaSnapshotRow>, CoreError> {
        self.quota.history(id, limit).await
    }

    /// Overrides how long a quota snapshot is considered fresh before the
    /// next `refresh_quota` re-probes the account.
    pub async fn set_refresh_policy(&self, cache_ttl: Duration) {
        self.quota.set_cache_ttl(cache_ttl).await;
    }

    // -------------------------------------------------------------------
    // Diagnostics
    // -------------------------------------------------------------------

    pub async fn get_runtime_diagnostics(&self) -> Result<RuntimeDiagnostics, CoreError> {
        let live_auth_path = config::live_auth_path(&self.config);
        let live_auth_file_exists = match &live_auth_path {
            Some(path) => tokio::fs::try_exists(path).await.unwrap_or(false),
            None => false,
        };

        let detected_cli_process_count = match self.cli.locate().await {
            Ok(binary) => self.cli.enumerate_processes(&binary).len(),
            Err(_) => 0,
        };

        Ok(RuntimeDiagnostics {
            app_data_dir: self.config.paths.app_data_dir.clone(),
            database_path: self.config.paths.app_data_dir.join("codex-switch.db"),
            live_auth_path,
            live_auth_file_exists,
            schema_version: crate::core::store::SCHEMA_VERSION,
            detected_cli_process_count,
        })
    }

    pub async fn get_cli_status(&self) -> Result<CliStatus, CoreError> {
        let (running, process_count) = match self.cli.locate().await {
            Ok(binary) => {
                let count = self.cli.enumerate_processes(&binary).len();
                (count > 0, count)
            }
            Err(_) => (false, 0),
        };

        Ok(CliStatus {
            running,
            process_count,
            checked_at: chrono::Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn context() -> (AppContext, TempDir) {
        let temp = TempDir::new().unwrap();
        let mut config = RuntimeConfig::default();
        config.paths.app_data_dir = temp.path().to_path_buf();
        config.paths.live_auth_path = Some(temp.path().join("auth.json"));
        config.normalize();

        (AppContext::new(config).await.unwrap(), temp)
    }

    #[tokio::test]
    async fn starts_with_an_uninitialized_vault() {
        let (ctx, _temp) = context().await;
        assert_eq!(ctx.vault_status().await, VaultStatus::Uninitialized);
    }

    #[tokio::test]
    async fn init_then_import_from_file_round_trips() {
        let (ctx, temp) = context().await;
        ctx.init_vault("hunter22!").await.unwrap();

        let import_path = temp.path().join("import.json");
        tokio::fs::write(&import_path, br#"{"tokens":{"access_token":"xyz"}}"#)
            .await
            .unwrap();

        let account_id = ctx.import_from_file(&import_path, "", &[]).await.unwrap();
        let accounts = ctx.list_accounts().await.unwrap();
        assert_eq!(accounts.len(), 1);
        assert_eq!(accounts[0].id, account_id);
        assert!(accounts[0].name.starts_with("Account-"));
    }

    #[tokio::test]
    async fn switch_then_rollback_restores_live_file() {
        let (ctx, temp) = context().await;
        ctx.init_vault("hunter22!").await.unwrap();

        let a_path = temp.path().join("a.json");
        let b_path = temp.path().join("b.json");
        tokio::fs::write(&a_path, br#"{"tokens":{"access_token":"a"}}"#)
            .await
            .unwrap();
        tokio::fs::write(&b_path, br#"{"tokens":{"access_token":"b"}}"#)
            .await
            .unwrap();

        let a = ctx.import_from_file(&a_path, "a", &[]).await.unwrap();
        let b = ctx.import_from_file(&b_path, "b", &[]).await.unwrap();

        ctx.switch_account(a, false).await.unwrap();
        let second = ctx.switch_account(b, false).await.unwrap();

        let live = tokio::fs::read(temp.path().join("auth.json")).await.unwrap();
        assert_eq!(live, br#"{"tokens":{"access_token":"b"}}"#);

        ctx.rollback(second).await.unwrap();
        let live = tokio::fs::read(temp.path().join("auth.json")).await.unwrap();
        assert_eq!(live, br#"{"tokens":{"access_token":"a"}}"#);
    }

    #[tokio::test]
    async fn diagnostics_reports_schema_version_and_paths() {
        let (ctx, _temp) = context().await;
        let diagnostics = ctx.get_runtime_diagnostics().await.unwrap();
        assert_eq!(diagnostics.schema_version, crate::core::store::SCHEMA_VERSION);
        assert!(!diagnostics.live_auth_file_exists);
    }
}
