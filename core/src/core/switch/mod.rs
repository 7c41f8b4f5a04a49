//! Switch engine: atomic live auth file replacement, snapshot-based
//! history, and rollback.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use rand::RngCore;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::core::cli_adapter::CliAdapter;
use crate::core::store::Store;
use crate::core::vault::VaultManager;
use crate::core::{AccountId, CoreError, HistoryId, SwitchResult};

/// Atomically replaces the live auth file, maintains a snapshot history, and
/// supports rollback. All filesystem mutations are serialized by a
/// process-wide mutex so concurrent switches observe a total order.
pub struct SwitchEngine {
    store: std::sync::Arc<Store>,
    vault: std::sync::Arc<VaultManager>,
    cli: std::sync::Arc<CliAdapter>,
    live_auth_path: PathBuf,
    snapshot_dir: PathBuf,
    kill_grace: Duration,
    write_lock: Mutex<()>,
}

impl SwitchEngine {
    pub fn new(
        store: std::sync::Arc<Store>,
        vault: std::sync::Arc<VaultManager>,
        cli: std::sync::Arc<CliAdapter>,
        live_auth_path: PathBuf,
        app_data_dir: PathBuf,
        kill_grace: Duration,
    ) -> Self {
        Self {
            store,
            vault,
            cli,
            live_auth_path,
            snapshot_dir: app_data_dir.join("snapshots"),
            kill_grace,
            write_lock: Mutex::new(()),
        }
    }

    /// Switches the live auth file to `account_id`'s credential.
    pub async fn switch(
        &self,
        account_id: AccountId,
        force_restart: bool,
    ) -> Result<HistoryId, CoreError> {
        let _guard = self.write_lock.lock().await;

        let account = self.store.get_account(account_id).await?;
        let plaintext = self.vault.unwrap_blob(&account.auth_ciphertext).await?;

        let from_account_id = self.resolve_current_account(&account_id).await;

        let snapshot_path = match self.snapshot_live_file().await {
            Ok(path) => path,
            Err(e) => {
                self.store
                    .insert_history(
                        from_account_id,
                        Some(account_id),
                        None,
                        SwitchResult::Failed,
                        Some(&e.to_string()),
                    )
                    .await?;
                return Err(e);
            }
        };

        if let Err(e) = atomic_replace(&self.live_auth_path, &plaintext).await {
            error!(error = %e, "switch failed during atomic replace");
            self.store
                .insert_history(
                    from_account_id,
                    Some(account_id),
                    snapshot_path.as_deref(),
                    SwitchResult::Failed,
                    Some(&e.to_string()),
                )
                .await?;
            return Err(CoreError::SwitchFailed(e.to_string()));
        }

        if force_restart {
            if let Ok(binary) = self.cli.locate().await {
                let pids = self.cli.enumerate_processes(&binary);
                if !pids.is_empty() {
                    self.cli.terminate_processes(&pids, self.kill_grace).await?;
                }
            } else {
                warn!("force_restart requested but CLI binary could not be located");
            }
        }

        self.store.touch_last_used(account_id).await?;

        let history_id = self
            .store
            .insert_history(
                from_account_id,
                Some(account_id),
                snapshot_path.as_deref(),
                SwitchResult::Success,
                None,
            )
            .await?;

        info!(%account_id, "switched active account");
        Ok(history_id)
    }

    /// Restores the live auth file from the snapshot taken before the
    /// switch recorded as `history_id`.
    pub async fn rollback(&self, history_id: HistoryId) -> Result<HistoryId, CoreError> {
        let _guard = self.write_lock.lock().await;

        let row = self.store.get_history(history_id).await?;
        let snapshot_path = row.snapshot_path.ok_or(CoreError::NoSnapshot)?;

        let bytes = tokio::fs::read(&snapshot_path)
            .await
            .map_err(|e| CoreError::SwitchFailed(format!("failed to read snapshot: {e}")))?;

        atomic_replace(&self.live_auth_path, &bytes)
            .await
            .map_err(|e| CoreError::SwitchFailed(e.to_string()))?;

        let new_id = self
            .store
            .insert_history(
                row.to_account_id,
                row.from_account_id,
                Some(&snapshot_path),
                SwitchResult::RolledBack,
                None,
            )
            .await?;

        info!(%history_id, "rolled back to previous snapshot");
        Ok(new_id)
    }

    /// Best-effort lookup of the account that currently owns the live file's
    /// content, used to populate `from_account_id` on the new history row.
    async fn resolve_current_account(&self, excluding: &AccountId) -> Option<AccountId> {
        let last = self.store.list_history(1).await.ok()?;
        let row = last.into_iter().next()?;
        let candidate = row.to_account_id?;
        if candidate == *excluding {
            None
        } else {
            Some(candidate)
        }
    }

    async fn snapshot_live_file(&self) -> Result<Option<String>, CoreError> {
        if !self.live_auth_path.exists() {
            return Ok(None);
        }

        tokio::fs::create_dir_all(&self.snapshot_dir)
            .await
            .map_err(|e| CoreError::SwitchFailed(format!("failed to create snapshot dir: {e}")))?;

        let mut suffix = [0u8; 3];
        rand::rngs::OsRng.fill_bytes(&mut suffix);
        let name = format!(
            "{}-{}.json",
            Utc::now().format("%Y%m%dT%H%M%S%.3fZ"),
            hex_encode(&suffix)
        );
        let path = self.snapshot_dir.join(name);

        tokio::fs::copy(&self.live_auth_path, &path)
            .await
            .map_err(|e| CoreError::SwitchFailed(format!("failed to snapshot live file: {e}")))?;

        Ok(Some(path.to_string_lossy().into_owned()))
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        s.push_str(&format!("{b:02x}"));
    }
    s
}

/// Writes `content` to a temp file beside `target`, fsyncs it, then renames
/// it over `target`. The target is left untouched on any failure before the
/// rename.
async fn atomic_replace(target: &Path, content: &[u8]) -> Result<(), std::io::Error> {
    let parent = target.parent().unwrap_or_else(|| Path::new("."));
    tokio::fs::create_dir_all(parent).await?;

    let temp_path = parent.join(format!(".{}.tmp", uuid::Uuid::new_v4()));

    {
        let mut file = tokio::fs::File::create(&temp_path).await?;
        use tokio::io::AsyncWriteExt;
        file.write_all(content).await?;
        file.sync_all().await?;
    }

    tokio::fs::rename(&temp_path, target).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::crypto::KdfParams;
    use tempfile::TempDir;

    async fn engine_with_account(
        temp: &TempDir,
    ) -> (SwitchEngine, std::sync::Arc<VaultManager>, std::sync::Arc<Store>) {
        let store = std::sync::Arc::new(Store::in_memory().unwrap());
        let vault = std::sync::Arc::new(VaultManager::new(store.clone()).await.unwrap());
        vault.init("hunter22!", KdfParams::default()).await.unwrap();
        let cli = std::sync::Arc::new(CliAdapter::new());

        let engine = SwitchEngine::new(
            store.clone(),
            vault.clone(),
            cli,
            temp.path().join("auth.json"),
            temp.path().to_path_buf(),
            Duration::from_millis(10),
        );

        (engine, vault, store)
    }

    async fn import(
        vault: &VaultManager,
        store: &Store,
        name: &str,
        plaintext: &[u8],
    ) -> AccountId {
        let ciphertext = vault.wrap(plaintext).await.unwrap();
        let fingerprint = crate::core::crypto::fingerprint(plaintext).unwrap();
        store
            .insert_account(name, &[], &ciphertext, &fingerprint)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn switch_writes_live_file_and_history() {
        let temp = TempDir::new().unwrap();
        let (engine, vault, store) = engine_with_account(&temp).await;
        let a = import(&vault, &store, "a", br#"{"tokens":{"access_token":"a"}}"#).await;

        let history_id = engine.switch(a, false).await.unwrap();

        let content = tokio::fs::read(temp.path().join("auth.json")).await.unwrap();
        assert_eq!(content, br#"{"tokens":{"access_token":"a"}}"#);

        let row = store.get_history(history_id).await.unwrap();
        assert_eq!(row.result, SwitchResult::Success);
        assert_eq!(row.to_account_id, Some(a));
        assert!(row.snapshot_path.is_none());
    }

    #[tokio::test]
    async fn second_switch_snapshots_previous_content() {
        let temp = TempDir::new().unwrap();
        let (engine, vault, store) = engine_with_account(&temp).await;
        let a = import(&vault, &store, "a", br#"{"tokens":{"access_token":"a"}}"#).await;
        let b = import(&vault, &store, "b", br#"{"tokens":{"access_token":"b"}}"#).await;

        engine.switch(a, false).await.unwrap();
        let second = engine.switch(b, false).await.unwrap();

        let row = store.get_history(second).await.unwrap();
        assert!(row.snapshot_path.is_some());

        let snapshot_content = tokio::fs::read(row.snapshot_path.unwrap()).await.unwrap();
        assert_eq!(snapshot_content, br#"{"tokens":{"access_token":"a"}}"#);
    }

    #[tokio::test]
    async fn rollback_restores_previous_content() {
        let temp = TempDir::new().unwrap();
        let (engine, vault, store) = engine_with_account(&temp).await;
        let a = import(&vault, &store, "a", br#"{"tokens":{"access_token":"a"}}"#).await;
        let b = import(&vault, &store, "b", br#"{"tokens":{"access_token":"b"}}"#).await;

        engine.switch(a, false).await.unwrap();
        let second = engine.switch(b, false).await.unwrap();

        let rollback_id = engine.rollback(second).await.unwrap();

        let content = tokio::fs::read(temp.path().join("auth.json")).await.unwrap();
        assert_eq!(content, br#"{"tokens":{"access_token":"a"}}"#);

        let row = store.get_history(rollback_id).await.unwrap();
        assert_eq!(row.result, SwitchResult::RolledBack);
        assert_eq!(row.to_account_id, Some(a));
    }

    #[tokio::test]
    async fn rollback_without_snapshot_fails() {
        let temp = TempDir::new().unwrap();
        let (engine, vault, store) = engine_with_account(&temp).await;
        let a = import(&vault, &store, "a", br#"{"tokens":{"access_token":"a"}}"#).await;

        let history_id = engine.switch(a, false).await.unwrap();
        assert!(matches!(
            engine.rollback(history_id).await,
            Err(CoreError::NoSnapshot)
        ));
    }

    #[tokio::test]
    async fn switch_fails_when_vault_is_locked() {
        let temp = TempDir::new().unwrap();
        let (engine, vault, store) = engine_with_account(&temp).await;
        let a = import(&vault, &store, "a", br#"{"tokens":{"access_token":"a"}}"#).await;

        vault.lock().await.unwrap();

        assert!(matches!(
            engine.switch(a, false).await,
            Err(CoreError::VaultLocked)
        ));
    }
}
