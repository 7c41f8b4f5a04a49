//! Vault session state machine.
//!
//! `Uninitialized -> (init) -> Locked -> (unlock) -> Unlocked -> (lock) -> Locked`.
//! The derived key lives only in memory for the lifetime of an unlocked
//! session and is zeroized whenever the vault transitions back to `Locked`.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::core::crypto::{self, DerivedKey, KdfParams, AAD_AUTH, AAD_VERIFIER};
use crate::core::store::models::VaultMetaRow;
use crate::core::store::Store;
use crate::core::CoreError;

/// Known plaintext encrypted under the derived key to validate a password
/// without ever decrypting real credential material.
const VERIFIER_PLAINTEXT: &[u8] = b"codex-switch-vault-verifier-v1";

/// Minimum acceptable master password length.
const MIN_PASSWORD_LEN: usize = 8;

/// Maximum failed unlock attempts allowed per rolling minute.
const MAX_ATTEMPTS_PER_MINUTE: usize = 5;

/// Externally observable vault lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VaultStatus {
    Uninitialized,
    Locked,
    Unlocked,
}

enum Session {
    Uninitialized,
    Locked,
    Unlocked(DerivedKey),
}

/// Guards access to the derived vault key and its lifecycle.
pub struct VaultManager {
    store: Arc<Store>,
    session: RwLock<Session>,
    attempts: RwLock<Vec<Instant>>,
}

impl VaultManager {
    /// Builds a manager backed by `store`, determining initial state by
    /// whether vault metadata already exists.
    pub async fn new(store: Arc<Store>) -> Result<Self, CoreError> {
        let session = if store.get_vault_meta().await?.is_some() {
            Session::Locked
        } else {
            Session::Uninitialized
        };

        Ok(Self {
            store,
            session: RwLock::new(session),
            attempts: RwLock::new(Vec::new()),
        })
    }

    /// Returns the current lifecycle state.
    pub async fn status(&self) -> VaultStatus {
        match *self.session.read().await {
            Session::Uninitialized => VaultStatus::Uninitialized,
            Session::Locked => VaultStatus::Locked,
            Session::Unlocked(_) => VaultStatus::Unlocked,
        }
    }

    /// Initializes a brand-new vault with `password`, transitioning directly
    /// to `Unlocked`.
    pub async fn init(&self, password: &str, params: KdfParams) -> Result<(), CoreError> {
        if password.len() < MIN_PASSWORD_LEN {
            return Err(CoreError::InvalidInput(format!(
                "master password must be at least {MIN_PASSWORD_LEN} characters"
            )));
        }

        let mut session = self.session.write().await;
        if !matches!(*session, Session::Uninitialized) {
            return Err(CoreError::InvalidInput(
                "vault is already initialized".to_string(),
            ));
        }

        let salt = crypto::generate_salt();
        let key = crypto::derive_key(password, &salt, params)?;
        let verifier_ciphertext = crypto::encrypt(&key, AAD_VERIFIER, VERIFIER_PLAINTEXT)?;

        self.store
            .insert_vault_meta(&VaultMetaRow {
                kdf_salt: salt.to_vec(),
                kdf_mem_kib: params.mem_kib,
                kdf_iters: params.iters,
                kdf_parallel: params.parallel,
                verifier_ciphertext,
                created_at: chrono::Utc::now(),
            })
            .await?;

        *session = Session::Unlocked(key);
        info!("vault initialized");
        Ok(())
    }

    /// Attempts to unlock the vault with `password`.
    pub async fn unlock(&self, password: &str) -> Result<(), CoreError> {
        if let Some(retry_after_secs) = self.rate_limited().await {
            warn!(retry_after_secs, "unlock attempt throttled");
            return Err(CoreError::Throttled { retry_after_secs });
        }

        let mut session = self.session.write().await;
        if !matches!(*session, Session::Locked) {
            return Err(CoreError::InvalidInput(
                "vault must be locked to unlock".to_string(),
            ));
        }

        let meta = self
            .store
            .get_vault_meta()
            .await?
            .ok_or_else(|| CoreError::StoreError("vault metadata missing".to_string()))?;

        let params = KdfParams {
            mem_kib: meta.kdf_mem_kib,
            iters: meta.kdf_iters,
            parallel: meta.kdf_parallel,
        };
        let key = crypto::derive_key(password, &meta.kdf_salt, params)?;

        match crypto::decrypt(&key, AAD_VERIFIER, &meta.verifier_ciphertext) {
            Ok(plaintext) if plaintext == VERIFIER_PLAINTEXT => {
                *session = Session::Unlocked(key);
                self.attempts.write().await.clear();
                info!("vault unlocked");
                Ok(())
            }
            _ => {
                self.record_attempt().await;
                warn!("unlock attempt failed: bad password");
                Err(CoreError::BadPassword)
            }
        }
    }

    /// Locks the vault, zeroizing the in-memory key.
    pub async fn lock(&self) -> Result<(), CoreError> {
        let mut session = self.session.write().await;
        if matches!(*session, Session::Uninitialized) {
            return Err(CoreError::InvalidInput(
                "vault has not been initialized".to_string(),
            ));
        }
        *session = Session::Locked;
        info!("vault locked");
        Ok(())
    }

    /// Encrypts `plaintext` under the active session key.
    pub async fn wrap(&self, plaintext: &[u8]) -> Result<Vec<u8>, CoreError> {
        match &*self.session.read().await {
            Session::Unlocked(key) => crypto::encrypt(key, AAD_AUTH, plaintext),
            _ => Err(CoreError::VaultLocked),
        }
    }

    /// Decrypts `ciphertext` under the active session key.
    pub async fn unwrap_blob(&self, ciphertext: &[u8]) -> Result<Vec<u8>, CoreError> {
        match &*self.session.read().await {
            Session::Unlocked(key) => crypto::decrypt(key, AAD_AUTH, ciphertext),
            _ => Err(CoreError::VaultLocked),
        }
    }

    async fn rate_limited(&self) -> Option<u64> {
        let attempts = self.attempts.read().await;
        let window_start = Instant::now() - Duration::from_secs(60);
        let recent = attempts.iter().filter(|t| **t >= window_start).count();
        if recent >= MAX_ATTEMPTS_PER_MINUTE {
            Some(60)
        } else {
            None
        }
    }

    async fn record_attempt(&self) {
        let mut attempts = self.attempts.write().await;
        let window_start = Instant::now() - Duration::from_secs(60);
        attempts.retain(|t| *t >= window_start);
        attempts.push(Instant::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn manager() -> VaultManager {
        let store = Arc::new(Store::in_memory().unwrap());
        VaultManager::new(store).await.unwrap()
    }

    #[tokio::test]
    async fn starts_uninitialized() {
        let vault = manager().await;
        assert_eq!(vault.status().await, VaultStatus::Uninitialized);
    }

    #[tokio::test]
    async fn init_transitions_to_unlocked() {
        let vault = manager().await;
        vault.init("hunter22!", KdfParams::default()).await.unwrap();
        assert_eq!(vault.status().await, VaultStatus::Unlocked);
    }

    #[tokio::test]
    async fn init_rejects_short_password() {
        let vault = manager().await;
        assert!(matches!(
            vault.init("short", KdfParams::default()).await,
            Err(CoreError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn wrap_unwrap_round_trips_after_unlock() {
        let vault = manager().await;
        vault.init("hunter22!", KdfParams::default()).await.unwrap();

        let ciphertext = vault.wrap(b"super secret").await.unwrap();
        let plaintext = vault.unwrap_blob(&ciphertext).await.unwrap();
        assert_eq!(plaintext, b"super secret");
    }

    #[tokio::test]
    async fn lock_then_unlock_with_correct_password_succeeds() {
        let vault = manager().await;
        vault.init("hunter22!", KdfParams::default()).await.unwrap();
        vault.lock().await.unwrap();
        assert_eq!(vault.status().await, VaultStatus::Locked);

        vault.unlock("hunter22!").await.unwrap();
        assert_eq!(vault.status().await, VaultStatus::Unlocked);
    }

    #[tokio::test]
    async fn unlock_with_wrong_password_fails() {
        let vault = manager().await;
        vault.init("hunter22!", KdfParams::default()).await.unwrap();
        vault.lock().await.unwrap();

        assert!(matches!(
            vault.unlock("wrong-password").await,
            Err(CoreError::BadPassword)
        ));
        assert_eq!(vault.status().await, VaultStatus::Locked);
    }

    #[tokio::test]
    async fn lock_zeroizes_key_so_wrap_fails() {
        let vault = manager().await;
        vault.init("hunter22!", KdfParams::default()).await.unwrap();
        vault.lock().await.unwrap();

        assert!(matches!(
            vault.wrap(b"data").await,
            Err(CoreError::VaultLocked)
        ));
    }

    #[tokio::test]
    async fn repeated_bad_passwords_trigger_throttling() {
        let vault = manager().await;
        vault.init("hunter22!", KdfParams::default()).await.unwrap();
        vault.lock().await.unwrap();

        for _ in 0..5 {
            assert!(matches!(
                vault.unlock("wrong").await,
                Err(CoreError::BadPassword)
            ));
        }

        assert!(matches!(
            vault.unlock("wrong-again").await,
            Err(CoreError::Throttled { .. })
        ));
    }
}
