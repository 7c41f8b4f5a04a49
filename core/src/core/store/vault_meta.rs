//! Vault metadata: the single row describing KDF parameters and verifier.

use chrono::Utc;
use rusqlite::{params, OptionalExtension};

use super::models::VaultMetaRow;
use super::Store;
use crate::core::CoreError;

impl Store {
    /// Inserts the vault metadata row. Fails if one already exists.
    pub async fn insert_vault_meta(&self, meta: &VaultMetaRow) -> Result<(), CoreError> {
        let conn = self.lock().await;
        conn.execute(
            "INSERT INTO vault_meta (id, kdf_salt, kdf_mem_kib, kdf_iters, kdf_parallel, verifier_ciphertext, created_at)
             VALUES (1, ?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                meta.kdf_salt,
                meta.kdf_mem_kib,
                meta.kdf_iters,
                meta.kdf_parallel,
                meta.verifier_ciphertext,
                meta.created_at.to_rfc3339(),
            ],
        )
        .map_err(|e| CoreError::StoreError(format!("failed to insert vault metadata: {e}")))?;
        Ok(())
    }

    /// Fetches the vault metadata row, if the vault has been initialized.
    pub async fn get_vault_meta(&self) -> Result<Option<VaultMetaRow>, CoreError> {
        let conn = self.lock().await;
        conn.query_row(
            "SELECT kdf_salt, kdf_mem_kib, kdf_iters, kdf_parallel, verifier_ciphertext, created_at
             FROM vault_meta WHERE id = 1",
            [],
            |row| {
                let created_at: String = row.get(5)?;
                Ok(VaultMetaRow {
                    kdf_salt: row.get(0)?,
                    kdf_mem_kib: row.get(1)?,
                    kdf_iters: row.get(2)?,
                    kdf_parallel: row.get(3)?,
                    verifier_ciphertext: row.get(4)?,
                    created_at: created_at.parse().unwrap_or_else(|_| Utc::now()),
                })
            },
        )
        .optional()
        .map_err(|e| CoreError::StoreError(format!("failed to query vault metadata: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::super::Store;
    use super::VaultMetaRow;
    use chrono::Utc;

    fn sample() -> VaultMetaRow {
        VaultMetaRow {
            kdf_salt: vec![1, 2, 3, 4],
            kdf_mem_kib: 65536,
            kdf_iters: 3,
            kdf_parallel: 1,
            verifier_ciphertext: vec![9, 9, 9],
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn insert_then_get_round_trips() {
        let store = Store::in_memory().unwrap();
        assert!(store.get_vault_meta().await.unwrap().is_none());

        store.insert_vault_meta(&sample()).await.unwrap();

        let meta = store.get_vault_meta().await.unwrap().unwrap();
        assert_eq!(meta.kdf_salt, vec![1, 2, 3, 4]);
        assert_eq!(meta.kdf_mem_kib, 65536);
    }

    #[tokio::test]
    async fn second_insert_fails() {
        let store = Store::in_memory().unwrap();
        store.insert_vault_meta(&sample()).await.unwrap();
        assert!(store.insert_vault_meta(&sample()).await.is_err());
    }
}
