//! Account CRUD operations.

use chrono::Utc;
use rusqlite::{params, OptionalExtension};
use uuid::Uuid;

use super::models::Account;
use super::Store;
use crate::core::{AccountId, CoreError};

impl Store {
    /// Inserts a new account and returns its generated id.
    pub async fn insert_account(
        &self,
        name: &str,
        tags: &[String],
        auth_ciphertext: &[u8],
        auth_fingerprint: &str,
    ) -> Result<AccountId, CoreError> {
        let conn = self.lock().await;
        let id = Uuid::new_v4();
        let now = Utc::now();
        let tags_json = serde_json::to_string(tags)?;

        conn.execute(
            "INSERT INTO accounts (id, name, tags, auth_ciphertext, auth_fingerprint, created_at, updated_at, last_used_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, NULL)",
            params![
                id.to_string(),
                name,
                tags_json,
                auth_ciphertext,
                auth_fingerprint,
                now.to_rfc3339(),
                now.to_rfc3339(),
            ],
        )
        .map_err(|e| CoreError::StoreError(format!("failed to insert account: {e}")))?;

        Ok(id)
    }

    /// Fetches a single account by id.
    pub async fn get_account(&self, id: AccountId) -> Result<Account, CoreError> {
        let conn = self.lock().await;
        row_to_account(
            conn.query_row(
                "SELECT id, name, tags, auth_ciphertext, auth_fingerprint, created_at, updated_at, last_used_at
                 FROM accounts WHERE id = ?1",
                params![id.to_string()],
                account_row_mapper,
            )
            .optional()
            .map_err(|e| CoreError::StoreError(format!("failed to query account: {e}")))?,
        )
        .ok_or_else(|| CoreError::NotFound(format!("account {id}")))
    }

    /// Lists every account, ordered by name.
    pub async fn list_accounts(&self) -> Result<Vec<Account>, CoreError> {
        let conn = self.lock().await;
        let mut stmt = conn
            .prepare(
                "SELECT id, name, tags, auth_ciphertext, auth_fingerprint, created_at, updated_at, last_used_at
                 FROM accounts ORDER BY name ASC",
            )
            .map_err(|e| CoreError::StoreError(format!("failed to prepare query: {e}")))?;

        let rows = stmt
            .query_map([], account_row_mapper)
            .map_err(|e| CoreError::StoreError(format!("failed to query accounts: {e}")))?;

        let mut accounts = Vec::new();
        for row in rows {
            let raw = row.map_err(|e| CoreError::StoreError(format!("failed to read row: {e}")))?;
            let account = row_to_account(Some(raw))
                .ok_or_else(|| CoreError::StoreError("failed to parse account row".to_string()))?;
            accounts.push(account);
        }
        Ok(accounts)
    }

    /// Updates an account's name and tags.
    pub async fn update_account_meta(
        &self,
        id: AccountId,
        name: &str,
        tags: &[String],
    ) -> Result<(), CoreError> {
        let conn = self.lock().await;
        let tags_json = serde_json::to_string(tags)?;
        let changed = conn
            .execute(
                "UPDATE accounts SET name = ?1, tags = ?2, updated_at = ?3 WHERE id = ?4",
                params![name, tags_json, Utc::now().to_rfc3339(), id.to_string()],
            )
            .map_err(|e| CoreError::StoreError(format!("failed to update account: {e}")))?;

        if changed == 0 {
            return Err(CoreError::NotFound(format!("account {id}")));
        }
        Ok(())
    }

    /// Marks an account as just used.
    pub async fn touch_last_used(&self, id: AccountId) -> Result<(), CoreError> {
        let conn = self.lock().await;
        conn.execute(
            "UPDATE accounts SET last_used_at = ?1 WHERE id = ?2",
            params![Utc::now().to_rfc3339(), id.to_string()],
        )
        .map_err(|e| CoreError::StoreError(format!("failed to touch account: {e}")))?;
        Ok(())
    }

    /// Deletes an account. Fails if it is still referenced by
    /// `switch_history.to_account_id` (restrict on delete).
    pub async fn delete_account(&self, id: AccountId) -> Result<(), CoreError> {
        let conn = self.lock().await;
        let changed = conn
            .execute("DELETE FROM accounts WHERE id = ?1", params![id.to_string()])
            .map_err(|e| CoreError::StoreError(format!("failed to delete account: {e}")))?;

        if changed == 0 {
            return Err(CoreError::NotFound(format!("account {id}")));
        }
        Ok(())
    }
}

fn account_row_mapper(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawAccountRow> {
    Ok(RawAccountRow {
        id: row.get(0)?,
        name: row.get(1)?,
        tags: row.get(2)?,
        auth_ciphertext: row.get(3)?,
        auth_fingerprint: row.get(4)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
        last_used_at: row.get(7)?,
    })
}

struct RawAccountRow {
    id: String,
    name: String,
    tags: String,
    auth_ciphertext: Vec<u8>,
    auth_fingerprint: String,
    created_at: String,
    updated_at: String,
    last_used_at: Option<String>,
}

fn row_to_account(raw: Option<RawAccountRow>) -> Option<Account> {
    raw.and_then(|r| {
        Some(Account {
            id: r.id.parse().ok()?,
            name: r.name,
            tags: serde_json::from_str(&r.tags).ok()?,
            auth_ciphertext: r.auth_ciphertext,
            auth_fingerprint: r.auth_fingerprint,
            created_at: r.created_at.parse().ok()?,
            updated_at: r.updated_at.parse().ok()?,
            last_used_at: r.last_used_at.and_then(|s| s.parse().ok()),
        })
    })
}

#[cfg(test)]
mod tests {
    use super::super::Store;

    #[tokio::test]
    async fn insert_then_get_round_trips() {
        let store = Store::in_memory().unwrap();
        let id = store
            .insert_account("work", &["primary".to_string()], b"ciphertext", "abc123")
            .await
            .unwrap();

        let account = store.get_account(id).await.unwrap();
        assert_eq!(account.name, "work");
        assert_eq!(account.tags, vec!["primary".to_string()]);
        assert_eq!(account.auth_fingerprint, "abc123");
        assert!(account.last_used_at.is_none());
    }

    #[tokio::test]
    async fn list_accounts_orders_by_name() {
        let store = Store::in_memory().unwrap();
        store.insert_account("zeta", &[], b"a", "fp1").await.unwrap();
        store.insert_account("alpha", &[], b"b", "fp2").await.unwrap();

        let accounts = store.list_accounts().await.unwrap();
        assert_eq!(accounts.len(), 2);
        assert_eq!(accounts[0].name, "alpha");
        assert_eq!(accounts[1].name, "zeta");
    }

    #[tokio::test]
    async fn update_meta_changes_name_and_tags() {
        let store = Store::in_memory().unwrap();
        let id = store.insert_account("work", &[], b"a", "fp1").await.unwrap();

        store
            .update_account_meta(id, "renamed", &["tag-a".to_string()])
            .await
            .unwrap();

        let account = store.get_account(id).await.unwrap();
        assert_eq!(account.name, "renamed");
        assert_eq!(account.tags, vec!["tag-a".to_string()]);
    }

    #[tokio::test]
    async fn delete_missing_account_fails_not_found() {
        let store = Store::in_memory().unwrap();
        let bogus = uuid::Uuid::new_v4();
        assert!(store.delete_account(bogus).await.is_err());
    }
}
