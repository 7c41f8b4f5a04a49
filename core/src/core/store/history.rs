//! Switch history: append-only log of switch/rollback outcomes.

use chrono::Utc;
use rusqlite::{params, OptionalExtension};
use uuid::Uuid;

use super::models::SwitchHistoryRow;
use super::Store;
use crate::core::{AccountId, CoreError, HistoryId, SwitchResult};

impl Store {
    /// Appends a new history row and returns its id.
    pub async fn insert_history(
        &self,
        from_account_id: Option<AccountId>,
        to_account_id: Option<AccountId>,
        snapshot_path: Option<&str>,
        result: SwitchResult,
        error_message: Option<&str>,
    ) -> Result<HistoryId, CoreError> {
        let conn = self.lock().await;
        let id = Uuid::new_v4();

        conn.execute(
            "INSERT INTO switch_history (id, from_account_id, to_account_id, snapshot_path, result, error_message, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                id.to_string(),
                from_account_id.map(|a| a.to_string()),
                to_account_id.map(|a| a.to_string()),
                snapshot_path,
                result.as_str(),
                error_message,
                Utc::now().to_rfc3339(),
            ],
        )
        .map_err(|e| CoreError::StoreError(format!("failed to insert history row: {e}")))?;

        Ok(id)
    }

    /// Fetches a single history row by id.
    pub async fn get_history(&self, id: HistoryId) -> Result<SwitchHistoryRow, CoreError> {
        let conn = self.lock().await;
        conn.query_row(
            "SELECT id, from_account_id, to_account_id, snapshot_path, result, error_message, created_at
             FROM switch_history WHERE id = ?1",
            params![id.to_string()],
            history_row_mapper,
        )
        .optional()
        .map_err(|e| CoreError::StoreError(format!("failed to query history: {e}")))?
        .ok_or_else(|| CoreError::NotFound(format!("history row {id}")))
    }

    /// Lists the most recent history rows, newest first.
    pub async fn list_history(&self, limit: u32) -> Result<Vec<SwitchHistoryRow>, CoreError> {
        let conn = self.lock().await;
        let mut stmt = conn
            .prepare(
                "SELECT id, from_account_id, to_account_id, snapshot_path, result, error_message, created_at
                 FROM switch_history ORDER BY created_at DESC LIMIT ?1",
            )
            .map_err(|e| CoreError::StoreError(format!("failed to prepare query: {e}")))?;

        let rows = stmt
            .query_map(params![limit], history_row_mapper)
            .map_err(|e| CoreError::StoreError(format!("failed to query history: {e}")))?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row.map_err(|e| CoreError::StoreError(format!("failed to read row: {e}")))?);
        }
        Ok(out)
    }
}

fn history_row_mapper(row: &rusqlite::Row<'_>) -> rusqlite::Result<SwitchHistoryRow> {
    let id: String = row.get(0)?;
    let from_account_id: Option<String> = row.get(1)?;
    let to_account_id: Option<String> = row.get(2)?;
    let snapshot_path: Option<String> = row.get(3)?;
    let result: String = row.get(4)?;
    let error_message: Option<String> = row.get(5)?;
    let created_at: String = row.get(6)?;

    Ok(SwitchHistoryRow {
        id: id.parse().unwrap_or_default(),
        from_account_id: from_account_id.and_then(|s| s.parse().ok()),
        to_account_id: to_account_id.and_then(|s| s.parse().ok()),
        snapshot_path,
        result: result.parse().unwrap_or(SwitchResult::Failed),
        error_message,
        created_at: created_at.parse().unwrap_or_else(|_| Utc::now()),
    })
}

#[cfg(test)]
mod tests {
    use super::super::Store;
    use crate::core::SwitchResult;

    #[tokio::test]
    async fn insert_then_get_round_trips() {
        let store = Store::in_memory().unwrap();
        let to = store.insert_account("work", &[], b"a", "fp1").await.unwrap();

        let id = store
            .insert_history(None, Some(to), None, SwitchResult::Success, None)
            .await
            .unwrap();

        let row = store.get_history(id).await.unwrap();
        assert_eq!(row.to_account_id, Some(to));
        assert!(row.from_account_id.is_none());
        assert_eq!(row.result, SwitchResult::Success);
    }

    #[tokio::test]
    async fn list_history_orders_newest_first() {
        let store = Store::in_memory().unwrap();
        let a = store.insert_account("a", &[], b"a", "fp1").await.unwrap();
        let b = store.insert_account("b", &[], b"b", "fp2").await.unwrap();

        store
            .insert_history(None, Some(a), None, SwitchResult::Success, None)
            .await
            .unwrap();
        let second = store
            .insert_history(Some(a), Some(b), None, SwitchResult::Success, None)
            .await
            .unwrap();

        let rows = store.list_history(10).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].id, second);
    }

    #[tokio::test]
    async fn history_cannot_reference_missing_account() {
        let store = Store::in_memory().unwrap();
        let bogus = uuid::Uuid::new_v4();
        let result = store
            .insert_history(None, Some(bogus), None, SwitchResult::Success, None)
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn deleting_from_account_sets_null_rather_than_failing() {
        let store = Store::in_memory().unwrap();
        let a = store.insert_account("a", &[], b"a", "fp1").await.unwrap();
        let b = store.insert_account("b", &[], b"b", "fp2").await.unwrap();

        let id = store
            .insert_history(Some(a), Some(b), None, SwitchResult::Success, None)
            .await
            .unwrap();

        store.delete_account(a).await.unwrap();

        let row = store.get_history(id).await.unwrap();
        assert!(row.from_account_id.is_none());
    }

    #[tokio::test]
    async fn deleting_to_account_is_restricted() {
        let store = Store::in_memory().unwrap();
        let b = store.insert_account("b", &[], b"b", "fp2").await.unwrap();

        store
            .insert_history(None, Some(b), None, SwitchResult::Success, None)
            .await
            .unwrap();

        assert!(store.delete_account(b).await.is_err());
    }

    #[tokio::test]
    async fn rollback_row_may_have_null_to_account() {
        let store = Store::in_memory().unwrap();
        let a = store.insert_account("a", &[], b"a", "fp1").await.unwrap();

        let id = store
            .insert_history(Some(a), None, None, SwitchResult::RolledBack, None)
            .await
            .unwrap();

        let row = store.get_history(id).await.unwrap();
        assert!(row.to_account_id.is_none());
        assert_eq!(row.result, SwitchResult::RolledBack);
    }
}
