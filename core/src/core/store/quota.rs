//! Quota snapshots: append-only probe results, prunable by TTL.

use chrono::Utc;
use rusqlite::params;
use uuid::Uuid;

use super::models::QuotaSnapshotRow;
use super::Store;
use crate::core::{AccountId, CoreError, QuotaMode, QuotaSnapshotId, QuotaState};

/// Fields needed to record a new quota snapshot.
pub struct NewQuotaSnapshot {
    pub account_id: AccountId,
    pub mode: QuotaMode,
    pub remaining_value: Option<f64>,
    pub remaining_unit: Option<String>,
    pub quota_state: QuotaState,
    pub reset_at: Option<chrono::DateTime<Utc>>,
    pub source: String,
    pub confidence: i64,
    pub reason: Option<String>,
}

impl Store {
    /// Inserts a new quota snapshot and returns its id.
    pub async fn insert_quota_snapshot(
        &self,
        snapshot: NewQuotaSnapshot,
    ) -> Result<QuotaSnapshotId, CoreError> {
        let conn = self.lock().await;
        let id = Uuid::new_v4();

        conn.execute(
            "INSERT INTO quota_snapshots
                (id, account_id, created_at, mode, remaining_value, remaining_unit, quota_state, reset_at, source, confidence, reason)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                id.to_string(),
                snapshot.account_id.to_string(),
                Utc::now().to_rfc3339(),
                snapshot.mode.as_str(),
                snapshot.remaining_value,
                snapshot.remaining_unit,
                snapshot.quota_state.as_str(),
                snapshot.reset_at.map(|t| t.to_rfc3339()),
                snapshot.source,
                snapshot.confidence,
                snapshot.reason,
            ],
        )
        .map_err(|e| CoreError::StoreError(format!("failed to insert quota snapshot: {e}")))?;

        Ok(id)
    }

    /// Returns the most recent snapshot for an account, if any.
    pub async fn latest_quota_snapshot(
        &self,
        account_id: AccountId,
    ) -> Result<Option<QuotaSnapshotRow>, CoreError> {
        let conn = self.lock().await;
        let mut stmt = conn
            .prepare(
                "SELECT id, account_id, created_at, mode, remaining_value, remaining_unit, quota_state, reset_at, source, confidence, reason
                 FROM quota_snapshots WHERE account_id = ?1 ORDER BY created_at DESC LIMIT 1",
            )
            .map_err(|e| CoreError::StoreError(format!("failed to prepare query: {e}")))?;

        let mut rows = stmt
            .query_map(params![account_id.to_string()], quota_row_mapper)
            .map_err(|e| CoreError::StoreError(format!("failed to query quota snapshots: {e}")))?;

        match rows.next() {
            Some(row) => Ok(Some(row.map_err(|e| {
                CoreError::StoreError(format!("failed to read row: {e}"))
            })?)),
            None => Ok(None),
        }
    }

    /// Lists the most recent snapshots for an account, newest first.
    pub async fn list_quota_snapshots(
        &self,
        account_id: AccountId,
        limit: u32,
    ) -> Result<Vec<QuotaSnapshotRow>, CoreError> {
        let conn = self.lock().await;
        let mut stmt = conn
            .prepare(
                "SELECT id, account_id, created_at, mode, remaining_value, remaining_unit, quota_state, reset_at, source, confidence, reason
                 FROM quota_snapshots WHERE account_id = ?1 ORDER BY created_at DESC LIMIT ?2",
            )
            .map_err(|e| CoreError::StoreError(format!("failed to prepare query: {e}")))?;

        let rows = stmt
            .query_map(params![account_id.to_string(), limit], quota_row_mapper)
            .map_err(|e| CoreError::StoreError(format!("failed to query quota snapshots: {e}")))?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row.map_err(|e| CoreError::StoreError(format!("failed to read row: {e}")))?);
        }
        Ok(out)
    }
}

fn quota_row_mapper(row: &rusqlite::Row<'_>) -> rusqlite::Result<QuotaSnapshotRow> {
    let id: String = row.get(0)?;
    let account_id: String = row.get(1)?;
    let created_at: String = row.get(2)?;
    let mode: String = row.get(3)?;
    let remaining_value: Option<f64> = row.get(4)?;
    let remaining_unit: Option<String> = row.get(5)?;
    let quota_state: String = row.get(6)?;
    let reset_at: Option<String> = row.get(7)?;
    let source: String = row.get(8)?;
    let confidence: i64 = row.get(9)?;
    let reason: Option<String> = row.get(10)?;

    Ok(QuotaSnapshotRow {
        id: id.parse().unwrap_or_default(),
        account_id: account_id.parse().unwrap_or_default(),
        created_at: created_at.parse().unwrap_or_else(|_| Utc::now()),
        mode: mode.parse().unwrap_or(QuotaMode::Unknown),
        remaining_value,
        remaining_unit,
        quota_state: quota_state.parse().unwrap_or(QuotaState::Unknown),
        reset_at: reset_at.and_then(|s| s.parse().ok()),
        source,
        confidence,
        reason,
    })
}

#[cfg(test)]
mod tests {
    use super::super::Store;
    use super::NewQuotaSnapshot;
    use crate::core::{QuotaMode, QuotaState};

    #[tokio::test]
    async fn insert_then_latest_round_trips() {
        let store = Store::in_memory().unwrap();
        let account = store.insert_account("work", &[], b"a", "fp1").await.unwrap();

        let id = store
            .insert_quota_snapshot(NewQuotaSnapshot {
                account_id: account,
                mode: QuotaMode::Precise,
                remaining_value: Some(42.0),
                remaining_unit: Some("requests".to_string()),
                quota_state: QuotaState::Available,
                reset_at: None,
                source: "primary".to_string(),
                confidence: 90,
                reason: None,
            })
            .await
            .unwrap();

        let latest = store.latest_quota_snapshot(account).await.unwrap().unwrap();
        assert_eq!(latest.id, id);
        assert_eq!(latest.remaining_value, Some(42.0));
        assert_eq!(latest.confidence, 90);
    }

    #[tokio::test]
    async fn latest_is_none_when_no_snapshots_exist() {
        let store = Store::in_memory().unwrap();
        let account = store.insert_account("work", &[], b"a", "fp1").await.unwrap();
        assert!(store.latest_quota_snapshot(account).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn deleting_account_cascades_snapshots() {
        let store = Store::in_memory().unwrap();
        let account = store.insert_account("work", &[], b"a", "fp1").await.unwrap();

        store
            .insert_quota_snapshot(NewQuotaSnapshot {
                account_id: account,
                mode: QuotaMode::Unknown,
                remaining_value: None,
                remaining_unit: None,
                quota_state: QuotaState::Unknown,
                reset_at: None,
                source: "primary".to_string(),
                confidence: 0,
                reason: Some("timeout".to_string()),
            })
            .await
            .unwrap();

        store.delete_account(account).await.unwrap();
        assert!(store
            .list_quota_snapshots(account, 10)
            .await
            .unwrap()
            .is_empty());
    }
}
