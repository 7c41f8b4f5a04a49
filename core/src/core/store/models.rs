//! Row types for the persistent store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::{AccountId, HistoryId, QuotaMode, QuotaSnapshotId, QuotaState, SwitchResult};

/// A registered credential.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Account {
    pub id: AccountId,
    pub name: String,
    pub tags: Vec<String>,
    /// Opaque ciphertext produced by the vault; never decrypted here.
    #[serde(skip_serializing, default)]
    pub auth_ciphertext: Vec<u8>,
    pub auth_fingerprint: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
}

/// A single switch or rollback event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SwitchHistoryRow {
    pub id: HistoryId,
    pub from_account_id: Option<AccountId>,
    /// Null for a rollback that restores a live file which did not
    /// correspond to any known account.
    pub to_account_id: Option<AccountId>,
    pub snapshot_path: Option<String>,
    pub result: SwitchResult,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A single quota probe result.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QuotaSnapshotRow {
    pub id: QuotaSnapshotId,
    pub account_id: AccountId,
    pub created_at: DateTime<Utc>,
    pub mode: QuotaMode,
    pub remaining_value: Option<f64>,
    pub remaining_unit: Option<String>,
    pub quota_state: QuotaState,
    pub reset_at: Option<DateTime<Utc>>,
    pub source: String,
    pub confidence: i64,
    pub reason: Option<String>,
}

/// The single vault metadata row.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VaultMetaRow {
    pub kdf_salt: Vec<u8>,
    pub kdf_mem_kib: u32,
    pub kdf_iters: u32,
    pub kdf_parallel: u32,
    pub verifier_ciphertext: Vec<u8>,
    pub created_at: DateTime<Utc>,
}
