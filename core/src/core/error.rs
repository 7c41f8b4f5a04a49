//! codex-switch Error Definitions
//!
//! Defines the closed error taxonomy used throughout the core engine.

use thiserror::Error;

/// Core engine error types
#[derive(Error, Debug)]
pub enum CoreError {
    // =========================================================================
    // Vault errors
    // =========================================================================
    #[error("vault is locked")]
    VaultLocked,

    #[error("incorrect master password")]
    BadPassword,

    #[error("too many unlock attempts, retry after {retry_after_secs}s")]
    Throttled { retry_after_secs: u64 },

    #[error("cryptographic operation failed: {0}")]
    CryptoFailed(String),

    // =========================================================================
    // Lookup errors
    // =========================================================================
    #[error("not found: {0}")]
    NotFound(String),

    // =========================================================================
    // CLI adapter errors
    // =========================================================================
    #[error("codex CLI binary not found (probed: {probed:?})")]
    CliNotFound { probed: Vec<String> },

    #[error("login failed: {0}")]
    LoginFailed(String),

    // =========================================================================
    // Switch engine errors
    // =========================================================================
    #[error("switch failed: {0}")]
    SwitchFailed(String),

    #[error("no snapshot available to roll back to")]
    NoSnapshot,

    // =========================================================================
    // Quota prober errors
    // =========================================================================
    #[error("quota probe failed: {0}")]
    ProbeFailed(String),

    // =========================================================================
    // Persistence errors
    // =========================================================================
    #[error("store error: {0}")]
    StoreError(String),

    // =========================================================================
    // General errors
    // =========================================================================
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Core engine result type
pub type CoreResult<T> = Result<T, CoreError>;

impl CoreError {
    /// Convert to a stable, user-facing message suitable for crossing the
    /// command facade boundary. Never includes secret material.
    pub fn to_facade_error(&self) -> String {
        self.to_string()
    }
}
