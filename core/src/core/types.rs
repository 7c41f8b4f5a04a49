//! codex-switch Core Type Definitions
//!
//! Fundamental identifiers and small value types shared across subsystems.

use serde::{Deserialize, Serialize};

// =============================================================================
// ID Types
// =============================================================================

/// Account unique identifier.
pub type AccountId = uuid::Uuid;

/// Switch history row identifier.
pub type HistoryId = uuid::Uuid;

/// Quota snapshot row identifier.
pub type QuotaSnapshotId = uuid::Uuid;

// =============================================================================
// Switch history
// =============================================================================

/// Outcome recorded for a switch or rollback operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SwitchResult {
    Success,
    Failed,
    RolledBack,
}

impl SwitchResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failed => "failed",
            Self::RolledBack => "rolled_back",
        }
    }
}

impl std::str::FromStr for SwitchResult {
    type Err = crate::core::CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(Self::Success),
            "failed" => Ok(Self::Failed),
            "rolled_back" => Ok(Self::RolledBack),
            other => Err(crate::core::CoreError::StoreError(format!(
                "unknown switch result: {other}"
            ))),
        }
    }
}

// =============================================================================
// Quota
// =============================================================================

/// How a quota figure was obtained.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuotaMode {
    /// A numeric remaining-quota value was parsed from the primary endpoint.
    Precise,
    /// Only a coarse availability state could be determined.
    Status,
    /// No usable signal could be obtained.
    Unknown,
}

impl QuotaMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Precise => "precise",
            Self::Status => "status",
            Self::Unknown => "unknown",
        }
    }
}

impl std::str::FromStr for QuotaMode {
    type Err = crate::core::CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "precise" => Ok(Self::Precise),
            "status" => Ok(Self::Status),
            "unknown" => Ok(Self::Unknown),
            other => Err(crate::core::CoreError::StoreError(format!(
                "unknown quota mode: {other}"
            ))),
        }
    }
}

/// Coarse quota availability state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuotaState {
    Available,
    NearLimit,
    Exhausted,
    Unknown,
}

impl QuotaState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Available => "available",
            Self::NearLimit => "near_limit",
            Self::Exhausted => "exhausted",
            Self::Unknown => "unknown",
        }
    }
}

impl std::str::FromStr for QuotaState {
    type Err = crate::core::CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "available" => Ok(Self::Available),
            "near_limit" => Ok(Self::NearLimit),
            "exhausted" => Ok(Self::Exhausted),
            "unknown" => Ok(Self::Unknown),
            other => Err(crate::core::CoreError::StoreError(format!(
                "unknown quota state: {other}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn switch_result_round_trips_through_str() {
        for r in [
            SwitchResult::Success,
            SwitchResult::Failed,
            SwitchResult::RolledBack,
        ] {
            let parsed: SwitchResult = r.as_str().parse().unwrap();
            assert_eq!(parsed, r);
        }
    }

    #[test]
    fn quota_mode_round_trips_through_str() {
        for m in [QuotaMode::Precise, QuotaMode::Status, QuotaMode::Unknown] {
            let parsed: QuotaMode = m.as_str().parse().unwrap();
            assert_eq!(parsed, m);
        }
    }

    #[test]
    fn quota_state_round_trips_through_str() {
        for s in [
            QuotaState::Available,
            QuotaState::NearLimit,
            QuotaState::Exhausted,
            QuotaState::Unknown,
        ] {
            let parsed: QuotaState = s.as_str().parse().unwrap();
            assert_eq!(parsed, s);
        }
    }

    #[test]
    fn unknown_strings_are_rejected() {
        assert!("bogus".parse::<SwitchResult>().is_err());
        assert!("bogus".parse::<QuotaMode>().is_err());
        assert!("bogus".parse::<QuotaState>().is_err());
    }
}
