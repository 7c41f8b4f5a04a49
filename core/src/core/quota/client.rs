//! HTTP probe paths against the upstream service. Two fixed probes run
//! concurrently: a precise usage endpoint and a coarse status mirror.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::debug;

use crate::core::{CoreError, QuotaMode, QuotaState};

const PRIMARY_HOST: &str = "https://chatgpt.com";
const FALLBACK_HOST: &str = "https://chat.openai.com";
const CODEX_ORIGIN: &str = "https://chatgpt.com";
const USER_AGENT: &str = "codex-cli/1.0";

const CONFIDENCE_PRIMARY_PRECISE: i64 = 90;
const CONFIDENCE_SECONDARY_PRECISE: i64 = 80;
const CONFIDENCE_STATUS: i64 = 50;
const CONFIDENCE_UNKNOWN: i64 = 0;

/// The result of probing one account's upstream quota.
pub struct ProbeOutcome {
    pub mode: QuotaMode,
    pub remaining_value: Option<f64>,
    pub remaining_unit: Option<String>,
    pub quota_state: QuotaState,
    pub reset_at: Option<DateTime<Utc>>,
    pub source: String,
    pub confidence: i64,
    pub reason: Option<String>,
}

/// Extracts the bearer token from the decrypted auth file's
/// `tokens.access_token` field.
pub fn extract_bearer_token(plaintext: &[u8]) -> Result<String, CoreError> {
    let value: Value = serde_json::from_slice(plaintext)?;
    value
        .get("tokens")
        .and_then(|t| t.get("access_token"))
        .and_then(|t| t.as_str())
        .map(str::to_string)
        .ok_or_else(|| CoreError::ProbeFailed("auth file has no access token".to_string()))
}

/// Runs the primary and fallback probes concurrently and picks the winner.
pub async fn probe(client: &reqwest::Client, token: &str, timeout: Duration) -> ProbeOutcome {
    let (primary, fallback) = tokio::join!(
        probe_precise(client, token, timeout),
        probe_status(client, token, timeout),
    );

    if let Some(outcome) = primary {
        return outcome;
    }
    if let Some(outcome) = fallback {
        return outcome;
    }

    ProbeOutcome {
        mode: QuotaMode::Unknown,
        remaining_value: None,
        remaining_unit: None,
        quota_state: QuotaState::Unknown,
        reset_at: None,
        source: "none".to_string(),
        confidence: CONFIDENCE_UNKNOWN,
        reason: Some("all probes failed".to_string()),
    }
}

async fn probe_precise(
    client: &reqwest::Client,
    token: &str,
    timeout: Duration,
) -> Option<ProbeOutcome> {
    for (host, confidence) in [
        (PRIMARY_HOST, CONFIDENCE_PRIMARY_PRECISE),
        (FALLBACK_HOST, CONFIDENCE_SECONDARY_PRECISE),
    ] {
        for path in ["/backend-api/api/codex/usage", "/backend-api/wham/usage"] {
            let url = format!("{host}{path}");
            let response = match tokio::time::timeout(
                timeout,
                client
                    .get(&url)
                    .bearer_auth(token)
                    .header("Origin", CODEX_ORIGIN)
                    .header("User-Agent", USER_AGENT)
                    .header("Accept", "application/json")
                    .send(),
            )
            .await
            {
                Ok(Ok(resp)) if resp.status().is_success() => resp,
                _ => continue,
            };

            let remaining_value = response
                .headers()
                .get("X-Codex-Remaining")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<f64>().ok());

            let Some(remaining_value) = remaining_value else {
                continue;
            };

            let remaining_unit = response
                .headers()
                .get("X-Codex-Unit")
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);

            let reset_at = response
                .headers()
                .get("X-Codex-Reset-At")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| DateTime::parse_from_rfc3339(v).ok())
                .map(|dt| dt.with_timezone(&Utc));

            debug!(%url, remaining_value, "precise quota probe succeeded");

            return Some(ProbeOutcome {
                mode: QuotaMode::Precise,
                remaining_value: Some(remaining_value),
                remaining_unit,
                quota_state: quota_state_from_remaining(remaining_value),
                reset_at,
                source: url,
                confidence,
                reason: None,
            });
        }
    }
    None
}

async fn probe_status(
    client: &reqwest::Client,
    token: &str,
    timeout: Duration,
) -> Option<ProbeOutcome> {
    let url = format!("{FALLBACK_HOST}/backend-api/accounts/check/v4-2023-04-27");

    let response = match tokio::time::timeout(
        timeout,
        client
            .get(&url)
            .bearer_auth(token)
            .header("Origin", CODEX_ORIGIN)
            .header("User-Agent", USER_AGENT)
            .header("Accept", "application/json")
            .send(),
    )
    .await
    {
        Ok(Ok(resp)) => resp,
        _ => return None,
    };

    let status = response.status();
    let body: Value = response.json().await.unwrap_or(Value::Null);
    let has_plan_type = body.get("plan_type").and_then(|v| v.as_str()).is_some();

    let (mode, quota_state, confidence, reason) = status_outcome(status.as_u16(), has_plan_type);

    Some(ProbeOutcome {
        mode,
        remaining_value: None,
        remaining_unit: None,
        quota_state,
        reset_at: None,
        source: "fallback-status".to_string(),
        confidence,
        reason,
    })
}

/// Maps a status-probe HTTP response to a mode/state/confidence/reason
/// tuple. 402 and 429 are confidently-classified outcomes; any other
/// non-success code is unknown rather than a guessed quota state, so the
/// `mode = status ⇒ quota_state ∈ {available, near_limit, exhausted}`
/// coupling never breaks.
fn status_outcome(
    status_code: u16,
    has_plan_type: bool,
) -> (QuotaMode, QuotaState, i64, Option<String>) {
    match status_code {
        200 if has_plan_type => (QuotaMode::Status, QuotaState::Available, CONFIDENCE_STATUS, None),
        402 => (QuotaMode::Status, QuotaState::Exhausted, CONFIDENCE_STATUS, None),
        429 => (QuotaMode::Status, QuotaState::NearLimit, CONFIDENCE_STATUS, None),
        code => (
            QuotaMode::Unknown,
            QuotaState::Unknown,
            CONFIDENCE_UNKNOWN,
            Some(format!("unexpected status {code}")),
        ),
    }
}

fn quota_state_from_remaining(remaining_value: f64) -> QuotaState {
    if remaining_value <= 0.0 {
        QuotaState::Exhausted
    } else if remaining_value < 10.0 {
        QuotaState::NearLimit
    } else {
        QuotaState::Available
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_bearer_token_from_nested_field() {
        let token = extract_bearer_token(br#"{"tokens":{"access_token":"abc123"}}"#).unwrap();
        assert_eq!(token, "abc123");
    }

    #[test]
    fn missing_token_is_a_probe_error() {
        assert!(extract_bearer_token(br#"{"tokens":{}}"#).is_err());
    }

    #[test]
    fn status_outcome_maps_known_codes_to_status_mode() {
        let (mode, state, confidence, reason) = status_outcome(402, false);
        assert_eq!(mode, QuotaMode::Status);
        assert_eq!(state, QuotaState::Exhausted);
        assert_eq!(confidence, CONFIDENCE_STATUS);
        assert!(reason.is_none());

        let (mode, state, ..) = status_outcome(429, false);
        assert_eq!(mode, QuotaMode::Status);
        assert_eq!(state, QuotaState::NearLimit);

        let (mode, state, ..) = status_outcome(200, true);
        assert_eq!(mode, QuotaMode::Status);
        assert_eq!(state, QuotaState::Available);
    }

    #[test]
    fn status_outcome_treats_unexpected_codes_as_unknown_mode() {
        let (mode, state, confidence, reason) = status_outcome(403, false);
        assert_eq!(mode, QuotaMode::Unknown);
        assert_eq!(state, QuotaState::Unknown);
        assert_eq!(confidence, CONFIDENCE_UNKNOWN);
        assert!(reason.is_some());

        let (mode, state, ..) = status_outcome(500, false);
        assert_eq!(mode, QuotaMode::Unknown);
        assert_eq!(state, QuotaState::Unknown);

        // A 200 without the expected body shape is not confidently "available".
        let (mode, state, ..) = status_outcome(200, false);
        assert_eq!(mode, QuotaMode::Unknown);
        assert_eq!(state, QuotaState::Unknown);
    }

    #[test]
    fn quota_state_thresholds() {
        assert_eq!(quota_state_from_remaining(0.0), QuotaState::Exhausted);
        assert_eq!(quota_state_from_remaining(5.0), QuotaState::NearLimit);
        assert_eq!(quota_state_from_remaining(50.0), QuotaState::Available);
    }
}
