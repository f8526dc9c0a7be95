use crate::error::SessionError;
use serde::{Deserialize, Serialize};

pub const DEFAULT_ACCOUNT_ID: &str = "";
pub const DEFAULT_CANCEL_PACING_MS: u64 = 50;
pub const DEFAULT_STALE_REQUEST_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_SWEEP_INTERVAL_MS: u64 = 5_000;
pub const DEFAULT_EVENT_BUFFER: usize = 1_024;
pub const MAX_CANCEL_PACING_MS: u64 = 1_000;
pub const MIN_STALE_REQUEST_TIMEOUT_MS: u64 = 1_000;
pub const MAX_STALE_REQUEST_TIMEOUT_MS: u64 = 600_000;
pub const MIN_SWEEP_INTERVAL_MS: u64 = 100;
pub const MAX_SWEEP_INTERVAL_MS: u64 = 60_000;
pub const MIN_EVENT_BUFFER: usize = 16;
pub const MAX_EVENT_BUFFER: usize = 65_536;

/// Caller-supplied session arguments; every field optional, validated by
/// [`SessionArgs::normalize`].
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct SessionArgs {
    pub account_id: Option<String>,
    pub cancel_pacing_ms: Option<u64>,
    pub stale_request_timeout_ms: Option<u64>,
    pub sweep_interval_ms: Option<u64>,
    pub event_buffer: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub account_id: String,
    pub cancel_pacing_ms: u64,
    pub stale_request_timeout_ms: u64,
    pub sweep_interval_ms: u64,
    pub event_buffer: usize,
}

impl SessionArgs {
    pub fn normalize(self) -> Result<SessionConfig, SessionError> {
        let account_id = self
            .account_id
            .unwrap_or_else(|| DEFAULT_ACCOUNT_ID.to_string())
            .trim()
            .to_string();
        if !account_id.chars().all(|ch| ch.is_ascii_alphanumeric()) {
            return Err(SessionError::InvalidArgument(
                "accountId must be alphanumeric ASCII".to_string(),
            ));
        }

        let cancel_pacing_ms = self.cancel_pacing_ms.unwrap_or(DEFAULT_CANCEL_PACING_MS);
        if cancel_pacing_ms > MAX_CANCEL_PACING_MS {
            return Err(SessionError::InvalidArgument(format!(
                "cancelPacingMs must be at most {MAX_CANCEL_PACING_MS}"
            )));
        }

        let stale_request_timeout_ms = self
            .stale_request_timeout_ms
            .unwrap_or(DEFAULT_STALE_REQUEST_TIMEOUT_MS);
        if !(MIN_STALE_REQUEST_TIMEOUT_MS..=MAX_STALE_REQUEST_TIMEOUT_MS)
            .contains(&stale_request_timeout_ms)
        {
            return Err(SessionError::InvalidArgument(format!(
                "staleRequestTimeoutMs must be between {MIN_STALE_REQUEST_TIMEOUT_MS} and {MAX_STALE_REQUEST_TIMEOUT_MS}"
            )));
        }

        let sweep_interval_ms = self.sweep_interval_ms.unwrap_or(DEFAULT_SWEEP_INTERVAL_MS);
        if !(MIN_SWEEP_INTERVAL_MS..=MAX_SWEEP_INTERVAL_MS).contains(&sweep_interval_ms) {
            return Err(SessionError::InvalidArgument(format!(
                "sweepIntervalMs must be between {MIN_SWEEP_INTERVAL_MS} and {MAX_SWEEP_INTERVAL_MS}"
            )));
        }

        let event_buffer = self.event_buffer.unwrap_or(DEFAULT_EVENT_BUFFER);
        if !(MIN_EVENT_BUFFER..=MAX_EVENT_BUFFER).contains(&event_buffer) {
            return Err(SessionError::InvalidArgument(format!(
                "eventBuffer must be between {MIN_EVENT_BUFFER} and {MAX_EVENT_BUFFER}"
            )));
        }

        Ok(SessionConfig {
            account_id,
            cancel_pacing_ms,
            stale_request_timeout_ms,
            sweep_interval_ms,
            event_buffer,
        })
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionArgs::default()
            .normalize()
            .expect("default session arguments are valid")
    }
}
