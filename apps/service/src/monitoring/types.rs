use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifier assigned to a monitor by the store.
pub type MonitorId = i64;

/// Consecutive failures required before alerting when none (or an invalid value) is given.
pub const DEFAULT_ALERT_THRESHOLD: u32 = 3;

/// Alert cooldown in milliseconds used when none (or a too-short value) is given.
pub const DEFAULT_ALERT_COOLDOWN_MS: u64 = 900_000;

/// Shortest accepted alert cooldown in milliseconds.
pub const MIN_ALERT_COOLDOWN_MS: u64 = 60_000;

/// A user-declared periodic check against one endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorDefinition {
    pub id: MonitorId,

    /// URL of the endpoint; the scheme selects the protocol.
    pub endpoint: String,

    /// HTTP verb, ignored for WebSocket endpoints.
    pub method: String,

    /// Status code that counts as success (HTTP only).
    pub expected_status: u16,

    /// Seconds between the end of one probe cycle and the start of the next.
    pub interval: u64,

    pub headers: Option<BTreeMap<String, String>>,

    /// Request payload (HTTP only). Strings are sent verbatim, anything else as JSON.
    pub body: Option<serde_json::Value>,

    pub alert_threshold: u32,

    /// Minimum milliseconds between two alerts for this monitor.
    pub alert_cooldown: u64,

    /// When the last alert was successfully dispatched.
    pub last_alert_at: Option<DateTime<Utc>>,
}

impl MonitorDefinition {
    /// Whether `other` would probe or alert differently from `self`.
    ///
    /// `last_alert_at` is runtime alert state and is ignored.
    pub fn schedule_differs(&self, other: &MonitorDefinition) -> bool {
        self.endpoint != other.endpoint
            || self.method != other.method
            || self.expected_status != other.expected_status
            || self.interval != other.interval
            || self.headers != other.headers
            || self.body != other.body
            || self.alert_threshold != other.alert_threshold
            || self.alert_cooldown != other.alert_cooldown
    }
}

/// Clamp a user-supplied threshold, falling back to [`DEFAULT_ALERT_THRESHOLD`].
pub fn normalize_alert_threshold(value: Option<i64>) -> u32 {
    match value {
        Some(v) if v >= 1 => u32::try_from(v).unwrap_or(u32::MAX),
        _ => DEFAULT_ALERT_THRESHOLD,
    }
}

/// Clamp a user-supplied cooldown, falling back to [`DEFAULT_ALERT_COOLDOWN_MS`].
pub fn normalize_alert_cooldown(value: Option<i64>) -> u64 {
    match value {
        Some(v) if v >= MIN_ALERT_COOLDOWN_MS as i64 => v as u64,
        _ => DEFAULT_ALERT_COOLDOWN_MS,
    }
}

/// Outcome of a single probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeResult {
    pub success: bool,

    /// HTTP status code, always `None` for WebSocket probes.
    pub status_code: Option<u16>,

    pub error: Option<String>,

    /// Milliseconds from probe start to a definitive outcome.
    pub latency: u64,
}

impl ProbeResult {
    /// A probe that received a response.
    pub fn response(success: bool, status_code: Option<u16>, latency: u64) -> Self {
        Self { success, status_code, error: None, latency }
    }

    /// A probe that failed before or while receiving a response.
    pub fn failure(error: impl Into<String>, status_code: Option<u16>, latency: u64) -> Self {
        Self { success: false, status_code, error: Some(error.into()), latency }
    }

    pub fn unsupported_protocol() -> Self {
        Self::failure("Unsupported protocol", None, 0)
    }
}

/// Probe outcome published to live observers after it has been stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProbeEvent {
    pub monitor_id: MonitorId,
    pub latency: u64,
    pub success: bool,
    pub status_code: Option<u16>,
    pub timestamp: DateTime<Utc>,
}

/// Where a monitor's execution loop currently is.
///
/// A monitor without a registry entry is terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    /// Waiting for the next cycle.
    Scheduled,
    /// A probe is in flight.
    Running,
    /// Storing, publishing and evaluating alerts for the last probe.
    Completing,
}

impl std::fmt::Display for LoopState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoopState::Scheduled => write!(f, "scheduled"),
            LoopState::Running => write!(f, "running"),
            LoopState::Completing => write!(f, "completing"),
        }
    }
}
