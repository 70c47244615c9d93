use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::monitoring::types::{
    MonitorId, ProbeResult, normalize_alert_cooldown, normalize_alert_threshold,
};

/// Monitor definition as submitted for creation or update, before the store assigns an id
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewMonitor {
    pub endpoint: String,
    pub method: String,
    pub expected_status: u16,
    pub interval: u64,
    pub headers: Option<BTreeMap<String, String>>,
    pub body: Option<serde_json::Value>,
    /// Values below 1 are replaced by the default threshold.
    pub alert_threshold: Option<i64>,
    /// Values below one minute are replaced by the default cooldown.
    pub alert_cooldown: Option<i64>,
}

impl NewMonitor {
    pub fn new(endpoint: impl Into<String>, method: impl Into<String>, expected_status: u16, interval: u64) -> Self {
        Self {
            endpoint: endpoint.into(),
            method: method.into(),
            expected_status,
            interval,
            headers: None,
            body: None,
            alert_threshold: None,
            alert_cooldown: None,
        }
    }

    pub fn threshold(&self) -> u32 {
        normalize_alert_threshold(self.alert_threshold)
    }

    pub fn cooldown(&self) -> u64 {
        normalize_alert_cooldown(self.alert_cooldown)
    }
}

/// One probe outcome to be stored
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewResult {
    pub monitor_id: MonitorId,
    pub timestamp: DateTime<Utc>,
    pub latency: u64,
    pub status_code: Option<u16>,
    pub success: bool,
    pub error: Option<String>,
}

impl NewResult {
    pub fn from_probe(monitor_id: MonitorId, timestamp: DateTime<Utc>, probe: &ProbeResult) -> Self {
        Self {
            monitor_id,
            timestamp,
            latency: probe.latency,
            status_code: probe.status_code,
            success: probe.success,
            error: probe.error.clone(),
        }
    }
}

/// A stored probe outcome
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredResult {
    pub id: i64,
    pub monitor_id: MonitorId,
    pub timestamp: DateTime<Utc>,
    pub latency: u64,
    pub status_code: Option<u16>,
    pub success: bool,
    pub error: Option<String>,
}

/// Convert a timestamp to Unix milliseconds
pub fn to_millis(time: DateTime<Utc>) -> i64 {
    time.timestamp_millis()
}

/// Convert Unix milliseconds to a timestamp, clamping out-of-range values to the epoch
pub fn from_millis(millis: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(millis).unwrap_or_default()
}
