//! Alert delivery.
//!
//! The scheduler hands an [`AlertPayload`] to an [`AlertNotifier`]; a send
//! that returns an error leaves the monitor's cooldown clock untouched so the
//! next qualifying failure retries.

pub mod webhook;

pub use webhook::WebhookNotifier;

use async_trait::async_trait;
use chrono::{DateTime, Local, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::monitoring::types::MonitorId;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("Failed to reach alert transport: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("Alert transport rejected the alert with status {status}: {body}")]
    Rejected { status: u16, body: String },
    #[error("Could not load alert recipients: {0:#}")]
    Recipients(anyhow::Error),
    #[error("Invalid alert transport configuration: {0}")]
    InvalidConfiguration(String),
}

/// Everything an alert message says about a failing monitor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertPayload {
    pub monitor_id: MonitorId,
    pub endpoint: String,
    pub latency: u64,
    pub status_code: Option<u16>,
    pub failure_count: u32,
    pub timestamp: DateTime<Utc>,
}

impl AlertPayload {
    pub fn subject(&self) -> String {
        format!("[KOALA ALERT] {} failing", self.endpoint)
    }

    /// Plain-text message body, with the local time taken from the process timezone (`TZ`)
    pub fn text(&self) -> String {
        self.text_in(&Local)
    }

    /// Plain-text message body with the detection time also rendered in `zone`
    pub fn text_in<Tz: TimeZone>(&self, zone: &Tz) -> String {
        let status = self
            .status_code
            .map(|code| code.to_string())
            .unwrap_or_else(|| "No Response".to_string());

        format!(
            "KOALA ALERT - Endpoint Down\n\n\
             Endpoint: {}\n\
             Status: {}\n\
             Latency: {}ms\n\
             Failures: {}\n\n\
             Detected At:\n\
             - UTC: {}\n\
             - Local: {}\n",
            self.endpoint,
            status,
            self.latency,
            self.failure_count,
            self.timestamp.format("%a, %d %b %Y %H:%M:%S GMT"),
            self.timestamp.with_timezone(zone).fixed_offset().format("%-m/%-d/%Y, %-I:%M:%S %p (UTC%:z)"),
        )
    }
}

/// Alert transport
#[async_trait]
pub trait AlertNotifier: Send + Sync {
    /// Deliver an alert. Errors must be returned, not swallowed.
    async fn send(&self, payload: &AlertPayload) -> Result<(), NotifyError>;
}

/// Transport used when no alert destination is configured; alerts are only logged
pub struct DisabledNotifier;

#[async_trait]
impl AlertNotifier for DisabledNotifier {
    async fn send(&self, payload: &AlertPayload) -> Result<(), NotifyError> {
        info!(
            monitor_id = payload.monitor_id,
            endpoint = %payload.endpoint,
            "Alert transport not configured, alert not delivered"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(status_code: Option<u16>) -> AlertPayload {
        AlertPayload {
            monitor_id: 3,
            endpoint: "https://api.example.com".to_string(),
            latency: 512,
            status_code,
            failure_count: 4,
            timestamp: DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
        }
    }

    #[test]
    fn test_subject_names_endpoint() {
        assert_eq!(payload(None).subject(), "[KOALA ALERT] https://api.example.com failing");
    }

    #[test]
    fn test_text_without_status() {
        let text = payload(None).text();
        assert!(text.contains("Status: No Response"));
        assert!(text.contains("Latency: 512ms"));
        assert!(text.contains("Failures: 4"));
        assert!(text.contains("Tue, 14 Nov 2023 22:13:20 GMT"));
    }

    #[test]
    fn test_text_renders_local_time_in_zone() {
        let zone = chrono::FixedOffset::west_opt(5 * 3600).unwrap();
        let text = payload(None).text_in(&zone);
        assert!(text.contains("- UTC: Tue, 14 Nov 2023 22:13:20 GMT"));
        assert!(text.contains("- Local: 11/14/2023, 5:13:20 PM (UTC-05:00)"), "{text}");
    }

    #[test]
    fn test_text_with_status() {
        assert!(payload(Some(502)).text().contains("Status: 502"));
    }

    #[tokio::test]
    async fn test_disabled_notifier_succeeds() {
        assert!(DisabledNotifier.send(&payload(None)).await.is_ok());
    }
}
