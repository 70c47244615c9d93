use anyhow::Result;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, error, warn};

use super::types::{MonitorDefinition, ProbeResult};
use crate::database::MonitorStore;
use crate::notifications::{AlertNotifier, AlertPayload};

/// What the evaluator did with one probe outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertOutcome {
    /// The probe succeeded or the failure streak is below the threshold.
    NotTriggered,
    /// Threshold reached but the previous alert is too recent.
    CoolingDown,
    /// Notification delivered and the cooldown clock advanced.
    Sent,
    /// Notification failed; the cooldown clock was left alone.
    SendFailed,
}

/// Whether enough time has passed since `last_alert_at` to alert again.
pub fn cooldown_passed(
    last_alert_at: Option<DateTime<Utc>>,
    cooldown_ms: u64,
    now: DateTime<Utc>,
) -> bool {
    match last_alert_at {
        None => true,
        Some(last) => (now - last).num_milliseconds() > cooldown_ms as i64,
    }
}

/// Threshold and cooldown gate in front of the alert transport
pub struct AlertEvaluator {
    store: Arc<dyn MonitorStore>,
    notifier: Arc<dyn AlertNotifier>,
}

impl AlertEvaluator {
    pub fn new(store: Arc<dyn MonitorStore>, notifier: Arc<dyn AlertNotifier>) -> Self {
        Self { store, notifier }
    }

    /// Decide whether `result` warrants an alert and dispatch it.
    ///
    /// On a delivered alert, `last_alert_at` is persisted first and then mirrored
    /// into `definition`. Only a failing store write is returned as an error.
    pub async fn evaluate(
        &self,
        definition: &mut MonitorDefinition,
        consecutive_failures: u32,
        result: &ProbeResult,
        now: DateTime<Utc>,
    ) -> Result<AlertOutcome> {
        if result.success || consecutive_failures < definition.alert_threshold {
            return Ok(AlertOutcome::NotTriggered);
        }

        let passed = cooldown_passed(definition.last_alert_at, definition.alert_cooldown, now);
        let next_alert_in_ms = definition
            .last_alert_at
            .map(|last| (definition.alert_cooldown as i64 - (now - last).num_milliseconds()).max(0))
            .unwrap_or(0);
        debug!(
            monitor_id = definition.id,
            failures = consecutive_failures,
            threshold = definition.alert_threshold,
            last_alert_at = ?definition.last_alert_at,
            cooldown_ms = definition.alert_cooldown,
            next_alert_in_ms,
            cooldown_passed = passed,
            "Failure threshold reached"
        );

        if !passed {
            return Ok(AlertOutcome::CoolingDown);
        }

        warn!(monitor_id = definition.id, endpoint = %definition.endpoint, "Alert triggered");

        let payload = AlertPayload {
            monitor_id: definition.id,
            endpoint: definition.endpoint.clone(),
            latency: result.latency,
            status_code: result.status_code,
            failure_count: consecutive_failures,
            timestamp: now,
        };

        if let Err(e) = self.notifier.send(&payload).await {
            error!(monitor_id = definition.id, error = %e, "Alert delivery failed");
            return Ok(AlertOutcome::SendFailed);
        }

        self.store.set_last_alert_at(definition.id, now).await?;
        definition.last_alert_at = Some(now);

        Ok(AlertOutcome::Sent)
    }
}
