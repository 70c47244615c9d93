//! In-memory collaborators shared by unit tests.

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::database::MonitorStore;
use crate::database::models::NewResult;
use crate::monitoring::checker::Prober;
use crate::monitoring::types::{MonitorDefinition, MonitorId, ProbeResult};
use crate::notifications::{AlertNotifier, AlertPayload, NotifyError};

pub fn definition(id: MonitorId, endpoint: &str) -> MonitorDefinition {
    MonitorDefinition {
        id,
        endpoint: endpoint.to_string(),
        method: "GET".to_string(),
        expected_status: 200,
        interval: 10,
        headers: None,
        body: None,
        alert_threshold: 3,
        alert_cooldown: 60_000,
        last_alert_at: None,
    }
}

#[derive(Default)]
pub struct MemoryStore {
    monitors: Mutex<HashMap<MonitorId, MonitorDefinition>>,
    results: Mutex<Vec<NewResult>>,
    failing_writes: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn put_monitor(&self, definition: MonitorDefinition) {
        self.monitors.lock().unwrap().insert(definition.id, definition);
    }

    pub fn remove_monitor(&self, id: MonitorId) {
        self.monitors.lock().unwrap().remove(&id);
    }

    pub fn results(&self) -> Vec<NewResult> {
        self.results.lock().unwrap().clone()
    }

    pub fn results_for(&self, id: MonitorId) -> Vec<NewResult> {
        self.results().into_iter().filter(|r| r.monitor_id == id).collect()
    }

    pub fn last_alert_at(&self, id: MonitorId) -> Option<DateTime<Utc>> {
        self.monitors.lock().unwrap().get(&id).and_then(|m| m.last_alert_at)
    }

    pub fn set_failing_writes(&self, failing: bool) {
        self.failing_writes.store(failing, Ordering::SeqCst);
    }

    fn check_writable(&self) -> Result<()> {
        if self.failing_writes.load(Ordering::SeqCst) {
            return Err(anyhow!("disk I/O error"));
        }
        Ok(())
    }
}

#[async_trait]
impl MonitorStore for MemoryStore {
    async fn get_monitor(&self, id: MonitorId) -> Result<Option<MonitorDefinition>> {
        Ok(self.monitors.lock().unwrap().get(&id).cloned())
    }

    async fn list_monitors(&self) -> Result<Vec<MonitorDefinition>> {
        let mut monitors: Vec<_> = self.monitors.lock().unwrap().values().cloned().collect();
        monitors.sort_by(|a, b| b.id.cmp(&a.id));
        Ok(monitors)
    }

    async fn insert_result(&self, result: &NewResult) -> Result<()> {
        self.check_writable()?;
        self.results.lock().unwrap().push(result.clone());
        Ok(())
    }

    async fn set_last_alert_at(&self, id: MonitorId, at: DateTime<Utc>) -> Result<()> {
        self.check_writable()?;
        if let Some(monitor) = self.monitors.lock().unwrap().get_mut(&id) {
            monitor.last_alert_at = Some(at);
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<AlertPayload>>,
    failing: AtomicBool,
}

impl RecordingNotifier {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Every payload handed to the notifier, including failed sends.
    pub fn sent(&self) -> Vec<AlertPayload> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

#[async_trait]
impl AlertNotifier for RecordingNotifier {
    async fn send(&self, payload: &AlertPayload) -> Result<(), NotifyError> {
        self.sent.lock().unwrap().push(payload.clone());
        if self.failing.load(Ordering::SeqCst) {
            return Err(NotifyError::InvalidConfiguration("smtp relay unavailable".to_string()));
        }
        Ok(())
    }
}

/// Prober returning queued outcomes (then `fallback`), optionally after a delay.
pub struct ScriptedProber {
    outcomes: Mutex<VecDeque<bool>>,
    fallback: bool,
    delay: Duration,
    calls: Mutex<Vec<(String, Duration)>>,
}

impl ScriptedProber {
    pub fn always(success: bool) -> Arc<Self> {
        Self::scripted(&[], success)
    }

    pub fn scripted(outcomes: &[bool], fallback: bool) -> Arc<Self> {
        Arc::new(Self {
            outcomes: Mutex::new(outcomes.iter().copied().collect()),
            fallback,
            delay: Duration::ZERO,
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn slow(delay: Duration, success: bool) -> Arc<Self> {
        Arc::new(Self {
            outcomes: Mutex::new(VecDeque::new()),
            fallback: success,
            delay,
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn endpoints(&self) -> Vec<String> {
        self.calls.lock().unwrap().iter().map(|(endpoint, _)| endpoint.clone()).collect()
    }
}

#[async_trait]
impl Prober for ScriptedProber {
    async fn probe(&self, definition: &MonitorDefinition, timeout: Duration) -> ProbeResult {
        self.calls.lock().unwrap().push((definition.endpoint.clone(), timeout));
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let success = self.outcomes.lock().unwrap().pop_front().unwrap_or(self.fallback);
        if success {
            ProbeResult::response(true, Some(200), 50)
        } else {
            ProbeResult::failure("Request failed with status code 500", Some(500), 50)
        }
    }
}
