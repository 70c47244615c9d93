//! Periodic reload of monitor definitions written to the store by another process.

use anyhow::Result;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info};

use crate::database::MonitorStore;
use crate::monitoring::MonitorScheduler;
use crate::monitoring::types::{MonitorDefinition, MonitorId};

/// Changes applied by one reconciliation pass
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReconcileReport {
    pub added: usize,
    pub removed: usize,
    pub updated: usize,
}

impl ReconcileReport {
    pub fn is_empty(&self) -> bool {
        self.added == 0 && self.removed == 0 && self.updated == 0
    }
}

/// Converges the scheduler registry onto the monitors currently stored
pub struct StoreReconciler {
    store: Arc<dyn MonitorStore>,
    scheduler: MonitorScheduler,
    /// Definitions as last seen in the store, used to detect edits.
    known: HashMap<MonitorId, MonitorDefinition>,
}

impl StoreReconciler {
    pub fn new(store: Arc<dyn MonitorStore>, scheduler: MonitorScheduler) -> Self {
        Self { store, scheduler, known: HashMap::new() }
    }

    /// Run a single pass against the store
    pub async fn reconcile_once(&mut self) -> Result<ReconcileReport> {
        let monitors = self.store.list_monitors().await?;
        let mut report = ReconcileReport::default();

        let stored: HashSet<MonitorId> = monitors.iter().map(|m| m.id).collect();
        for id in self.scheduler.registered_ids() {
            if !stored.contains(&id) && self.scheduler.unregister(id) {
                report.removed += 1;
            }
        }
        self.known.retain(|id, _| stored.contains(id));

        for monitor in monitors {
            let id = monitor.id;
            if !self.scheduler.is_registered(id) {
                if self.scheduler.register(monitor.clone()) {
                    report.added += 1;
                }
            } else if self.known.get(&id).is_some_and(|prev| prev.schedule_differs(&monitor))
                && self.scheduler.register(monitor.clone())
            {
                report.updated += 1;
            }
            self.known.insert(id, monitor);
        }

        Ok(report)
    }

    /// Reconcile every `period`, starting one period from now
    pub fn spawn(mut self, period: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                interval.tick().await;
                debug!("Checking for new or updated monitors...");

                match self.reconcile_once().await {
                    Ok(report) if report.is_empty() => {}
                    Ok(report) => info!(
                        added = report.added,
                        removed = report.removed,
                        updated = report.updated,
                        "Reloaded monitors: {} active",
                        self.scheduler.count()
                    ),
                    Err(e) => error!("Failed to reload monitors: {:#}", e),
                }
            }
        })
    }
}
