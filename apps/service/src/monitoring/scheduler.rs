use anyhow::Result;
use chrono::Utc;
use dashmap::DashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use super::alert::{AlertEvaluator, AlertOutcome};
use super::executor::ProbeDispatcher;
use super::types::{LoopState, MonitorDefinition, MonitorId, ProbeEvent};
use crate::database::MonitorStore;
use crate::database::models::NewResult;
use crate::events::EventPublisher;
use crate::notifications::AlertNotifier;
use crate::orchestrator::retention::RetentionCleanup;

/// Runtime scheduling state of one monitor. Never persisted.
struct RegistryEntry {
    /// Distinguishes this registration from earlier ones for the same id.
    generation: u64,
    /// Dropping the sender cancels the loop's pending sleep.
    _cancel: oneshot::Sender<()>,
    consecutive_failures: u32,
    state: LoopState,
}

/// How a single cycle ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CycleOutcome {
    Completed { success: bool, failures: u32, alert: AlertOutcome },
    /// The monitor was deleted from the store while its probe was in flight.
    MonitorDeleted,
    /// The registry entry was removed or replaced while the cycle ran.
    Abandoned,
}

/// Monitoring scheduler - owns the registry of active monitors and their execution loops
///
/// Cheap to clone; clones share the same registry.
#[derive(Clone)]
pub struct MonitorScheduler {
    inner: Arc<SchedulerInner>,
}

struct SchedulerInner {
    registry: DashMap<MonitorId, RegistryEntry>,
    next_generation: AtomicU64,
    store: Arc<dyn MonitorStore>,
    dispatcher: Arc<ProbeDispatcher>,
    publisher: Arc<dyn EventPublisher>,
    alerts: AlertEvaluator,
    cleanup: Option<RetentionCleanup>,
    cleanup_handle: Mutex<Option<JoinHandle<()>>>,
}

impl MonitorScheduler {
    /// Create a new monitoring scheduler
    pub fn new(
        store: Arc<dyn MonitorStore>,
        dispatcher: Arc<ProbeDispatcher>,
        publisher: Arc<dyn EventPublisher>,
        notifier: Arc<dyn AlertNotifier>,
    ) -> Self {
        Self::build(store, dispatcher, publisher, notifier, None)
    }

    /// Scheduler whose [`bootstrap`](Self::bootstrap) also starts `cleanup`
    pub fn with_cleanup(
        store: Arc<dyn MonitorStore>,
        dispatcher: Arc<ProbeDispatcher>,
        publisher: Arc<dyn EventPublisher>,
        notifier: Arc<dyn AlertNotifier>,
        cleanup: RetentionCleanup,
    ) -> Self {
        Self::build(store, dispatcher, publisher, notifier, Some(cleanup))
    }

    fn build(
        store: Arc<dyn MonitorStore>,
        dispatcher: Arc<ProbeDispatcher>,
        publisher: Arc<dyn EventPublisher>,
        notifier: Arc<dyn AlertNotifier>,
        cleanup: Option<RetentionCleanup>,
    ) -> Self {
        let alerts = AlertEvaluator::new(store.clone(), notifier);
        Self {
            inner: Arc::new(SchedulerInner {
                registry: DashMap::new(),
                next_generation: AtomicU64::new(0),
                store,
                dispatcher,
                publisher,
                alerts,
                cleanup,
                cleanup_handle: Mutex::new(None),
            }),
        }
    }

    /// Start probing `definition`, replacing any schedule already running for its id.
    ///
    /// The first probe starts immediately. Callers pass the freshly stored definition.
    /// A zero interval is refused and drops any schedule already running for the id.
    /// Returns whether a schedule was started. Must be called from within a tokio runtime.
    pub fn register(&self, definition: MonitorDefinition) -> bool {
        let id = definition.id;
        if definition.interval == 0 {
            error!(monitor_id = id, "Refusing to schedule monitor with a zero interval");
            self.unregister(id);
            return false;
        }

        let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);
        let (cancel_tx, cancel_rx) = oneshot::channel();

        let entry = RegistryEntry {
            generation,
            _cancel: cancel_tx,
            consecutive_failures: 0,
            state: LoopState::Scheduled,
        };

        // Replacing the entry drops the previous cancel handle, ending the old loop.
        if self.inner.registry.insert(id, entry).is_some() {
            info!(monitor_id = id, "Monitor re-registered");
        } else {
            info!(monitor_id = id, interval = definition.interval, "Monitor registered");
        }

        let inner = Arc::clone(&self.inner);
        tokio::spawn(inner.run_monitor(definition, generation, cancel_rx));
        true
    }

    /// Stop scheduling `id`. An in-flight probe runs to completion.
    ///
    /// Returns whether the monitor was scheduled.
    pub fn unregister(&self, id: MonitorId) -> bool {
        match self.inner.registry.remove(&id) {
            Some((_, entry)) => {
                info!(monitor_id = id, state = %entry.state, "Monitor unregistered");
                true
            }
            None => false,
        }
    }

    /// Number of currently scheduled monitors
    pub fn count(&self) -> usize {
        self.inner.registry.len()
    }

    pub fn is_registered(&self, id: MonitorId) -> bool {
        self.inner.registry.contains_key(&id)
    }

    pub fn registered_ids(&self) -> Vec<MonitorId> {
        self.inner.registry.iter().map(|entry| *entry.key()).collect()
    }

    pub fn consecutive_failures(&self, id: MonitorId) -> Option<u32> {
        self.inner.registry.get(&id).map(|entry| entry.consecutive_failures)
    }

    /// Loop state of `id`; `None` once terminated
    pub fn state(&self, id: MonitorId) -> Option<LoopState> {
        self.inner.registry.get(&id).map(|entry| entry.state)
    }

    /// Register every stored monitor, then start retention cleanup.
    ///
    /// Returns the number of monitors registered.
    pub async fn bootstrap(&self) -> Result<usize> {
        let monitors = self.inner.store.list_monitors().await?;
        info!("Bootstrapping {} monitors from the store", monitors.len());

        let mut count = 0;
        for monitor in monitors {
            if self.register(monitor) {
                count += 1;
            }
        }

        if let Some(cleanup) = &self.inner.cleanup {
            let mut handle = self.inner.cleanup_handle.lock().await;
            if handle.is_none() {
                *handle = Some(cleanup.start_periodic_cleanup());
            }
        }

        Ok(count)
    }

    /// Cancel every pending execution and clear the registry
    pub fn stop_all(&self) {
        let count = self.inner.registry.len();
        self.inner.registry.clear();
        info!("Stopped {} monitors", count);
    }

    /// [`stop_all`](Self::stop_all) plus stopping the retention cleanup
    pub async fn shutdown(&self) {
        self.stop_all();
        if let Some(handle) = self.inner.cleanup_handle.lock().await.take() {
            handle.abort();
        }
    }
}

impl SchedulerInner {
    /// Execution loop for one registration of a monitor
    async fn run_monitor(
        self: Arc<Self>,
        mut definition: MonitorDefinition,
        generation: u64,
        mut cancel: oneshot::Receiver<()>,
    ) {
        let id = definition.id;

        loop {
            if !self.set_state(id, generation, LoopState::Running) {
                break;
            }

            match self.run_cycle(&mut definition, generation).await {
                Ok(CycleOutcome::Completed { success, failures, alert }) => {
                    debug!(monitor_id = id, success, failures, ?alert, "Cycle finished");
                }
                Ok(CycleOutcome::MonitorDeleted) => {
                    debug!(monitor_id = id, "Monitor deleted during probe, result discarded");
                }
                Ok(CycleOutcome::Abandoned) => {
                    debug!(monitor_id = id, "Monitor unregistered during cycle");
                }
                Err(e) => error!(monitor_id = id, "Monitor cycle failed: {:#}", e),
            }

            if !self.set_state(id, generation, LoopState::Scheduled) {
                break;
            }

            tokio::select! {
                _ = &mut cancel => break,
                _ = tokio::time::sleep(Duration::from_secs(definition.interval)) => {}
            }
        }

        debug!(monitor_id = id, generation, "Monitor loop terminated");
    }

    /// Probe, store, publish, count and alert. Errors end the cycle, not the loop.
    async fn run_cycle(&self, definition: &mut MonitorDefinition, generation: u64) -> Result<CycleOutcome> {
        let id = definition.id;
        let result = self.dispatcher.probe(definition).await;

        self.set_state(id, generation, LoopState::Completing);

        if self.store.get_monitor(id).await?.is_none() {
            return Ok(CycleOutcome::MonitorDeleted);
        }

        let now = Utc::now();
        self.store.insert_result(&NewResult::from_probe(id, now, &result)).await?;

        self.publisher.publish(ProbeEvent {
            monitor_id: id,
            latency: result.latency,
            success: result.success,
            status_code: result.status_code,
            timestamp: now,
        });

        let Some(failures) = self.record_outcome(id, generation, result.success) else {
            return Ok(CycleOutcome::Abandoned);
        };

        if !result.success {
            debug!(monitor_id = id, failures, error = ?result.error, "Probe failed");
        }

        let alert = self.alerts.evaluate(definition, failures, &result, now).await?;

        Ok(CycleOutcome::Completed { success: result.success, failures, alert })
    }

    /// Update the failure streak; `None` if this registration is gone
    fn record_outcome(&self, id: MonitorId, generation: u64, success: bool) -> Option<u32> {
        let mut entry = self.registry.get_mut(&id)?;
        if entry.generation != generation {
            return None;
        }
        entry.consecutive_failures =
            if success { 0 } else { entry.consecutive_failures.saturating_add(1) };
        Some(entry.consecutive_failures)
    }

    /// Move this registration to `state`; `false` if it no longer owns the entry
    fn set_state(&self, id: MonitorId, generation: u64, state: LoopState) -> bool {
        match self.registry.get_mut(&id) {
            Some(mut entry) if entry.generation == generation => {
                entry.state = state;
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventBus;
    use crate::testing::{MemoryStore, RecordingNotifier, ScriptedProber, definition};

    struct Harness {
        scheduler: MonitorScheduler,
        store: Arc<MemoryStore>,
        notifier: Arc<RecordingNotifier>,
        prober: Arc<ScriptedProber>,
        bus: EventBus,
    }

    fn harness(prober: Arc<ScriptedProber>) -> Harness {
        let store = MemoryStore::new();
        let notifier = RecordingNotifier::new();
        let bus = EventBus::new();
        let dispatcher = Arc::new(ProbeDispatcher::new(prober.clone(), prober.clone()));
        let scheduler =
            MonitorScheduler::new(store.clone(), dispatcher, Arc::new(bus.clone()), notifier.clone());
        Harness { scheduler, store, notifier, prober, bus }
    }

    /// Let spawned loops run everything that is ready without moving past real timers.
    async fn settle() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    async fn advance_secs(secs: u64) {
        tokio::time::sleep(Duration::from_secs(secs)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_probes_immediately_then_every_interval() {
        let h = harness(ScriptedProber::always(true));
        let mut events = h.bus.subscribe();
        h.store.put_monitor(definition(1, "https://a.io"));

        h.scheduler.register(definition(1, "https://a.io"));
        settle().await;

        assert_eq!(h.prober.call_count(), 1);
        let stored = h.store.results_for(1);
        assert_eq!(stored.len(), 1);
        assert!(stored[0].success);
        assert_eq!(stored[0].status_code, Some(200));
        assert_eq!(stored[0].error, None);
        assert_eq!(stored[0].latency, 50);
        assert_eq!(events.try_recv().unwrap().monitor_id, 1);
        assert_eq!(h.scheduler.state(1), Some(LoopState::Scheduled));

        advance_secs(9).await;
        assert_eq!(h.prober.call_count(), 1);

        advance_secs(1).await;
        settle().await;
        assert_eq!(h.prober.call_count(), 2);

        advance_secs(10).await;
        settle().await;
        assert_eq!(h.prober.call_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_register_twice_keeps_one_schedule_with_latest_definition() {
        let h = harness(ScriptedProber::always(true));
        h.store.put_monitor(definition(1, "https://old.io"));

        h.scheduler.register(definition(1, "https://old.io"));
        h.scheduler.register(definition(1, "https://new.io"));
        settle().await;

        assert_eq!(h.scheduler.count(), 1);

        advance_secs(10).await;
        settle().await;
        advance_secs(10).await;
        settle().await;

        // The replaced loop may have probed once before noticing; never again.
        let endpoints = h.prober.endpoints();
        let old = endpoints.iter().filter(|e| e.as_str() == "https://old.io").count();
        let new = endpoints.iter().filter(|e| e.as_str() == "https://new.io").count();
        assert!(old <= 1, "{endpoints:?}");
        assert_eq!(new, 3, "{endpoints:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_cycle_after_reregister_leaves_new_registration_alone() {
        let h = harness(ScriptedProber::slow(Duration::from_secs(5), false));
        let mut first = definition(1, "https://a.io");
        first.alert_threshold = 1;
        h.store.put_monitor(first.clone());

        h.scheduler.register(first);
        settle().await;
        assert_eq!(h.prober.call_count(), 1);

        // The first registration's request is still in flight.
        let mut second = definition(1, "https://a.io");
        second.alert_threshold = 2;
        h.store.put_monitor(second.clone());
        h.scheduler.register(second);
        settle().await;
        assert_eq!(h.prober.call_count(), 2);

        // Both requests complete; only the second registration may count its failure.
        advance_secs(6).await;
        settle().await;
        assert_eq!(h.scheduler.consecutive_failures(1), Some(1));
        assert_eq!(h.notifier.sent_count(), 0);
        assert_eq!(h.prober.call_count(), 2);

        advance_secs(10).await;
        settle().await;
        assert_eq!(h.scheduler.count(), 1);
        assert_eq!(h.prober.call_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_interval_is_refused() {
        let h = harness(ScriptedProber::always(true));
        let mut def = definition(1, "https://a.io");
        h.store.put_monitor(def.clone());
        assert!(h.scheduler.register(def.clone()));
        settle().await;

        def.interval = 0;
        h.store.put_monitor(def.clone());
        assert!(!h.scheduler.register(def));
        assert_eq!(h.scheduler.count(), 0);

        advance_secs(60).await;
        settle().await;
        assert_eq!(h.prober.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deleted_monitor_result_is_discarded() {
        let h = harness(ScriptedProber::always(false));
        let mut events = h.bus.subscribe();

        // Registered but absent from the store.
        h.scheduler.register(definition(1, "https://a.io"));
        settle().await;

        assert_eq!(h.prober.call_count(), 1);
        assert!(h.store.results().is_empty());
        assert!(events.try_recv().is_err());
        assert_eq!(h.scheduler.consecutive_failures(1), Some(0));
        assert_eq!(h.notifier.sent_count(), 0);

        // Still rescheduled while the entry exists.
        advance_secs(10).await;
        settle().await;
        assert_eq!(h.prober.call_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_streak_counts_and_resets() {
        let h = harness(ScriptedProber::scripted(&[false, false, true, false], true));
        let mut def = definition(1, "https://a.io");
        def.alert_threshold = 10;
        h.store.put_monitor(def.clone());

        h.scheduler.register(def);
        settle().await;
        assert_eq!(h.scheduler.consecutive_failures(1), Some(1));

        advance_secs(10).await;
        settle().await;
        assert_eq!(h.scheduler.consecutive_failures(1), Some(2));

        advance_secs(10).await;
        settle().await;
        assert_eq!(h.scheduler.consecutive_failures(1), Some(0));

        advance_secs(10).await;
        settle().await;
        assert_eq!(h.scheduler.consecutive_failures(1), Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_alert_fires_once_at_threshold_then_cools_down() {
        let h = harness(ScriptedProber::always(false));
        let def = definition(1, "https://a.io");
        assert_eq!(def.alert_threshold, 3);
        assert_eq!(def.alert_cooldown, 60_000);
        h.store.put_monitor(def.clone());

        h.scheduler.register(def);
        settle().await;
        advance_secs(10).await;
        settle().await;
        assert_eq!(h.notifier.sent_count(), 0);

        advance_secs(10).await;
        settle().await;
        assert_eq!(h.notifier.sent_count(), 1);
        let sent = h.notifier.sent();
        assert_eq!(sent[0].failure_count, 3);
        assert_eq!(h.store.last_alert_at(1), Some(sent[0].timestamp));

        // Wall-clock time barely moves under the paused test clock, so the cooldown holds.
        advance_secs(10).await;
        settle().await;
        assert_eq!(h.notifier.sent_count(), 1);
        assert_eq!(h.scheduler.consecutive_failures(1), Some(4));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_notification_is_retried_next_failure() {
        let h = harness(ScriptedProber::always(false));
        h.notifier.set_failing(true);
        let mut def = definition(1, "https://a.io");
        def.alert_threshold = 1;
        h.store.put_monitor(def.clone());

        h.scheduler.register(def);
        settle().await;
        assert_eq!(h.notifier.sent_count(), 1);
        assert_eq!(h.store.last_alert_at(1), None);

        h.notifier.set_failing(false);
        advance_secs(10).await;
        settle().await;
        assert_eq!(h.notifier.sent_count(), 2);
        assert!(h.store.last_alert_at(1).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unregister_stops_scheduling() {
        let h = harness(ScriptedProber::always(true));
        h.store.put_monitor(definition(1, "https://a.io"));

        h.scheduler.register(definition(1, "https://a.io"));
        settle().await;
        assert!(h.scheduler.unregister(1));
        assert!(!h.scheduler.unregister(1));
        assert_eq!(h.scheduler.count(), 0);
        assert_eq!(h.scheduler.state(1), None);

        advance_secs(60).await;
        settle().await;
        assert_eq!(h.prober.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unregister_during_probe_lets_it_finish_without_rescheduling() {
        let h = harness(ScriptedProber::slow(Duration::from_secs(5), true));
        h.store.put_monitor(definition(1, "https://a.io"));

        h.scheduler.register(definition(1, "https://a.io"));
        settle().await;
        assert_eq!(h.scheduler.state(1), Some(LoopState::Running));

        h.scheduler.unregister(1);
        advance_secs(60).await;
        settle().await;

        assert_eq!(h.prober.call_count(), 1);
        // The monitor still exists in the store, so its last result is kept.
        assert_eq!(h.store.results_for(1).len(), 1);
        assert_eq!(h.notifier.sent_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_store_delete_during_probe_drops_result() {
        let h = harness(ScriptedProber::slow(Duration::from_secs(5), true));
        let mut events = h.bus.subscribe();
        h.store.put_monitor(definition(1, "https://a.io"));

        h.scheduler.register(definition(1, "https://a.io"));
        settle().await;

        h.store.remove_monitor(1);
        h.scheduler.unregister(1);
        advance_secs(60).await;
        settle().await;

        assert!(h.store.results().is_empty());
        assert!(events.try_recv().is_err());
        assert_eq!(h.prober.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cycle_error_still_reschedules() {
        let h = harness(ScriptedProber::always(true));
        h.store.put_monitor(definition(1, "https://a.io"));
        h.store.set_failing_writes(true);

        h.scheduler.register(definition(1, "https://a.io"));
        settle().await;
        assert_eq!(h.prober.call_count(), 1);
        assert_eq!(h.scheduler.state(1), Some(LoopState::Scheduled));

        h.store.set_failing_writes(false);
        advance_secs(10).await;
        settle().await;
        assert_eq!(h.prober.call_count(), 2);
        assert_eq!(h.store.results_for(1).len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_monitors_run_independently() {
        let h = harness(ScriptedProber::always(true));
        let mut fast = definition(1, "https://fast.io");
        fast.interval = 5;
        let slow = definition(2, "https://slow.io");
        h.store.put_monitor(fast.clone());
        h.store.put_monitor(slow.clone());

        h.scheduler.register(fast);
        h.scheduler.register(slow);
        settle().await;
        advance_secs(10).await;
        settle().await;

        assert_eq!(h.store.results_for(1).len(), 3);
        assert_eq!(h.store.results_for(2).len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bootstrap_registers_stored_monitors() {
        let h = harness(ScriptedProber::always(true));
        h.store.put_monitor(definition(1, "https://a.io"));
        h.store.put_monitor(definition(2, "wss://b.io/ws"));

        assert_eq!(h.scheduler.bootstrap().await.unwrap(), 2);
        settle().await;

        assert_eq!(h.scheduler.count(), 2);
        assert_eq!(h.prober.call_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_all_clears_registry() {
        let h = harness(ScriptedProber::always(true));
        for id in 1..=3 {
            h.store.put_monitor(definition(id, "https://a.io"));
            h.scheduler.register(definition(id, "https://a.io"));
        }
        settle().await;
        assert_eq!(h.scheduler.count(), 3);

        h.scheduler.shutdown().await;
        assert_eq!(h.scheduler.count(), 0);

        advance_secs(60).await;
        settle().await;
        assert_eq!(h.prober.call_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unsupported_scheme_is_stored_as_failure() {
        let h = harness(ScriptedProber::always(true));
        h.store.put_monitor(definition(1, "ftp://files.example.com"));

        h.scheduler.register(definition(1, "ftp://files.example.com"));
        settle().await;

        assert_eq!(h.prober.call_count(), 0);
        let stored = h.store.results_for(1);
        assert_eq!(stored.len(), 1);
        assert!(!stored[0].success);
        assert_eq!(stored[0].error.as_deref(), Some("Unsupported protocol"));
        assert_eq!(stored[0].latency, 0);
    }
}
