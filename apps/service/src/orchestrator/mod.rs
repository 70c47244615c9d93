/// Orchestrator module - coordinates all components
///
/// The orchestrator is the core coordinator that:
/// - Opens the database and applies migrations
/// - Builds the store, event bus, notifier and scheduler
/// - Bootstraps monitors and keeps them in sync with the store
/// - Shuts everything down on Ctrl-C or SIGTERM
pub mod reconcile;
pub mod retention;

pub use reconcile::{ReconcileReport, StoreReconciler};
pub use retention::{RetentionCleanup, RetentionPolicy};

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::database::{AlertRecipients, LibsqlStore, MonitorStore, initialize_database};
use crate::events::EventBus;
use crate::monitoring::checker::install_crypto_provider;
use crate::monitoring::{MonitorScheduler, ProbeDispatcher};
use crate::notifications::{AlertNotifier, DisabledNotifier, WebhookNotifier};
use crate::pool::open_pool;

/// Main orchestrator for the Koala service
pub struct Orchestrator {
    scheduler: MonitorScheduler,
    bus: EventBus,
    reconciler: Option<StoreReconciler>,
    reload_interval: Duration,
    task_handles: Vec<JoinHandle<()>>,
}

impl Orchestrator {
    /// Create and start a new orchestrator
    /// This is a convenience method that creates and immediately runs the orchestrator
    pub async fn start(config: Config) -> Result<()> {
        let orchestrator = Self::new(&config).await?;
        orchestrator.run().await
    }

    /// Create a new orchestrator instance
    async fn new(config: &Config) -> Result<Self> {
        info!("Opening database at {}", config.database.path.display());
        let pool = open_pool(&config.database.path).await?;

        {
            let conn = pool.get().await?;
            info!("Initializing database schema...");
            initialize_database(&conn).await?;
        }

        let store = LibsqlStore::new(pool);
        let bus = EventBus::new();
        let notifier = build_notifier(config, &store)?;
        install_crypto_provider();
        let dispatcher = Arc::new(ProbeDispatcher::with_default_probers()?);

        let policy = RetentionPolicy::from(&config.retention);
        info!(
            "Retention policy: {} results per monitor, every {}h",
            policy.max_results_per_monitor, policy.interval_hours
        );
        let cleanup = RetentionCleanup::new(store.clone(), policy);

        let shared_store: Arc<dyn MonitorStore> = Arc::new(store);
        let scheduler = MonitorScheduler::with_cleanup(
            shared_store.clone(),
            dispatcher,
            Arc::new(bus.clone()),
            notifier,
            cleanup,
        );

        let reload_interval = Duration::from_secs(config.scheduler.reload_interval_seconds);
        let reconciler = if reload_interval.is_zero() {
            info!("Store reconciliation disabled");
            None
        } else {
            Some(StoreReconciler::new(shared_store, scheduler.clone()))
        };

        Ok(Self { scheduler, bus, reconciler, reload_interval, task_handles: Vec::new() })
    }

    /// Run the orchestrator until a shutdown signal arrives
    async fn run(mut self) -> Result<()> {
        info!("Starting Koala orchestrator...");

        self.task_handles.push(spawn_result_logger(&self.bus));
        debug!("Event bus has {} subscribers", self.bus.subscriber_count());

        let count = self.scheduler.bootstrap().await?;
        info!("Scheduled {} monitors", count);

        if let Some(mut reconciler) = self.reconciler.take() {
            // Adopt the bootstrapped definitions so the first pass only reports real changes.
            if let Err(e) = reconciler.reconcile_once().await {
                warn!("Initial reconciliation failed: {:#}", e);
            }
            self.task_handles.push(reconciler.spawn(self.reload_interval));
        }

        info!("Orchestrator started successfully - waiting for shutdown signal");
        wait_for_shutdown().await;

        info!("Shutting down...");
        for handle in self.task_handles.drain(..) {
            handle.abort();
        }
        self.scheduler.shutdown().await;
        info!("Shutdown complete");

        Ok(())
    }
}

fn build_notifier(config: &Config, store: &LibsqlStore) -> Result<Arc<dyn AlertNotifier>> {
    match &config.alerts.webhook_url {
        Some(url) => {
            let recipients: Arc<dyn AlertRecipients> = Arc::new(store.clone());
            let timeout = Duration::from_secs(config.alerts.request_timeout_seconds);
            info!("Alerts will be delivered to {}", url);
            Ok(Arc::new(WebhookNotifier::new(url, timeout, recipients)?))
        }
        None => {
            warn!("No alert webhook configured - alerts will only be logged");
            Ok(Arc::new(DisabledNotifier))
        }
    }
}

/// Log every probe outcome published on the bus
fn spawn_result_logger(bus: &EventBus) -> JoinHandle<()> {
    let mut rx = bus.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => debug!(
                    "Monitor {} - success: {} - status: {:?} - latency: {}ms",
                    event.monitor_id, event.success, event.status_code, event.latency
                ),
                Err(RecvError::Lagged(skipped)) => warn!("Result logger lagged, skipped {} events", skipped),
                Err(RecvError::Closed) => break,
            }
        }
    })
}

async fn wait_for_shutdown() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Ctrl+C received"),
        _ = terminate => info!("SIGTERM received"),
    }
}
