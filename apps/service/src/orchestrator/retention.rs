//! Automatic retention and cleanup of probe results.
//!
//! Each monitor keeps its newest `max_results_per_monitor` results; older rows and
//! rows left behind by deleted monitors are removed. Cleanup runs once at startup
//! and then every `interval_hours` as a background task.

use anyhow::Result;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::RetentionConfig;
use crate::database::LibsqlStore;

/// Retention policy for stored results
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetentionPolicy {
    /// Results kept per monitor
    pub max_results_per_monitor: usize,
    /// Hours between cleanup runs
    pub interval_hours: u64,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self { max_results_per_monitor: 10_000, interval_hours: 24 }
    }
}

impl From<&RetentionConfig> for RetentionPolicy {
    fn from(config: &RetentionConfig) -> Self {
        Self {
            max_results_per_monitor: config.max_results_per_monitor,
            interval_hours: config.interval_hours,
        }
    }
}

impl RetentionPolicy {
    /// Time between cleanup runs, never shorter than an hour
    fn period(&self) -> Duration {
        Duration::from_secs(self.interval_hours.max(1).saturating_mul(3600))
    }
}

/// Cleanup manager for surplus results
#[derive(Clone)]
pub struct RetentionCleanup {
    store: LibsqlStore,
    policy: RetentionPolicy,
}

impl RetentionCleanup {
    pub fn new(store: LibsqlStore, policy: RetentionPolicy) -> Self {
        Self { store, policy }
    }

    /// Prune every monitor down to the policy limit. Returns rows deleted.
    pub async fn cleanup_results(&self) -> Result<u64> {
        debug!(keep = self.policy.max_results_per_monitor, "Starting retention cleanup");

        let deleted = self.store.prune_results(self.policy.max_results_per_monitor).await?;

        info!("Retention cleanup completed: {} results deleted", deleted);
        Ok(deleted)
    }

    /// Start background cleanup task (runs immediately, then every `interval_hours`)
    pub fn start_periodic_cleanup(&self) -> tokio::task::JoinHandle<()> {
        let cleanup = self.clone();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(cleanup.policy.period());

            loop {
                interval.tick().await;

                if let Err(e) = cleanup.cleanup_results().await {
                    warn!("Periodic results cleanup failed: {:#}", e);
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::models::{NewMonitor, NewResult};
    use crate::database::{MonitorStore, initialize_database};
    use crate::monitoring::types::ProbeResult;
    use crate::pool::open_pool;
    use chrono::{Duration as ChronoDuration, Utc};

    #[test]
    fn test_retention_policy_defaults() {
        let policy = RetentionPolicy::default();
        assert_eq!(policy.max_results_per_monitor, 10_000);
        assert_eq!(policy.interval_hours, 24);
        assert_eq!(policy.period(), Duration::from_secs(24 * 3600));
    }

    #[test]
    fn test_zero_interval_is_clamped_to_an_hour() {
        let policy = RetentionPolicy { max_results_per_monitor: 5, interval_hours: 0 };
        assert_eq!(policy.period(), Duration::from_secs(3600));
    }

    #[test]
    fn test_policy_from_config() {
        let config = RetentionConfig { max_results_per_monitor: 50, interval_hours: 6 };
        assert_eq!(
            RetentionPolicy::from(&config),
            RetentionPolicy { max_results_per_monitor: 50, interval_hours: 6 }
        );
    }

    #[tokio::test]
    async fn test_cleanup_keeps_newest_results() {
        let dir = tempfile::tempdir().unwrap();
        let pool = open_pool(&dir.path().join("koala.db")).await.unwrap();
        let conn = pool.get().await.unwrap();
        initialize_database(&conn).await.unwrap();
        drop(conn);
        let store = LibsqlStore::new(pool);

        let monitor = store
            .insert_monitor(&NewMonitor::new("https://a.io", "GET", 200, 30))
            .await
            .unwrap();
        let start = Utc::now() - ChronoDuration::minutes(10);
        for i in 0..5 {
            let at = start + ChronoDuration::seconds(i);
            let probe = ProbeResult::response(true, Some(200), i as u64);
            store.insert_result(&NewResult::from_probe(monitor.id, at, &probe)).await.unwrap();
        }

        let cleanup =
            RetentionCleanup::new(store.clone(), RetentionPolicy { max_results_per_monitor: 2, interval_hours: 1 });
        assert_eq!(cleanup.cleanup_results().await.unwrap(), 3);

        let remaining = store.recent_results(monitor.id, 10).await.unwrap();
        assert_eq!(remaining.iter().map(|r| r.latency).collect::<Vec<_>>(), vec![3, 4]);

        assert_eq!(cleanup.cleanup_results().await.unwrap(), 0);
    }
}
