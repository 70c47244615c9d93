use anyhow::{Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Row, Value, params};
use std::collections::BTreeMap;
use tracing::error;

use super::models::{NewMonitor, NewResult, StoredResult, from_millis, to_millis};
use super::settings::normalize_alert_emails;
use crate::monitoring::types::{MonitorDefinition, MonitorId};
use crate::pool::LibsqlPool;

/// Most results returned by [`LibsqlStore::recent_results`].
pub const MAX_RESULTS_PAGE: usize = 100;

const MONITOR_COLUMNS: &str = "id, endpoint, method, expected_status, interval, headers, body, \
                               alert_threshold, alert_cooldown, last_alert_at";

/// Durable store of monitor definitions and probe results, as used by the scheduler
#[async_trait]
pub trait MonitorStore: Send + Sync {
    /// Get a monitor by id
    async fn get_monitor(&self, id: MonitorId) -> Result<Option<MonitorDefinition>>;

    /// All monitors, newest first
    async fn list_monitors(&self) -> Result<Vec<MonitorDefinition>>;

    /// Save a probe result
    async fn insert_result(&self, result: &NewResult) -> Result<()>;

    /// Record when the last alert for a monitor was dispatched
    async fn set_last_alert_at(&self, id: MonitorId, at: DateTime<Utc>) -> Result<()>;
}

/// Source of alert recipient addresses, read at send time
#[async_trait]
pub trait AlertRecipients: Send + Sync {
    async fn alert_emails(&self) -> Result<Vec<String>>;
}

/// LibSQL-backed store
#[derive(Clone)]
pub struct LibsqlStore {
    pool: LibsqlPool,
}

impl LibsqlStore {
    pub fn new(pool: LibsqlPool) -> Self {
        Self { pool }
    }

    async fn get_conn(&self) -> Result<deadpool::managed::Object<crate::pool::LibsqlManager>> {
        Ok(self.pool.get().await?)
    }

    /// Create a monitor and return the stored definition
    pub async fn insert_monitor(&self, monitor: &NewMonitor) -> Result<MonitorDefinition> {
        validate_interval(monitor.interval)?;
        let conn = self.get_conn().await?;

        conn.execute(
            "INSERT INTO monitors (endpoint, method, expected_status, interval, headers, body, alert_threshold, alert_cooldown, created_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                monitor.endpoint.clone(),
                monitor.method.clone(),
                monitor.expected_status as i64,
                monitor.interval as i64,
                headers_to_value(monitor.headers.as_ref())?,
                body_to_value(monitor.body.as_ref())?,
                monitor.threshold() as i64,
                monitor.cooldown() as i64,
                to_millis(Utc::now())
            ],
        )
        .await?;

        let id = conn.last_insert_rowid();
        drop(conn);

        self.get_monitor(id)
            .await?
            .ok_or_else(|| anyhow!("Monitor {id} vanished right after insertion"))
    }

    /// Replace a monitor's definition; `None` if no such monitor exists.
    ///
    /// Alert state (`last_alert_at`) is kept.
    pub async fn update_monitor(&self, id: MonitorId, monitor: &NewMonitor) -> Result<Option<MonitorDefinition>> {
        validate_interval(monitor.interval)?;
        let conn = self.get_conn().await?;

        let changed = conn
            .execute(
                "UPDATE monitors SET endpoint = ?, method = ?, expected_status = ?, interval = ?, headers = ?, body = ?, alert_threshold = ?, alert_cooldown = ? WHERE id = ?",
                params![
                    monitor.endpoint.clone(),
                    monitor.method.clone(),
                    monitor.expected_status as i64,
                    monitor.interval as i64,
                    headers_to_value(monitor.headers.as_ref())?,
                    body_to_value(monitor.body.as_ref())?,
                    monitor.threshold() as i64,
                    monitor.cooldown() as i64,
                    id
                ],
            )
            .await?;
        drop(conn);

        if changed == 0 {
            return Ok(None);
        }
        self.get_monitor(id).await
    }

    /// Delete a monitor and its results; `false` if it did not exist
    pub async fn delete_monitor(&self, id: MonitorId) -> Result<bool> {
        let conn = self.get_conn().await?;

        conn.execute("DELETE FROM results WHERE monitor_id = ?", params![id]).await?;
        let changed = conn.execute("DELETE FROM monitors WHERE id = ?", params![id]).await?;
        Ok(changed > 0)
    }

    /// Latest results for a monitor, returned oldest first.
    ///
    /// `limit` is clamped to `1..=MAX_RESULTS_PAGE`.
    pub async fn recent_results(&self, id: MonitorId, limit: usize) -> Result<Vec<StoredResult>> {
        let limit = limit.clamp(1, MAX_RESULTS_PAGE);
        let conn = self.get_conn().await?;
        let mut rows = conn
            .query(
                "SELECT id, monitor_id, timestamp, latency, status_code, success, error FROM results WHERE monitor_id = ? ORDER BY timestamp DESC, id DESC LIMIT ?",
                params![id, limit as i64],
            )
            .await?;

        let mut results = Vec::new();
        while let Some(row) = rows.next().await? {
            results.push(StoredResult {
                id: row.get(0)?,
                monitor_id: row.get(1)?,
                timestamp: from_millis(row.get(2)?),
                latency: row.get::<i64>(3)?.max(0) as u64,
                status_code: row.get::<Option<i64>>(4)?.map(|v| v as u16),
                success: row.get::<i64>(5)? != 0,
                error: row.get(6)?,
            });
        }

        results.reverse();
        Ok(results)
    }

    /// Keep only the newest `keep` results of every monitor and drop orphaned results.
    ///
    /// Returns the number of deleted rows.
    pub async fn prune_results(&self, keep: usize) -> Result<u64> {
        let conn = self.get_conn().await?;

        let mut deleted = conn
            .execute("DELETE FROM results WHERE monitor_id NOT IN (SELECT id FROM monitors)", ())
            .await?;

        let mut rows = conn.query("SELECT id FROM monitors", ()).await?;
        let mut ids: Vec<i64> = Vec::new();
        while let Some(row) = rows.next().await? {
            ids.push(row.get(0)?);
        }
        drop(rows);

        for id in ids {
            deleted += conn
                .execute(
                    "DELETE FROM results WHERE monitor_id = ? AND id NOT IN (SELECT id FROM results WHERE monitor_id = ? ORDER BY timestamp DESC, id DESC LIMIT ?)",
                    params![id, id, keep as i64],
                )
                .await?;
        }

        Ok(deleted)
    }

    /// Replace the alert recipient list, returning the normalized addresses
    pub async fn update_alert_emails(&self, emails: &[String]) -> Result<Vec<String>> {
        let normalized = normalize_alert_emails(emails)?;
        let conn = self.get_conn().await?;

        conn.execute(
            "INSERT INTO settings (id, alert_emails) VALUES (1, ?) ON CONFLICT(id) DO UPDATE SET alert_emails = excluded.alert_emails",
            params![serde_json::to_string(&normalized)?],
        )
        .await?;

        Ok(normalized)
    }
}

#[async_trait]
impl MonitorStore for LibsqlStore {
    async fn get_monitor(&self, id: MonitorId) -> Result<Option<MonitorDefinition>> {
        let conn = self.get_conn().await?;
        let mut rows = conn
            .query(&format!("SELECT {MONITOR_COLUMNS} FROM monitors WHERE id = ?"), params![id])
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(monitor_from_row(&row)?)),
            None => Ok(None),
        }
    }

    async fn list_monitors(&self) -> Result<Vec<MonitorDefinition>> {
        let conn = self.get_conn().await?;
        let mut rows = conn
            .query(
                &format!("SELECT {MONITOR_COLUMNS} FROM monitors ORDER BY created_at DESC, id DESC"),
                (),
            )
            .await?;

        let mut monitors = Vec::new();
        while let Some(row) = rows.next().await? {
            // One malformed row written by another process must not hide the rest.
            match monitor_from_row(&row) {
                Ok(monitor) => monitors.push(monitor),
                Err(e) => error!(
                    monitor_id = row.get::<i64>(0).ok(),
                    "Skipping undecodable monitor: {:#}", e
                ),
            }
        }

        Ok(monitors)
    }

    async fn insert_result(&self, result: &NewResult) -> Result<()> {
        let conn = self.get_conn().await?;

        conn.execute(
            "INSERT INTO results (monitor_id, timestamp, latency, status_code, success, error) VALUES (?, ?, ?, ?, ?, ?)",
            params![
                result.monitor_id,
                to_millis(result.timestamp),
                result.latency as i64,
                result.status_code.map(|v| v as i64),
                if result.success { 1 } else { 0 },
                result.error.clone()
            ],
        )
        .await?;

        Ok(())
    }

    async fn set_last_alert_at(&self, id: MonitorId, at: DateTime<Utc>) -> Result<()> {
        let conn = self.get_conn().await?;

        conn.execute(
            "UPDATE monitors SET last_alert_at = ? WHERE id = ?",
            params![to_millis(at), id],
        )
        .await?;

        Ok(())
    }
}

#[async_trait]
impl AlertRecipients for LibsqlStore {
    async fn alert_emails(&self) -> Result<Vec<String>> {
        let conn = self.get_conn().await?;
        let mut rows = conn.query("SELECT alert_emails FROM settings WHERE id = 1", ()).await?;

        match rows.next().await? {
            Some(row) => {
                let raw: String = row.get(0)?;
                Ok(serde_json::from_str(&raw)?)
            }
            None => Ok(Vec::new()),
        }
    }
}

fn validate_interval(interval: u64) -> Result<()> {
    if interval == 0 {
        return Err(anyhow!("Monitor interval must be a positive number of seconds"));
    }
    Ok(())
}

fn headers_to_value(headers: Option<&BTreeMap<String, String>>) -> Result<Value> {
    Ok(match headers {
        Some(headers) => Value::Text(serde_json::to_string(headers)?),
        None => Value::Null,
    })
}

fn body_to_value(body: Option<&serde_json::Value>) -> Result<Value> {
    Ok(match body {
        Some(body) => Value::Text(serde_json::to_string(body)?),
        None => Value::Null,
    })
}

/// Decode a stored header object. Non-string values are sent in their JSON form; nulls are dropped.
fn headers_from_json(raw: &str) -> Result<BTreeMap<String, String>> {
    let object = serde_json::from_str::<serde_json::Map<String, serde_json::Value>>(raw)?;
    Ok(object
        .into_iter()
        .filter_map(|(name, value)| match value {
            serde_json::Value::Null => None,
            serde_json::Value::String(text) => Some((name, text)),
            other => Some((name, other.to_string())),
        })
        .collect())
}

fn monitor_from_row(row: &Row) -> Result<MonitorDefinition> {
    let id: MonitorId = row.get(0)?;
    let interval = u64::try_from(row.get::<i64>(4)?)
        .ok()
        .filter(|interval| *interval > 0)
        .ok_or_else(|| anyhow!("Monitor {id} has a non-positive interval"))?;
    let headers = row
        .get::<Option<String>>(5)?
        .map(|raw| headers_from_json(&raw))
        .transpose()?;
    let body = row
        .get::<Option<String>>(6)?
        .map(|raw| serde_json::from_str::<serde_json::Value>(&raw))
        .transpose()?;

    Ok(MonitorDefinition {
        id,
        endpoint: row.get(1)?,
        method: row.get(2)?,
        expected_status: row.get::<i64>(3)? as u16,
        interval,
        headers,
        body,
        alert_threshold: crate::monitoring::types::normalize_alert_threshold(Some(row.get(7)?)),
        alert_cooldown: crate::monitoring::types::normalize_alert_cooldown(Some(row.get(8)?)),
        last_alert_at: row.get::<Option<i64>>(9)?.map(from_millis),
    })
}
