/// Database layer
///
/// Durable storage of monitor definitions, probe results and alert settings
/// on a local LibSQL (SQLite) file. The scheduler only sees the
/// [`MonitorStore`] and [`AlertRecipients`] traits.
pub mod migrations;
pub mod models;
pub mod repository;
pub mod settings;

pub use repository::{AlertRecipients, LibsqlStore, MonitorStore};

use anyhow::Result;

/// Initialize database with schema
pub async fn initialize_database(conn: &libsql::Connection) -> Result<()> {
    migrations::run_migrations(conn).await
}
