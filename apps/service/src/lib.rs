//! Koala uptime monitor service.
//!
//! Probes HTTP(S) and WebSocket endpoints on per-monitor intervals, stores every
//! outcome, broadcasts it to live observers and alerts after repeated failures.

pub mod config;
pub mod database;
pub mod events;
pub mod monitoring;
pub mod notifications;
pub mod orchestrator;
pub mod pool;

#[cfg(test)]
mod testing;
