use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

use super::checker::{HttpProber, Prober, WebSocketProber};
use super::types::{MonitorDefinition, ProbeResult};

/// Extra time granted on top of the interval before a probe is abandoned.
const PROBE_GRACE_MS: u64 = 7_000;

/// Upper bound for any single probe.
const MAX_PROBE_TIMEOUT_MS: u64 = 28_000;

/// Timeout for a probe of a monitor running every `interval_seconds`.
///
/// `min(interval * 1000 + 7000, 28000)` milliseconds.
pub fn probe_timeout(interval_seconds: u64) -> Duration {
    let millis = interval_seconds
        .saturating_mul(1_000)
        .saturating_add(PROBE_GRACE_MS)
        .min(MAX_PROBE_TIMEOUT_MS);
    Duration::from_millis(millis)
}

/// Probe dispatcher - routes a monitor to the prober for its endpoint scheme
pub struct ProbeDispatcher {
    http: Arc<dyn Prober>,
    websocket: Arc<dyn Prober>,
}

impl ProbeDispatcher {
    pub fn new(http: Arc<dyn Prober>, websocket: Arc<dyn Prober>) -> Self {
        Self { http, websocket }
    }

    /// Dispatcher backed by the real HTTP and WebSocket probers
    pub fn with_default_probers() -> Result<Self> {
        Ok(Self::new(Arc::new(HttpProber::new()?), Arc::new(WebSocketProber)))
    }

    /// Execute one probe for `definition`
    pub async fn probe(&self, definition: &MonitorDefinition) -> ProbeResult {
        let url = match Url::parse(&definition.endpoint) {
            Ok(url) => url,
            Err(e) => return ProbeResult::failure(format!("Invalid URL: {e}"), None, 0),
        };

        let timeout = probe_timeout(definition.interval);

        match url.scheme() {
            "http" | "https" => self.http.probe(definition, timeout).await,
            "ws" | "wss" => self.websocket.probe(definition, timeout).await,
            _ => ProbeResult::unsupported_protocol(),
        }
    }
}
