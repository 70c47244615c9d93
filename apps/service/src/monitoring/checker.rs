use anyhow::Result;
use reqwest::Method;
use std::time::Duration;
use tokio::time::{Instant, timeout};
use tracing::debug;

use super::types::{MonitorDefinition, ProbeResult};

/// How long a successfully opened WebSocket is given to close cleanly in the background.
const WS_CLOSE_GRACE: Duration = Duration::from_secs(5);

/// Protocol-specific probe of a single endpoint
#[async_trait::async_trait]
pub trait Prober: Send + Sync {
    /// Probe `definition.endpoint`, giving up after `timeout`.
    ///
    /// Failures are reported through the returned result, never as errors.
    async fn probe(&self, definition: &MonitorDefinition, timeout: Duration) -> ProbeResult;
}

fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}

/// HTTP/HTTPS prober
pub struct HttpProber {
    client: reqwest::Client,
}

impl HttpProber {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("koala/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self { client })
    }
}

#[async_trait::async_trait]
impl Prober for HttpProber {
    async fn probe(&self, definition: &MonitorDefinition, timeout: Duration) -> ProbeResult {
        let method = match Method::from_bytes(definition.method.to_uppercase().as_bytes()) {
            Ok(method) => method,
            Err(_) => {
                return ProbeResult::failure(
                    format!("Invalid HTTP method: {}", definition.method),
                    None,
                    0,
                );
            }
        };

        let mut request = self.client.request(method, &definition.endpoint).timeout(timeout);

        if let Some(headers) = &definition.headers {
            for (name, value) in headers {
                request = request.header(name.as_str(), value.as_str());
            }
        }

        request = match &definition.body {
            Some(serde_json::Value::String(raw)) => request.body(raw.clone()),
            Some(body) => request.json(body),
            None => request,
        };

        let start = Instant::now();

        match request.send().await {
            Ok(response) => {
                let latency = elapsed_ms(start);
                let status = response.status();
                let status_code = status.as_u16();

                // Non-2xx responses are transport errors even when they match expected_status.
                if !status.is_success() {
                    ProbeResult::failure(
                        format!("Request failed with status code {status_code}"),
                        Some(status_code),
                        latency,
                    )
                } else {
                    ProbeResult::response(status_code == definition.expected_status, Some(status_code), latency)
                }
            }
            Err(e) => {
                let latency = elapsed_ms(start);
                let status_code = e.status().map(|status| status.as_u16());
                let error = if e.is_timeout() {
                    format!("timeout of {}ms exceeded", timeout.as_millis())
                } else {
                    e.to_string()
                };
                debug!(endpoint = %definition.endpoint, error = %error, "HTTP probe failed");
                ProbeResult::failure(error, status_code, latency)
            }
        }
    }
}

/// Install the process-wide rustls crypto provider if nothing has yet.
///
/// `wss://` handshakes panic without one.
pub fn install_crypto_provider() {
    if rustls::crypto::CryptoProvider::get_default().is_none() {
        // Losing the race to another installer is fine.
        let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
    }
}

/// WebSocket prober: succeeds as soon as the opening handshake completes
pub struct WebSocketProber;

#[async_trait::async_trait]
impl Prober for WebSocketProber {
    async fn probe(&self, definition: &MonitorDefinition, timeout_duration: Duration) -> ProbeResult {
        install_crypto_provider();
        let start = Instant::now();

        // Dropping the connect future on timeout tears the attempt down.
        match timeout(timeout_duration, tokio_tungstenite::connect_async(definition.endpoint.as_str()))
            .await
        {
            Ok(Ok((mut stream, _response))) => {
                let latency = elapsed_ms(start);
                tokio::spawn(async move {
                    let _ = timeout(WS_CLOSE_GRACE, stream.close(None)).await;
                });
                ProbeResult::response(true, None, latency)
            }
            Ok(Err(e)) => {
                let latency = elapsed_ms(start);
                debug!(endpoint = %definition.endpoint, error = %e, "WebSocket probe failed");
                ProbeResult::failure(e.to_string(), None, latency)
            }
            Err(_) => ProbeResult::failure("Connection timeout", None, elapsed_ms(start)),
        }
    }
}
