use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use super::{AlertNotifier, AlertPayload, NotifyError};
use crate::database::AlertRecipients;

/// Body POSTed to the alert webhook
#[derive(Debug, Serialize)]
struct WebhookMessage<'a> {
    to: &'a [String],
    subject: String,
    text: String,
    payload: &'a AlertPayload,
}

/// Delivers alerts by POSTing them as JSON to a relay (mail gateway, chat hook, ...)
pub struct WebhookNotifier {
    client: Client,
    url: Url,
    recipients: Arc<dyn AlertRecipients>,
}

impl WebhookNotifier {
    pub fn new(
        url: &str,
        request_timeout: Duration,
        recipients: Arc<dyn AlertRecipients>,
    ) -> Result<Self, NotifyError> {
        let url = Url::parse(url)
            .map_err(|e| NotifyError::InvalidConfiguration(format!("Invalid webhook URL: {e}")))?;
        let client = Client::builder().timeout(request_timeout).build()?;

        Ok(Self { client, url, recipients })
    }
}

#[async_trait]
impl AlertNotifier for WebhookNotifier {
    async fn send(&self, payload: &AlertPayload) -> Result<(), NotifyError> {
        let recipients = self.recipients.alert_emails().await.map_err(NotifyError::Recipients)?;
        if recipients.is_empty() {
            warn!(monitor_id = payload.monitor_id, "No alert recipients configured, alert not sent");
            return Ok(());
        }

        let message = WebhookMessage {
            to: &recipients,
            subject: payload.subject(),
            text: payload.text(),
            payload,
        };

        let response = self.client.post(self.url.clone()).json(&message).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(NotifyError::Rejected { status: status.as_u16(), body });
        }

        info!(monitor_id = payload.monitor_id, recipients = recipients.len(), "Alert sent");
        Ok(())
    }
}
