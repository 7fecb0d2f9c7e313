use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use tracing::{debug, warn};
use url::Url;

use super::{Notification, Notifier};
use crate::config::NotificationConfig;

/// Hands notifications to an external relay that fans out to email and push.
pub struct RelayNotifier {
    client: Client,
    relay_url: Url,
    max_attempts: u32,
    initial_backoff: Duration,
}

impl RelayNotifier {
    /// Returns `None` when no relay is configured.
    pub fn from_config(config: &NotificationConfig) -> anyhow::Result<Option<Self>> {
        let Some(relay_url) = &config.relay_url else {
            return Ok(None);
        };
        let client = Client::builder().timeout(Duration::from_secs(10)).build()?;
        Ok(Some(Self {
            client,
            relay_url: Url::parse(relay_url)?,
            max_attempts: config.max_attempts.max(1),
            initial_backoff: Duration::from_millis(500),
        }))
    }

    pub fn with_initial_backoff(mut self, backoff: Duration) -> Self {
        self.initial_backoff = backoff;
        self
    }

    fn redacted_target(&self) -> String {
        format!(
            "{}://{}",
            self.relay_url.scheme(),
            self.relay_url.host_str().unwrap_or("unknown")
        )
    }
}

#[async_trait]
impl Notifier for RelayNotifier {
    async fn notify(&self, notification: &Notification) -> anyhow::Result<()> {
        let payload = json!({
            "user_id": notification.user_id,
            "kind": notification.kind,
            "title": notification.title,
            "body": notification.body,
            "payload": notification.payload,
            "channels": ["email", "push"],
        });

        let mut delay = self.initial_backoff;
        for attempt in 1..=self.max_attempts {
            match self
                .client
                .post(self.relay_url.clone())
                .json(&payload)
                .send()
                .await
            {
                Ok(response) if response.status().is_success() => {
                    debug!(
                        target_host = %self.redacted_target(),
                        kind = notification.kind.as_str(),
                        attempt,
                        "Notification relayed"
                    );
                    return Ok(());
                }
                Ok(response) => {
                    warn!(
                        status = %response.status(),
                        target_host = %self.redacted_target(),
                        attempt,
                        "Notification relay returned an error status"
                    );
                    if attempt == self.max_attempts {
                        anyhow::bail!(
                            "relay failed after {} attempts with status {}",
                            attempt,
                            response.status()
                        );
                    }
                }
                Err(err) => {
                    warn!(
                        error = %err,
                        target_host = %self.redacted_target(),
                        attempt,
                        "Notification relay request failed"
                    );
                    if attempt == self.max_attempts {
                        anyhow::bail!("relay failed after {} attempts: {}", attempt, err);
                    }
                }
            }

            tokio::time::sleep(delay).await;
            delay *= 2;
        }

        Ok(())
    }
}
