//! # Notifications
//!
//! Fire-and-forget user notifications about completions and payouts. Delivery
//! failures are logged and never change the outcome of the operation that
//! triggered them.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value as JsonValue;
use tracing::warn;
use uuid::Uuid;

mod in_app;
mod relay;

pub use in_app::InAppNotifier;
pub use relay::RelayNotifier;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    CompletionSubmitted,
    CompletionApproved,
    CompletionDisputed,
    PaymentReleased,
    PayoutSent,
    PayoutFailed,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::CompletionSubmitted => "completion_submitted",
            NotificationKind::CompletionApproved => "completion_approved",
            NotificationKind::CompletionDisputed => "completion_disputed",
            NotificationKind::PaymentReleased => "payment_released",
            NotificationKind::PayoutSent => "payout_sent",
            NotificationKind::PayoutFailed => "payout_failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    pub user_id: Uuid,
    pub kind: NotificationKind,
    pub title: String,
    pub body: String,
    pub payload: Option<JsonValue>,
}

impl Notification {
    pub fn new(
        user_id: Uuid,
        kind: NotificationKind,
        title: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            user_id,
            kind,
            title: title.into(),
            body: body.into(),
            payload: None,
        }
    }

    pub fn with_payload(mut self, payload: JsonValue) -> Self {
        self.payload = Some(payload);
        self
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: &Notification) -> anyhow::Result<()>;
}

/// Delivers to every channel; one channel failing does not stop the others.
pub struct FanoutNotifier {
    channels: Vec<Arc<dyn Notifier>>,
}

impl FanoutNotifier {
    pub fn new(channels: Vec<Arc<dyn Notifier>>) -> Self {
        Self { channels }
    }
}

#[async_trait]
impl Notifier for FanoutNotifier {
    async fn notify(&self, notification: &Notification) -> anyhow::Result<()> {
        let mut failures = 0usize;
        for channel in &self.channels {
            if let Err(err) = channel.notify(notification).await {
                failures += 1;
                warn!(
                    error = %err,
                    user_id = %notification.user_id,
                    kind = notification.kind.as_str(),
                    "Notification channel failed"
                );
            }
        }
        if failures > 0 && failures == self.channels.len() {
            anyhow::bail!("all {failures} notification channels failed");
        }
        Ok(())
    }
}

/// Sends and logs on failure. Callers never see delivery errors.
pub async fn notify_quietly(notifier: &dyn Notifier, notification: Notification) {
    if let Err(err) = notifier.notify(&notification).await {
        metrics::counter!("payroll_notification_failures_total").increment(1);
        warn!(
            error = %err,
            user_id = %notification.user_id,
            kind = notification.kind.as_str(),
            "Failed to deliver notification"
        );
    }
}
